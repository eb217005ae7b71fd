//! Real-time render core shared by every backend.
//!
//! One routine fills a voice's output buffer from the player's control
//! block: silence-and-stop handling, bounded copy with cursor advance and
//! loop wrap, underflow detection with finished-event queueing, and linear
//! fade ramps. Runs under the player's short lock and never allocates.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::MasterState;
use crate::events::EventQueue;
use crate::player::{PlayerControl, PlayerState};

/// Fade-out length when a playing voice is paused.
pub(crate) const PAUSE_FADE_SECS: f64 = 0.1;

/// Fade-in length when a paused voice resumes.
pub(crate) const RESUME_FADE_SECS: f64 = 0.05;

/// Linear gain ramp applied across render callbacks.
///
/// Progress is counted in frames so the ramp is rate-independent; a drained
/// `Out` ramp collapses to `None`, which gates a paused voice to silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fade {
    None,
    /// Gain rises 0 → 1 over `total` frames.
    In { total: u32, done: u32 },
    /// Gain falls 1 → 0 over `total` frames.
    Out { total: u32, done: u32 },
}

impl Fade {
    pub(crate) fn fade_in(sample_rate: f64, seconds: f64) -> Self {
        Fade::In {
            total: ramp_frames(sample_rate, seconds),
            done: 0,
        }
    }

    pub(crate) fn fade_out(sample_rate: f64, seconds: f64) -> Self {
        Fade::Out {
            total: ramp_frames(sample_rate, seconds),
            done: 0,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !matches!(self, Fade::None)
    }

    /// Gain multiplier for the frame `offset` frames past the ramp's
    /// current position.
    fn factor(&self, offset: u32) -> f32 {
        match *self {
            Fade::None => 1.0,
            Fade::In { total, done } => {
                (f64::from(done.saturating_add(offset)) / f64::from(total)).min(1.0) as f32
            }
            Fade::Out { total, done } => {
                (1.0 - f64::from(done.saturating_add(offset)) / f64::from(total)).max(0.0) as f32
            }
        }
    }

    /// Advance the ramp by `frames` rendered frames.
    fn advance(&mut self, frames: u32) {
        match self {
            Fade::None => {}
            Fade::In { total, done } | Fade::Out { total, done } => {
                *done = done.saturating_add(frames).min(*total);
                if *done >= *total {
                    *self = Fade::None;
                }
            }
        }
    }
}

fn ramp_frames(sample_rate: f64, seconds: f64) -> u32 {
    ((sample_rate * seconds) as u32).max(1)
}

/// Fill `out` (interleaved f32, `out_channels` per frame) with the next
/// audio for one voice.
///
/// Mirrors the transport contract: a voice that is not playing (or whose
/// pause fade has drained) renders silence; a playing voice copies from the
/// attached buffer, advancing the cursor and wrapping on loop; a non-looping
/// voice that has consumed its buffer transitions to `Stopped` and queues
/// the finished-callback id, exactly once per playthrough.
pub(crate) fn fill(
    control: &mut PlayerControl,
    master: &MasterState,
    events: &EventQueue,
    finished_id: &AtomicU64,
    out: &mut [f32],
    out_channels: u16,
) {
    out.fill(0.0);
    let out_channels = usize::from(out_channels.max(1));
    let out_frames = out.len() / out_channels;

    let end_of_data = match control.buffer.as_ref() {
        Some(buffer) => control.next_frame >= buffer.num_frames(),
        None => true,
    };
    let audible = control.state == PlayerState::Playing
        || (control.state == PlayerState::Paused && control.fade.is_active());

    if !audible || end_of_data {
        if control.state == PlayerState::Playing {
            // End of stream, or the buffer vanished mid-flight. Only a
            // genuine playthrough earns the finished callback; explicit
            // stops and detaches never reach this branch in Playing state.
            let finished = control.buffer.is_some() && end_of_data;
            control.state = PlayerState::Stopped;
            control.next_frame = 0;
            control.fade = Fade::None;
            if finished {
                let id = finished_id.load(Ordering::Acquire);
                if id != 0 {
                    events.push(id);
                }
            }
        }
        return;
    }

    let Some(buffer) = control.buffer.clone() else {
        return;
    };
    let format = buffer.format();
    let bytes = buffer.bytes();
    let src_channels = usize::from(format.num_channels);
    let num_frames = buffer.num_frames();
    let base_gain = master.effective_gain() * control.effective_gain();

    let mut written = 0usize;
    while written < out_frames {
        if control.next_frame >= num_frames {
            if control.looping {
                control.next_frame = 0;
            } else {
                // Remainder stays silent; the stop lands on the next call.
                break;
            }
        }
        let gain = base_gain * control.fade.factor(written as u32);
        let frame = control.next_frame as usize;
        let dst = &mut out[written * out_channels..(written + 1) * out_channels];
        if src_channels == 2 && out_channels == 1 {
            let left = decode(bytes, format.bit_depth, frame * 2);
            let right = decode(bytes, format.bit_depth, frame * 2 + 1);
            dst[0] = 0.5 * (left + right) * gain;
        } else {
            for (ch, slot) in dst.iter_mut().enumerate() {
                let src_ch = if src_channels == 1 { 0 } else { ch.min(src_channels - 1) };
                *slot = decode(bytes, format.bit_depth, frame * src_channels + src_ch) * gain;
            }
        }
        control.next_frame += 1;
        written += 1;
    }

    control.fade.advance(written as u32);
}

/// Decode the sample at flat index `index` (frame * channels + channel) to
/// f32 in [-1, 1). 16-bit is signed native-endian, 8-bit unsigned offset-128.
fn decode(bytes: &[u8], bit_depth: u8, index: usize) -> f32 {
    if bit_depth == 8 {
        (f32::from(bytes[index]) - 128.0) / 128.0
    } else {
        let at = index * 2;
        f32::from(i16::from_ne_bytes([bytes[at], bytes[at + 1]])) / 32_768.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferInner, Payload};
    use crate::format::Format;
    use std::sync::Arc;

    fn mono16(samples: &[i16]) -> Arc<BufferInner> {
        let format = Format::new(1_000.0, 16, 1);
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Arc::new(BufferInner::new(
            format,
            samples.len() as u32,
            Payload::Copied(bytes.into_boxed_slice()),
        ))
    }

    fn playing_control(buffer: &Arc<BufferInner>) -> PlayerControl {
        let mut control = PlayerControl::new(buffer.format());
        control.buffer = Some(Arc::clone(buffer));
        control.state = PlayerState::Playing;
        control
    }

    fn harness() -> (MasterState, EventQueue, AtomicU64) {
        (MasterState::new(), EventQueue::new(16), AtomicU64::new(0))
    }

    #[test]
    fn stopped_renders_silence() {
        let buffer = mono16(&[1000, 2000, 3000]);
        let mut control = PlayerControl::new(buffer.format());
        control.buffer = Some(buffer);
        let (master, events, id) = harness();

        let mut out = [0.7f32; 4];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(out, [0.0; 4]);
        assert_eq!(control.state, PlayerState::Stopped);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn playing_copies_and_advances() {
        let buffer = mono16(&[16_384, -16_384, 8_192, 0]);
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 2];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);
        assert_eq!(control.next_frame, 2);
        assert_eq!(control.state, PlayerState::Playing);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn player_gain_and_mute_apply() {
        let buffer = mono16(&[16_384, 16_384]);
        let mut control = playing_control(&buffer);
        control.gain = 0.5;
        let (master, events, id) = harness();

        let mut out = [0.0f32; 1];
        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert!((out[0] - 0.25).abs() < 1e-6);

        control.mute = true;
        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(out[0], 0.0);
        // The cursor still advances while muted.
        assert_eq!(control.next_frame, 2);
    }

    #[test]
    fn looping_wraps_without_finishing() {
        let buffer = mono16(&[1000, 2000]);
        let mut control = playing_control(&buffer);
        control.looping = true;
        let (master, events, id) = harness();
        id.store(99, Ordering::Release);

        let mut out = [0.0f32; 5];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(control.state, PlayerState::Playing);
        assert_eq!(control.next_frame, 1);
        assert_eq!(events.len(), 0);
        assert!((out[0] - out[2]).abs() < 1e-6);
        assert!((out[1] - out[3]).abs() < 1e-6);
    }

    #[test]
    fn underflow_stops_and_queues_once() {
        let buffer = mono16(&[1000, 2000, 3000]);
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();
        id.store(7, Ordering::Release);

        let mut out = [0.0f32; 8];
        fill(&mut control, &master, &events, &id, &mut out, 1);
        // All data consumed, remainder silent, still nominally playing.
        assert_eq!(control.state, PlayerState::Playing);
        assert_eq!(out[3], 0.0);
        assert_eq!(events.len(), 0);

        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(control.state, PlayerState::Stopped);
        assert_eq!(control.next_frame, 0);
        assert_eq!(events.drain(), vec![7]);

        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn underflow_without_registration_is_silent() {
        let buffer = mono16(&[1000]);
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 4];
        fill(&mut control, &master, &events, &id, &mut out, 1);
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(control.state, PlayerState::Stopped);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn detached_while_playing_stops_without_event() {
        let buffer = mono16(&[1000, 2000]);
        let mut control = playing_control(&buffer);
        control.buffer = None;
        let (master, events, id) = harness();
        id.store(5, Ordering::Release);

        let mut out = [0.0f32; 4];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(control.state, PlayerState::Stopped);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn paused_preserves_cursor() {
        let buffer = mono16(&[1000, 2000, 3000, 4000]);
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 2];
        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(control.next_frame, 2);

        control.state = PlayerState::Paused;
        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(out, [0.0; 2]);
        assert_eq!(control.next_frame, 2);
        assert_eq!(control.state, PlayerState::Paused);
    }

    #[test]
    fn pause_fade_drains_then_gates() {
        let buffer = mono16(&[16_384; 32]);
        let mut control = playing_control(&buffer);
        control.state = PlayerState::Paused;
        control.fade = Fade::Out { total: 4, done: 0 };
        let (master, events, id) = harness();

        let mut out = [0.0f32; 4];
        fill(&mut control, &master, &events, &id, &mut out, 1);
        // Declining gain across the ramp.
        assert!(out[0] > out[1] && out[1] > out[2] && out[2] > out[3]);
        assert_eq!(control.fade, Fade::None);
        let advanced = control.next_frame;
        assert_eq!(advanced, 4);

        // Drained ramp gates the voice to silence; no stop, no event.
        fill(&mut control, &master, &events, &id, &mut out, 1);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(control.next_frame, advanced);
        assert_eq!(control.state, PlayerState::Paused);
        assert_eq!(events.len(), 0);
    }

    #[test]
    fn resume_fade_rises_to_unity() {
        let buffer = mono16(&[16_384; 16]);
        let mut control = playing_control(&buffer);
        control.fade = Fade::In { total: 4, done: 0 };
        let (master, events, id) = harness();

        let mut out = [0.0f32; 8];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(out[0], 0.0);
        assert!(out[1] < out[2] && out[2] < out[3]);
        assert!((out[5] - 0.5).abs() < 1e-6);
        assert_eq!(control.fade, Fade::None);
    }

    #[test]
    fn mono_buffer_duplicates_into_stereo_out() {
        let buffer = mono16(&[16_384, -16_384]);
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 4];
        fill(&mut control, &master, &events, &id, &mut out, 2);

        assert_eq!(out[0], out[1]);
        assert_eq!(out[2], out[3]);
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_buffer_averages_into_mono_out() {
        let format = Format::new(1_000.0, 16, 2);
        let samples: [i16; 4] = [16_384, 0, 0, -16_384];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let buffer = Arc::new(BufferInner::new(
            format,
            2,
            Payload::Copied(bytes.into_boxed_slice()),
        ));
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 2];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[1] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn unsigned_8_bit_decodes_around_midpoint() {
        let format = Format::new(1_000.0, 8, 1);
        let bytes: Vec<u8> = vec![128, 255, 0];
        let buffer = Arc::new(BufferInner::new(
            format,
            3,
            Payload::Copied(bytes.into_boxed_slice()),
        ));
        let mut control = playing_control(&buffer);
        let (master, events, id) = harness();

        let mut out = [0.0f32; 3];
        fill(&mut control, &master, &events, &id, &mut out, 1);

        assert_eq!(out[0], 0.0);
        assert!(out[1] > 0.98);
        assert!(out[2] < -0.99);
    }
}
