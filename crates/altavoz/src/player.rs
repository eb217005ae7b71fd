//! Players (voices): playback cursors over attached buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::Voice;
use crate::buffer::{Buffer, BufferId, BufferInner};
use crate::context::ContextShared;
use crate::format::Format;
use crate::render::{Fade, PAUSE_FADE_SECS, RESUME_FADE_SECS};
use crate::registry;
use crate::{Error, Result};

static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Playback transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Not rendering; the cursor is at the start of the buffer.
    #[default]
    Stopped,
    /// Rendering from the attached buffer.
    Playing,
    /// Rendering suspended; the cursor keeps its position.
    Paused,
}

/// The render-shared control block. Every mutation happens under the
/// player's short lock; the render thread holds the same lock for the
/// duration of each callback.
pub(crate) struct PlayerControl {
    pub(crate) format: Format,
    pub(crate) state: PlayerState,
    pub(crate) next_frame: u32,
    pub(crate) buffer: Option<Arc<BufferInner>>,
    pub(crate) gain: f32,
    pub(crate) mute: bool,
    pub(crate) looping: bool,
    pub(crate) fade: Fade,
    pub(crate) background_paused: bool,
}

impl PlayerControl {
    pub(crate) fn new(format: Format) -> Self {
        Self {
            format,
            state: PlayerState::Stopped,
            next_frame: 0,
            buffer: None,
            gain: 1.0,
            mute: false,
            looping: false,
            fade: Fade::None,
            background_paused: false,
        }
    }

    pub(crate) fn effective_gain(&self) -> f32 {
        if self.mute { 0.0 } else { self.gain }
    }
}

pub(crate) struct PlayerShared {
    pub(crate) id: u64,
    pub(crate) bus: u32,
    /// Host-side voice slot; `None` while the backend handle is reclaimed
    /// for a deactivated context. Never touched by the render thread.
    pub(crate) voice: Mutex<Option<Box<dyn Voice>>>,
    pub(crate) control: Mutex<PlayerControl>,
    /// Current finished-callback registration, 0 when none. Loaded by the
    /// render thread at the moment of completion.
    pub(crate) finished_id: AtomicU64,
}

impl PlayerShared {
    pub(crate) fn new(bus: u32, format: Format) -> Self {
        Self {
            id: NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed),
            bus,
            voice: Mutex::new(None),
            control: Mutex::new(PlayerControl::new(format)),
            finished_id: AtomicU64::new(0),
        }
    }

    /// Stop the player and, when `target` matches the attachment (or is
    /// `None`), detach its buffer. Used by buffer teardown and context
    /// teardown; never delivers a finished callback.
    pub(crate) fn force_stop_and_detach(&self, target: Option<&Arc<BufferInner>>) {
        let mut voice_slot = self.voice.lock().unwrap();
        let mut control = self.control.lock().unwrap();
        let matches = match (target, control.buffer.as_ref()) {
            (None, _) => true,
            (Some(target), Some(attached)) => Arc::ptr_eq(target, attached),
            (Some(_), None) => false,
        };
        if !matches {
            return;
        }
        let old = control.state;
        control.buffer = None;
        control.state = PlayerState::Stopped;
        control.next_frame = 0;
        control.fade = Fade::None;
        control.background_paused = false;
        drop(control);
        if old != PlayerState::Stopped
            && let Some(voice) = voice_slot.as_mut()
        {
            let _ = voice.handle_state_change(old, PlayerState::Stopped);
        }
    }
}

/// A playback voice over at most one attached buffer.
///
/// Created through [`Context::create_player`](crate::Context::create_player).
/// A player occupies one bus of the context's voice pool for its whole life;
/// dropping it stops playback, retires the finished-callback registration,
/// and returns the bus.
pub struct Player {
    pub(crate) shared: Arc<PlayerShared>,
    pub(crate) context: Arc<ContextShared>,
}

impl Player {
    /// The playback format the voice is configured for.
    pub fn format(&self) -> Format {
        self.shared.control.lock().unwrap().format
    }

    /// Reconfigure the voice for a new playback format. Implicitly stops
    /// the player; the attached buffer, if any, is kept.
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        if self.context.is_disposed() {
            return Err(Error::ContextDisposed);
        }
        if !self.context.is_format_valid(format) {
            return Err(Error::InvalidFormat(format));
        }
        self.transition_to_stopped();
        let mut voice_slot = self.shared.voice.lock().unwrap();
        if let Some(voice) = voice_slot.as_mut() {
            voice.set_format(format)?;
        }
        self.shared.control.lock().unwrap().format = format;
        Ok(())
    }

    /// Identity of the attached buffer, if any.
    pub fn buffer_id(&self) -> Option<BufferId> {
        let control = self.shared.control.lock().unwrap();
        control.buffer.as_ref().map(|inner| BufferId(inner.id()))
    }

    /// Attach a buffer (or detach with `None`). Implicitly stops the
    /// player; any previous attachment is released. A buffer may be
    /// attached to multiple players, but only to players of its own
    /// context.
    pub fn set_buffer(&mut self, buffer: Option<&Buffer>) -> Result<()> {
        if let Some(buffer) = buffer
            && !buffer
                .context
                .upgrade()
                .is_some_and(|owner| Arc::ptr_eq(&owner, &self.context))
        {
            return Err(Error::BufferContextMismatch);
        }
        self.transition_to_stopped();
        let mut control = self.shared.control.lock().unwrap();
        control.buffer = buffer.map(|b| Arc::clone(&b.inner));
        control.next_frame = 0;
        Ok(())
    }

    /// Register the function called when a non-looping playthrough
    /// completes. Replaces any previous registration. The callback runs on
    /// the thread pumping [`Context::poll_events`](crate::Context::poll_events);
    /// it is *not* invoked on explicit stops, detaches, or drop.
    pub fn set_finished_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let id = registry::register(Box::new(callback));
        let old = self.shared.finished_id.swap(id, Ordering::AcqRel);
        registry::retire(old);
    }

    /// Remove the finished-callback registration.
    pub fn clear_finished_callback(&mut self) {
        let old = self.shared.finished_id.swap(0, Ordering::AcqRel);
        registry::retire(old);
    }

    /// Whether a finished callback is currently registered.
    pub fn has_finished_callback(&self) -> bool {
        self.shared.finished_id.load(Ordering::Acquire) != 0
    }

    /// Whether the player is muted.
    pub fn mute(&self) -> bool {
        self.shared.control.lock().unwrap().mute
    }

    /// Mute or unmute. The stored gain is preserved across mutes.
    pub fn set_mute(&mut self, mute: bool) {
        self.shared.control.lock().unwrap().mute = mute;
    }

    /// Playback gain in [0, 1].
    pub fn gain(&self) -> f32 {
        self.shared.control.lock().unwrap().gain
    }

    /// Set playback gain, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.shared.control.lock().unwrap().gain = gain.clamp(0.0, 1.0);
    }

    /// Whether playback wraps at end of buffer.
    pub fn is_looping(&self) -> bool {
        self.shared.control.lock().unwrap().looping
    }

    /// Enable or disable looping. Takes effect at the next wrap point.
    pub fn set_looping(&mut self, looping: bool) {
        self.shared.control.lock().unwrap().looping = looping;
    }

    /// The bus index this voice occupies in the context's pool.
    pub fn bus(&self) -> u32 {
        self.shared.bus
    }

    /// The current transport state, as observed by the render thread.
    pub fn state(&self) -> PlayerState {
        self.shared.control.lock().unwrap().state
    }

    /// Request a transport transition. Requires an attached buffer.
    ///
    /// Stopping resets the cursor and never delivers the finished
    /// callback. Pausing a playing voice fades out when the backend
    /// supports fades; resuming fades back in. `Playing` from `Stopped`
    /// starts at frame zero.
    pub fn set_state(&mut self, state: PlayerState) -> Result<()> {
        if self.context.is_disposed() {
            return Err(Error::ContextDisposed);
        }
        let mut voice_slot = self.shared.voice.lock().unwrap();
        let mut control = self.shared.control.lock().unwrap();
        if control.buffer.is_none() {
            return Err(Error::NoBuffer);
        }
        let old = control.state;
        if old == state {
            return Ok(());
        }
        // A stopped player has nothing to pause; the request is accepted
        // and the player stays stopped.
        if old == PlayerState::Stopped && state == PlayerState::Paused {
            return Ok(());
        }

        let fades = self.context.fades_supported();
        let rate = control.format.sample_rate;
        match state {
            PlayerState::Stopped => {
                control.state = PlayerState::Stopped;
                control.next_frame = 0;
                control.fade = Fade::None;
            }
            PlayerState::Paused => {
                control.state = PlayerState::Paused;
                control.fade = if fades {
                    Fade::fade_out(rate, PAUSE_FADE_SECS)
                } else {
                    Fade::None
                };
            }
            PlayerState::Playing => {
                if old == PlayerState::Stopped {
                    control.next_frame = 0;
                }
                control.state = PlayerState::Playing;
                control.fade = if old == PlayerState::Paused && fades {
                    Fade::fade_in(rate, RESUME_FADE_SECS)
                } else {
                    Fade::None
                };
            }
        }
        drop(control);

        // The backend handle may have been reclaimed while the context was
        // inactive; rebuild it before driving the transition.
        if voice_slot.is_none() {
            let format = self.shared.control.lock().unwrap().format;
            *voice_slot = Some(ContextShared::build_voice(
                &self.context,
                &self.shared,
                format,
            )?);
        }
        if let Some(voice) = voice_slot.as_mut()
            && let Err(err) = voice.handle_state_change(old, state)
        {
            // A failed backend transition forces the player to Stopped.
            let mut control = self.shared.control.lock().unwrap();
            control.state = PlayerState::Stopped;
            control.next_frame = 0;
            control.fade = Fade::None;
            return Err(err);
        }
        Ok(())
    }

    /// Stop without requiring a buffer and without reporting errors; the
    /// implicit-stop path for attach, format change, and teardown.
    fn transition_to_stopped(&self) {
        let mut voice_slot = self.shared.voice.lock().unwrap();
        let mut control = self.shared.control.lock().unwrap();
        let old = control.state;
        control.state = PlayerState::Stopped;
        control.next_frame = 0;
        control.fade = Fade::None;
        drop(control);
        if old != PlayerState::Stopped
            && let Some(voice) = voice_slot.as_mut()
        {
            let _ = voice.handle_state_change(old, PlayerState::Stopped);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.transition_to_stopped();
        self.shared.control.lock().unwrap().buffer = None;
        let old = self.shared.finished_id.swap(0, Ordering::AcqRel);
        registry::retire(old);
        // Dispose the backend voice (joining any pump thread) before the
        // bus goes back to the pool.
        *self.shared.voice.lock().unwrap() = None;
        self.context.remove_player(&self.shared);
        tracing::debug!(player = self.shared.id, bus = self.shared.bus, "player freed");
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock().unwrap();
        f.debug_struct("Player")
            .field("id", &self.shared.id)
            .field("bus", &self.shared.bus)
            .field("state", &control.state)
            .field("format", &control.format)
            .finish_non_exhaustive()
    }
}
