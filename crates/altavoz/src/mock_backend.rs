//! Deterministic clocked backend for tests and headless hosts.
//!
//! Each voice runs a pump thread that renders through the shared core at
//! wall-clock rate, so transport timing (underflow, fades, finished events)
//! behaves like a hardware backend without touching any audio device.
//! Knobs expose the backend capability axes: copy-forcing for adopted
//! buffers, fade support, and voice-pool limits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::backend::{Backend, RenderHandle, Voice, VoiceRequest};
use crate::format::Format;
use crate::player::PlayerState;
use crate::{Error, Result};

/// Pump period; short enough to keep test timing tight.
const TICK: Duration = Duration::from_millis(4);

#[derive(Default)]
struct StatsInner {
    voices_created: AtomicUsize,
    voices_live: AtomicUsize,
}

/// Counters exposed for assertions on voice lifecycle (creation, reclaim,
/// rebuild).
#[derive(Clone, Default)]
pub struct MockStats {
    inner: Arc<StatsInner>,
}

impl MockStats {
    /// Total voices ever created by the backend.
    pub fn voices_created(&self) -> usize {
        self.inner.voices_created.load(Ordering::SeqCst)
    }

    /// Voices currently alive.
    pub fn voices_live(&self) -> usize {
        self.inner.voices_live.load(Ordering::SeqCst)
    }
}

/// A backend that renders to nowhere on a deterministic clock.
pub struct MockBackend {
    sample_rate: f64,
    force_copy: bool,
    fades: bool,
    initial_limit: u32,
    max_limit: u32,
    stats: MockStats,
}

impl MockBackend {
    /// Create a mock backend reporting the given device sample rate.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            force_copy: false,
            fades: true,
            initial_limit: 8,
            max_limit: 32,
            stats: MockStats::default(),
        }
    }

    /// Pretend the platform cannot pin caller memory, forcing adopted
    /// buffers to copy (and release their owner immediately).
    pub fn forcing_copy(mut self) -> Self {
        self.force_copy = true;
        self
    }

    /// Disable fade ramps; transport transitions become immediate.
    pub fn without_fades(mut self) -> Self {
        self.fades = false;
        self
    }

    /// Override the voice-pool limits (initial size and growth ceiling).
    pub fn with_voice_limits(mut self, initial: u32, max: u32) -> Self {
        self.initial_limit = initial.max(1);
        self.max_limit = max.max(self.initial_limit);
        self
    }

    /// Handle to the backend's lifecycle counters.
    pub fn stats(&self) -> MockStats {
        self.stats.clone()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn actual_sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn retains_adopted_data(&self) -> bool {
        !self.force_copy
    }

    fn supports_fades(&self) -> bool {
        self.fades
    }

    fn initial_voice_limit(&self) -> u32 {
        self.initial_limit
    }

    fn grown_voice_limit(&self, current: u32) -> Option<u32> {
        if current >= self.max_limit {
            None
        } else {
            Some((current + 8).min(self.max_limit))
        }
    }

    fn create_voice(&mut self, request: VoiceRequest) -> Result<Box<dyn Voice>> {
        let format = Arc::new(Mutex::new(request.format));
        let stop = Arc::new(AtomicBool::new(false));
        let suspended = Arc::new(AtomicBool::new(false));

        let thread = {
            let handle = request.handle.clone();
            let format = Arc::clone(&format);
            let stop = Arc::clone(&stop);
            let suspended = Arc::clone(&suspended);
            thread::Builder::new()
                .name(format!("altavoz-mock-voice-{}", request.bus))
                .spawn(move || pump(&handle, &format, &stop, &suspended))
                .map_err(|err| Error::Backend(err.to_string()))?
        };

        self.stats.inner.voices_created.fetch_add(1, Ordering::SeqCst);
        self.stats.inner.voices_live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(bus = request.bus, "mock voice created");
        Ok(Box::new(MockVoice {
            bus: request.bus,
            format,
            stop,
            suspended,
            thread: Some(thread),
            stats: Arc::clone(&self.stats.inner),
        }))
    }
}

/// The voice's audio thread: renders one tick's worth of frames through the
/// shared core on a fixed deadline schedule, exiting once its player is
/// gone or the voice is dropped.
fn pump(
    handle: &RenderHandle,
    format: &Arc<Mutex<Format>>,
    stop: &Arc<AtomicBool>,
    suspended: &Arc<AtomicBool>,
) {
    let mut scratch: Vec<f32> = Vec::new();
    let mut next = Instant::now() + TICK;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        if suspended.load(Ordering::Acquire) {
            // A suspended voice does not consume time: no catch-up burst
            // when it resumes.
            next = Instant::now() + TICK;
            continue;
        }
        next += TICK;

        let current = *format.lock().unwrap();
        let frames = ((current.sample_rate * TICK.as_secs_f64()).round() as usize).max(1);
        let channels = u16::from(current.num_channels.max(1));
        let needed = frames * usize::from(channels);
        if scratch.len() != needed {
            scratch.resize(needed, 0.0);
        }
        if !handle.render(&mut scratch, channels) {
            break;
        }
    }
}

struct MockVoice {
    bus: u32,
    format: Arc<Mutex<Format>>,
    stop: Arc<AtomicBool>,
    suspended: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<StatsInner>,
}

impl Voice for MockVoice {
    fn bus(&self) -> u32 {
        self.bus
    }

    fn set_format(&mut self, format: Format) -> Result<()> {
        *self.format.lock().unwrap() = format;
        Ok(())
    }

    fn handle_state_change(&mut self, _old: PlayerState, _new: PlayerState) -> Result<()> {
        // The pump renders continuously; transport is entirely render-side.
        Ok(())
    }

    fn suspend(&mut self) {
        self.suspended.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        self.suspended.store(false, Ordering::Release);
    }
}

impl Drop for MockVoice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.stats.voices_live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(bus = self.bus, "mock voice dropped");
    }
}
