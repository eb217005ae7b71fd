//! Audio context: the per-process session owning players and buffers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, BusPool, RenderHandle, Voice, VoiceRequest};
use crate::buffer::{Buffer, BufferInner, Payload};
use crate::events::EventQueue;
use crate::format::Format;
use crate::player::{Player, PlayerShared, PlayerState};
use crate::registry;
use crate::render::{Fade, PAUSE_FADE_SECS, RESUME_FADE_SECS};
use crate::{Error, Result};

/// Sample rate assumed when neither the caller nor the device reports one.
pub(crate) const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

/// Capacity of the pending-finished queue; overflow drops events.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// An abstract output destination. Informational only; backends that do not
/// report routing leave every route disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Phone earpiece.
    Receiver,
    /// Built-in speaker.
    Speaker,
    /// Wired headphones.
    Headphones,
    /// Line-level output.
    LineOut,
    /// Bluetooth or other wireless output.
    Wireless,
}

pub(crate) const ROUTE_COUNT: usize = 5;

/// Configuration for creating a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Requested output sample rate in Hz; the device may run at another
    /// rate, reported by [`Context::sample_rate`].
    pub sample_rate: f64,
    /// Output device selector (case-insensitive substring match); `None`
    /// uses the system default.
    pub device_name: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            device_name: None,
        }
    }
}

/// Master output controls shared with every render thread.
pub(crate) struct MasterState {
    gain: AtomicU32,
    mute: AtomicBool,
    active: AtomicBool,
    disposed: AtomicBool,
}

impl MasterState {
    pub(crate) fn new() -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            mute: AtomicBool::new(false),
            active: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub(crate) fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn mute(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub(crate) fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn swap_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    fn set_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Master output gain with mute folded in. The stored gain survives a
    /// mute so unmuting restores it.
    pub(crate) fn effective_gain(&self) -> f32 {
        if self.mute() { 0.0 } else { self.gain() }
    }
}

pub(crate) struct ContextShared {
    backend: Mutex<Box<dyn Backend>>,
    backend_name: &'static str,
    players: Mutex<Vec<Arc<PlayerShared>>>,
    pool: Mutex<BusPool>,
    events: EventQueue,
    master: MasterState,
    requested_rate: f64,
    actual_rate: f64,
    fades: bool,
    retains_adopted: bool,
    routes: [bool; ROUTE_COUNT],
}

impl ContextShared {
    pub(crate) fn master(&self) -> &MasterState {
        &self.master
    }

    pub(crate) fn events(&self) -> &EventQueue {
        &self.events
    }

    pub(crate) fn fades_supported(&self) -> bool {
        self.fades
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.master.is_disposed()
    }

    pub(crate) fn is_format_valid(&self, format: Format) -> bool {
        format.is_valid() && self.backend.lock().unwrap().is_format_valid(format)
    }

    fn roster_snapshot(&self) -> Vec<Arc<PlayerShared>> {
        self.players.lock().unwrap().clone()
    }

    /// Construct a backend voice for `player`, wiring it to the render core.
    pub(crate) fn build_voice(
        shared: &Arc<Self>,
        player: &Arc<PlayerShared>,
        format: Format,
    ) -> Result<Box<dyn Voice>> {
        let handle = RenderHandle {
            player: Arc::downgrade(player),
            context: Arc::downgrade(shared),
        };
        let request = VoiceRequest {
            bus: player.bus,
            format,
            handle,
        };
        shared.backend.lock().unwrap().create_voice(request)
    }

    /// Stop and detach every player reading `inner` (buffer teardown).
    pub(crate) fn detach_buffer(&self, inner: &Arc<BufferInner>) {
        for player in self.roster_snapshot() {
            player.force_stop_and_detach(Some(inner));
        }
    }

    pub(crate) fn remove_player(&self, shared: &Arc<PlayerShared>) {
        self.players
            .lock()
            .unwrap()
            .retain(|player| !Arc::ptr_eq(player, shared));
        self.pool.lock().unwrap().release(shared.bus);
    }

    /// Background transition: playing voices pause (with fade) and mark
    /// themselves for resumption; idle voices give their backend handles
    /// back, since they are a shared platform resource.
    fn deactivate(&self) {
        for player in self.roster_snapshot() {
            let mut voice_slot = player.voice.lock().unwrap();
            let mut control = player.control.lock().unwrap();
            match control.state {
                PlayerState::Playing => {
                    control.state = PlayerState::Paused;
                    control.background_paused = true;
                    control.fade = if self.fades {
                        Fade::fade_out(control.format.sample_rate, PAUSE_FADE_SECS)
                    } else {
                        Fade::None
                    };
                    drop(control);
                    if let Some(voice) = voice_slot.as_mut() {
                        let _ = voice.handle_state_change(PlayerState::Playing, PlayerState::Paused);
                    }
                }
                PlayerState::Paused => {
                    drop(control);
                    if let Some(voice) = voice_slot.as_mut() {
                        voice.suspend();
                    }
                }
                PlayerState::Stopped => {
                    drop(control);
                    if voice_slot.take().is_some() {
                        tracing::debug!(player = player.id, "voice reclaimed while inactive");
                    }
                }
            }
        }
    }

    /// Foreground transition: reclaimed voices are rebuilt from the stored
    /// format (gain/mute/looping live in the control block and need no
    /// restore), and background-paused players resume with a fade-in.
    fn reactivate(shared: &Arc<Self>) {
        for player in shared.roster_snapshot() {
            let mut voice_slot = player.voice.lock().unwrap();
            if voice_slot.is_none() {
                let format = player.control.lock().unwrap().format;
                match Self::build_voice(shared, &player, format) {
                    Ok(voice) => *voice_slot = Some(voice),
                    Err(err) => {
                        tracing::warn!(player = player.id, error = %err, "could not rebuild voice");
                        continue;
                    }
                }
            }
            let mut control = player.control.lock().unwrap();
            if control.background_paused && control.state == PlayerState::Paused {
                control.background_paused = false;
                control.state = PlayerState::Playing;
                control.fade = if shared.fades {
                    Fade::fade_in(control.format.sample_rate, RESUME_FADE_SECS)
                } else {
                    Fade::None
                };
                drop(control);
                if let Some(voice) = voice_slot.as_mut() {
                    voice.resume();
                    let _ = voice.handle_state_change(PlayerState::Paused, PlayerState::Playing);
                }
            } else {
                drop(control);
                if let Some(voice) = voice_slot.as_mut() {
                    voice.resume();
                }
            }
        }
    }
}

/// The per-process audio session.
///
/// Owns the backend connection and the voice pool; players and buffers are
/// created through it and stay tied to it. A newly created context is
/// active. Dropping the context stops and detaches every player, then
/// releases the backend; surviving `Player`/`Buffer` handles stay safe to
/// use but their mutating operations fail with
/// [`Error::ContextDisposed`](crate::Error::ContextDisposed).
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// Open the default hardware backend.
    #[cfg(feature = "cpal-backend")]
    pub fn new(options: ContextOptions) -> Result<Self> {
        let backend = crate::cpal_backend::CpalBackend::new(&options)?;
        Self::with_backend(Box::new(backend), options)
    }

    /// Open a context over a caller-supplied backend.
    pub fn with_backend(backend: Box<dyn Backend>, options: ContextOptions) -> Result<Self> {
        let reported = backend.actual_sample_rate();
        let actual_rate = if reported > 0.0 {
            reported
        } else {
            DEFAULT_SAMPLE_RATE
        };
        let backend_name = backend.name();
        let fades = backend.supports_fades();
        let retains_adopted = backend.retains_adopted_data();
        let initial_limit = backend.initial_voice_limit().max(1);

        let mut backend = backend;
        backend.did_set_active(true);

        let shared = Arc::new(ContextShared {
            backend: Mutex::new(backend),
            backend_name,
            players: Mutex::new(Vec::new()),
            pool: Mutex::new(BusPool::new(initial_limit)),
            events: EventQueue::new(EVENT_QUEUE_CAPACITY),
            master: MasterState::new(),
            requested_rate: options.sample_rate,
            actual_rate,
            fades,
            retains_adopted,
            routes: [false; ROUTE_COUNT],
        });
        tracing::info!(
            backend = backend_name,
            requested_rate = options.sample_rate,
            actual_rate,
            voices = initial_limit,
            "audio context created"
        );
        Ok(Self { shared })
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.shared.backend_name
    }

    /// The sample rate the output device actually runs at.
    pub fn sample_rate(&self) -> f64 {
        self.shared.actual_rate
    }

    /// The rate requested at creation.
    pub fn requested_sample_rate(&self) -> f64 {
        self.shared.requested_rate
    }

    /// Whether the context is active (foreground).
    pub fn is_active(&self) -> bool {
        self.shared.master.active()
    }

    /// Activate or deactivate the session, typically on app
    /// foreground/background transitions. Idempotent on same-state calls.
    pub fn set_active(&self, active: bool) {
        if self.shared.master.swap_active(active) == active {
            return;
        }
        if active {
            ContextShared::reactivate(&self.shared);
        } else {
            self.shared.deactivate();
        }
        self.shared.backend.lock().unwrap().did_set_active(active);
        tracing::info!(active, "context activation changed");
    }

    /// Whether master output is muted.
    pub fn mute(&self) -> bool {
        self.shared.master.mute()
    }

    /// Mute or unmute master output. The stored gain is preserved so
    /// unmuting restores it.
    pub fn set_mute(&self, mute: bool) {
        self.shared.master.set_mute(mute);
    }

    /// Master gain in [0, 1].
    pub fn gain(&self) -> f32 {
        self.shared.master.gain()
    }

    /// Set master gain, clamped to [0, 1].
    pub fn set_gain(&self, gain: f32) {
        self.shared.master.set_gain(gain.clamp(0.0, 1.0));
    }

    /// Whether the context can play the given format.
    pub fn is_format_valid(&self, format: Format) -> bool {
        self.shared.is_format_valid(format)
    }

    /// Whether audio is currently leaving through `route`. Backends that
    /// cannot report routing always answer `false`.
    pub fn is_route_enabled(&self, route: Route) -> bool {
        self.shared.routes[route as usize]
    }

    /// Deliver pending finished callbacks on the calling thread. Returns
    /// the number of callbacks invoked; events whose registration has been
    /// retired (player freed, callback replaced) are dropped silently.
    pub fn poll_events(&self) -> usize {
        let mut delivered = 0;
        for id in self.shared.events.drain() {
            if registry::dispatch(id) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Create a buffer by copying `data` (interleaved PCM in `format`).
    /// The frame count is `data.len() / format.frame_size()`; the length
    /// must divide evenly and be non-zero.
    pub fn create_buffer(&self, format: Format, data: &[u8]) -> Result<Buffer> {
        let num_frames = self.validate_pcm(format, data.len())?;
        let payload = Payload::Copied(data.to_vec().into_boxed_slice());
        Ok(self.finish_buffer(format, num_frames, payload))
    }

    /// Create a buffer by adopting caller-owned storage without copying.
    /// The owner's `Drop` acts as the deallocator and runs when the engine
    /// no longer needs the bytes. If the backend cannot pin caller memory
    /// the data is copied and the owner dropped before this returns.
    pub fn create_buffer_adopted<T>(&self, format: Format, data: T) -> Result<Buffer>
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        let num_frames = self.validate_pcm(format, data.as_ref().len())?;
        let payload = if self.shared.retains_adopted {
            Payload::Adopted(Box::new(data))
        } else {
            let copied = data.as_ref().to_vec().into_boxed_slice();
            drop(data);
            Payload::Copied(copied)
        };
        Ok(self.finish_buffer(format, num_frames, payload))
    }

    /// Create a player with the given playback format. Fails with
    /// [`Error::PoolExhausted`](crate::Error::PoolExhausted) once every bus
    /// is taken and the backend refuses to grow the pool.
    pub fn create_player(&self, format: Format) -> Result<Player> {
        if self.shared.is_disposed() {
            return Err(Error::ContextDisposed);
        }
        if !self.is_format_valid(format) {
            return Err(Error::InvalidFormat(format));
        }

        let bus = {
            let mut pool = self.shared.pool.lock().unwrap();
            match pool.allocate() {
                Some(bus) => bus,
                None => {
                    let current = pool.capacity();
                    let grown = self.shared.backend.lock().unwrap().grown_voice_limit(current);
                    match grown {
                        Some(limit) if limit > current => {
                            pool.grow(limit);
                            tracing::debug!(from = current, to = limit, "voice pool grown");
                            pool.allocate().ok_or(Error::PoolExhausted)?
                        }
                        _ => return Err(Error::PoolExhausted),
                    }
                }
            }
        };

        let shared = Arc::new(PlayerShared::new(bus, format));
        match ContextShared::build_voice(&self.shared, &shared, format) {
            Ok(voice) => {
                *shared.voice.lock().unwrap() = Some(voice);
            }
            Err(err) => {
                // Nothing must leak on a failed create.
                self.shared.pool.lock().unwrap().release(bus);
                return Err(err);
            }
        }
        self.shared.players.lock().unwrap().push(Arc::clone(&shared));
        tracing::debug!(player = shared.id, bus, "player created");
        Ok(Player {
            shared,
            context: Arc::clone(&self.shared),
        })
    }

    fn validate_pcm(&self, format: Format, byte_len: usize) -> Result<u32> {
        if !self.is_format_valid(format) {
            return Err(Error::InvalidFormat(format));
        }
        if byte_len == 0 {
            return Err(Error::InvalidData("empty PCM payload"));
        }
        let frame_size = format.frame_size();
        if byte_len % frame_size != 0 {
            return Err(Error::InvalidData(
                "payload length is not a whole number of frames",
            ));
        }
        u32::try_from(byte_len / frame_size)
            .map_err(|_| Error::InvalidData("payload exceeds the frame-count limit"))
    }

    fn finish_buffer(&self, format: Format, num_frames: u32, payload: Payload) -> Buffer {
        let inner = Arc::new(BufferInner::new(format, num_frames, payload));
        tracing::debug!(
            buffer = inner.id(),
            num_frames,
            rate = format.sample_rate,
            "buffer created"
        );
        Buffer {
            inner,
            context: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Teardown order: players stopped and detached, voices released,
        // then the backend goes inactive. Buffer payloads release
        // themselves once the last handle or attachment lets go.
        self.shared.master.set_disposed();
        for player in self.shared.roster_snapshot() {
            player.force_stop_and_detach(None);
            *player.voice.lock().unwrap() = None;
        }
        self.shared.master.swap_active(false);
        self.shared.backend.lock().unwrap().did_set_active(false);
        tracing::info!("audio context freed");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.shared.backend_name)
            .field("sample_rate", &self.shared.actual_rate)
            .field("active", &self.shared.master.active())
            .finish_non_exhaustive()
    }
}
