//! Pluggable audio backend abstraction.
//!
//! The engine's abstract layer drives platform audio through two
//! object-safe traits: [`Backend`] (per-context: device, capabilities,
//! voice construction) and [`Voice`] (per-player: one backend playback
//! object). Both shipped implementations — [`CpalBackend`](crate::CpalBackend)
//! for hardware and [`MockBackend`](crate::MockBackend) for deterministic
//! tests — render through the same core via [`RenderHandle`], and custom
//! backends are expected to do the same.

use std::sync::Weak;

use crate::context::ContextShared;
use crate::format::Format;
use crate::player::{PlayerShared, PlayerState};
use crate::render;
use crate::Result;

/// Voice-pool accounting: one slot per live player, lowest free index
/// first, grown in steps when the backend allows.
pub(crate) struct BusPool {
    taken: Vec<bool>,
}

impl BusPool {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            taken: vec![false; initial as usize],
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.taken.len() as u32
    }

    /// Claim the lowest free bus, if any.
    pub(crate) fn allocate(&mut self) -> Option<u32> {
        let bus = self.taken.iter().position(|taken| !taken)?;
        self.taken[bus] = true;
        Some(bus as u32)
    }

    /// Extend the pool. Shrinking requests are ignored.
    pub(crate) fn grow(&mut self, new_capacity: u32) {
        if new_capacity as usize > self.taken.len() {
            self.taken.resize(new_capacity as usize, false);
        }
    }

    /// Return a bus to the pool.
    pub(crate) fn release(&mut self, bus: u32) {
        if let Some(slot) = self.taken.get_mut(bus as usize) {
            *slot = false;
        }
    }
}

/// A voice's entry point into the engine's render core.
///
/// Cloneable and cheap; holds weak references so a voice outliving its
/// player (a backend callback racing teardown) degrades to silence instead
/// of keeping the player alive.
#[derive(Clone)]
pub struct RenderHandle {
    pub(crate) player: Weak<PlayerShared>,
    pub(crate) context: Weak<ContextShared>,
}

impl RenderHandle {
    /// Fill `out` (interleaved f32, `channels` samples per frame) with the
    /// player's next audio. Takes the player's short lock for the duration
    /// of the call; safe to invoke from a real-time audio thread.
    ///
    /// Returns `false` once the player or context is gone — the voice
    /// should wind itself down.
    pub fn render(&self, out: &mut [f32], channels: u16) -> bool {
        out.fill(0.0);
        let (Some(player), Some(context)) = (self.player.upgrade(), self.context.upgrade()) else {
            return false;
        };
        let mut control = player.control.lock().unwrap();
        render::fill(
            &mut control,
            context.master(),
            context.events(),
            &player.finished_id,
            out,
            channels,
        );
        true
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle").finish_non_exhaustive()
    }
}

/// Everything a backend needs to construct one voice.
#[derive(Debug)]
pub struct VoiceRequest {
    /// The pool bus allocated to this voice.
    pub bus: u32,
    /// Initial playback format.
    pub format: Format,
    /// Render-core entry point for the voice's audio callback.
    pub handle: RenderHandle,
}

/// One backend playback object, owned by a player for its lifetime (or
/// until the context reclaims it while inactive). All methods are called
/// from the host thread.
pub trait Voice: Send {
    /// The pool bus this voice occupies.
    fn bus(&self) -> u32;

    /// Reconfigure for a new playback format. The player is already
    /// stopped when this is called.
    fn set_format(&mut self, format: Format) -> Result<()>;

    /// Drive a transport transition. Called only when `old != new`, after
    /// the control block has been updated, so the render path already
    /// reflects the new state.
    fn handle_state_change(&mut self, old: PlayerState, new: PlayerState) -> Result<()>;

    /// Halt output for a deactivated context, keeping configuration.
    fn suspend(&mut self) {}

    /// Undo [`suspend`](Voice::suspend).
    fn resume(&mut self) {}
}

/// A platform audio subsystem.
///
/// Object-safe so contexts can select a backend at runtime
/// ([`Context::with_backend`](crate::Context::with_backend)).
pub trait Backend: Send {
    /// Human-readable backend name (e.g. "cpal", "mock").
    fn name(&self) -> &'static str;

    /// The sample rate the output device actually runs at.
    fn actual_sample_rate(&self) -> f64;

    /// Backend extension of the context-level format check.
    fn is_format_valid(&self, format: Format) -> bool {
        format.is_valid()
    }

    /// Whether adopted buffer payloads can be pinned without copying.
    /// Backends returning `false` force a copy at creation, releasing the
    /// caller's storage immediately.
    fn retains_adopted_data(&self) -> bool {
        true
    }

    /// Whether pause/resume transitions are smoothed with gain ramps.
    /// Without fades, transitions are immediate.
    fn supports_fades(&self) -> bool {
        true
    }

    /// Voice-pool size at context creation.
    fn initial_voice_limit(&self) -> u32 {
        8
    }

    /// The pool size to grow to when `current` slots are all taken, or
    /// `None` when the pool cannot grow further.
    fn grown_voice_limit(&self, current: u32) -> Option<u32> {
        if current >= 32 { None } else { Some(current + 8) }
    }

    /// Allocate the backend voice for a new player.
    fn create_voice(&mut self, request: VoiceRequest) -> Result<Box<dyn Voice>>;

    /// Notification after the context's active flag changed.
    fn did_set_active(&mut self, _active: bool) {}
}
