//! Altavoz — low-level PCM playback over native audio backends.
//!
//! This crate provides:
//!
//! - **[`Context`]**: the per-process audio session owning all engine objects
//! - **[`Buffer`]**: immutable, fully-decoded PCM payloads shareable across players
//! - **[`Player`]**: a playback voice with state, gain, mute, looping, and a
//!   finished callback delivered on the host thread
//! - **[`Backend`]/[`Voice`]**: the pluggable backend contract, with a
//!   [`CpalBackend`] hardware implementation and a deterministic
//!   [`MockBackend`] for CI and headless hosts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use altavoz::{Context, ContextOptions, Format, PlayerState};
//!
//! let ctx = Context::new(ContextOptions::default())?;
//! let format = Format::new(44_100.0, 16, 1);
//! let buffer = ctx.create_buffer(format, &pcm_bytes)?;
//!
//! let mut player = ctx.create_player(format)?;
//! player.set_buffer(Some(&buffer))?;
//! player.set_finished_callback(|| println!("done"));
//! player.set_state(PlayerState::Playing)?;
//!
//! // The host pumps completion events on its own schedule.
//! loop {
//!     ctx.poll_events();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```
//!
//! ## Design
//!
//! The engine consumes raw linear PCM; decoding, streaming, and effects are
//! out of scope. All backends share one real-time render core (copy, cursor
//! advance, loop wrap, underflow detection, fade ramps) that runs under a
//! short per-player lock. Finished callbacks are protected by a process-wide
//! id registry so a player freed between the render thread's completion
//! notification and host-side delivery simply drops the event.

mod backend;
mod buffer;
mod context;
#[cfg(feature = "cpal-backend")]
mod cpal_backend;
mod events;
mod format;
mod mock_backend;
mod player;
mod registry;
mod render;

pub use backend::{Backend, RenderHandle, Voice, VoiceRequest};
pub use buffer::{Buffer, BufferId};
pub use context::{Context, ContextOptions, Route};
#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
pub use format::Format;
pub use mock_backend::{MockBackend, MockStats};
pub use player::{Player, PlayerState};

/// Error types for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No audio output device is available on the system.
    #[error("no audio output device available")]
    NoDevice,

    /// A backend call failed.
    #[error("audio backend error: {0}")]
    Backend(String),

    /// The format cannot be played by the context.
    #[error("invalid audio format: {0:?}")]
    InvalidFormat(Format),

    /// The supplied PCM payload is unusable.
    #[error("invalid PCM data: {0}")]
    InvalidData(&'static str),

    /// Every voice in the pool is taken and the backend cannot grow it.
    #[error("player pool exhausted")]
    PoolExhausted,

    /// The operation requires an attached buffer.
    #[error("no buffer attached to player")]
    NoBuffer,

    /// The owning context has been freed.
    #[error("audio context disposed")]
    ContextDisposed,

    /// The buffer was created by a different context.
    #[error("buffer belongs to a different context")]
    BufferContextMismatch,
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
