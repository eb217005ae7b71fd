//! Immutable PCM buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::context::ContextShared;
use crate::format::Format;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a buffer, used for attachment introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u64);

/// Backing storage for a buffer's PCM bytes.
pub(crate) enum Payload {
    /// Engine-owned copy of the caller's data.
    Copied(Box<[u8]>),
    /// Caller-owned storage adopted without copying; the owner's `Drop`
    /// is the deallocator.
    Adopted(Box<dyn AsRef<[u8]> + Send + Sync>),
}

pub(crate) struct BufferInner {
    id: u64,
    format: Format,
    num_frames: u32,
    payload: Payload,
}

impl BufferInner {
    pub(crate) fn new(format: Format, num_frames: u32, payload: Payload) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            format,
            num_frames,
            payload,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn format(&self) -> Format {
        self.format
    }

    pub(crate) fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Copied(bytes) => bytes,
            Payload::Adopted(owner) => (**owner).as_ref(),
        }
    }

    fn is_adopted(&self) -> bool {
        matches!(self.payload, Payload::Adopted(_))
    }
}

/// An immutable PCM payload, shareable across any number of players.
///
/// Created through [`Context::create_buffer`](crate::Context::create_buffer)
/// (copied) or
/// [`Context::create_buffer_adopted`](crate::Context::create_buffer_adopted)
/// (zero-copy). Dropping the buffer detaches and stops every player reading
/// it before the payload can be released; the storage itself lives until the
/// last attachment lets go.
pub struct Buffer {
    pub(crate) inner: Arc<BufferInner>,
    pub(crate) context: Weak<ContextShared>,
}

impl Buffer {
    /// Stable identity, comparable with
    /// [`Player::buffer_id`](crate::Player::buffer_id).
    pub fn id(&self) -> BufferId {
        BufferId(self.inner.id)
    }

    /// The format the payload was created with.
    pub fn format(&self) -> Format {
        self.inner.format
    }

    /// Number of PCM frames in the payload.
    pub fn num_frames(&self) -> u32 {
        self.inner.num_frames
    }

    /// Playback duration of the whole payload.
    pub fn duration(&self) -> Duration {
        self.inner.format.duration(self.inner.num_frames)
    }

    /// The adopted payload bytes, when the backend retained caller memory.
    /// Copied buffers keep their storage private and return `None`.
    pub fn data(&self) -> Option<&[u8]> {
        if self.inner.is_adopted() {
            Some(self.inner.bytes())
        } else {
            None
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Every attached player must be stopped and detached before the
        // payload can go away; the last strong reference is released only
        // after the walk completes.
        if let Some(context) = self.context.upgrade() {
            context.detach_buffer(&self.inner);
        }
        tracing::debug!(buffer = self.inner.id, "buffer freed");
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("format", &self.inner.format)
            .field("num_frames", &self.inner.num_frames)
            .finish_non_exhaustive()
    }
}
