//! PCM format descriptor.

use std::time::Duration;

/// Describes interleaved linear PCM: sample rate, bit depth, channel count.
///
/// Samples are native byte order, one sample per channel per frame. 16-bit
/// samples are signed; 8-bit samples are unsigned (offset 128), the
/// convention shared by WAV and the mobile platform APIs. Equality is exact
/// on all three fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Format {
    /// Frames per second.
    pub sample_rate: f64,
    /// Bits per sample: 8 or 16.
    pub bit_depth: u8,
    /// Channels per frame: 1 (mono) or 2 (stereo, interleaved).
    pub num_channels: u8,
}

impl Format {
    /// Create a format descriptor.
    pub const fn new(sample_rate: f64, bit_depth: u8, num_channels: u8) -> Self {
        Self {
            sample_rate,
            bit_depth,
            num_channels,
        }
    }

    /// Whether this format can be played at all: 8- or 16-bit, mono or
    /// stereo, positive sample rate. Backends may constrain this further.
    pub fn is_valid(&self) -> bool {
        (self.bit_depth == 8 || self.bit_depth == 16)
            && (self.num_channels == 1 || self.num_channels == 2)
            && self.sample_rate > 0.0
    }

    /// Bytes per frame (`bit_depth / 8 * num_channels`).
    pub fn frame_size(&self) -> usize {
        usize::from(self.bit_depth / 8) * usize::from(self.num_channels)
    }

    /// Byte length of a payload holding `num_frames` frames.
    pub fn byte_len(&self, num_frames: u32) -> usize {
        self.frame_size() * num_frames as usize
    }

    /// Wall-clock duration of `num_frames` frames at this rate.
    pub fn duration(&self, num_frames: u32) -> Duration {
        if self.sample_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(num_frames) / self.sample_rate)
    }
}
