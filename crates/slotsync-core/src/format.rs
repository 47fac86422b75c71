//! PCM format descriptor negotiated with the audio driver.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Whether samples are signed or unsigned integers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Signedness {
    #[default]
    Signed,
    Unsigned,
}

/// Linear PCM format an endpoint is bound to.
///
/// The synchronizers never look inside samples; the format only sizes the
/// slots and is handed to the driver when the endpoint is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct PcmFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Bits per sample (container size equals sample size).
    pub bits_per_sample: u16,
    /// Interleaved channel count.
    pub channels: u16,
    pub byte_order: ByteOrder,
    pub signedness: Signedness,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(48000, 16, 2)
    }
}

impl PcmFormat {
    /// Signed little-endian PCM with the given rate, sample size, and channels.
    pub const fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            byte_order: ByteOrder::Little,
            signedness: Signedness::Signed,
        }
    }

    /// 16 kHz mono, the usual voice-call capture format.
    pub const fn voice() -> Self {
        Self::new(16000, 16, 1)
    }

    pub const fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub const fn with_signedness(mut self, signedness: Signedness) -> Self {
        self.signedness = signedness;
        self
    }

    /// Bytes occupied by one sample of one channel.
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes occupied by one interleaved frame.
    pub const fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Frames per channel covered by `window`.
    pub fn samples_per_channel(&self, window: Duration) -> usize {
        (u128::from(self.sample_rate) * window.as_micros() / 1_000_000) as usize
    }

    /// Slot capacity for one `window` of audio:
    /// `samples_per_channel * channels * bytes_per_sample`.
    pub fn slot_capacity(&self, window: Duration) -> usize {
        self.samples_per_channel(window) * self.frame_size()
    }

    /// Check that the format describes whole, non-empty frames.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::UnsupportedFormat("sample rate is zero".into()));
        }
        if self.channels == 0 {
            return Err(Error::UnsupportedFormat("channel count is zero".into()));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(Error::UnsupportedFormat(format!(
                "{} bits per sample is not a whole number of bytes",
                self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Returns an error unless `other` describes the same format.
    pub fn ensure_matches(&self, other: &Self) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(Error::FormatMismatch {
                expected: self.to_string(),
                actual: other.to_string(),
            })
        }
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.byte_order {
            ByteOrder::Little => "LE",
            ByteOrder::Big => "BE",
        };
        let sign = match self.signedness {
            Signedness::Signed => 's',
            Signedness::Unsigned => 'u',
        };
        write!(
            f,
            "{}Hz {}{} {} ch {}",
            self.sample_rate, sign, self.bits_per_sample, self.channels, order
        )
    }
}
