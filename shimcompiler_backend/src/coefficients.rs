//! Flat storage for the per-sample drive values of every channel.
//!
//! The store is sample-major: offset `channel_count × sample + channel` holds the value
//! `channel` is driven to on `sample`. Internally this is an `(samples, channels)` array so that
//! one row is exactly what a single trigger writes out.
//!
//! The payload arrives from the host as raw IEEE-754 `f32` words in the same order
//! ([`CoefficientStore::from_bytes`]). The reverse direction, [`CoefficientStore::to_bytes`], is
//! what a host uses to produce it.

use ndarray::{Array2, ArrayView1};
use serde::Deserialize;

use crate::error::TransferError;

/// Byte order of the coefficient payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    fn decode(self, word: [u8; 4]) -> f32 {
        match self {
            Endianness::Little => f32::from_le_bytes(word),
            Endianness::Big => f32::from_be_bytes(word),
        }
    }

    fn encode(self, value: f32) -> [u8; 4] {
        match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoefficientStore {
    values: Array2<f32>,
}

impl CoefficientStore {
    /// Builds a store from values in sample-major order.
    ///
    /// # Errors
    /// [`TransferError::LengthMismatch`] unless `values.len() == channel_count × total_samples`.
    pub fn from_values(
        channel_count: usize,
        total_samples: usize,
        values: Vec<f32>,
    ) -> Result<Self, TransferError> {
        let expected = channel_count * total_samples;
        if values.len() != expected {
            return Err(TransferError::LengthMismatch {
                expected,
                found: values.len(),
            });
        }
        let found = values.len();
        let values = Array2::from_shape_vec((total_samples, channel_count), values)
            .map_err(|_| TransferError::LengthMismatch { expected, found })?;
        Ok(Self { values })
    }

    /// Decodes a raw payload of `channel_count × total_samples` `f32` words.
    ///
    /// # Errors
    /// [`TransferError::Incomplete`] unless the payload holds exactly the expected number of bytes.
    pub fn from_bytes(
        bytes: &[u8],
        channel_count: usize,
        total_samples: usize,
        endianness: Endianness,
    ) -> Result<Self, TransferError> {
        let expected = channel_count * total_samples * 4;
        if bytes.len() != expected {
            return Err(TransferError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
        let values = bytes
            .chunks_exact(4)
            .map(|w| endianness.decode([w[0], w[1], w[2], w[3]]))
            .collect();
        Self::from_values(channel_count, total_samples, values)
    }

    /// Encodes the store in payload order.
    pub fn to_bytes(&self, endianness: Endianness) -> Vec<u8> {
        self.values
            .iter()
            .flat_map(|&v| endianness.encode(v))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.values.ncols()
    }

    pub fn total_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at flat `offset`, or `None` past the end.
    pub fn get(&self, offset: usize) -> Option<f32> {
        let channels = self.channel_count();
        if channels == 0 {
            return None;
        }
        self.values
            .get((offset / channels, offset % channels))
            .copied()
    }

    /// Value `channel` is driven to on `sample`.
    ///
    /// # Panics
    /// Panics if either index is out of range.
    pub fn value(&self, channel: usize, sample: usize) -> f32 {
        self.values[[sample, channel]]
    }

    /// Every channel's value for `sample`, in channel order.
    pub fn sample(&self, sample: usize) -> ArrayView1<'_, f32> {
        self.values.row(sample)
    }

    /// `channel`'s values over all samples.
    pub fn channel(&self, channel: usize) -> ArrayView1<'_, f32> {
        self.values.column(channel)
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.values
    }
}
