use crate::{
  align::ALIGNMENT,
  block::HEADER_SIZE,
  error::ConfigError,
};

/// Requests whose aligned size reaches `MMAP_THRESHOLD - HEADER_SIZE` are
/// served by their own mapping. Also the size of the first heap reservation.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Zero-allocations of at least this many (aligned) bytes bypass the heap.
pub const CALLOC_THRESHOLD: usize = 4096;

/// The zero-allocation threshold some builds of the original allocator used.
/// It does not match the page size; kept so that routing can be reproduced
/// through [`Config::calloc_threshold`].
pub const LEGACY_CALLOC_THRESHOLD: usize = 4080;

/// Size-routing policy of an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  pub mmap_threshold: usize,
  pub calloc_threshold: usize,
}

impl Config {
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("mmap_threshold", self.mmap_threshold),
      ("calloc_threshold", self.calloc_threshold),
    ] {
      if value % ALIGNMENT != 0 {
        return Err(ConfigError::Unaligned { name, value });
      }
    }

    if self.mmap_threshold <= 2 * HEADER_SIZE {
      return Err(ConfigError::ThresholdTooSmall {
        value: self.mmap_threshold,
        minimum: 2 * HEADER_SIZE + ALIGNMENT,
      });
    }

    Ok(())
  }

  /// Whether an aligned request belongs on the heap.
  pub fn is_small(
    &self,
    aligned: usize,
  ) -> bool {
    aligned < self.mmap_threshold - HEADER_SIZE
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      mmap_threshold: MMAP_THRESHOLD,
      calloc_threshold: CALLOC_THRESHOLD,
    }
  }
}
