use std::{fmt, io};

/// Which kernel service failed to provide memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
  Break,
  Mapping,
}

impl fmt::Display for Region {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Region::Break => f.write_str("program break"),
      Region::Mapping => f.write_str("anonymous mapping"),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
  #[error("out of memory: {region} could not provide {size} bytes")]
  OutOfMemory {
    region: Region,
    size: usize,
    #[source]
    source: io::Error,
  },
  #[error("requested {count} x {size} bytes overflows the address space")]
  SizeOverflow { count: usize, size: usize },
}

impl AllocError {
  pub(crate) fn out_of_memory(
    region: Region,
    size: usize,
    source: io::Error,
  ) -> Self {
    AllocError::OutOfMemory { region, size, source }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
  #[error("{name} = {value} is not a multiple of the 8-byte alignment")]
  Unaligned { name: &'static str, value: usize },
  #[error("mmap threshold {value} cannot hold a block, need at least {minimum}")]
  ThresholdTooSmall { value: usize, minimum: usize },
}
