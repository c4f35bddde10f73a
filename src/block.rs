use std::{mem, ptr::NonNull};

use crate::align::ALIGNMENT;

/// Lifecycle state of a block header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// Reusable capacity, only ever found on the heap list.
  Free,
  /// In use, resident in the heap arena.
  Allocated,
  /// In use, backed by its own mapping.
  Mapped,
}

/// Header embedded immediately before every payload.
///
/// Internal to the crate; callers see blocks through
/// [`BlockInfo`](crate::BlockInfo) only.
///
/// ```compile_fail
/// use osmem::Block;
/// ```
#[repr(C)]
pub struct Block {
  /// Usable payload bytes, excluding the header.
  pub size: usize,
  pub status: Status,
  pub next: Option<NonNull<Block>>,
  pub prev: Option<NonNull<Block>>,
}

/// Size of the block header. The only offset used to move between a header
/// and its payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

impl Block {
  pub fn new(
    size: usize,
    status: Status,
  ) -> Self {
    Self {
      size,
      status,
      next: None,
      prev: None,
    }
  }

  /// Writes a fresh, unlinked header at `addr`.
  ///
  /// # Safety
  ///
  /// `addr` must be 8-byte aligned and valid for writes of `HEADER_SIZE`
  /// bytes.
  pub unsafe fn install(
    addr: NonNull<u8>,
    size: usize,
    status: Status,
  ) -> NonNull<Block> {
    let block = addr.cast::<Block>();
    unsafe { block.write(Block::new(size, status)) };
    block
  }

  /// Payload pointer for `block`.
  pub(crate) fn payload(block: NonNull<Block>) -> NonNull<u8> {
    // SAFETY: every header is followed by its payload in the same region.
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Recovers the header from a payload pointer handed out by this crate.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`Block::payload`].
  pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Block> {
    unsafe { payload.sub(HEADER_SIZE).cast::<Block>() }
  }

  /// First byte past the payload of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header.
  pub unsafe fn end(block: NonNull<Block>) -> *mut u8 {
    unsafe {
      block
        .cast::<u8>()
        .as_ptr()
        .wrapping_add(HEADER_SIZE + (*block.as_ptr()).size)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_payload_roundtrip() {
    let mut backing = [0u64; 16];
    let addr = NonNull::new(backing.as_mut_ptr() as *mut u8).unwrap();

    unsafe {
      let block = Block::install(addr, 64, Status::Allocated);
      let payload = Block::payload(block);

      assert_eq!(payload.as_ptr() as usize - addr.as_ptr() as usize, HEADER_SIZE);
      assert_eq!(Block::from_payload(payload), block);
      assert_eq!(Block::end(block) as usize, payload.as_ptr() as usize + 64);
      assert_eq!((*block.as_ptr()).status, Status::Allocated);
      assert!((*block.as_ptr()).next.is_none());
    }
  }

  #[test]
  fn test_header_size_is_aligned() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    assert!(HEADER_SIZE >= 3 * mem::size_of::<usize>());
  }
}
