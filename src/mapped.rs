//! Blocks that each own an anonymous mapping.
//!
//! New mappings are pushed at the head of the list, so the list carries no
//! address ordering. A block leaves the list only to be unmapped or migrated.

use std::ptr::NonNull;

use log::{trace, warn};

use crate::{
  block::{Block, HEADER_SIZE, Status},
  error::{AllocError, Region},
  list::BlockList,
  os::MemorySource,
};

pub struct Mapped {
  list: BlockList,
}

impl Mapped {
  pub const fn new() -> Self {
    Self {
      list: BlockList::new(),
    }
  }

  pub fn list(&self) -> &BlockList {
    &self.list
  }

  /// Maps `size + HEADER_SIZE` bytes, installs a `MAPPED` header at the start
  /// and links it at the head of the list.
  pub fn map_new<S: MemorySource>(
    &mut self,
    source: &mut S,
    size: usize,
  ) -> Result<NonNull<Block>, AllocError> {
    let len = size + HEADER_SIZE;

    unsafe {
      let base = source
        .map(len)
        .map_err(|e| AllocError::out_of_memory(Region::Mapping, len, e))?;
      let block = Block::install(base, size, Status::Mapped);
      self.list.push_front(block);

      trace!("mapped {:?} with {} usable bytes", block, size);
      Ok(block)
    }
  }

  /// Detaches `block` from the list and marks it `FREE`.
  ///
  /// # Safety
  ///
  /// `block` must be on the mapped list.
  pub unsafe fn unlink(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe {
      self.list.unlink(block);
      (*block.as_ptr()).status = Status::Free;
    }
  }

  /// Detaches `block` and returns its whole mapping to the OS.
  ///
  /// # Safety
  ///
  /// `block` must be on the mapped list; its payload is gone afterwards.
  pub unsafe fn release<S: MemorySource>(
    &mut self,
    source: &mut S,
    block: NonNull<Block>,
  ) {
    unsafe {
      let len = (*block.as_ptr()).size + HEADER_SIZE;
      self.unlink(block);

      if let Err(err) = source.unmap(block.cast(), len) {
        warn!("munmap of {:?} ({} bytes) failed: {}", block, len, err);
      } else {
        trace!("unmapped {:?} ({} bytes)", block, len);
      }
    }
  }

  /// Merge pass over the mapped list. Mappings are obtained independently, so
  /// this only ever finds something to do if two `FREE` headers happen to be
  /// adjacent in memory.
  pub fn coalesce_mapped(&mut self) -> usize {
    self.list.coalesce()
  }

  /// Unmaps every block still on the list.
  pub fn release_all<S: MemorySource>(
    &mut self,
    source: &mut S,
  ) {
    while let Some(block) = self.list.head() {
      unsafe { self.release(source, block) };
    }
  }
}

impl Default for Mapped {
  fn default() -> Self {
    Self::new()
  }
}
