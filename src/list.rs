use std::ptr::NonNull;

use log::trace;

use crate::block::{Block, HEADER_SIZE, Status};

/// Intrusive doubly-linked list of block headers.
///
/// The list never owns the memory its headers live in. Every header reachable
/// from `head` is live for as long as it stays linked, which is what makes the
/// read-only traversals below safe to call.
pub struct BlockList {
  head: Option<NonNull<Block>>,
}

pub struct Iter {
  current: Option<NonNull<Block>>,
}

impl Iterator for Iter {
  type Item = NonNull<Block>;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.current?;
    self.current = unsafe { (*block.as_ptr()).next };
    Some(block)
  }
}

impl BlockList {
  pub const fn new() -> Self {
    Self { head: None }
  }

  pub fn head(&self) -> Option<NonNull<Block>> {
    self.head
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  pub fn iter(&self) -> Iter {
    Iter { current: self.head }
  }

  pub fn last(&self) -> Option<NonNull<Block>> {
    self.iter().last()
  }

  pub fn contains(
    &self,
    block: NonNull<Block>,
  ) -> bool {
    self.iter().any(|b| b == block)
  }

  /// First-fit search: the first `FREE` block with at least `size` bytes.
  pub fn find_free(
    &self,
    size: usize,
  ) -> Option<NonNull<Block>> {
    self.iter().find(|b| {
      let block = unsafe { b.as_ref() };
      block.status == Status::Free && block.size >= size
    })
  }

  /// # Safety
  ///
  /// `block` must be a live header that is not linked into any list.
  pub unsafe fn push_front(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe {
      (*block.as_ptr()).prev = None;
      (*block.as_ptr()).next = self.head;
      if let Some(old_head) = self.head {
        (*old_head.as_ptr()).prev = Some(block);
      }
    }
    self.head = Some(block);
  }

  /// # Safety
  ///
  /// `block` must be a live header that is not linked into any list.
  pub unsafe fn push_back(
    &mut self,
    block: NonNull<Block>,
  ) {
    match self.last() {
      Some(last) => unsafe { self.insert_after(last, block) },
      None => unsafe { self.push_front(block) },
    }
  }

  /// # Safety
  ///
  /// `at` must be linked into this list; `block` must be live and unlinked.
  pub unsafe fn insert_after(
    &mut self,
    at: NonNull<Block>,
    block: NonNull<Block>,
  ) {
    unsafe {
      let next = (*at.as_ptr()).next;
      (*block.as_ptr()).prev = Some(at);
      (*block.as_ptr()).next = next;
      if let Some(next) = next {
        (*next.as_ptr()).prev = Some(block);
      }
      (*at.as_ptr()).next = Some(block);
    }
  }

  /// Detaches `block`, fixing up the head and its neighbours, and clears its
  /// links.
  ///
  /// # Safety
  ///
  /// `block` must be linked into this list.
  pub unsafe fn unlink(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe {
      let prev = (*block.as_ptr()).prev;
      let next = (*block.as_ptr()).next;

      match prev {
        Some(prev) => (*prev.as_ptr()).next = next,
        None => self.head = next,
      }
      if let Some(next) = next {
        (*next.as_ptr()).prev = prev;
      }

      (*block.as_ptr()).prev = None;
      (*block.as_ptr()).next = None;
    }
  }

  /// Merges the successor of `block` into it when the successor is `FREE` and
  /// starts exactly where `block` ends. Returns whether a merge happened.
  ///
  /// # Safety
  ///
  /// `block` must be linked into this list.
  pub unsafe fn absorb_next(
    &mut self,
    block: NonNull<Block>,
  ) -> bool {
    unsafe {
      let Some(next) = (*block.as_ptr()).next else {
        return false;
      };
      if (*next.as_ptr()).status != Status::Free
        || Block::end(block) != next.cast::<u8>().as_ptr()
      {
        return false;
      }

      let absorbed = (*next.as_ptr()).size + HEADER_SIZE;
      self.unlink(next);
      (*block.as_ptr()).size += absorbed;

      trace!(
        "absorbed {:?} into {:?}, size now {}",
        next,
        block,
        (*block.as_ptr()).size
      );
      true
    }
  }

  /// Merges every maximal run of adjacent `FREE` blocks into its first block.
  /// Returns the number of headers reclaimed. Running it again right after is
  /// a no-op.
  pub fn coalesce(&mut self) -> usize {
    let mut merged = 0;
    let mut current = self.head;

    while let Some(block) = current {
      unsafe {
        if (*block.as_ptr()).status == Status::Free {
          while self.absorb_next(block) {
            merged += 1;
          }
        }
        current = (*block.as_ptr()).next;
      }
    }

    merged
  }
}

impl Default for BlockList {
  fn default() -> Self {
    Self::new()
  }
}
