//! The break-backed arena: region management plus the first-fit free list
//! that lives inside it.
//!
//! ```text
//!   heap_head                                                      break
//!   │                                                                  │
//!   ▼                                                                  ▼
//!   ┌────────┬──────────┬────────┬──────┬────────┬────────────────────┐
//!   │ header │ ALLOC 96 │ header │ FREE │ header │ ALLOC 4000         │
//!   └────────┴──────────┴────────┴──────┴────────┴────────────────────┘
//!        └──── next ──────►  └──── next ───►
//! ```
//!
//! Blocks are linked in ascending address order because the arena only ever
//! grows at its tail. Heap memory is never handed back to the OS; released
//! blocks become `FREE` and are merged with their free neighbours.

use std::ptr::NonNull;

use log::{trace, warn};

use crate::{
  align,
  block::{Block, HEADER_SIZE, Status},
  error::{AllocError, Region},
  list::BlockList,
  os::MemorySource,
};

pub struct Heap {
  list: BlockList,
}

/// Moves the break by `len` bytes plus whatever padding brings the start of
/// the new range onto the alignment boundary. Returns the aligned start.
unsafe fn claim<S: MemorySource>(
  source: &mut S,
  len: usize,
) -> Result<NonNull<u8>, AllocError> {
  let oom = |err| AllocError::out_of_memory(Region::Break, len, err);

  unsafe {
    let current = source.extend_break(0).map_err(oom)?;
    let addr = current.as_ptr() as usize;
    let pad = align!(addr) - addr;

    let previous = source.extend_break(pad + len).map_err(oom)?;
    debug_assert_eq!(previous, current);

    Ok(previous.add(pad))
  }
}

impl Heap {
  pub const fn new() -> Self {
    Self {
      list: BlockList::new(),
    }
  }

  pub fn is_initialized(&self) -> bool {
    !self.list.is_empty()
  }

  pub fn list(&self) -> &BlockList {
    &self.list
  }

  /// Lazily creates the arena: one break extension of `reserve` bytes holding
  /// a single `FREE` block. On failure the heap stays uninitialized.
  pub fn ensure<S: MemorySource>(
    &mut self,
    source: &mut S,
    reserve: usize,
  ) -> Result<(), AllocError> {
    if self.is_initialized() {
      return Ok(());
    }

    unsafe {
      let start = claim(source, reserve)?;
      let block = Block::install(start, reserve - HEADER_SIZE, Status::Free);
      self.list.push_front(block);

      trace!("heap initialized at {:?} with {} bytes", start, reserve);
    }

    Ok(())
  }

  /// Tail of the heap list, `None` while the heap is uninitialized.
  pub fn last_block(&self) -> Option<NonNull<Block>> {
    self.list.last()
  }

  /// Makes room for a `size`-byte block at the tail of the arena.
  ///
  /// A `FREE` tail that is too small is stretched by exactly the shortfall;
  /// otherwise a new `FREE` block of exactly `size` bytes is appended.
  pub fn grow<S: MemorySource>(
    &mut self,
    source: &mut S,
    size: usize,
  ) -> Result<(), AllocError> {
    unsafe {
      if let Some(last) = self.last_block() {
        let tail = last.as_ptr();

        if (*tail).status == Status::Free && (*tail).size < size {
          let shortfall = size - (*tail).size;
          let current = source
            .extend_break(0)
            .map_err(|e| AllocError::out_of_memory(Region::Break, shortfall, e))?;

          if current.as_ptr() == Block::end(last) {
            source
              .extend_break(shortfall)
              .map_err(|e| AllocError::out_of_memory(Region::Break, shortfall, e))?;
            (*tail).size += shortfall;

            trace!("stretched free tail {:?} by {} to {}", last, shortfall, (*tail).size);
            return Ok(());
          }

          warn!("program break moved past the heap tail, appending a detached block");
        }
      }

      let start = claim(source, size + HEADER_SIZE)?;
      let block = Block::install(start, size, Status::Free);
      self.list.push_back(block);

      trace!("appended free block {:?} of {} bytes", block, size);
    }

    Ok(())
  }

  pub fn find_free(
    &self,
    size: usize,
  ) -> Option<NonNull<Block>> {
    self.list.find_free(size)
  }

  /// Shrinks `block` to `size`, carving the remainder into a new `FREE` block
  /// when it can hold a header plus at least one granule. Smaller remainders
  /// stay with `block`.
  ///
  /// # Safety
  ///
  /// `block` must be on the heap list.
  pub unsafe fn split(
    &mut self,
    block: NonNull<Block>,
    size: usize,
  ) {
    unsafe {
      let remaining = (*block.as_ptr()).size.saturating_sub(size);
      if remaining <= HEADER_SIZE {
        return;
      }

      let rest = Block::install(
        block.cast::<u8>().add(HEADER_SIZE + size),
        remaining - HEADER_SIZE,
        Status::Free,
      );
      (*block.as_ptr()).size = size;
      self.list.insert_after(block, rest);

      trace!("split {:?} at {}, remainder {:?} of {}", block, size, rest, remaining - HEADER_SIZE);
    }
  }

  pub fn coalesce(&mut self) -> usize {
    self.list.coalesce()
  }

  /// Whether `block` is reachable from the heap head.
  pub fn member(
    &self,
    block: NonNull<Block>,
  ) -> bool {
    self.list.contains(block)
  }

  /// Hands out a block of `size` bytes: first fit, growing the arena once on
  /// a miss. The arena is created on first use with `reserve` bytes.
  pub fn allocate<S: MemorySource>(
    &mut self,
    source: &mut S,
    size: usize,
    reserve: usize,
  ) -> Result<NonNull<Block>, AllocError> {
    self.ensure(source, reserve)?;

    let block = match self.find_free(size) {
      Some(block) => block,
      None => {
        self.grow(source, size)?;
        self.find_free(size).ok_or_else(|| {
          AllocError::out_of_memory(Region::Break, size, std::io::ErrorKind::OutOfMemory.into())
        })?
      }
    };

    unsafe {
      (*block.as_ptr()).status = Status::Allocated;
      self.split(block, size);
    }
    self.coalesce();

    Ok(block)
  }

  /// Marks `block` `FREE` and merges it with free neighbours.
  ///
  /// # Safety
  ///
  /// `block` must be on the heap list.
  pub unsafe fn release(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe { (*block.as_ptr()).status = Status::Free };
    self.coalesce();
  }

  /// Grows `block` to `size` by swallowing a free successor, splitting off
  /// whatever is left over. Returns `false` and leaves the list untouched when
  /// the successor cannot cover the request.
  ///
  /// # Safety
  ///
  /// `block` must be on the heap list.
  pub unsafe fn extend_in_place(
    &mut self,
    block: NonNull<Block>,
    size: usize,
  ) -> bool {
    unsafe {
      let Some(next) = (*block.as_ptr()).next else {
        return false;
      };
      let next = next.as_ptr();
      if (*next).status != Status::Free
        || (*block.as_ptr()).size + (*next).size + HEADER_SIZE < size
      {
        return false;
      }

      if !self.list.absorb_next(block) {
        return false;
      }
      self.split(block, size);
    }
    self.coalesce();
    true
  }

  /// Gives up `block`'s space after its contents have moved out of the heap.
  ///
  /// The block is unlinked and its bytes are folded into the predecessor when
  /// that predecessor ends right where `block` starts; otherwise the block
  /// stays in place as `FREE`.
  ///
  /// # Safety
  ///
  /// `block` must be on the heap list and its payload no longer needed.
  pub unsafe fn vacate(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe {
      match (*block.as_ptr()).prev {
        Some(prev) if Block::end(prev) == block.cast::<u8>().as_ptr() => {
          let freed = (*block.as_ptr()).size + HEADER_SIZE;
          self.list.unlink(block);
          (*block.as_ptr()).status = Status::Free;
          (*prev.as_ptr()).size += freed;

          trace!("folded {:?} into predecessor {:?}", block, prev);
        }
        _ => (*block.as_ptr()).status = Status::Free,
      }
    }
    self.coalesce();
  }

  /// Panics unless the list is acyclic, address-ordered, non-overlapping and
  /// free of adjacent `FREE` pairs.
  #[cfg(test)]
  pub(crate) fn check_invariants(&self) {
    let mut previous: Option<NonNull<Block>> = None;

    for (steps, block) in self.list.iter().enumerate() {
      assert!(steps < 1 << 20, "heap list is cyclic");

      unsafe {
        let header = block.as_ref();
        assert_eq!(header.size % crate::align::ALIGNMENT, 0);
        assert_ne!(header.status, Status::Mapped);
        assert_eq!(header.prev, previous);

        if let Some(prev) = previous {
          assert!(Block::end(prev) <= block.cast::<u8>().as_ptr(), "blocks overlap");
          if Block::end(prev) == block.cast::<u8>().as_ptr() {
            assert!(
              !(prev.as_ref().status == Status::Free && header.status == Status::Free),
              "adjacent free blocks left unmerged"
            );
          }
        }
      }

      previous = Some(block);
    }
  }
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::os::ReservedBreak;

  const RESERVE: usize = 4096;

  fn layout(heap: &Heap) -> Vec<(usize, Status)> {
    heap
      .list()
      .iter()
      .map(|b| unsafe { (b.as_ref().size, b.as_ref().status) })
      .collect()
  }

  #[test]
  fn test_ensure_installs_one_free_block() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    assert!(heap.last_block().is_none());
    heap.ensure(&mut source, RESERVE).unwrap();
    heap.ensure(&mut source, RESERVE).unwrap();

    assert_eq!(layout(&heap), vec![(RESERVE - HEADER_SIZE, Status::Free)]);
    assert_eq!(source.break_offset(), RESERVE);
    assert_eq!(heap.last_block(), heap.list().head());
  }

  #[test]
  fn test_ensure_failure_leaves_heap_uninitialized() {
    let mut source = ReservedBreak::new(RESERVE / 2).unwrap();
    let mut heap = Heap::new();

    let err = heap.ensure(&mut source, RESERVE).unwrap_err();
    assert!(matches!(err, AllocError::OutOfMemory { region: Region::Break, .. }));
    assert!(!heap.is_initialized());
  }

  #[test]
  fn test_allocate_splits_and_reuses() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    let a = heap.allocate(&mut source, 96, RESERVE).unwrap();
    let b = heap.allocate(&mut source, 200, RESERVE).unwrap();
    heap.check_invariants();

    assert_eq!(
      layout(&heap),
      vec![
        (96, Status::Allocated),
        (200, Status::Allocated),
        (RESERVE - 4 * HEADER_SIZE - 96 - 200 + HEADER_SIZE, Status::Free),
      ]
    );
    assert_eq!(b.as_ptr() as usize, unsafe { Block::end(a) } as usize);

    unsafe { heap.release(a) };
    let c = heap.allocate(&mut source, 88, RESERVE).unwrap();
    assert_eq!(c, a);
    assert_eq!(source.break_offset(), RESERVE);
    heap.check_invariants();
  }

  #[test]
  fn test_split_keeps_small_remainders() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();
    heap.ensure(&mut source, RESERVE).unwrap();
    let block = heap.list().head().unwrap();

    let whole = RESERVE - HEADER_SIZE;
    unsafe {
      heap.split(block, whole - HEADER_SIZE);
      assert_eq!(layout(&heap), vec![(whole, Status::Free)]);

      heap.split(block, whole - HEADER_SIZE - 8);
      assert_eq!(
        layout(&heap),
        vec![(whole - HEADER_SIZE - 8, Status::Free), (8, Status::Free)]
      );
    }
  }

  #[test]
  fn test_grow_stretches_free_tail() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    heap.allocate(&mut source, 1024, RESERVE).unwrap();
    let tail_size = RESERVE - 2 * HEADER_SIZE - 1024;

    let big = heap.allocate(&mut source, 8192, RESERVE).unwrap();
    assert_eq!(unsafe { big.as_ref().size }, 8192);
    assert_eq!(source.break_offset(), RESERVE + 8192 - tail_size);
    assert_eq!(heap.list().iter().count(), 2);
    heap.check_invariants();
  }

  #[test]
  fn test_grow_appends_after_allocated_tail() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    heap.allocate(&mut source, RESERVE - HEADER_SIZE, RESERVE).unwrap();
    let before = source.break_offset();

    let block = heap.allocate(&mut source, 512, RESERVE).unwrap();
    assert_eq!(source.break_offset(), before + 512 + HEADER_SIZE);
    assert_eq!(heap.last_block(), Some(block));
    heap.check_invariants();
  }

  #[test]
  fn test_extend_in_place_absorbs_free_successor() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    let a = heap.allocate(&mut source, 64, RESERVE).unwrap();
    let b = heap.allocate(&mut source, 64, RESERVE).unwrap();
    let _c = heap.allocate(&mut source, 64, RESERVE).unwrap();

    unsafe {
      assert!(!heap.extend_in_place(a, 128));

      heap.release(b);
      assert!(heap.extend_in_place(a, 128));
      assert_eq!(a.as_ref().size, 128 + HEADER_SIZE);
      assert!(!heap.member(b));
    }
    heap.check_invariants();
  }

  #[test]
  fn test_vacate_folds_into_predecessor() {
    let mut source = ReservedBreak::new(1 << 20).unwrap();
    let mut heap = Heap::new();

    let a = heap.allocate(&mut source, 64, RESERVE).unwrap();
    let b = heap.allocate(&mut source, 128, RESERVE).unwrap();

    unsafe {
      heap.vacate(b);
      assert!(!heap.member(b));
      assert_eq!(a.as_ref().size, 64 + 128 + HEADER_SIZE);

      heap.vacate(a);
      assert!(heap.member(a));
      assert_eq!(a.as_ref().status, Status::Free);
    }
    assert_eq!(heap.list().iter().count(), 1);
    heap.check_invariants();
  }
}
