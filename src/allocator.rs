use std::ptr::{self, NonNull};

use log::{debug, warn};

use crate::{
  align::checked_align,
  block::{Block, HEADER_SIZE, Status},
  config::Config,
  error::{AllocError, ConfigError},
  heap::Heap,
  mapped::Mapped,
  os::{MemorySource, System},
};

/// Snapshot of one block, as reported by [`Allocator::heap_blocks`] and
/// [`Allocator::mapped_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: NonNull<u8>,
  pub size: usize,
  pub status: Status,
}

impl BlockInfo {
  fn of(block: NonNull<Block>) -> Self {
    let header = unsafe { block.as_ref() };
    Self {
      payload: Block::payload(block),
      size: header.size,
      status: header.status,
    }
  }
}

/// A malloc-style allocator over a break-backed heap and individual mappings.
///
/// Requests below the mmap threshold are carved out of the heap with a
/// first-fit search, splitting and eager coalescing; larger requests, and
/// small ones the heap cannot grow for, get a mapping of their own.
///
/// Not thread-safe: every operation needs `&mut self`. See
/// [`global`](crate::global) for the process-wide, mutex-guarded instance.
pub struct Allocator<S: MemorySource = System> {
  source: S,
  config: Config,
  heap: Heap,
  mapped: Mapped,
}

impl Allocator<System> {
  /// An allocator driving the real program break and `mmap`.
  pub fn system() -> Self {
    Self::new(System)
  }
}

impl<S: MemorySource> Allocator<S> {
  pub fn new(source: S) -> Self {
    Self {
      source,
      config: Config::default(),
      heap: Heap::new(),
      mapped: Mapped::new(),
    }
  }

  pub fn with_config(
    source: S,
    config: Config,
  ) -> Result<Self, ConfigError> {
    config.validate()?;

    let mut allocator = Self::new(source);
    allocator.config = config;
    Ok(allocator)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Aligned request size, refusing anything a header could not be added to.
  fn request_size(
    count: usize,
    size: usize,
  ) -> Result<usize, AllocError> {
    count
      .checked_mul(size)
      .and_then(checked_align)
      .filter(|&aligned| aligned <= isize::MAX as usize - HEADER_SIZE)
      .ok_or(AllocError::SizeOverflow { count, size })
  }

  /// Maps a dedicated block of `size` bytes.
  fn map_block(
    &mut self,
    size: usize,
  ) -> Result<NonNull<Block>, AllocError> {
    let block = self.mapped.map_new(&mut self.source, size)?;
    self.mapped.coalesce_mapped();
    Ok(block)
  }

  /// Routes an aligned request: the heap for small sizes, falling back to a
  /// mapping when the heap cannot grow; a mapping for everything else.
  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<NonNull<Block>, AllocError> {
    if self.config.is_small(size) {
      match self
        .heap
        .allocate(&mut self.source, size, self.config.mmap_threshold)
      {
        Ok(block) => {
          debug!("allocate({}): heap block {:?}", size, block);
          return Ok(block);
        }
        Err(err) => warn!("allocate({}): heap unavailable ({}), mapping instead", size, err),
      }
    }

    let block = self.map_block(size)?;
    debug!("allocate({}): mapped block {:?}", size, block);
    Ok(block)
  }

  /// Allocates at least `size` bytes, 8-byte aligned. Returns `Ok(None)` for
  /// a zero-byte request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if size == 0 {
      return Ok(None);
    }

    let size = Self::request_size(1, size)?;
    let block = self.allocate_block(size)?;
    Ok(Some(Block::payload(block)))
  }

  /// Allocates `count * size` zeroed bytes. Requests at or above the
  /// zero-allocation threshold always get their own mapping.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if count == 0 || size == 0 {
      return Ok(None);
    }

    let total = Self::request_size(count, size)?;
    let block = if total < self.config.calloc_threshold {
      self.allocate_block(total)?
    } else {
      debug!("zero_allocate({}): above calloc threshold, mapping", total);
      self.map_block(total)?
    };

    let payload = Block::payload(block);
    unsafe { payload.as_ptr().write_bytes(0, total) };
    Ok(Some(payload))
  }

  /// Releases a block. Null is ignored, and so is a block that is already
  /// free.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    unsafe {
      let block = Block::from_payload(payload);

      if (*block.as_ptr()).status == Status::Free {
        warn!("release({:?}): block already free", payload);
        return;
      }

      if self.heap.member(block) {
        self.heap.release(block);
        debug!("release({:?}): heap block freed", payload);
      } else {
        self.mapped.release(&mut self.source, block);
        debug!("release({:?}): mapping returned", payload);
      }
    }
  }

  /// Resizes a block, moving it between the heap and a mapping when the new
  /// size crosses the mmap threshold.
  ///
  /// A zero `size` releases `ptr` and returns `Ok(None)`; a null `ptr`
  /// allocates. The first `min(old, new)` bytes are preserved. On error the
  /// original block is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if size == 0 {
      unsafe { self.release(ptr) };
      return Ok(None);
    }

    let Some(payload) = NonNull::new(ptr) else {
      return self.allocate(size);
    };

    let size = Self::request_size(1, size)?;

    unsafe {
      let block = Block::from_payload(payload);
      let old_size = (*block.as_ptr()).size;

      if (*block.as_ptr()).status == Status::Free {
        warn!("resize({:?}): block already free", payload);
        return Ok(None);
      }

      let in_heap = self.heap.member(block);

      let target = match (self.config.is_small(size), in_heap) {
        (true, true) => {
          if old_size >= size {
            self.heap.split(block, size);
            self.heap.coalesce();
            return Ok(Some(payload));
          }
          if self.heap.extend_in_place(block, size) {
            debug!("resize({:?}, {}): grown into free successor", payload, size);
            return Ok(Some(payload));
          }

          let target = self.allocate_block(size)?;
          self.copy(block, target, size);
          self.heap.release(block);
          target
        }
        (true, false) => {
          let target = match self
            .heap
            .allocate(&mut self.source, size, self.config.mmap_threshold)
          {
            Ok(target) => target,
            Err(err) if old_size >= size => {
              warn!("resize({:?}, {}): heap unavailable ({}), keeping mapping", payload, size, err);
              return Ok(Some(payload));
            }
            Err(err) => {
              warn!("resize({:?}, {}): heap unavailable ({}), remapping", payload, size, err);
              self.map_block(size)?
            }
          };

          self.copy(block, target, size);
          self.mapped.release(&mut self.source, block);
          debug!("resize({:?}, {}): migrated mapping into the heap", payload, size);
          target
        }
        (false, true) => {
          let target = self.map_block(size)?;
          self.copy(block, target, size);
          self.heap.vacate(block);
          debug!("resize({:?}, {}): migrated heap block to a mapping", payload, size);
          target
        }
        (false, false) => {
          if old_size >= size {
            return Ok(Some(payload));
          }

          let target = self.map_block(size)?;
          self.copy(block, target, size);
          self.mapped.release(&mut self.source, block);
          target
        }
      };

      Ok(Some(Block::payload(target)))
    }
  }

  /// Copies `min(from.size, size)` payload bytes from `from` into `to`.
  unsafe fn copy(
    &self,
    from: NonNull<Block>,
    to: NonNull<Block>,
    size: usize,
  ) {
    unsafe {
      let len = (*from.as_ptr()).size.min(size);
      ptr::copy_nonoverlapping(
        Block::payload(from).as_ptr(),
        Block::payload(to).as_ptr(),
        len,
      );
    }
  }

  /// Capacity of the block behind `ptr`, `None` for null or a released block.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> Option<usize> {
    let payload = NonNull::new(ptr)?;
    let header = unsafe { Block::from_payload(payload).as_ref() };
    (header.status != Status::Free).then_some(header.size)
  }

  /// Heap blocks in address order.
  pub fn heap_blocks(&self) -> Vec<BlockInfo> {
    self.heap.list().iter().map(BlockInfo::of).collect()
  }

  /// Mapped blocks, most recent first.
  pub fn mapped_blocks(&self) -> Vec<BlockInfo> {
    self.mapped.list().iter().map(BlockInfo::of).collect()
  }
}

impl<S: MemorySource> Drop for Allocator<S> {
  fn drop(&mut self) {
    self.mapped.release_all(&mut self.source);
  }
}
