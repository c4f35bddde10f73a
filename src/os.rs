//! The operating-system boundary: break growth and anonymous mappings.

use std::{
  io,
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t};
use log::warn;

/// Where an allocator gets its raw memory from.
///
/// Mirrors the three kernel services the allocator consumes: moving the
/// program break, creating an anonymous private read/write mapping, and
/// releasing such a mapping.
pub trait MemorySource {
  /// Extends the break by `increment` bytes and returns the previous break.
  /// An increment of zero only queries the current break.
  ///
  /// # Safety
  ///
  /// The returned range `[previous, previous + increment)` is handed over to
  /// the caller; nobody else may be using it.
  unsafe fn extend_break(
    &mut self,
    increment: usize,
  ) -> io::Result<NonNull<u8>>;

  /// Maps `len` fresh bytes of anonymous read/write memory.
  ///
  /// # Safety
  ///
  /// Callers own the returned mapping until they pass it to [`unmap`].
  ///
  /// [`unmap`]: MemorySource::unmap
  unsafe fn map(
    &mut self,
    len: usize,
  ) -> io::Result<NonNull<u8>>;

  /// Returns a mapping obtained from [`map`] with its exact length.
  ///
  /// # Safety
  ///
  /// `base` and `len` must describe a live mapping from this source; the
  /// memory must not be touched afterwards.
  ///
  /// [`map`]: MemorySource::map
  unsafe fn unmap(
    &mut self,
    base: NonNull<u8>,
    len: usize,
  ) -> io::Result<()>;
}

unsafe fn os_mmap(len: usize) -> io::Result<NonNull<u8>> {
  let addr = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if addr == libc::MAP_FAILED {
    return Err(io::Error::last_os_error());
  }

  NonNull::new(addr as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

unsafe fn os_munmap(
  base: NonNull<u8>,
  len: usize,
) -> io::Result<()> {
  if unsafe { libc::munmap(base.as_ptr().cast(), len) } == -1 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// The real process: `sbrk(2)` for the break, `mmap(2)`/`munmap(2)` for
/// mappings.
///
/// Only one allocator per process should drive the real break.
#[derive(Debug, Default, Clone, Copy)]
pub struct System;

impl MemorySource for System {
  unsafe fn extend_break(
    &mut self,
    increment: usize,
  ) -> io::Result<NonNull<u8>> {
    let increment =
      intptr_t::try_from(increment).map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;

    let previous = unsafe { libc::sbrk(increment) };

    if previous == usize::MAX as *mut c_void {
      return Err(io::Error::last_os_error());
    }

    NonNull::new(previous as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
  }

  unsafe fn map(
    &mut self,
    len: usize,
  ) -> io::Result<NonNull<u8>> {
    unsafe { os_mmap(len) }
  }

  unsafe fn unmap(
    &mut self,
    base: NonNull<u8>,
    len: usize,
  ) -> io::Result<()> {
    unsafe { os_munmap(base, len) }
  }
}

/// A simulated program break living inside one reserved anonymous mapping.
///
/// The break starts at the beginning of the reservation and can grow up to
/// `capacity` bytes; growth past that fails with
/// [`io::ErrorKind::OutOfMemory`], the way `sbrk` fails when the data segment
/// limit is hit. Mappings go straight to the OS and are counted.
///
/// Each instance is fully independent of the process break, so any number of
/// allocators can coexist in one process.
#[derive(Debug)]
pub struct ReservedBreak {
  base: NonNull<u8>,
  capacity: usize,
  offset: usize,
  live_mappings: usize,
}

impl ReservedBreak {
  pub fn new(capacity: usize) -> io::Result<Self> {
    let base = unsafe { os_mmap(capacity.max(1))? };

    Ok(Self {
      base,
      capacity,
      offset: 0,
      live_mappings: 0,
    })
  }

  /// Bytes the simulated break has moved so far.
  pub fn break_offset(&self) -> usize {
    self.offset
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Mappings handed out and not yet returned.
  pub fn live_mappings(&self) -> usize {
    self.live_mappings
  }
}

impl MemorySource for ReservedBreak {
  unsafe fn extend_break(
    &mut self,
    increment: usize,
  ) -> io::Result<NonNull<u8>> {
    let end = self
      .offset
      .checked_add(increment)
      .filter(|&end| end <= self.capacity)
      .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

    let previous = unsafe { self.base.add(self.offset) };
    self.offset = end;
    Ok(previous)
  }

  unsafe fn map(
    &mut self,
    len: usize,
  ) -> io::Result<NonNull<u8>> {
    let addr = unsafe { os_mmap(len)? };
    self.live_mappings += 1;
    Ok(addr)
  }

  unsafe fn unmap(
    &mut self,
    base: NonNull<u8>,
    len: usize,
  ) -> io::Result<()> {
    unsafe { os_munmap(base, len)? };
    self.live_mappings -= 1;
    Ok(())
  }
}

impl Drop for ReservedBreak {
  fn drop(&mut self) {
    if let Err(err) = unsafe { os_munmap(self.base, self.capacity.max(1)) } {
      warn!("releasing reservation {:?} ({} bytes) failed: {}", self.base, self.capacity, err);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserved_break_grows_contiguously() {
    let mut source = ReservedBreak::new(4096).unwrap();

    unsafe {
      let start = source.extend_break(0).unwrap();
      let first = source.extend_break(100).unwrap();
      let second = source.extend_break(28).unwrap();

      assert_eq!(start, first);
      assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 100);
      assert_eq!(source.break_offset(), 128);

      first.as_ptr().write_bytes(0xAB, 128);
      assert_eq!(*second.as_ptr(), 0xAB);
    }
  }

  #[test]
  fn test_reserved_break_refuses_growth_past_capacity() {
    let mut source = ReservedBreak::new(256).unwrap();
    assert_eq!(source.capacity(), 256);

    unsafe {
      source.extend_break(200).unwrap();
      let err = source.extend_break(100).unwrap_err();
      assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
      assert_eq!(source.break_offset(), 200);
      assert!(source.extend_break(56).is_ok());
    }
  }

  #[test]
  fn test_mappings_are_counted() {
    let mut source = ReservedBreak::new(64).unwrap();

    unsafe {
      let a = source.map(8192).unwrap();
      let b = source.map(100).unwrap();
      assert_eq!(source.live_mappings(), 2);

      a.as_ptr().write_bytes(1, 8192);
      source.unmap(a, 8192).unwrap();
      source.unmap(b, 100).unwrap();
      assert_eq!(source.live_mappings(), 0);
    }
  }
}
