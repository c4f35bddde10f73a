//! The process-wide allocator and its C and `GlobalAlloc` entry points.
//!
//! One [`Allocator<System>`] is created lazily on first use and kept behind a
//! spin lock for the rest of the process. The lock is the only
//! synchronisation in the crate; everything below it assumes exclusive
//! access.
//!
//! Logging inside the allocator goes through the `log` facade. When [`OsMem`]
//! is installed as the `#[global_allocator]`, the installed logger must not
//! allocate, or the allocator re-enters its own lock.

use std::{
  alloc::{GlobalAlloc, Layout},
  ffi::c_void,
  ptr::{self, NonNull},
};

use log::warn;
use spin::Mutex;

use crate::{
  align::ALIGNMENT,
  allocator::Allocator,
  error::AllocError,
  os::System,
};

struct Slot(Option<Allocator<System>>);

// SAFETY: the allocator exclusively owns every block its lists link to, and
// the slot is only ever reached through `GLOBAL`'s lock.
unsafe impl Send for Slot {}

static GLOBAL: Mutex<Slot> = Mutex::new(Slot(None));

/// Runs `f` against the process-wide allocator, creating it on first use.
pub fn with_global<R>(f: impl FnOnce(&mut Allocator<System>) -> R) -> R {
  let mut slot = GLOBAL.lock();
  let allocator = slot.0.get_or_insert_with(Allocator::system);
  f(allocator)
}

fn into_raw(result: Result<Option<NonNull<u8>>, AllocError>) -> *mut u8 {
  match result {
    Ok(Some(ptr)) => ptr.as_ptr(),
    Ok(None) => ptr::null_mut(),
    Err(err) => {
      warn!("{err}");
      ptr::null_mut()
    }
  }
}

#[unsafe(no_mangle)]
pub extern "C" fn os_malloc(size: usize) -> *mut c_void {
  into_raw(with_global(|a| a.allocate(size))).cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn os_calloc(
  nmemb: usize,
  size: usize,
) -> *mut c_void {
  into_raw(with_global(|a| a.zero_allocate(nmemb, size))).cast()
}

/// # Safety
///
/// `ptr` must be null or a live pointer returned by the `os_*` functions.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_free(ptr: *mut c_void) {
  with_global(|a| unsafe { a.release(ptr.cast()) })
}

/// # Safety
///
/// `ptr` must be null or a live pointer returned by the `os_*` functions.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_realloc(
  ptr: *mut c_void,
  size: usize,
) -> *mut c_void {
  into_raw(with_global(|a| unsafe { a.resize(ptr.cast(), size) })).cast()
}

/// `GlobalAlloc` adapter over the process-wide allocator.
///
/// Layouts asking for more than 8-byte alignment are refused.
pub struct OsMem;

unsafe impl GlobalAlloc for OsMem {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    into_raw(with_global(|a| a.allocate(layout.size())))
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    into_raw(with_global(|a| a.zero_allocate(1, layout.size())))
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    with_global(|a| unsafe { a.release(ptr) })
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    into_raw(with_global(|a| unsafe { a.resize(ptr, new_size) }))
  }
}

// These tests stay on the mapping paths: the test harness shares the real
// program break with the system allocator.
#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_c_entry_points_on_mappings() {
    unsafe {
      assert!(os_malloc(0).is_null());
      assert!(os_calloc(0, 5).is_null());
      assert!(os_realloc(ptr::null_mut(), 0).is_null());
      os_free(ptr::null_mut());

      let ptr = os_malloc(200_000) as *mut u8;
      assert!(!ptr.is_null());
      assert_eq!(ptr as usize % ALIGNMENT, 0);
      ptr.write_bytes(0x77, 200_000);

      let grown = os_realloc(ptr.cast(), 300_000) as *mut u8;
      assert!(!grown.is_null());
      assert_eq!(*grown.add(199_999), 0x77);
      os_free(grown.cast());

      let zeroed = os_calloc(2, 8192) as *mut u8;
      assert!(!zeroed.is_null());
      assert!((0..16_384).all(|i| *zeroed.add(i) == 0));
      os_free(zeroed.cast());
    }
  }

  #[test]
  fn test_global_alloc_adapter() {
    let big = Layout::from_size_align(200_000, 8).unwrap();
    let over_aligned = Layout::from_size_align(200_000, 64).unwrap();

    unsafe {
      assert!(OsMem.alloc(over_aligned).is_null());

      let ptr = OsMem.alloc_zeroed(big);
      assert!(!ptr.is_null());
      assert_eq!(*ptr.add(123_456), 0);

      let usable = with_global(|a| a.usable_size(ptr));
      assert_eq!(usable, Some(200_000));

      OsMem.dealloc(ptr, big);
    }
  }
}
