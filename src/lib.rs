//! # osmem - A malloc-style memory allocator
//!
//! This crate implements the four classic allocation calls (allocate,
//! zero-allocate, release, resize) on top of two independent strategies:
//!
//! - a **heap** carved out of the program break with `sbrk(2)`, searched
//!   first-fit, split on allocation and coalesced eagerly on every change;
//! - **mapped blocks**, one anonymous `mmap(2)` region per large request.
//!
//! ## Overview
//!
//! ```text
//!   Request Routing:
//!
//!                      allocate(n) / zero_allocate(n, m) / resize(p, n)
//!                                         │
//!                           align n up to 8 bytes
//!                                         │
//!                  ┌──────────────────────┴──────────────────────┐
//!                  │ n < MMAP_THRESHOLD - HEADER_SIZE            │ otherwise
//!                  ▼                                             ▼
//!   ┌──────────────────────────────┐            ┌──────────────────────────┐
//!   │            HEAP              │  break     │        MAPPINGS          │
//!   │                              │  failure   │                          │
//!   │  first-fit → split → merge   │ ─────────► │  one mmap per block,     │
//!   │  grows at the tail (sbrk)    │            │  pushed at the list head │
//!   │  never returned to the OS    │            │  munmap on release       │
//!   └──────────────────────────────┘            └──────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   osmem
//!   ├── align      - Alignment macro (align!) and granularity
//!   ├── block      - Block header embedded before every payload
//!   ├── list       - Intrusive doubly-linked block list, coalescing
//!   ├── os         - MemorySource trait: System (sbrk/mmap), ReservedBreak
//!   ├── heap       - Break-backed arena and its free list
//!   ├── mapped     - Individually mapped blocks
//!   ├── config     - Size thresholds
//!   ├── error      - AllocError, ConfigError
//!   ├── allocator  - The Allocator façade
//!   └── global     - Process-wide instance, os_* C functions, OsMem
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use osmem::{Allocator, ReservedBreak};
//!
//! let mut allocator = Allocator::new(ReservedBreak::new(1 << 20).unwrap());
//!
//! let ptr = allocator.allocate(100).unwrap().unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!
//!     let ptr = allocator.resize(ptr.as_ptr(), 200_000).unwrap().unwrap();
//!     assert_eq!(*ptr.as_ptr(), 0xAB);
//!
//!     allocator.release(ptr.as_ptr());
//! }
//! ```
//!
//! ## How It Works
//!
//! Every payload is preceded by a block header in the same memory:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ status          │  │  │                          │  │
//!   │  │ next            │  │  │     N bytes usable       │  │
//!   │  │ prev            │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │     HEADER_SIZE       │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Releasing or resizing a pointer recovers the header by stepping back
//! [`HEADER_SIZE`] bytes, then decides which strategy owns it by looking the
//! header up on the heap list.
//!
//! ```text
//!   Block States:
//!
//!        heap carve              release
//!   FREE ──────────► ALLOCATED ──────────► FREE
//!
//!        mmap                    release
//!   ──────────────► MAPPED ──────────────► (unmapped)
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded core**: [`Allocator`] takes `&mut self` everywhere;
//!   only the [`global`] instance is lock-protected
//! - **8-byte alignment only**: stricter layouts are refused
//! - **Heap only grows**: released heap memory is reused, never returned
//! - **Unix-only**: requires `libc` for `sbrk`, `mmap` and `munmap`
//!
//! ## Safety
//!
//! Release and resize take raw pointers and trust that they came from the
//! same allocator; passing anything else is undefined behaviour.

pub mod align;
mod allocator;
mod block;
pub mod config;
mod error;
pub mod global;
mod heap;
mod list;
mod mapped;
pub mod os;

pub use allocator::{Allocator, BlockInfo};
pub use block::{HEADER_SIZE, Status};
pub use config::Config;
pub use error::{AllocError, ConfigError, Region};
pub use global::{OsMem, os_calloc, os_free, os_malloc, os_realloc};
pub use os::{MemorySource, ReservedBreak, System};
