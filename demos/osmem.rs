use std::io::Read;

use libc::sbrk;
use osmem::{Allocator, System};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `gdb`, or just visually track how the program break and mappings change.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_blocks(allocator: &Allocator<System>) {
  println!("  heap:");
  for block in allocator.heap_blocks() {
    println!("    {:?} {:>8} bytes {:?}", block.payload, block.size, block.status);
  }
  println!("  mapped:");
  for block in allocator.mapped_blocks() {
    println!("    {:?} {:>8} bytes {:?}", block.payload, block.size, block.status);
  }
}

fn main() {
  let mut allocator = Allocator::system();

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) A small request creates the heap: one 128 KiB break extension,
    //    split into the 104-byte block and a free remainder.
    // --------------------------------------------------------------------
    let first = allocator.allocate(100).unwrap().unwrap();
    first.as_ptr().write_bytes(0xAB, 100);
    println!("\n[1] allocate(100) = {:?}", first);
    print_program_break("after first allocation");
    print_blocks(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) A second block comes out of the same free remainder.
    // --------------------------------------------------------------------
    let second = allocator.allocate(200).unwrap().unwrap();
    println!("\n[2] allocate(200) = {:?}", second);
    print_blocks(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the first block, then ask for something smaller.
    //    First fit hands the freed block back without moving the break.
    // --------------------------------------------------------------------
    allocator.release(first.as_ptr());
    let third = allocator.allocate(90).unwrap().unwrap();
    println!(
      "\n[3] release + allocate(90) = {:?}, reused first block? {}",
      third,
      third == first
    );
    print_program_break("after reuse");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A request above the threshold gets its own mapping; the break
    //    does not move.
    // --------------------------------------------------------------------
    let big = allocator.allocate(200_000).unwrap().unwrap();
    println!("\n[4] allocate(200000) = {:?}", big);
    print_program_break("after large allocation");
    print_blocks(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Resizing the mapped block below the threshold migrates it into the
    //    heap and unmaps the old region.
    // --------------------------------------------------------------------
    let moved = allocator.resize(big.as_ptr(), 1000).unwrap().unwrap();
    println!("\n[5] resize(big, 1000) = {:?}", moved);
    print_blocks(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Zero-allocation of a full page always maps.
    // --------------------------------------------------------------------
    let zeroed = allocator.zero_allocate(512, 8).unwrap().unwrap();
    println!("\n[6] zero_allocate(512, 8) = {:?}, first byte = {}", zeroed, *zeroed.as_ptr());
    print_blocks(&allocator);

    allocator.release(zeroed.as_ptr());
    allocator.release(moved.as_ptr());
    allocator.release(second.as_ptr());
    allocator.release(third.as_ptr());

    println!("\n[7] Everything released; heap memory stays with the process.");
    print_blocks(&allocator);
  }
}
