//! Custom allocators and allocator propagation.
//!
//! This example shows:
//! * Writing an `Allocator` that draws from a bounded budget
//! * How copies and moves behave between wrappers with unequal allocators
//! * Fallible construction when the allocator runs out of memory
//! * Building wrappers that share one allocator configuration

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use heap_value::{AllocError, Allocator, Global, Indirect, ValueBuilder};

/// A named allocator that refuses requests once a byte budget is used up.
#[derive(Clone, Debug)]
struct Budget {
    name: &'static str,
    remaining: Rc<Cell<usize>>,
}

impl Budget {
    fn new(name: &'static str, bytes: usize) -> Self {
        Self {
            name,
            remaining: Rc::new(Cell::new(bytes)),
        }
    }
}

impl PartialEq for Budget {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.remaining, &other.remaining)
    }
}

// SAFETY: All memory comes from `Global`, so any instance can release any block.
unsafe impl Allocator for Budget {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let remaining = self
            .remaining
            .get()
            .checked_sub(layout.size())
            .ok_or(AllocError::exhausted(layout))?;

        let ptr = Global.allocate(layout)?;
        self.remaining.set(remaining);

        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.remaining
            .set(self.remaining.get().saturating_add(layout.size()));

        // SAFETY: Forwarding the caller's guarantees. All memory comes from `Global`.
        unsafe {
            Global.deallocate(ptr, layout);
        }
    }
}

fn demonstrate_unequal_allocators() {
    println!("Example 1: Moving between unequal allocators");
    println!("--------------------------------------------");

    let arena_a = Budget::new("arena A", 1024);
    let arena_b = Budget::new("arena B", 1024);

    let mut source = Indirect::new_in([1_u64; 8], arena_a.clone());
    println!(
        "{} has {} bytes left after construction",
        arena_a.name,
        arena_a.remaining.get()
    );

    // The allocators differ, so the payload is relocated into memory from arena B.
    let moved = source.move_in(arena_b.clone());

    println!(
        "After move_in: {} has {} bytes left, {} has {} bytes left",
        arena_a.name,
        arena_a.remaining.get(),
        arena_b.name,
        arena_b.remaining.get()
    );
    println!("Source is valueless: {}", source.valueless_after_move());
    println!("Moved payload sum: {}", moved.iter().sum::<u64>());

    println!();
}

fn demonstrate_exhaustion() {
    println!("Example 2: Running out of memory");
    println!("--------------------------------");

    let tiny = Budget::new("tiny", 16);

    let fits = Indirect::try_new_in(7_u64, tiny.clone());
    println!("Allocating 8 bytes: {}", describe(fits.as_ref().err()));

    let too_big = Indirect::try_new_in([0_u8; 64], tiny.clone());
    println!("Allocating 64 bytes: {}", describe(too_big.as_ref().err()));

    println!();
}

fn demonstrate_builder() {
    println!("Example 3: Shared configuration through the builder");
    println!("---------------------------------------------------");

    let pool = Budget::new("pool", 4096);
    let builder = ValueBuilder::new().allocator(pool.clone());

    let numbers = builder.clone().indirect(vec![1, 2, 3]);
    let greeting = builder.indirect_with(|| String::from("hello"));

    println!("numbers = {:?}, greeting = {}", *numbers, *greeting);
    println!(
        "Both use {}: {}",
        pool.name,
        numbers.allocator() == &pool && greeting.allocator() == &pool
    );

    println!();
}

fn describe(error: Option<&AllocError>) -> String {
    match error {
        None => "ok".to_string(),
        Some(error) => format!("failed ({error})"),
    }
}

fn main() {
    println!("=== heap_value Allocator Examples ===");
    println!();

    demonstrate_unequal_allocators();
    demonstrate_exhaustion();
    demonstrate_builder();

    println!("All examples completed successfully!");
}
