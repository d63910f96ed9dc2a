use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::AllocError;

/// A source of memory for the payload of an [`Indirect`][crate::Indirect] or
/// [`Polymorphic`][crate::Polymorphic].
///
/// An allocator value is a cheap handle to some memory resource. Handles are cloned when
/// values are copied and may be moved between wrappers during assignment and swap, as
/// directed by the propagation constants.
///
/// # Equality
///
/// Two allocators compare equal if memory allocated by one can be deallocated by the
/// other. Wrappers with equal allocators can exchange their payloads by pointer; wrappers
/// with unequal allocators must copy or relocate the payload into memory from the right
/// allocator.
///
/// # Propagation
///
/// The `PROPAGATE_ON_*` constants decide whether the allocator of a wrapper is replaced by
/// the allocator of the source wrapper during copy assignment, move assignment and swap.
/// All of them default to `false`: the destination keeps its own allocator and the payload
/// is brought over to it.
///
/// # Safety
///
/// Memory returned by [`allocate()`][Self::allocate] must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()` and must remain valid until it is
/// passed to [`deallocate()`][Self::deallocate] on this allocator or on any allocator that
/// compares equal to it (including clones and the result of
/// [`select_on_copy()`][Self::select_on_copy], if those compare equal).
///
/// If [`IS_ALWAYS_EQUAL`][Self::IS_ALWAYS_EQUAL] is `true`, any instance of the type must be
/// able to deallocate memory allocated by any other instance.
pub unsafe trait Allocator: Clone + PartialEq {
    /// Whether copy assignment replaces the destination allocator with the source allocator.
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;

    /// Whether move assignment replaces the destination allocator with the source allocator.
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = false;

    /// Whether swapping two wrappers also swaps their allocators.
    const PROPAGATE_ON_SWAP: bool = false;

    /// Whether all instances of this allocator type compare equal, regardless of state.
    const IS_ALWAYS_EQUAL: bool = false;

    /// Allocates a block of memory described by `layout`.
    ///
    /// Zero-sized requests must succeed with a non-null, suitably aligned pointer.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory resource cannot satisfy the request.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block of memory to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] on this allocator or
    /// one that compares equal to it, called with the same `layout`, and must not have been
    /// deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Returns the allocator to use for a copy of a wrapper that uses `self`.
    ///
    /// The default returns a clone of `self`.
    #[must_use]
    fn select_on_copy(&self) -> Self {
        self.clone()
    }

    /// Whether memory allocated by `self` may be deallocated by `other` and vice versa.
    ///
    /// Shortcuts to `true` for allocator types that are always equal.
    #[must_use]
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Shortcut only. Always-equal types also pass `==`.
    fn equals(&self, other: &Self) -> bool {
        Self::IS_ALWAYS_EQUAL || self == other
    }
}

/// The default allocator, backed by the global allocator of the process.
///
/// All instances are interchangeable.
///
/// # Examples
///
/// ```
/// use heap_value::{Global, Indirect};
///
/// let value = Indirect::new_in(42_u32, Global);
/// assert_eq!(*value, 42);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "stateless handle that callers name directly"
)]
pub struct Global;

// SAFETY: Memory comes from the global allocator, which any instance can release, and
// zero-sized requests are answered with a dangling pointer that is never dereferenced
// or passed to the global allocator.
unsafe impl Allocator for Global {
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const IS_ALWAYS_EQUAL: bool = true;

    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        // SAFETY: The layout has a non-zero size, checked above.
        let ptr = unsafe { alloc::alloc(layout) };

        NonNull::new(ptr).ok_or(AllocError::Exhausted { layout })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        // SAFETY: Forwarding the caller's guarantee that `ptr` came from `allocate()` with
        // this layout. Non-zero sizes are always served by the global allocator.
        unsafe {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// A well-aligned, non-null pointer that stands in for a zero-sized allocation.
#[inline]
fn dangling(layout: Layout) -> NonNull<u8> {
    let ptr = ptr::without_provenance_mut::<u8>(layout.align());

    // SAFETY: Alignment is a power of two, so never zero.
    unsafe { NonNull::new_unchecked(ptr) }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::{RefUnwindSafe, UnwindSafe};

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Global: Send, Sync, Copy, UnwindSafe, RefUnwindSafe);

    #[test]
    fn global_round_trips_memory() {
        let layout = Layout::new::<[u64; 4]>();
        let ptr = Global.allocate(layout).unwrap();

        assert_eq!(ptr.as_ptr().align_offset(layout.align()), 0);

        // SAFETY: The block is valid for the layout we requested.
        unsafe {
            ptr.cast::<[u64; 4]>().write([1, 2, 3, 4]);
        }

        // SAFETY: Same allocator, same layout, not yet deallocated.
        unsafe {
            Global.deallocate(ptr, layout);
        }
    }

    #[test]
    fn global_zero_sized_is_aligned_and_non_null() {
        let layout = Layout::from_size_align(0, 64).unwrap();
        let ptr = Global.allocate(layout).unwrap();

        assert_eq!(ptr.as_ptr().addr(), 64);

        // SAFETY: Same allocator, same layout, not yet deallocated.
        unsafe {
            Global.deallocate(ptr, layout);
        }
    }

    #[test]
    fn global_instances_are_always_equal() {
        assert!(Global::IS_ALWAYS_EQUAL);
        assert!(Global.equals(&Global));
        assert_eq!(Global.select_on_copy(), Global);
    }

    #[derive(Clone, PartialEq)]
    struct Stateful(u8);

    // SAFETY: Delegates all memory management to the global allocator.
    unsafe impl Allocator for Stateful {
        fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            // SAFETY: Forwarding the caller's guarantees.
            unsafe {
                Global.deallocate(ptr, layout);
            }
        }
    }

    #[test]
    fn defaults_do_not_propagate() {
        assert!(!Stateful::PROPAGATE_ON_COPY_ASSIGNMENT);
        assert!(!Stateful::PROPAGATE_ON_MOVE_ASSIGNMENT);
        assert!(!Stateful::PROPAGATE_ON_SWAP);
        assert!(!Stateful::IS_ALWAYS_EQUAL);
    }

    #[test]
    fn equality_follows_partial_eq_when_not_always_equal() {
        assert!(Stateful(1).equals(&Stateful(1)));
        assert!(!Stateful(1).equals(&Stateful(2)));
        assert!(Stateful(7).select_on_copy() == Stateful(7));
    }
}
