//! Typed access to an untyped [`Allocator`].
//!
//! The wrappers never allocate raw bytes directly. They go through [`Rebound`], which
//! fixes the element type of the allocation, and through the whole-object helpers in this
//! module, which pair allocation with construction and destruction with deallocation so
//! that a panic in between never leaks memory.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use scopeguard::ScopeGuard;

use crate::{AllocError, Allocator, ConstructError, Initializer};

/// A view of an allocator that allocates, constructs and destroys objects of type `U`.
///
/// All copies of a `Rebound` over the same allocator share its memory resource; rebinding
/// never creates a new allocator.
pub struct Rebound<'a, U, A> {
    alloc: &'a A,

    _payload: PhantomData<fn() -> U>,
}

impl<'a, U, A: Allocator> Rebound<'a, U, A> {
    /// Creates a view of `alloc` for objects of type `U`.
    #[must_use]
    #[inline]
    pub fn new(alloc: &'a A) -> Self {
        Self {
            alloc,
            _payload: PhantomData,
        }
    }

    /// The underlying allocator.
    #[must_use]
    #[inline]
    pub fn allocator(&self) -> &'a A {
        self.alloc
    }

    /// Allocates uninitialized memory for `n` consecutive objects of type `U`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::CapacityOverflow`] if `n` objects do not fit into the address
    /// space, or whatever the allocator reports if it cannot provide the memory.
    pub fn allocate(&self, n: usize) -> Result<NonNull<U>, AllocError> {
        let layout = Layout::array::<U>(n).map_err(|_layout_error| AllocError::CapacityOverflow)?;

        Ok(self.alloc.allocate(layout)?.cast())
    }

    /// Returns memory for `n` objects of type `U` to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] with the same `n` on a
    /// view of this allocator or of one that compares equal to it. Any objects that lived
    /// in the memory must already have been destroyed or moved out.
    pub unsafe fn deallocate(&self, ptr: NonNull<U>, n: usize) {
        let layout = Layout::array::<U>(n)
            .expect("layout was valid when the memory was allocated, so it is valid now");

        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.alloc.deallocate(ptr.cast(), layout);
        }
    }

    /// Builds a `U` with `init` and writes it into `ptr`.
    ///
    /// The initializer receives the underlying allocator. If it panics, nothing is written.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writing one `U` and must not hold a live object that still
    /// needs to be dropped (it would be leaked).
    pub unsafe fn construct<I>(&self, ptr: NonNull<U>, init: I)
    where
        I: Initializer<U, A>,
    {
        let value = init.initialize(self.alloc);

        // SAFETY: Forwarding the caller's guarantee that `ptr` is valid for writes.
        unsafe {
            ptr.write(value);
        }
    }

    /// Drops the object at `ptr` in place without releasing its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live `U` that is not used again afterwards.
    pub unsafe fn destroy(&self, ptr: NonNull<U>) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            ptr.drop_in_place();
        }
    }
}

impl<U, A> Clone for Rebound<'_, U, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<U, A> Copy for Rebound<'_, U, A> {}

impl<U, A> fmt::Debug for Rebound<'_, U, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rebound")
            .field("payload", &std::any::type_name::<U>())
            .finish_non_exhaustive()
    }
}

/// Allocates storage for one `U` from `alloc` and builds the object in it with `init`.
///
/// If `init` panics, the storage is returned to the allocator before the panic continues.
///
/// # Errors
///
/// Returns [`AllocError`] if no memory could be obtained. The initializer is not called.
pub fn new_object<U, A, I>(alloc: &A, init: I) -> Result<NonNull<U>, AllocError>
where
    A: Allocator,
    I: Initializer<U, A>,
{
    let rebound = Rebound::<U, A>::new(alloc);
    let ptr = rebound.allocate(1)?;

    let storage = scopeguard::guard(ptr, |ptr| {
        // SAFETY: Allocated above for one `U`, never initialized.
        unsafe {
            rebound.deallocate(ptr, 1);
        }
    });

    // SAFETY: Fresh allocation for one `U`.
    unsafe {
        rebound.construct(*storage, init);
    }

    Ok(ScopeGuard::into_inner(storage))
}

/// Allocates storage for one `U` from `alloc` and builds the object in it with a fallible
/// initializer.
///
/// If `init` fails or panics, the storage is returned to the allocator first.
///
/// # Errors
///
/// Returns [`ConstructError::Alloc`] if no memory could be obtained (the initializer is not
/// called) and [`ConstructError::Initializer`] if the initializer failed.
pub fn try_new_object<U, A, E, F>(alloc: &A, init: F) -> Result<NonNull<U>, ConstructError<E>>
where
    A: Allocator,
    F: FnOnce(&A) -> Result<U, E>,
{
    let rebound = Rebound::<U, A>::new(alloc);
    let ptr = rebound.allocate(1)?;

    let storage = scopeguard::guard(ptr, |ptr| {
        // SAFETY: Allocated above for one `U`, never initialized.
        unsafe {
            rebound.deallocate(ptr, 1);
        }
    });

    let value = init(alloc).map_err(ConstructError::Initializer)?;

    // SAFETY: Fresh allocation for one `U`.
    unsafe {
        storage.write(value);
    }

    Ok(ScopeGuard::into_inner(storage))
}

/// Destroys the object at `ptr` and returns its storage to `alloc`.
///
/// The storage is released even if dropping the object panics.
///
/// # Safety
///
/// `ptr` must have been returned by [`new_object()`] or [`try_new_object()`] on `alloc` or an
/// allocator that compares equal to it, and must not be used again afterwards.
pub unsafe fn delete_object<U, A>(alloc: &A, ptr: NonNull<U>)
where
    A: Allocator,
{
    let rebound = Rebound::<U, A>::new(alloc);

    let _release = scopeguard::guard((), |()| {
        // SAFETY: The caller guarantees the storage came from this allocator for one `U`.
        unsafe {
            rebound.deallocate(ptr, 1);
        }
    });

    // SAFETY: The caller guarantees `ptr` holds a live `U` that is not used again.
    unsafe {
        rebound.destroy(ptr);
    }
}
