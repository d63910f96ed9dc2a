use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::adapter::{Rebound, delete_object, new_object, try_new_object};
use crate::{AllocError, Allocator, CloneOf, ConstructError, Initializer};

/// Exclusive owner of one payload allocation made through an allocator of type `A`.
///
/// The owner does not remember which allocator made the allocation. Every operation that
/// touches memory is told which allocator to use, and the caller is responsible for
/// passing the allocator (or one equal to it) that the storage was created with.
pub(crate) trait Storage<A: Allocator>: Sized {
    /// Drops the payload and releases the allocation.
    ///
    /// # Safety
    ///
    /// `alloc` must compare equal to the allocator that made the allocation.
    unsafe fn destroy(self, alloc: &A);

    /// Moves the payload into a new allocation made by `to`, releasing the old allocation
    /// through `from`.
    ///
    /// If the new allocation cannot be made, the storage is handed back untouched together
    /// with the error. If relocating the payload panics, both allocations are released and
    /// the payload is lost.
    ///
    /// # Safety
    ///
    /// `from` must compare equal to the allocator that made the allocation.
    unsafe fn relocate(self, from: &A, to: &A) -> Result<Self, (Self, AllocError)>;
}

/// Storage whose payload can be copied into a new allocation.
pub(crate) trait DuplicateStorage<A: Allocator>: Storage<A> {
    /// Copies the payload into a new allocation made by `alloc`.
    fn duplicate(&self, alloc: &A) -> Result<Self, AllocError>;

    /// Overwrites the payload with a copy of the payload of `source`, reusing the existing
    /// allocation. Returns `false` if this storage cannot assign in place.
    fn assign_in_place(&mut self, source: &Self) -> bool;
}

/// Storage for exactly one `T` of a statically known type.
pub(crate) struct Slot<T> {
    ptr: NonNull<T>,

    _owns: PhantomData<T>,
}

impl<T> Slot<T> {
    pub(crate) fn new_in<A, I>(alloc: &A, init: I) -> Result<Self, AllocError>
    where
        A: Allocator,
        I: Initializer<T, A>,
    {
        new_object(alloc, init).map(Self::from_ptr)
    }

    pub(crate) fn try_new_in<A, E, F>(alloc: &A, init: F) -> Result<Self, ConstructError<E>>
    where
        A: Allocator,
        F: FnOnce(&A) -> Result<T, E>,
    {
        try_new_object(alloc, init).map(Self::from_ptr)
    }

    fn from_ptr(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn as_ref(&self) -> &T {
        // SAFETY: A slot always owns a live `T`, and the shared borrow of the slot
        // prevents mutable access for the lifetime of the returned reference.
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub(crate) fn as_mut(&mut self) -> &mut T {
        // SAFETY: A slot always owns a live `T`, and the exclusive borrow of the slot
        // guarantees no other access for the lifetime of the returned reference.
        unsafe { self.ptr.as_mut() }
    }

    /// Moves the payload out and releases the allocation.
    ///
    /// # Safety
    ///
    /// `alloc` must compare equal to the allocator that made the allocation.
    pub(crate) unsafe fn into_inner<A: Allocator>(self, alloc: &A) -> T {
        // SAFETY: A slot always owns a live `T`. The slot is consumed, so the value is
        // never read again through it.
        let value = unsafe { self.ptr.read() };

        // SAFETY: The payload was moved out above. The caller guarantees the allocator.
        unsafe {
            Rebound::<T, A>::new(alloc).deallocate(self.ptr, 1);
        }

        value
    }
}

impl<T, A: Allocator> Storage<A> for Slot<T> {
    unsafe fn destroy(self, alloc: &A) {
        // SAFETY: The slot owns a live `T` created by `new_object()` and the caller
        // guarantees the allocator.
        unsafe {
            delete_object(alloc, self.ptr);
        }
    }

    unsafe fn relocate(self, from: &A, to: &A) -> Result<Self, (Self, AllocError)> {
        let target = match Rebound::<T, A>::new(to).allocate(1) {
            Ok(target) => target,
            Err(error) => return Err((self, error)),
        };

        // SAFETY: Both pointers are valid for one `T` and belong to distinct allocations.
        // Rust values are relocatable by bitwise copy.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), target.as_ptr(), 1);
        }

        // SAFETY: The payload now lives in `target`, so the old memory holds no live
        // object. The caller guarantees `from` made the old allocation.
        unsafe {
            Rebound::<T, A>::new(from).deallocate(self.ptr, 1);
        }

        Ok(Self::from_ptr(target))
    }
}

impl<T: Clone, A: Allocator> DuplicateStorage<A> for Slot<T> {
    fn duplicate(&self, alloc: &A) -> Result<Self, AllocError> {
        Self::new_in(alloc, CloneOf(self.as_ref()))
    }

    fn assign_in_place(&mut self, source: &Self) -> bool {
        self.as_mut().clone_from(source.as_ref());
        true
    }
}
