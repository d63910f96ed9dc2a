use std::any::type_name;
use std::mem;

use tracing::trace;

use crate::storage::{DuplicateStorage, Storage};
use crate::{AllocError, Allocator};

/// The lifecycle engine shared by [`Indirect`][crate::Indirect] and
/// [`Polymorphic`][crate::Polymorphic].
///
/// Owns an allocator and, unless valueless, one storage allocated by that allocator.
/// Implements the allocator-aware rules for copying, moving, assigning and swapping, so
/// that the wrappers only differ in how their storage is shaped.
pub(crate) struct Holder<S: Storage<A>, A: Allocator> {
    // `None` is the valueless state.
    storage: Option<S>,
    alloc: A,
}

impl<S: Storage<A>, A: Allocator> Holder<S, A> {
    #[inline]
    pub(crate) fn new(storage: S, alloc: A) -> Self {
        Self {
            storage: Some(storage),
            alloc,
        }
    }

    #[inline]
    pub(crate) fn valueless(alloc: A) -> Self {
        Self {
            storage: None,
            alloc,
        }
    }

    #[inline]
    pub(crate) fn storage(&self) -> Option<&S> {
        self.storage.as_ref()
    }

    #[inline]
    pub(crate) fn storage_mut(&mut self) -> Option<&mut S> {
        self.storage.as_mut()
    }

    #[inline]
    pub(crate) fn allocator(&self) -> &A {
        &self.alloc
    }

    #[inline]
    pub(crate) fn is_valueless(&self) -> bool {
        self.storage.is_none()
    }

    /// Removes the storage without destroying it, leaving `self` valueless.
    ///
    /// The caller becomes responsible for releasing the storage through this holder's
    /// allocator.
    #[inline]
    pub(crate) fn take_storage(&mut self) -> Option<S> {
        self.storage.take()
    }

    /// Destroys the payload, if any, leaving `self` valueless.
    pub(crate) fn reset(&mut self) {
        if let Some(storage) = self.storage.take() {
            // SAFETY: The storage was allocated by our allocator or one equal to it.
            unsafe {
                storage.destroy(&self.alloc);
            }
        }
    }

    /// Installs `storage` as the new payload, adopting `alloc` if given, and only then
    /// destroys the previous payload with the allocator that made it.
    ///
    /// If dropping the previous payload panics, the new payload is already in place.
    fn replace_storage(&mut self, storage: S, alloc: Option<A>) {
        let previous_alloc = alloc.map(|alloc| mem::replace(&mut self.alloc, alloc));
        let previous = self.storage.replace(storage);

        if let Some(previous) = previous {
            let previous_alloc = previous_alloc.as_ref().unwrap_or(&self.alloc);

            // SAFETY: The previous storage was allocated by the previous allocator or one
            // equal to it.
            unsafe {
                previous.destroy(previous_alloc);
            }
        }
    }

    /// Moves the payload into a new holder with a clone of the same allocator, leaving
    /// `self` valueless. Never allocates.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            storage: self.storage.take(),
            alloc: self.alloc.clone(),
        }
    }

    /// Moves the payload into a new holder that uses `alloc`, leaving `self` valueless.
    ///
    /// With an equal allocator the storage changes owner without allocating. Otherwise
    /// the payload is relocated into memory from `alloc`. If that memory cannot be
    /// obtained, `self` keeps its payload.
    pub(crate) fn try_move_in(&mut self, alloc: A) -> Result<Self, AllocError> {
        let Some(storage) = self.storage.take() else {
            return Ok(Self::valueless(alloc));
        };

        if alloc.equals(&self.alloc) {
            return Ok(Self::new(storage, alloc));
        }

        trace!(
            storage = type_name::<S>(),
            "relocating payload to a different allocator"
        );

        // SAFETY: The storage was allocated by our allocator or one equal to it.
        match unsafe { storage.relocate(&self.alloc, &alloc) } {
            Ok(relocated) => Ok(Self::new(relocated, alloc)),
            Err((storage, error)) => {
                self.storage = Some(storage);
                Err(error)
            }
        }
    }

    /// Replaces the payload of `self` with the payload of `source`, leaving `source`
    /// valueless.
    ///
    /// Follows the move assignment propagation rule of the allocator. If the allocators
    /// end up unequal, the payload is relocated into memory from our allocator. If that
    /// memory cannot be obtained, neither side changes.
    pub(crate) fn try_move_assign_from(&mut self, source: &mut Self) -> Result<(), AllocError> {
        let equal = self.alloc.equals(&source.alloc);
        let update_alloc = A::PROPAGATE_ON_MOVE_ASSIGNMENT && !equal;

        let Some(incoming) = source.storage.take() else {
            self.reset();

            if update_alloc {
                self.alloc = source.alloc.clone();
            }

            return Ok(());
        };

        if equal || update_alloc {
            let adopted = if update_alloc {
                trace!(
                    storage = type_name::<S>(),
                    "adopting allocator of move assignment source"
                );
                Some(source.alloc.clone())
            } else {
                None
            };

            self.replace_storage(incoming, adopted);

            return Ok(());
        }

        trace!(
            storage = type_name::<S>(),
            "relocating move assignment source to a different allocator"
        );

        // SAFETY: The incoming storage was allocated by the allocator of `source`.
        match unsafe { incoming.relocate(&source.alloc, &self.alloc) } {
            Ok(relocated) => {
                self.replace_storage(relocated, None);
                Ok(())
            }
            Err((incoming, error)) => {
                source.storage = Some(incoming);
                Err(error)
            }
        }
    }

    /// Exchanges the payloads of two holders.
    ///
    /// If the allocator propagates on swap, the allocators are exchanged too. Otherwise the
    /// allocators must compare equal.
    ///
    /// # Panics
    ///
    /// Panics if the allocator does not propagate on swap and the two allocators are not
    /// equal. Neither holder is modified in that case.
    pub(crate) fn swap(&mut self, other: &mut Self) {
        if A::PROPAGATE_ON_SWAP {
            mem::swap(&mut self.alloc, &mut other.alloc);
        } else {
            assert!(
                self.alloc.equals(&other.alloc),
                "cannot swap payloads owned by unequal allocators that do not propagate on swap"
            );
        }

        mem::swap(&mut self.storage, &mut other.storage);
    }
}

impl<S: DuplicateStorage<A>, A: Allocator> Holder<S, A> {
    /// Copies `self` into a new holder that uses `alloc`.
    ///
    /// A valueless holder copies into a valueless holder.
    pub(crate) fn try_clone_in(&self, alloc: A) -> Result<Self, AllocError> {
        match &self.storage {
            None => Ok(Self::valueless(alloc)),
            Some(storage) => {
                let copy = storage.duplicate(&alloc)?;
                Ok(Self::new(copy, alloc))
            }
        }
    }

    /// Copies `self` into a new holder that uses the allocator selected for copies.
    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        self.try_clone_in(self.alloc.select_on_copy())
    }

    /// Replaces the payload of `self` with a copy of the payload of `source`.
    ///
    /// Follows the copy assignment propagation rule of the allocator. With equal allocators
    /// the payload is assigned in place where the storage supports it. Otherwise a copy is
    /// made first and only then is the old payload destroyed, so a failed or panicking copy
    /// leaves `self` unchanged.
    pub(crate) fn try_copy_assign_from(&mut self, source: &Self) -> Result<(), AllocError> {
        let equal = self.alloc.equals(&source.alloc);
        let update_alloc = A::PROPAGATE_ON_COPY_ASSIGNMENT && !equal;

        let Some(theirs) = source.storage.as_ref() else {
            self.reset();

            if update_alloc {
                self.alloc = source.alloc.clone();
            }

            return Ok(());
        };

        if equal
            && self
                .storage
                .as_mut()
                .is_some_and(|ours| ours.assign_in_place(theirs))
        {
            return Ok(());
        }

        let target_alloc = if update_alloc {
            &source.alloc
        } else {
            &self.alloc
        };

        let copy = theirs.duplicate(target_alloc)?;

        let adopted = if update_alloc {
            trace!(
                storage = type_name::<S>(),
                "adopting allocator of copy assignment source"
            );
            Some(source.alloc.clone())
        } else {
            None
        };

        self.replace_storage(copy, adopted);

        Ok(())
    }
}

impl<S: Storage<A>, A: Allocator> Drop for Holder<S, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Reports an attempt to reach the payload of a valueless wrapper.
#[cold]
#[track_caller]
pub(crate) fn panic_valueless<W: ?Sized>() -> ! {
    panic!(
        "attempted to access the payload of a valueless {}",
        type_name::<W>()
    )
}
