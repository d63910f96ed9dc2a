//! Type-erased storage for [`Polymorphic`][crate::Polymorphic].
//!
//! Each payload lives in a [`DirectControlBlock`] allocated as a single object. The block
//! starts with a [`ControlBlock`] header that holds a pointer to the payload, already
//! converted to the view type `T`, and a table of operations generated for the concrete
//! payload type `U`. The wrapper only ever sees the header.

use std::any::type_name;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use scopeguard::ScopeGuard;

use crate::adapter::{Rebound, delete_object};
use crate::storage::{DuplicateStorage, Storage};
use crate::{AllocError, Allocator, ConstructError, Upcast, UsesAllocator};

/// How the payload of a control block is copied and moved between allocators.
///
/// Chosen when the control block is created, while the concrete payload type is known.
pub(crate) trait CopyPolicy<U, A> {
    fn copy(source: &U, alloc: &A) -> U;

    fn relocate(value: U, alloc: &A) -> U;
}

/// Copies with [`Clone`] and relocates by moving the value as is.
pub(crate) enum ByClone {}

impl<U: Clone, A> CopyPolicy<U, A> for ByClone {
    #[inline]
    fn copy(source: &U, _alloc: &A) -> U {
        source.clone()
    }

    #[inline]
    fn relocate(value: U, _alloc: &A) -> U {
        value
    }
}

/// Copies and relocates through [`UsesAllocator`], handing the payload the allocator of
/// its new block.
pub(crate) enum ByUsesAllocator {}

impl<U, A> CopyPolicy<U, A> for ByUsesAllocator
where
    U: UsesAllocator<A>,
    A: Allocator,
{
    #[inline]
    fn copy(source: &U, alloc: &A) -> U {
        source.clone_using(alloc)
    }

    #[inline]
    fn relocate(value: U, alloc: &A) -> U {
        value.move_using(alloc)
    }
}

/// Operations on the concrete payload behind a [`ControlBlock`].
struct ControlBlockOps<T: ?Sized, A> {
    destroy: unsafe fn(NonNull<ControlBlock<T, A>>, &A),
    clone: unsafe fn(NonNull<ControlBlock<T, A>>, &A) -> Result<BlockPtr<T, A>, AllocError>,
    relocate:
        unsafe fn(NonNull<ControlBlock<T, A>>, &A, &A) -> Result<BlockPtr<T, A>, AllocError>,
}

impl<T: ?Sized, A> Clone for ControlBlockOps<T, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized, A> Copy for ControlBlockOps<T, A> {}

/// The type-erased header at the start of every control block.
#[repr(C)]
pub(crate) struct ControlBlock<T: ?Sized, A> {
    value: NonNull<T>,
    ops: ControlBlockOps<T, A>,
}

/// A control block together with the concrete payload it manages.
///
/// The header is the first field of a `repr(C)` struct, so a pointer to the block is also a
/// valid pointer to the header.
#[repr(C)]
struct DirectControlBlock<T: ?Sized, U, A> {
    header: ControlBlock<T, A>,
    payload: U,
}

/// Exclusive owner of one control block.
pub(crate) struct BlockPtr<T: ?Sized, A> {
    block: NonNull<ControlBlock<T, A>>,

    _owns: PhantomData<T>,
}

impl<T: ?Sized, A: Allocator> BlockPtr<T, A> {
    /// Allocates a block for a `U` and builds the payload in it.
    pub(crate) fn new_in<U, P, F>(alloc: &A, init: F) -> Result<Self, AllocError>
    where
        U: Upcast<T>,
        P: CopyPolicy<U, A>,
        F: FnOnce(&A) -> U,
    {
        Self::try_new_in::<U, P, Infallible, _>(alloc, |alloc| Ok(init(alloc)))
            .map_err(ConstructError::into_alloc_error)
    }

    /// Allocates a block for a `U` and builds the payload in it with a fallible initializer.
    ///
    /// If the initializer fails or panics, the block is released first.
    pub(crate) fn try_new_in<U, P, E, F>(alloc: &A, init: F) -> Result<Self, ConstructError<E>>
    where
        U: Upcast<T>,
        P: CopyPolicy<U, A>,
        F: FnOnce(&A) -> Result<U, E>,
    {
        let rebound = Rebound::<DirectControlBlock<T, U, A>, A>::new(alloc);
        let block = rebound.allocate(1)?;

        let block = scopeguard::guard(block, |block| {
            // SAFETY: Allocated above for one block, the payload was never written.
            unsafe {
                rebound.deallocate(block, 1);
            }
        });

        let payload = init(alloc).map_err(ConstructError::Initializer)?;

        // SAFETY: The block is a fresh allocation for one `DirectControlBlock<T, U, A>`.
        unsafe {
            payload_ptr(*block).write(payload);
        }

        let block = ScopeGuard::into_inner(block);

        // SAFETY: The payload was written above.
        Ok(unsafe { Self::install::<U, P>(block) })
    }

    /// Writes the header of a block whose payload is already in place.
    ///
    /// # Safety
    ///
    /// `block` must be an allocation for one `DirectControlBlock<T, U, A>` with a live
    /// payload and no header yet.
    unsafe fn install<U, P>(block: NonNull<DirectControlBlock<T, U, A>>) -> Self
    where
        U: Upcast<T>,
        P: CopyPolicy<U, A>,
    {
        let value = U::upcast(payload_ptr(block));

        let header = ControlBlock {
            value,
            ops: ControlBlockOps {
                destroy: destroy_block::<T, U, A>,
                clone: clone_block::<T, U, A, P>,
                relocate: relocate_block::<T, U, A, P>,
            },
        };

        // SAFETY: The header field is valid for writes and holds nothing yet. Writing it
        // through the block pointer leaves the payload untouched.
        unsafe {
            header_ptr(block).write(header);
        }

        Self::from_block(block.cast())
    }

    fn from_block(block: NonNull<ControlBlock<T, A>>) -> Self {
        Self {
            block,
            _owns: PhantomData,
        }
    }

    fn ops(&self) -> ControlBlockOps<T, A> {
        // SAFETY: We own a block with an installed header.
        unsafe { self.block.as_ref().ops }
    }

    fn value(&self) -> NonNull<T> {
        // SAFETY: We own a block with an installed header.
        unsafe { self.block.as_ref().value }
    }

    #[inline]
    pub(crate) fn as_ref(&self) -> &T {
        // SAFETY: The header points at the live payload of our block, and the shared
        // borrow of `self` prevents mutable access for the lifetime of the reference.
        unsafe { self.value().as_ref() }
    }

    #[inline]
    pub(crate) fn as_mut(&mut self) -> &mut T {
        // SAFETY: The header points at the live payload of our block, and the exclusive
        // borrow of `self` guarantees no other access for the lifetime of the reference.
        unsafe { self.value().as_mut() }
    }
}

impl<T: ?Sized, A: Allocator> Storage<A> for BlockPtr<T, A> {
    unsafe fn destroy(self, alloc: &A) {
        let destroy = self.ops().destroy;

        // SAFETY: The operation was generated for the concrete type of this block and the
        // caller guarantees the allocator.
        unsafe {
            destroy(self.block, alloc);
        }
    }

    unsafe fn relocate(self, from: &A, to: &A) -> Result<Self, (Self, AllocError)> {
        let relocate = self.ops().relocate;

        // SAFETY: The operation was generated for the concrete type of this block and the
        // caller guarantees the source allocator. It only fails before touching the block.
        match unsafe { relocate(self.block, from, to) } {
            Ok(relocated) => Ok(relocated),
            Err(error) => Err((self, error)),
        }
    }
}

impl<T: ?Sized, A: Allocator> DuplicateStorage<A> for BlockPtr<T, A> {
    fn duplicate(&self, alloc: &A) -> Result<Self, AllocError> {
        let clone = self.ops().clone;

        // SAFETY: The operation was generated for the concrete type of this block, which
        // we own.
        unsafe { clone(self.block, alloc) }
    }

    fn assign_in_place(&mut self, _source: &Self) -> bool {
        // The two payloads may have different concrete types.
        false
    }
}

impl<T: ?Sized, A> fmt::Debug for BlockPtr<T, A> {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only, not observable by the wrappers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("block", &self.block)
            .finish()
    }
}

/// Pointer to the header field of a block, without creating a reference to the block.
fn header_ptr<T: ?Sized, U, A>(
    block: NonNull<DirectControlBlock<T, U, A>>,
) -> NonNull<ControlBlock<T, A>> {
    let block = block.as_ptr();

    // SAFETY: Only computes an address inside the allocation. No memory is accessed.
    let header = unsafe { &raw mut (*block).header };

    // SAFETY: Field projection of a non-null pointer stays non-null.
    unsafe { NonNull::new_unchecked(header) }
}

/// Pointer to the payload field of a block, without creating a reference to the block.
fn payload_ptr<T: ?Sized, U, A>(block: NonNull<DirectControlBlock<T, U, A>>) -> NonNull<U> {
    let block = block.as_ptr();

    // SAFETY: Only computes an address inside the allocation. No memory is accessed.
    let payload = unsafe { &raw mut (*block).payload };

    // SAFETY: Field projection of a non-null pointer stays non-null.
    unsafe { NonNull::new_unchecked(payload) }
}

unsafe fn destroy_block<T: ?Sized, U, A: Allocator>(block: NonNull<ControlBlock<T, A>>, alloc: &A) {
    // SAFETY: This function is only installed in blocks with a `U` payload, which were
    // allocated as a whole `DirectControlBlock`. The caller guarantees the allocator.
    unsafe {
        delete_object(alloc, block.cast::<DirectControlBlock<T, U, A>>());
    }
}

unsafe fn clone_block<T, U, A, P>(
    block: NonNull<ControlBlock<T, A>>,
    alloc: &A,
) -> Result<BlockPtr<T, A>, AllocError>
where
    T: ?Sized,
    U: Upcast<T>,
    A: Allocator,
    P: CopyPolicy<U, A>,
{
    // SAFETY: This function is only installed in blocks with a live `U` payload. The
    // reference does not outlive the call and only shared access happens meanwhile.
    let source = unsafe { payload_ptr(block.cast::<DirectControlBlock<T, U, A>>()).as_ref() };

    BlockPtr::new_in::<U, P, _>(alloc, |alloc| P::copy(source, alloc))
}

unsafe fn relocate_block<T, U, A, P>(
    block: NonNull<ControlBlock<T, A>>,
    from: &A,
    to: &A,
) -> Result<BlockPtr<T, A>, AllocError>
where
    T: ?Sized,
    U: Upcast<T>,
    A: Allocator,
    P: CopyPolicy<U, A>,
{
    let block = block.cast::<DirectControlBlock<T, U, A>>();

    let target_rebound = Rebound::<DirectControlBlock<T, U, A>, A>::new(to);
    let target = target_rebound.allocate(1)?;

    let target = scopeguard::guard(target, |target| {
        // SAFETY: Allocated above for one block, the payload was never written.
        unsafe {
            target_rebound.deallocate(target, 1);
        }
    });

    // From here on the source block is released no matter how we leave this function.
    let source_rebound = Rebound::<DirectControlBlock<T, U, A>, A>::new(from);
    let _release_source = scopeguard::guard((), |()| {
        // SAFETY: The caller guarantees `from` made the source block. Its payload has been
        // moved out by the time this runs.
        unsafe {
            source_rebound.deallocate(block, 1);
        }
    });

    // SAFETY: The source payload is live. It is read exactly once and the source block
    // is released without dropping it.
    let payload = unsafe { payload_ptr(block).read() };
    let payload = P::relocate(payload, to);

    // SAFETY: The target is a fresh allocation for one block.
    unsafe {
        payload_ptr(*target).write(payload);
    }

    let target = ScopeGuard::into_inner(target);

    // SAFETY: The payload was written above.
    Ok(unsafe { BlockPtr::install::<U, P>(target) })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::fmt::Display;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use super::*;
    use crate::{Global, impl_upcast};

    #[derive(Clone)]
    struct Noisy {
        drops: Rc<Cell<usize>>,
        label: &'static str,
    }

    impl Drop for Noisy {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    impl Display for Noisy {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label)
        }
    }

    impl_upcast!(Noisy => dyn Display);

    #[derive(Clone)]
    struct Label(&'static str);

    impl Display for Label {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl_upcast!(Label => dyn Display);

    fn noisy_block(drops: &Rc<Cell<usize>>, label: &'static str) -> BlockPtr<dyn Display, Global> {
        let drops = Rc::clone(drops);
        BlockPtr::new_in::<Noisy, ByClone, _>(&Global, move |_| Noisy { drops, label }).unwrap()
    }

    #[test]
    fn header_points_at_payload() {
        let drops = Rc::new(Cell::new(0));
        let block = noisy_block(&drops, "first");

        assert_eq!(block.as_ref().to_string(), "first");

        // SAFETY: Created with the global allocator.
        unsafe {
            block.destroy(&Global);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn duplicate_clones_concrete_payload() {
        let drops = Rc::new(Cell::new(0));
        let block = noisy_block(&drops, "cloned");

        let copy = block.duplicate(&Global).unwrap();

        assert_eq!(copy.as_ref().to_string(), "cloned");
        assert_ne!(block.value().cast::<u8>(), copy.value().cast::<u8>());

        // SAFETY: Created with the global allocator.
        unsafe {
            block.destroy(&Global);
        }
        // SAFETY: Created with the global allocator.
        unsafe {
            copy.destroy(&Global);
        }
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn relocate_moves_without_dropping() {
        let drops = Rc::new(Cell::new(0));
        let block = noisy_block(&drops, "relocated");

        // SAFETY: Created with the global allocator.
        let relocated = unsafe { block.relocate(&Global, &Global) }
            .map_err(|(_, error)| error)
            .unwrap();

        assert_eq!(drops.get(), 0);
        assert_eq!(relocated.as_ref().to_string(), "relocated");

        // SAFETY: Relocated into the global allocator.
        unsafe {
            relocated.destroy(&Global);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn panicking_initializer_leaves_nothing_behind() {
        let result = catch_unwind(AssertUnwindSafe(|| {
            BlockPtr::<dyn Display, Global>::new_in::<Label, ByClone, _>(&Global, |_| {
                panic!("payload construction failed")
            })
        }));

        assert!(result.is_err());
    }

    #[test]
    fn failing_initializer_reports_error() {
        let result = BlockPtr::<dyn Display, Global>::try_new_in::<Label, ByClone, _, _>(
            &Global,
            |_| Err("no"),
        );

        assert!(matches!(result, Err(ConstructError::Initializer("no"))));
    }

    #[test]
    fn zero_sized_payload_gets_a_real_block() {
        #[derive(Clone, Copy)]
        struct Unit;

        impl Display for Unit {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("unit")
            }
        }

        impl_upcast!(Unit => dyn Display);

        let block = BlockPtr::<dyn Display, Global>::new_in::<Unit, ByClone, _>(&Global, |_| Unit)
            .unwrap();

        assert_eq!(block.as_ref().to_string(), "unit");

        // SAFETY: Created with the global allocator.
        unsafe {
            block.destroy(&Global);
        }
    }
}
