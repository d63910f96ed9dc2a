use std::borrow::{Borrow, BorrowMut};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::control_block::{BlockPtr, ByClone, ByUsesAllocator};
use crate::holder::{Holder, panic_valueless};
use crate::{
    AllocError, Allocator, ConstructError, Global, Initializer, SwapPayload, UsesAllocator,
};

/// Converts a pointer to a concrete payload type into a pointer to the view type `T` that
/// a [`Polymorphic<T>`] exposes.
///
/// Every type is its own view. For trait objects, use [`impl_upcast!`][crate::impl_upcast]
/// to generate the unsizing conversions:
///
/// ```
/// use std::fmt::Display;
///
/// use heap_value::{Polymorphic, impl_upcast};
///
/// #[derive(Clone)]
/// struct Celsius(f64);
///
/// impl Display for Celsius {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{} °C", self.0)
///     }
/// }
///
/// impl_upcast!(Celsius => dyn Display);
///
/// let reading: Polymorphic<dyn Display> = Polymorphic::new(Celsius(21.5));
/// assert_eq!(reading.to_string(), "21.5 °C");
/// ```
///
/// # Safety
///
/// The returned pointer must be derived from `ptr` and point to the same object, so that
/// the view remains valid for exactly as long as the payload. `T` must not implement
/// [`Send`] or [`Sync`] unless `Self` does. Identity and unsizing coercions satisfy both.
pub unsafe trait Upcast<T: ?Sized> {
    /// Returns a pointer to the same object, viewed as a `T`.
    fn upcast(ptr: NonNull<Self>) -> NonNull<T>;
}

// SAFETY: Identity conversion.
unsafe impl<T> Upcast<T> for T {
    #[inline]
    fn upcast(ptr: NonNull<Self>) -> NonNull<T> {
        ptr
    }
}

/// Implements [`Upcast`] from a concrete type to one or more unsized views of it, typically
/// trait objects.
///
/// The conversion is an unsizing coercion, so the macro only compiles for targets the
/// source type can actually coerce to.
///
/// # Examples
///
/// ```
/// use std::fmt::{Debug, Display};
///
/// use heap_value::impl_upcast;
///
/// #[derive(Clone, Debug)]
/// struct Meters(u32);
///
/// impl Display for Meters {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{} m", self.0)
///     }
/// }
///
/// impl_upcast!(Meters => dyn Display, dyn Debug);
/// ```
#[macro_export]
macro_rules! impl_upcast {
    ($source:ty => $($target:ty),+ $(,)?) => {
        $(
            // SAFETY: An unsizing coercion keeps pointing at the same object.
            unsafe impl $crate::Upcast<$target> for $source {
                #[inline]
                fn upcast(ptr: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$target> {
                    ptr
                }
            }
        )+
    };
}

/// A heap-allocated object of any type that can be viewed as a `T`, with value semantics.
///
/// `Polymorphic` owns one object of a concrete type `U` chosen at construction time and
/// exposes it as a `T`, usually a trait object. Unlike `Box<dyn Trait>`, a `Polymorphic`
/// can be cloned: the concrete type is remembered in a control block allocated together
/// with the object, so a clone copies the full `U` even though the wrapper only knows `T`.
/// `T` itself needs no cloning support.
///
/// Everything else works like [`Indirect`][crate::Indirect]: a shared reference only grants
/// shared access, operations that move the payload out leave the source valueless, and
/// copies and moves follow the propagation rules of the [`Allocator`].
///
/// # Examples
///
/// ```
/// use heap_value::{Polymorphic, impl_upcast};
///
/// trait Shape {
///     fn area(&self) -> f64;
///     fn scale(&mut self, factor: f64);
/// }
///
/// #[derive(Clone)]
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
///
///     fn scale(&mut self, factor: f64) {
///         self.0 *= factor;
///     }
/// }
///
/// impl_upcast!(Square => dyn Shape);
///
/// let mut original: Polymorphic<dyn Shape> = Polymorphic::new(Square(2.0));
/// let copy = original.clone();
///
/// original.scale(2.0);
///
/// assert_eq!(original.area(), 16.0);
/// assert_eq!(copy.area(), 4.0);
/// ```
pub struct Polymorphic<T: ?Sized, A: Allocator = Global> {
    holder: Holder<BlockPtr<T, A>, A>,
}

impl<T: ?Sized> Polymorphic<T> {
    /// Moves `value` to the heap, using the global allocator, and exposes it as a `T`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn new<U>(value: U) -> Self
    where
        U: Upcast<T> + Clone,
    {
        Self::new_in(value, Global)
    }
}

impl<T: ?Sized, A: Allocator> Polymorphic<T, A> {
    /// Moves `value` into memory from `alloc` and exposes it as a `T`.
    ///
    /// Copies of the wrapper clone the `U` with [`Clone`].
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    pub fn new_in<U>(value: U, alloc: A) -> Self
    where
        U: Upcast<T> + Clone,
    {
        Self::try_new_in(value, alloc).unwrap_or_else(|error| error.handle())
    }

    /// Moves `value` into memory from `alloc` and exposes it as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. The value is dropped.
    pub fn try_new_in<U>(value: U, alloc: A) -> Result<Self, AllocError>
    where
        U: Upcast<T> + Clone,
    {
        let block = BlockPtr::new_in::<U, ByClone, _>(&alloc, |_| value)?;

        Ok(Self::from_parts(block, alloc))
    }

    /// Builds a `U` with `f` directly in memory from `alloc` and exposes it as a `T`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If `f`
    /// panics, the memory is released before the panic continues.
    #[must_use]
    pub fn new_with_in<U, F>(f: F, alloc: A) -> Self
    where
        U: Upcast<T> + Clone,
        F: FnOnce() -> U,
    {
        let block = BlockPtr::new_in::<U, ByClone, _>(&alloc, |_| f())
            .unwrap_or_else(|error| error.handle());

        Self::from_parts(block, alloc)
    }

    /// Builds a `U` with any [`Initializer`] directly in memory from `alloc` and exposes it
    /// as a `T`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If the
    /// initializer panics, the memory is released before the panic continues.
    #[must_use]
    pub fn emplace_in<U, I>(init: I, alloc: A) -> Self
    where
        U: Upcast<T> + Clone,
        I: Initializer<U, A>,
    {
        Self::try_emplace_in(init, alloc).unwrap_or_else(|error| error.handle())
    }

    /// Builds a `U` with any [`Initializer`] directly in memory from `alloc` and exposes it
    /// as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. The initializer is not
    /// called in that case.
    pub fn try_emplace_in<U, I>(init: I, alloc: A) -> Result<Self, AllocError>
    where
        U: Upcast<T> + Clone,
        I: Initializer<U, A>,
    {
        let block = BlockPtr::new_in::<U, ByClone, _>(&alloc, |alloc| init.initialize(alloc))?;

        Ok(Self::from_parts(block, alloc))
    }

    /// Builds a `U` with a fallible initializer directly in memory from `alloc` and exposes
    /// it as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructError::Alloc`] if the memory cannot be allocated and
    /// [`ConstructError::Initializer`] if `f` fails. No memory stays allocated in either
    /// case.
    pub fn try_new_with_in<U, E, F>(f: F, alloc: A) -> Result<Self, ConstructError<E>>
    where
        U: Upcast<T> + Clone,
        F: FnOnce(&A) -> Result<U, E>,
    {
        let block = BlockPtr::try_new_in::<U, ByClone, E, _>(&alloc, f)?;

        Ok(Self::from_parts(block, alloc))
    }

    /// Moves `value` into memory from `alloc` as an allocator-aware payload.
    ///
    /// The value is first converted onto `alloc` with [`UsesAllocator::move_using()`].
    /// Copies of the wrapper are made with [`UsesAllocator::clone_using()`] on the
    /// allocator of the copy, and relocations to another allocator with
    /// [`UsesAllocator::move_using()`]. `U` does not need to implement [`Clone`].
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    pub fn new_uses_allocator_in<U>(value: U, alloc: A) -> Self
    where
        U: Upcast<T> + UsesAllocator<A>,
    {
        Self::try_new_uses_allocator_in(value, alloc).unwrap_or_else(|error| error.handle())
    }

    /// Moves `value` into memory from `alloc` as an allocator-aware payload.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. The value is dropped.
    pub fn try_new_uses_allocator_in<U>(value: U, alloc: A) -> Result<Self, AllocError>
    where
        U: Upcast<T> + UsesAllocator<A>,
    {
        let block = BlockPtr::new_in::<U, ByUsesAllocator, _>(&alloc, |alloc| {
            value.move_using(alloc)
        })?;

        Ok(Self::from_parts(block, alloc))
    }

    /// Builds an allocator-aware `U` with any [`Initializer`] directly in memory from
    /// `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If the
    /// initializer panics, the memory is released before the panic continues.
    #[must_use]
    pub fn emplace_uses_allocator_in<U, I>(init: I, alloc: A) -> Self
    where
        U: Upcast<T> + UsesAllocator<A>,
        I: Initializer<U, A>,
    {
        let block =
            BlockPtr::new_in::<U, ByUsesAllocator, _>(&alloc, |alloc| init.initialize(alloc))
                .unwrap_or_else(|error| error.handle());

        Self::from_parts(block, alloc)
    }

    fn from_parts(block: BlockPtr<T, A>, alloc: A) -> Self {
        Self {
            holder: Holder::new(block, alloc),
        }
    }

    /// Whether the payload has been moved out of this wrapper.
    #[must_use]
    #[inline]
    pub fn valueless_after_move(&self) -> bool {
        self.holder.is_valueless()
    }

    /// The allocator that owns the payload memory.
    #[must_use]
    #[inline]
    pub fn allocator(&self) -> &A {
        self.holder.allocator()
    }

    /// The payload, or `None` if the wrapper is valueless.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.holder.storage().map(BlockPtr::as_ref)
    }

    /// The payload, or `None` if the wrapper is valueless.
    #[must_use]
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.holder.storage_mut().map(BlockPtr::as_mut)
    }

    /// Moves the payload into a new wrapper that shares the allocator of `self`, leaving
    /// `self` valueless.
    ///
    /// Never allocates. The payload keeps its address.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            holder: self.holder.take(),
        }
    }

    /// Moves the payload into a new wrapper that uses `alloc`, leaving `self` valueless.
    ///
    /// If `alloc` compares equal to the current allocator, the payload keeps its address.
    /// Otherwise the concrete payload is relocated into a new control block from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if relocation memory cannot be allocated.
    #[must_use]
    pub fn move_in(&mut self, alloc: A) -> Self {
        self.try_move_in(alloc).unwrap_or_else(|error| error.handle())
    }

    /// Moves the payload into a new wrapper that uses `alloc`, leaving `self` valueless.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if relocation memory cannot be allocated. `self` keeps its
    /// payload in that case.
    pub fn try_move_in(&mut self, alloc: A) -> Result<Self, AllocError> {
        Ok(Self {
            holder: self.holder.try_move_in(alloc)?,
        })
    }

    /// Replaces the payload of `self` with the payload of `source`, leaving `source`
    /// valueless.
    ///
    /// The concrete type of the payload may change. Allocators are handled as for
    /// [`Indirect::move_assign_from()`][crate::Indirect::move_assign_from].
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if relocation memory cannot be allocated.
    pub fn move_assign_from(&mut self, source: &mut Self) {
        self.try_move_assign_from(source)
            .unwrap_or_else(|error| error.handle());
    }

    /// Replaces the payload of `self` with the payload of `source`, leaving `source`
    /// valueless.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if relocation memory cannot be allocated. Neither wrapper is
    /// modified in that case.
    pub fn try_move_assign_from(&mut self, source: &mut Self) -> Result<(), AllocError> {
        self.holder.try_move_assign_from(&mut source.holder)
    }

    /// Copies the payload, with its concrete type, into memory from the allocator selected
    /// by [`Allocator::select_on_copy()`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(Self {
            holder: self.holder.try_clone()?,
        })
    }

    /// Copies the payload, with its concrete type, into memory from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    pub fn clone_in(&self, alloc: A) -> Self {
        self.try_clone_in(alloc)
            .unwrap_or_else(|error| error.handle())
    }

    /// Copies the payload, with its concrete type, into memory from `alloc`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated.
    pub fn try_clone_in(&self, alloc: A) -> Result<Self, AllocError> {
        Ok(Self {
            holder: self.holder.try_clone_in(alloc)?,
        })
    }

    /// Replaces the payload of `self` with a copy of the payload of `source`.
    ///
    /// The copy is always made in new memory because the concrete types of the two
    /// payloads may differ. The old payload is released only after the copy succeeded.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    pub fn copy_assign_from(&mut self, source: &Self) {
        self.try_copy_assign_from(source)
            .unwrap_or_else(|error| error.handle());
    }

    /// Replaces the payload of `self` with a copy of the payload of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. `self` is unchanged in that
    /// case.
    pub fn try_copy_assign_from(&mut self, source: &Self) -> Result<(), AllocError> {
        self.holder.try_copy_assign_from(&source.holder)
    }

    /// Exchanges the payloads of two wrappers.
    ///
    /// Never allocates and never moves either payload in memory.
    ///
    /// # Panics
    ///
    /// Panics if the allocator type does not propagate on swap and the allocators of the
    /// two wrappers are not equal.
    pub fn swap(&mut self, other: &mut Self) {
        self.holder.swap(&mut other.holder);
    }

    #[inline]
    #[track_caller]
    fn payload(&self) -> &T {
        self.get().unwrap_or_else(|| panic_valueless::<Self>())
    }

    #[inline]
    #[track_caller]
    fn payload_mut(&mut self) -> &mut T {
        match self.holder.storage_mut() {
            Some(block) => block.as_mut(),
            None => panic_valueless::<Self>(),
        }
    }
}

impl<T: ?Sized, A: Allocator> Clone for Polymorphic<T, A> {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|error| error.handle())
    }

    fn clone_from(&mut self, source: &Self) {
        self.copy_assign_from(source);
    }
}

impl<T, A> Default for Polymorphic<T, A>
where
    T: Default + Clone,
    A: Allocator + Default,
{
    fn default() -> Self {
        Self::new_with_in(T::default, A::default())
    }
}

impl<T: ?Sized, A: Allocator> Deref for Polymorphic<T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.payload()
    }
}

impl<T: ?Sized, A: Allocator> DerefMut for Polymorphic<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T: ?Sized, A: Allocator> AsRef<T> for Polymorphic<T, A> {
    fn as_ref(&self) -> &T {
        self.payload()
    }
}

impl<T: ?Sized, A: Allocator> AsMut<T> for Polymorphic<T, A> {
    fn as_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T: ?Sized, A: Allocator> Borrow<T> for Polymorphic<T, A> {
    fn borrow(&self) -> &T {
        self.payload()
    }
}

impl<T: ?Sized, A: Allocator> BorrowMut<T> for Polymorphic<T, A> {
    fn borrow_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T, U, A, B> PartialEq<Polymorphic<U, B>> for Polymorphic<T, A>
where
    T: ?Sized + PartialEq<U>,
    U: ?Sized,
    A: Allocator,
    B: Allocator,
{
    fn eq(&self, other: &Polymorphic<U, B>) -> bool {
        self.payload() == other.payload()
    }
}

impl<T: ?Sized + Eq, A: Allocator> Eq for Polymorphic<T, A> {}

impl<T, U, A, B> PartialOrd<Polymorphic<U, B>> for Polymorphic<T, A>
where
    T: ?Sized + PartialOrd<U>,
    U: ?Sized,
    A: Allocator,
    B: Allocator,
{
    fn partial_cmp(&self, other: &Polymorphic<U, B>) -> Option<Ordering> {
        self.payload().partial_cmp(other.payload())
    }
}

impl<T: ?Sized + Ord, A: Allocator> Ord for Polymorphic<T, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.payload().cmp(other.payload())
    }
}

impl<T: ?Sized + Hash, A: Allocator> Hash for Polymorphic<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload().hash(state);
    }
}

impl<T: ?Sized + fmt::Debug, A: Allocator> fmt::Debug for Polymorphic<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Polymorphic").field(&value).finish(),
            None => f.write_str("Polymorphic(<valueless>)"),
        }
    }
}

impl<T: ?Sized + fmt::Display, A: Allocator> fmt::Display for Polymorphic<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.payload(), f)
    }
}

impl<T: ?Sized, A: Allocator> UsesAllocator<A> for Polymorphic<T, A> {
    fn clone_using(&self, alloc: &A) -> Self {
        self.clone_in(alloc.clone())
    }

    fn move_using(mut self, alloc: &A) -> Self {
        self.move_in(alloc.clone())
    }
}

impl<T: ?Sized, A: Allocator> SwapPayload for Polymorphic<T, A> {
    fn swap_payload(&mut self, other: &mut Self) {
        self.swap(other);
    }
}

// SAFETY: The wrapper exclusively owns its payload and allocator. The payload can only be
// built from a `U` that coerces to `T`, so `T: Send` implies the concrete payload is
// `Send` as well.
unsafe impl<T: ?Sized + Send, A: Allocator + Send> Send for Polymorphic<T, A> {}

// SAFETY: A shared wrapper only grants shared access to the payload (including cloning it
// through a shared reference) and to the allocator. `T: Sync` implies the concrete payload
// is `Sync` as well.
unsafe impl<T: ?Sized + Sync, A: Allocator + Sync> Sync for Polymorphic<T, A> {}
