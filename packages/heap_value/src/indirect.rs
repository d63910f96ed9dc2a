use std::borrow::{Borrow, BorrowMut};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};

use crate::holder::{Holder, panic_valueless};
use crate::storage::Slot;
use crate::{
    AllocError, Allocator, ConstructError, Emplace, Global, Initializer, MoveFrom, SwapPayload,
    UsesAllocator,
};

/// A heap-allocated `T` with value semantics.
///
/// `Indirect` owns exactly one `T` in memory obtained from an [`Allocator`]. Cloning an
/// `Indirect` clones the `T` into a new allocation, comparing two of them compares the
/// `T`s and a shared reference to an `Indirect` only ever grants shared access to the `T`.
/// It behaves like a `T` that happens to live on the heap, which is useful for recursive
/// types, for types too large to move around cheaply and for keeping the size of an
/// enclosing type small.
///
/// # Valueless state
///
/// Operations that move the payload out of an existing wrapper ([`take()`][Self::take],
/// [`move_in()`][Self::move_in], [`move_assign_from()`][Self::move_assign_from]) leave the
/// source valueless. A valueless wrapper can be dropped, assigned to, swapped, cloned
/// (yielding another valueless wrapper) and queried with
/// [`valueless_after_move()`][Self::valueless_after_move] and [`get()`][Self::get]. Reaching
/// its payload through dereferencing, comparison, hashing or [`Display`][fmt::Display]
/// panics.
///
/// # Allocators
///
/// Copies and moves follow the propagation rules of the allocator type, see [`Allocator`].
/// When a payload has to cross between allocators that compare unequal, it is copied or
/// relocated into memory from the allocator that will own it.
///
/// # Examples
///
/// ```
/// use heap_value::Indirect;
///
/// let mut a = Indirect::new(vec![1, 2, 3]);
/// let b = a.clone();
///
/// a.push(4);
///
/// assert_eq!(*a, [1, 2, 3, 4]);
/// assert_eq!(*b, [1, 2, 3]);
/// ```
///
/// Moving the payload out leaves the source observably empty:
///
/// ```
/// use heap_value::Indirect;
///
/// let mut source = Indirect::new(String::from("payload"));
/// let target = source.take();
///
/// assert!(source.valueless_after_move());
/// assert_eq!(*target, "payload");
/// ```
pub struct Indirect<T, A: Allocator = Global> {
    holder: Holder<Slot<T>, A>,
}

impl<T> Indirect<T> {
    /// Moves `value` to the heap, using the global allocator.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn new(value: T) -> Self {
        Self::new_in(value, Global)
    }

    /// Builds a `T` directly in heap memory from the global allocator.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If `f`
    /// panics, the memory is released before the panic continues.
    #[must_use]
    #[inline]
    pub fn new_with<F>(f: F) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::new_with_in(f, Global)
    }
}

impl<T, A: Allocator> Indirect<T, A> {
    /// Moves `value` into memory from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    pub fn new_in(value: T, alloc: A) -> Self {
        Self::try_new_in(value, alloc).unwrap_or_else(|error| error.handle())
    }

    /// Moves `value` into memory from `alloc`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. The value is dropped.
    pub fn try_new_in(value: T, alloc: A) -> Result<Self, AllocError> {
        Self::try_emplace_in(MoveFrom(value), alloc)
    }

    /// Builds a `T` with `f` directly in memory from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If `f`
    /// panics, the memory is released before the panic continues.
    #[must_use]
    pub fn new_with_in<F>(f: F, alloc: A) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::emplace_in(Emplace(f), alloc)
    }

    /// Builds a `T` with any [`Initializer`] directly in memory from `alloc`.
    ///
    /// The initializer receives `alloc`, which allows allocator-aware payloads to place
    /// their own allocations on the same memory resource.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated. If the
    /// initializer panics, the memory is released before the panic continues.
    ///
    /// # Examples
    ///
    /// ```
    /// use heap_value::{EmplaceWithAllocator, Global, Indirect};
    ///
    /// let nested = Indirect::emplace_in(
    ///     EmplaceWithAllocator(|alloc: &Global| Indirect::new_in(5_u8, *alloc)),
    ///     Global,
    /// );
    ///
    /// assert_eq!(**nested, 5);
    /// ```
    #[must_use]
    pub fn emplace_in<I>(init: I, alloc: A) -> Self
    where
        I: Initializer<T, A>,
    {
        Self::try_emplace_in(init, alloc).unwrap_or_else(|error| error.handle())
    }

    /// Builds a `T` with any [`Initializer`] directly in memory from `alloc`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated. The initializer is not
    /// called in that case.
    pub fn try_emplace_in<I>(init: I, alloc: A) -> Result<Self, AllocError>
    where
        I: Initializer<T, A>,
    {
        let slot = Slot::new_in(&alloc, init)?;

        Ok(Self {
            holder: Holder::new(slot, alloc),
        })
    }

    /// Builds a `T` with a fallible initializer directly in memory from `alloc`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructError::Alloc`] if the memory cannot be allocated and
    /// [`ConstructError::Initializer`] if `f` fails. No memory stays allocated in either
    /// case.
    ///
    /// # Examples
    ///
    /// ```
    /// use heap_value::{ConstructError, Global, Indirect};
    ///
    /// let parsed = Indirect::try_new_with_in(|_| "42".parse::<u32>(), Global).unwrap();
    /// assert_eq!(*parsed, 42);
    ///
    /// let failed = Indirect::try_new_with_in(|_| "forty-two".parse::<u32>(), Global);
    /// assert!(matches!(failed, Err(ConstructError::Initializer(_))));
    /// ```
    pub fn try_new_with_in<E, F>(f: F, alloc: A) -> Result<Self, ConstructError<E>>
    where
        F: FnOnce(&A) -> Result<T, E>,
    {
        let slot = Slot::try_new_in(&alloc, f)?;

        Ok(Self {
            holder: Holder::new(slot, alloc),
        })
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
        self.holder.storage().map(Slot::as_ref)
    }

    /// The payload, or `None` if the wrapper is valueless.
    #[must_use]
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.holder.storage_mut().map(Slot::as_mut)
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
    /// Otherwise it is relocated into memory from `alloc`.
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
    /// If the allocator type propagates on move assignment and the allocators differ,
    /// `self` adopts the allocator of `source` together with its payload. If it does not
    /// propagate and the allocators differ, the payload is relocated into memory from the
    /// allocator of `self`.
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

    /// Moves the payload out of the heap and releases its memory.
    ///
    /// # Panics
    ///
    /// Panics if the wrapper is valueless.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        let Some(slot) = self.holder.take_storage() else {
            panic_valueless::<Self>()
        };

        // SAFETY: The slot was allocated by the allocator of our holder.
        unsafe { slot.into_inner(self.holder.allocator()) }
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
            Some(slot) => slot.as_mut(),
            None => panic_valueless::<Self>(),
        }
    }
}

impl<T: Clone, A: Allocator> Indirect<T, A> {
    /// Copies the payload into memory from the allocator selected by
    /// [`Allocator::select_on_copy()`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(Self {
            holder: self.holder.try_clone()?,
        })
    }

    /// Copies the payload into memory from `alloc`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    pub fn clone_in(&self, alloc: A) -> Self {
        self.try_clone_in(alloc)
            .unwrap_or_else(|error| error.handle())
    }

    /// Copies the payload into memory from `alloc`.
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
    /// With equal allocators the copy is assigned in place through [`Clone::clone_from()`],
    /// reusing the existing allocation. Otherwise the copy is made in new memory (from the
    /// allocator of `source` if the allocator type propagates on copy assignment) before the
    /// old payload is released.
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
}

impl<T: Clone, A: Allocator> Clone for Indirect<T, A> {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|error| error.handle())
    }

    fn clone_from(&mut self, source: &Self) {
        self.copy_assign_from(source);
    }
}

impl<T: Default, A: Allocator + Default> Default for Indirect<T, A> {
    fn default() -> Self {
        Self::new_with_in(T::default, A::default())
    }
}

impl<T> From<T> for Indirect<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T, A: Allocator> Deref for Indirect<T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.payload()
    }
}

impl<T, A: Allocator> DerefMut for Indirect<T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T, A: Allocator> AsRef<T> for Indirect<T, A> {
    fn as_ref(&self) -> &T {
        self.payload()
    }
}

impl<T, A: Allocator> AsMut<T> for Indirect<T, A> {
    fn as_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T, A: Allocator> Borrow<T> for Indirect<T, A> {
    fn borrow(&self) -> &T {
        self.payload()
    }
}

impl<T, A: Allocator> BorrowMut<T> for Indirect<T, A> {
    fn borrow_mut(&mut self) -> &mut T {
        self.payload_mut()
    }
}

impl<T, U, A, B> PartialEq<Indirect<U, B>> for Indirect<T, A>
where
    T: PartialEq<U>,
    A: Allocator,
    B: Allocator,
{
    fn eq(&self, other: &Indirect<U, B>) -> bool {
        self.payload() == other.payload()
    }
}

impl<T: Eq, A: Allocator> Eq for Indirect<T, A> {}

impl<T, U, A, B> PartialOrd<Indirect<U, B>> for Indirect<T, A>
where
    T: PartialOrd<U>,
    A: Allocator,
    B: Allocator,
{
    fn partial_cmp(&self, other: &Indirect<U, B>) -> Option<Ordering> {
        self.payload().partial_cmp(other.payload())
    }
}

impl<T: Ord, A: Allocator> Ord for Indirect<T, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.payload().cmp(other.payload())
    }
}

impl<T: Hash, A: Allocator> Hash for Indirect<T, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.payload().hash(state);
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for Indirect<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Indirect").field(value).finish(),
            None => f.write_str("Indirect(<valueless>)"),
        }
    }
}

impl<T: fmt::Display, A: Allocator> fmt::Display for Indirect<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.payload(), f)
    }
}

impl<T: Clone, A: Allocator> UsesAllocator<A> for Indirect<T, A> {
    fn clone_using(&self, alloc: &A) -> Self {
        self.clone_in(alloc.clone())
    }

    fn move_using(mut self, alloc: &A) -> Self {
        self.move_in(alloc.clone())
    }
}

impl<T, A: Allocator> SwapPayload for Indirect<T, A> {
    fn swap_payload(&mut self, other: &mut Self) {
        self.swap(other);
    }
}

// SAFETY: The wrapper exclusively owns its payload and allocator, so sending the wrapper
// sends exactly a `T` and an `A`.
unsafe impl<T: Send, A: Allocator + Send> Send for Indirect<T, A> {}

// SAFETY: A shared wrapper only grants shared access to the payload and the allocator.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for Indirect<T, A> {}
