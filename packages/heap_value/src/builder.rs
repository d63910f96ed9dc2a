use crate::{AllocError, Allocator, Global, Indirect, Polymorphic, Upcast, UsesAllocator};

/// Builder for creating [`Indirect`] and [`Polymorphic`] wrappers that share one allocator
/// configuration.
///
/// The allocator defaults to [`Global`]. Use [`allocator()`][Self::allocator] to pick
/// another one, then finish with one of the wrapper-producing methods. The builder is
/// cheap to clone when several wrappers need the same configuration.
///
/// # Examples
///
/// ```
/// use heap_value::ValueBuilder;
///
/// let value = ValueBuilder::new().indirect(String::from("configured"));
///
/// assert_eq!(*value, "configured");
/// ```
///
/// Building a trait object:
///
/// ```
/// use std::fmt::Display;
///
/// use heap_value::{Global, Polymorphic, impl_upcast};
///
/// #[derive(Clone)]
/// struct Port(u16);
///
/// impl Display for Port {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, ":{}", self.0)
///     }
/// }
///
/// impl_upcast!(Port => dyn Display);
///
/// let value: Polymorphic<dyn Display> = heap_value::builder()
///     .allocator(Global)
///     .polymorphic(Port(8080));
///
/// assert_eq!(value.to_string(), ":8080");
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct ValueBuilder<A: Allocator = Global> {
    alloc: A,
}

impl ValueBuilder {
    /// Creates a builder that uses the [`Global`] allocator.
    #[inline]
    pub fn new() -> Self {
        Self { alloc: Global }
    }
}

impl Default for ValueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> ValueBuilder<A> {
    /// Sets the allocator that the built wrappers will own.
    ///
    /// # Examples
    ///
    /// ```
    /// use heap_value::{Global, ValueBuilder};
    ///
    /// let value = ValueBuilder::new().allocator(Global).indirect(1_u8);
    /// assert_eq!(*value.allocator(), Global);
    /// ```
    #[inline]
    pub fn allocator<B: Allocator>(self, alloc: B) -> ValueBuilder<B> {
        ValueBuilder { alloc }
    }

    /// Builds an [`Indirect`] that owns `value`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn indirect<T>(self, value: T) -> Indirect<T, A> {
        Indirect::new_in(value, self.alloc)
    }

    /// Builds an [`Indirect`] whose payload is created by `f` directly in heap memory.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn indirect_with<T, F>(self, f: F) -> Indirect<T, A>
    where
        F: FnOnce() -> T,
    {
        Indirect::new_with_in(f, self.alloc)
    }

    /// Builds an [`Indirect`] that owns `value`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated.
    #[inline]
    pub fn try_indirect<T>(self, value: T) -> Result<Indirect<T, A>, AllocError> {
        Indirect::try_new_in(value, self.alloc)
    }

    /// Builds a [`Polymorphic`] that owns `value` and exposes it as a `T`.
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn polymorphic<T, U>(self, value: U) -> Polymorphic<T, A>
    where
        T: ?Sized,
        U: Upcast<T> + Clone,
    {
        Polymorphic::new_in(value, self.alloc)
    }

    /// Builds a [`Polymorphic`] that owns `value` and exposes it as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the memory cannot be allocated.
    #[inline]
    pub fn try_polymorphic<T, U>(self, value: U) -> Result<Polymorphic<T, A>, AllocError>
    where
        T: ?Sized,
        U: Upcast<T> + Clone,
    {
        Polymorphic::try_new_in(value, self.alloc)
    }

    /// Builds a [`Polymorphic`] around an allocator-aware payload.
    ///
    /// See [`Polymorphic::new_uses_allocator_in()`].
    ///
    /// # Panics
    ///
    /// Calls [`std::alloc::handle_alloc_error()`] if the memory cannot be allocated.
    #[must_use]
    #[inline]
    pub fn polymorphic_uses_allocator<T, U>(self, value: U) -> Polymorphic<T, A>
    where
        T: ?Sized,
        U: Upcast<T> + UsesAllocator<A>,
    {
        Polymorphic::new_uses_allocator_in(value, self.alloc)
    }
}

/// Creates a [`ValueBuilder`] that uses the [`Global`] allocator.
#[inline]
pub fn builder() -> ValueBuilder {
    ValueBuilder::new()
}
