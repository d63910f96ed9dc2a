/// A wrapper whose payload can be exchanged with the payload of another wrapper of the
/// same type, following the swap propagation rule of its allocator.
///
/// Implemented by [`Indirect`][crate::Indirect] and [`Polymorphic`][crate::Polymorphic] so
/// that generic code can use the free function [`swap()`].
pub trait SwapPayload {
    /// Exchanges the payloads of `self` and `other`.
    ///
    /// # Panics
    ///
    /// Panics if the allocators of the two wrappers do not compare equal and the allocator
    /// type does not propagate on swap.
    fn swap_payload(&mut self, other: &mut Self);
}

/// Exchanges the payloads of two wrappers.
///
/// Neither payload moves in memory. If the allocator type propagates on swap, the
/// allocators are exchanged as well.
///
/// # Panics
///
/// Panics if the allocators of the two wrappers do not compare equal and the allocator type
/// does not propagate on swap.
///
/// # Examples
///
/// ```
/// use heap_value::Indirect;
///
/// let mut a = Indirect::new(1);
/// let mut b = Indirect::new(2);
///
/// heap_value::swap(&mut a, &mut b);
///
/// assert_eq!(*a, 2);
/// assert_eq!(*b, 1);
/// ```
#[inline]
pub fn swap<W: SwapPayload>(a: &mut W, b: &mut W) {
    a.swap_payload(b);
}
