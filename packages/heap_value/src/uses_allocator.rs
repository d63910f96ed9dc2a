//! Allocator-aware construction of payloads.
//!
//! A payload type that itself allocates (a collection, another wrapper) can opt into
//! receiving the allocator of the wrapper that owns it by implementing [`UsesAllocator`].
//! Construction of payloads is described by [`Initializer`], which is handed the
//! allocator at the moment the payload is built inside its freshly allocated storage.

use std::fmt;

use crate::Allocator;

/// A type that can build copies of itself on a caller-chosen allocator.
///
/// This is the Rust counterpart of uses-allocator construction: when a wrapper copies or
/// relocates a payload of this type, it passes its own allocator so that the copy
/// allocates from the same memory resource as its owner.
///
/// # Examples
///
/// ```
/// use heap_value::{Global, Indirect, UsesAllocator};
///
/// #[derive(Debug, PartialEq)]
/// struct Label {
///     text: Indirect<String>,
/// }
///
/// impl UsesAllocator<Global> for Label {
///     fn clone_using(&self, alloc: &Global) -> Self {
///         Self {
///             text: self.text.clone_in(*alloc),
///         }
///     }
/// }
///
/// let label = Label {
///     text: Indirect::new("hello".to_string()),
/// };
/// let copy = label.clone_using(&Global);
/// assert_eq!(copy, label);
/// ```
pub trait UsesAllocator<A: Allocator>: Sized {
    /// Creates a copy of `self` whose own allocations come from `alloc`.
    #[must_use]
    fn clone_using(&self, alloc: &A) -> Self;

    /// Converts `self` into an equivalent value whose own allocations come from `alloc`.
    ///
    /// The default implementation copies `self` with
    /// [`clone_using()`][Self::clone_using] and drops the original.
    #[must_use]
    fn move_using(self, alloc: &A) -> Self {
        self.clone_using(alloc)
    }
}

/// Builds a value of type `T`, given the allocator that owns the storage the value is
/// being built in.
///
/// The wrappers accept any initializer in their `emplace` style constructors. The
/// provided implementations cover the common cases:
///
/// * [`Emplace`] calls a closure without arguments.
/// * [`EmplaceWithAllocator`] calls a closure with the allocator.
/// * [`MoveFrom`] moves an existing value in.
/// * [`CloneOf`] clones an existing value.
/// * [`CloneUsing`] and [`MoveUsing`] go through [`UsesAllocator`].
pub trait Initializer<T, A> {
    /// Produces the value. `alloc` is the allocator of the storage that will hold it.
    fn initialize(self, alloc: &A) -> T;
}

/// Initializer that calls a closure, ignoring the allocator.
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct Emplace<F>(pub F);

impl<T, A, F> Initializer<T, A> for Emplace<F>
where
    F: FnOnce() -> T,
{
    #[inline]
    fn initialize(self, _alloc: &A) -> T {
        (self.0)()
    }
}

impl<F> fmt::Debug for Emplace<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emplace").finish_non_exhaustive()
    }
}

/// Initializer that calls a closure with the allocator of the owning storage.
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct EmplaceWithAllocator<F>(pub F);

impl<T, A, F> Initializer<T, A> for EmplaceWithAllocator<F>
where
    F: FnOnce(&A) -> T,
{
    #[inline]
    fn initialize(self, alloc: &A) -> T {
        (self.0)(alloc)
    }
}

impl<F> fmt::Debug for EmplaceWithAllocator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmplaceWithAllocator").finish_non_exhaustive()
    }
}

/// Initializer that moves an existing value into the storage.
#[derive(Debug)]
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct MoveFrom<T>(pub T);

impl<T, A> Initializer<T, A> for MoveFrom<T> {
    #[inline]
    fn initialize(self, _alloc: &A) -> T {
        self.0
    }
}

/// Initializer that clones a borrowed value into the storage.
#[derive(Debug)]
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct CloneOf<'a, T>(pub &'a T);

impl<T: Clone, A> Initializer<T, A> for CloneOf<'_, T> {
    #[inline]
    fn initialize(self, _alloc: &A) -> T {
        self.0.clone()
    }
}

/// Initializer that copies a borrowed value onto the allocator of the storage.
#[derive(Debug)]
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct CloneUsing<'a, T>(pub &'a T);

impl<T, A> Initializer<T, A> for CloneUsing<'_, T>
where
    T: UsesAllocator<A>,
    A: Allocator,
{
    #[inline]
    fn initialize(self, alloc: &A) -> T {
        self.0.clone_using(alloc)
    }
}

/// Initializer that converts an owned value onto the allocator of the storage.
#[derive(Debug)]
#[expect(
    clippy::exhaustive_structs,
    reason = "argument pack, constructed by callers"
)]
pub struct MoveUsing<T>(pub T);

impl<T, A> Initializer<T, A> for MoveUsing<T>
where
    T: UsesAllocator<A>,
    A: Allocator,
{
    #[inline]
    fn initialize(self, alloc: &A) -> T {
        self.0.move_using(alloc)
    }
}

/// Builds a value with an initializer outside of any wrapper.
///
/// # Examples
///
/// ```
/// use heap_value::{Emplace, Global, make_using_allocator};
///
/// let value: Vec<u8> = make_using_allocator(&Global, Emplace(|| vec![1, 2, 3]));
/// assert_eq!(value, [1, 2, 3]);
/// ```
#[must_use]
#[inline]
pub fn make_using_allocator<T, A, I>(alloc: &A, init: I) -> T
where
    I: Initializer<T, A>,
{
    init.initialize(alloc)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::Global;

    #[derive(Debug, PartialEq)]
    struct Recorder {
        value: u32,
        copies: u32,
    }

    impl UsesAllocator<Global> for Recorder {
        fn clone_using(&self, _alloc: &Global) -> Self {
            Self {
                value: self.value,
                copies: self.copies.wrapping_add(1),
            }
        }
    }

    #[test]
    fn emplace_calls_closure_once() {
        let calls = Cell::new(0);
        let value: u32 = make_using_allocator(
            &Global,
            Emplace(|| {
                calls.set(calls.get() + 1);
                5
            }),
        );

        assert_eq!(value, 5);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn emplace_with_allocator_receives_allocator() {
        let value: Global = make_using_allocator(&Global, EmplaceWithAllocator(|a: &Global| *a));

        assert_eq!(value, Global);
    }

    #[test]
    fn move_from_yields_value() {
        let value: String = make_using_allocator(&Global, MoveFrom("moved".to_string()));

        assert_eq!(value, "moved");
    }

    #[test]
    fn clone_of_clones() {
        let source = vec![1, 2, 3];
        let value: Vec<i32> = make_using_allocator(&Global, CloneOf(&source));

        assert_eq!(value, source);
    }

    #[test]
    fn clone_using_goes_through_uses_allocator() {
        let source = Recorder {
            value: 9,
            copies: 0,
        };
        let value: Recorder = make_using_allocator(&Global, CloneUsing(&source));

        assert_eq!(
            value,
            Recorder {
                value: 9,
                copies: 1
            }
        );
    }

    #[test]
    fn move_using_defaults_to_clone_using() {
        let source = Recorder {
            value: 3,
            copies: 4,
        };
        let value: Recorder = make_using_allocator(&Global, MoveUsing(source));

        assert_eq!(
            value,
            Recorder {
                value: 3,
                copies: 5
            }
        );
    }

    #[test]
    fn closure_initializers_have_opaque_debug() {
        assert_eq!(format!("{:?}", Emplace(|| 1)), "Emplace { .. }");
        assert_eq!(
            format!("{:?}", EmplaceWithAllocator(|_: &Global| 1)),
            "EmplaceWithAllocator { .. }"
        );
    }
}
