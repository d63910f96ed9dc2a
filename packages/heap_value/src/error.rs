use std::alloc::{Layout, handle_alloc_error};
use std::convert::Infallible;

use thiserror::Error;

/// An allocator was unable to provide memory for a payload.
///
/// The infallible constructors and copy operations of [`Indirect`][crate::Indirect] and
/// [`Polymorphic`][crate::Polymorphic] turn this into a call to
/// [`std::alloc::handle_alloc_error()`]. The `try_*` family of methods returns it instead.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum AllocError {
    /// The allocator refused to provide a block of memory with the given layout.
    #[error("allocator could not provide {} bytes aligned to {}", .layout.size(), .layout.align())]
    Exhausted {
        /// The layout of the memory block that was requested.
        layout: Layout,
    },

    /// The size of the requested memory block does not fit into the address space.
    #[error("requested capacity exceeds the maximum allocation size")]
    CapacityOverflow,
}

impl AllocError {
    /// Creates an error describing a failed request for a memory block with `layout`.
    ///
    /// Custom [`Allocator`][crate::Allocator] implementations return this from
    /// [`allocate()`][crate::Allocator::allocate] when they cannot satisfy a request.
    #[must_use]
    #[inline]
    pub fn exhausted(layout: Layout) -> Self {
        Self::Exhausted { layout }
    }

    /// The layout of the memory block that could not be provided, if the request
    /// got far enough to have one.
    #[must_use]
    #[inline]
    pub fn layout(&self) -> Option<Layout> {
        match self {
            Self::Exhausted { layout } => Some(*layout),
            Self::CapacityOverflow => None,
        }
    }

    /// Reports the failure the same way the standard library collections do.
    #[cold]
    #[track_caller]
    pub(crate) fn handle(self) -> ! {
        match self {
            Self::Exhausted { layout } => handle_alloc_error(layout),
            Self::CapacityOverflow => panic!("capacity overflow"),
        }
    }
}

/// Construction of a payload through a fallible initializer failed.
///
/// Whatever memory was obtained for the payload has already been returned to the
/// allocator by the time the caller sees this error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConstructError<E> {
    /// No memory could be obtained for the payload. The initializer was never called.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// The initializer itself reported failure.
    #[error("payload initializer failed")]
    Initializer(#[source] E),
}

impl<E> ConstructError<E> {
    /// Returns the error reported by the initializer, if that is what failed.
    #[must_use]
    pub fn into_initializer_error(self) -> Option<E> {
        match self {
            Self::Alloc(_) => None,
            Self::Initializer(error) => Some(error),
        }
    }
}

impl ConstructError<Infallible> {
    pub(crate) fn into_alloc_error(self) -> AllocError {
        match self {
            Self::Alloc(error) => error,
            Self::Initializer(never) => match never {},
        }
    }
}
