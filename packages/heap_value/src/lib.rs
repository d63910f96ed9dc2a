//! Heap-allocated values with value semantics and pluggable allocators.
//!
//! This crate provides two owning wrappers that keep their payload on the heap but behave like
//! the payload itself when copied, compared or hashed:
//!
//! - [`Indirect<T>`] owns exactly one `T`. Cloning the wrapper clones the `T` into fresh
//!   memory. Useful for recursive types, large values that should be cheap to move and
//!   members whose size should not affect the size of the containing type.
//! - [`Polymorphic<T>`] owns one object of any type that can be viewed as a `T` (typically a
//!   trait object). Cloning the wrapper clones the full concrete object, even though the
//!   wrapper only knows it as a `T`.
//!
//! # Key Features
//!
//! - **Deep copies**: cloning and copy-assignment duplicate the payload, never share it
//! - **Const propagation**: a shared reference to the wrapper only grants shared access to
//!   the payload
//! - **Custom allocators**: every wrapper owns an [`Allocator`], defaulting to [`Global`]
//! - **Allocator propagation**: copies, moves and swaps follow the propagation flags of the
//!   allocator type
//! - **Valueless after move**: operations that move the payload out of a wrapper leave it in
//!   a detectable [`valueless_after_move()`][Indirect::valueless_after_move] state
//! - **Uses-allocator construction**: payloads that implement [`UsesAllocator`] are built and
//!   copied on the allocator of their wrapper
//! - **Fallible variants**: every allocating operation has a `try_` form that returns
//!   [`AllocError`] and leaves all values unchanged on failure
//!
//! # Examples
//!
//! ## Value semantics on the heap
//!
//! ```rust
//! use heap_value::Indirect;
//!
//! let mut original = Indirect::new(vec![1, 2, 3]);
//! let copy = original.clone();
//!
//! original.push(4);
//!
//! assert_eq!(*original, [1, 2, 3, 4]);
//! assert_eq!(*copy, [1, 2, 3]);
//! assert_ne!(original, copy);
//! ```
//!
//! ## Copyable trait objects
//!
//! ```rust
//! use heap_value::{Polymorphic, impl_upcast};
//!
//! trait Animal {
//!     fn name(&self) -> String;
//! }
//!
//! #[derive(Clone)]
//! struct Dog;
//!
//! impl Animal for Dog {
//!     fn name(&self) -> String {
//!         "dog".to_string()
//!     }
//! }
//!
//! impl_upcast!(Dog => dyn Animal);
//!
//! let pet: Polymorphic<dyn Animal> = Polymorphic::new(Dog);
//! let other = pet.clone();
//!
//! assert_eq!(other.name(), "dog");
//! ```
//!
//! ## Moving out
//!
//! ```rust
//! use heap_value::Indirect;
//!
//! let mut source = Indirect::new(String::from("payload"));
//! let target = source.take();
//!
//! assert!(source.valueless_after_move());
//! assert_eq!(*target, "payload");
//! ```
//!
//! # Thread Safety
//!
//! A wrapper is [`Send`] and [`Sync`] exactly when both its payload and its allocator are.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod adapter;
mod allocator;
mod builder;
mod control_block;
mod error;
mod holder;
mod indirect;
mod polymorphic;
mod storage;
mod swap;
mod uses_allocator;

pub use adapter::*;
pub use allocator::*;
pub use builder::*;
pub use error::*;
pub use indirect::Indirect;
pub use polymorphic::{Polymorphic, Upcast};
pub use swap::*;
pub use uses_allocator::*;
