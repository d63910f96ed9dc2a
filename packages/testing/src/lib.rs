#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the `heap_value` packages.
//!
//! Provides allocators that record what happens to them and can be told to fail, plus
//! payload types that report when they are dropped or cloned.

mod allocator;
mod tracked;

pub use allocator::*;
pub use tracked::*;
