use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use heap_value::{AllocError, Allocator, Global};

/// Allocation counters shared by an allocator and all of its clones.
#[derive(Debug, Default)]
struct Stats {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    live_bytes: AtomicUsize,

    // Number of allocations that may still succeed. `usize::MAX` means unlimited.
    remaining: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Self {
            remaining: AtomicUsize::new(usize::MAX),
            ..Self::default()
        }
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let granted = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |remaining| {
                if remaining == usize::MAX {
                    Some(remaining)
                } else {
                    remaining.checked_sub(1)
                }
            })
            .is_ok();

        if !granted {
            return Err(AllocError::exhausted(layout));
        }

        let ptr = Global.allocate(layout)?;

        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed);

        Ok(ptr)
    }

    /// # Safety
    ///
    /// Same as [`Allocator::deallocate()`].
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);

        // SAFETY: Forwarding the caller's guarantees. All memory comes from `Global`.
        unsafe {
            Global.deallocate(ptr, layout);
        }
    }
}

/// An allocator that counts allocations and can be told to start failing.
///
/// Clones share the counters and the failure budget. Two instances compare equal only if
/// one is a clone of the other. The type does not propagate on copy, move or swap.
///
/// # Examples
///
/// ```
/// use heap_value::Indirect;
/// use testing::CountingAllocator;
///
/// let alloc = CountingAllocator::new();
/// let value = Indirect::new_in(5, alloc.clone());
///
/// assert_eq!(alloc.live(), 1);
/// drop(value);
/// assert_eq!(alloc.live(), 0);
/// ```
#[derive(Clone)]
pub struct CountingAllocator {
    stats: Arc<Stats>,
}

impl CountingAllocator {
    /// Creates an allocator with fresh counters and no failure budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Stats::new()),
        }
    }

    /// Creates an allocator that fails every allocation.
    #[must_use]
    pub fn exhausted() -> Self {
        let alloc = Self::new();
        alloc.fail_after(0);
        alloc
    }

    /// Lets `successes` more allocations succeed, then fails all further allocations.
    pub fn fail_after(&self, successes: usize) {
        self.stats.remaining.store(successes, Ordering::Relaxed);
    }

    /// Removes any failure budget.
    pub fn never_fail(&self) {
        self.stats.remaining.store(usize::MAX, Ordering::Relaxed);
    }

    /// Number of successful allocations so far.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::Relaxed)
    }

    /// Number of deallocations so far.
    #[must_use]
    pub fn deallocations(&self) -> usize {
        self.stats.deallocations.load(Ordering::Relaxed)
    }

    /// Number of allocations not yet returned.
    #[must_use]
    pub fn live(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }

    /// Number of bytes not yet returned.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.stats.live_bytes.load(Ordering::Relaxed)
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CountingAllocator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stats, &other.stats)
    }
}

impl fmt::Debug for CountingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingAllocator")
            .field("allocations", &self.allocations())
            .field("deallocations", &self.deallocations())
            .finish_non_exhaustive()
    }
}

// SAFETY: All memory comes from `Global`, which any instance can release.
unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.stats.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.stats.deallocate(ptr, layout);
        }
    }
}

/// An allocator identified by a numeric tag, with configurable propagation.
///
/// Instances with the same tag compare equal. Clones share their counters; independently
/// created instances have their own, even when their tags match. Memory released through
/// an equal but independently created instance is counted by the releasing instance.
///
/// With `PROPAGATE = true` the allocator propagates on copy assignment, move assignment
/// and swap. See [`PropagatingAllocator`].
///
/// [`with_copy_tag()`][Self::with_copy_tag] makes copies of a wrapper pick an allocator
/// with a different tag, which exercises [`Allocator::select_on_copy()`].
#[derive(Clone)]
pub struct TaggedAllocator<const PROPAGATE: bool = false> {
    tag: u32,
    copy_tag: Option<u32>,
    stats: Arc<Stats>,
}

/// A [`TaggedAllocator`] that propagates on copy assignment, move assignment and swap.
pub type PropagatingAllocator = TaggedAllocator<true>;

impl<const PROPAGATE: bool> TaggedAllocator<PROPAGATE> {
    /// Creates an allocator with the given tag and fresh counters.
    #[must_use]
    pub fn new(tag: u32) -> Self {
        Self {
            tag,
            copy_tag: None,
            stats: Arc::new(Stats::new()),
        }
    }

    /// Makes [`Allocator::select_on_copy()`] return a clone of this allocator re-tagged
    /// with `copy_tag`. The clone shares the counters.
    #[must_use]
    pub fn with_copy_tag(mut self, copy_tag: u32) -> Self {
        self.copy_tag = Some(copy_tag);
        self
    }

    /// The tag that decides equality.
    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Lets `successes` more allocations succeed, then fails all further allocations.
    pub fn fail_after(&self, successes: usize) {
        self.stats.remaining.store(successes, Ordering::Relaxed);
    }

    /// Removes any failure budget.
    pub fn never_fail(&self) {
        self.stats.remaining.store(usize::MAX, Ordering::Relaxed);
    }

    /// Number of successful allocations made through this instance and its clones.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::Relaxed)
    }

    /// Number of deallocations made through this instance and its clones.
    #[must_use]
    pub fn deallocations(&self) -> usize {
        self.stats.deallocations.load(Ordering::Relaxed)
    }

    /// Number of allocations made through this instance and its clones, minus the number
    /// of deallocations made through them.
    #[must_use]
    pub fn live(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }
}

impl<const PROPAGATE: bool> PartialEq for TaggedAllocator<PROPAGATE> {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl<const PROPAGATE: bool> fmt::Debug for TaggedAllocator<PROPAGATE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedAllocator")
            .field("tag", &self.tag)
            .field("propagate", &PROPAGATE)
            .finish_non_exhaustive()
    }
}

// SAFETY: All memory comes from `Global`, which any instance can release, so instances that
// compare equal can release each other's memory.
unsafe impl<const PROPAGATE: bool> Allocator for TaggedAllocator<PROPAGATE> {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = PROPAGATE;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = PROPAGATE;
    const PROPAGATE_ON_SWAP: bool = PROPAGATE;

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.stats.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.stats.deallocate(ptr, layout);
        }
    }

    fn select_on_copy(&self) -> Self {
        match self.copy_tag {
            Some(copy_tag) => Self {
                tag: copy_tag,
                copy_tag: None,
                stats: Arc::clone(&self.stats),
            },
            None => self.clone(),
        }
    }
}
