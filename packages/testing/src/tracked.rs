use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Counts drops and clones of the [`Tracked`] values it hands out.
///
/// # Examples
///
/// ```
/// use testing::DropTracker;
///
/// let tracker = DropTracker::new();
/// let value = tracker.track(7);
/// let copy = value.clone();
///
/// drop(value);
/// drop(copy);
///
/// assert_eq!(tracker.clones(), 1);
/// assert_eq!(tracker.drops(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DropTracker {
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    drops: AtomicUsize,
    clones: AtomicUsize,
}

impl DropTracker {
    /// Creates a tracker with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `value` so that its drops and clones are counted by this tracker.
    #[must_use]
    pub fn track<T>(&self, value: T) -> Tracked<T> {
        Tracked {
            value,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Number of tracked values dropped so far.
    #[must_use]
    pub fn drops(&self) -> usize {
        self.counters.drops.load(Ordering::Relaxed)
    }

    /// Number of tracked values cloned so far.
    #[must_use]
    pub fn clones(&self) -> usize {
        self.counters.clones.load(Ordering::Relaxed)
    }
}

/// A value whose drops and clones are counted by a [`DropTracker`].
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    counters: Arc<Counters>,
}

impl<T> Tracked<T> {
    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The wrapped value, for modification.
    #[must_use]
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Clone> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        self.counters.clones.fetch_add(1, Ordering::Relaxed);

        Self {
            value: self.value.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Tracked<T> {}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.counters.drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// A value whose [`Clone`] implementation panics once armed.
///
/// Used to check that copy operations leave their target untouched when the payload
/// cannot be copied.
#[derive(Debug, PartialEq, Eq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "test fixture built with struct literals"
)]
pub struct CloneBomb {
    /// Payload for identification in assertions.
    pub id: u32,

    /// Whether cloning panics.
    pub armed: bool,
}

impl Clone for CloneBomb {
    fn clone(&self) -> Self {
        assert!(!self.armed, "clone of armed CloneBomb {}", self.id);

        Self {
            id: self.id,
            armed: false,
        }
    }
}

/// A value whose [`Drop`] implementation panics once armed.
///
/// Copies are never armed, so only the original value panics when it is dropped.
#[derive(Debug, PartialEq, Eq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "test fixture built with struct literals"
)]
pub struct DropBomb {
    /// Payload for identification in assertions.
    pub id: u32,

    /// Whether dropping panics.
    pub armed: bool,
}

impl Clone for DropBomb {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            armed: false,
        }
    }
}

impl Drop for DropBomb {
    fn drop(&mut self) {
        // Never panic while already unwinding, that would abort the test process.
        if self.armed && !thread::panicking() {
            panic!("drop of armed DropBomb {}", self.id);
        }
    }
}
