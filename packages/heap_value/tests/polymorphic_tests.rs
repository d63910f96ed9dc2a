//! Integration tests for `Polymorphic` with instrumented allocators.
//!
//! These tests check that copies keep the concrete payload type, that payloads relocate
//! between allocators as a whole and that allocator-aware payloads follow their wrapper
//! onto new allocators.

use std::hash::BuildHasher;
use std::panic::{self, AssertUnwindSafe};

use foldhash::fast::FixedState;
use heap_value::{ConstructError, Indirect, Polymorphic, UsesAllocator, impl_upcast};
use testing::{CloneBomb, CountingAllocator, DropBomb, DropTracker, TaggedAllocator, Tracked};

trait Shape {
    fn area(&self) -> u32;
    fn name(&self) -> &'static str;
    fn grow(&mut self);
}

#[derive(Clone)]
struct Square {
    side: u32,
}

impl Shape for Square {
    fn area(&self) -> u32 {
        self.side * self.side
    }

    fn name(&self) -> &'static str {
        "square"
    }

    fn grow(&mut self) {
        self.side += 1;
    }
}

#[derive(Clone)]
struct Rectangle {
    width: u32,
    height: u32,
}

impl Shape for Rectangle {
    fn area(&self) -> u32 {
        self.width * self.height
    }

    fn name(&self) -> &'static str {
        "rectangle"
    }

    fn grow(&mut self) {
        self.width += 1;
        self.height += 1;
    }
}

impl_upcast!(Square => dyn Shape);
impl_upcast!(Rectangle => dyn Shape);

type Counted = Polymorphic<dyn Shape, CountingAllocator>;
type Tagged = Polymorphic<dyn Shape, TaggedAllocator>;

#[test]
fn payload_and_control_block_share_one_allocation() {
    let alloc = CountingAllocator::new();

    let shape: Counted = Polymorphic::new_in(Square { side: 3 }, alloc.clone());

    assert_eq!(shape.area(), 9);
    assert_eq!(alloc.allocations(), 1);

    drop(shape);

    assert_eq!(alloc.live(), 0);
}

#[test]
fn clone_keeps_concrete_type() {
    let alloc = CountingAllocator::new();
    let mut original: Counted =
        Polymorphic::new_in(Rectangle { width: 2, height: 3 }, alloc.clone());

    let copy = original.clone();
    original.grow();

    assert_eq!(copy.name(), "rectangle");
    assert_eq!(copy.area(), 6);
    assert_eq!(original.area(), 12);
    assert_eq!(alloc.live(), 2);
}

#[test]
fn clone_in_uses_given_allocator() {
    let source_alloc = CountingAllocator::new();
    let target_alloc = CountingAllocator::new();
    let original: Counted = Polymorphic::new_in(Square { side: 2 }, source_alloc.clone());

    let copy = original.clone_in(target_alloc.clone());

    assert_eq!(copy.allocator(), &target_alloc);
    assert_eq!(copy.area(), 4);
    assert_eq!(source_alloc.live(), 1);
    assert_eq!(target_alloc.live(), 1);
}

#[test]
fn copy_assign_replaces_concrete_type() {
    let alloc = CountingAllocator::new();
    let mut target: Counted = Polymorphic::new_in(Square { side: 1 }, alloc.clone());
    let source: Counted = Polymorphic::new_in(Rectangle { width: 4, height: 5 }, alloc.clone());

    target.copy_assign_from(&source);

    assert_eq!(target.name(), "rectangle");
    assert_eq!(target.area(), 20);
    assert_eq!(alloc.allocations(), 3);
    assert_eq!(alloc.live(), 2);
}

#[test]
fn failed_copy_assign_leaves_target_unchanged() {
    let target_alloc = TaggedAllocator::new(1);
    let mut target: Tagged = Polymorphic::new_in(Square { side: 6 }, target_alloc.clone());
    let source: Tagged =
        Polymorphic::new_in(Rectangle { width: 1, height: 1 }, TaggedAllocator::new(2));

    target_alloc.fail_after(0);
    let result = target.try_copy_assign_from(&source);

    assert!(result.is_err());
    assert_eq!(target.name(), "square");
    assert_eq!(target.area(), 36);
}

#[test]
fn move_assign_across_unequal_allocators_keeps_concrete_type() {
    let target_alloc = TaggedAllocator::new(1);
    let source_alloc = TaggedAllocator::new(2);
    let mut target: Tagged = Polymorphic::new_in(Square { side: 1 }, target_alloc.clone());
    let mut source: Tagged =
        Polymorphic::new_in(Rectangle { width: 2, height: 2 }, source_alloc.clone());

    target.move_assign_from(&mut source);

    assert!(source.valueless_after_move());
    assert_eq!(target.name(), "rectangle");
    assert_eq!(target.allocator().tag(), 1);
    assert_eq!(target_alloc.live(), 1);
    assert_eq!(source_alloc.live(), 0);
}

#[test]
fn relocation_moves_payload_without_cloning_or_dropping() {
    let tracker = DropTracker::new();
    let source_alloc = CountingAllocator::new();
    let target_alloc = CountingAllocator::new();
    let mut original: Polymorphic<Tracked<u32>, CountingAllocator> =
        Polymorphic::new_in(tracker.track(17), source_alloc.clone());

    let moved = original.move_in(target_alloc.clone());

    assert_eq!(*moved.value(), 17);
    assert_eq!(tracker.clones(), 0);
    assert_eq!(tracker.drops(), 0);
    assert_eq!(source_alloc.live(), 0);
    assert_eq!(target_alloc.live(), 1);

    drop(moved);

    assert_eq!(tracker.drops(), 1);
    assert_eq!(target_alloc.live(), 0);
}

#[test]
fn try_move_in_failure_keeps_payload_in_source() {
    let mut original: Counted = Polymorphic::new_in(Square { side: 5 }, CountingAllocator::new());

    let result = original.try_move_in(CountingAllocator::exhausted());

    assert!(result.is_err());
    assert_eq!(original.area(), 25);
}

#[test]
fn try_new_with_in_releases_memory_when_initializer_fails() {
    let alloc = CountingAllocator::new();

    let result: Result<Counted, _> = Polymorphic::try_new_with_in(
        |_alloc| Err::<Square, _>("no side length"),
        alloc.clone(),
    );

    assert!(matches!(result, Err(ConstructError::Initializer("no side length"))));
    assert_eq!(alloc.live(), 0);
}

#[test]
fn comparison_of_valueless_panics() {
    let mut a: Polymorphic<u8> = Polymorphic::new(1_u8);
    let b: Polymorphic<u8> = Polymorphic::new(1_u8);
    let _moved = a.take();

    let result = panic::catch_unwind(AssertUnwindSafe(|| a == b));

    assert!(result.is_err());
}

#[test]
fn debug_shows_valueless_state() {
    let mut value: Polymorphic<u8> = Polymorphic::new(3_u8);
    assert_eq!(format!("{value:?}"), "Polymorphic(3)");

    let _moved = value.take();
    assert_eq!(format!("{value:?}"), "Polymorphic(<valueless>)");
}

#[test]
fn equality_ignores_allocators() {
    let a: Polymorphic<u32> = Polymorphic::new(5_u32);
    let b: Polymorphic<u32, CountingAllocator> =
        Polymorphic::new_in(5_u32, CountingAllocator::new());

    assert!(a == b);
}

#[test]
fn many_wrappers_allocate_and_release_once_each() {
    let alloc = CountingAllocator::new();

    let shapes = (1..=10_u32)
        .map(|side| -> Counted { Polymorphic::new_in(Square { side }, alloc.clone()) })
        .collect::<Vec<_>>();

    assert_eq!(alloc.allocations(), 10);
    assert_eq!(shapes.iter().map(|shape| shape.area()).sum::<u32>(), 385);

    drop(shapes);

    assert_eq!(alloc.deallocations(), 10);
    assert_eq!(alloc.live(), 0);
}

#[test]
fn panicking_initializer_releases_memory() {
    let alloc = CountingAllocator::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| -> Counted {
        Polymorphic::new_with_in(|| -> Square { panic!("no side length") }, alloc.clone())
    }));

    assert!(result.is_err());
    assert_eq!(alloc.allocations(), 1);
    assert_eq!(alloc.live(), 0);
}

#[test]
fn panicking_clone_releases_memory() {
    let alloc = CountingAllocator::new();
    let original: Polymorphic<CloneBomb, CountingAllocator> =
        Polymorphic::new_in(CloneBomb { id: 1, armed: true }, alloc.clone());

    let result = panic::catch_unwind(AssertUnwindSafe(|| original.clone()));

    assert!(result.is_err());
    assert_eq!(alloc.allocations(), 2);
    assert_eq!(alloc.live(), 1);
    assert_eq!(original.id, 1);
}

#[test]
fn panicking_clone_during_copy_assign_leaves_target_unchanged() {
    let alloc = CountingAllocator::new();
    let mut target: Polymorphic<CloneBomb, CountingAllocator> =
        Polymorphic::new_in(CloneBomb { id: 1, armed: false }, alloc.clone());
    let source: Polymorphic<CloneBomb, CountingAllocator> =
        Polymorphic::new_in(CloneBomb { id: 2, armed: true }, alloc.clone());

    let result = panic::catch_unwind(AssertUnwindSafe(|| target.copy_assign_from(&source)));

    assert!(result.is_err());
    assert_eq!(target.id, 1);
    assert_eq!(alloc.live(), 2);

    drop(target);
    drop(source);

    assert_eq!(alloc.live(), 0);
}

#[test]
fn copy_assign_installs_copy_when_old_payload_panics_on_drop() {
    let tracker = DropTracker::new();
    let alloc = CountingAllocator::new();
    let mut target: Polymorphic<Tracked<DropBomb>, CountingAllocator> =
        Polymorphic::new_in(tracker.track(DropBomb { id: 1, armed: true }), alloc.clone());
    let source: Polymorphic<Tracked<DropBomb>, CountingAllocator> =
        Polymorphic::new_in(tracker.track(DropBomb { id: 2, armed: false }), alloc.clone());

    let result = panic::catch_unwind(AssertUnwindSafe(|| target.copy_assign_from(&source)));

    assert!(result.is_err());
    assert!(!target.valueless_after_move());
    assert_eq!(target.value().id, 2);
    assert_eq!(alloc.live(), 2);

    drop(target);
    drop(source);

    assert_eq!(tracker.drops(), 3);
    assert_eq!(alloc.live(), 0);
}

#[test]
fn hash_of_valueless_panics() {
    let mut value: Polymorphic<u32> = Polymorphic::new(9_u32);
    let _moved = value.take();
    let hasher = FixedState::with_seed(7);

    let result = panic::catch_unwind(AssertUnwindSafe(|| hasher.hash_one(&value)));

    assert!(result.is_err());
}

#[test]
fn equal_values_hash_equally() {
    let hasher = FixedState::with_seed(7);
    let a: Polymorphic<String> = Polymorphic::new(String::from("same"));
    let b: Polymorphic<String, CountingAllocator> =
        Polymorphic::new_in(String::from("same"), CountingAllocator::new());
    let c: Polymorphic<String> = Polymorphic::new(String::from("other"));

    assert!(a == b);
    assert_eq!(hasher.hash_one(&a), hasher.hash_one(&b));
    assert!(a != c);
    assert_ne!(hasher.hash_one(&a), hasher.hash_one(&c));
}

/// A payload that allocates its own title from the allocator of its wrapper.
struct Document {
    title: Indirect<String, CountingAllocator>,
}

trait Titled {
    fn title(&self) -> &str;
    fn title_allocator(&self) -> &CountingAllocator;
}

impl Titled for Document {
    fn title(&self) -> &str {
        &self.title
    }

    fn title_allocator(&self) -> &CountingAllocator {
        self.title.allocator()
    }
}

impl UsesAllocator<CountingAllocator> for Document {
    fn clone_using(&self, alloc: &CountingAllocator) -> Self {
        Self {
            title: self.title.clone_using(alloc),
        }
    }

    fn move_using(self, alloc: &CountingAllocator) -> Self {
        Self {
            title: self.title.move_using(alloc),
        }
    }
}

impl_upcast!(Document => dyn Titled);

#[test]
fn allocator_aware_payload_follows_its_wrapper() {
    let scratch = CountingAllocator::new();
    let first = CountingAllocator::new();
    let second = CountingAllocator::new();
    let third = CountingAllocator::new();

    let document = Document {
        title: Indirect::new_in(String::from("report"), scratch.clone()),
    };

    let mut original: Polymorphic<dyn Titled, CountingAllocator> =
        Polymorphic::new_uses_allocator_in(document, first.clone());

    assert_eq!(original.title(), "report");
    assert_eq!(original.title_allocator(), &first);
    assert_eq!(scratch.live(), 0);
    assert_eq!(first.live(), 2);

    let copy = original.clone_in(second.clone());

    assert_eq!(copy.title(), "report");
    assert_eq!(copy.title_allocator(), &second);
    assert_eq!(second.live(), 2);

    let moved = original.move_in(third.clone());

    assert_eq!(moved.title_allocator(), &third);
    assert_eq!(first.live(), 0);
    assert_eq!(third.live(), 2);
}

#[test]
fn allocator_aware_payload_is_not_required_to_be_clone() {
    let alloc = CountingAllocator::new();
    let document = Document {
        title: Indirect::new_in(String::from("draft"), alloc.clone()),
    };

    let original: Polymorphic<dyn Titled, CountingAllocator> =
        Polymorphic::new_uses_allocator_in(document, alloc.clone());
    let copy = original.clone();

    assert_eq!(copy.title(), "draft");
    assert_eq!(alloc.live(), 4);
}
