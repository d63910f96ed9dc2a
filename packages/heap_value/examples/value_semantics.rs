//! Value semantics with `Indirect` and `Polymorphic`.
//!
//! This example shows:
//! * A recursive expression tree built from `Indirect` nodes
//! * Deep copies that stay independent of the original
//! * A collection of copyable trait objects
//! * The valueless state left behind by moving a payload out

use std::fmt::{self, Display};

use heap_value::{Indirect, Polymorphic, impl_upcast};

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Number(i64),
    Add(Indirect<Expr>, Indirect<Expr>),
    Mul(Indirect<Expr>, Indirect<Expr>),
}

impl Expr {
    fn eval(&self) -> i64 {
        match self {
            Self::Number(n) => *n,
            Self::Add(l, r) => l.eval().wrapping_add(r.eval()),
            Self::Mul(l, r) => l.eval().wrapping_mul(r.eval()),
        }
    }
}

trait Instrument {
    fn play(&self) -> String;
    fn tune(&mut self, semitones: i8);
}

#[derive(Clone)]
struct Guitar {
    pitch: i8,
}

impl Instrument for Guitar {
    fn play(&self) -> String {
        format!("guitar strum at {:+}", self.pitch)
    }

    fn tune(&mut self, semitones: i8) {
        self.pitch = self.pitch.saturating_add(semitones);
    }
}

#[derive(Clone)]
struct Drum;

impl Instrument for Drum {
    fn play(&self) -> String {
        "drum hit".to_string()
    }

    fn tune(&mut self, _semitones: i8) {}
}

impl_upcast!(Guitar => dyn Instrument);
impl_upcast!(Drum => dyn Instrument);

struct Band(Vec<Polymorphic<dyn Instrument>>);

impl Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instrument in &self.0 {
            writeln!(f, "  {}", instrument.play())?;
        }

        Ok(())
    }
}

fn demonstrate_recursive_values() {
    println!("Example 1: Recursive values");
    println!("---------------------------");

    // (2 + 3) * 4
    let expr = Expr::Mul(
        Indirect::new(Expr::Add(
            Indirect::new(Expr::Number(2)),
            Indirect::new(Expr::Number(3)),
        )),
        Indirect::new(Expr::Number(4)),
    );

    let mut copy = expr.clone();

    if let Expr::Mul(_, right) = &mut copy {
        **right = Expr::Number(10);
    }

    println!("Original evaluates to {}", expr.eval());
    println!("Modified copy evaluates to {}", copy.eval());
    println!("Equal after modification: {}", expr == copy);

    println!();
}

fn demonstrate_trait_objects() {
    println!("Example 2: Copyable trait objects");
    println!("---------------------------------");

    let band = Band(vec![
        Polymorphic::new(Guitar { pitch: 0 }),
        Polymorphic::new(Drum),
    ]);

    // Cloning the vector clones every instrument with its concrete type.
    let mut tuned = Band(band.0.clone());

    for instrument in &mut tuned.0 {
        instrument.tune(2);
    }

    println!("Original band:");
    print!("{band}");
    println!("Tuned copy:");
    print!("{tuned}");

    println!();
}

fn demonstrate_valueless_state() {
    println!("Example 3: Moving the payload out");
    println!("---------------------------------");

    let mut source = Indirect::new(String::from("payload"));
    let target = source.take();

    println!("Target holds: {}", *target);
    println!("Source is valueless: {}", source.valueless_after_move());
    println!("Source debug output: {source:?}");

    // Assigning a new value makes the source usable again.
    source.copy_assign_from(&target);
    println!("Source after copy assignment: {}", *source);

    println!();
}

fn main() {
    println!("=== heap_value Value Semantics Examples ===");
    println!();

    demonstrate_recursive_values();
    demonstrate_trait_objects();
    demonstrate_valueless_state();

    println!("All examples completed successfully!");
}
