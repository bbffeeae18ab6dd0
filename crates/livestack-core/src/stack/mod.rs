mod accumulator;

pub use accumulator::{Normalization, StackMethod, StackSnapshot, Stacker};
