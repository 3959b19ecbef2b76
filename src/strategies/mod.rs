pub mod evaluator;
pub mod signals;
