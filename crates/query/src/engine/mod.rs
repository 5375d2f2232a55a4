pub mod collation;
pub mod evaluator;
pub mod functions;
pub mod runtime;
