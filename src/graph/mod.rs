pub mod expr;
pub use expr::{BinaryOp, Node, UnaryOp, LOG10_FACTOR, MX};

pub mod eval;
pub use eval::{apply_binary, apply_unary, evaluate, EvalContext};
