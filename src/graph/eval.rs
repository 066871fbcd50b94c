//! Numeric evaluation of scalar expression graphs.
//!
//! Used by dependent-parameter evaluation and constant folding of binding
//! expressions. Booleans are represented numerically: false is 0, true is 1.

use crate::error::TransferError;

use super::{BinaryOp, Node, UnaryOp, MX};

/// Supplies the values an expression graph is evaluated against: symbol
/// values (parameters and constants) and the means to evaluate a function
/// call output.
pub trait EvalContext {
    fn symbol_value(&self, name: &str) -> Option<f64>;

    fn evaluate_call(
        &mut self,
        function: &str,
        args: &[f64],
        output: usize,
    ) -> Result<f64, TransferError>;
}

pub fn apply_unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => {
            if x == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::Asin => x.asin(),
        UnaryOp::Acos => x.acos(),
        UnaryOp::Atan => x.atan(),
        UnaryOp::Sinh => x.sinh(),
        UnaryOp::Cosh => x.cosh(),
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
    }
}

pub fn apply_binary(op: BinaryOp, lhs: f64, rhs: f64) -> f64 {
    let bool01 = |b: bool| if b { 1.0 } else { 0.0 };
    match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => lhs / rhs,
        BinaryOp::Pow => lhs.powf(rhs),
        BinaryOp::Min => lhs.min(rhs),
        BinaryOp::Max => lhs.max(rhs),
        BinaryOp::Atan2 => lhs.atan2(rhs),
        BinaryOp::Lt => bool01(lhs < rhs),
        BinaryOp::Le => bool01(lhs <= rhs),
        BinaryOp::Eq => bool01(lhs == rhs),
        BinaryOp::Ne => bool01(lhs != rhs),
        BinaryOp::And => bool01(lhs != 0.0 && rhs != 0.0),
        BinaryOp::Or => bool01(lhs != 0.0 || rhs != 0.0),
    }
}

/// Evaluate a scalar expression graph. A symbol without a value in the
/// context surfaces as `UnresolvedDependency` so callers can defer and retry
/// once more of the parameter environment is known.
pub fn evaluate(expr: &MX, ctx: &mut dyn EvalContext) -> Result<f64, TransferError> {
    match expr.node() {
        Node::Symbol(name) => {
            ctx.symbol_value(name)
                .ok_or_else(|| TransferError::UnresolvedDependency {
                    name: name.clone(),
                })
        }
        Node::Constant(value) => Ok(*value),
        Node::Unary(op, child) => Ok(apply_unary(*op, evaluate(child, ctx)?)),
        Node::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, ctx)?;
            let rhs = evaluate(rhs, ctx)?;
            Ok(apply_binary(*op, lhs, rhs))
        }
        Node::IfElseZero { cond, value } => {
            if evaluate(cond, ctx)? != 0.0 {
                evaluate(value, ctx)
            } else {
                Ok(0.0)
            }
        }
        Node::Call {
            function,
            args,
            output,
        } => {
            let args = args
                .iter()
                .map(|a| evaluate(a, ctx))
                .collect::<Result<Vec<f64>, TransferError>>()?;
            ctx.evaluate_call(function, &args, *output)
        }
        Node::VertCat(_) => panic!("cannot numerically evaluate a vertcat expression"),
    }
}
