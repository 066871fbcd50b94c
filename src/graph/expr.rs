use std::fmt;
use std::ops;
use std::rc::Rc;

use itertools::Itertools;

/// Decimal approximation of `1/ln(10)` used when lowering `log10`. The fixed
/// precision is part of the canonical output format.
pub const LOG10_FACTOR: f64 = 0.434294;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
}

impl UnaryOp {
    /// The print name for function-style operators; `None` for the two
    /// sign-style operators that print as `(-x)` / `(!x)`.
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            UnaryOp::Neg | UnaryOp::Not => None,
            UnaryOp::Abs => Some("fabs"),
            UnaryOp::Sqrt => Some("sqrt"),
            UnaryOp::Sin => Some("sin"),
            UnaryOp::Cos => Some("cos"),
            UnaryOp::Tan => Some("tan"),
            UnaryOp::Asin => Some("asin"),
            UnaryOp::Acos => Some("acos"),
            UnaryOp::Atan => Some("atan"),
            UnaryOp::Sinh => Some("sinh"),
            UnaryOp::Cosh => Some("cosh"),
            UnaryOp::Tanh => Some("tanh"),
            UnaryOp::Exp => Some("exp"),
            UnaryOp::Log => Some("log"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Atan2,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// The infix symbol, or `None` for operators that print function-style.
    pub fn infix_symbol(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Div => Some("/"),
            BinaryOp::Lt => Some("<"),
            BinaryOp::Le => Some("<="),
            BinaryOp::Eq => Some("=="),
            BinaryOp::Ne => Some("!="),
            BinaryOp::And => Some("&&"),
            BinaryOp::Or => Some("||"),
            BinaryOp::Pow | BinaryOp::Min | BinaryOp::Max | BinaryOp::Atan2 => None,
        }
    }

    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Pow => Some("pow"),
            BinaryOp::Min => Some("fmin"),
            BinaryOp::Max => Some("fmax"),
            BinaryOp::Atan2 => Some("atan2"),
            _ => None,
        }
    }
}

/// One node of the symbolic expression graph. Nodes are immutable once
/// constructed; equality and printing are structural.
#[derive(Debug, PartialEq)]
pub enum Node {
    Symbol(String),
    Constant(f64),
    Unary(UnaryOp, MX),
    Binary(BinaryOp, MX, MX),
    /// Modelica's single-branch conditional: `(cond?value:0)`. The false
    /// branch is a literal zero, not an absent expression.
    IfElseZero { cond: MX, value: MX },
    /// A reference to one output of an extracted function call. Duplicate
    /// call nodes are legal; no subexpression sharing is implied.
    Call {
        function: String,
        args: Vec<MX>,
        output: usize,
    },
    VertCat(Vec<MX>),
}

/// A cheaply clonable handle to an expression graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct MX(Rc<Node>);

impl MX {
    pub fn sym(name: impl Into<String>) -> MX {
        MX(Rc::new(Node::Symbol(name.into())))
    }

    pub fn constant(value: f64) -> MX {
        MX(Rc::new(Node::Constant(value)))
    }

    pub fn from_bool(value: bool) -> MX {
        MX::constant(if value { 1.0 } else { 0.0 })
    }

    pub fn zero() -> MX {
        MX::constant(0.0)
    }

    pub fn unary(op: UnaryOp, child: &MX) -> MX {
        MX(Rc::new(Node::Unary(op, child.clone())))
    }

    pub fn binary(op: BinaryOp, lhs: &MX, rhs: &MX) -> MX {
        MX(Rc::new(Node::Binary(op, lhs.clone(), rhs.clone())))
    }

    pub fn if_else_zero(cond: &MX, value: &MX) -> MX {
        MX(Rc::new(Node::IfElseZero {
            cond: cond.clone(),
            value: value.clone(),
        }))
    }

    pub fn call(function: &str, args: Vec<MX>, output: usize) -> MX {
        MX(Rc::new(Node::Call {
            function: function.to_string(),
            args,
            output,
        }))
    }

    pub fn vertcat(items: Vec<MX>) -> MX {
        MX(Rc::new(Node::VertCat(items)))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    /// The numeric value of a constant node.
    pub fn value(&self) -> Option<f64> {
        match self.node() {
            Node::Constant(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.node(), Node::Symbol(_))
    }

    pub fn not(&self) -> MX {
        MX::unary(UnaryOp::Not, self)
    }

    pub fn abs(&self) -> MX {
        MX::unary(UnaryOp::Abs, self)
    }

    pub fn sqrt(&self) -> MX {
        MX::unary(UnaryOp::Sqrt, self)
    }

    pub fn sin(&self) -> MX {
        MX::unary(UnaryOp::Sin, self)
    }

    pub fn cos(&self) -> MX {
        MX::unary(UnaryOp::Cos, self)
    }

    pub fn tan(&self) -> MX {
        MX::unary(UnaryOp::Tan, self)
    }

    pub fn asin(&self) -> MX {
        MX::unary(UnaryOp::Asin, self)
    }

    pub fn acos(&self) -> MX {
        MX::unary(UnaryOp::Acos, self)
    }

    pub fn atan(&self) -> MX {
        MX::unary(UnaryOp::Atan, self)
    }

    pub fn sinh(&self) -> MX {
        MX::unary(UnaryOp::Sinh, self)
    }

    pub fn cosh(&self) -> MX {
        MX::unary(UnaryOp::Cosh, self)
    }

    pub fn tanh(&self) -> MX {
        MX::unary(UnaryOp::Tanh, self)
    }

    pub fn exp(&self) -> MX {
        MX::unary(UnaryOp::Exp, self)
    }

    pub fn log(&self) -> MX {
        MX::unary(UnaryOp::Log, self)
    }

    /// `log10(x)` lowered as a fixed-precision constant multiple of `log(x)`.
    pub fn log10(&self) -> MX {
        &MX::constant(LOG10_FACTOR) * &self.log()
    }

    pub fn pow(&self, exponent: &MX) -> MX {
        MX::binary(BinaryOp::Pow, self, exponent)
    }

    pub fn min(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Min, self, other)
    }

    pub fn max(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Max, self, other)
    }

    pub fn atan2(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Atan2, self, other)
    }

    pub fn lt(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Le, self, other)
    }

    pub fn equal(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Eq, self, other)
    }

    pub fn not_equal(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Ne, self, other)
    }

    pub fn and(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::And, self, other)
    }

    pub fn or(&self, other: &MX) -> MX {
        MX::binary(BinaryOp::Or, self, other)
    }
}

impl<'a, 'b> ops::Add<&'b MX> for &'a MX {
    type Output = MX;
    fn add(self, rhs: &'b MX) -> MX {
        MX::binary(BinaryOp::Add, self, rhs)
    }
}

impl<'a, 'b> ops::Sub<&'b MX> for &'a MX {
    type Output = MX;
    fn sub(self, rhs: &'b MX) -> MX {
        MX::binary(BinaryOp::Sub, self, rhs)
    }
}

impl<'a, 'b> ops::Mul<&'b MX> for &'a MX {
    type Output = MX;
    fn mul(self, rhs: &'b MX) -> MX {
        MX::binary(BinaryOp::Mul, self, rhs)
    }
}

impl<'a, 'b> ops::Div<&'b MX> for &'a MX {
    type Output = MX;
    fn div(self, rhs: &'b MX) -> MX {
        MX::binary(BinaryOp::Div, self, rhs)
    }
}

impl ops::Neg for &MX {
    type Output = MX;
    fn neg(self) -> MX {
        MX::unary(UnaryOp::Neg, self)
    }
}

impl fmt::Display for MX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.node() {
            Node::Symbol(name) => write!(f, "{name}"),
            Node::Constant(value) => write!(f, "Const<{value}>(scalar)"),
            Node::Unary(op, child) => match op.function_name() {
                Some(name) => write!(f, "{name}({child})"),
                None => match op {
                    UnaryOp::Neg => write!(f, "(-{child})"),
                    UnaryOp::Not => write!(f, "(!{child})"),
                    _ => unreachable!(),
                },
            },
            Node::Binary(op, lhs, rhs) => match op.infix_symbol() {
                Some(symbol) => write!(f, "({lhs}{symbol}{rhs})"),
                None => write!(f, "{}({lhs},{rhs})", op.function_name().unwrap()),
            },
            Node::IfElseZero { cond, value } => write!(f, "({cond}?{value}:0)"),
            Node::Call {
                function,
                args,
                output,
            } => write!(
                f,
                "function(\"{function}\").call([{}]){{{output}}}",
                args.iter().join(",")
            ),
            Node::VertCat(items) => write!(f, "vertcat({})", items.iter().join(",")),
        }
    }
}
