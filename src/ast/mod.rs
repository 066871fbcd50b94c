//! The flattened-model description handed to the transfer.
//!
//! An external front end is expected to parse Modelica/Optimica text, flatten
//! the class hierarchy and produce these structures. The transfer consumes
//! them as-is: names are already qualified, equations are already sorted into
//! DAE and initial sections, and functions carry their statement lists.

use std::fmt;

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Real,
    Integer,
    Boolean,
    String,
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BaseType::Real => write!(f, "Real"),
            BaseType::Integer => write!(f, "Integer"),
            BaseType::Boolean => write!(f, "Boolean"),
            BaseType::String => write!(f, "String"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Input,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variability {
    Constant,
    Parameter,
    Discrete,
    Continuous,
}

/// What a variable or record field is declared as: a built-in primitive, a
/// named derived type carrying attribute defaults, or a record type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Primitive(BaseType),
    Declared(String),
    Record(String),
}

/// A derived-type declaration: `type Voltage = Real(quantity = "...", unit = "V");`
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub base: BaseType,
    pub attributes: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub dims: Vec<usize>,
    pub ty: TypeRef,
}

impl RecordField {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            dims: Vec::new(),
            ty,
        }
    }

    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self.dims = dims.to_vec();
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub name: String,
    pub fields: Vec<RecordField>,
}

/// Marks a variable as an alias of another variable, up to sign.
#[derive(Debug, Clone)]
pub struct AliasDecl {
    pub target: String,
    pub negated: bool,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub dims: Vec<usize>,
    pub ty: TypeRef,
    pub causality: Causality,
    pub variability: Variability,
    pub binding: Option<Expr>,
    pub attributes: Vec<(String, Expr)>,
    pub alias: Option<AliasDecl>,
}

impl VariableDecl {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            dims: Vec::new(),
            ty,
            causality: Causality::Internal,
            variability: Variability::Continuous,
            binding: None,
            attributes: Vec::new(),
            alias: None,
        }
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, TypeRef::Primitive(BaseType::Real))
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, TypeRef::Primitive(BaseType::Integer))
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, TypeRef::Primitive(BaseType::Boolean))
    }

    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self.dims = dims.to_vec();
        self
    }

    pub fn with_causality(mut self, causality: Causality) -> Self {
        self.causality = causality;
        self
    }

    pub fn with_variability(mut self, variability: Variability) -> Self {
        self.variability = variability;
        self
    }

    pub fn with_binding(mut self, binding: Expr) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: Expr) -> Self {
        self.attributes.push((name.to_string(), value));
        self
    }

    pub fn with_alias(mut self, target: &str, negated: bool) -> Self {
        self.alias = Some(AliasDecl {
            target: target.to_string(),
            negated,
        });
        self
    }
}

/// One segment of a dotted component reference: a name with optional integer
/// subscripts, e.g. the `rArr[1]` in `r.rArr[1].A`. Subscripts are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct RefPart {
    pub name: String,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRef {
    pub parts: Vec<RefPart>,
}

impl ComponentRef {
    pub fn name(name: &str) -> Self {
        Self {
            parts: vec![RefPart {
                name: name.to_string(),
                indices: Vec::new(),
            }],
        }
    }

    pub fn indexed(name: &str, indices: &[usize]) -> Self {
        Self {
            parts: vec![RefPart {
                name: name.to_string(),
                indices: indices.to_vec(),
            }],
        }
    }

    pub fn field(mut self, name: &str) -> Self {
        self.parts.push(RefPart {
            name: name.to_string(),
            indices: Vec::new(),
        });
        self
    }

    pub fn field_indexed(mut self, name: &str, indices: &[usize]) -> Self {
        self.parts.push(RefPart {
            name: name.to_string(),
            indices: indices.to_vec(),
        });
        self
    }

    /// The leading identifier, i.e. the declared variable this reference
    /// starts from.
    pub fn root(&self) -> &str {
        &self.parts[0].name
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", part.name)?;
            if !part.indices.is_empty() {
                write!(f, "[{}]", part.indices.iter().join(","))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    Ref(ComponentRef),
    Der(ComponentRef),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Option<Box<Expr>>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
}

impl Expr {
    pub fn num(value: f64) -> Expr {
        Expr::Number(value)
    }

    pub fn name(name: &str) -> Expr {
        Expr::Ref(ComponentRef::name(name))
    }

    pub fn indexed(name: &str, indices: &[usize]) -> Expr {
        Expr::Ref(ComponentRef::indexed(name, indices))
    }

    pub fn der(name: &str) -> Expr {
        Expr::Der(ComponentRef::name(name))
    }

    pub fn unary(op: UnOp, child: Expr) -> Expr {
        Expr::Unary(op, Box::new(child))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn call(function: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            function: function.to_string(),
            args,
        }
    }

    pub fn if_then(cond: Expr, then: Expr) -> Expr {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els: None,
        }
    }

    pub fn if_then_else(cond: Expr, then: Expr, els: Expr) -> Expr {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Some(Box::new(els)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Equation {
    /// `lhs = rhs`, scalar or aggregate typed.
    Simple { lhs: Expr, rhs: Expr },
    /// `(t1, , t3) = f(args)`: positional binding of a multi-output function
    /// call; `None` marks an omitted output position.
    Call {
        targets: Vec<Option<ComponentRef>>,
        function: String,
        args: Vec<Expr>,
    },
}

impl Equation {
    pub fn simple(lhs: Expr, rhs: Expr) -> Equation {
        Equation::Simple { lhs, rhs }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionVariable {
    pub name: String,
    pub dims: Vec<usize>,
    pub ty: TypeRef,
}

impl FunctionVariable {
    pub fn real(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dims: Vec::new(),
            ty: TypeRef::Primitive(BaseType::Real),
        }
    }

    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            dims: Vec::new(),
            ty,
        }
    }

    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self.dims = dims.to_vec();
        self
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Assign {
        target: ComponentRef,
        value: Expr,
    },
    /// `(t1, , t3) := f(args)`, with `None` for ignored output positions.
    CallAssign {
        targets: Vec<Option<ComponentRef>>,
        function: String,
        args: Vec<Expr>,
    },
    Return,
}

impl Statement {
    pub fn assign(target: &str, value: Expr) -> Statement {
        Statement::Assign {
            target: ComponentRef::name(target),
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub inputs: Vec<FunctionVariable>,
    pub outputs: Vec<FunctionVariable>,
    pub locals: Vec<FunctionVariable>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelDescription {
    pub name: String,
    pub types: Vec<TypeDecl>,
    pub records: Vec<RecordDecl>,
    pub variables: Vec<VariableDecl>,
    pub equations: Vec<Equation>,
    pub initial_equations: Vec<Equation>,
    pub functions: Vec<FunctionDecl>,
}

impl ModelDescription {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Start or final time of an optimization horizon: a fixed literal, or free
/// (left to the optimizer as an unknown).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimePoint {
    Literal(f64),
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Leq,
    Geq,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelationKind::Leq => write!(f, "<="),
            RelationKind::Geq => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintDecl {
    pub kind: RelationKind,
    pub lhs: Expr,
    pub rhs: Expr,
}

#[derive(Debug, Clone)]
pub struct OptimizationDescription {
    pub model: ModelDescription,
    pub start_time: TimePoint,
    pub final_time: TimePoint,
    pub lagrange: Option<Expr>,
    pub mayer: Option<Expr>,
    pub constraints: Vec<ConstraintDecl>,
}

impl OptimizationDescription {
    pub fn new(model: ModelDescription) -> Self {
        Self {
            model,
            start_time: TimePoint::Literal(0.0),
            final_time: TimePoint::Literal(1.0),
            lagrange: None,
            mayer: None,
            constraints: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }
}

/// The complete unit handed to the transfer entry points: all model and
/// optimization descriptions produced from one source, selected by name.
#[derive(Debug, Clone, Default)]
pub struct FlatSource {
    pub models: Vec<ModelDescription>,
    pub optimizations: Vec<OptimizationDescription>,
}

impl FlatSource {
    pub fn from_model(model: ModelDescription) -> Self {
        Self {
            models: vec![model],
            optimizations: Vec::new(),
        }
    }

    pub fn from_optimization(optimization: OptimizationDescription) -> Self {
        Self {
            models: Vec::new(),
            optimizations: vec![optimization],
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelDescription> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn optimization(&self, name: &str) -> Option<&OptimizationDescription> {
        self.optimizations.iter().find(|o| o.name() == name)
    }
}
