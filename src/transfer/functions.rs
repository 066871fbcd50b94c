//! Extraction of Modelica function declarations into [`ModelFunction`]s.
//!
//! The statement list is interpreted symbolically over flattened scalar
//! slots: assignments bind variables to value nodes, call assignments create
//! shared call sites, and everything after an unconditional `return` is
//! statically unreachable and excluded. The value graph reachable from the
//! output slots is then scheduled into a register instruction list, output by
//! output, with liveness-based register reuse.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::ast::{BinOp, ComponentRef, Expr, FunctionDecl, Statement, UnOp};
use crate::error::TransferError;
use crate::graph::{BinaryOp, UnaryOp, LOG10_FACTOR};
use crate::model::{Instruction, ModelFunction, Register, SlotShape};

use super::flatten::{ref_components, Structure, StructureEnv};

const BUILTIN_FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "exp", "log", "log10",
    "sqrt", "abs", "min", "max", "atan2", "pow",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

/// Declaration and type tables an extraction runs against.
pub struct FunctionContext<'a> {
    pub decls: IndexMap<String, &'a FunctionDecl>,
    pub env: StructureEnv<'a>,
}

/// Scalar slot count of each declared output, in declaration order.
pub fn output_arities(
    decl: &FunctionDecl,
    env: &StructureEnv,
) -> Result<Vec<usize>, TransferError> {
    decl.outputs
        .iter()
        .map(|o| Ok(env.resolve(&o.ty, &o.dims)?.scalar_count()))
        .collect()
}

/// Extract `name` (and, recursively, every function it calls) into `memo`.
/// Extraction is memoized by qualified name and idempotent.
pub fn extract_function(
    name: &str,
    ctx: &FunctionContext,
    memo: &mut IndexMap<String, ModelFunction>,
) -> Result<(), TransferError> {
    let mut in_progress = HashSet::new();
    extract_inner(name, ctx, memo, &mut in_progress)
}

fn extract_inner(
    name: &str,
    ctx: &FunctionContext,
    memo: &mut IndexMap<String, ModelFunction>,
    in_progress: &mut HashSet<String>,
) -> Result<(), TransferError> {
    if memo.contains_key(name) {
        return Ok(());
    }
    if !in_progress.insert(name.to_string()) {
        return Err(TransferError::FunctionExtraction {
            function: name.to_string(),
            detail: "recursive call cycle".to_string(),
        });
    }
    let decl = ctx
        .decls
        .get(name)
        .copied()
        .ok_or_else(|| TransferError::FunctionExtraction {
            function: name.to_string(),
            detail: "is not declared".to_string(),
        })?;
    let statements = truncate_at_return(&decl.statements);
    // callees first, so the main interpretation can read them from the memo
    for callee in called_functions(statements) {
        extract_inner(&callee, ctx, memo, in_progress)?;
    }
    let function = ExtractionState::new(decl, ctx, memo)?.run(statements)?;
    memo.insert(name.to_string(), function);
    in_progress.remove(name);
    Ok(())
}

/// Statements after the first unconditional `return` are unreachable; this is
/// decided statically, before any interpretation.
fn truncate_at_return(statements: &[Statement]) -> &[Statement] {
    match statements
        .iter()
        .position(|s| matches!(s, Statement::Return))
    {
        Some(pos) => &statements[..pos],
        None => statements,
    }
}

fn called_functions(statements: &[Statement]) -> Vec<String> {
    let mut out = Vec::new();
    for statement in statements {
        match statement {
            Statement::Assign { value, .. } => collect_calls(value, &mut out),
            Statement::CallAssign { function, args, .. } => {
                if !is_builtin(function) {
                    out.push(function.clone());
                }
                for arg in args {
                    collect_calls(arg, &mut out);
                }
            }
            Statement::Return => {}
        }
    }
    out
}

fn collect_calls(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Call { function, args } => {
            if !is_builtin(function) {
                out.push(function.clone());
            }
            for arg in args {
                collect_calls(arg, out);
            }
        }
        Expr::Unary(_, child) => collect_calls(child, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_calls(lhs, out);
            collect_calls(rhs, out);
        }
        Expr::If { cond, then, els } => {
            collect_calls(cond, out);
            collect_calls(then, out);
            if let Some(els) = els {
                collect_calls(els, out);
            }
        }
        Expr::Array(items) => {
            for item in items {
                collect_calls(item, out);
            }
        }
        _ => {}
    }
}

type ValueId = usize;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Input(usize),
    Constant(f64),
    Unary(UnaryOp, ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    IfElseZero { cond: ValueId, value: ValueId },
    CallOutput { site: usize, index: usize },
}

#[derive(Debug)]
struct CallSite {
    function: String,
    args: Vec<ValueId>,
    num_outputs: usize,
}

struct ExtractionState<'a> {
    name: String,
    ctx: &'a FunctionContext<'a>,
    memo: &'a IndexMap<String, ModelFunction>,
    values: Vec<Value>,
    sites: Vec<CallSite>,
    bindings: HashMap<String, ValueId>,
    structures: IndexMap<String, Structure>,
    input_slot: IndexMap<String, usize>,
    output_slots: Vec<String>,
    input_values: HashMap<usize, ValueId>,
}

impl<'a> ExtractionState<'a> {
    fn new(
        decl: &'a FunctionDecl,
        ctx: &'a FunctionContext<'a>,
        memo: &'a IndexMap<String, ModelFunction>,
    ) -> Result<Self, TransferError> {
        let mut state = Self {
            name: decl.name.clone(),
            ctx,
            memo,
            values: Vec::new(),
            sites: Vec::new(),
            bindings: HashMap::new(),
            structures: IndexMap::new(),
            input_slot: IndexMap::new(),
            output_slots: Vec::new(),
            input_values: HashMap::new(),
        };
        for variable in decl
            .inputs
            .iter()
            .chain(decl.outputs.iter())
            .chain(decl.locals.iter())
        {
            let structure = ctx.env.resolve(&variable.ty, &variable.dims)?;
            state.structures.insert(variable.name.clone(), structure);
        }
        for input in &decl.inputs {
            for component in state.structures[&input.name].components(&input.name) {
                let slot = state.input_slot.len();
                state.input_slot.insert(component.name, slot);
            }
        }
        for output in &decl.outputs {
            for component in state.structures[&output.name].components(&output.name) {
                state.output_slots.push(component.name);
            }
        }
        Ok(state)
    }

    fn error(&self, detail: String) -> TransferError {
        TransferError::FunctionExtraction {
            function: self.name.clone(),
            detail,
        }
    }

    fn push(&mut self, value: Value) -> ValueId {
        self.values.push(value);
        self.values.len() - 1
    }

    fn ref_scalars(&self, cref: &ComponentRef) -> Result<Vec<String>, TransferError> {
        let root = self
            .structures
            .get(cref.root())
            .ok_or_else(|| self.error(format!("unknown variable {}", cref.root())))?;
        Ok(ref_components(root, cref)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// The current value bound to a scalar variable. Inputs materialize on
    /// first read; reading an unassigned local or output is a defect.
    fn value_of(&mut self, name: &str) -> Result<ValueId, TransferError> {
        if let Some(&value) = self.bindings.get(name) {
            return Ok(value);
        }
        if let Some(&slot) = self.input_slot.get(name) {
            let value = self.push(Value::Input(slot));
            self.bindings.insert(name.to_string(), value);
            self.input_values.insert(slot, value);
            return Ok(value);
        }
        Err(self.error(format!("{name} is read before assignment")))
    }

    fn call_site(
        &mut self,
        function: &str,
        args: &[Expr],
    ) -> Result<(usize, Vec<usize>), TransferError> {
        let callee_decl = self
            .ctx
            .decls
            .get(function)
            .copied()
            .ok_or_else(|| self.error(format!("calls undeclared function {function}")))?;
        let callee = self
            .memo
            .get(function)
            .ok_or_else(|| self.error(format!("calls unextracted function {function}")))?;
        let mut arg_values = Vec::new();
        for arg in args {
            arg_values.extend(self.lower_expr_vec(arg)?);
        }
        if arg_values.len() != callee.num_inputs() {
            return Err(self.error(format!(
                "calls {function} with {} scalar arguments, expected {}",
                arg_values.len(),
                callee.num_inputs()
            )));
        }
        let arities = output_arities(callee_decl, &self.ctx.env)?;
        self.sites.push(CallSite {
            function: function.to_string(),
            args: arg_values,
            num_outputs: callee.num_outputs(),
        });
        Ok((self.sites.len() - 1, arities))
    }

    fn lower_builtin(&mut self, function: &str, args: &[Expr]) -> Result<ValueId, TransferError> {
        let op = match function {
            "sin" => Some(UnaryOp::Sin),
            "cos" => Some(UnaryOp::Cos),
            "tan" => Some(UnaryOp::Tan),
            "asin" => Some(UnaryOp::Asin),
            "acos" => Some(UnaryOp::Acos),
            "atan" => Some(UnaryOp::Atan),
            "sinh" => Some(UnaryOp::Sinh),
            "cosh" => Some(UnaryOp::Cosh),
            "tanh" => Some(UnaryOp::Tanh),
            "exp" => Some(UnaryOp::Exp),
            "log" => Some(UnaryOp::Log),
            "sqrt" => Some(UnaryOp::Sqrt),
            "abs" => Some(UnaryOp::Abs),
            _ => None,
        };
        if let Some(op) = op {
            if args.len() != 1 {
                return Err(self.error(format!("{function} takes one argument")));
            }
            let child = self.lower_expr(&args[0])?;
            return Ok(self.push(Value::Unary(op, child)));
        }
        if function == "log10" {
            if args.len() != 1 {
                return Err(self.error("log10 takes one argument".to_string()));
            }
            let child = self.lower_expr(&args[0])?;
            let log = self.push(Value::Unary(UnaryOp::Log, child));
            let factor = self.push(Value::Constant(LOG10_FACTOR));
            return Ok(self.push(Value::Binary(BinaryOp::Mul, factor, log)));
        }
        let op = match function {
            "min" => BinaryOp::Min,
            "max" => BinaryOp::Max,
            "atan2" => BinaryOp::Atan2,
            "pow" => BinaryOp::Pow,
            _ => unreachable!("unhandled builtin {function}"),
        };
        if args.len() != 2 {
            return Err(self.error(format!("{function} takes two arguments")));
        }
        let lhs = self.lower_expr(&args[0])?;
        let rhs = self.lower_expr(&args[1])?;
        Ok(self.push(Value::Binary(op, lhs, rhs)))
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<ValueId, TransferError> {
        match expr {
            Expr::Number(value) => Ok(self.push(Value::Constant(*value))),
            Expr::Bool(value) => Ok(self.push(Value::Constant(if *value { 1.0 } else { 0.0 }))),
            Expr::Str(_) => Err(self.error("string expression in function body".to_string())),
            Expr::Ref(cref) => {
                let scalars = self.ref_scalars(cref)?;
                if scalars.len() != 1 {
                    return Err(TransferError::ShapeMismatch {
                        context: format!("scalar use of aggregate {cref} in {}", self.name),
                    });
                }
                self.value_of(&scalars[0])
            }
            Expr::Der(_) => Err(self.error("der() inside a function body".to_string())),
            Expr::Unary(op, child) => {
                let child = self.lower_expr(child)?;
                let op = match op {
                    UnOp::Neg => UnaryOp::Neg,
                    UnOp::Not => UnaryOp::Not,
                };
                Ok(self.push(Value::Unary(op, child)))
            }
            Expr::Binary(op, lhs, rhs) => {
                // > and >= canonicalize by operand swap
                let (op, lhs, rhs) = match op {
                    BinOp::Gt => (BinaryOp::Lt, rhs, lhs),
                    BinOp::Ge => (BinaryOp::Le, rhs, lhs),
                    BinOp::Add => (BinaryOp::Add, lhs, rhs),
                    BinOp::Sub => (BinaryOp::Sub, lhs, rhs),
                    BinOp::Mul => (BinaryOp::Mul, lhs, rhs),
                    BinOp::Div => (BinaryOp::Div, lhs, rhs),
                    BinOp::Pow => (BinaryOp::Pow, lhs, rhs),
                    BinOp::Lt => (BinaryOp::Lt, lhs, rhs),
                    BinOp::Le => (BinaryOp::Le, lhs, rhs),
                    BinOp::Eq => (BinaryOp::Eq, lhs, rhs),
                    BinOp::Ne => (BinaryOp::Ne, lhs, rhs),
                    BinOp::And => (BinaryOp::And, lhs, rhs),
                    BinOp::Or => (BinaryOp::Or, lhs, rhs),
                };
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(self.push(Value::Binary(op, lhs, rhs)))
            }
            Expr::If { cond, then, els } => {
                let cond = self.lower_expr(cond)?;
                let then = self.lower_expr(then)?;
                let taken = self.push(Value::IfElseZero { cond, value: then });
                match els {
                    None => Ok(taken),
                    Some(els) => {
                        let els = self.lower_expr(els)?;
                        let not = self.push(Value::Unary(UnaryOp::Not, cond));
                        let skipped = self.push(Value::IfElseZero {
                            cond: not,
                            value: els,
                        });
                        Ok(self.push(Value::Binary(BinaryOp::Add, taken, skipped)))
                    }
                }
            }
            Expr::Call { function, args } => {
                if is_builtin(function) {
                    self.lower_builtin(function, args)
                } else {
                    let (site, arities) = self.call_site(function, args)?;
                    if arities[0] != 1 {
                        return Err(TransferError::ShapeMismatch {
                            context: format!("scalar use of call to {function} in {}", self.name),
                        });
                    }
                    Ok(self.push(Value::CallOutput { site, index: 0 }))
                }
            }
            Expr::Array(_) => Err(TransferError::ShapeMismatch {
                context: format!("array constructor in scalar position in {}", self.name),
            }),
        }
    }

    fn lower_expr_vec(&mut self, expr: &Expr) -> Result<Vec<ValueId>, TransferError> {
        match expr {
            Expr::Ref(cref) => {
                let scalars = self.ref_scalars(cref)?;
                scalars.iter().map(|name| self.value_of(name)).collect()
            }
            Expr::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(self.lower_expr_vec(item)?);
                }
                Ok(out)
            }
            Expr::Unary(op, child) => {
                let children = self.lower_expr_vec(child)?;
                let op = match op {
                    UnOp::Neg => UnaryOp::Neg,
                    UnOp::Not => UnaryOp::Not,
                };
                Ok(children
                    .into_iter()
                    .map(|c| self.push(Value::Unary(op, c)))
                    .collect())
            }
            Expr::Binary(op, lhs, rhs) => {
                let (op, lhs, rhs) = match op {
                    BinOp::Gt => (BinaryOp::Lt, rhs, lhs),
                    BinOp::Ge => (BinaryOp::Le, rhs, lhs),
                    BinOp::Add => (BinaryOp::Add, lhs, rhs),
                    BinOp::Sub => (BinaryOp::Sub, lhs, rhs),
                    BinOp::Mul => (BinaryOp::Mul, lhs, rhs),
                    BinOp::Div => (BinaryOp::Div, lhs, rhs),
                    BinOp::Pow => (BinaryOp::Pow, lhs, rhs),
                    BinOp::Lt => (BinaryOp::Lt, lhs, rhs),
                    BinOp::Le => (BinaryOp::Le, lhs, rhs),
                    BinOp::Eq => (BinaryOp::Eq, lhs, rhs),
                    BinOp::Ne => (BinaryOp::Ne, lhs, rhs),
                    BinOp::And => (BinaryOp::And, lhs, rhs),
                    BinOp::Or => (BinaryOp::Or, lhs, rhs),
                };
                let lhs = self.lower_expr_vec(lhs)?;
                let rhs = self.lower_expr_vec(rhs)?;
                let (lhs, rhs) = broadcast(lhs, rhs, &self.name)?;
                Ok(lhs
                    .into_iter()
                    .zip(rhs)
                    .map(|(l, r)| self.push(Value::Binary(op, l, r)))
                    .collect())
            }
            Expr::Call { function, args } if !is_builtin(function) => {
                let (site, arities) = self.call_site(function, args)?;
                Ok((0..arities[0])
                    .map(|index| self.push(Value::CallOutput { site, index }))
                    .collect())
            }
            _ => Ok(vec![self.lower_expr(expr)?]),
        }
    }

    fn run_statement(&mut self, statement: &Statement) -> Result<(), TransferError> {
        match statement {
            Statement::Assign { target, value } => {
                let targets = self.ref_scalars(target)?;
                if targets.len() == 1 {
                    let value = self.lower_expr(value)?;
                    self.bindings.insert(targets[0].clone(), value);
                } else {
                    let values = self.lower_expr_vec(value)?;
                    if values.len() != targets.len() {
                        return Err(TransferError::ShapeMismatch {
                            context: format!("assignment to {target} in {}", self.name),
                        });
                    }
                    for (name, value) in targets.into_iter().zip(values) {
                        self.bindings.insert(name, value);
                    }
                }
            }
            Statement::CallAssign {
                targets,
                function,
                args,
            } => {
                let (site, arities) = self.call_site(function, args)?;
                if targets.len() != arities.len() {
                    return Err(self.error(format!(
                        "binds {} outputs of {function}, which has {}",
                        targets.len(),
                        arities.len()
                    )));
                }
                let mut slot = 0;
                for (target, arity) in targets.iter().zip(arities) {
                    if let Some(cref) = target {
                        let names = self.ref_scalars(cref)?;
                        if names.len() != arity {
                            return Err(TransferError::ShapeMismatch {
                                context: format!("call target {cref} in {}", self.name),
                            });
                        }
                        for (k, name) in names.into_iter().enumerate() {
                            let value = self.push(Value::CallOutput {
                                site,
                                index: slot + k,
                            });
                            self.bindings.insert(name, value);
                        }
                    }
                    slot += arity;
                }
            }
            Statement::Return => unreachable!("statements are truncated at return"),
        }
        Ok(())
    }

    fn run(mut self, statements: &[Statement]) -> Result<ModelFunction, TransferError> {
        for statement in statements {
            self.run_statement(statement)?;
        }
        let mut output_values = Vec::with_capacity(self.output_slots.len());
        for name in &self.output_slots {
            let value = self
                .bindings
                .get(name)
                .copied()
                .ok_or_else(|| self.error(format!("output {name} is never assigned")))?;
            output_values.push(value);
        }
        let num_inputs = self.input_slot.len();
        let num_outputs = self.output_slots.len();
        let instructions = Scheduler::new(&self.values, &self.sites, &self.input_values)
            .schedule(&output_values, num_inputs);
        Ok(ModelFunction::new(
            &self.name,
            vec![SlotShape::scalar(); num_inputs],
            vec![SlotShape::scalar(); num_outputs],
            instructions,
        ))
    }
}

fn broadcast(
    lhs: Vec<ValueId>,
    rhs: Vec<ValueId>,
    function: &str,
) -> Result<(Vec<ValueId>, Vec<ValueId>), TransferError> {
    match (lhs.len(), rhs.len()) {
        (l, r) if l == r => Ok((lhs, rhs)),
        (1, r) => Ok((vec![lhs[0]; r], rhs)),
        (_, 1) => {
            let l = lhs.len();
            Ok((lhs, vec![rhs[0]; l]))
        }
        _ => Err(TransferError::ShapeMismatch {
            context: format!("elementwise operation in {function}"),
        }),
    }
}

/// One entry of the emission order before registers are assigned.
#[derive(Debug, Clone, Copy)]
enum Emit {
    Value(ValueId),
    CallSite(usize),
    Output { index: usize, value: ValueId },
}

struct Scheduler<'a> {
    values: &'a [Value],
    sites: &'a [CallSite],
    input_values: &'a HashMap<usize, ValueId>,
    /// live bound outputs per call site, by callee output index
    site_outputs: HashMap<usize, Vec<(usize, ValueId)>>,
    emitted: HashSet<ValueId>,
    emitted_sites: HashSet<usize>,
    seq: Vec<Emit>,
}

impl<'a> Scheduler<'a> {
    fn new(
        values: &'a [Value],
        sites: &'a [CallSite],
        input_values: &'a HashMap<usize, ValueId>,
    ) -> Self {
        Self {
            values,
            sites,
            input_values,
            site_outputs: HashMap::new(),
            emitted: HashSet::new(),
            emitted_sites: HashSet::new(),
            seq: Vec::new(),
        }
    }

    fn operands(value: &Value, sites: &[CallSite]) -> Vec<ValueId> {
        match value {
            Value::Input(_) | Value::Constant(_) => Vec::new(),
            Value::Unary(_, child) => vec![*child],
            Value::Binary(_, lhs, rhs) => vec![*lhs, *rhs],
            Value::IfElseZero { cond, value } => vec![*cond, *value],
            Value::CallOutput { site, .. } => sites[*site].args.clone(),
        }
    }

    /// Mark everything reachable from the output values; only the live part
    /// of the graph is emitted, and only live call outputs claim registers.
    fn mark_live(&mut self, outputs: &[ValueId]) {
        let mut live = HashSet::new();
        let mut stack: Vec<ValueId> = outputs.to_vec();
        while let Some(value) = stack.pop() {
            if !live.insert(value) {
                continue;
            }
            stack.extend(Self::operands(&self.values[value], self.sites));
        }
        for (id, value) in self.values.iter().enumerate() {
            if let Value::CallOutput { site, index } = value {
                if live.contains(&id) {
                    self.site_outputs
                        .entry(*site)
                        .or_default()
                        .push((*index, id));
                }
            }
        }
        for outputs in self.site_outputs.values_mut() {
            outputs.sort();
        }
    }

    fn emit(&mut self, value: ValueId) {
        if self.emitted.contains(&value) {
            return;
        }
        let node = self.values[value].clone();
        match node {
            Value::CallOutput { site, .. } => {
                if self.emitted_sites.contains(&site) {
                    return;
                }
                for arg in self.sites[site].args.clone() {
                    self.emit(arg);
                }
                self.emitted_sites.insert(site);
                self.seq.push(Emit::CallSite(site));
                let bound = self.site_outputs.get(&site).cloned().unwrap_or_default();
                for (_, out_value) in bound {
                    self.emitted.insert(out_value);
                }
            }
            other => {
                for operand in Self::operands(&other, self.sites) {
                    self.emit(operand);
                }
                self.emitted.insert(value);
                self.seq.push(Emit::Value(value));
            }
        }
    }

    fn schedule(mut self, outputs: &[ValueId], num_inputs: usize) -> Vec<Instruction> {
        self.mark_live(outputs);
        for (index, &value) in outputs.iter().enumerate() {
            self.emit(value);
            self.seq.push(Emit::Output { index, value });
        }
        // inputs the body never consumed still materialize, in input order
        let mut values: Vec<Value> = self.values.to_vec();
        for slot in 0..num_inputs {
            match self.input_values.get(&slot) {
                Some(&value) if self.emitted.contains(&value) => {}
                Some(&value) => {
                    self.emitted.insert(value);
                    self.seq.push(Emit::Value(value));
                }
                None => {
                    values.push(Value::Input(slot));
                    self.seq.push(Emit::Value(values.len() - 1));
                }
            }
        }
        allocate_registers(&values, self.sites, &self.site_outputs, &self.seq)
    }
}

fn allocate_registers(
    values: &[Value],
    sites: &[CallSite],
    site_outputs: &HashMap<usize, Vec<(usize, ValueId)>>,
    seq: &[Emit],
) -> Vec<Instruction> {
    // last position each value is consumed at
    let mut last_use: HashMap<ValueId, usize> = HashMap::new();
    for (pos, emit) in seq.iter().enumerate() {
        let uses: Vec<ValueId> = match emit {
            Emit::Value(value) => Scheduler::operands(&values[*value], sites),
            Emit::CallSite(site) => sites[*site].args.clone(),
            Emit::Output { value, .. } => vec![*value],
        };
        for used in uses {
            last_use.insert(used, pos);
        }
    }

    let mut reg_of: HashMap<ValueId, Register> = HashMap::new();
    let mut next_reg: Register = 0;
    let mut fresh = || {
        let reg = next_reg;
        next_reg += 1;
        reg
    };
    let mut instructions = Vec::with_capacity(seq.len());
    for (pos, emit) in seq.iter().enumerate() {
        match emit {
            Emit::Value(value) => {
                let operands = Scheduler::operands(&values[*value], sites);
                // the result reuses the lowest register among operands whose
                // values die here; otherwise it takes a fresh register
                let dying: Option<Register> = operands
                    .iter()
                    .filter(|u| last_use.get(u) == Some(&pos))
                    .map(|u| reg_of[u])
                    .min();
                let reg = dying.unwrap_or_else(&mut fresh);
                reg_of.insert(*value, reg);
                instructions.push(render_value(&values[*value], reg, &reg_of));
            }
            Emit::CallSite(site) => {
                let call = &sites[*site];
                let args: Vec<Register> = call.args.iter().map(|a| reg_of[a]).collect();
                let bound = site_outputs.get(site).cloned().unwrap_or_default();
                let mut outputs: Vec<Option<Register>> = vec![None; call.num_outputs];
                for (index, out_value) in bound {
                    let reg = fresh();
                    reg_of.insert(out_value, reg);
                    outputs[index] = Some(reg);
                }
                instructions.push(Instruction::Call {
                    outputs,
                    function: call.function.clone(),
                    args,
                });
            }
            Emit::Output { index, value } => {
                instructions.push(Instruction::Output {
                    index: *index,
                    reg: reg_of[value],
                });
            }
        }
    }
    instructions
}

fn render_value(value: &Value, reg: Register, reg_of: &HashMap<ValueId, Register>) -> Instruction {
    match value {
        Value::Input(index) => Instruction::Input { reg, index: *index },
        Value::Constant(v) => Instruction::Constant { reg, value: *v },
        Value::Unary(op, child) => Instruction::Unary {
            reg,
            op: *op,
            arg: reg_of[child],
        },
        Value::Binary(op, lhs, rhs) => Instruction::Binary {
            reg,
            op: *op,
            lhs: reg_of[lhs],
            rhs: reg_of[rhs],
        },
        Value::IfElseZero { cond, value } => Instruction::IfElseZero {
            reg,
            cond: reg_of[cond],
            value: reg_of[value],
        },
        Value::CallOutput { .. } => unreachable!("call outputs are defined by their site"),
    }
}
