//! The transfer pass: walks a flattened model description and assembles a
//! [`Model`] (and optionally an [`OptimizationProblem`]) out of it.
//!
//! Variables are scalarized and classified in declaration order, aliases are
//! wired up as non-owning name references, and equations lower to `rhs - lhs`
//! residual expressions. Function calls either become call nodes referencing
//! extracted [`ModelFunction`]s or are expanded in place, depending on the
//! inlining mode.

use std::collections::HashSet;

use indexmap::IndexMap;
use log::{debug, info};

use crate::ast::{
    BaseType, BinOp, Causality, ComponentRef, Equation, Expr, ModelDescription,
    OptimizationDescription, RecordDecl, TimePoint, UnOp, Variability, VariableDecl,
};
use crate::error::TransferError;
use crate::graph::{BinaryOp, MX};
use crate::model::{Model, ModelFunction, Variable, VariableKind};
use crate::optimization::{OptimizationProblem, PathConstraint};

use super::flatten::{ref_components, Structure, StructureEnv};
use super::functions::{extract_function, is_builtin, output_arities, FunctionContext};
use super::TransferOptions;

pub struct ModelBuilder<'a> {
    source: &'a ModelDescription,
    options: &'a TransferOptions,
    records: IndexMap<String, RecordDecl>,
    declared_bases: IndexMap<String, BaseType>,
    structures: IndexMap<String, Structure>,
    differentiated: HashSet<String>,
    extracted: IndexMap<String, ModelFunction>,
    temp_counter: usize,
    model: Model,
}

impl<'a> ModelBuilder<'a> {
    pub fn build(
        source: &'a ModelDescription,
        options: &'a TransferOptions,
    ) -> Result<Model, TransferError> {
        let mut builder = Self::new(source, options)?;
        builder.run()?;
        info!("transferred model {}", source.name);
        Ok(builder.model)
    }

    pub fn build_optimization(
        desc: &'a OptimizationDescription,
        options: &'a TransferOptions,
    ) -> Result<OptimizationProblem, TransferError> {
        let mut builder = Self::new(&desc.model, options)?;
        builder.run()?;
        let start_time = time_point(desc.start_time, "startTime");
        let final_time = time_point(desc.final_time, "finalTime");
        let lagrange = match &desc.lagrange {
            Some(expr) => builder.lower_scalar(expr)?,
            None => MX::zero(),
        };
        let mayer = match &desc.mayer {
            Some(expr) => builder.lower_scalar(expr)?,
            None => MX::zero(),
        };
        let mut constraints = Vec::with_capacity(desc.constraints.len());
        for constraint in &desc.constraints {
            constraints.push(PathConstraint::new(
                constraint.kind,
                builder.lower_scalar(&constraint.lhs)?,
                builder.lower_scalar(&constraint.rhs)?,
            ));
        }
        info!("transferred optimization problem {}", desc.name());
        Ok(OptimizationProblem::new(
            builder.model,
            start_time,
            final_time,
            lagrange,
            mayer,
            constraints,
        ))
    }

    fn new(
        source: &'a ModelDescription,
        options: &'a TransferOptions,
    ) -> Result<Self, TransferError> {
        let records: IndexMap<String, RecordDecl> = source
            .records
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        let declared_bases: IndexMap<String, BaseType> = source
            .types
            .iter()
            .map(|t| (t.name.clone(), t.base))
            .collect();
        let mut structures = IndexMap::new();
        {
            let env = StructureEnv {
                records: &records,
                declared_bases: &declared_bases,
            };
            for decl in &source.variables {
                structures.insert(decl.name.clone(), env.resolve(&decl.ty, &decl.dims)?);
            }
        }
        let mut differentiated = HashSet::new();
        for equation in source.equations.iter().chain(&source.initial_equations) {
            scan_equation_for_der(equation, &structures, &mut differentiated)?;
        }
        Ok(Self {
            source,
            options,
            records,
            declared_bases,
            structures,
            differentiated,
            extracted: IndexMap::new(),
            temp_counter: 0,
            model: Model::new(&source.name),
        })
    }

    fn run(&mut self) -> Result<(), TransferError> {
        self.declare_types()?;
        self.declare_variables()?;
        self.lower_equations()?;
        if !self.options.inline_functions {
            let extracted = std::mem::take(&mut self.extracted);
            for (_, function) in extracted {
                self.model.set_function(function);
            }
        }
        Ok(())
    }

    fn declare_types(&mut self) -> Result<(), TransferError> {
        for decl in &self.source.types {
            let mut attributes = IndexMap::new();
            for (name, expr) in &decl.attributes {
                attributes.insert(name.clone(), lower_attribute(expr)?);
            }
            let declared = self
                .model
                .types_mut()
                .declare(&decl.name, decl.base, attributes);
            debug!("declared type {} as {}", decl.name, declared.name());
        }
        Ok(())
    }

    fn declare_variables(&mut self) -> Result<(), TransferError> {
        let source = self.source;
        for decl in &source.variables {
            let components = self.structures[&decl.name].components(&decl.name);
            if decl.alias.is_some() && components.len() != 1 {
                return Err(TransferError::ShapeMismatch {
                    context: format!("alias declaration of aggregate {}", decl.name),
                });
            }
            let bindings = self.component_bindings(decl, components.len())?;
            for (component, binding) in components.into_iter().zip(bindings) {
                let kind = self.classify(decl, component.base, &component.name);
                let declared_type = match &component.type_name {
                    Some(name) => self.model.types().lookup(name)?,
                    None => self.model.types().primitive(component.base),
                };
                let mut variable = Variable::new(&component.name, kind, declared_type);
                if let Some(binding) = binding {
                    variable.set_attribute("bindingExpression", binding);
                }
                for (name, expr) in &decl.attributes {
                    variable.set_attribute(name, lower_attribute(expr)?);
                }
                if let Some(alias) = &decl.alias {
                    variable.set_alias(&alias.target, alias.negated);
                }
                self.model.add_variable(variable);
                if kind == VariableKind::Differentiated {
                    let der = Variable::new(
                        &format!("der_{}", component.name),
                        VariableKind::Derivative,
                        self.model.types().primitive(BaseType::Real),
                    );
                    self.model.add_variable(der);
                }
            }
        }
        Ok(())
    }

    /// Binding expressions per scalar component. An aggregate parameter bound
    /// by a function call is mediated through synthetic `temp_<k>` dependent
    /// parameters, declared just before the parameter's own components.
    fn component_bindings(
        &mut self,
        decl: &VariableDecl,
        count: usize,
    ) -> Result<Vec<Option<MX>>, TransferError> {
        let binding = match &decl.binding {
            None => return Ok(vec![None; count]),
            Some(binding) => binding,
        };
        if count > 1 && decl.variability == Variability::Parameter {
            if let Expr::Call { function, args } = binding {
                if !is_builtin(function) {
                    let temp_base = self.next_temp();
                    let temp_components = self.structures[&decl.name].components(&temp_base);
                    let outs = self.lower_call_outputs(function, args)?;
                    if outs.len() != count {
                        return Err(TransferError::ShapeMismatch {
                            context: format!("binding of {}", decl.name),
                        });
                    }
                    for (component, out) in temp_components.iter().zip(outs) {
                        let kind = dependent_parameter_kind(component.base);
                        let mut temp = Variable::new(
                            &component.name,
                            kind,
                            self.model.types().primitive(component.base),
                        );
                        temp.set_attribute("bindingExpression", out);
                        self.model.add_variable(temp);
                    }
                    return Ok(temp_components
                        .into_iter()
                        .map(|c| Some(MX::sym(c.name)))
                        .collect());
                }
            }
        }
        if count == 1 {
            return Ok(vec![Some(self.lower_scalar(binding)?)]);
        }
        let list = self.lower_vec(binding)?;
        if list.len() != count {
            return Err(TransferError::ShapeMismatch {
                context: format!("binding of {}", decl.name),
            });
        }
        Ok(list.into_iter().map(Some).collect())
    }

    fn classify(&self, decl: &VariableDecl, base: BaseType, scalar_name: &str) -> VariableKind {
        use VariableKind::*;
        match decl.variability {
            Variability::Constant => match base {
                BaseType::Real => RealConstant,
                BaseType::Integer => IntegerConstant,
                BaseType::Boolean => BooleanConstant,
                BaseType::String => panic!("String variables are outside the DAE"),
            },
            Variability::Parameter => {
                let dependent = decl
                    .binding
                    .as_ref()
                    .map(expr_has_references)
                    .unwrap_or(false);
                match (base, dependent) {
                    (BaseType::Real, false) => RealParameterIndependent,
                    (BaseType::Real, true) => RealParameterDependent,
                    (BaseType::Integer, false) => IntegerParameterIndependent,
                    (BaseType::Integer, true) => IntegerParameterDependent,
                    (BaseType::Boolean, false) => BooleanParameterIndependent,
                    (BaseType::Boolean, true) => BooleanParameterDependent,
                    (BaseType::String, _) => panic!("String variables are outside the DAE"),
                }
            }
            Variability::Discrete => match base {
                BaseType::Real => RealDiscrete,
                BaseType::Integer => IntegerDiscrete,
                BaseType::Boolean => BooleanDiscrete,
                BaseType::String => panic!("String variables are outside the DAE"),
            },
            Variability::Continuous => {
                if decl.causality == Causality::Input {
                    match base {
                        BaseType::Real => RealInput,
                        BaseType::Integer => IntegerInput,
                        BaseType::Boolean => BooleanInput,
                        BaseType::String => panic!("String variables are outside the DAE"),
                    }
                } else {
                    match base {
                        BaseType::Real => {
                            if self.differentiated.contains(scalar_name) {
                                Differentiated
                            } else {
                                RealAlgebraic
                            }
                        }
                        // continuous Integer/Boolean variables are discrete-valued
                        BaseType::Integer => IntegerDiscrete,
                        BaseType::Boolean => BooleanDiscrete,
                        BaseType::String => panic!("String variables are outside the DAE"),
                    }
                }
            }
        }
    }

    fn next_temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("temp_{}", self.temp_counter)
    }

    fn lower_equations(&mut self) -> Result<(), TransferError> {
        let source = self.source;
        for equation in &source.equations {
            for residual in self.lower_equation(equation)? {
                self.model.add_dae_residual(residual);
            }
        }
        for equation in &source.initial_equations {
            for residual in self.lower_equation(equation)? {
                self.model.add_initial_residual(residual);
            }
        }
        Ok(())
    }

    /// Each equation lowers to residuals on the form `rhs - lhs`. Aggregate
    /// equations scalarize componentwise, except function-call equations,
    /// which stay vectorized as one vertical concatenation per side.
    fn lower_equation(&mut self, equation: &Equation) -> Result<Vec<MX>, TransferError> {
        match equation {
            Equation::Simple { lhs, rhs } => {
                if let (Expr::Der(cref), Expr::Call { function, args }) = (lhs, rhs) {
                    if !is_builtin(function) {
                        let targets = self.ref_scalar_names(cref)?;
                        if targets.len() > 1 {
                            return self.lower_der_call_equation(&targets, function, args);
                        }
                    }
                }
                if let Expr::Call { function, args } = rhs {
                    if !is_builtin(function) {
                        let lhs_list = self.lower_vec(lhs)?;
                        let outs = self.lower_call_outputs(function, args)?;
                        if outs.len() != lhs_list.len() {
                            return Err(TransferError::ShapeMismatch {
                                context: format!("function call equation for {function}"),
                            });
                        }
                        return Ok(vec![&stack(outs) - &stack(lhs_list)]);
                    }
                }
                let lhs_list = self.lower_vec(lhs)?;
                let rhs_list = self.lower_vec(rhs)?;
                if lhs_list.len() != rhs_list.len() {
                    return Err(TransferError::ShapeMismatch {
                        context: "equation with mismatched sides".to_string(),
                    });
                }
                Ok(lhs_list
                    .into_iter()
                    .zip(rhs_list)
                    .map(|(l, r)| &r - &l)
                    .collect())
            }
            Equation::Call {
                targets,
                function,
                args,
            } => Ok(vec![self.lower_call_equation(targets, function, args)?]),
        }
    }

    /// `der(A) = f(...)` over an array routes through synthetic algebraic
    /// temporaries: the call equation over the temps first, then one
    /// derivative-matching equation per component, in index order.
    fn lower_der_call_equation(
        &mut self,
        der_targets: &[String],
        function: &str,
        args: &[Expr],
    ) -> Result<Vec<MX>, TransferError> {
        let temp_base = self.next_temp();
        let root = der_targets[0]
            .split('[')
            .next()
            .expect("component names are non-empty")
            .to_string();
        let temp_components = self.structures[&root].components(&temp_base);
        for component in &temp_components {
            let temp = Variable::new(
                &component.name,
                VariableKind::RealAlgebraic,
                self.model.types().primitive(BaseType::Real),
            );
            self.model.add_variable(temp);
        }
        let outs = self.lower_call_outputs(function, args)?;
        if outs.len() != temp_components.len() {
            return Err(TransferError::ShapeMismatch {
                context: format!("function call equation for {function}"),
            });
        }
        let temp_syms: Vec<MX> = temp_components
            .iter()
            .map(|c| MX::sym(c.name.clone()))
            .collect();
        let mut residuals = vec![&stack(outs) - &stack(temp_syms.clone())];
        for (temp, target) in temp_syms.into_iter().zip(der_targets) {
            let der = self.der_symbol(target)?;
            residuals.push(&temp - &der);
        }
        Ok(residuals)
    }

    fn lower_call_equation(
        &mut self,
        targets: &[Option<ComponentRef>],
        function: &str,
        args: &[Expr],
    ) -> Result<MX, TransferError> {
        let arities = self.callee_arities(function)?;
        if targets.len() != arities.len() {
            return Err(TransferError::ShapeMismatch {
                context: format!("function call equation for {function}"),
            });
        }
        let outs_all = self.lower_call_outputs(function, args)?;
        let mut outs = Vec::new();
        let mut target_list = Vec::new();
        let mut slot = 0;
        for (target, arity) in targets.iter().zip(arities) {
            if let Some(cref) = target {
                let components = self.lower_ref_vec(cref)?;
                if components.len() != arity {
                    return Err(TransferError::ShapeMismatch {
                        context: format!("call target {cref}"),
                    });
                }
                outs.extend(outs_all[slot..slot + arity].iter().cloned());
                target_list.extend(components);
            }
            slot += arity;
        }
        if outs.is_empty() {
            return Err(TransferError::ShapeMismatch {
                context: format!("function call equation for {function} binds no outputs"),
            });
        }
        Ok(&stack(outs) - &stack(target_list))
    }

    /// All scalar outputs of a call: call nodes referencing the extracted
    /// function, or the spliced-in body when inlining.
    fn lower_call_outputs(
        &mut self,
        function: &str,
        args: &[Expr],
    ) -> Result<Vec<MX>, TransferError> {
        self.ensure_extracted(function)?;
        let mut args_mx = Vec::new();
        for arg in args {
            args_mx.extend(self.lower_vec(arg)?);
        }
        let callee = &self.extracted[function];
        if args_mx.len() != callee.num_inputs() {
            return Err(TransferError::ShapeMismatch {
                context: format!("arguments of call to {function}"),
            });
        }
        if self.options.inline_functions {
            callee.inline(&args_mx, &self.extracted)
        } else {
            Ok((0..callee.num_outputs())
                .map(|output| MX::call(function, args_mx.clone(), output))
                .collect())
        }
    }

    fn ensure_extracted(&mut self, function: &str) -> Result<(), TransferError> {
        if self.extracted.contains_key(function) {
            return Ok(());
        }
        let ctx = FunctionContext {
            decls: self
                .source
                .functions
                .iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
            env: StructureEnv {
                records: &self.records,
                declared_bases: &self.declared_bases,
            },
        };
        extract_function(function, &ctx, &mut self.extracted)
    }

    fn callee_arities(&self, function: &str) -> Result<Vec<usize>, TransferError> {
        let decl = self
            .source
            .functions
            .iter()
            .find(|f| f.name == function)
            .ok_or_else(|| TransferError::FunctionExtraction {
                function: function.to_string(),
                detail: "is not declared".to_string(),
            })?;
        let env = StructureEnv {
            records: &self.records,
            declared_bases: &self.declared_bases,
        };
        output_arities(decl, &env)
    }

    fn ref_scalar_names(&self, cref: &ComponentRef) -> Result<Vec<String>, TransferError> {
        let root = self
            .structures
            .get(cref.root())
            .ok_or_else(|| TransferError::UnknownVariable {
                name: cref.root().to_string(),
            })?;
        Ok(ref_components(root, cref)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// A scalar variable reference, resolved through the alias chain: an
    /// alias lowers to its representative's symbol, negated if the chain
    /// flips sign.
    fn resolve_symbol(&self, name: &str) -> Result<MX, TransferError> {
        let mut negated = false;
        let mut visited = HashSet::new();
        let mut current = self.model.variable_by_name(name)?;
        loop {
            let alias = {
                let variable = current.borrow();
                variable.alias().cloned()
            };
            match alias {
                None => break,
                Some(alias) => {
                    negated ^= alias.negated;
                    if !visited.insert(alias.target.clone()) {
                        return Err(TransferError::InvalidAliasGraph {
                            name: name.to_string(),
                        });
                    }
                    current = self.model.variable_by_name(&alias.target)?;
                }
            }
        }
        let sym = current.borrow().var().clone();
        Ok(if negated { -&sym } else { sym })
    }

    fn der_symbol(&self, component: &str) -> Result<MX, TransferError> {
        let name = format!("der_{component}");
        Ok(self.model.variable_by_name(&name)?.borrow().var().clone())
    }

    fn lower_ref_vec(&self, cref: &ComponentRef) -> Result<Vec<MX>, TransferError> {
        self.ref_scalar_names(cref)?
            .iter()
            .map(|name| self.resolve_symbol(name))
            .collect()
    }

    fn lower_scalar(&mut self, expr: &Expr) -> Result<MX, TransferError> {
        let list = self.lower_vec(expr)?;
        if list.len() != 1 {
            return Err(TransferError::ShapeMismatch {
                context: "aggregate expression in scalar position".to_string(),
            });
        }
        Ok(list.into_iter().next().unwrap())
    }

    fn lower_vec(&mut self, expr: &Expr) -> Result<Vec<MX>, TransferError> {
        match expr {
            Expr::Number(value) => Ok(vec![MX::constant(*value)]),
            Expr::Bool(value) => Ok(vec![MX::from_bool(*value)]),
            Expr::Str(value) => Ok(vec![MX::sym(value.clone())]),
            Expr::Ref(cref) => {
                // the horizon names are reserved symbols, not model variables
                let root = cref.root();
                if (root == "startTime" || root == "finalTime")
                    && cref.parts.len() == 1
                    && cref.parts[0].indices.is_empty()
                    && !self.structures.contains_key(root)
                {
                    return Ok(vec![MX::sym(root)]);
                }
                self.lower_ref_vec(cref)
            }
            Expr::Der(cref) => self
                .ref_scalar_names(cref)?
                .iter()
                .map(|name| self.der_symbol(name))
                .collect(),
            Expr::Unary(op, child) => {
                let children = self.lower_vec(child)?;
                Ok(children
                    .iter()
                    .map(|c| match op {
                        UnOp::Neg => -c,
                        UnOp::Not => c.not(),
                    })
                    .collect())
            }
            Expr::Binary(op, lhs, rhs) => {
                let (op, lhs, rhs) = canonical_binop(*op, lhs, rhs);
                let lhs_list = self.lower_vec(lhs)?;
                let rhs_list = self.lower_vec(rhs)?;
                let (lhs_list, rhs_list) = broadcast(lhs_list, rhs_list)?;
                Ok(lhs_list
                    .iter()
                    .zip(rhs_list.iter())
                    .map(|(l, r)| MX::binary(op, l, r))
                    .collect())
            }
            Expr::If { cond, then, els } => {
                let cond = self.lower_scalar(cond)?;
                let then = self.lower_scalar(then)?;
                let taken = MX::if_else_zero(&cond, &then);
                match els {
                    None => Ok(vec![taken]),
                    Some(els) => {
                        let els = self.lower_scalar(els)?;
                        let skipped = MX::if_else_zero(&cond.not(), &els);
                        Ok(vec![&taken + &skipped])
                    }
                }
            }
            Expr::Call { function, args } => {
                if is_builtin(function) {
                    self.lower_builtin(function, args)
                } else {
                    let arities = self.callee_arities(function)?;
                    let outs = self.lower_call_outputs(function, args)?;
                    Ok(outs.into_iter().take(arities[0]).collect())
                }
            }
            Expr::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(self.lower_vec(item)?);
                }
                Ok(out)
            }
        }
    }

    fn lower_builtin(&mut self, function: &str, args: &[Expr]) -> Result<Vec<MX>, TransferError> {
        let one_arg = |builder: &mut Self, args: &[Expr]| -> Result<MX, TransferError> {
            if args.len() != 1 {
                return Err(TransferError::ShapeMismatch {
                    context: format!("arguments of {function}"),
                });
            }
            builder.lower_scalar(&args[0])
        };
        let two_args = |builder: &mut Self, args: &[Expr]| -> Result<(MX, MX), TransferError> {
            if args.len() != 2 {
                return Err(TransferError::ShapeMismatch {
                    context: format!("arguments of {function}"),
                });
            }
            Ok((builder.lower_scalar(&args[0])?, builder.lower_scalar(&args[1])?))
        };
        let value = match function {
            "sin" => one_arg(self, args)?.sin(),
            "cos" => one_arg(self, args)?.cos(),
            "tan" => one_arg(self, args)?.tan(),
            "asin" => one_arg(self, args)?.asin(),
            "acos" => one_arg(self, args)?.acos(),
            "atan" => one_arg(self, args)?.atan(),
            "sinh" => one_arg(self, args)?.sinh(),
            "cosh" => one_arg(self, args)?.cosh(),
            "tanh" => one_arg(self, args)?.tanh(),
            "exp" => one_arg(self, args)?.exp(),
            "log" => one_arg(self, args)?.log(),
            "log10" => one_arg(self, args)?.log10(),
            "sqrt" => one_arg(self, args)?.sqrt(),
            "abs" => one_arg(self, args)?.abs(),
            "min" => {
                let (lhs, rhs) = two_args(self, args)?;
                lhs.min(&rhs)
            }
            "max" => {
                let (lhs, rhs) = two_args(self, args)?;
                lhs.max(&rhs)
            }
            "atan2" => {
                let (lhs, rhs) = two_args(self, args)?;
                lhs.atan2(&rhs)
            }
            "pow" => {
                let (lhs, rhs) = two_args(self, args)?;
                lhs.pow(&rhs)
            }
            _ => unreachable!("unhandled builtin {function}"),
        };
        Ok(vec![value])
    }
}

fn time_point(point: TimePoint, free_name: &str) -> MX {
    match point {
        TimePoint::Literal(value) => MX::constant(value),
        TimePoint::Free => MX::sym(free_name),
    }
}

fn dependent_parameter_kind(base: BaseType) -> VariableKind {
    match base {
        BaseType::Real => VariableKind::RealParameterDependent,
        BaseType::Integer => VariableKind::IntegerParameterDependent,
        BaseType::Boolean => VariableKind::BooleanParameterDependent,
        BaseType::String => panic!("String variables are outside the DAE"),
    }
}

fn stack(items: Vec<MX>) -> MX {
    match items.len() {
        1 => items.into_iter().next().unwrap(),
        _ => MX::vertcat(items),
    }
}

/// `>` and `>=` canonicalize to `<` / `<=` by operand swap.
fn canonical_binop<'e>(op: BinOp, lhs: &'e Expr, rhs: &'e Expr) -> (BinaryOp, &'e Expr, &'e Expr) {
    match op {
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
    }
}

fn broadcast(lhs: Vec<MX>, rhs: Vec<MX>) -> Result<(Vec<MX>, Vec<MX>), TransferError> {
    match (lhs.len(), rhs.len()) {
        (l, r) if l == r => Ok((lhs, rhs)),
        (1, r) => Ok((vec![lhs[0].clone(); r], rhs)),
        (_, 1) => {
            let l = lhs.len();
            Ok((lhs, vec![rhs[0].clone(); l]))
        }
        _ => Err(TransferError::ShapeMismatch {
            context: "elementwise operation".to_string(),
        }),
    }
}

/// Attribute values lower without variable resolution: names stay bare
/// symbols (`unit = "kg"` prints as the symbol `kg`).
fn lower_attribute(expr: &Expr) -> Result<MX, TransferError> {
    match expr {
        Expr::Number(value) => Ok(MX::constant(*value)),
        Expr::Bool(value) => Ok(MX::from_bool(*value)),
        Expr::Str(value) => Ok(MX::sym(value.clone())),
        Expr::Ref(cref) => Ok(MX::sym(cref.to_string())),
        Expr::Unary(op, child) => {
            let child = lower_attribute(child)?;
            Ok(match op {
                UnOp::Neg => -&child,
                UnOp::Not => child.not(),
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let (op, lhs, rhs) = canonical_binop(*op, lhs, rhs);
            Ok(MX::binary(op, &lower_attribute(lhs)?, &lower_attribute(rhs)?))
        }
        _ => Err(TransferError::ShapeMismatch {
            context: "attribute expression".to_string(),
        }),
    }
}

fn scan_equation_for_der(
    equation: &Equation,
    structures: &IndexMap<String, Structure>,
    out: &mut HashSet<String>,
) -> Result<(), TransferError> {
    match equation {
        Equation::Simple { lhs, rhs } => {
            scan_expr_for_der(lhs, structures, out)?;
            scan_expr_for_der(rhs, structures, out)
        }
        Equation::Call { args, .. } => {
            for arg in args {
                scan_expr_for_der(arg, structures, out)?;
            }
            Ok(())
        }
    }
}

fn scan_expr_for_der(
    expr: &Expr,
    structures: &IndexMap<String, Structure>,
    out: &mut HashSet<String>,
) -> Result<(), TransferError> {
    match expr {
        Expr::Der(cref) => {
            let root =
                structures
                    .get(cref.root())
                    .ok_or_else(|| TransferError::UnknownVariable {
                        name: cref.root().to_string(),
                    })?;
            for component in ref_components(root, cref)? {
                out.insert(component.name);
            }
            Ok(())
        }
        Expr::Unary(_, child) => scan_expr_for_der(child, structures, out),
        Expr::Binary(_, lhs, rhs) => {
            scan_expr_for_der(lhs, structures, out)?;
            scan_expr_for_der(rhs, structures, out)
        }
        Expr::If { cond, then, els } => {
            scan_expr_for_der(cond, structures, out)?;
            scan_expr_for_der(then, structures, out)?;
            if let Some(els) = els {
                scan_expr_for_der(els, structures, out)?;
            }
            Ok(())
        }
        Expr::Call { args, .. } => {
            for arg in args {
                scan_expr_for_der(arg, structures, out)?;
            }
            Ok(())
        }
        Expr::Array(items) => {
            for item in items {
                scan_expr_for_der(item, structures, out)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn expr_has_references(expr: &Expr) -> bool {
    match expr {
        Expr::Ref(_) | Expr::Der(_) => true,
        Expr::Call { function, args } => {
            !is_builtin(function) || args.iter().any(expr_has_references)
        }
        Expr::Unary(_, child) => expr_has_references(child),
        Expr::Binary(_, lhs, rhs) => expr_has_references(lhs) || expr_has_references(rhs),
        Expr::If { cond, then, els } => {
            expr_has_references(cond)
                || expr_has_references(then)
                || els.as_deref().map(expr_has_references).unwrap_or(false)
        }
        Expr::Array(items) => items.iter().any(expr_has_references),
        _ => false,
    }
}
