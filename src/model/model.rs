use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, info};

use crate::error::TransferError;
use crate::graph::{evaluate, EvalContext, MX};

use super::function::ModelFunction;
use super::var_type::{TypeRegistry, VariableType};
use super::variable::{Variable, VariableKind};

/// The assembled model: variable database, DAE and initial residuals,
/// extracted functions and declared types.
///
/// The only mutation after assembly is the lazily computed
/// `evaluatedBindingExpression` attribute written by
/// [`Model::calculate_values_for_dependent_parameters`]; that pass is
/// idempotent but assumes a single writer at a time.
#[derive(Debug)]
pub struct Model {
    name: String,
    variables: Vec<Rc<RefCell<Variable>>>,
    index_by_name: HashMap<String, usize>,
    dae_residuals: Vec<MX>,
    initial_residuals: Vec<MX>,
    functions: IndexMap<String, ModelFunction>,
    types: TypeRegistry,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variables: Vec::new(),
            index_by_name: HashMap::new(),
            dae_residuals: Vec::new(),
            initial_residuals: Vec::new(),
            functions: IndexMap::new(),
            types: TypeRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn add_variable(&mut self, variable: Variable) -> Rc<RefCell<Variable>> {
        let cell = Rc::new(RefCell::new(variable));
        self.index_by_name
            .insert(cell.borrow().name().to_string(), self.variables.len());
        self.variables.push(cell.clone());
        cell
    }

    pub(crate) fn add_dae_residual(&mut self, residual: MX) {
        self.dae_residuals.push(residual);
    }

    pub(crate) fn add_initial_residual(&mut self, residual: MX) {
        self.initial_residuals.push(residual);
    }

    pub(crate) fn set_function(&mut self, function: ModelFunction) {
        self.functions
            .insert(function.name().to_string(), function);
    }

    pub(crate) fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// All variables in declaration order, alias variables included.
    pub fn variables(&self) -> &[Rc<RefCell<Variable>>] {
        self.variables.as_ref()
    }

    /// The representative variables, i.e. everything that has not been alias
    /// eliminated.
    pub fn model_variables(&self) -> Vec<Rc<RefCell<Variable>>> {
        self.variables
            .iter()
            .filter(|v| !v.borrow().is_alias())
            .cloned()
            .collect()
    }

    pub fn alias_variables(&self) -> Vec<Rc<RefCell<Variable>>> {
        self.variables
            .iter()
            .filter(|v| v.borrow().is_alias())
            .cloned()
            .collect()
    }

    /// The variable exactly as declared; an alias name returns the alias
    /// variable itself.
    pub fn variable_by_name(&self, name: &str) -> Result<Rc<RefCell<Variable>>, TransferError> {
        self.index_by_name
            .get(name)
            .map(|&i| self.variables[i].clone())
            .ok_or_else(|| TransferError::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Resolves through the alias chain to the representative variable that
    /// is actually solved for. Alias chains must terminate.
    pub fn model_variable_by_name(
        &self,
        name: &str,
    ) -> Result<Rc<RefCell<Variable>>, TransferError> {
        let mut visited = HashSet::new();
        let mut current = self.variable_by_name(name)?;
        loop {
            let target = {
                let borrowed = current.borrow();
                match borrowed.alias() {
                    Some(alias) => Some(alias.target.clone()),
                    None => None,
                }
            };
            let target = match target {
                Some(target) => target,
                None => return Ok(current),
            };
            if !visited.insert(target.clone()) {
                return Err(TransferError::InvalidAliasGraph {
                    name: name.to_string(),
                });
            }
            current = self.variable_by_name(&target)?;
        }
    }

    /// Variables of one kind in declaration order. Ordering is load-bearing;
    /// alias variables are excluded (only representatives are unknowns).
    pub fn variables_by_kind(&self, kind: VariableKind) -> Vec<Rc<RefCell<Variable>>> {
        self.variables
            .iter()
            .filter(|v| {
                let v = v.borrow();
                !v.is_alias() && v.kind() == kind
            })
            .cloned()
            .collect()
    }

    pub fn variable_type_by_name(&self, name: &str) -> Result<Rc<VariableType>, TransferError> {
        self.types.lookup(name)
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn function_by_name(&self, name: &str) -> Option<&ModelFunction> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> &IndexMap<String, ModelFunction> {
        &self.functions
    }

    fn stack(residuals: &[MX]) -> MX {
        match residuals.len() {
            0 => MX::zero(),
            1 => residuals[0].clone(),
            _ => MX::vertcat(residuals.to_vec()),
        }
    }

    /// All DAE equations stacked into one expression, each equation on the
    /// form `rhs - lhs`.
    pub fn dae_residual(&self) -> MX {
        Self::stack(&self.dae_residuals)
    }

    pub fn initial_residual(&self) -> MX {
        Self::stack(&self.initial_residuals)
    }

    /// The parameter/constant environment currently known: every constant and
    /// independent parameter with a foldable binding, plus every dependent
    /// parameter already evaluated.
    fn parameter_values(&self) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        for cell in &self.variables {
            let variable = cell.borrow();
            if variable.is_alias() {
                continue;
            }
            let kind = variable.kind();
            if kind.is_constant() || kind.is_parameter_independent() {
                if let Some(binding) = variable.attribute("bindingExpression") {
                    let mut ctx = ParameterContext {
                        values: &values,
                        functions: &self.functions,
                    };
                    if let Ok(value) = evaluate(binding, &mut ctx) {
                        values.insert(variable.name().to_string(), value);
                    }
                }
            } else if kind.is_parameter_dependent() {
                if let Some(value) = variable
                    .attribute("evaluatedBindingExpression")
                    .and_then(|e| e.value())
                {
                    values.insert(variable.name().to_string(), value);
                }
            }
        }
        values
    }

    /// Constant-fold every dependent parameter's binding expression and store
    /// the result as its `evaluatedBindingExpression` attribute.
    ///
    /// Bindings may route through function calls and flattening temporaries;
    /// evaluation iterates to a fixpoint so declaration order among the
    /// dependents does not matter. A pass with no progress while dependents
    /// remain means the dependency chain cannot be resolved.
    pub fn calculate_values_for_dependent_parameters(&self) -> Result<(), TransferError> {
        let mut values = self.parameter_values();
        let mut pending: Vec<Rc<RefCell<Variable>>> = self
            .variables
            .iter()
            .filter(|v| {
                let v = v.borrow();
                !v.is_alias()
                    && v.kind().is_parameter_dependent()
                    && v.attribute("evaluatedBindingExpression").is_none()
            })
            .cloned()
            .collect();
        while !pending.is_empty() {
            let mut progress = false;
            let mut still_pending = Vec::new();
            for cell in pending {
                let binding = match cell.borrow().attribute("bindingExpression") {
                    Some(binding) => binding.clone(),
                    None => continue,
                };
                let result = {
                    let mut ctx = ParameterContext {
                        values: &values,
                        functions: &self.functions,
                    };
                    evaluate(&binding, &mut ctx)
                };
                match result {
                    Ok(value) => {
                        let mut variable = cell.borrow_mut();
                        debug!("evaluated dependent parameter {} = {}", variable.name(), value);
                        variable.set_attribute("evaluatedBindingExpression", MX::constant(value));
                        values.insert(variable.name().to_string(), value);
                        progress = true;
                    }
                    Err(TransferError::UnresolvedDependency { .. }) => still_pending.push(cell),
                    Err(err) => return Err(err),
                }
            }
            if !progress && !still_pending.is_empty() {
                return Err(TransferError::UnresolvedDependency {
                    name: still_pending[0].borrow().name().to_string(),
                });
            }
            pending = still_pending;
        }
        info!("dependent parameters evaluated for model {}", self.name);
        Ok(())
    }

    /// Numerically evaluate an expression over the model's parameter and
    /// constant values.
    pub fn evaluate_expression(&self, expr: &MX) -> Result<f64, TransferError> {
        let values = self.parameter_values();
        let mut ctx = ParameterContext {
            values: &values,
            functions: &self.functions,
        };
        evaluate(expr, &mut ctx)
    }
}

struct ParameterContext<'a> {
    values: &'a HashMap<String, f64>,
    functions: &'a IndexMap<String, ModelFunction>,
}

impl EvalContext for ParameterContext<'_> {
    fn symbol_value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    fn evaluate_call(
        &mut self,
        function: &str,
        args: &[f64],
        output: usize,
    ) -> Result<f64, TransferError> {
        let callee =
            self.functions
                .get(function)
                .ok_or_else(|| TransferError::FunctionExtraction {
                    function: function.to_string(),
                    detail: "is not defined in the model".to_string(),
                })?;
        let outputs = callee.evaluate(args, self)?;
        outputs
            .get(output)
            .copied()
            .ok_or_else(|| TransferError::FunctionExtraction {
                function: function.to_string(),
                detail: format!("has no output {output}"),
            })
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Model: {}", self.name)?;
        for variable in &self.variables {
            writeln!(f, "{}", variable.borrow())?;
        }
        if !self.dae_residuals.is_empty() {
            writeln!(f, "DAE residual: {}", self.dae_residual())?;
        }
        if !self.initial_residuals.is_empty() {
            writeln!(f, "initial residual: {}", self.initial_residual())?;
        }
        for function in self.functions.values() {
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
