use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::BaseType;
use crate::graph::MX;

use super::var_type::{ordered_attribute_names, VariableType};

/// Classification of a model variable: base primitive crossed with its role
/// in the DAE. Derivative and differentiated kinds exist for Real only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    RealConstant,
    RealParameterIndependent,
    RealParameterDependent,
    IntegerConstant,
    IntegerParameterIndependent,
    IntegerParameterDependent,
    BooleanConstant,
    BooleanParameterIndependent,
    BooleanParameterDependent,
    Derivative,
    Differentiated,
    RealInput,
    RealAlgebraic,
    RealDiscrete,
    IntegerDiscrete,
    IntegerInput,
    BooleanDiscrete,
    BooleanInput,
}

impl VariableKind {
    pub fn is_parameter_dependent(&self) -> bool {
        matches!(
            self,
            VariableKind::RealParameterDependent
                | VariableKind::IntegerParameterDependent
                | VariableKind::BooleanParameterDependent
        )
    }

    pub fn is_parameter_independent(&self) -> bool {
        matches!(
            self,
            VariableKind::RealParameterIndependent
                | VariableKind::IntegerParameterIndependent
                | VariableKind::BooleanParameterIndependent
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            VariableKind::RealConstant
                | VariableKind::IntegerConstant
                | VariableKind::BooleanConstant
        )
    }

    pub fn base(&self) -> BaseType {
        match self {
            VariableKind::RealConstant
            | VariableKind::RealParameterIndependent
            | VariableKind::RealParameterDependent
            | VariableKind::Derivative
            | VariableKind::Differentiated
            | VariableKind::RealInput
            | VariableKind::RealAlgebraic
            | VariableKind::RealDiscrete => BaseType::Real,
            VariableKind::IntegerConstant
            | VariableKind::IntegerParameterIndependent
            | VariableKind::IntegerParameterDependent
            | VariableKind::IntegerDiscrete
            | VariableKind::IntegerInput => BaseType::Integer,
            VariableKind::BooleanConstant
            | VariableKind::BooleanParameterIndependent
            | VariableKind::BooleanParameterDependent
            | VariableKind::BooleanDiscrete
            | VariableKind::BooleanInput => BaseType::Boolean,
        }
    }
}

/// A non-owning back-reference to the representative variable an alias
/// resolves to. Resolution goes through the model's name index, never through
/// a structural pointer.
#[derive(Debug, Clone)]
pub struct Alias {
    pub target: String,
    pub negated: bool,
}

#[derive(Debug)]
pub struct Variable {
    name: String,
    sym: MX,
    kind: VariableKind,
    declared_type: Rc<VariableType>,
    attributes: IndexMap<String, MX>,
    alias: Option<Alias>,
}

impl Variable {
    pub fn new(name: &str, kind: VariableKind, declared_type: Rc<VariableType>) -> Self {
        Self {
            name: name.to_string(),
            sym: MX::sym(name),
            kind,
            declared_type,
            attributes: IndexMap::new(),
            alias: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The symbolic leaf node standing for this variable in graphs.
    pub fn var(&self) -> &MX {
        &self.sym
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn declared_type(&self) -> &Rc<VariableType> {
        &self.declared_type
    }

    pub fn alias(&self) -> Option<&Alias> {
        self.alias.as_ref()
    }

    pub fn is_alias(&self) -> bool {
        self.alias.is_some()
    }

    pub fn is_negated(&self) -> bool {
        self.alias.as_ref().map(|a| a.negated).unwrap_or(false)
    }

    pub fn set_alias(&mut self, target: &str, negated: bool) {
        self.alias = Some(Alias {
            target: target.to_string(),
            negated,
        });
    }

    pub fn set_attribute(&mut self, name: &str, value: MX) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Instance attributes only; inherited defaults are not listed here.
    pub fn attributes(&self) -> &IndexMap<String, MX> {
        &self.attributes
    }

    /// Attribute lookup falls back from the instance map to the declared
    /// type's defaults.
    pub fn attribute(&self, name: &str) -> Option<&MX> {
        self.attributes
            .get(name)
            .or_else(|| self.declared_type.attribute(name))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(alias) = &self.alias {
            write!(f, ", alias: {}", alias.target)?;
        }
        write!(f, ", declaredType : {}", self.declared_type.base())?;
        if !self.attributes.is_empty() {
            write!(f, ", attributes:")?;
            for name in ordered_attribute_names(&self.attributes) {
                write!(f, "\n\t{} = {}", name, self.attributes[name])?;
            }
        }
        Ok(())
    }
}
