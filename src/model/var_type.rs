use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::BaseType;
use crate::error::TransferError;
use crate::graph::MX;

/// Canonical order in which attributes are printed. Attributes outside this
/// list follow in declaration order.
pub const ATTRIBUTE_ORDER: &[&str] = &[
    "quantity",
    "unit",
    "displayUnit",
    "min",
    "max",
    "start",
    "fixed",
    "nominal",
    "comment",
    "free",
    "initialGuess",
];

/// Sort a set of attribute names into the canonical print order.
pub fn ordered_attribute_names<'a>(attributes: &'a IndexMap<String, MX>) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::with_capacity(attributes.len());
    for canonical in ATTRIBUTE_ORDER {
        if attributes.contains_key(*canonical) {
            names.push(canonical);
        }
    }
    for name in attributes.keys() {
        if !ATTRIBUTE_ORDER.contains(&name.as_str()) {
            names.push(name.as_str());
        }
    }
    names
}

/// A declared type: base primitive kind plus a map of attribute defaults.
/// Interned by the registry, so pointer identity is the "same declared type"
/// check.
#[derive(Debug, Clone)]
pub struct VariableType {
    name: String,
    base: BaseType,
    attributes: IndexMap<String, MX>,
}

impl VariableType {
    pub fn new(name: &str, base: BaseType, attributes: IndexMap<String, MX>) -> Self {
        Self {
            name: name.to_string(),
            base,
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> BaseType {
        self.base
    }

    pub fn attributes(&self) -> &IndexMap<String, MX> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&MX> {
        self.attributes.get(name)
    }

    /// Two types are the same iff base kind and full attribute map compare
    /// structurally equal; the name takes no part in it.
    pub fn same_structure(&self, other: &VariableType) -> bool {
        self.base == other.base
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(name, value)| other.attributes.get(name) == Some(value))
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Type name: {}, base type: {}", self.name, self.base)?;
        if !self.attributes.is_empty() {
            write!(f, ", attributes:")?;
            for name in ordered_attribute_names(&self.attributes) {
                write!(f, "\n\t{} = {}", name, self.attributes[name])?;
            }
        }
        Ok(())
    }
}

/// Interns declared types: declaring an attribute-for-attribute-equal type
/// returns the existing instance, so two variables derived from the same
/// declared type report identical type identity even via different
/// default-type fallback paths.
#[derive(Debug)]
pub struct TypeRegistry {
    by_name: IndexMap<String, Rc<VariableType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            by_name: IndexMap::new(),
        };
        for base in [
            BaseType::Real,
            BaseType::Integer,
            BaseType::Boolean,
            BaseType::String,
        ] {
            let name = base.to_string();
            registry.by_name.insert(
                name.clone(),
                Rc::new(VariableType::new(&name, base, IndexMap::new())),
            );
        }
        registry
    }

    pub fn declare(
        &mut self,
        name: &str,
        base: BaseType,
        attributes: IndexMap<String, MX>,
    ) -> Rc<VariableType> {
        let candidate = VariableType::new(name, base, attributes);
        if let Some(existing) = self
            .by_name
            .values()
            .find(|t| t.same_structure(&candidate))
        {
            let existing = existing.clone();
            self.by_name.insert(name.to_string(), existing.clone());
            return existing;
        }
        let declared = Rc::new(candidate);
        self.by_name.insert(name.to_string(), declared.clone());
        declared
    }

    pub fn lookup(&self, name: &str) -> Result<Rc<VariableType>, TransferError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| TransferError::UnknownType {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&Rc<VariableType>> {
        self.by_name.get(name)
    }

    pub fn primitive(&self, base: BaseType) -> Rc<VariableType> {
        self.by_name[&base.to_string()].clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Rc<VariableType>)> {
        self.by_name.iter()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
