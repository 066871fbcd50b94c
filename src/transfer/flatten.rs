//! Flattening of array- and record-typed entities into ordered scalar
//! components.
//!
//! Arrays enumerate row-major with the last index varying fastest; printed
//! indices are 1-based (`A[1,1,1], A[1,1,2], …`). Records recurse into each
//! field in declaration order, emitting all scalars of a field before moving
//! to the next, at arbitrary nesting depth.

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::Array1;

use crate::ast::{BaseType, ComponentRef, RecordDecl, TypeRef};
use crate::error::TransferError;

pub type Index = Array1<usize>;

/// The unflattened shape of a declared entity.
#[derive(Debug, Clone)]
pub enum Structure {
    Scalar {
        base: BaseType,
        /// Name of the derived attribute type, if the leaf was declared with
        /// one.
        type_name: Option<String>,
    },
    Array {
        dims: Vec<usize>,
        elem: Box<Structure>,
    },
    Record {
        fields: Vec<(String, Structure)>,
    },
}

/// One scalar leaf of a flattened entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarComponent {
    pub name: String,
    pub base: BaseType,
    pub type_name: Option<String>,
}

/// Record and derived-type tables a structure is resolved against.
pub struct StructureEnv<'a> {
    pub records: &'a IndexMap<String, RecordDecl>,
    pub declared_bases: &'a IndexMap<String, BaseType>,
}

impl StructureEnv<'_> {
    pub fn resolve(&self, ty: &TypeRef, dims: &[usize]) -> Result<Structure, TransferError> {
        let elem = match ty {
            TypeRef::Primitive(base) => Structure::Scalar {
                base: *base,
                type_name: None,
            },
            TypeRef::Declared(name) => {
                let base = self.declared_bases.get(name).copied().ok_or_else(|| {
                    TransferError::UnknownType { name: name.clone() }
                })?;
                Structure::Scalar {
                    base,
                    type_name: Some(name.clone()),
                }
            }
            TypeRef::Record(name) => {
                let record = self
                    .records
                    .get(name)
                    .ok_or_else(|| TransferError::UnknownType { name: name.clone() })?;
                let fields = record
                    .fields
                    .iter()
                    .map(|field| Ok((field.name.clone(), self.resolve(&field.ty, &field.dims)?)))
                    .collect::<Result<Vec<_>, TransferError>>()?;
                Structure::Record { fields }
            }
        };
        Ok(if dims.is_empty() {
            elem
        } else {
            Structure::Array {
                dims: dims.to_vec(),
                elem: Box::new(elem),
            }
        })
    }
}

impl Structure {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Structure::Scalar { .. })
    }

    pub fn scalar_count(&self) -> usize {
        match self {
            Structure::Scalar { .. } => 1,
            Structure::Array { dims, elem } => {
                dims.iter().product::<usize>() * elem.scalar_count()
            }
            Structure::Record { fields } => {
                fields.iter().map(|(_, s)| s.scalar_count()).sum()
            }
        }
    }

    pub fn field(&self, name: &str) -> Option<&Structure> {
        match self {
            Structure::Record { fields } => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, s)| s),
            _ => None,
        }
    }

    /// Enumerate all scalar components under `prefix`, in the deterministic
    /// flattening order.
    pub fn components(&self, prefix: &str) -> Vec<ScalarComponent> {
        match self {
            Structure::Scalar { base, type_name } => vec![ScalarComponent {
                name: prefix.to_string(),
                base: *base,
                type_name: type_name.clone(),
            }],
            Structure::Array { dims, elem } => row_major_indices(dims)
                .iter()
                .flat_map(|idx| {
                    elem.components(&format!("{prefix}[{}]", idx.iter().join(",")))
                })
                .collect(),
            Structure::Record { fields } => fields
                .iter()
                .flat_map(|(field, s)| s.components(&format!("{prefix}.{field}")))
                .collect(),
        }
    }
}

/// All index tuples of `dims`, 1-based, row-major: the last index varies
/// fastest within each outer index fixed.
pub fn row_major_indices(dims: &[usize]) -> Vec<Index> {
    let count: usize = dims.iter().product();
    let mut out = Vec::with_capacity(count);
    if dims.iter().any(|&d| d == 0) {
        return out;
    }
    let mut idx = Index::from_elem(dims.len(), 1);
    for _ in 0..count {
        out.push(idx.clone());
        for d in (0..dims.len()).rev() {
            if idx[d] < dims[d] {
                idx[d] += 1;
                break;
            }
            idx[d] = 1;
        }
    }
    out
}

/// Expand a component reference against the structure of its root variable.
/// Partial indexing (fewer subscripts than dimensions) is allowed on the last
/// part and enumerates the remaining dimensions.
pub fn ref_components(
    root: &Structure,
    cref: &ComponentRef,
) -> Result<Vec<ScalarComponent>, TransferError> {
    let mut cur: &Structure = root;
    let mut name = String::new();
    let last = cref.parts.len() - 1;
    for (i, part) in cref.parts.iter().enumerate() {
        if i == 0 {
            name = part.name.clone();
        } else {
            cur = cur
                .field(&part.name)
                .ok_or_else(|| TransferError::UnknownVariable {
                    name: cref.to_string(),
                })?;
            name = format!("{name}.{}", part.name);
        }
        if !part.indices.is_empty() {
            match cur {
                Structure::Array { dims, elem } if part.indices.len() == dims.len() => {
                    name = format!("{name}[{}]", part.indices.iter().join(","));
                    cur = elem.as_ref();
                }
                Structure::Array { dims, elem }
                    if part.indices.len() < dims.len() && i == last =>
                {
                    let remaining = &dims[part.indices.len()..];
                    let mut out = Vec::new();
                    for rest in row_major_indices(remaining) {
                        let full = part
                            .indices
                            .iter()
                            .copied()
                            .chain(rest.iter().copied())
                            .join(",");
                        out.extend(elem.components(&format!("{name}[{full}]")));
                    }
                    return Ok(out);
                }
                _ => {
                    return Err(TransferError::ShapeMismatch {
                        context: format!("indexing {cref}"),
                    })
                }
            }
        }
    }
    Ok(cur.components(&name))
}
