pub mod builder;
pub use builder::ModelBuilder;

pub mod flatten;
pub use flatten::{ref_components, row_major_indices, ScalarComponent, Structure, StructureEnv};

pub mod functions;
pub use functions::{extract_function, is_builtin, output_arities, FunctionContext};

use anyhow::Result;

use crate::ast::FlatSource;
use crate::error::TransferError;
use crate::model::Model;
use crate::optimization::OptimizationProblem;

/// How function calls are transferred: expanded in place (the default), or
/// kept as call nodes referencing extracted, reusable functions.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub inline_functions: bool,
}

impl TransferOptions {
    pub fn without_inlining() -> Self {
        Self {
            inline_functions: false,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            inline_functions: true,
        }
    }
}

/// Transfer the model named `name` out of a flattened source.
pub fn transfer_model(name: &str, source: &FlatSource, options: &TransferOptions) -> Result<Model> {
    let desc = source
        .model(name)
        .ok_or_else(|| TransferError::ModelNotFound {
            name: name.to_string(),
        })?;
    Ok(ModelBuilder::build(desc, options)?)
}

/// Transfer the optimization problem named `name` out of a flattened source.
pub fn transfer_optimization_problem(
    name: &str,
    source: &FlatSource,
    options: &TransferOptions,
) -> Result<OptimizationProblem> {
    let desc = source
        .optimization(name)
        .ok_or_else(|| TransferError::ModelNotFound {
            name: name.to_string(),
        })?;
    Ok(ModelBuilder::build_optimization(desc, options)?)
}
