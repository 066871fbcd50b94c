use std::fmt;

use crate::ast::RelationKind;
use crate::graph::MX;
use crate::model::Model;

/// One path constraint of an optimal control problem. The relation direction
/// is preserved exactly as declared; `<=` and `>=` are never normalized into
/// one canonical form.
#[derive(Debug, Clone)]
pub struct PathConstraint {
    kind: RelationKind,
    lhs: MX,
    rhs: MX,
}

impl PathConstraint {
    pub fn new(kind: RelationKind, lhs: MX, rhs: MX) -> Self {
        Self { kind, lhs, rhs }
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn lhs(&self) -> &MX {
        &self.lhs
    }

    pub fn rhs(&self) -> &MX {
        &self.rhs
    }
}

impl fmt::Display for PathConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.kind, self.rhs)
    }
}

/// A [`Model`] wrapped with an objective and a time horizon. A free start or
/// final time is the symbol `startTime` / `finalTime`; objective terms
/// default to zero constants.
pub struct OptimizationProblem {
    model: Model,
    start_time: MX,
    final_time: MX,
    lagrange_term: MX,
    mayer_term: MX,
    path_constraints: Vec<PathConstraint>,
}

impl OptimizationProblem {
    pub fn new(
        model: Model,
        start_time: MX,
        final_time: MX,
        lagrange_term: MX,
        mayer_term: MX,
        path_constraints: Vec<PathConstraint>,
    ) -> Self {
        Self {
            model,
            start_time,
            final_time,
            lagrange_term,
            mayer_term,
            path_constraints,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn start_time(&self) -> &MX {
        &self.start_time
    }

    pub fn final_time(&self) -> &MX {
        &self.final_time
    }

    pub fn lagrange_term(&self) -> &MX {
        &self.lagrange_term
    }

    pub fn mayer_term(&self) -> &MX {
        &self.mayer_term
    }

    pub fn path_constraints(&self) -> &[PathConstraint] {
        self.path_constraints.as_ref()
    }
}

impl fmt::Display for OptimizationProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "OptimizationProblem: {}", self.model.name())?;
        writeln!(f, "start time: {}", self.start_time)?;
        writeln!(f, "final time: {}", self.final_time)?;
        writeln!(f, "Lagrange term: {}", self.lagrange_term)?;
        writeln!(f, "Mayer term: {}", self.mayer_term)?;
        for constraint in &self.path_constraints {
            writeln!(f, "{constraint}")?;
        }
        write!(f, "{}", self.model)
    }
}
