//! Per-routine inference results handed to consumers

use super::cfg::is_synthetic_var;
use super::context::TypeRefContext;
use super::lattice::TypeMask;
use super::solver::SolverState;
use crate::hir::{ExprId, Symbol};
use crate::session::RoutineStatus;
use std::collections::{BTreeMap, HashMap};

/// Result of type-flow analysis for one routine
///
/// Masks are expressed in the routine's own context, a copy of which is
/// carried along so they can be rendered after the session is gone.
#[derive(Debug, Clone)]
pub struct RoutineTypes {
    pub name: Symbol,
    pub status: RoutineStatus,
    /// AnyType unless the routine was fully analysed
    pub return_mask: TypeMask,
    /// Whether some path reached the exit block
    pub exit_reachable: bool,
    /// Union of each variable's masks over all visited blocks, synthetic
    /// temporaries included
    pub variable_types: BTreeMap<Symbol, TypeMask>,
    pub expr_types: HashMap<ExprId, TypeMask>,
    /// Worklist pops over the routine's lifetime
    pub iterations: usize,
    context: TypeRefContext,
}

impl RoutineTypes {
    pub(crate) fn from_state(name: &str, status: RoutineStatus, state: &SolverState) -> Self {
        let mut variable_types: BTreeMap<Symbol, TypeMask> = BTreeMap::new();
        for (_, flow) in state.out_states() {
            for (var, mask) in flow.vars() {
                *variable_types.entry(var.clone()).or_insert(TypeMask::BOTTOM) |= *mask;
            }
        }

        let return_mask = match status {
            RoutineStatus::Analysed => state.return_mask().unwrap_or(TypeMask::BOTTOM),
            _ => TypeMask::ANY,
        };

        Self {
            name: name.to_string(),
            status,
            return_mask,
            exit_reachable: state.exit_reached(),
            variable_types,
            expr_types: state.expr_masks().clone(),
            iterations: state.iterations(),
            context: state.ctx.clone(),
        }
    }

    pub fn context(&self) -> &TypeRefContext {
        &self.context
    }

    pub fn describe(&self, mask: TypeMask) -> String {
        self.context.describe(mask)
    }

    pub fn return_type(&self) -> String {
        self.describe(self.return_mask)
    }

    pub fn get_variable_type(&self, name: &str) -> Option<TypeMask> {
        self.variable_types.get(name).copied()
    }

    pub fn describe_variable(&self, name: &str) -> Option<String> {
        self.get_variable_type(name).map(|mask| self.describe(mask))
    }

    pub fn all_variables(&self) -> impl Iterator<Item = (&Symbol, &TypeMask)> {
        self.variable_types.iter()
    }

    /// Variables written in the source, without synthetic temporaries
    pub fn user_variables(&self) -> impl Iterator<Item = (&Symbol, &TypeMask)> {
        self.variable_types.iter().filter(|(name, _)| !is_synthetic_var(name))
    }

    pub fn expr_type(&self, expr: ExprId) -> Option<TypeMask> {
        self.expr_types.get(&expr).copied()
    }

    /// Whether neither the return nor any variable fell back to AnyType
    pub fn is_complete(&self) -> bool {
        !self.return_mask.is_any() && self.user_variables().all(|(_, mask)| !mask.is_any())
    }
}
