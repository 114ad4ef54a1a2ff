//! Intra-routine type-flow analysis
//!
//! This module implements the per-routine half of the analyzer:
//! - A bitmask type lattice over per-routine interned type references
//! - Control Flow Graph (CFG) construction from the bound tree
//! - Copy-on-write flow states with staleness checks
//! - Forward type propagation through basic blocks
//! - Worklist-based fixpoint solver

pub mod cfg;
pub mod context;
pub mod flow_state;
pub mod lattice;
pub mod propagation;
pub mod solver;
pub mod type_ref;
mod type_inference;

pub use cfg::{BasicBlock, BlockId, Cfg, CfgBuilder, CfgEdge, CfgStmt, EdgeKind, Terminator};
pub use context::{ContextId, MaskSummary, TypeRefContext};
pub use flow_state::FlowState;
pub use lattice::TypeMask;
pub use propagation::{CallEnvironment, TypePropagation};
pub use solver::{FixpointSolver, SolveOutcome, SolverState};
pub use type_inference::RoutineTypes;
pub use type_ref::{ArrayKey, ArrayKeys, LambdaSignature, PrimitiveKind, TypeRef};
