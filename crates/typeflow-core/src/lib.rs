//! # Typeflow Core
//!
//! Static type-flow analysis for a dynamically-typed source language.
//!
//! Each routine is lowered to a control-flow graph and solved to a fixed
//! point over a bitmask type lattice. Return types propagate between
//! routines through exit-block subscriptions until no published result
//! changes any more, sequentially or on a rayon pool.
//!
//! ## Modules
//!
//! - **[`hir`]** - Bound routine trees consumed by the analyzer
//! - **[`dataflow`]** - Type lattice, CFG, flow states and the fixpoint solver
//! - **[`interprocedural`]** - Call graph and exit subscriptions
//! - **[`session`]** - Whole-module driver and result queries
//!
//! ## Quick Start
//!
//! ```rust
//! use typeflow_core::prelude::*;
//!
//! let module = HirModule {
//!     routines: vec![HirRoutine::new(
//!         "label",
//!         vec![HirParam::new("n", DeclaredType::Int)],
//!         vec![HirStmt::Return(Some(HirExpr::binary(
//!             BinOp::Concat,
//!             HirExpr::string("#"),
//!             HirExpr::var("n"),
//!         )))],
//!     )],
//!     ..Default::default()
//! };
//!
//! let session = AnalysisSession::new(module, SymbolTable::with_builtins(), AnalysisOptions::default());
//! let summary = session.run();
//! assert_eq!(summary.analysed, 1);
//! ```

pub mod dataflow;
pub mod diagnostics;
pub mod error;
pub mod hir;
pub mod interprocedural;
pub mod options;
pub mod session;
pub mod symbols;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::dataflow::{BlockId, RoutineTypes, TypeMask, TypeRef, TypeRefContext};
    pub use crate::diagnostics::{Diagnostic, Severity};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::hir::{
        AssignTarget, BinOp, CatchClause, DeclaredType, ExternalRoutine, HirClass, HirExpr, HirModule, HirParam,
        HirRoutine, HirStmt, Literal, UnaryOp,
    };
    pub use crate::interprocedural::{CallEdge, CallGraph, RoutineId};
    pub use crate::options::AnalysisOptions;
    pub use crate::session::{AnalysisSession, AnalysisSummary, RoutineStatus};
    pub use crate::symbols::SymbolTable;
}

pub use dataflow::{RoutineTypes, TypeMask, TypeRefContext};
pub use error::{AnalysisError, Result};
pub use options::AnalysisOptions;
pub use session::{AnalysisSession, AnalysisSummary, RoutineStatus};
