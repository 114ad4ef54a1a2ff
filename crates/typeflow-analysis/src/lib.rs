//! # Typeflow Analysis
//!
//! Reporting and verification on top of a finished `typeflow-core`
//! analysis session.
//!
//! ## Modules
//!
//! - **[`metrics`]** - CFG shape, solver effort and type precision
//! - **[`verify`]** - Post-analysis consistency checks and QuickCheck generators
//!
//! ## Quick Start
//!
//! ```rust
//! use typeflow_analysis::prelude::*;
//! use typeflow_core::prelude::*;
//!
//! let module = HirModule {
//!     routines: vec![HirRoutine::new("one", vec![], vec![HirStmt::Return(Some(HirExpr::int(1)))])],
//!     ..Default::default()
//! };
//! let session = AnalysisSession::new(module, SymbolTable::with_builtins(), AnalysisOptions::default());
//! session.analyze();
//!
//! let metrics = Analyzer::new().analyze(&session).unwrap();
//! assert_eq!(metrics.routine_metrics[0].return_type, "int");
//!
//! let verification = PropertyVerifier::new().verify(&session);
//! assert!(verification.all_proven());
//! ```

pub mod metrics;
pub mod verify;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{
        AnalysisResult, Analyzer, ConvergenceDistribution, ModuleMetrics, RoutineMetrics, TypePrecision,
    };
    pub use crate::verify::quickcheck::{ArbitraryMask, KindSet};
    pub use crate::verify::{PropertyResult, PropertyStatus, PropertyVerifier, VerificationResult};
}

pub use metrics::{AnalysisResult, Analyzer, ModuleMetrics, RoutineMetrics, TypePrecision};
pub use verify::{PropertyStatus, PropertyVerifier, VerificationResult};
