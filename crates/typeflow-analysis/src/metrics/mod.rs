//! Analysis metrics
//!
//! This module summarizes a finished analysis session: CFG size and
//! shape, solver effort and how precise the inferred types came out.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use typeflow_core::dataflow::cfg::{is_synthetic_var, Cfg};
use typeflow_core::dataflow::BlockId;
use typeflow_core::{AnalysisSession, RoutineStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub module_metrics: ModuleMetrics,
    pub routine_metrics: Vec<RoutineMetrics>,
    pub type_precision: TypePrecision,
}

impl AnalysisResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One line per routine: `name: return type (status, iterations)`
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for routine in &self.routine_metrics {
            out.push_str(&format!(
                "{}: {} ({:?}, {} iterations)\n",
                routine.name, routine.return_type, routine.status, routine.iterations
            ));
        }
        out.push_str(&format!(
            "precision: {:.1}%",
            self.type_precision.precision_percentage
        ));
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetrics {
    pub total_routines: usize,
    pub total_blocks: usize,
    pub call_edges: usize,
    pub rounds: usize,
    pub avg_iterations: f64,
    pub max_iterations: usize,
    pub convergence: ConvergenceDistribution,
    pub diagnostics: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineMetrics {
    pub name: String,
    pub status: RoutineStatus,
    pub blocks: usize,
    pub reachable_blocks: usize,
    pub edges: usize,
    pub cyclomatic_complexity: usize,
    pub interned_types: usize,
    pub iterations: usize,
    pub variables: usize,
    pub precise_variables: usize,
    pub return_type: String,
    pub return_is_precise: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypePrecision {
    pub total_variables: usize,
    pub precise_variables: usize,
    pub total_routines: usize,
    pub routines_with_precise_return: usize,
    pub precision_percentage: f64,
}

/// Routines bucketed by worklist pops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceDistribution {
    pub fast: usize,      // iterations <= 8
    pub moderate: usize,  // 8 < iterations <= 32
    pub slow: usize,      // 32 < iterations <= 128
    pub very_slow: usize, // iterations > 128
}

impl ConvergenceDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, iterations: usize) {
        match iterations {
            0..=8 => self.fast += 1,
            9..=32 => self.moderate += 1,
            33..=128 => self.slow += 1,
            _ => self.very_slow += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fast + self.moderate + self.slow + self.very_slow
    }
}

/// Main analyzer for session metrics
pub struct Analyzer {
    include_synthetic: bool,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            include_synthetic: false,
        }
    }

    /// Also count compiler-introduced temporaries as variables
    pub fn include_synthetic(mut self) -> Self {
        self.include_synthetic = true;
        self
    }

    pub fn analyze(&self, session: &AnalysisSession) -> Result<AnalysisResult> {
        let routine_metrics: Vec<RoutineMetrics> = session
            .routine_ids()
            .map(|id| {
                let types = session
                    .routine_types(id)
                    .ok_or_else(|| anyhow!("no results for routine {id}"))?;
                let cfg = session
                    .cfg(id)
                    .ok_or_else(|| anyhow!("no CFG for routine `{}`", types.name))?;
                Ok(self.analyze_routine(cfg, &types))
            })
            .collect::<Result<Vec<_>>>()?;

        let module_metrics = self.calculate_module_metrics(session, &routine_metrics);
        let type_precision = self.calculate_type_precision(&routine_metrics);
        debug!(
            routines = module_metrics.total_routines,
            precision = type_precision.precision_percentage,
            "session metrics collected"
        );

        Ok(AnalysisResult {
            module_metrics,
            routine_metrics,
            type_precision,
        })
    }

    fn analyze_routine(&self, cfg: &Cfg, types: &typeflow_core::RoutineTypes) -> RoutineMetrics {
        let reachable: HashSet<BlockId> = cfg.reachable();
        let reachable_edges: usize = reachable.iter().map(|b| cfg.successors(*b).len()).sum();
        // E - N + 2 over the reachable part of the graph
        let cyclomatic = (reachable_edges + 2).saturating_sub(reachable.len()).max(1);

        let variables: Vec<_> = types
            .all_variables()
            .filter(|(name, _)| self.include_synthetic || !is_synthetic_var(name))
            .collect();
        let precise_variables = variables.iter().filter(|(_, mask)| !mask.is_any()).count();

        RoutineMetrics {
            name: types.name.clone(),
            status: types.status,
            blocks: cfg.len(),
            reachable_blocks: reachable.len(),
            edges: cfg.edge_count(),
            cyclomatic_complexity: cyclomatic,
            interned_types: types.context().len(),
            iterations: types.iterations,
            variables: variables.len(),
            precise_variables,
            return_type: types.return_type(),
            return_is_precise: !types.return_mask.is_any(),
        }
    }

    fn calculate_module_metrics(&self, session: &AnalysisSession, routines: &[RoutineMetrics]) -> ModuleMetrics {
        let total_routines = routines.len();
        let avg_iterations = if total_routines > 0 {
            routines.iter().map(|r| r.iterations as f64).sum::<f64>() / total_routines as f64
        } else {
            0.0
        };

        let mut convergence = ConvergenceDistribution::new();
        for routine in routines {
            convergence.add(routine.iterations);
        }

        ModuleMetrics {
            total_routines,
            total_blocks: routines.iter().map(|r| r.blocks).sum(),
            call_edges: session.call_graph().edge_count(),
            rounds: session.rounds(),
            avg_iterations,
            max_iterations: routines.iter().map(|r| r.iterations).max().unwrap_or(0),
            convergence,
            diagnostics: session.diagnostics().len(),
        }
    }

    fn calculate_type_precision(&self, routines: &[RoutineMetrics]) -> TypePrecision {
        let total_variables: usize = routines.iter().map(|r| r.variables).sum();
        let precise_variables: usize = routines.iter().map(|r| r.precise_variables).sum();
        let routines_with_precise_return = routines.iter().filter(|r| r.return_is_precise).count();

        let total_possible = total_variables + routines.len();
        let precision_percentage = if total_possible > 0 {
            ((precise_variables + routines_with_precise_return) as f64 / total_possible as f64) * 100.0
        } else {
            100.0
        };

        TypePrecision {
            total_variables,
            precise_variables,
            total_routines: routines.len(),
            routines_with_precise_return,
            precision_percentage,
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typeflow_core::prelude::*;

    fn analysed(routines: Vec<HirRoutine>) -> AnalysisSession {
        let module = HirModule {
            routines,
            ..Default::default()
        };
        let session = AnalysisSession::new(module, SymbolTable::with_builtins(), AnalysisOptions::default());
        session.analyze();
        session
    }

    #[test]
    fn test_analyze_empty_session() {
        let session = analysed(vec![]);
        let result = Analyzer::new().analyze(&session).unwrap();
        assert_eq!(result.module_metrics.total_routines, 0);
        assert_eq!(result.routine_metrics.len(), 0);
        assert_eq!(result.type_precision.precision_percentage, 100.0);
    }

    #[test]
    fn test_analyze_single_routine() {
        let session = analysed(vec![HirRoutine::new(
            "pick",
            vec![HirParam::untyped("b")],
            vec![
                HirStmt::If {
                    condition: HirExpr::var("b"),
                    then_body: vec![HirStmt::assign("x", HirExpr::int(1))],
                    else_body: Some(vec![HirStmt::assign("x", HirExpr::string("s"))]),
                },
                HirStmt::Return(Some(HirExpr::var("x"))),
            ],
        )]);

        let result = Analyzer::new().analyze(&session).unwrap();
        let routine = &result.routine_metrics[0];
        assert_eq!(routine.name, "pick");
        assert_eq!(routine.status, RoutineStatus::Analysed);
        assert_eq!(routine.return_type, "int|string");
        assert!(routine.return_is_precise);
        assert_eq!(routine.cyclomatic_complexity, 2);
        // `b` is mixed, `x` is not
        assert_eq!(routine.variables, 2);
        assert_eq!(routine.precise_variables, 1);

        let precision = &result.type_precision;
        assert_eq!(precision.routines_with_precise_return, 1);
        assert!((precision.precision_percentage - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_synthetic_temporaries_are_hidden_by_default() {
        let session = analysed(vec![HirRoutine::new(
            "walk",
            vec![],
            vec![
                HirStmt::Foreach {
                    iter: HirExpr::array(vec![(None, HirExpr::int(1))]),
                    key: None,
                    value: "v".to_string(),
                    body: vec![],
                },
                HirStmt::Return(None),
            ],
        )]);

        let hidden = Analyzer::new().analyze(&session).unwrap();
        let shown = Analyzer::new().include_synthetic().analyze(&session).unwrap();
        assert_eq!(hidden.routine_metrics[0].variables, 1);
        assert_eq!(shown.routine_metrics[0].variables, 2);
    }

    #[test]
    fn test_result_serializes_and_renders() {
        let session = analysed(vec![
            HirRoutine::new("one", vec![], vec![HirStmt::Return(Some(HirExpr::int(1)))]),
            HirRoutine::new("name", vec![], vec![HirStmt::Return(Some(HirExpr::string("n")))]),
        ]);
        let result = Analyzer::new().analyze(&session).unwrap();

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["module_metrics"]["total_routines"], 2);
        assert_eq!(json["routine_metrics"][1]["status"], "Analysed");

        let summary = result
            .render_summary()
            .lines()
            .map(|line| line.split(" (").next().unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(summary, @r###"
        one: int
        name: string
        precision: 100.0%
        "###);
    }

    #[test]
    fn test_convergence_distribution() {
        let mut dist = ConvergenceDistribution::new();

        dist.add(3); // fast
        dist.add(20); // moderate
        dist.add(100); // slow
        dist.add(500); // very slow

        assert_eq!(dist.fast, 1);
        assert_eq!(dist.moderate, 1);
        assert_eq!(dist.slow, 1);
        assert_eq!(dist.very_slow, 1);
        assert_eq!(dist.total(), 4);
    }
}
