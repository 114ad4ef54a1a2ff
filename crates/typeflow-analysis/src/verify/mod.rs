//! Post-analysis consistency verification
//!
//! Checks structural properties every finished session must satisfy. A
//! violation points at an analyzer defect, never at the analysed program.

pub mod quickcheck;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use typeflow_core::dataflow::BlockId;
use typeflow_core::interprocedural::BlockHandle;
use typeflow_core::{AnalysisSession, RoutineStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyStatus {
    Proven,
    /// Each entry describes one offending site
    Violated(Vec<String>),
}

impl PropertyStatus {
    fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            PropertyStatus::Proven
        } else {
            PropertyStatus::Violated(violations)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyResult {
    pub property: String,
    pub status: PropertyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub properties: Vec<PropertyResult>,
}

impl VerificationResult {
    pub fn all_proven(&self) -> bool {
        self.properties.iter().all(|p| p.status == PropertyStatus::Proven)
    }

    pub fn status_of(&self, property: &str) -> Option<&PropertyStatus> {
        self.properties.iter().find(|p| p.property == property).map(|p| &p.status)
    }
}

pub struct PropertyVerifier {
    check_returns: bool,
}

impl PropertyVerifier {
    pub fn new() -> Self {
        Self { check_returns: true }
    }

    /// Skip the exit-return check, which walks every returning block
    pub fn without_return_check(mut self) -> Self {
        self.check_returns = false;
        self
    }

    pub fn verify(&self, session: &AnalysisSession) -> VerificationResult {
        let mut properties = vec![
            PropertyResult {
                property: "call_graph_symmetry".to_string(),
                status: self.check_call_graph_symmetry(session),
            },
            PropertyResult {
                property: "call_sites_subscribed".to_string(),
                status: self.check_call_sites_subscribed(session),
            },
            PropertyResult {
                property: "flow_states_valid".to_string(),
                status: self.check_flow_states_valid(session),
            },
        ];
        if self.check_returns {
            properties.push(PropertyResult {
                property: "exit_covers_returns".to_string(),
                status: self.check_exit_covers_returns(session),
            });
        }

        for property in &properties {
            match &property.status {
                PropertyStatus::Proven => debug!(property = %property.property, "property holds"),
                PropertyStatus::Violated(sites) => {
                    warn!(property = %property.property, violations = sites.len(), "property violated")
                }
            }
        }
        VerificationResult { properties }
    }

    /// Every edge is visible from both its caller and its callee
    fn check_call_graph_symmetry(&self, session: &AnalysisSession) -> PropertyStatus {
        let violations = session
            .call_graph()
            .asymmetric_edges()
            .into_iter()
            .map(|edge| format!("{} -> {} at {}", edge.caller, edge.callee, edge.site.block))
            .collect();
        PropertyStatus::from_violations(violations)
    }

    /// Every call site listens to its callee's exit
    fn check_call_sites_subscribed(&self, session: &AnalysisSession) -> PropertyStatus {
        let violations = session
            .call_graph()
            .edges()
            .into_iter()
            .filter(|edge| {
                let handle = BlockHandle::new(edge.caller, edge.site.block);
                !session.subscribers(edge.callee).contains(&handle)
            })
            .map(|edge| format!("{} at {} not subscribed to {}", edge.caller, edge.site.block, edge.callee))
            .collect();
        PropertyStatus::from_violations(violations)
    }

    /// Stored states may lag behind their context's version, but every
    /// one must belong to that context and revalidate against it
    fn check_flow_states_valid(&self, session: &AnalysisSession) -> PropertyStatus {
        let mut violations = Vec::new();
        for id in session.routine_ids() {
            let invalid: Vec<String> = session
                .with_state(id, |_, state| {
                    let incoming = state
                        .reached_blocks()
                        .filter_map(|b| state.in_state(b).map(|s| (b, s)));
                    incoming
                        .chain(state.out_states())
                        .filter_map(|(block, flow)| {
                            flow.revalidate(&state.ctx).err().map(|err| format!("{id} {block}: {err}"))
                        })
                        .collect()
                })
                .unwrap_or_default();
            violations.extend(invalid);
        }
        PropertyStatus::from_violations(violations)
    }

    fn check_exit_covers_returns(&self, session: &AnalysisSession) -> PropertyStatus {
        let mut violations = Vec::new();
        for id in session.routine_ids() {
            if session.status(id) != Some(RoutineStatus::Analysed) {
                continue;
            }
            let uncovered: Vec<BlockId> = session
                .with_state(id, |cfg, state| {
                    let exit = state.return_mask().unwrap_or_default();
                    cfg.returning_blocks()
                        .filter(|b| {
                            state
                                .out_state(*b)
                                .is_some_and(|s| !s.return_mask().is_subset_of(exit))
                        })
                        .collect()
                })
                .unwrap_or_default();
            violations.extend(uncovered.into_iter().map(|block| format!("{id} {block}")));
        }
        PropertyStatus::from_violations(violations)
    }
}

impl Default for PropertyVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typeflow_core::prelude::*;

    fn analysed(routines: Vec<HirRoutine>, parallel: bool) -> AnalysisSession {
        let module = HirModule {
            routines,
            ..Default::default()
        };
        let session = AnalysisSession::new(module, SymbolTable::with_builtins(), AnalysisOptions::default());
        if parallel {
            session.analyze_parallel();
        } else {
            session.analyze();
        }
        session
    }

    fn sample() -> Vec<HirRoutine> {
        vec![
            HirRoutine::new(
                "fact",
                vec![HirParam::new("n", DeclaredType::Int)],
                vec![
                    HirStmt::If {
                        condition: HirExpr::binary(BinOp::LtEq, HirExpr::var("n"), HirExpr::int(1)),
                        then_body: vec![HirStmt::Return(Some(HirExpr::int(1)))],
                        else_body: None,
                    },
                    HirStmt::Return(Some(HirExpr::binary(
                        BinOp::Mul,
                        HirExpr::var("n"),
                        HirExpr::call(
                            "fact",
                            vec![HirExpr::binary(BinOp::Sub, HirExpr::var("n"), HirExpr::int(1))],
                        ),
                    ))),
                ],
            ),
            HirRoutine::new(
                "main",
                vec![],
                vec![
                    HirStmt::assign("x", HirExpr::call("fact", vec![HirExpr::int(5)])),
                    HirStmt::assign("label", HirExpr::call("describe", vec![HirExpr::var("x")])),
                    HirStmt::Return(Some(HirExpr::var("label"))),
                ],
            ),
            HirRoutine::new(
                "describe",
                vec![HirParam::untyped("v")],
                vec![HirStmt::Return(Some(HirExpr::binary(
                    BinOp::Concat,
                    HirExpr::string("value: "),
                    HirExpr::var("v"),
                )))],
            ),
        ]
    }

    #[test]
    fn test_sequential_session_satisfies_all_properties() {
        let session = analysed(sample(), false);
        let result = PropertyVerifier::new().verify(&session);
        assert!(result.all_proven(), "{:?}", result.properties);
        assert_eq!(result.properties.len(), 4);
    }

    #[test]
    fn test_parallel_session_satisfies_all_properties() {
        let session = analysed(sample(), true);
        let result = PropertyVerifier::new().verify(&session);
        assert!(result.all_proven(), "{:?}", result.properties);
    }

    #[test]
    fn test_return_check_can_be_skipped() {
        let session = analysed(sample(), false);
        let result = PropertyVerifier::new().without_return_check().verify(&session);
        assert_eq!(result.properties.len(), 3);
        assert!(result.status_of("exit_covers_returns").is_none());
        assert_eq!(result.status_of("call_graph_symmetry"), Some(&PropertyStatus::Proven));
    }
}
