//! Cross-routine return-type propagation
//!
//! Calls register [`CallGraph`] edges and subscribe the calling block to
//! the callee's [`ExitSubscribers`]. When a callee publishes a different
//! return mask, every subscriber is re-queued in its own routine. Masks
//! only grow, so the feedback rounds converge.
//!
//! The initial schedule is computed from the statically visible call names
//! so that callees are usually analysed before their callers:
//!
//! ```rust
//! use typeflow_core::hir::{HirExpr, HirModule, HirRoutine, HirStmt};
//! use typeflow_core::interprocedural::{callee_first_order, RoutineId};
//! use typeflow_core::symbols::SymbolTable;
//!
//! let module = HirModule {
//!     routines: vec![
//!         HirRoutine::new("caller", vec![], vec![HirStmt::Return(Some(HirExpr::call("callee", vec![])))]),
//!         HirRoutine::new("callee", vec![], vec![HirStmt::Return(Some(HirExpr::int(1)))]),
//!     ],
//!     ..Default::default()
//! };
//! let mut symbols = SymbolTable::new();
//! symbols.declare_routine("caller", RoutineId(0));
//! symbols.declare_routine("callee", RoutineId(1));
//!
//! assert_eq!(callee_first_order(&module, &symbols), vec![RoutineId(1), RoutineId(0)]);
//! ```

pub mod call_graph;
pub mod subscriptions;

pub use call_graph::{CallEdge, CallGraph, CallSite};
pub use subscriptions::{BlockHandle, ExitSubscribers};

use crate::hir::{AssignTarget, HirExpr, HirExprKind, HirModule, HirStmt, Symbol};
use crate::symbols::{RoutineSymbol, SymbolTable};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a routine in the session's routine arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutineId(pub u32);

impl RoutineId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Routines ordered so that strongly connected components of the static
/// call graph come after the components they call.
pub fn callee_first_order(module: &HirModule, symbols: &SymbolTable) -> Vec<RoutineId> {
    let mut graph: DiGraph<RoutineId, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..module.routines.len())
        .map(|i| graph.add_node(RoutineId(i as u32)))
        .collect();

    for (caller, routine) in module.routines.iter().enumerate() {
        let mut names = Vec::new();
        collect_called_names(&routine.body, &mut names);
        for param in &routine.params {
            if let Some(default) = &param.default {
                collect_expr_names(default, &mut names);
            }
        }
        for name in names {
            if let Some(RoutineSymbol::Module(callee)) = symbols.resolve_routine(&name) {
                if let Some(&target) = nodes.get(callee.index()) {
                    graph.update_edge(nodes[caller], target, ());
                }
            }
        }
    }

    // tarjan_scc yields components in reverse topological order
    tarjan_scc(&graph)
        .into_iter()
        .flat_map(|mut scc| {
            scc.sort_by_key(|node| graph[*node]);
            scc.into_iter().map(|node| graph[node]).collect::<Vec<_>>()
        })
        .collect()
}

/// Names of routines a body may call, closures included
pub fn collect_called_names(stmts: &[HirStmt], names: &mut Vec<Symbol>) {
    for stmt in stmts {
        match stmt {
            HirStmt::Assign { target, value } => {
                if let AssignTarget::Index { index: Some(index), .. } = target {
                    collect_expr_names(index, names);
                }
                collect_expr_names(value, names);
            }
            HirStmt::Expr(expr) | HirStmt::Throw(expr) | HirStmt::Return(Some(expr)) => {
                collect_expr_names(expr, names)
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                collect_expr_names(condition, names);
                collect_called_names(then_body, names);
                if let Some(else_body) = else_body {
                    collect_called_names(else_body, names);
                }
            }
            HirStmt::While { condition, body } => {
                collect_expr_names(condition, names);
                collect_called_names(body, names);
            }
            HirStmt::Foreach { iter, body, .. } => {
                collect_expr_names(iter, names);
                collect_called_names(body, names);
            }
            HirStmt::Try {
                body,
                catches,
                finally,
            } => {
                collect_called_names(body, names);
                for catch in catches {
                    collect_called_names(&catch.body, names);
                }
                if let Some(finally) = finally {
                    collect_called_names(finally, names);
                }
            }
            HirStmt::Return(None) | HirStmt::Break | HirStmt::Continue | HirStmt::Unset(_) => {}
        }
    }
}

fn collect_expr_names(expr: &HirExpr, names: &mut Vec<Symbol>) {
    match &expr.kind {
        HirExprKind::Literal(_) | HirExprKind::Var(_) => {}
        HirExprKind::Lambda { routine } => names.push(routine.clone()),
        HirExprKind::Call { func, args } => {
            names.push(func.clone());
            for arg in args {
                collect_expr_names(arg, names);
            }
        }
        HirExprKind::New { args, .. } => {
            for arg in args {
                collect_expr_names(arg, names);
            }
        }
        HirExprKind::DynamicCall { callee, args } => {
            collect_expr_names(callee, names);
            for arg in args {
                collect_expr_names(arg, names);
            }
        }
        HirExprKind::Binary { left, right, .. } => {
            collect_expr_names(left, names);
            collect_expr_names(right, names);
        }
        HirExprKind::Unary { operand, .. } => collect_expr_names(operand, names),
        HirExprKind::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_expr_names(condition, names);
            collect_expr_names(then_expr, names);
            collect_expr_names(else_expr, names);
        }
        HirExprKind::Array(items) => {
            for item in items {
                if let Some(key) = &item.key {
                    collect_expr_names(key, names);
                }
                collect_expr_names(&item.value, names);
            }
        }
        HirExprKind::Index { base, index } => {
            collect_expr_names(base, names);
            collect_expr_names(index, names);
        }
        HirExprKind::InstanceOf { value, .. } => collect_expr_names(value, names),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{BinOp, HirParam, HirRoutine};

    fn module_of(routines: Vec<HirRoutine>) -> (HirModule, SymbolTable) {
        let mut symbols = SymbolTable::with_builtins();
        for (i, routine) in routines.iter().enumerate() {
            symbols.declare_routine(&routine.name, RoutineId(i as u32));
        }
        (
            HirModule {
                routines,
                ..Default::default()
            },
            symbols,
        )
    }

    #[test]
    fn test_chain_is_ordered_callee_first() {
        let (module, symbols) = module_of(vec![
            HirRoutine::new("a", vec![], vec![HirStmt::Expr(HirExpr::call("b", vec![]))]),
            HirRoutine::new("b", vec![], vec![HirStmt::Expr(HirExpr::call("c", vec![]))]),
            HirRoutine::new("c", vec![], vec![HirStmt::Expr(HirExpr::call("strlen", vec![]))]),
        ]);
        assert_eq!(
            callee_first_order(&module, &symbols),
            vec![RoutineId(2), RoutineId(1), RoutineId(0)]
        );
    }

    #[test]
    fn test_mutual_recursion_stays_together() {
        let (module, symbols) = module_of(vec![
            HirRoutine::new("main", vec![], vec![HirStmt::Expr(HirExpr::call("even", vec![HirExpr::int(4)]))]),
            HirRoutine::new(
                "even",
                vec![HirParam::untyped("n")],
                vec![HirStmt::Return(Some(HirExpr::call(
                    "odd",
                    vec![HirExpr::binary(BinOp::Sub, HirExpr::var("n"), HirExpr::int(1))],
                )))],
            ),
            HirRoutine::new(
                "odd",
                vec![HirParam::untyped("n")],
                vec![HirStmt::Return(Some(HirExpr::call("even", vec![HirExpr::var("n")])))],
            ),
        ]);
        let order = callee_first_order(&module, &symbols);
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], RoutineId(0));
        assert_eq!(&order[..2], &[RoutineId(1), RoutineId(2)]);
    }

    #[test]
    fn test_closure_references_count_as_calls() {
        let mut names = Vec::new();
        collect_called_names(&[HirStmt::assign("f", HirExpr::lambda("inner"))], &mut names);
        assert_eq!(names, vec!["inner".to_string()]);
    }
}
