//! Concurrent caller/callee incidence structure
//!
//! Edges are stored twice, keyed by caller and by callee, so both
//! directions answer in time proportional to the routine's degree. The
//! graph only grows during a session.

use super::RoutineId;
use crate::dataflow::cfg::BlockId;
use crate::hir::ExprId;
use dashmap::DashMap;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Call expression within a block of the calling routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallSite {
    pub block: BlockId,
    pub expr: ExprId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: RoutineId,
    pub callee: RoutineId,
    pub site: CallSite,
}

#[derive(Debug, Default)]
pub struct CallGraph {
    callees: DashMap<RoutineId, IndexSet<CallEdge>>,
    callers: DashMap<RoutineId, IndexSet<CallEdge>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge; returns false when it was already known.
    pub fn add_edge(&self, edge: CallEdge) -> bool {
        // one shard guard at a time: both keys may hash to the same shard
        let inserted = self.callees.entry(edge.caller).or_default().insert(edge);
        if inserted {
            self.callers.entry(edge.callee).or_default().insert(edge);
        }
        inserted
    }

    pub fn contains(&self, edge: &CallEdge) -> bool {
        self.callees
            .get(&edge.caller)
            .is_some_and(|edges| edges.contains(edge))
    }

    /// Edges leaving `caller`, in discovery order
    pub fn callees_of(&self, caller: RoutineId) -> Vec<CallEdge> {
        self.callees
            .get(&caller)
            .map(|edges| edges.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Edges arriving at `callee`, in discovery order
    pub fn callers_of(&self, callee: RoutineId) -> Vec<CallEdge> {
        self.callers
            .get(&callee)
            .map(|edges| edges.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct routines called by `caller`
    pub fn callee_routines(&self, caller: RoutineId) -> Vec<RoutineId> {
        let mut routines: Vec<RoutineId> = self.callees_of(caller).into_iter().map(|e| e.callee).collect();
        routines.sort();
        routines.dedup();
        routines
    }

    /// Distinct routines calling `callee`
    pub fn caller_routines(&self, callee: RoutineId) -> Vec<RoutineId> {
        let mut routines: Vec<RoutineId> = self.callers_of(callee).into_iter().map(|e| e.caller).collect();
        routines.sort();
        routines.dedup();
        routines
    }

    pub fn edge_count(&self) -> usize {
        self.callees.iter().map(|entry| entry.value().len()).sum()
    }

    /// Every edge, sorted for deterministic reporting
    pub fn edges(&self) -> Vec<CallEdge> {
        let mut edges: Vec<CallEdge> = self
            .callees
            .iter()
            .flat_map(|entry| entry.value().iter().copied().collect::<Vec<_>>())
            .collect();
        edges.sort();
        edges
    }

    /// Edges recorded under one key but missing under the other
    pub fn asymmetric_edges(&self) -> Vec<CallEdge> {
        let mut missing = Vec::new();
        for edge in self.edges() {
            let mirrored = self
                .callers
                .get(&edge.callee)
                .is_some_and(|edges| edges.contains(&edge));
            if !mirrored {
                missing.push(edge);
            }
        }
        for entry in self.callers.iter() {
            for edge in entry.value() {
                if !self.contains(edge) {
                    missing.push(*edge);
                }
            }
        }
        missing
    }
}
