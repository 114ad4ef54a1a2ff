//! Worklist-based fixpoint solver over one routine's CFG

use super::cfg::{BlockId, Cfg, EdgeKind};
use super::context::TypeRefContext;
use super::flow_state::FlowState;
use super::lattice::TypeMask;
use super::propagation::{CallEnvironment, TypePropagation};
use crate::error::{AnalysisError, Result};
use crate::hir::ExprId;
use crate::options::AnalysisOptions;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Everything the solver keeps for one routine between runs
///
/// The context lives as long as the routine; flow states are replaced on
/// every visit and discarded when a run is abandoned.
#[derive(Debug, Clone)]
pub struct SolverState {
    pub ctx: TypeRefContext,
    in_states: Vec<Option<FlowState>>,
    out_states: Vec<Option<FlowState>>,
    expr_masks: HashMap<ExprId, TypeMask>,
    visits: Vec<u32>,
    iterations: usize,
    degraded: bool,
}

impl SolverState {
    pub fn new(cfg: &Cfg) -> Self {
        Self {
            ctx: TypeRefContext::new(),
            in_states: vec![None; cfg.len()],
            out_states: vec![None; cfg.len()],
            expr_masks: HashMap::new(),
            visits: vec![0; cfg.len()],
            iterations: 0,
            degraded: false,
        }
    }

    /// Drop every flow state; the context is kept since it only grows.
    pub fn reset(&mut self) {
        self.in_states.iter_mut().for_each(|s| *s = None);
        self.out_states.iter_mut().for_each(|s| *s = None);
        self.visits.iter_mut().for_each(|v| *v = 0);
        self.expr_masks.clear();
        self.degraded = false;
    }

    /// Merged state on entry to `block`
    pub fn in_state(&self, block: BlockId) -> Option<&FlowState> {
        self.in_states.get(block.0).and_then(Option::as_ref)
    }

    /// State at the end of `block`, after its terminator
    pub fn out_state(&self, block: BlockId) -> Option<&FlowState> {
        self.out_states.get(block.0).and_then(Option::as_ref)
    }

    pub fn expr_mask(&self, expr: ExprId) -> Option<TypeMask> {
        self.expr_masks.get(&expr).copied()
    }

    pub fn expr_masks(&self) -> &HashMap<ExprId, TypeMask> {
        &self.expr_masks
    }

    /// Outgoing states of every visited block
    pub fn out_states(&self) -> impl Iterator<Item = (BlockId, &FlowState)> + '_ {
        self.out_states
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (BlockId(i), s)))
    }

    /// Return mask accumulated at the exit block, if it was reached
    pub fn return_mask(&self) -> Option<TypeMask> {
        self.in_state(BlockId::EXIT).map(FlowState::return_mask)
    }

    pub fn exit_reached(&self) -> bool {
        self.in_state(BlockId::EXIT).is_some()
    }

    /// Visits of `block` over the routine's lifetime
    pub fn visits(&self, block: BlockId) -> u32 {
        self.visits.get(block.0).copied().unwrap_or(0)
    }

    /// Worklist pops over the routine's lifetime
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Blocks that currently hold an incoming state
    pub fn reached_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.in_states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| BlockId(i))
    }

    /// Give up on precision: every binding and the return become AnyType.
    pub fn force_any(&mut self) {
        for state in self.in_states.iter_mut().chain(self.out_states.iter_mut()).flatten() {
            state.widen_to_any();
        }
        let exit = BlockId::EXIT.0;
        if exit < self.in_states.len() {
            let mut state = match self.in_states[exit].take() {
                Some(state) => state,
                None => FlowState::new(&self.ctx),
            };
            state.add_return(TypeMask::ANY);
            self.in_states[exit] = Some(state);
        }
        self.degraded = true;
    }
}

/// Result of one solver run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveOutcome {
    /// Number of blocks popped in this run
    pub iterations: usize,
    pub exit_reached: bool,
    pub degraded: bool,
}

/// Worklist-based fixpoint solver
pub struct FixpointSolver<'a, E: CallEnvironment + ?Sized> {
    cfg: &'a Cfg,
    env: &'a E,
    options: &'a AnalysisOptions,
    cancel: &'a AtomicBool,
}

impl<'a, E: CallEnvironment + ?Sized> FixpointSolver<'a, E> {
    pub fn new(cfg: &'a Cfg, env: &'a E, options: &'a AnalysisOptions, cancel: &'a AtomicBool) -> Self {
        Self {
            cfg,
            env,
            options,
            cancel,
        }
    }

    /// Run until the worklist empties.
    ///
    /// `pending` holds blocks re-queued from outside, typically call sites
    /// whose callee published a new return type. The entry block is seeded
    /// on the first run. Blocks are popped in ascending ordinal order.
    pub fn solve<I>(&self, state: &mut SolverState, pending: I) -> Result<SolveOutcome>
    where
        I: IntoIterator<Item = BlockId>,
    {
        let cfg = self.cfg;
        let mut worklist: BTreeSet<BlockId> = pending.into_iter().filter(|b| b.0 < cfg.len()).collect();

        if state.in_states[cfg.entry.0].is_none() {
            state.in_states[cfg.entry.0] = Some(FlowState::new(&state.ctx));
            worklist.insert(cfg.entry);
        }

        let mut growing_visits = vec![0u32; cfg.len()];
        let mut seen_version: Vec<Option<u32>> = vec![None; cfg.len()];
        let mut iterations = 0;
        while let Some(block_id) = worklist.pop_first() {
            if self.cancel.load(Ordering::Relaxed) {
                state.iterations += iterations;
                return Err(AnalysisError::Cancelled);
            }

            iterations += 1;
            if iterations > self.options.max_iterations {
                warn!(
                    iterations,
                    limit = self.options.max_iterations,
                    "iteration cap reached; widening routine to any"
                );
                state.force_any();
                state.iterations += iterations;
                return Ok(SolveOutcome {
                    iterations,
                    exit_reached: true,
                    degraded: true,
                });
            }

            let Some(block) = cfg.block(block_id) else {
                continue;
            };
            // not reached yet: a later predecessor visit will queue it again
            let Some(stored) = &state.in_states[block_id.0] else {
                continue;
            };
            let in_state = stored.revalidate(&state.ctx)?;

            state.visits[block_id.0] += 1;
            // only revisits that saw the context grow count toward the cap
            let version = state.ctx.version();
            let grew = seen_version[block_id.0].is_some_and(|seen| seen != version);
            seen_version[block_id.0] = Some(version);
            if grew && !block.force_repeated_analysis {
                growing_visits[block_id.0] += 1;
            }
            let visits = growing_visits[block_id.0];

            let mut out = TypePropagation::new(&mut state.ctx, self.env, block_id, &mut state.expr_masks)
                .transfer(block, in_state.clone())?;

            if grew && visits > self.options.max_block_visits {
                if visits == self.options.max_block_visits + 1 {
                    warn!(block = %block_id, visits, "block visit cap reached; widening its variables to any");
                }
                out.widen_to_any();
            }
            let out = out.revalidate(&state.ctx)?;

            for edge in &block.successors {
                let incoming = match edge.kind {
                    // a throw may leave the block before any of its effects
                    EdgeKind::Exception => in_state.revalidate(&state.ctx)?.merge(&out, &state.ctx)?,
                    _ => out.clone(),
                };
                let (merged, changed) = match state.in_states[edge.to.0].as_ref() {
                    Some(existing) => {
                        let existing = existing.revalidate(&state.ctx)?;
                        let merged = existing.merge(&incoming, &state.ctx)?;
                        let changed = merged != existing;
                        (merged, changed)
                    }
                    None => (incoming, true),
                };
                state.in_states[edge.to.0] = Some(merged);

                let forced = cfg.block(edge.to).is_some_and(|b| b.force_repeated_analysis);
                if changed || forced {
                    worklist.insert(edge.to);
                }
            }

            state.out_states[block_id.0] = Some(out);
        }

        state.iterations += iterations;
        debug!(
            iterations,
            types = state.ctx.len(),
            exit_reached = state.exit_reached(),
            "worklist drained"
        );

        Ok(SolveOutcome {
            iterations,
            exit_reached: state.exit_reached(),
            degraded: state.degraded,
        })
    }
}
