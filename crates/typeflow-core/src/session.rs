//! Analysis session: owns every routine's CFG and solver state and drives
//! cross-routine feedback rounds to a global fixed point.
//!
//! A round runs the solver on every routine with pending work. A routine
//! that publishes a different return mask queues the subscribed call sites
//! of its callers, which are picked up in the same round when the caller
//! comes later in callee-first order, or in the next round otherwise.
//!
//! Locking: a routine's solver state is only ever locked by the worker
//! running that routine. Workers touch other routines only through the
//! published snapshot, the subscriber set and the inbox, each of which is
//! held for a single read or insert.

use crate::dataflow::cfg::{BlockId, Cfg, CfgBuilder};
use crate::dataflow::context::TypeRefContext;
use crate::dataflow::lattice::TypeMask;
use crate::dataflow::propagation::CallEnvironment;
use crate::dataflow::solver::{FixpointSolver, SolverState};
use crate::dataflow::type_ref::LambdaSignature;
use crate::dataflow::RoutineTypes;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::error::{AnalysisError, Result};
use crate::hir::{DeclaredType, ExprId, HirModule, Span, Symbol};
use crate::interprocedural::{
    callee_first_order, BlockHandle, CallEdge, CallGraph, CallSite, ExitSubscribers, RoutineId,
};
use crate::options::AnalysisOptions;
use crate::symbols::SymbolTable;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of one routine within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutineStatus {
    /// Not run yet
    Pending,
    /// Reached a local fixed point on its last run
    Analysed,
    /// Hit an iteration or round cap; every result is AnyType
    Degraded,
    /// An internal error was isolated; every result is AnyType
    Failed,
    /// Interrupted by [`AnalysisSession::cancel`]; partial state discarded
    Cancelled,
}

impl RoutineStatus {
    /// No further run can change the routine's results
    pub fn is_terminal(self) -> bool {
        matches!(self, RoutineStatus::Degraded | RoutineStatus::Failed)
    }
}

/// Return mask published by a routine for its callers, with a copy of the
/// context it is expressed in
#[derive(Debug, Clone)]
pub struct ReturnSnapshot {
    pub mask: TypeMask,
    pub context: TypeRefContext,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub rounds: usize,
    pub analysed: usize,
    pub degraded: usize,
    pub failed: usize,
    /// Routines left pending or interrupted
    pub incomplete: usize,
    pub cancelled: bool,
}

struct RoutineSlot {
    name: Symbol,
    span: Span,
    params: Vec<Symbol>,
    return_type: Option<DeclaredType>,
    cfg: Cfg,
    state: Mutex<SolverState>,
    status: RwLock<RoutineStatus>,
    published: RwLock<Option<Arc<ReturnSnapshot>>>,
    subscribers: ExitSubscribers,
    inbox: Mutex<BTreeSet<BlockId>>,
}

impl RoutineSlot {
    fn status(&self) -> RoutineStatus {
        *self.status.read()
    }

    fn set_status(&self, status: RoutineStatus) {
        *self.status.write() = status;
    }

    fn snapshot(&self) -> Option<Arc<ReturnSnapshot>> {
        self.published.read().clone()
    }
}

/// Type-flow analysis over a whole module
///
/// ```rust
/// use typeflow_core::hir::{HirExpr, HirModule, HirRoutine, HirStmt};
/// use typeflow_core::options::AnalysisOptions;
/// use typeflow_core::session::AnalysisSession;
/// use typeflow_core::symbols::SymbolTable;
///
/// let module = HirModule {
///     routines: vec![HirRoutine::new("one", vec![], vec![HirStmt::Return(Some(HirExpr::int(1)))])],
///     ..Default::default()
/// };
/// let session = AnalysisSession::new(module, SymbolTable::with_builtins(), AnalysisOptions::default());
/// session.run();
///
/// let id = session.routine_id("one").unwrap();
/// assert_eq!(session.describe_return(id).as_deref(), Some("int"));
/// ```
pub struct AnalysisSession {
    module: HirModule,
    symbols: SymbolTable,
    options: AnalysisOptions,
    routines: Vec<RoutineSlot>,
    order: Vec<RoutineId>,
    call_graph: CallGraph,
    diagnostics: DiagnosticSink,
    cancel: AtomicBool,
    rounds: AtomicUsize,
}

impl AnalysisSession {
    /// Build CFGs for every routine and register module names.
    ///
    /// Module routines shadow externals of the same name.
    pub fn new(module: HirModule, mut symbols: SymbolTable, options: AnalysisOptions) -> Self {
        for external in &module.externals {
            symbols.declare_external(external);
        }
        for class in &module.classes {
            symbols.declare_class(class);
        }
        for (index, routine) in module.routines.iter().enumerate() {
            symbols.declare_routine(&routine.name, RoutineId(index as u32));
        }

        let routines: Vec<RoutineSlot> = module
            .routines
            .iter()
            .map(|routine| {
                let cfg = CfgBuilder::new().build_routine(routine);
                let state = SolverState::new(&cfg);
                RoutineSlot {
                    name: routine.name.clone(),
                    span: routine.span,
                    params: routine.params.iter().map(|p| p.name.clone()).collect(),
                    return_type: routine.return_type.clone(),
                    cfg,
                    state: Mutex::new(state),
                    status: RwLock::new(RoutineStatus::Pending),
                    published: RwLock::new(None),
                    subscribers: ExitSubscribers::new(),
                    inbox: Mutex::new(BTreeSet::new()),
                }
            })
            .collect();

        let order = callee_first_order(&module, &symbols);
        debug!(routines = routines.len(), "session created");

        Self {
            module,
            symbols,
            options,
            routines,
            order,
            call_graph: CallGraph::new(),
            diagnostics: DiagnosticSink::new(),
            cancel: AtomicBool::new(false),
            rounds: AtomicUsize::new(0),
        }
    }

    /// Analyse with the driver selected by [`AnalysisOptions::parallel`].
    pub fn run(&self) -> AnalysisSummary {
        self.drive(self.options.parallel)
    }

    /// Analyse one routine at a time in callee-first order.
    pub fn analyze(&self) -> AnalysisSummary {
        self.drive(false)
    }

    /// Analyse each round's routines on the rayon thread pool.
    pub fn analyze_parallel(&self) -> AnalysisSummary {
        self.drive(true)
    }

    /// Ask running workers to stop at their next dequeue.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn drive(&self, parallel: bool) -> AnalysisSummary {
        info!(routines = self.routines.len(), parallel, "starting type-flow analysis");

        let mut batch: Vec<RoutineId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                let slot = &self.routines[id.index()];
                matches!(slot.status(), RoutineStatus::Pending | RoutineStatus::Cancelled) || self.has_pending(*id)
            })
            .collect();

        let mut rounds = 0;
        while !batch.is_empty() && !self.is_cancelled() {
            if rounds >= self.options.max_rounds {
                warn!(
                    rounds,
                    pending = batch.len(),
                    "round cap reached; widening routines with pending work to any"
                );
                self.degrade_pending();
                break;
            }
            rounds += 1;
            debug!(round = rounds, routines = batch.len(), "analysis round");

            if parallel {
                batch.par_iter().for_each(|&id| self.run_routine(id));
            } else {
                for &id in &batch {
                    if self.is_cancelled() {
                        break;
                    }
                    self.run_routine(id);
                }
            }

            batch = self.order.iter().copied().filter(|&id| self.has_pending(id)).collect();
        }
        self.rounds.fetch_add(rounds, Ordering::Relaxed);

        let summary = self.summary(rounds);
        info!(
            rounds = summary.rounds,
            analysed = summary.analysed,
            degraded = summary.degraded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "type-flow analysis finished"
        );
        summary
    }

    fn has_pending(&self, id: RoutineId) -> bool {
        let slot = &self.routines[id.index()];
        !slot.status().is_terminal() && !slot.inbox.lock().is_empty()
    }

    fn run_routine(&self, id: RoutineId) {
        let slot = &self.routines[id.index()];
        let pending: Vec<BlockId> = std::mem::take(&mut *slot.inbox.lock()).into_iter().collect();
        if slot.status().is_terminal() {
            return;
        }

        let mut state = slot.state.lock();
        let env = RoutineEnv { session: self, routine: id };
        let solver = FixpointSolver::new(&slot.cfg, &env, &self.options, &self.cancel);

        match solver.solve(&mut state, pending) {
            Ok(outcome) => {
                slot.set_status(if outcome.degraded {
                    RoutineStatus::Degraded
                } else {
                    RoutineStatus::Analysed
                });
                debug!(
                    routine = %slot.name,
                    iterations = outcome.iterations,
                    exit_reached = outcome.exit_reached,
                    "routine run finished"
                );
                let mask = state.return_mask().unwrap_or(TypeMask::BOTTOM);
                self.publish(id, mask, &state.ctx);
            }
            Err(AnalysisError::Cancelled) => {
                state.reset();
                slot.set_status(RoutineStatus::Cancelled);
                debug!(routine = %slot.name, "routine run cancelled; partial state discarded");
            }
            Err(err) => {
                error!(routine = %slot.name, error = %err, "internal analysis error; routine widened to any");
                state.reset();
                state.force_any();
                slot.set_status(RoutineStatus::Failed);
                self.diagnostics.push(Diagnostic {
                    severity: Severity::InternalError,
                    routine: slot.name.clone(),
                    span: slot.span,
                    message: err.to_string(),
                });
                self.publish(id, TypeMask::ANY, &state.ctx);
            }
        }
    }

    /// Replace the routine's published return and queue its subscribers,
    /// unless the mask is unchanged.
    fn publish(&self, id: RoutineId, mask: TypeMask, ctx: &TypeRefContext) {
        let slot = &self.routines[id.index()];
        if slot.snapshot().is_some_and(|s| s.mask == mask) {
            return;
        }
        *slot.published.write() = Some(Arc::new(ReturnSnapshot {
            mask,
            context: ctx.clone(),
        }));

        // written before notifying: a subscriber arriving concurrently
        // either reads the new snapshot or lands in this list
        let subscribers = slot.subscribers.snapshot();
        debug!(
            routine = %slot.name,
            return_type = %ctx.describe(mask),
            subscribers = subscribers.len(),
            "return type published"
        );
        for handle in subscribers {
            if let Some(target) = self.routines.get(handle.routine.index()) {
                target.inbox.lock().insert(handle.block);
            }
        }
    }

    /// Widen every routine with pending work, and transitively their
    /// callers, to AnyType.
    fn degrade_pending(&self) {
        loop {
            let pending: Vec<RoutineId> = self.order.iter().copied().filter(|&id| self.has_pending(id)).collect();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                let slot = &self.routines[id.index()];
                slot.inbox.lock().clear();
                let mut state = slot.state.lock();
                state.force_any();
                slot.set_status(RoutineStatus::Degraded);
                self.publish(id, TypeMask::ANY, &state.ctx);
            }
        }
    }

    fn summary(&self, rounds: usize) -> AnalysisSummary {
        let mut summary = AnalysisSummary {
            rounds,
            cancelled: self.is_cancelled(),
            ..Default::default()
        };
        for slot in &self.routines {
            match slot.status() {
                RoutineStatus::Analysed => summary.analysed += 1,
                RoutineStatus::Degraded => summary.degraded += 1,
                RoutineStatus::Failed => summary.failed += 1,
                RoutineStatus::Pending | RoutineStatus::Cancelled => summary.incomplete += 1,
            }
        }
        summary
    }

    fn slot(&self, id: RoutineId) -> Option<&RoutineSlot> {
        self.routines.get(id.index())
    }

    pub fn module(&self) -> &HirModule {
        &self.module
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.snapshot()
    }

    /// Rounds run over the session's lifetime
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    pub fn routine_ids(&self) -> impl Iterator<Item = RoutineId> {
        (0..self.routines.len()).map(|i| RoutineId(i as u32))
    }

    /// Callee-first schedule used for the first round
    pub fn schedule(&self) -> &[RoutineId] {
        &self.order
    }

    pub fn routine_id(&self, name: &str) -> Option<RoutineId> {
        match self.symbols.resolve_routine(name) {
            Some(crate::symbols::RoutineSymbol::Module(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn routine_name(&self, id: RoutineId) -> Option<&str> {
        self.slot(id).map(|slot| slot.name.as_str())
    }

    pub fn cfg(&self, id: RoutineId) -> Option<&Cfg> {
        self.slot(id).map(|slot| &slot.cfg)
    }

    pub fn status(&self, id: RoutineId) -> Option<RoutineStatus> {
        self.slot(id).map(RoutineSlot::status)
    }

    /// Result type of a routine, in the routine's own context.
    ///
    /// AnyType unless the routine reached its fixed point. Bottom means the
    /// routine never returns normally.
    pub fn result_type_mask(&self, id: RoutineId) -> TypeMask {
        match self.slot(id) {
            Some(slot) if slot.status() == RoutineStatus::Analysed => {
                slot.snapshot().map_or(TypeMask::BOTTOM, |s| s.mask)
            }
            _ => TypeMask::ANY,
        }
    }

    /// Whether the routine's analysis finished, whatever its precision.
    pub fn is_return_analysed(&self, id: RoutineId) -> bool {
        self.status(id)
            .is_some_and(|status| matches!(status, RoutineStatus::Analysed | RoutineStatus::Degraded))
    }

    /// Whether any path reached the exit block
    pub fn exit_reachable(&self, id: RoutineId) -> bool {
        self.slot(id).is_some_and(|slot| slot.state.lock().exit_reached())
    }

    /// Mask of `var` at the end of `block`.
    ///
    /// AnyType for routines that did not reach their fixed point; `None`
    /// when the block was never reached or does not bind the variable.
    pub fn local_type_mask(&self, id: RoutineId, block: BlockId, var: &str) -> Option<TypeMask> {
        let slot = self.slot(id)?;
        if slot.status() != RoutineStatus::Analysed {
            return Some(TypeMask::ANY);
        }
        let state = slot.state.lock();
        state.out_state(block).and_then(|flow| flow.get(var))
    }

    pub fn expr_type_mask(&self, id: RoutineId, expr: ExprId) -> Option<TypeMask> {
        self.slot(id)?.state.lock().expr_mask(expr)
    }

    pub fn routine_types(&self, id: RoutineId) -> Option<RoutineTypes> {
        let slot = self.slot(id)?;
        let status = slot.status();
        let state = slot.state.lock();
        Some(RoutineTypes::from_state(&slot.name, status, &state))
    }

    pub fn describe_return(&self, id: RoutineId) -> Option<String> {
        self.routine_types(id).map(|types| types.return_type())
    }

    /// Latest published return, as seen by callers
    pub fn published_return(&self, id: RoutineId) -> Option<Arc<ReturnSnapshot>> {
        self.slot(id)?.snapshot()
    }

    pub fn subscribers(&self, id: RoutineId) -> Vec<BlockHandle> {
        self.slot(id).map(|slot| slot.subscribers.snapshot()).unwrap_or_default()
    }

    /// Inspect a routine's solver state under its lock
    pub fn with_state<R>(&self, id: RoutineId, f: impl FnOnce(&Cfg, &SolverState) -> R) -> Option<R> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        Some(f(&slot.cfg, &state))
    }
}

/// The session as seen from inside one routine's solver run
struct RoutineEnv<'s> {
    session: &'s AnalysisSession,
    routine: RoutineId,
}

impl RoutineEnv<'_> {
    fn target(&self, id: RoutineId) -> Result<&RoutineSlot> {
        self.session.slot(id).ok_or(AnalysisError::UnknownRoutine(id.0))
    }
}

impl CallEnvironment for RoutineEnv<'_> {
    fn symbols(&self) -> &SymbolTable {
        &self.session.symbols
    }

    fn use_declared_types(&self) -> bool {
        self.session.options.use_declared_types
    }

    fn call_return(&self, callee: RoutineId, site: CallSite, ctx: &mut TypeRefContext) -> Result<TypeMask> {
        let target = self.target(callee)?;
        self.session.call_graph.add_edge(CallEdge {
            caller: self.routine,
            callee,
            site,
        });
        // subscribe before reading, so a concurrent publish is never missed
        target.subscribers.subscribe(BlockHandle::new(self.routine, site.block));

        match target.snapshot() {
            Some(snapshot) => ctx.transfer(snapshot.mask, &snapshot.context),
            None => Ok(TypeMask::BOTTOM),
        }
    }

    fn closure(
        &self,
        routine: RoutineId,
        block: BlockId,
        ctx: &mut TypeRefContext,
    ) -> Result<(LambdaSignature, TypeMask)> {
        let target = self.target(routine)?;
        target.subscribers.subscribe(BlockHandle::new(self.routine, block));

        let signature = LambdaSignature {
            routine: target.name.clone(),
            params: target.params.clone(),
        };
        // an unpublished target contributes bottom like a direct call; the
        // declaration is joined in either way so the result is the same
        // whichever routine runs first
        let published = match target.snapshot() {
            Some(snapshot) => ctx.transfer(snapshot.mask, &snapshot.context)?,
            None => TypeMask::BOTTOM,
        };
        let declared = match &target.return_type {
            Some(ty) if self.use_declared_types() => {
                let symbols = &self.session.symbols;
                ctx.declared_mask(ty, &|class| symbols.resolve_class(class))
            }
            _ => TypeMask::BOTTOM,
        };
        Ok((signature, published | declared))
    }
}
