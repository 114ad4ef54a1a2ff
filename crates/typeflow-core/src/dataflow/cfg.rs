//! Control Flow Graph construction from HIR

use crate::hir::{AssignTarget, CatchClause, DeclaredType, HirExpr, HirParam, HirRoutine, HirStmt, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Unique identifier for a basic block; ordinal position in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
    pub const EXIT: BlockId = BlockId(1);
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// How control reaches a successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Sequential,
    True,
    False,
    LoopBack,
    /// Taken when a statement of the source block throws
    Exception,
    /// From a returning block to the exit block
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// How a basic block terminates
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Unconditional jump to another block
    Goto(BlockId),
    /// Conditional branch
    Branch {
        condition: HirExpr,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Return from the routine
    Return(Option<HirExpr>),
    /// Loop header testing a condition
    Loop {
        condition: HirExpr,
        body_block: BlockId,
        exit_block: BlockId,
    },
    /// Foreach header; the body binds the next element
    Iterate { body_block: BlockId, exit_block: BlockId },
    /// Raise an exception; only exception edges leave the block
    Throw(HirExpr),
    /// Unreachable (after break/continue)
    Unreachable,
}

/// A statement in a basic block (simplified for dataflow)
#[derive(Debug, Clone)]
pub enum CfgStmt {
    /// Parameter definition at routine entry
    BindParam {
        name: Symbol,
        declared: Option<DeclaredType>,
        default: Option<HirExpr>,
    },
    /// Variable assignment
    Assign { target: Symbol, value: HirExpr },
    /// Element store `base[index] = value`; `None` appends
    IndexAssign {
        base: Symbol,
        index: Option<HirExpr>,
        value: HirExpr,
    },
    /// Expression statement
    Expr(HirExpr),
    /// Bind the key/value variables of a foreach from the iterated value
    BindElement {
        source: Symbol,
        key: Option<Symbol>,
        value: Symbol,
    },
    /// Catch-clause variable binding
    BindException { var: Symbol, class: Symbol },
    Unset(Symbol),
}

/// A basic block in the CFG
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub stmts: Vec<CfgStmt>,
    pub terminator: Option<Terminator>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<CfgEdge>,
    /// Re-run the block even when its incoming state did not change
    pub force_repeated_analysis: bool,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            stmts: Vec::new(),
            terminator: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
            force_repeated_analysis: false,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.id == BlockId::EXIT
    }

    pub fn returns(&self) -> bool {
        matches!(self.terminator, Some(Terminator::Return(_)))
    }
}

/// Control Flow Graph
#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl Cfg {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: Vec::new(),
            entry: BlockId::ENTRY,
            exit: BlockId::EXIT,
        };
        cfg.entry = cfg.new_block();
        cfg.exit = cfg.new_block();
        cfg.blocks[cfg.exit.0].force_repeated_analysis = true;
        cfg
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        if from.0 >= self.blocks.len() || to.0 >= self.blocks.len() {
            return;
        }
        let edge = CfgEdge { from, to, kind };
        let block = &mut self.blocks[from.0];
        if !block.successors.contains(&edge) {
            block.successors.push(edge);
        }
        let block = &mut self.blocks[to.0];
        if !block.predecessors.contains(&from) {
            block.predecessors.push(from);
        }
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.terminator = Some(terminator);
        }
    }

    pub fn add_stmt(&mut self, block: BlockId, stmt: CfgStmt) {
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.stmts.push(stmt);
        }
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.blocks.iter().map(|b| b.successors.len()).sum()
    }

    pub fn successors(&self, id: BlockId) -> &[CfgEdge] {
        self.blocks.get(id.0).map(|b| b.successors.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        self.blocks.get(id.0).map(|b| b.predecessors.as_slice()).unwrap_or(&[])
    }

    /// Blocks whose terminator is a return, in ordinal order
    pub fn returning_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().filter(|b| b.returns()).map(|b| b.id)
    }

    fn is_open(&self, block: BlockId) -> bool {
        self.blocks.get(block.0).is_some_and(|b| b.terminator.is_none())
    }

    /// Get blocks in reverse postorder (useful for forward dataflow)
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut postorder = self.postorder();
        postorder.reverse();
        postorder
    }

    /// Get blocks in postorder
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        // explicit stack: deep nesting must not overflow
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some((block, next)) = stack.last_mut() {
            let succs = self.successors(*block);
            if let Some(edge) = succs.get(*next) {
                *next += 1;
                if visited.insert(edge.to) {
                    stack.push((edge.to, 0));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        postorder
    }

    /// Blocks reachable from the entry
    pub fn reachable(&self) -> HashSet<BlockId> {
        self.postorder().into_iter().collect()
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix of variables the builder introduces; never a source name
pub const SYNTHETIC_PREFIX: char = '#';

pub fn is_synthetic_var(name: &str) -> bool {
    name.starts_with(SYNTHETIC_PREFIX)
}

/// Builder for constructing CFG from HIR
pub struct CfgBuilder {
    cfg: Cfg,
    current_block: BlockId,
    loop_stack: Vec<LoopContext>,
    /// Finally clauses enclosing the current statement, innermost last
    finally_stack: Vec<Vec<HirStmt>>,
    next_temp: u32,
}

struct LoopContext {
    continue_block: BlockId,
    break_block: BlockId,
}

impl CfgBuilder {
    pub fn new() -> Self {
        let cfg = Cfg::new();
        let entry = cfg.entry;
        Self {
            cfg,
            current_block: entry,
            loop_stack: Vec::new(),
            finally_stack: Vec::new(),
            next_temp: 0,
        }
    }

    pub fn build_routine(mut self, routine: &HirRoutine) -> Cfg {
        self.bind_params(&routine.params);

        // The entry block only defines parameters so that it has no
        // predecessors even when the body starts with a loop
        let body = self.cfg.new_block();
        self.goto(body, EdgeKind::Sequential);
        self.current_block = body;
        self.build_body(&routine.body);

        // Falling off the end returns null
        if self.cfg.is_open(self.current_block) {
            self.cfg.set_terminator(self.current_block, Terminator::Return(None));
            self.cfg.add_edge(self.current_block, self.cfg.exit, EdgeKind::Return);
        }

        self.cfg
    }

    fn bind_params(&mut self, params: &[HirParam]) {
        for param in params {
            self.cfg.add_stmt(
                self.current_block,
                CfgStmt::BindParam {
                    name: param.name.clone(),
                    declared: param.declared.clone(),
                    default: param.default.clone(),
                },
            );
        }
    }

    fn goto(&mut self, target: BlockId, kind: EdgeKind) {
        if self.cfg.is_open(self.current_block) {
            self.cfg.set_terminator(self.current_block, Terminator::Goto(target));
            self.cfg.add_edge(self.current_block, target, kind);
        }
    }

    fn build_body(&mut self, stmts: &[HirStmt]) {
        for stmt in stmts {
            self.build_stmt(stmt);
        }
    }

    fn build_stmt(&mut self, stmt: &HirStmt) {
        match stmt {
            HirStmt::Assign { target, value } => self.build_assign(target, value),
            HirStmt::Return(expr) => {
                self.cfg
                    .set_terminator(self.current_block, Terminator::Return(expr.clone()));
                if self.finally_stack.is_empty() {
                    self.cfg.add_edge(self.current_block, self.cfg.exit, EdgeKind::Return);
                } else {
                    self.route_return_through_finally();
                }
                // Create new unreachable block for any following statements
                self.current_block = self.cfg.new_block();
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => self.build_if(condition, then_body, else_body.as_deref()),
            HirStmt::While { condition, body } => self.build_while(condition, body),
            HirStmt::Foreach { iter, key, value, body } => self.build_foreach(iter, key.as_ref(), value, body),
            HirStmt::Expr(expr) => {
                self.cfg.add_stmt(self.current_block, CfgStmt::Expr(expr.clone()));
            }
            HirStmt::Break => {
                if let Some(ctx) = self.loop_stack.last() {
                    let target = ctx.break_block;
                    self.cfg.set_terminator(self.current_block, Terminator::Goto(target));
                    self.cfg.add_edge(self.current_block, target, EdgeKind::Sequential);
                } else {
                    self.cfg.set_terminator(self.current_block, Terminator::Unreachable);
                }
                self.current_block = self.cfg.new_block();
            }
            HirStmt::Continue => {
                if let Some(ctx) = self.loop_stack.last() {
                    let target = ctx.continue_block;
                    self.cfg.set_terminator(self.current_block, Terminator::Goto(target));
                    self.cfg.add_edge(self.current_block, target, EdgeKind::LoopBack);
                } else {
                    self.cfg.set_terminator(self.current_block, Terminator::Unreachable);
                }
                self.current_block = self.cfg.new_block();
            }
            HirStmt::Throw(expr) => {
                self.cfg
                    .set_terminator(self.current_block, Terminator::Throw(expr.clone()));
                self.current_block = self.cfg.new_block();
            }
            HirStmt::Try {
                body,
                catches,
                finally,
            } => self.build_try(body, catches, finally.as_deref()),
            HirStmt::Unset(name) => {
                self.cfg.add_stmt(self.current_block, CfgStmt::Unset(name.clone()));
            }
        }
    }

    /// A pending return runs every enclosing finally clause, innermost
    /// first, before it reaches the exit. The returning block's state already
    /// carries the return mask, so a `return` inside a finally clause only
    /// adds to it.
    fn route_return_through_finally(&mut self) {
        let pending = std::mem::take(&mut self.finally_stack);
        let first = self.cfg.new_block();
        self.cfg.add_edge(self.current_block, first, EdgeKind::Return);
        self.current_block = first;

        for depth in (0..pending.len()).rev() {
            if depth + 1 < pending.len() {
                let next = self.cfg.new_block();
                self.goto(next, EdgeKind::Sequential);
                self.current_block = next;
            }
            self.finally_stack = pending[..depth].to_vec();
            self.build_body(&pending[depth]);
        }

        if self.cfg.is_open(self.current_block) {
            let exit = self.cfg.exit;
            self.cfg.set_terminator(self.current_block, Terminator::Goto(exit));
            self.cfg.add_edge(self.current_block, exit, EdgeKind::Return);
        }
        self.finally_stack = pending;
    }

    fn build_assign(&mut self, target: &AssignTarget, value: &HirExpr) {
        let stmt = match target {
            AssignTarget::Var(name) => CfgStmt::Assign {
                target: name.clone(),
                value: value.clone(),
            },
            AssignTarget::Index { base, index } => CfgStmt::IndexAssign {
                base: base.clone(),
                index: index.clone(),
                value: value.clone(),
            },
        };
        self.cfg.add_stmt(self.current_block, stmt);
    }

    fn build_if(&mut self, condition: &HirExpr, then_body: &[HirStmt], else_body: Option<&[HirStmt]>) {
        let then_block = self.cfg.new_block();
        let else_block = self.cfg.new_block();
        let merge_block = self.cfg.new_block();

        // Current block branches
        self.cfg.set_terminator(
            self.current_block,
            Terminator::Branch {
                condition: condition.clone(),
                then_block,
                else_block,
            },
        );
        self.cfg.add_edge(self.current_block, then_block, EdgeKind::True);
        self.cfg.add_edge(self.current_block, else_block, EdgeKind::False);

        self.current_block = then_block;
        self.build_body(then_body);
        self.goto(merge_block, EdgeKind::Sequential);

        self.current_block = else_block;
        if let Some(else_stmts) = else_body {
            self.build_body(else_stmts);
        }
        self.goto(merge_block, EdgeKind::Sequential);

        self.current_block = merge_block;
    }

    fn build_while(&mut self, condition: &HirExpr, body: &[HirStmt]) {
        let header_block = self.cfg.new_block();
        let body_block = self.cfg.new_block();
        let exit_block = self.cfg.new_block();

        self.goto(header_block, EdgeKind::Sequential);

        self.cfg.set_terminator(
            header_block,
            Terminator::Loop {
                condition: condition.clone(),
                body_block,
                exit_block,
            },
        );
        self.cfg.add_edge(header_block, body_block, EdgeKind::True);
        self.cfg.add_edge(header_block, exit_block, EdgeKind::False);

        self.loop_stack.push(LoopContext {
            continue_block: header_block,
            break_block: exit_block,
        });
        self.current_block = body_block;
        self.build_body(body);
        self.loop_stack.pop();

        // Back edge to header
        self.goto(header_block, EdgeKind::LoopBack);

        self.current_block = exit_block;
    }

    fn build_foreach(&mut self, iter: &HirExpr, key: Option<&Symbol>, value: &Symbol, body: &[HirStmt]) {
        // The iterated value is evaluated once, before the loop
        let source = format!("{SYNTHETIC_PREFIX}foreach{}", self.next_temp);
        self.next_temp += 1;
        self.cfg.add_stmt(
            self.current_block,
            CfgStmt::Assign {
                target: source.clone(),
                value: iter.clone(),
            },
        );

        let header_block = self.cfg.new_block();
        let body_block = self.cfg.new_block();
        let exit_block = self.cfg.new_block();

        self.goto(header_block, EdgeKind::Sequential);

        self.cfg
            .set_terminator(header_block, Terminator::Iterate { body_block, exit_block });
        self.cfg.add_edge(header_block, body_block, EdgeKind::True);
        self.cfg.add_edge(header_block, exit_block, EdgeKind::False);

        self.cfg.add_stmt(
            body_block,
            CfgStmt::BindElement {
                source,
                key: key.cloned(),
                value: value.clone(),
            },
        );

        self.loop_stack.push(LoopContext {
            continue_block: header_block,
            break_block: exit_block,
        });
        self.current_block = body_block;
        self.build_body(body);
        self.loop_stack.pop();

        self.goto(header_block, EdgeKind::LoopBack);

        self.current_block = exit_block;
    }

    fn build_try(&mut self, body: &[HirStmt], catches: &[CatchClause], finally: Option<&[HirStmt]>) {
        let try_block = self.cfg.new_block();
        self.goto(try_block, EdgeKind::Sequential);

        // Blocks of the protected region are allocated contiguously
        let first = try_block.0;
        self.current_block = try_block;
        if let Some(finally_stmts) = finally {
            self.finally_stack.push(finally_stmts.to_vec());
        }
        self.build_body(body);
        let protected_end = self.cfg.len();
        let body_tail = self.current_block;

        let after_block = self.cfg.new_block();
        let mut tails = vec![body_tail];

        for clause in catches {
            let handler = self.cfg.new_block();
            for block in first..protected_end {
                self.cfg.add_edge(BlockId(block), handler, EdgeKind::Exception);
            }
            self.cfg.add_stmt(
                handler,
                CfgStmt::BindException {
                    var: clause.var.clone(),
                    class: clause.class.clone(),
                },
            );
            self.current_block = handler;
            self.build_body(&clause.body);
            tails.push(self.current_block);
        }
        if finally.is_some() {
            self.finally_stack.pop();
        }

        match finally {
            Some(finally_stmts) => {
                let finally_block = self.cfg.new_block();
                // An uncaught exception still runs the finally clause
                if catches.is_empty() {
                    for block in first..protected_end {
                        self.cfg.add_edge(BlockId(block), finally_block, EdgeKind::Exception);
                    }
                }
                for tail in tails {
                    self.current_block = tail;
                    self.goto(finally_block, EdgeKind::Sequential);
                }
                self.current_block = finally_block;
                self.build_body(finally_stmts);
                self.goto(after_block, EdgeKind::Sequential);
            }
            None => {
                for tail in tails {
                    self.current_block = tail;
                    self.goto(after_block, EdgeKind::Sequential);
                }
            }
        }

        self.current_block = after_block;
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}
