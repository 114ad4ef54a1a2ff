//! Forward type propagation through one basic block
//!
//! [`TypePropagation`] evaluates the statements and terminator of a block
//! against an incoming [`FlowState`], interning whatever new type shapes it
//! meets into the routine's context. Anything that reaches outside the
//! routine (called routines, closures) goes through a [`CallEnvironment`].

use super::cfg::{BasicBlock, BlockId, CfgStmt, Terminator};
use super::context::TypeRefContext;
use super::flow_state::FlowState;
use super::lattice::TypeMask;
use super::type_ref::{ArrayKey, ArrayKeys, LambdaSignature, PrimitiveKind, TypeRef};
use crate::error::Result;
use crate::hir::{BinOp, ExprId, HirExpr, HirExprKind, UnaryOp};
use crate::interprocedural::{CallSite, RoutineId};
use crate::symbols::{RoutineSymbol, SymbolTable};
use std::collections::HashMap;
use tracing::trace;

/// What the evaluator may ask about the world outside its routine
pub trait CallEnvironment {
    fn symbols(&self) -> &SymbolTable;

    /// Seed parameters from their declarations instead of AnyType
    fn use_declared_types(&self) -> bool {
        true
    }

    /// Best-known return mask of `callee`, expressed in `ctx`.
    ///
    /// Records the call edge and subscribes `site.block` to the callee's
    /// exit. A callee with no published result yet contributes bottom.
    fn call_return(&self, callee: RoutineId, site: CallSite, ctx: &mut TypeRefContext) -> Result<TypeMask>;

    /// Signature and best-known return of a closure routine. Subscribes
    /// `block` so the closure value is rebuilt when the return grows.
    fn closure(
        &self,
        routine: RoutineId,
        block: BlockId,
        ctx: &mut TypeRefContext,
    ) -> Result<(LambdaSignature, TypeMask)>;
}

const INT_LIKE: &[PrimitiveKind] = &[PrimitiveKind::Null, PrimitiveKind::Bool, PrimitiveKind::Long];
const NUMERIC: &[PrimitiveKind] = &[
    PrimitiveKind::Null,
    PrimitiveKind::Bool,
    PrimitiveKind::Long,
    PrimitiveKind::Double,
];

/// Forward type propagation analysis for one block visit
pub struct TypePropagation<'a, E: CallEnvironment + ?Sized> {
    ctx: &'a mut TypeRefContext,
    env: &'a E,
    block: BlockId,
    expr_masks: &'a mut HashMap<ExprId, TypeMask>,
}

impl<'a, E: CallEnvironment + ?Sized> TypePropagation<'a, E> {
    pub fn new(
        ctx: &'a mut TypeRefContext,
        env: &'a E,
        block: BlockId,
        expr_masks: &'a mut HashMap<ExprId, TypeMask>,
    ) -> Self {
        Self {
            ctx,
            env,
            block,
            expr_masks,
        }
    }

    /// Transfer function: outgoing state of `block` for incoming `state`
    pub fn transfer(&mut self, block: &BasicBlock, mut state: FlowState) -> Result<FlowState> {
        for stmt in &block.stmts {
            self.exec_stmt(stmt, &mut state)?;
        }
        if let Some(terminator) = &block.terminator {
            self.exec_terminator(terminator, &mut state)?;
        }
        trace!(block = %block.id, vars = state.var_count(), "block transferred");
        Ok(state)
    }

    fn exec_stmt(&mut self, stmt: &CfgStmt, state: &mut FlowState) -> Result<()> {
        match stmt {
            CfgStmt::BindParam { name, declared, default } => {
                let declared_mask = match declared {
                    Some(ty) if self.env.use_declared_types() => {
                        let symbols = self.env.symbols();
                        Some(self.ctx.declared_mask(ty, &|class| symbols.resolve_class(class)))
                    }
                    _ => None,
                };
                let default_mask = match default {
                    Some(expr) => Some(self.infer_expr(expr, state)?),
                    None => None,
                };
                let mask = match (declared_mask, default_mask) {
                    (Some(declared), Some(default)) => declared | default,
                    (Some(declared), None) => declared,
                    (None, _) => TypeMask::ANY,
                };
                state.set(name, mask);
            }
            CfgStmt::Assign { target, value } => {
                let mask = self.infer_expr(value, state)?;
                state.set(target, mask.without_uninitialized());
            }
            CfgStmt::IndexAssign { base, index, value } => {
                let key = match index {
                    Some(index) => {
                        self.infer_expr(index, state)?;
                        index.as_literal().and_then(ArrayKey::from_literal)
                    }
                    None => None,
                };
                let value = self.infer_expr(value, state)?;
                let updated = self.store_element(state.get(base), key, value)?;
                state.set(base, updated);
            }
            CfgStmt::Expr(expr) => {
                self.infer_expr(expr, state)?;
            }
            CfgStmt::BindElement { source, key, value } => {
                let iterated = self.read_var(state, source);
                let (keys, values) = self.iteration_masks(iterated)?;
                state.set(value, values);
                if let Some(key) = key {
                    state.set(key, keys);
                }
            }
            CfgStmt::BindException { var, class } => {
                let class = self.env.symbols().resolve_class(class);
                let mask = self.ctx.add_to_context(TypeRef::class_or_subclass(&class));
                state.set(var, mask);
            }
            CfgStmt::Unset(name) => state.remove(name),
        }
        Ok(())
    }

    fn exec_terminator(&mut self, terminator: &Terminator, state: &mut FlowState) -> Result<()> {
        match terminator {
            Terminator::Branch { condition, .. } | Terminator::Loop { condition, .. } => {
                self.infer_expr(condition, state)?;
            }
            Terminator::Return(expr) => {
                let mask = match expr {
                    Some(expr) => self.infer_expr(expr, state)?,
                    None => self.ctx.null_mask(),
                };
                state.add_return(mask);
            }
            Terminator::Throw(expr) => {
                self.infer_expr(expr, state)?;
            }
            Terminator::Goto(_) | Terminator::Iterate { .. } | Terminator::Unreachable => {}
        }
        Ok(())
    }

    /// Infer the mask of an expression and cache it under its id
    pub fn infer_expr(&mut self, expr: &HirExpr, state: &FlowState) -> Result<TypeMask> {
        let mask = self.infer_expr_uncached(expr, state)?;
        *self.expr_masks.entry(expr.id).or_default() |= mask;
        Ok(mask)
    }

    fn infer_expr_uncached(&mut self, expr: &HirExpr, state: &FlowState) -> Result<TypeMask> {
        match &expr.kind {
            HirExprKind::Literal(lit) => self.ctx.literal_mask(lit),
            HirExprKind::Var(name) => Ok(self.read_var(state, name)),
            HirExprKind::Binary { op, left, right } => {
                let left = self.infer_expr(left, state)?;
                let right = self.infer_expr(right, state)?;
                self.binary_op_mask(*op, left, right)
            }
            HirExprKind::Unary { op, operand } => {
                let operand = self.infer_expr(operand, state)?;
                self.unary_op_mask(*op, operand)
            }
            HirExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.infer_expr(condition, state)?;
                let then_mask = self.infer_expr(then_expr, state)?;
                let else_mask = self.infer_expr(else_expr, state)?;
                Ok(then_mask | else_mask)
            }
            HirExprKind::Call { func, args } => {
                for arg in args {
                    self.infer_expr(arg, state)?;
                }
                self.call_mask(func, expr.id)
            }
            HirExprKind::DynamicCall { callee, args } => {
                let callee = self.infer_expr(callee, state)?;
                for arg in args {
                    self.infer_expr(arg, state)?;
                }
                self.dynamic_call_mask(callee)
            }
            HirExprKind::New { class, args } => {
                for arg in args {
                    self.infer_expr(arg, state)?;
                }
                let class = self.env.symbols().resolve_class(class);
                Ok(self.ctx.add_to_context(TypeRef::class(&class)))
            }
            HirExprKind::Array(items) => {
                let mut array = TypeRef::empty_array();
                let mut next_index: i64 = 0;
                for item in items {
                    let key = match &item.key {
                        Some(key_expr) => {
                            self.infer_expr(key_expr, state)?;
                            key_expr.as_literal().and_then(ArrayKey::from_literal)
                        }
                        None => Some(ArrayKey::Int(next_index)),
                    };
                    if let Some(ArrayKey::Int(i)) = key {
                        next_index = next_index.max(i.saturating_add(1));
                    }
                    let value = self.infer_expr(&item.value, state)?;
                    array = array.with_element(key, value)?;
                }
                Ok(self.ctx.add_to_context(array))
            }
            HirExprKind::Index { base, index } => {
                let base = self.infer_expr(base, state)?;
                self.infer_expr(index, state)?;
                let key = index.as_literal().and_then(ArrayKey::from_literal);
                self.index_mask(base, key.as_ref())
            }
            HirExprKind::Lambda { routine } => match self.env.symbols().resolve_routine(routine) {
                Some(RoutineSymbol::Module(id)) => {
                    let id = *id;
                    let (signature, return_mask) = self.env.closure(id, self.block, self.ctx)?;
                    Ok(self.ctx.add_to_context(TypeRef::Lambda {
                        signature: Some(signature),
                        return_mask,
                    }))
                }
                _ => Ok(self.ctx.callable_mask()),
            },
            HirExprKind::InstanceOf { value, .. } => {
                self.infer_expr(value, state)?;
                Ok(self.ctx.bool_mask())
            }
        }
    }

    /// An unset variable reads as null; a possibly unset one adds null.
    fn read_var(&mut self, state: &FlowState, name: &str) -> TypeMask {
        match state.get(name) {
            None => self.ctx.null_mask(),
            Some(mask) if mask.is_uninitialized() => mask.without_uninitialized() | self.ctx.null_mask(),
            Some(mask) => mask,
        }
    }

    fn call_mask(&mut self, func: &str, expr: ExprId) -> Result<TypeMask> {
        match self.env.symbols().resolve_routine(func) {
            Some(RoutineSymbol::Module(callee)) => {
                let site = CallSite {
                    block: self.block,
                    expr,
                };
                self.env.call_return(*callee, site, self.ctx)
            }
            Some(RoutineSymbol::External {
                return_type: Some(ty), ..
            }) => {
                let symbols = self.env.symbols();
                Ok(self.ctx.declared_mask(ty, &|class| symbols.resolve_class(class)))
            }
            // unresolved or undeclared: nothing to wait for
            Some(RoutineSymbol::External { return_type: None, .. }) | None => Ok(TypeMask::ANY),
        }
    }

    fn dynamic_call_mask(&mut self, callee: TypeMask) -> Result<TypeMask> {
        let summary = self.ctx.summarize(callee)?;
        if summary.any || summary.lambdas == 0 || summary.lambdas != callee.slot_count() as usize {
            return Ok(TypeMask::ANY);
        }
        let mut result = TypeMask::BOTTOM;
        for ty in self.ctx.get_types(callee)? {
            result |= ty.lambda_return_mask()?;
        }
        Ok(result)
    }

    fn binary_op_mask(&mut self, op: BinOp, left: TypeMask, right: TypeMask) -> Result<TypeMask> {
        let left = left.without_uninitialized();
        let right = right.without_uninitialized();
        Ok(match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Pow => {
                let ls = self.ctx.summarize(left)?;
                let rs = self.ctx.summarize(right)?;
                if ls.only(INT_LIKE) && rs.only(INT_LIKE) {
                    if op == BinOp::Pow {
                        self.ctx.number_mask()
                    } else {
                        self.ctx.long_mask()
                    }
                } else if op == BinOp::Add && ls.is_array() && rs.is_array() {
                    left | right
                } else if ls.only(NUMERIC) && rs.only(NUMERIC) {
                    self.ctx.double_mask()
                } else {
                    self.ctx.number_mask()
                }
            }
            BinOp::Div => self.ctx.number_mask(),
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                self.ctx.long_mask()
            }
            BinOp::Concat => self.ctx.string_mask(),
            BinOp::Eq
            | BinOp::NotEq
            | BinOp::Identical
            | BinOp::NotIdentical
            | BinOp::Lt
            | BinOp::LtEq
            | BinOp::Gt
            | BinOp::GtEq
            | BinOp::And
            | BinOp::Or
            | BinOp::Xor => self.ctx.bool_mask(),
            BinOp::Coalesce => {
                let null = self.ctx.null_mask();
                left.without_slots(null) | right
            }
        })
    }

    fn unary_op_mask(&mut self, op: UnaryOp, operand: TypeMask) -> Result<TypeMask> {
        let operand = operand.without_uninitialized();
        Ok(match op {
            UnaryOp::Not | UnaryOp::CastBool => self.ctx.bool_mask(),
            UnaryOp::BitNot | UnaryOp::CastInt => self.ctx.long_mask(),
            UnaryOp::CastFloat => self.ctx.double_mask(),
            UnaryOp::CastString => self.ctx.string_mask(),
            UnaryOp::Neg | UnaryOp::Plus => {
                let summary = self.ctx.summarize(operand)?;
                if summary.only(INT_LIKE) {
                    self.ctx.long_mask()
                } else if summary.only(&[PrimitiveKind::Double]) {
                    self.ctx.double_mask()
                } else {
                    self.ctx.number_mask()
                }
            }
            UnaryOp::CastArray => {
                if operand.is_any() {
                    self.ctx.array_mask()
                } else if self.ctx.is_array(operand)? {
                    operand
                } else {
                    self.ctx.add_to_context(TypeRef::Array {
                        keys: ArrayKeys::Dynamic,
                        elements: operand,
                    })
                }
            }
        })
    }

    /// Mask read by `base[key]`
    fn index_mask(&mut self, base: TypeMask, key: Option<&ArrayKey>) -> Result<TypeMask> {
        if base.is_any() {
            return Ok(TypeMask::ANY);
        }
        let null = self.ctx.null_mask();
        let string = self.ctx.string_mask();
        let mut result = TypeMask::BOTTOM;
        for ty in self.ctx.get_types(base)? {
            match ty {
                TypeRef::Array {
                    keys: ArrayKeys::Known(map),
                    elements,
                } => match key {
                    Some(key) => result |= map.get(key).copied().unwrap_or(null),
                    None => result |= *elements | null,
                },
                TypeRef::Array {
                    keys: ArrayKeys::Dynamic,
                    elements,
                } => result |= *elements | null,
                TypeRef::Primitive(kind) if kind.is_string() => result |= string,
                TypeRef::Primitive(PrimitiveKind::Null) => result |= null,
                _ => return Ok(TypeMask::ANY),
            }
        }
        Ok(result)
    }

    /// Mask of `base` after `base[key] = value`; a `None` key widens the shape.
    fn store_element(&mut self, base: Option<TypeMask>, key: Option<ArrayKey>, value: TypeMask) -> Result<TypeMask> {
        let base = match base {
            Some(mask) if mask.is_any() => return Ok(TypeMask::ANY),
            Some(mask) => mask,
            None => return Ok(self.ctx.add_to_context(TypeRef::empty_array().with_element(key, value)?)),
        };

        // an unset or null base is auto-vivified into a new array
        let mut updated = TypeMask::BOTTOM;
        let mut shapes = Vec::new();
        let mut vivify = base.is_uninitialized() || base.is_bottom();
        for ty in self.ctx.get_types(base)? {
            match ty {
                TypeRef::Array { .. } => shapes.push(ty.with_element(key.clone(), value)?),
                TypeRef::Primitive(PrimitiveKind::Null) => vivify = true,
                TypeRef::Primitive(kind) if kind.is_string() => {
                    shapes.push(TypeRef::Primitive(*kind));
                }
                other => shapes.push(other.clone()),
            }
        }
        if vivify {
            shapes.push(TypeRef::empty_array().with_element(key, value)?);
        }
        for shape in shapes {
            updated |= self.ctx.add_to_context(shape);
        }
        Ok(updated)
    }

    /// Key and value masks bound by iterating over `iterated`
    fn iteration_masks(&mut self, iterated: TypeMask) -> Result<(TypeMask, TypeMask)> {
        if iterated.is_any() {
            return Ok((TypeMask::ANY, TypeMask::ANY));
        }
        let long = self.ctx.long_mask();
        let string = self.ctx.string_mask();
        let mut keys = TypeMask::BOTTOM;
        let mut values = TypeMask::BOTTOM;
        for ty in self.ctx.get_types(iterated)? {
            match ty {
                TypeRef::Array {
                    keys: ArrayKeys::Known(map),
                    elements,
                } => {
                    for key in map.keys() {
                        keys |= match key {
                            ArrayKey::Int(_) => long,
                            ArrayKey::Str(_) => string,
                        };
                    }
                    values |= *elements;
                }
                TypeRef::Array {
                    keys: ArrayKeys::Dynamic,
                    elements,
                } => {
                    keys |= long | string;
                    values |= *elements;
                }
                // iterating null runs no iteration
                TypeRef::Primitive(PrimitiveKind::Null) => {}
                _ => return Ok((TypeMask::ANY, TypeMask::ANY)),
            }
        }
        Ok((keys, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::cfg::{BlockId, CfgStmt};
    use crate::hir::{DeclaredType, ExternalRoutine, Literal};
    use std::cell::RefCell;

    /// Environment with one module routine `callee` returning a fixed shape
    struct StubEnv {
        symbols: SymbolTable,
        callee_return: Option<PrimitiveKind>,
        calls: RefCell<Vec<(RoutineId, CallSite)>>,
    }

    impl StubEnv {
        fn new(callee_return: Option<PrimitiveKind>) -> Self {
            let mut symbols = SymbolTable::with_builtins();
            symbols.declare_routine("callee", RoutineId(1));
            symbols.declare_routine("closure", RoutineId(2));
            symbols.declare_external(&ExternalRoutine {
                name: "opaque".to_string(),
                return_type: None,
            });
            Self {
                symbols,
                callee_return,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CallEnvironment for StubEnv {
        fn symbols(&self) -> &SymbolTable {
            &self.symbols
        }

        fn call_return(&self, callee: RoutineId, site: CallSite, ctx: &mut TypeRefContext) -> Result<TypeMask> {
            self.calls.borrow_mut().push((callee, site));
            Ok(match self.callee_return {
                Some(kind) => ctx.primitive_mask(kind),
                None => TypeMask::BOTTOM,
            })
        }

        fn closure(
            &self,
            routine: RoutineId,
            _block: BlockId,
            ctx: &mut TypeRefContext,
        ) -> Result<(LambdaSignature, TypeMask)> {
            let signature = LambdaSignature {
                routine: format!("closure{}", routine.0),
                params: vec![],
            };
            Ok((signature, ctx.string_mask()))
        }
    }

    struct Harness {
        ctx: TypeRefContext,
        env: StubEnv,
        masks: HashMap<ExprId, TypeMask>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_callee(Some(PrimitiveKind::Long))
        }

        fn with_callee(kind: Option<PrimitiveKind>) -> Self {
            Self {
                ctx: TypeRefContext::new(),
                env: StubEnv::new(kind),
                masks: HashMap::new(),
            }
        }

        fn eval(&mut self, expr: &HirExpr, state: &FlowState) -> TypeMask {
            TypePropagation::new(&mut self.ctx, &self.env, BlockId(2), &mut self.masks)
                .infer_expr(expr, state)
                .unwrap()
        }

        fn run(&mut self, stmts: Vec<CfgStmt>) -> FlowState {
            let mut block = BasicBlock::new(BlockId(2));
            block.stmts = stmts;
            let state = FlowState::new(&self.ctx);
            TypePropagation::new(&mut self.ctx, &self.env, BlockId(2), &mut self.masks)
                .transfer(&block, state)
                .unwrap()
        }

        fn describe(&self, mask: TypeMask) -> String {
            self.ctx.describe(mask)
        }
    }

    fn assign(target: &str, value: HirExpr) -> CfgStmt {
        CfgStmt::Assign {
            target: target.to_string(),
            value,
        }
    }

    fn store(base: &str, key: Option<HirExpr>, value: HirExpr) -> CfgStmt {
        CfgStmt::IndexAssign {
            base: base.to_string(),
            index: key,
            value,
        }
    }

    #[test]
    fn test_arithmetic_on_ints_stays_int() {
        let mut h = Harness::new();
        let state = FlowState::new(&h.ctx);
        let sum = h.eval(&HirExpr::binary(BinOp::Add, HirExpr::int(1), HirExpr::bool(true)), &state);
        assert_eq!(h.describe(sum), "int");
        let mixed = h.eval(&HirExpr::binary(BinOp::Mul, HirExpr::int(1), HirExpr::float(2.0)), &state);
        assert_eq!(h.describe(mixed), "float");
        let unknown = h.eval(&HirExpr::binary(BinOp::Sub, HirExpr::string("1"), HirExpr::int(1)), &state);
        assert_eq!(h.describe(unknown), "int|float");
        let div = h.eval(&HirExpr::binary(BinOp::Div, HirExpr::int(4), HirExpr::int(2)), &state);
        assert_eq!(h.describe(div), "int|float");
    }

    #[test]
    fn test_comparison_concat_and_coalesce() {
        let mut h = Harness::new();
        let mut state = FlowState::new(&h.ctx);
        let cmp = h.eval(&HirExpr::binary(BinOp::Lt, HirExpr::int(1), HirExpr::int(2)), &state);
        assert_eq!(h.describe(cmp), "bool");
        let concat = h.eval(&HirExpr::binary(BinOp::Concat, HirExpr::int(1), HirExpr::int(2)), &state);
        assert_eq!(h.describe(concat), "string");

        let maybe = h.ctx.null_mask() | h.ctx.long_mask();
        state.set("m", maybe);
        let coalesced = h.eval(&HirExpr::binary(BinOp::Coalesce, HirExpr::var("m"), HirExpr::string("d")), &state);
        assert_eq!(h.describe(coalesced), "int|string");
    }

    #[test]
    fn test_variable_reads() {
        let mut h = Harness::new();
        let mut state = FlowState::new(&h.ctx);
        let absent = h.eval(&HirExpr::var("nope"), &state);
        assert_eq!(h.describe(absent), "null");

        let long = h.ctx.long_mask();
        state.set("maybe", long.with_uninitialized());
        let maybe = h.eval(&HirExpr::var("maybe"), &state);
        assert!(!maybe.is_uninitialized());
        assert_eq!(h.describe(maybe), "null|int");
    }

    #[test]
    fn test_unknown_literal_is_an_error() {
        let mut h = Harness::new();
        let state = FlowState::new(&h.ctx);
        let expr = HirExpr::literal(Literal::Unknown("decimal".into()));
        let result = TypePropagation::new(&mut h.ctx, &h.env, BlockId(2), &mut h.masks).infer_expr(&expr, &state);
        assert!(result.is_err());
    }

    #[test]
    fn test_calls_by_kind() {
        let mut h = Harness::new();
        let state = FlowState::new(&h.ctx);
        let module = h.eval(&HirExpr::call("callee", vec![]), &state);
        assert_eq!(h.describe(module), "int");
        assert_eq!(h.env.calls.borrow().len(), 1);
        assert_eq!(h.env.calls.borrow()[0].1.block, BlockId(2));

        let builtin = h.eval(&HirExpr::call("strlen", vec![HirExpr::string("x")]), &state);
        assert_eq!(h.describe(builtin), "int");
        assert!(h.eval(&HirExpr::call("opaque", vec![]), &state).is_any());
        assert!(h.eval(&HirExpr::call("who_knows", vec![]), &state).is_any());
        // neither external nor unresolved calls are recorded
        assert_eq!(h.env.calls.borrow().len(), 1);
    }

    #[test]
    fn test_unanalysed_callee_is_bottom() {
        let mut h = Harness::with_callee(None);
        let state = FlowState::new(&h.ctx);
        let result = h.eval(
            &HirExpr::binary(BinOp::Add, HirExpr::call("callee", vec![]), HirExpr::int(1)),
            &state,
        );
        assert_eq!(h.describe(result), "int");
    }

    #[test]
    fn test_closure_values_and_dynamic_calls() {
        let mut h = Harness::new();
        let mut state = FlowState::new(&h.ctx);
        let closure = h.eval(&HirExpr::lambda("closure"), &state);
        assert!(h.ctx.is_object(closure).unwrap());
        state.set("f", closure);
        let result = h.eval(&HirExpr::dynamic_call(HirExpr::var("f"), vec![]), &state);
        assert_eq!(h.describe(result), "string");

        state.set("g", h.ctx.string_mask());
        assert!(h.eval(&HirExpr::dynamic_call(HirExpr::var("g"), vec![]), &state).is_any());
    }

    #[test]
    fn test_array_shape_widening() {
        let mut h = Harness::new();
        let state = h.run(vec![
            assign("a", HirExpr::array(vec![])),
            store("a", Some(HirExpr::string("x")), HirExpr::int(1)),
            store("a", Some(HirExpr::string("y")), HirExpr::string("s")),
        ]);
        let shaped = state.get("a").unwrap();
        assert_eq!(h.describe(shaped), "array{x: int, y: string}");

        let mut block = BasicBlock::new(BlockId(2));
        block.stmts = vec![
            CfgStmt::BindParam {
                name: "k".to_string(),
                declared: None,
                default: None,
            },
            store("a", Some(HirExpr::var("k")), HirExpr::bool(true)),
        ];
        let revalidated = state.revalidate(&h.ctx).unwrap();
        let widened = TypePropagation::new(&mut h.ctx, &h.env, BlockId(2), &mut h.masks)
            .transfer(&block, revalidated)
            .unwrap();
        assert_eq!(h.describe(widened.get("a").unwrap()), "array<string|int|bool>");
    }

    #[test]
    fn test_index_reads() {
        let mut h = Harness::new();
        let state = h.run(vec![
            assign(
                "a",
                HirExpr::array(vec![
                    (Some(HirExpr::string("x")), HirExpr::int(1)),
                    (None, HirExpr::string("zero")),
                ]),
            ),
            assign("s", HirExpr::string("text")),
        ]);
        let known = h.eval(&HirExpr::index(HirExpr::var("a"), HirExpr::string("x")), &state);
        assert_eq!(h.describe(known), "int");
        let implicit = h.eval(&HirExpr::index(HirExpr::var("a"), HirExpr::int(0)), &state);
        assert_eq!(h.describe(implicit), "string");
        let dynamic = h.eval(&HirExpr::index(HirExpr::var("a"), HirExpr::var("k")), &state);
        assert_eq!(h.describe(dynamic), "string|int|null");
        let char_of = h.eval(&HirExpr::index(HirExpr::var("s"), HirExpr::int(0)), &state);
        assert_eq!(h.describe(char_of), "string");
    }

    #[test]
    fn test_foreach_binds_key_and_value() {
        let mut h = Harness::new();
        let state = h.run(vec![
            assign(
                "list",
                HirExpr::array(vec![(None, HirExpr::int(1)), (None, HirExpr::float(2.0))]),
            ),
            CfgStmt::BindElement {
                source: "list".to_string(),
                key: Some("k".to_string()),
                value: "v".to_string(),
            },
        ]);
        assert_eq!(h.describe(state.get("v").unwrap()), "int|float");
        assert_eq!(h.describe(state.get("k").unwrap()), "int");
    }

    #[test]
    fn test_params_follow_declarations() {
        let mut h = Harness::new();
        let state = h.run(vec![
            CfgStmt::BindParam {
                name: "typed".to_string(),
                declared: Some(DeclaredType::Int),
                default: Some(HirExpr::null()),
            },
            CfgStmt::BindParam {
                name: "untyped".to_string(),
                declared: None,
                default: None,
            },
        ]);
        assert_eq!(h.describe(state.get("typed").unwrap()), "int|null");
        assert!(state.get("untyped").unwrap().is_any());
    }

    #[test]
    fn test_expression_masks_are_cached_by_id() {
        let mut h = Harness::new();
        let routine = crate::hir::HirRoutine::new(
            "f",
            vec![],
            vec![crate::hir::HirStmt::Expr(HirExpr::binary(
                BinOp::Concat,
                HirExpr::int(1),
                HirExpr::bool(false),
            ))],
        );
        let crate::hir::HirStmt::Expr(expr) = &routine.body[0] else {
            unreachable!()
        };
        let state = FlowState::new(&h.ctx);
        h.eval(expr, &state);
        assert_eq!(h.masks.len(), 3);
        assert_eq!(h.describe(h.masks[&ExprId(0)]), "string");
        assert_eq!(h.describe(h.masks[&ExprId(2)]), "bool");
    }
}
