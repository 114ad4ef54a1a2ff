//! Per-block variable bindings
//!
//! A [`FlowState`] maps variable names to masks of one [`TypeRefContext`]
//! and accumulates the routine's return mask along the paths reaching the
//! block. States are copy-on-write snapshots stamped with the context
//! version they were validated against.

use super::context::{ContextId, TypeRefContext};
use super::lattice::TypeMask;
use crate::error::{AnalysisError, Result};
use crate::hir::Symbol;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FlowState {
    context: ContextId,
    version: u32,
    vars: Arc<BTreeMap<Symbol, TypeMask>>,
    return_mask: TypeMask,
}

impl PartialEq for FlowState {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context
            && self.version == other.version
            && self.return_mask == other.return_mask
            && (Arc::ptr_eq(&self.vars, &other.vars) || self.vars == other.vars)
    }
}

impl Eq for FlowState {}

impl FlowState {
    pub fn new(ctx: &TypeRefContext) -> Self {
        Self {
            context: ctx.id(),
            version: ctx.version(),
            vars: Arc::new(BTreeMap::new()),
            return_mask: TypeMask::BOTTOM,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The context interned new types since this state was stamped.
    pub fn is_stale(&self, ctx: &TypeRefContext) -> bool {
        self.context != ctx.id() || self.version != ctx.version()
    }

    fn check_fresh(&self, ctx: &TypeRefContext) -> Result<()> {
        if self.context != ctx.id() {
            return Err(AnalysisError::ForeignContext {
                expected: ctx.id().0,
                found: self.context.0,
            });
        }
        if self.version != ctx.version() {
            return Err(AnalysisError::StaleFlowState {
                stamped: self.version,
                current: ctx.version(),
            });
        }
        Ok(())
    }

    /// Check every mask against `ctx` and restamp at its current version.
    pub fn revalidate(&self, ctx: &TypeRefContext) -> Result<FlowState> {
        if self.context != ctx.id() {
            return Err(AnalysisError::ForeignContext {
                expected: ctx.id().0,
                found: self.context.0,
            });
        }
        for mask in self.vars.values() {
            ctx.validate(*mask)?;
        }
        ctx.validate(self.return_mask)?;
        Ok(FlowState {
            version: ctx.version(),
            ..self.clone()
        })
    }

    pub fn get(&self, var: &str) -> Option<TypeMask> {
        self.vars.get(var).copied()
    }

    pub fn set(&mut self, var: &str, mask: TypeMask) {
        Arc::make_mut(&mut self.vars).insert(var.to_string(), mask);
    }

    pub fn remove(&mut self, var: &str) {
        if self.vars.contains_key(var) {
            Arc::make_mut(&mut self.vars).remove(var);
        }
    }

    pub fn vars(&self) -> impl Iterator<Item = (&Symbol, &TypeMask)> {
        self.vars.iter()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn return_mask(&self) -> TypeMask {
        self.return_mask
    }

    pub fn add_return(&mut self, mask: TypeMask) {
        self.return_mask |= mask.without_uninitialized();
    }

    /// Join two states at a merge point.
    ///
    /// A variable bound on one side only is possibly undefined after the
    /// join and carries the uninitialized marker.
    pub fn merge(&self, other: &FlowState, ctx: &TypeRefContext) -> Result<FlowState> {
        self.check_fresh(ctx)?;
        other.check_fresh(ctx)?;

        if self == other {
            return Ok(self.clone());
        }

        let mut vars = BTreeMap::new();
        for (var, mask) in self.vars.iter() {
            let joined = match other.vars.get(var) {
                Some(theirs) => *mask | *theirs,
                None => mask.with_uninitialized(),
            };
            vars.insert(var.clone(), joined);
        }
        for (var, mask) in other.vars.iter() {
            if !self.vars.contains_key(var) {
                vars.insert(var.clone(), mask.with_uninitialized());
            }
        }

        Ok(FlowState {
            context: self.context,
            version: self.version,
            vars: Arc::new(vars),
            return_mask: self.return_mask | other.return_mask,
        })
    }

    /// Every binding of `self` is covered by `other`
    pub fn is_subset_of(&self, other: &FlowState) -> bool {
        self.return_mask.is_subset_of(other.return_mask)
            && self.vars.iter().all(|(var, mask)| {
                other
                    .vars
                    .get(var)
                    .is_some_and(|theirs| mask.without_uninitialized().is_subset_of(*theirs))
            })
    }

    /// Force every binding to AnyType, keeping the uninitialized markers.
    /// The return accumulator is left alone.
    pub fn widen_to_any(&mut self) {
        let vars = Arc::make_mut(&mut self.vars);
        for mask in vars.values_mut() {
            *mask = if mask.is_uninitialized() {
                TypeMask::ANY.with_uninitialized()
            } else {
                TypeMask::ANY
            };
        }
    }

    /// The same bindings expressed in another context
    pub fn transfer_to(&self, from: &TypeRefContext, to: &mut TypeRefContext) -> Result<FlowState> {
        self.check_fresh(from)?;
        let mut vars = BTreeMap::new();
        for (var, mask) in self.vars.iter() {
            vars.insert(var.clone(), to.transfer(*mask, from)?);
        }
        let return_mask = to.transfer(self.return_mask, from)?;
        Ok(FlowState {
            context: to.id(),
            version: to.version(),
            vars: Arc::new(vars),
            return_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::type_ref::TypeRef;

    #[test]
    fn test_merge_unions_shared_variables() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let string = ctx.string_mask();

        let mut a = FlowState::new(&ctx);
        a.set("x", long);
        let mut b = FlowState::new(&ctx);
        b.set("x", string);

        let merged = a.merge(&b, &ctx).unwrap();
        assert_eq!(merged.get("x"), Some(long | string));
        assert!(a.is_subset_of(&merged));
        assert!(b.is_subset_of(&merged));
    }

    #[test]
    fn test_one_sided_variable_is_possibly_undefined() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let bool_ = ctx.bool_mask();

        let mut a = FlowState::new(&ctx);
        a.set("y", long);
        let mut b = FlowState::new(&ctx);
        b.set("z", bool_);

        let merged = a.merge(&b, &ctx).unwrap();
        let y = merged.get("y").unwrap();
        assert!(y.is_uninitialized());
        assert_eq!(y.without_uninitialized(), long);
        assert_ne!(y, TypeMask::BOTTOM);
        assert!(merged.get("z").unwrap().is_uninitialized());
    }

    #[test]
    fn test_return_masks_accumulate() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let null = ctx.null_mask();
        let mut a = FlowState::new(&ctx);
        a.add_return(long);
        let mut b = FlowState::new(&ctx);
        b.add_return(null);
        assert_eq!(a.merge(&b, &ctx).unwrap().return_mask(), long | null);
    }

    #[test]
    fn test_state_goes_stale_when_context_grows() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let mut before = FlowState::new(&ctx);
        before.set("x", long);
        assert!(!before.is_stale(&ctx));

        ctx.add_to_context(TypeRef::class("Fresh"));
        assert!(before.is_stale(&ctx));

        let other = FlowState::new(&ctx);
        assert!(matches!(
            before.merge(&other, &ctx),
            Err(AnalysisError::StaleFlowState { .. })
        ));

        let revalidated = before.revalidate(&ctx).unwrap();
        assert!(!revalidated.is_stale(&ctx));
        assert_ne!(revalidated, before);
        assert_eq!(revalidated.get("x"), Some(long));
    }

    #[test]
    fn test_foreign_context_is_rejected() {
        let ctx_a = TypeRefContext::new();
        let ctx_b = TypeRefContext::new();
        let a = FlowState::new(&ctx_a);
        let b = FlowState::new(&ctx_b);
        assert!(matches!(a.merge(&b, &ctx_a), Err(AnalysisError::ForeignContext { .. })));
        assert!(a.revalidate(&ctx_b).is_err());
    }

    #[test]
    fn test_transfer_to_another_context() {
        let mut from = TypeRefContext::new();
        from.bool_mask();
        let string = from.string_mask();
        let mut state = FlowState::new(&from);
        state.set("s", string);

        let mut to = TypeRefContext::new();
        let moved = state.transfer_to(&from, &mut to).unwrap();
        assert_eq!(moved.context_id(), to.id());
        assert_eq!(moved.get("s"), Some(to.string_mask()));
    }

    #[test]
    fn test_copy_on_write_keeps_snapshots_independent() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let string = ctx.string_mask();
        let mut a = FlowState::new(&ctx);
        a.set("x", long);
        let snapshot = a.clone();
        a.set("x", string);
        assert_eq!(snapshot.get("x"), Some(long));
        assert_eq!(a.get("x"), Some(string));
    }

    #[test]
    fn test_widen_to_any() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let mut state = FlowState::new(&ctx);
        state.set("x", long);
        state.set("y", long.with_uninitialized());
        state.add_return(long);
        state.widen_to_any();
        assert!(state.get("x").unwrap().is_any());
        assert!(state.get("y").unwrap().is_uninitialized());
        assert_eq!(state.return_mask(), long);
    }
}
