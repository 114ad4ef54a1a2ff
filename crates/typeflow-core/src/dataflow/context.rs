//! Per-routine interning table for type references
//!
//! Slot `n` of every [`TypeMask`] computed for a routine names the `n`-th
//! entry of that routine's [`TypeRefContext`]. The table is append-only:
//! slots never move, so growth can only make older flow states stale, never
//! wrong.

use super::lattice::TypeMask;
use super::type_ref::{ArrayKeys, PrimitiveKind, TypeRef};
use crate::error::{AnalysisError, Result};
use crate::hir::{DeclaredType, Literal};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

/// Kinds present in a mask, gathered in one pass over its slots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskSummary {
    pub any: bool,
    pub primitives: SmallVec<[PrimitiveKind; 4]>,
    pub arrays: usize,
    pub classes: usize,
    pub lambdas: usize,
}

impl MaskSummary {
    pub fn has(&self, kind: PrimitiveKind) -> bool {
        self.primitives.contains(&kind)
    }

    /// Only primitives drawn from `allowed`. Bottom satisfies this.
    pub fn only(&self, allowed: &[PrimitiveKind]) -> bool {
        !self.any
            && self.arrays == 0
            && self.classes == 0
            && self.lambdas == 0
            && self.primitives.iter().all(|p| allowed.contains(p))
    }

    pub fn is_primitive_type(&self) -> bool {
        !self.any && !self.primitives.is_empty() && self.arrays + self.classes + self.lambdas == 0
    }

    pub fn is_array(&self) -> bool {
        !self.any && self.arrays > 0 && self.primitives.is_empty() && self.classes + self.lambdas == 0
    }

    pub fn is_object(&self) -> bool {
        !self.any && self.classes + self.lambdas > 0 && self.primitives.is_empty() && self.arrays == 0
    }
}

#[derive(Debug, Clone)]
pub struct TypeRefContext {
    id: ContextId,
    types: IndexSet<TypeRef>,
    version: u32,
}

impl TypeRefContext {
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            types: IndexSet::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Bumped each time a new type reference is interned
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeRef> {
        self.types.iter()
    }

    /// Intern `ty` and return its singleton mask.
    ///
    /// Equal references share a slot. A full table yields AnyType.
    pub fn add_to_context(&mut self, ty: TypeRef) -> TypeMask {
        let subclasses = matches!(
            ty,
            TypeRef::Class {
                includes_subclasses: true,
                ..
            }
        );
        let slot = match self.types.get_index_of(&ty) {
            Some(slot) => slot,
            None => {
                if self.types.len() >= TypeMask::SLOT_COUNT as usize {
                    warn!(context = self.id.0, "type context saturated; widening to any");
                    return TypeMask::ANY;
                }
                let (slot, _) = self.types.insert_full(ty);
                self.version += 1;
                slot
            }
        };
        let mask = TypeMask::from_slot(slot as u32);
        if subclasses {
            mask.with_subclasses()
        } else {
            mask
        }
    }

    /// Slot of an already interned reference
    pub fn slot_of(&self, ty: &TypeRef) -> Option<u32> {
        self.types.get_index_of(ty).map(|slot| slot as u32)
    }

    pub fn get_type(&self, slot: u32) -> Result<&TypeRef> {
        self.types
            .get_index(slot as usize)
            .ok_or(AnalysisError::SlotOutOfRange {
                slot,
                len: self.types.len(),
            })
    }

    /// Type references named by `mask`. AnyType has no finite list.
    pub fn get_types(&self, mask: TypeMask) -> Result<SmallVec<[&TypeRef; 4]>> {
        if mask.is_any() {
            return Err(AnalysisError::Representation(
                "type list requested for the any-type mask".to_string(),
            ));
        }
        mask.slots().map(|slot| self.get_type(slot)).collect()
    }

    /// Check that every slot of `mask` exists in this table.
    pub fn validate(&self, mask: TypeMask) -> Result<()> {
        if mask.is_any() {
            return Ok(());
        }
        match mask.slots().find(|&slot| slot as usize >= self.types.len()) {
            Some(slot) => Err(AnalysisError::SlotOutOfRange {
                slot,
                len: self.types.len(),
            }),
            None => Ok(()),
        }
    }

    pub fn summarize(&self, mask: TypeMask) -> Result<MaskSummary> {
        let mut summary = MaskSummary::default();
        if mask.is_any() {
            summary.any = true;
            return Ok(summary);
        }
        for ty in self.get_types(mask)? {
            match ty {
                TypeRef::Primitive(kind) => summary.primitives.push(*kind),
                TypeRef::Class { .. } => summary.classes += 1,
                TypeRef::Array { .. } => summary.arrays += 1,
                TypeRef::Lambda { .. } => summary.lambdas += 1,
            }
        }
        Ok(summary)
    }

    pub fn is_primitive_type(&self, mask: TypeMask) -> Result<bool> {
        Ok(self.summarize(mask)?.is_primitive_type())
    }

    pub fn is_array(&self, mask: TypeMask) -> Result<bool> {
        Ok(self.summarize(mask)?.is_array())
    }

    pub fn is_object(&self, mask: TypeMask) -> Result<bool> {
        Ok(self.summarize(mask)?.is_object())
    }

    pub fn primitive_mask(&mut self, kind: PrimitiveKind) -> TypeMask {
        self.add_to_context(TypeRef::Primitive(kind))
    }

    pub fn null_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::Null)
    }

    pub fn bool_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::Bool)
    }

    pub fn long_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::Long)
    }

    pub fn double_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::Double)
    }

    pub fn number_mask(&mut self) -> TypeMask {
        self.long_mask() | self.double_mask()
    }

    pub fn string_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::String)
    }

    pub fn writable_string_mask(&mut self) -> TypeMask {
        self.primitive_mask(PrimitiveKind::WritableString)
    }

    pub fn array_mask(&mut self) -> TypeMask {
        self.add_to_context(TypeRef::generic_array())
    }

    pub fn callable_mask(&mut self) -> TypeMask {
        self.add_to_context(TypeRef::generic_callable())
    }

    /// Mask for a literal constant
    pub fn literal_mask(&mut self, lit: &Literal) -> Result<TypeMask> {
        let kind = match lit {
            Literal::Int(_) => PrimitiveKind::Long,
            Literal::Float(_) => PrimitiveKind::Double,
            Literal::String(_) => PrimitiveKind::String,
            Literal::Bytes(_) => PrimitiveKind::WritableString,
            Literal::Bool(_) => PrimitiveKind::Bool,
            Literal::Null => PrimitiveKind::Null,
            Literal::Unknown(kind) => return Err(AnalysisError::UnsupportedLiteral(kind.clone())),
        };
        Ok(self.primitive_mask(kind))
    }

    /// Mask for a declared type hint; `resolve_class` canonicalizes class names.
    pub fn declared_mask(&mut self, ty: &DeclaredType, resolve_class: &dyn Fn(&str) -> String) -> TypeMask {
        match ty {
            DeclaredType::Int => self.long_mask(),
            DeclaredType::Float => self.double_mask(),
            DeclaredType::String => self.string_mask(),
            DeclaredType::Bool => self.bool_mask(),
            DeclaredType::Array => self.array_mask(),
            DeclaredType::Callable => self.callable_mask(),
            DeclaredType::Mixed => TypeMask::ANY,
            DeclaredType::Void => self.null_mask(),
            DeclaredType::Class(name) => self.add_to_context(TypeRef::class_or_subclass(&resolve_class(name))),
            DeclaredType::Nullable(inner) => self.declared_mask(inner, resolve_class) | self.null_mask(),
            DeclaredType::Union(types) => types
                .iter()
                .fold(TypeMask::BOTTOM, |acc, t| acc | self.declared_mask(t, resolve_class)),
        }
    }

    /// Re-express a mask computed in `from` in this context.
    pub fn transfer(&mut self, mask: TypeMask, from: &TypeRefContext) -> Result<TypeMask> {
        if from.id == self.id {
            self.validate(mask)?;
            return Ok(mask);
        }
        if mask.is_any() {
            return Ok(TypeMask::ANY);
        }
        let mut result = TypeMask::BOTTOM;
        for slot in mask.slots() {
            let moved = from.get_type(slot)?.transfer(from, self)?;
            result |= self.add_to_context(moved);
        }
        if mask.is_uninitialized() {
            result = result.with_uninitialized();
        }
        Ok(result)
    }

    /// Union of element masks of the arrays in `mask`; AnyType when the mask
    /// may hold something that is not an array.
    pub fn element_type(&self, mask: TypeMask) -> Result<TypeMask> {
        if mask.is_any() {
            return Ok(TypeMask::ANY);
        }
        let mut result = TypeMask::BOTTOM;
        for ty in self.get_types(mask)? {
            match ty {
                TypeRef::Array { elements, .. } => result |= *elements,
                _ => return Ok(TypeMask::ANY),
            }
        }
        Ok(result)
    }

    /// Human-readable rendering such as `int|string` or `array{x: int}`
    pub fn describe(&self, mask: TypeMask) -> String {
        if mask.is_any() {
            return "mixed".to_string();
        }
        let mut parts: Vec<String> = mask
            .slots()
            .map(|slot| match self.get_type(slot) {
                Ok(ty) => self.describe_ref(ty),
                Err(_) => format!("<slot {slot}>"),
            })
            .collect();
        if mask.is_uninitialized() {
            parts.push("undef".to_string());
        }
        if parts.is_empty() {
            return "never".to_string();
        }
        parts.join("|")
    }

    fn describe_ref(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Primitive(kind) => kind.name().to_string(),
            TypeRef::Class { name, .. } => name.clone(),
            TypeRef::Array {
                keys: ArrayKeys::Known(map),
                ..
            } => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(key, mask)| format!("{key}: {}", self.describe(*mask)))
                    .collect();
                format!("array{{{}}}", entries.join(", "))
            }
            TypeRef::Array {
                keys: ArrayKeys::Dynamic,
                elements,
            } => format!("array<{}>", self.describe(*elements)),
            TypeRef::Lambda { return_mask, .. } => format!("callable(): {}", self.describe(*return_mask)),
        }
    }
}

impl Default for TypeRefContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::type_ref::ArrayKey;

    fn no_resolve(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_interning_is_idempotent() {
        let mut ctx = TypeRefContext::new();
        let first = ctx.add_to_context(TypeRef::class("Foo"));
        let version = ctx.version();
        let second = ctx.add_to_context(TypeRef::class("Foo"));
        assert_eq!(first, second);
        assert_eq!(ctx.version(), version);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_primitive_masks_are_stable() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let string = ctx.string_mask();
        assert_ne!(long, string);
        assert_eq!(ctx.long_mask(), long);
        assert_eq!(ctx.string_mask(), string);
        assert_eq!(ctx.version(), 2);
    }

    #[test]
    fn test_subclass_flag() {
        let mut ctx = TypeRefContext::new();
        assert!(ctx.add_to_context(TypeRef::class_or_subclass("Foo")).includes_subclasses());
        assert!(!ctx.add_to_context(TypeRef::class("Foo")).includes_subclasses());
        let declared = ctx.declared_mask(&DeclaredType::Class("Bar".into()), &no_resolve);
        assert!(declared.includes_subclasses());
    }

    #[test]
    fn test_mixed_masks_are_neither_primitive_nor_object() {
        let mut ctx = TypeRefContext::new();
        let string = ctx.string_mask();
        let class = ctx.add_to_context(TypeRef::class("Foo"));
        let mixed = string | class;
        assert!(ctx.is_primitive_type(string).unwrap());
        assert!(ctx.is_object(class).unwrap());
        assert!(!ctx.is_primitive_type(mixed).unwrap());
        assert!(!ctx.is_object(mixed).unwrap());
        assert!(!ctx.is_array(mixed).unwrap());
    }

    #[test]
    fn test_literal_masks() {
        let mut ctx = TypeRefContext::new();
        assert_eq!(ctx.literal_mask(&Literal::Int(1)).unwrap(), ctx.long_mask());
        assert_eq!(ctx.literal_mask(&Literal::Bytes(vec![0])).unwrap(), ctx.writable_string_mask());
        assert_eq!(
            ctx.literal_mask(&Literal::Unknown("decimal".into())),
            Err(AnalysisError::UnsupportedLiteral("decimal".into()))
        );
    }

    #[test]
    fn test_slot_beyond_table_is_an_error() {
        let mut ctx = TypeRefContext::new();
        ctx.long_mask();
        let foreign = TypeMask::from_slot(7);
        assert!(matches!(ctx.get_types(foreign), Err(AnalysisError::SlotOutOfRange { slot: 7, len: 1 })));
        assert!(ctx.validate(foreign).is_err());
        assert!(ctx.get_types(TypeMask::ANY).is_err());
    }

    #[test]
    fn test_transfer_between_contexts() {
        let mut callee = TypeRefContext::new();
        callee.bool_mask();
        let long = callee.long_mask();
        let string = callee.string_mask();
        let arr = TypeRef::empty_array()
            .with_element(Some(ArrayKey::Str("x".into())), long)
            .unwrap();
        let arr = callee.add_to_context(arr);

        let mut caller = TypeRefContext::new();
        caller.add_to_context(TypeRef::class("Unrelated"));
        let moved = caller.transfer(long | string | arr, &callee).unwrap();

        assert_eq!(caller.describe(moved), "int|string|array{x: int}");
        assert!(moved.has_slot(caller.slot_of(&TypeRef::Primitive(PrimitiveKind::Long)).unwrap()));
        assert!(caller.transfer(TypeMask::ANY, &callee).unwrap().is_any());
    }

    #[test]
    fn test_transfer_within_same_context_is_identity() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let snapshot = ctx.clone();
        assert_eq!(ctx.transfer(long, &snapshot).unwrap(), long);
    }

    #[test]
    fn test_saturated_context_widens_to_any() {
        let mut ctx = TypeRefContext::new();
        for i in 0..TypeMask::SLOT_COUNT {
            ctx.add_to_context(TypeRef::class(&format!("C{i}")));
        }
        assert!(ctx.add_to_context(TypeRef::class("Overflow")).is_any());
        assert_eq!(ctx.len(), TypeMask::SLOT_COUNT as usize);
    }

    #[test]
    fn test_element_type() {
        let mut ctx = TypeRefContext::new();
        let long = ctx.long_mask();
        let arr = ctx.add_to_context(TypeRef::empty_array().with_element(None, long).unwrap());
        assert_eq!(ctx.element_type(arr).unwrap(), long);
        assert!(ctx.element_type(long).unwrap().is_any());
    }
}
