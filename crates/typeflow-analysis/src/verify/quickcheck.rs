//! QuickCheck integration for lattice property tests

use quickcheck::{Arbitrary, Gen};
use typeflow_core::dataflow::{PrimitiveKind, TypeMask, TypeRef, TypeRefContext};

/// Slots handed out by [`ArbitraryMask`]; small enough that unions collide
pub const MASK_SLOTS: u32 = 12;

const PRIMITIVES: [PrimitiveKind; 6] = [
    PrimitiveKind::Null,
    PrimitiveKind::Bool,
    PrimitiveKind::Long,
    PrimitiveKind::Double,
    PrimitiveKind::String,
    PrimitiveKind::WritableString,
];

/// A mask over the first [`MASK_SLOTS`] slots, occasionally AnyType or
/// carrying the subclass and uninitialized flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitraryMask(pub TypeMask);

impl Arbitrary for ArbitraryMask {
    fn arbitrary(g: &mut Gen) -> Self {
        if u8::arbitrary(g) % 16 == 0 {
            return ArbitraryMask(TypeMask::ANY);
        }
        let mut mask = TypeMask::BOTTOM;
        for slot in 0..MASK_SLOTS {
            if bool::arbitrary(g) {
                mask |= TypeMask::from_slot(slot);
            }
        }
        if u8::arbitrary(g) % 4 == 0 {
            mask = mask.with_subclasses();
        }
        if u8::arbitrary(g) % 4 == 0 {
            mask = mask.with_uninitialized();
        }
        ArbitraryMask(mask)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let mask = self.0;
        if mask.is_any() {
            return Box::new(std::iter::once(ArbitraryMask(TypeMask::BOTTOM)));
        }
        let mut smaller = Vec::new();
        if mask.is_uninitialized() {
            smaller.push(ArbitraryMask(mask.without_uninitialized()));
        }
        smaller.extend(
            mask.slots()
                .map(|slot| ArbitraryMask(mask.without_slots(TypeMask::from_slot(slot)))),
        );
        Box::new(smaller.into_iter())
    }
}

/// A non-empty set of primitive kinds, possibly with repeats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSet(pub Vec<PrimitiveKind>);

impl KindSet {
    /// Intern every kind and return their union
    pub fn intern(&self, ctx: &mut TypeRefContext) -> TypeMask {
        self.0
            .iter()
            .fold(TypeMask::BOTTOM, |mask, kind| mask | ctx.add_to_context(TypeRef::Primitive(*kind)))
    }

    /// Distinct kind names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.iter().map(|k| k.name().to_string()).collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Arbitrary for KindSet {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = usize::arbitrary(g) % 5 + 1;
        let kinds = (0..len)
            .filter_map(|_| g.choose(&PRIMITIVES).copied())
            .collect::<Vec<_>>();
        if kinds.is_empty() {
            KindSet(vec![PrimitiveKind::Null])
        } else {
            KindSet(kinds)
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        if self.0.len() <= 1 {
            return Box::new(std::iter::empty());
        }
        let kinds = self.0.clone();
        Box::new((0..kinds.len()).map(move |skip| {
            KindSet(
                kinds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, k)| *k)
                    .collect(),
            )
        }))
    }
}

/// Sorted `|`-separated parts of a rendered mask
pub fn rendered_parts(rendered: &str) -> Vec<String> {
    let mut parts: Vec<String> = rendered.split('|').map(String::from).collect();
    parts.sort();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn union_is_commutative(a: ArbitraryMask, b: ArbitraryMask) -> bool {
        a.0.union(b.0) == b.0.union(a.0)
    }

    #[quickcheck]
    fn union_is_associative(a: ArbitraryMask, b: ArbitraryMask, c: ArbitraryMask) -> bool {
        (a.0 | b.0) | c.0 == a.0 | (b.0 | c.0)
    }

    #[quickcheck]
    fn union_is_idempotent_and_bounded(a: ArbitraryMask, b: ArbitraryMask) -> bool {
        let joined = a.0 | b.0;
        a.0 | a.0 == a.0 && a.0.is_subset_of(joined) && b.0.is_subset_of(joined)
    }

    #[quickcheck]
    fn any_absorbs_every_mask(a: ArbitraryMask) -> bool {
        (a.0 | TypeMask::ANY).is_any() && (a.0 | TypeMask::BOTTOM) == a.0
    }

    #[quickcheck]
    fn removing_slots_keeps_the_rest(a: ArbitraryMask, b: ArbitraryMask) -> bool {
        let rest = a.0.without_slots(b.0);
        rest.is_subset_of(a.0) || a.0.is_any()
    }

    #[quickcheck]
    fn describe_names_every_interned_kind(kinds: KindSet) -> bool {
        let mut ctx = TypeRefContext::new();
        let mask = kinds.intern(&mut ctx);
        rendered_parts(&ctx.describe(mask)) == kinds.names()
    }

    #[quickcheck]
    fn describe_ignores_interning_order(kinds: KindSet) -> bool {
        let mut forward = TypeRefContext::new();
        let mut reversed = TypeRefContext::new();
        let a = kinds.intern(&mut forward);
        let mut backwards = kinds.clone();
        backwards.0.reverse();
        let b = backwards.intern(&mut reversed);
        rendered_parts(&forward.describe(a)) == rendered_parts(&reversed.describe(b))
    }

    #[quickcheck]
    fn transfer_preserves_kinds(left: KindSet, right: KindSet) -> bool {
        let mut from = TypeRefContext::new();
        let mask = left.intern(&mut from);
        // the target already holds other types at low slots
        let mut to = TypeRefContext::new();
        right.intern(&mut to);
        match to.transfer(mask, &from) {
            Ok(moved) => rendered_parts(&to.describe(moved)) == left.names(),
            Err(_) => false,
        }
    }

    #[test]
    fn shrinking_drops_flags_and_slots() {
        let mask = (TypeMask::from_slot(0) | TypeMask::from_slot(3)).with_uninitialized();
        let shrunk: Vec<ArbitraryMask> = ArbitraryMask(mask).shrink().collect();
        assert_eq!(shrunk.len(), 3);
        assert!(shrunk.iter().all(|m| m.0.is_subset_of(mask)));
        assert!(!shrunk[0].0.is_uninitialized());
    }
}
