//! Type mask lattice for dataflow analysis
//!
//! Implements a lattice over sets of interned type references where:
//! - Bottom (⊥) = no type observed yet
//! - Top (⊤) = could be any type
//! - Every other element is a union of slots of the owning [`TypeRefContext`]
//!
//! A mask means nothing on its own. Bit `n` names the `n`-th type
//! reference interned in one particular context, so masks from different
//! contexts must go through [`TypeRefContext::transfer`] before they meet.
//!
//! [`TypeRefContext`]: super::context::TypeRefContext
//! [`TypeRefContext::transfer`]: super::context::TypeRefContext::transfer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

const SLOT_BITS: u128 = (1u128 << TypeMask::SLOT_COUNT) - 1;
const UNINITIALIZED_FLAG: u128 = 1u128 << 126;
const SUBCLASSES_FLAG: u128 = 1u128 << 127;

/// Bit-set of the value kinds an expression may hold at a program point
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMask(u128);

impl TypeMask {
    /// Number of type references a single context can intern
    pub const SLOT_COUNT: u32 = 126;

    /// No type observed yet
    pub const BOTTOM: TypeMask = TypeMask(0);

    /// Any type; absorbs every other mask under union
    pub const ANY: TypeMask = TypeMask(SLOT_BITS | SUBCLASSES_FLAG);

    pub fn from_slot(slot: u32) -> Self {
        debug_assert!(slot < Self::SLOT_COUNT, "slot {slot} out of mask range");
        TypeMask(1u128 << slot)
    }

    pub const fn from_bits(bits: u128) -> Self {
        TypeMask(bits)
    }

    pub const fn bits(self) -> u128 {
        self.0
    }

    /// No type slot is set. The uninitialized marker alone is still bottom.
    pub fn is_bottom(self) -> bool {
        self.0 & SLOT_BITS == 0
    }

    pub fn is_any(self) -> bool {
        self.0 & SLOT_BITS == SLOT_BITS
    }

    /// True when a class slot denotes "this class or any subclass"
    pub fn includes_subclasses(self) -> bool {
        self.0 & SUBCLASSES_FLAG != 0
    }

    pub fn with_subclasses(self) -> Self {
        TypeMask(self.0 | SUBCLASSES_FLAG)
    }

    /// The value may be undefined on some incoming path
    pub fn is_uninitialized(self) -> bool {
        self.0 & UNINITIALIZED_FLAG != 0
    }

    pub fn with_uninitialized(self) -> Self {
        TypeMask(self.0 | UNINITIALIZED_FLAG)
    }

    pub fn without_uninitialized(self) -> Self {
        TypeMask(self.0 & !UNINITIALIZED_FLAG)
    }

    /// Lattice join
    pub fn union(self, other: TypeMask) -> TypeMask {
        TypeMask(self.0 | other.0)
    }

    /// Remove the slots of `other`; AnyType stays AnyType.
    pub fn without_slots(self, other: TypeMask) -> TypeMask {
        if self.is_any() {
            return self;
        }
        TypeMask(self.0 & !(other.0 & SLOT_BITS))
    }

    /// Every bit of `self` (flags included) is also set in `other`
    pub fn is_subset_of(self, other: TypeMask) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn has_slot(self, slot: u32) -> bool {
        slot < Self::SLOT_COUNT && self.0 & (1u128 << slot) != 0
    }

    /// Number of type slots set
    pub fn slot_count(self) -> u32 {
        (self.0 & SLOT_BITS).count_ones()
    }

    /// Set slot positions in ascending order
    pub fn slots(self) -> impl Iterator<Item = u32> {
        let mut remaining = self.0 & SLOT_BITS;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let slot = remaining.trailing_zeros();
            remaining &= remaining - 1;
            Some(slot)
        })
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;

    fn bitor(self, rhs: TypeMask) -> TypeMask {
        self.union(rhs)
    }
}

impl BitOrAssign for TypeMask {
    fn bitor_assign(&mut self, rhs: TypeMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "TypeMask(any")?;
        } else if self.is_bottom() {
            write!(f, "TypeMask(⊥")?;
        } else {
            let slots: Vec<String> = self.slots().map(|s| s.to_string()).collect();
            write!(f, "TypeMask({{{}}}", slots.join(","))?;
        }
        if self.is_uninitialized() {
            write!(f, "+uninit")?;
        }
        if self.includes_subclasses() && !self.is_any() {
            write!(f, "+subclasses")?;
        }
        write!(f, ")")
    }
}
