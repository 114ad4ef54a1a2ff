//! Type references: the concrete types a mask slot stands for
//!
//! The variant set is closed, so dispatch is by `match` instead of trait
//! objects. Array and lambda references carry nested masks that are only
//! meaningful in the context that interned them; [`TypeRef::transfer`]
//! rewrites those masks when a reference moves between contexts.

use super::context::TypeRefContext;
use super::lattice::TypeMask;
use crate::error::{AnalysisError, Result};
use crate::hir::{Literal, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Null,
    Bool,
    Long,
    Double,
    String,
    /// Mutable byte string produced by byte-sequence literals
    WritableString,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Null => "null",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Long => "int",
            PrimitiveKind::Double => "float",
            PrimitiveKind::String => "string",
            PrimitiveKind::WritableString => "bytes",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, PrimitiveKind::Long | PrimitiveKind::Double)
    }

    pub fn is_string(self) -> bool {
        matches!(self, PrimitiveKind::String | PrimitiveKind::WritableString)
    }
}

/// Literal array key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

impl ArrayKey {
    /// Key denoted by a literal index expression, if it can be one
    pub fn from_literal(lit: &Literal) -> Option<ArrayKey> {
        match lit {
            Literal::Int(i) => Some(ArrayKey::Int(*i)),
            Literal::String(s) => match s.parse::<i64>() {
                Ok(i) if i.to_string() == *s => Some(ArrayKey::Int(i)),
                _ => Some(ArrayKey::Str(s.clone())),
            },
            Literal::Bool(b) => Some(ArrayKey::Int(i64::from(*b))),
            Literal::Null => Some(ArrayKey::Str(String::new())),
            _ => None,
        }
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(i) => write!(f, "{i}"),
            ArrayKey::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Key set of an array shape. Widening from `Known` to `Dynamic` is one-way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayKeys {
    Known(BTreeMap<ArrayKey, TypeMask>),
    Dynamic,
}

impl ArrayKeys {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, ArrayKeys::Dynamic)
    }

    /// Mask stored under a literal key, if the shape still tracks it
    pub fn get(&self, key: &ArrayKey) -> Option<TypeMask> {
        match self {
            ArrayKeys::Known(map) => map.get(key).copied(),
            ArrayKeys::Dynamic => None,
        }
    }
}

/// Snapshot of a closure's signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LambdaSignature {
    pub routine: Symbol,
    pub params: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    Class {
        name: Symbol,
        includes_subclasses: bool,
    },
    Array {
        keys: ArrayKeys,
        elements: TypeMask,
    },
    Lambda {
        signature: Option<LambdaSignature>,
        return_mask: TypeMask,
    },
}

impl TypeRef {
    pub fn class(name: &str) -> Self {
        TypeRef::Class {
            name: name.to_string(),
            includes_subclasses: false,
        }
    }

    pub fn class_or_subclass(name: &str) -> Self {
        TypeRef::Class {
            name: name.to_string(),
            includes_subclasses: true,
        }
    }

    /// `[]`: known-empty key set, no elements yet
    pub fn empty_array() -> Self {
        TypeRef::Array {
            keys: ArrayKeys::Known(BTreeMap::new()),
            elements: TypeMask::BOTTOM,
        }
    }

    /// An array about which nothing is known
    pub fn generic_array() -> Self {
        TypeRef::Array {
            keys: ArrayKeys::Dynamic,
            elements: TypeMask::ANY,
        }
    }

    /// A callable about which nothing is known
    pub fn generic_callable() -> Self {
        TypeRef::Lambda {
            signature: None,
            return_mask: TypeMask::ANY,
        }
    }

    pub fn is_primitive_type(&self) -> bool {
        matches!(self, TypeRef::Primitive(_))
    }

    /// Classes and closures are both object values at runtime
    pub fn is_object(&self) -> bool {
        matches!(self, TypeRef::Class { .. } | TypeRef::Lambda { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::Array { .. })
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self, TypeRef::Lambda { .. })
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            TypeRef::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn qualified_name(&self) -> Option<&str> {
        match self {
            TypeRef::Class { name, .. } => Some(name),
            TypeRef::Lambda { .. } => Some("Closure"),
            _ => None,
        }
    }

    pub fn keys(&self) -> Result<&ArrayKeys> {
        match self {
            TypeRef::Array { keys, .. } => Ok(keys),
            other => Err(AnalysisError::NotAnArray(other.to_string())),
        }
    }

    pub fn element_mask(&self) -> Result<TypeMask> {
        match self {
            TypeRef::Array { elements, .. } => Ok(*elements),
            other => Err(AnalysisError::NotAnArray(other.to_string())),
        }
    }

    pub fn lambda_signature(&self) -> Result<Option<&LambdaSignature>> {
        match self {
            TypeRef::Lambda { signature, .. } => Ok(signature.as_ref()),
            other => Err(AnalysisError::NotCallable(other.to_string())),
        }
    }

    pub fn lambda_return_mask(&self) -> Result<TypeMask> {
        match self {
            TypeRef::Lambda { return_mask, .. } => Ok(*return_mask),
            other => Err(AnalysisError::NotCallable(other.to_string())),
        }
    }

    /// Shape after storing `value` under `key`; a `None` key widens the
    /// shape to dynamic keys.
    pub fn with_element(&self, key: Option<ArrayKey>, value: TypeMask) -> Result<TypeRef> {
        let (keys, elements) = match self {
            TypeRef::Array { keys, elements } => (keys, *elements),
            other => return Err(AnalysisError::NotAnArray(other.to_string())),
        };
        let value = value.without_uninitialized();
        let keys = match (keys, key) {
            (ArrayKeys::Known(map), Some(key)) => {
                let mut map = map.clone();
                let slot = map.entry(key).or_insert(TypeMask::BOTTOM);
                *slot |= value;
                ArrayKeys::Known(map)
            }
            _ => ArrayKeys::Dynamic,
        };
        Ok(TypeRef::Array {
            keys,
            elements: elements | value,
        })
    }

    /// Equivalent reference whose nested masks are expressed in `to`.
    pub fn transfer(&self, from: &TypeRefContext, to: &mut TypeRefContext) -> Result<TypeRef> {
        match self {
            TypeRef::Primitive(_) | TypeRef::Class { .. } => Ok(self.clone()),
            TypeRef::Array { keys, elements } => {
                let keys = match keys {
                    ArrayKeys::Known(map) => {
                        let mut moved = BTreeMap::new();
                        for (key, mask) in map {
                            moved.insert(key.clone(), to.transfer(*mask, from)?);
                        }
                        ArrayKeys::Known(moved)
                    }
                    ArrayKeys::Dynamic => ArrayKeys::Dynamic,
                };
                Ok(TypeRef::Array {
                    keys,
                    elements: to.transfer(*elements, from)?,
                })
            }
            TypeRef::Lambda {
                signature,
                return_mask,
            } => Ok(TypeRef::Lambda {
                signature: signature.clone(),
                return_mask: to.transfer(*return_mask, from)?,
            }),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(kind) => write!(f, "{}", kind.name()),
            TypeRef::Class { name, .. } => write!(f, "{name}"),
            TypeRef::Array { .. } => write!(f, "array"),
            TypeRef::Lambda { .. } => write!(f, "callable"),
        }
    }
}
