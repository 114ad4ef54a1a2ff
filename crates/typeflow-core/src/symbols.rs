//! Name resolution consumed by the analyzer
//!
//! Routine and class names resolve case-insensitively, the way the source
//! language looks them up at runtime.

use crate::hir::{DeclaredType, ExternalRoutine, HirClass, Symbol};
use crate::interprocedural::RoutineId;
use std::collections::HashMap;

/// What a called name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineSymbol {
    /// A routine of the analysed module, with a CFG
    Module(RoutineId),
    /// Library code; only the declared return type is known
    External {
        name: Symbol,
        return_type: Option<DeclaredType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSymbol {
    pub name: Symbol,
    pub parent: Option<Symbol>,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    routines: HashMap<String, RoutineSymbol>,
    classes: HashMap<String, ClassSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with library routines whose result kinds are fixed
    pub fn with_builtins() -> Self {
        let mut table = Self::new();

        let builtins: &[(&str, DeclaredType)] = &[
            ("strlen", DeclaredType::Int),
            ("count", DeclaredType::Int),
            ("intval", DeclaredType::Int),
            ("abs", DeclaredType::Union(vec![DeclaredType::Int, DeclaredType::Float])),
            ("floor", DeclaredType::Float),
            ("ceil", DeclaredType::Float),
            ("floatval", DeclaredType::Float),
            ("strval", DeclaredType::String),
            ("implode", DeclaredType::String),
            ("strtolower", DeclaredType::String),
            ("strtoupper", DeclaredType::String),
            ("trim", DeclaredType::String),
            ("sprintf", DeclaredType::String),
            ("json_encode", DeclaredType::Nullable(Box::new(DeclaredType::String))),
            ("array_keys", DeclaredType::Array),
            ("array_values", DeclaredType::Array),
            ("array_merge", DeclaredType::Array),
            ("explode", DeclaredType::Array),
            ("in_array", DeclaredType::Bool),
            ("array_key_exists", DeclaredType::Bool),
            ("is_int", DeclaredType::Bool),
            ("is_string", DeclaredType::Bool),
            ("is_array", DeclaredType::Bool),
            ("is_bool", DeclaredType::Bool),
            ("is_float", DeclaredType::Bool),
            ("is_null", DeclaredType::Bool),
            ("is_numeric", DeclaredType::Bool),
            ("is_callable", DeclaredType::Bool),
        ];

        for (name, ty) in builtins {
            table.declare_external(&ExternalRoutine {
                name: (*name).to_string(),
                return_type: Some(ty.clone()),
            });
        }
        table
    }

    pub fn declare_routine(&mut self, name: &str, id: RoutineId) {
        self.routines.insert(name.to_lowercase(), RoutineSymbol::Module(id));
    }

    pub fn declare_external(&mut self, routine: &ExternalRoutine) {
        self.routines.insert(
            routine.name.to_lowercase(),
            RoutineSymbol::External {
                name: routine.name.clone(),
                return_type: routine.return_type.clone(),
            },
        );
    }

    pub fn declare_class(&mut self, class: &HirClass) {
        self.classes.insert(
            class.name.to_lowercase(),
            ClassSymbol {
                name: class.name.clone(),
                parent: class.parent.clone(),
            },
        );
    }

    pub fn resolve_routine(&self, name: &str) -> Option<&RoutineSymbol> {
        self.routines.get(&name.to_lowercase())
    }

    pub fn class(&self, name: &str) -> Option<&ClassSymbol> {
        self.classes.get(&name.to_lowercase())
    }

    /// Canonical spelling of a class name; unknown classes keep their spelling
    pub fn resolve_class(&self, name: &str) -> String {
        self.class(name).map_or_else(|| name.to_string(), |c| c.name.clone())
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }
}
