//! Property tests: merging and re-analysis never lose type information

use proptest::prelude::*;
use typeflow_core::dataflow::{FlowState, PrimitiveKind, TypeRef};
use typeflow_core::prelude::*;

const KINDS: [PrimitiveKind; 5] = [
    PrimitiveKind::Null,
    PrimitiveKind::Bool,
    PrimitiveKind::Long,
    PrimitiveKind::Double,
    PrimitiveKind::String,
];

fn literal(kind: usize) -> HirExpr {
    match kind % 4 {
        0 => HirExpr::int(1),
        1 => HirExpr::float(1.0),
        2 => HirExpr::string("s"),
        _ => HirExpr::bool(true),
    }
}

fn kind_name(kind: usize) -> &'static str {
    match kind % 4 {
        0 => "int",
        1 => "float",
        2 => "string",
        _ => "bool",
    }
}

/// `$x = k0; if ($b) { $x = k1; } if ($b) { $x = k2; } ... return $x;`
fn branch_chain(kinds: &[usize]) -> HirRoutine {
    let mut body = vec![HirStmt::assign("x", literal(kinds[0]))];
    for &kind in &kinds[1..] {
        body.push(HirStmt::If {
            condition: HirExpr::var("b"),
            then_body: vec![HirStmt::assign("x", literal(kind))],
            else_body: None,
        });
    }
    body.push(HirStmt::Return(Some(HirExpr::var("x"))));
    HirRoutine::new("chain", vec![HirParam::untyped("b")], body)
}

fn return_kinds(routine: HirRoutine) -> Vec<String> {
    let module = HirModule {
        routines: vec![routine],
        ..Default::default()
    };
    let session = AnalysisSession::new(module, SymbolTable::new(), AnalysisOptions::default());
    session.analyze();
    let id = session.routine_id("chain").unwrap();
    let mut parts: Vec<String> = session
        .describe_return(id)
        .unwrap()
        .split('|')
        .map(String::from)
        .collect();
    parts.sort();
    parts.dedup();
    parts
}

fn state_from(ctx: &mut TypeRefContext, bindings: &[(u8, u8)]) -> FlowState {
    let mut state = FlowState::new(ctx);
    for &(var, kinds) in bindings {
        let mut mask = TypeMask::BOTTOM;
        for (i, kind) in KINDS.iter().enumerate() {
            if kinds & (1 << i) != 0 {
                mask |= ctx.add_to_context(TypeRef::Primitive(*kind));
            }
        }
        state.set(&format!("v{}", var % 6), mask);
    }
    state
}

proptest! {
    #[test]
    fn prop_merge_covers_both_sides(
        left in prop::collection::vec((any::<u8>(), any::<u8>()), 0..8),
        right in prop::collection::vec((any::<u8>(), any::<u8>()), 0..8),
    ) {
        let mut ctx = TypeRefContext::new();
        // intern every kind up front so both states stay fresh
        for kind in KINDS {
            ctx.add_to_context(TypeRef::Primitive(kind));
        }
        let a = state_from(&mut ctx, &left);
        let b = state_from(&mut ctx, &right);

        let merged = a.merge(&b, &ctx).unwrap();
        prop_assert!(a.is_subset_of(&merged));
        prop_assert!(b.is_subset_of(&merged));
        prop_assert_eq!(merged.clone(), b.merge(&a, &ctx).unwrap());
        prop_assert_eq!(merged.merge(&merged, &ctx).unwrap(), merged);
    }

    #[test]
    fn prop_branch_chain_returns_every_assigned_kind(kinds in prop::collection::vec(0usize..4, 1..6)) {
        let mut expected: Vec<String> = kinds.iter().map(|k| kind_name(*k).to_string()).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(return_kinds(branch_chain(&kinds)), expected);
    }

    #[test]
    fn prop_more_branches_never_shrink_the_return(kinds in prop::collection::vec(0usize..4, 2..6)) {
        let shorter = return_kinds(branch_chain(&kinds[..kinds.len() - 1]));
        let longer = return_kinds(branch_chain(&kinds));
        for kind in &shorter {
            prop_assert!(longer.contains(kind), "{} missing from {:?}", kind, longer);
        }
    }
}
