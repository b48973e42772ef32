//! Property tests for unification and generalization.
//!
//! Properties checked for arbitrary types:
//!
//! 1. Substitution idempotence: apply(apply(t)) == apply(t)
//! 2. Reflexivity: unify(t, t) succeeds with no bindings
//! 3. Soundness: after unify(a, b), apply(a) == apply(b)
//! 4. Symmetry: unify(a, b) succeeds iff unify(b, a) does
//! 5. Occurs check: a variable never unifies with a function that mentions it
//! 6. Instantiation renames exactly the quantified variables

use std::collections::BTreeSet;

use proptest::prelude::*;
use osprey_types::*;

use crate::typeck::{TypeEnv, generalize, instantiate};
use crate::{TypeError, VarSupply, unify};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_type_var_id() -> impl Strategy<Value = TypeVarId> {
    (0u32..6).prop_map(TypeVarId)
}

fn arb_ground_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::int()),
        Just(Type::float()),
        Just(Type::bool()),
        Just(Type::string()),
        Just(Type::unit()),
        Just(Type::concrete(MATH_ERROR)),
        Just(Type::process_handle()),
    ]
}

/// Types of bounded depth. Depth 0 is leaves only.
fn arb_type(depth: u32) -> BoxedStrategy<Type> {
    let leaf = prop_oneof![
        3 => arb_ground_type(),
        1 => arb_type_var_id().prop_map(Type::Variable),
    ];
    if depth == 0 {
        return leaf.boxed();
    }
    let inner = arb_type(depth - 1);
    prop_oneof![
        4 => leaf,
        1 => inner.clone().prop_map(Type::list),
        1 => inner.clone().prop_map(Type::fiber),
        1 => inner.clone().prop_map(Type::channel),
        1 => (inner.clone(), inner.clone()).prop_map(|(ok, err)| Type::result(ok, err)),
        1 => (prop::collection::vec(inner.clone(), 0..=3), inner)
            .prop_map(|(params, ret)| Type::function(params, ret)),
    ]
    .boxed()
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn substitution_idempotent(ty in arb_type(3)) {
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(0), Type::int());
        subst.bind_type(TypeVarId(1), Type::list(Type::Variable(TypeVarId(2))));
        subst.bind_type(TypeVarId(2), Type::string());

        let once = subst.apply(&ty);
        let twice = subst.apply(&once);
        prop_assert_eq!(once, twice);
    }
}

// ---------------------------------------------------------------------------
// Unification
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn unify_is_reflexive(ty in arb_type(3)) {
        let subst = unify(&ty, &ty).expect("a type unifies with itself");
        prop_assert!(subst.is_empty());
    }

    #[test]
    fn unifier_equates_both_sides(a in arb_type(2), b in arb_type(2)) {
        if let Ok(subst) = unify(&a, &b) {
            prop_assert_eq!(subst.apply(&a), subst.apply(&b));
        }
    }

    #[test]
    fn unify_success_is_symmetric(a in arb_type(2), b in arb_type(2)) {
        prop_assert_eq!(unify(&a, &b).is_ok(), unify(&b, &a).is_ok());
    }

    #[test]
    fn ground_types_unify_only_when_equal(a in arb_ground_type(), b in arb_ground_type()) {
        prop_assert_eq!(unify(&a, &b).is_ok(), a == b);
    }

    #[test]
    fn occurs_check_rejects_self_reference(id in arb_type_var_id(), other in arb_type(1)) {
        let var = Type::Variable(id);
        let cyclic = Type::function(vec![var.clone(), other], Type::int());
        let err = unify(&var, &cyclic).expect_err("variable occurs in function");
        prop_assert!(matches!(err, TypeError::InfiniteType { .. }), "{:?}", err);
    }
}

// ---------------------------------------------------------------------------
// Schemes
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn instantiate_renames_every_quantified_var(ty in arb_type(3)) {
        let scheme = generalize(&ty, &TypeEnv::new(), &Substitution::new(), &BTreeSet::new());
        prop_assert_eq!(scheme.free_type_vars(), BTreeSet::new());

        let mut supply = VarSupply::starting_at(100);
        let fresh = instantiate(&scheme, &mut supply);
        let vars = free_type_vars(&fresh);
        prop_assert_eq!(vars.len(), scheme.type_vars.len());
        prop_assert!(vars.iter().all(|v| v.0 >= 100));
        prop_assert!(unify(&ty, &fresh).is_ok());
    }
}
