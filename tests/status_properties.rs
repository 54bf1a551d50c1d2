//! Exhaustive checks over the status vocabularies, flow tables and mapping.

use unified_tx::status::{
    LegacyStatusMapper, LegacySystemType, StatusContext, StatusFlows, StatusPhase,
    UnifiedTransactionStatus, UnifiedTransactionType, UnifiedTransitionValidator,
    ValidationFailure,
};

type S = UnifiedTransactionStatus;
type T = UnifiedTransactionType;

#[test]
fn terminal_statuses_are_final_except_admin_resolution() {
    let v = UnifiedTransitionValidator::default();
    for t in T::ALL {
        for from in S::ALL.into_iter().filter(S::is_terminal) {
            for to in S::ALL {
                let r = v.validate(from, to, t);
                assert_eq!(
                    r.is_valid,
                    StatusFlows::is_admin_resolution_edge(t, from, to),
                    "{}: {} -> {}",
                    t,
                    from,
                    to
                );
            }
        }
    }
}

#[test]
fn flow_edges_never_move_back_a_phase() {
    let flows = StatusFlows::canonical();
    for t in T::ALL {
        for (from, to) in flows.edges(t) {
            assert!(
                to.phase() >= from.phase() || to.phase() == StatusPhase::Terminal,
                "{}: {} -> {} goes from {} to {}",
                t,
                from,
                to,
                from.phase(),
                to.phase()
            );
        }
    }
}

#[test]
fn every_declared_edge_validates_and_nothing_else_does() {
    let v = UnifiedTransitionValidator::default();
    for t in T::ALL {
        for from in S::ALL {
            let allowed = v.allowed_next_statuses(from, t);
            for to in S::ALL {
                let r = v.validate(from, to, t);
                assert_eq!(r.is_valid, allowed.contains(&to), "{}: {} -> {}", t, from, to);
                assert_eq!(r.allowed_transitions, allowed);
            }
        }
    }
}

#[test]
fn no_self_transitions() {
    let v = UnifiedTransitionValidator::default();
    for t in T::ALL {
        for s in S::ALL {
            let r = v.validate(s, s, t);
            assert!(!r.is_valid);
            assert_eq!(r.failure, Some(ValidationFailure::SameStatus));
        }
    }
}

#[test]
fn admin_edges_need_admin_context() {
    let v = UnifiedTransitionValidator::default();
    for (t, from, to) in StatusFlows::ADMIN_RESOLUTION_EDGES {
        for ctx in StatusContext::ALL {
            let r = v.validate_in_context(*from, *to, *t, Some(ctx));
            assert_eq!(r.is_valid, ctx == StatusContext::ManualAdmin);
            if !r.is_valid {
                assert_eq!(r.failure, Some(ValidationFailure::RequiresAdmin));
            }
        }
        assert!(v.validate(*from, *to, *t).is_valid);
    }
}

#[test]
fn every_legacy_value_maps_and_agrees_with_its_image() {
    let mapper = LegacyStatusMapper::new();
    let mut total = 0;
    for system in LegacySystemType::ALL {
        for legacy in system.statuses() {
            total += 1;
            let unified = mapper.map_to_unified(legacy).unwrap();
            assert!(mapper.is_consistent(legacy, unified));

            // Reverse of the image lands on a value with the same image
            let back = mapper.map_from_unified(unified, system).unwrap();
            assert_eq!(mapper.map_to_unified(back).unwrap(), unified);
        }
    }
    assert_eq!(total, 39);
    assert!(mapper.validate_mapping_completeness().is_complete());
}

#[test]
fn reverse_mapping_is_deterministic_and_unambiguous_values_round_trip() {
    let mapper = LegacyStatusMapper::new();
    for system in LegacySystemType::ALL {
        let statuses = system.statuses();
        for legacy in &statuses {
            let unified = mapper.map_to_unified(*legacy).unwrap();
            let first = mapper.map_from_unified(unified, system).unwrap();
            assert_eq!(first, mapper.map_from_unified(unified, system).unwrap());

            let siblings = statuses
                .iter()
                .filter(|other| mapper.map_to_unified(**other).unwrap() == unified)
                .count();
            if siblings == 1 {
                assert_eq!(first, *legacy, "{} does not round-trip", legacy);
            }
        }
    }
}

#[test]
fn every_reachable_status_has_a_legacy_representation() {
    let mapper = LegacyStatusMapper::new();
    let flows = StatusFlows::canonical();
    for t in T::ALL {
        let system = LegacySystemType::for_transaction_type(t);
        for from in S::ALL {
            for to in flows.next_statuses(t, from).unwrap_or_default() {
                assert!(
                    mapper.map_from_unified(*to, system).is_ok(),
                    "{} reaches {} with no {} equivalent",
                    t,
                    to,
                    system
                );
            }
        }
    }
}

#[test]
fn raw_strings_behave_like_typed_values() {
    let v = UnifiedTransitionValidator::default();
    for t in T::ALL {
        for from in S::ALL {
            for to in S::ALL {
                let typed = v.validate(from, to, t);
                let raw = v.validate(from.as_str(), to.as_str(), t.as_str());
                assert_eq!(typed.is_valid, raw.is_valid);
            }
            assert_eq!(
                v.allowed_next_statuses(from.as_str(), t.as_str()),
                v.allowed_next_statuses(from, t)
            );
        }
    }

    let r = v.validate(" Pending ", "PROCESSING", "wallet_cashout");
    assert!(r.is_valid);
    let r = v.validate("teleported", "success", "wallet_cashout");
    assert_eq!(r.failure, Some(ValidationFailure::UnknownStatus));
    let r = v.validate("pending", "processing", "barter");
    assert_eq!(r.failure, Some(ValidationFailure::UnknownTransactionType));
}
