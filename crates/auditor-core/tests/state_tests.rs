use auditor_core::types::percentage;
use auditor_core::{Progress, ScanStatus};
use proptest::prelude::*;

#[test]
fn test_pending_transitions() {
    assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Running));
    assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Failed));

    // Invalid
    assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Completed));
    assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Partial));
}

#[test]
fn test_running_transitions() {
    assert!(ScanStatus::Running.can_transition_to(ScanStatus::Completed));
    assert!(ScanStatus::Running.can_transition_to(ScanStatus::Partial));
    assert!(ScanStatus::Running.can_transition_to(ScanStatus::Failed));

    // A running scan cannot be started again
    assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Running));
    assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Pending));
}

#[test]
fn test_terminal_states_only_reenter_running() {
    for status in [ScanStatus::Completed, ScanStatus::Partial, ScanStatus::Failed] {
        assert!(status.is_terminal());
        assert_eq!(status.valid_transitions(), &[ScanStatus::Running]);
    }
}

#[test]
fn test_aggregation_law() {
    assert_eq!(ScanStatus::derive(2, 1, 3), Some(ScanStatus::Partial));
    assert_eq!(ScanStatus::derive(0, 2, 2), Some(ScanStatus::Failed));
    assert_eq!(ScanStatus::derive(4, 0, 4), Some(ScanStatus::Completed));
    assert_eq!(ScanStatus::derive(1, 0, 3), None);
}

#[test]
fn test_percentage_rounding() {
    assert_eq!(percentage(1, 3), 33);
    assert_eq!(percentage(2, 3), 67);
    assert_eq!(percentage(1, 8), 13); // 12.5 rounds up
    assert_eq!(percentage(0, 0), 0);
    assert_eq!(Progress::new(5, 5).percentage, 100);
}

fn any_status() -> impl Strategy<Value = ScanStatus> {
    prop_oneof![
        Just(ScanStatus::Pending),
        Just(ScanStatus::Running),
        Just(ScanStatus::Completed),
        Just(ScanStatus::Partial),
        Just(ScanStatus::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_transitions_match_table(from in any_status(), to in any_status()) {
        let allowed = from.valid_transitions();
        prop_assert_eq!(from.can_transition_to(to), allowed.contains(&to));
        // Nothing ever transitions back to pending
        prop_assert!(!allowed.contains(&ScanStatus::Pending));
    }

    #[test]
    fn prop_percentage_is_rounded_ratio(total in 1u32..500, completed_frac in 0.0f64..=1.0) {
        let completed = ((f64::from(total) * completed_frac).floor() as u32).min(total);
        let expected = (100.0 * f64::from(completed) / f64::from(total) + 0.5).floor() as u8;
        prop_assert_eq!(percentage(completed, total), expected);
    }

    #[test]
    fn prop_derive_only_when_all_resolved(succeeded in 0usize..10, failed in 0usize..10, pending in 0usize..5) {
        let total = succeeded + failed + pending;
        let derived = ScanStatus::derive(succeeded, failed, total);
        if total == 0 || pending > 0 {
            prop_assert!(derived.is_none());
        } else {
            let status = derived.unwrap();
            prop_assert!(status.is_terminal());
            prop_assert_eq!(status == ScanStatus::Completed, failed == 0);
            prop_assert_eq!(status == ScanStatus::Failed, succeeded == 0);
        }
    }
}
