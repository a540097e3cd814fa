//! Reply task naming scheme
//!
//! A remote step handler answers a task named `T` with a task named
//! `T.response.success` or `T.response.failure`. These derived names are the
//! sole correlation key between a remote outcome and the orchestrator's reply
//! router, so they must be byte-identical on both sides of the broker.

/// Reply task name a remote handler uses to report success for `task_name`
pub fn success_task_name(task_name: &str) -> String {
    format!("{task_name}.response.success")
}

/// Reply task name a remote handler uses to report failure for `task_name`
pub fn failure_task_name(task_name: &str) -> String {
    format!("{task_name}.response.failure")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(
            success_task_name("create_restaurant_ticket"),
            "create_restaurant_ticket.response.success"
        );
        assert_eq!(
            failure_task_name("create_restaurant_ticket"),
            "create_restaurant_ticket.response.failure"
        );
    }

    proptest! {
        #[test]
        fn prop_naming_is_deterministic_suffixing(base in ".*") {
            prop_assert_eq!(success_task_name(&base), format!("{base}.response.success"));
            prop_assert_eq!(failure_task_name(&base), format!("{base}.response.failure"));
        }

        #[test]
        fn prop_success_and_failure_names_never_collide(base in ".*") {
            prop_assert_ne!(success_task_name(&base), failure_task_name(&base));
        }
    }
}
