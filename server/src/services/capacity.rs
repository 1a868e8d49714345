/// Whether one more attendee fits. `None` capacity means unlimited.
///
/// This is the advisory check run before a registration is created. The
/// binding check is the conditional increment inside
/// `Store::finalize_registration`, which re-evaluates the same rule.
pub fn can_register(current_attendees: i32, max_attendees: Option<i32>) -> bool {
    match max_attendees {
        None => true,
        Some(max) => current_attendees < max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_capacity_always_admits() {
        assert!(can_register(0, None));
        assert!(can_register(i32::MAX, None));
    }

    #[test]
    fn test_last_slot_and_full_event() {
        assert!(can_register(0, Some(1)));
        assert!(can_register(9, Some(10)));
        assert!(!can_register(10, Some(10)));
    }

    #[test]
    fn test_over_capacity_counter_is_rejected() {
        // Counters should never exceed capacity, but the guard must not admit if they do.
        assert!(!can_register(11, Some(10)));
    }
}
