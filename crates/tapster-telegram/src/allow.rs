//! Operator check for the Telegram adapter.
//!
//! Deny-by-default: with no operator configured nobody may run operator
//! commands.

/// Returns `true` when `user_id` is the configured operator.
pub fn is_operator(operator_id: Option<i64>, user_id: u64) -> bool {
    match operator_id {
        Some(op) => i64::try_from(user_id).map(|id| id == op).unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_operator_denies_all() {
        assert!(!is_operator(None, 111));
    }

    #[test]
    fn matching_id_is_allowed() {
        assert!(is_operator(Some(123_456_789), 123_456_789));
    }

    #[test]
    fn other_users_are_denied() {
        assert!(!is_operator(Some(123_456_789), 987_654_321));
    }

    #[test]
    fn ids_beyond_i64_never_match() {
        assert!(!is_operator(Some(-1), u64::MAX));
    }
}
