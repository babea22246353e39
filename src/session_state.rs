//! Session state machine transition rules (spec §3).
//!
//! The channel derives its current state from the last sent/received
//! `Session` envelope. This module owns only the legality rules; the
//! [`crate::channel::Channel`] owns the actual state cell.

use crate::envelope::SessionState;

/// Returns `true` if a transition from `from` to `to` is legal.
///
/// Session envelopes may move forward along the happy path, or from any
/// non-terminal state directly to `failed`. `finished` is only reachable
/// from `finishing`. Terminal states accept no further transitions.
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    if from.is_terminal() {
        return false;
    }
    if from == to {
        return true;
    }
    match (from, to) {
        (New, Negotiating) => true,
        (New, Authenticating) => true, // some schemes skip negotiation
        (Negotiating, Authenticating) => true,
        (Authenticating, Established) => true,
        (Established, Finishing) => true,
        (Finishing, Finished) => true,
        (_, Failed) => true,
        _ => false,
    }
}

/// Whether non-session envelopes (messages, notifications, non-session
/// commands) may be sent or received while the channel is in `state`
/// (spec §3 invariant).
pub fn allows_ordinary_envelopes(state: SessionState) -> bool {
    state == SessionState::Established
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_is_valid() {
        assert!(is_valid_transition(New, Negotiating));
        assert!(is_valid_transition(Negotiating, Authenticating));
        assert!(is_valid_transition(Authenticating, Established));
        assert!(is_valid_transition(Established, Finishing));
        assert!(is_valid_transition(Finishing, Finished));
    }

    #[test]
    fn any_nonterminal_state_can_fail() {
        assert!(is_valid_transition(New, Failed));
        assert!(is_valid_transition(Negotiating, Failed));
        assert!(is_valid_transition(Established, Failed));
    }

    #[test]
    fn terminal_states_reject_everything() {
        assert!(!is_valid_transition(Finished, Established));
        assert!(!is_valid_transition(Failed, New));
    }

    #[test]
    fn skipping_forward_is_invalid() {
        assert!(!is_valid_transition(New, Established));
        assert!(!is_valid_transition(Negotiating, Finished));
    }

    #[test]
    fn ordinary_envelopes_only_allowed_established() {
        assert!(allows_ordinary_envelopes(Established));
        assert!(!allows_ordinary_envelopes(New));
        assert!(!allows_ordinary_envelopes(Finishing));
    }
}
