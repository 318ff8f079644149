//! # Reconciliation Decision
//!
//! What one poll of the authoritative payment list means for the active
//! gateway flow. The poller in `vitrina-checkout` owns the timer and the
//! fetch; this module only decides.
//!
//! ## Decision Order
//! ```text
//!  snapshot ──► 1. MP entry, amount == flow.amount, RECHAZADO,
//!                  and no approved gateway entry of that amount locally
//!                    └─► Rejected
//!               2. MP entry APROBADO not matched by a local approved
//!                  gateway entry of the same amount
//!                    └─► Approved
//!               3. approved total differs from the ledger's remote total
//!                    └─► Refresh (merge, keep polling)
//!               4. otherwise
//!                    └─► Unchanged
//! ```
//!
//! Rejection is matched by amount because the gateway does not return an
//! attempt id until the flow resolves. Two rejected attempts of the same
//! amount on one sale are indistinguishable, so a retry at the amount of an
//! earlier rejected attempt is reported as rejected on its first tick.

use crate::ledger::PaymentLedger;
use crate::money::Money;
use crate::types::{ConfirmationState, GatewayFlow, PaymentSnapshot};
use crate::AMOUNT_TOLERANCE;

/// Outcome of evaluating one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Gateway rejected the attempt; end the flow.
    Rejected { amount: Money },
    /// A new approved gateway payment appeared; merge and end the flow.
    Approved { amount: Money },
    /// Something else changed on the server; merge and keep polling.
    Refresh,
    /// Nothing new.
    Unchanged,
}

impl PollDecision {
    /// True when the flow ends with this decision.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollDecision::Rejected { .. } | PollDecision::Approved { .. })
    }
}

/// Evaluates a snapshot against the active flow and the current ledger.
///
/// ## Example
/// ```rust
/// use vitrina_core::reconcile::{evaluate, PollDecision};
/// use vitrina_core::*;
///
/// let ledger = PaymentLedger::new(Money::from_cents(50_000));
/// let flow = GatewayFlow::qr(Money::from_cents(50_000), "000201...".into());
/// let snapshot = PaymentSnapshot {
///     entries: vec![RemoteContribution {
///         id: None,
///         method: PaymentMethod::Gateway,
///         amount: Money::from_cents(50_000),
///         state: ConfirmationState::Approved,
///     }],
///     total: None,
/// };
///
/// assert_eq!(
///     evaluate(&flow, &ledger, &snapshot),
///     PollDecision::Approved { amount: Money::from_cents(50_000) }
/// );
/// ```
pub fn evaluate(flow: &GatewayFlow, ledger: &PaymentLedger, snapshot: &PaymentSnapshot) -> PollDecision {
    let local_approved = ledger.approved_gateway_amounts();

    let rejected = snapshot.entries.iter().any(|e| {
        e.method.is_gateway()
            && e.state == ConfirmationState::Rejected
            && e.amount.approx_eq(flow.amount, AMOUNT_TOLERANCE)
    });
    let accounted = local_approved
        .iter()
        .any(|a| a.approx_eq(flow.amount, AMOUNT_TOLERANCE));
    if rejected && !accounted {
        return PollDecision::Rejected {
            amount: flow.amount,
        };
    }

    if let Some(amount) = first_unmatched_approval(snapshot, local_approved) {
        return PollDecision::Approved { amount };
    }

    if snapshot.approved_total() != ledger.remote_paid() {
        return PollDecision::Refresh;
    }

    PollDecision::Unchanged
}

/// Multiset difference: each approved gateway entry in the snapshot consumes
/// one local approved gateway amount; the first one left over is new.
fn first_unmatched_approval(snapshot: &PaymentSnapshot, mut local: Vec<Money>) -> Option<Money> {
    for entry in snapshot
        .entries
        .iter()
        .filter(|e| e.method.is_gateway() && e.state == ConfirmationState::Approved)
    {
        match local.iter().position(|a| *a == entry.amount) {
            Some(pos) => {
                local.swap_remove(pos);
            }
            None => return Some(entry.amount),
        }
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentMethod, RemoteContribution};

    fn money(units: i64) -> Money {
        Money::from_cents(units * 100)
    }

    fn entry(method: PaymentMethod, units: i64, state: ConfirmationState) -> RemoteContribution {
        RemoteContribution {
            id: None,
            method,
            amount: money(units),
            state,
        }
    }

    fn snapshot(entries: Vec<RemoteContribution>) -> PaymentSnapshot {
        PaymentSnapshot {
            entries,
            total: None,
        }
    }

    #[test]
    fn test_empty_snapshot_is_unchanged() {
        let ledger = PaymentLedger::new(money(500));
        let flow = GatewayFlow::qr(money(500), "qr".to_string());
        assert_eq!(evaluate(&flow, &ledger, &snapshot(vec![])), PollDecision::Unchanged);
    }

    #[test]
    fn test_pending_entry_is_unchanged() {
        let ledger = PaymentLedger::new(money(500));
        let flow = GatewayFlow::terminal(money(500), "dev".to_string());
        let snap = snapshot(vec![entry(PaymentMethod::Gateway, 500, ConfirmationState::Pending)]);
        assert_eq!(evaluate(&flow, &ledger, &snap), PollDecision::Unchanged);
    }

    #[test]
    fn test_rejection_matches_amount() {
        let ledger = PaymentLedger::new(money(500));
        let flow = GatewayFlow::qr(money(500), "qr".to_string());

        let snap = snapshot(vec![entry(PaymentMethod::Gateway, 500, ConfirmationState::Rejected)]);
        assert_eq!(
            evaluate(&flow, &ledger, &snap),
            PollDecision::Rejected { amount: money(500) }
        );

        let other_amount =
            snapshot(vec![entry(PaymentMethod::Gateway, 300, ConfirmationState::Rejected)]);
        assert_eq!(evaluate(&flow, &ledger, &other_amount), PollDecision::Unchanged);
    }

    #[test]
    fn test_rejection_ignored_when_amount_already_approved_locally() {
        let mut ledger = PaymentLedger::new(money(1000));
        ledger.merge_remote(&[entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved)]);
        let flow = GatewayFlow::qr(money(500), "qr".to_string());

        let snap = snapshot(vec![
            entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved),
            entry(PaymentMethod::Gateway, 500, ConfirmationState::Rejected),
        ]);
        assert_eq!(evaluate(&flow, &ledger, &snap), PollDecision::Unchanged);
    }

    #[test]
    fn test_approval_of_new_gateway_entry() {
        let ledger = PaymentLedger::new(money(500));
        let flow = GatewayFlow::qr(money(500), "qr".to_string());
        let snap = snapshot(vec![entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved)]);
        assert_eq!(
            evaluate(&flow, &ledger, &snap),
            PollDecision::Approved { amount: money(500) }
        );
    }

    #[test]
    fn test_second_approval_of_same_amount_is_new() {
        let mut ledger = PaymentLedger::new(money(1000));
        ledger.merge_remote(&[entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved)]);
        let flow = GatewayFlow::terminal(money(500), "dev".to_string());

        let snap = snapshot(vec![
            entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved),
            entry(PaymentMethod::Gateway, 500, ConfirmationState::Approved),
        ]);
        assert_eq!(
            evaluate(&flow, &ledger, &snap),
            PollDecision::Approved { amount: money(500) }
        );
    }

    #[test]
    fn test_other_channel_payment_triggers_refresh() {
        let ledger = PaymentLedger::new(money(1000));
        let flow = GatewayFlow::qr(money(600), "qr".to_string());
        let snap = snapshot(vec![entry(PaymentMethod::Cash, 400, ConfirmationState::Approved)]);

        let decision = evaluate(&flow, &ledger, &snap);
        assert_eq!(decision, PollDecision::Refresh);
        assert!(!decision.is_terminal());
    }

    #[test]
    fn test_known_remote_state_is_unchanged() {
        let mut ledger = PaymentLedger::new(money(1000));
        let list = vec![entry(PaymentMethod::Cash, 400, ConfirmationState::Approved)];
        ledger.merge_remote(&list);
        let flow = GatewayFlow::qr(money(600), "qr".to_string());
        assert_eq!(evaluate(&flow, &ledger, &snapshot(list)), PollDecision::Unchanged);
    }
}
