//! # Checkout Events
//!
//! Notifications pushed from the engine to whatever renders the checkout
//! screen (a Tauri window, a terminal, a test).
//!
//! ```text
//!  "checkout://totals"  - LedgerTotals after every ledger change
//!  "checkout://flow"    - GatewayFlow while active, null once it ends
//!  "checkout://notice"  - one Notice per terminal state / submit result
//! ```

use serde::Serialize;
use ts_rs::TS;

use vitrina_core::{GatewayFlow, LedgerTotals, Money};

// =============================================================================
// Notice
// =============================================================================

/// User-visible outcome that needs an explicit notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    GatewayApproved { amount: Money },
    GatewayRejected { amount: Money },
    GatewayTimedOut { amount: Money, waited_secs: u64 },
    /// User closed the flow; nothing was cancelled at the gateway.
    FlowClosed { amount: Money },
    PaymentsRecorded { count: usize, amount: Money },
    SubmitFailed { reason: String },
    SaleSettled { sale_id: String },
    /// The sales service reports the sale's last payment as rejected.
    SettlementRejected { sale_id: String },
}

impl Notice {
    /// Message shown to the cashier.
    pub fn message(&self) -> String {
        match self {
            Notice::GatewayApproved { amount } => {
                format!("Gateway payment of {amount} approved.")
            }
            Notice::GatewayRejected { amount } => format!(
                "Gateway payment of {amount} was rejected. Choose another method or try again."
            ),
            Notice::GatewayTimedOut {
                amount,
                waited_secs,
            } => format!(
                "No answer from the gateway for {amount} after {} minutes. The outcome is \
                 unknown and the charge may still go through: check the device or the \
                 gateway account before retrying.",
                waited_secs / 60
            ),
            Notice::FlowClosed { amount } => format!(
                "Stopped waiting for the gateway payment of {amount}. It was NOT cancelled \
                 at the gateway and may still be charged."
            ),
            Notice::PaymentsRecorded { count, amount } => {
                format!("{count} payment(s) for {amount} recorded.")
            }
            Notice::SubmitFailed { reason } => {
                format!("Payments were not recorded: {reason}. They are kept for a retry.")
            }
            Notice::SaleSettled { sale_id } => format!("Sale {sale_id} is fully paid."),
            Notice::SettlementRejected { sale_id } => format!(
                "The payment for sale {sale_id} was rejected. Try again or use another method."
            ),
        }
    }

    /// True for notices that report a failure or an unknown outcome.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Notice::GatewayRejected { .. }
                | Notice::GatewayTimedOut { .. }
                | Notice::FlowClosed { .. }
                | Notice::SubmitFailed { .. }
                | Notice::SettlementRejected { .. }
        )
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting checkout events (implemented by the UI integration).
pub trait CheckoutEventEmitter: Send + Sync {
    /// Emits the derived totals after a ledger change.
    fn emit_totals(&self, totals: &LedgerTotals);

    /// Emits the active gateway flow, or `None` once it ended.
    fn emit_flow(&self, flow: Option<&GatewayFlow>);

    /// Emits a user-visible notice.
    fn emit_notice(&self, notice: &Notice);
}

/// No-op event emitter for headless use.
pub struct NoOpEmitter;

impl CheckoutEventEmitter for NoOpEmitter {
    fn emit_totals(&self, _totals: &LedgerTotals) {}
    fn emit_flow(&self, _flow: Option<&GatewayFlow>) {}
    fn emit_notice(&self, _notice: &Notice) {}
}
