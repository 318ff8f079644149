//! # Domain Types
//!
//! Core domain types of the checkout payment engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │   │  Contribution   │   │  GatewayFlow    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  method         │   │  kind (QR/TERM) │       │
//! │  │  total          │   │  amount         │   │  amount         │       │
//! │  │  lines          │   │  origin         │   │  device_id      │       │
//! │  └─────────────────┘   │  state          │   │  status         │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ PaymentMethod   │   │ConfirmationState│   │    Origin       │       │
//! │  │  EFECTIVO  DEB. │   │  PENDIENTE      │   │  Local          │       │
//! │  │  CREDITO  TRANS │   │  APROBADO       │   │  Remote         │       │
//! │  │  MP (gateway)   │   │  RECHAZADO      │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Codes
//! The payments service speaks Spanish codes (`metodo: "EFECTIVO"`,
//! `estado: "APROBADO"`). Each enum maps them with `wire_code` /
//! `from_wire`; serde uses snake_case names for the frontend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// How a contribution is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash.
    Cash,
    /// Debit card on a standalone POS.
    Debit,
    /// Credit card on a standalone POS.
    Credit,
    /// Bank transfer.
    Transfer,
    /// Third-party gateway (QR or terminal), confirmed only by polling.
    Gateway,
}

impl PaymentMethod {
    /// All methods, in the order the picker shows them.
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Cash,
        PaymentMethod::Debit,
        PaymentMethod::Credit,
        PaymentMethod::Transfer,
        PaymentMethod::Gateway,
    ];

    /// Code used by the payments service.
    pub const fn wire_code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "EFECTIVO",
            PaymentMethod::Debit => "DEBITO",
            PaymentMethod::Credit => "CREDITO",
            PaymentMethod::Transfer => "TRANSFERENCIA",
            PaymentMethod::Gateway => "MP",
        }
    }

    /// Maps a service code back; unknown codes are `None`.
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::PaymentMethod;
    ///
    /// assert_eq!(PaymentMethod::from_wire("mp"), Some(PaymentMethod::Gateway));
    /// assert_eq!(PaymentMethod::from_wire("CHEQUE"), None);
    /// ```
    pub fn from_wire(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.wire_code().eq_ignore_ascii_case(code))
    }

    #[inline]
    pub const fn is_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Gateway)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_code())
    }
}

// =============================================================================
// Confirmation State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Pending,
    Approved,
    Rejected,
}

impl ConfirmationState {
    pub const fn wire_code(&self) -> &'static str {
        match self {
            ConfirmationState::Pending => "PENDIENTE",
            ConfirmationState::Approved => "APROBADO",
            ConfirmationState::Rejected => "RECHAZADO",
        }
    }

    /// Maps a service status. `CONFIRMADO` is a legacy alias of `APROBADO`.
    pub fn from_wire(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Some(ConfirmationState::Pending),
            "APROBADO" | "CONFIRMADO" => Some(ConfirmationState::Approved),
            "RECHAZADO" => Some(ConfirmationState::Rejected),
            _ => None,
        }
    }
}

// =============================================================================
// Contribution
// =============================================================================

/// Where a contribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Entered in this session.
    Local,
    /// Returned by the authoritative server list.
    Remote,
}

/// One discrete payment amount applied toward a sale's total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Contribution {
    /// Local UUID for LOCAL entries, server id (or positional id) for REMOTE.
    pub id: String,
    pub method: PaymentMethod,
    pub amount: Money,
    pub origin: Origin,
    pub state: ConfirmationState,
    /// LOCAL entry already sent in a successful batch, awaiting refresh.
    pub submitted: bool,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl Contribution {
    /// Only LOCAL entries that have not been submitted may be removed.
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.origin == Origin::Local && !self.submitted
    }

    #[inline]
    pub fn is_approved(&self) -> bool {
        self.state == ConfirmationState::Approved
    }
}

/// Typed form of one entry of the authoritative payment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RemoteContribution {
    pub id: Option<String>,
    pub method: PaymentMethod,
    pub amount: Money,
    pub state: ConfirmationState,
}

/// The authoritative payment list of a sale, as returned by one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentSnapshot {
    pub entries: Vec<RemoteContribution>,
    /// Sale total as the payments service reports it, when present.
    pub total: Option<Money>,
}

impl PaymentSnapshot {
    /// Sum of APPROVED entries.
    pub fn approved_total(&self) -> Money {
        self.entries
            .iter()
            .filter(|e| e.state == ConfirmationState::Approved)
            .map(|e| e.amount)
            .sum()
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale as the sales service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub total: Money,
    pub lines: Vec<SaleLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub product_ref: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// Entry of a customer's pending-sales list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingSale {
    pub sale_id: String,
    pub total: Money,
}

// =============================================================================
// Gateway Flow
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Customer scans a dynamic QR code.
    Qr,
    /// Charge pushed to a physical card terminal.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Idle,
    AwaitingTerminal,
    AwaitingQrScan,
}

/// One bounded attempt to collect payment via the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GatewayFlow {
    pub kind: FlowKind,
    pub amount: Money,
    /// Terminal flows only.
    pub device_id: Option<String>,
    /// QR flows only: the string rendered as a scannable code.
    pub display_payload: Option<String>,
    pub status: FlowStatus,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
}

impl GatewayFlow {
    /// A QR flow awaiting the customer's scan.
    pub fn qr(amount: Money, display_payload: String) -> Self {
        GatewayFlow {
            kind: FlowKind::Qr,
            amount,
            device_id: None,
            display_payload: Some(display_payload),
            status: FlowStatus::AwaitingQrScan,
            started_at: Utc::now(),
        }
    }

    /// A terminal flow awaiting the card on `device_id`.
    pub fn terminal(amount: Money, device_id: String) -> Self {
        GatewayFlow {
            kind: FlowKind::Terminal,
            amount,
            device_id: Some(device_id),
            display_payload: None,
            status: FlowStatus::AwaitingTerminal,
            started_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status != FlowStatus::Idle
    }
}

/// A card terminal registered with the gateway provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TerminalDevice {
    pub id: String,
    pub name: String,
}

impl TerminalDevice {
    /// Name to show in the picker; unnamed devices show the id tail.
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::TerminalDevice;
    ///
    /// let device = TerminalDevice { id: "PAX_A910__SMARTPOS1495357742".into(), name: "  ".into() };
    /// assert_eq!(device.display_name(), "Terminal 357742");
    /// ```
    pub fn display_name(&self) -> String {
        let name = self.name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
        let tail_start = self
            .id
            .char_indices()
            .rev()
            .nth(5)
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("Terminal {}", &self.id[tail_start..])
    }
}

/// Hosted checkout page of the gateway provider for one charge.
///
/// The customer pays on the provider's page; the payment reaches the sale
/// through the payments service like any other gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CheckoutLink {
    pub amount: Money,
    /// Where to send the customer (`init_point`).
    pub url: String,
    pub preference_id: Option<String>,
}

// =============================================================================
// Settlement Status
// =============================================================================

/// Payment status of a whole sale, as the sales service reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    /// The sale is PAGADA.
    Paid,
    /// The last gateway payment was RECHAZADO.
    Rejected,
}

impl SettlementStatus {
    /// Maps `estado_venta` / `estado_pago`. A paid sale wins over a
    /// rejected payment; anything else is still pending.
    pub fn from_wire(sale_state: &str, payment_state: &str) -> Self {
        if sale_state.trim().eq_ignore_ascii_case("PAGADA") {
            SettlementStatus::Paid
        } else if ConfirmationState::from_wire(payment_state) == Some(ConfirmationState::Rejected) {
            SettlementStatus::Rejected
        } else {
            SettlementStatus::Pending
        }
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        *self != SettlementStatus::Pending
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// An administrator able to authorize gated actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Supervisor {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl Supervisor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

// =============================================================================
// Derived Totals
// =============================================================================

/// Serializable view of the ledger's derived aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerTotals {
    pub total: Money,
    /// Sum of APPROVED contributions.
    pub paid: Money,
    /// `max(0, total - paid)`.
    pub remaining: Money,
    /// `max(0, paid - total)`.
    pub overpaid: Money,
    /// Sum of PENDING contributions.
    pub pending: Money,
    pub entry_count: usize,
    pub uncommitted_count: usize,
}

// =============================================================================
// Unit Tests
// =============================================================================
