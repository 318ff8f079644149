//! # Wire Protocol
//!
//! JSON shapes of the sales, payments and users services, and their mapping
//! to the closed domain types of `vitrina-core`.
//!
//! ## Envelope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every response (except verify-supervisor) is wrapped:                  │
//! │                                                                         │
//! │    { "success": true,  "result": <T> }                                  │
//! │    { "success": false, "error": "Venta no encontrada" }                 │
//! │                                                                         │
//! │  Amounts arrive as numbers OR strings ("monto": "400.00"); ids arrive   │
//! │  as numbers OR strings. Both are kept as serde_json::Value here and     │
//! │  parsed once, defensively, by the mapping functions below.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unrecognized `metodo`/`estado` values never leave this module: the entry
//! is dropped and a warning is logged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use vitrina_core::{
    ConfirmationState, Money, PaymentMethod, PaymentSnapshot, PendingSale, RemoteContribution,
    Sale, SaleLine, SettlementStatus, Supervisor, TerminalDevice,
};

use crate::error::{CheckoutError, CheckoutResult};

// =============================================================================
// Envelope
// =============================================================================

/// `{success, result}` wrapper used by the services.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwraps the envelope; `success: false` becomes a server error.
    pub fn into_result(self, status: u16) -> CheckoutResult<T> {
        if !self.success {
            return Err(CheckoutError::Server {
                status,
                message: self
                    .error
                    .or(self.message)
                    .unwrap_or_else(|| "request failed".to_string()),
            });
        }
        self.result
            .ok_or_else(|| CheckoutError::Decode("response has no result".to_string()))
    }
}

/// Unwraps a body that may or may not carry the envelope.
///
/// The checkout preference and `estado-pago` endpoints answer bare; a body
/// with `result`, or with `success: false`, is still read as an envelope.
pub fn unwrap_loose<T: DeserializeOwned>(body: Value, status: u16) -> CheckoutResult<T> {
    let enveloped = body.get("result").is_some()
        || body.get("success").and_then(Value::as_bool) == Some(false);
    if enveloped {
        let envelope: Envelope<T> = serde_json::from_value(body)?;
        return envelope.into_result(status);
    }
    Ok(serde_json::from_value(body)?)
}

/// `GET /api/sales/{id}` answers with an object or a one-element array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(item) => Some(item),
            OneOrMany::Many(items) => items.into_iter().next(),
        }
    }
}

// =============================================================================
// Scalar Helpers
// =============================================================================

/// Renders a numeric or string id as a string.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sends numeric ids as JSON numbers and anything else as a string.
pub fn id_value(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(id),
    }
}

fn amount_or_zero(value: &Value, field: &str) -> Money {
    Money::from_wire(value).unwrap_or_else(|| {
        if !value.is_null() {
            warn!(field, value = %value, "Non-numeric amount treated as 0");
        }
        Money::zero()
    })
}

// =============================================================================
// Sales
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WireSale {
    #[serde(default)]
    pub total: Value,
    #[serde(default)]
    pub items: Option<Vec<WireSaleItem>>,
}

#[derive(Debug, Deserialize)]
pub struct WireSaleItem {
    #[serde(default)]
    pub producto_id: Value,
    #[serde(default)]
    pub producto_nombre: Option<String>,
    #[serde(default)]
    pub cantidad: Value,
    #[serde(default)]
    pub precio_unitario: Value,
    #[serde(default)]
    pub subtotal: Value,
}

impl WireSale {
    /// Maps to a [`Sale`]; a missing or non-numeric total is rejected.
    pub fn into_sale(self, sale_id: &str) -> CheckoutResult<Sale> {
        let total = Money::from_wire(&self.total)
            .filter(|t| !t.is_negative())
            .ok_or_else(|| {
                CheckoutError::Decode(format!("sale {sale_id} has invalid total {}", self.total))
            })?;

        let lines = self
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|item| SaleLine {
                product_ref: id_string(&item.producto_id).unwrap_or_default(),
                description: item.producto_nombre.unwrap_or_default(),
                quantity: item
                    .cantidad
                    .as_i64()
                    .or_else(|| item.cantidad.as_str().and_then(|s| s.trim().parse().ok()))
                    .unwrap_or(0),
                unit_price: amount_or_zero(&item.precio_unitario, "precio_unitario"),
                subtotal: amount_or_zero(&item.subtotal, "subtotal"),
            })
            .collect();

        Ok(Sale {
            id: sale_id.to_string(),
            total,
            lines,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WirePendingSale {
    #[serde(default)]
    pub venta_id: Value,
    #[serde(default)]
    pub total: Value,
}

impl WirePendingSale {
    pub fn into_pending(self) -> Option<PendingSale> {
        let Some(sale_id) = id_string(&self.venta_id) else {
            warn!(venta_id = %self.venta_id, "Dropping pending sale without id");
            return None;
        };
        Some(PendingSale {
            sale_id,
            total: amount_or_zero(&self.total, "total"),
        })
    }
}

/// `GET /api/sales/{id}/estado-pago`.
#[derive(Debug, Deserialize)]
pub struct WireSettlement {
    #[serde(default)]
    pub estado_venta: Option<String>,
    #[serde(default)]
    pub estado_pago: Option<String>,
}

impl WireSettlement {
    pub fn into_status(self) -> SettlementStatus {
        SettlementStatus::from_wire(
            self.estado_venta.as_deref().unwrap_or_default(),
            self.estado_pago.as_deref().unwrap_or_default(),
        )
    }
}

/// `PUT /api/sales/{id}/observation`.
#[derive(Debug, Serialize)]
pub struct ObservationRequest<'a> {
    pub observation: &'a str,
}

// =============================================================================
// Payments
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WirePaymentList {
    #[serde(default)]
    pub pagos: Option<Vec<WirePayment>>,
    #[serde(default)]
    pub total: Value,
}

#[derive(Debug, Deserialize)]
pub struct WirePayment {
    #[serde(default, alias = "pago_id")]
    pub id: Value,
    #[serde(default)]
    pub metodo: Option<String>,
    #[serde(default)]
    pub monto: Value,
    #[serde(default)]
    pub estado: Option<String>,
}

impl WirePayment {
    /// Maps to the closed domain form, or `None` (logged) when any field is
    /// unrecognized.
    pub fn into_remote(self) -> Option<RemoteContribution> {
        let metodo = self.metodo.unwrap_or_default();
        let Some(method) = PaymentMethod::from_wire(&metodo) else {
            warn!(metodo = %metodo, "Dropping payment with unknown method");
            return None;
        };

        let estado = self.estado.unwrap_or_default();
        let Some(state) = ConfirmationState::from_wire(&estado) else {
            warn!(estado = %estado, metodo = %metodo, "Dropping payment with unknown status");
            return None;
        };

        let amount = match Money::from_wire(&self.monto) {
            Some(amount) if amount.is_positive() => amount,
            _ => {
                warn!(monto = %self.monto, metodo = %metodo, "Dropping payment with invalid amount");
                return None;
            }
        };

        Some(RemoteContribution {
            id: id_string(&self.id),
            method,
            amount,
            state,
        })
    }
}

impl WirePaymentList {
    pub fn into_snapshot(self) -> PaymentSnapshot {
        let entries = self
            .pagos
            .unwrap_or_default()
            .into_iter()
            .filter_map(WirePayment::into_remote)
            .collect();

        PaymentSnapshot {
            entries,
            total: Money::from_wire(&self.total).filter(|t| t.is_positive()),
        }
    }
}

/// `POST /api/payments/manual`.
#[derive(Debug, Serialize)]
pub struct ManualBatchRequest {
    pub venta_id: Value,
    pub pagos: Vec<ManualPaymentLine>,
}

#[derive(Debug, Serialize)]
pub struct ManualPaymentLine {
    pub metodo: &'static str,
    pub monto: Value,
    pub referencia: String,
}

/// `POST /api/payments/mercadopago/dynamic`.
#[derive(Debug, Serialize)]
pub struct QrOrderRequest<'a> {
    pub total: Value,
    pub sucursal_id: &'a str,
    pub venta_id: Value,
}

#[derive(Debug, Deserialize)]
pub struct QrOrderResponse {
    #[serde(default)]
    pub qr_data: Option<String>,
}

/// `POST /api/payments/mercadopago/preference`.
#[derive(Debug, Serialize)]
pub struct CheckoutLinkRequest {
    pub venta_id: Value,
    pub monto: Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutLinkResponse {
    #[serde(default)]
    pub init_point: Option<String>,
    #[serde(default, alias = "preference_id")]
    pub id: Value,
}

/// `POST /api/payments/mercadopago/point`.
#[derive(Debug, Serialize)]
pub struct TerminalOrderRequest<'a> {
    pub venta_id: Value,
    pub monto: Value,
    pub device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct WireDevice {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: Option<String>,
}

impl WireDevice {
    pub fn into_device(self) -> Option<TerminalDevice> {
        let id = id_string(&self.id)?;
        Some(TerminalDevice {
            id,
            name: self.name.unwrap_or_default(),
        })
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WireAdmin {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub apellido: Option<String>,
}

impl WireAdmin {
    pub fn into_supervisor(self) -> Option<Supervisor> {
        Some(Supervisor {
            id: id_string(&self.id)?,
            first_name: self.nombre.unwrap_or_default(),
            last_name: self.apellido.unwrap_or_default(),
        })
    }
}

/// `POST /api/users/verify-supervisor`.
#[derive(Debug, Serialize)]
pub struct VerifySupervisorRequest<'a> {
    pub admin_id: Value,
    pub pin: &'a str,
}

/// Not enveloped: `{success, supervisor_name}` at the top level.
#[derive(Debug, Deserialize)]
pub struct SupervisorVerdict {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub supervisor_name: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================
