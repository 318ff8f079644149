//! # Payment Backend
//!
//! The boundary to the external sales, payments and users services.
//!
//! ```text
//! ┌───────────────────────────┐        ┌────────────────────────────────────┐
//! │ SaleResolver              │        │ PaymentBackend (trait)             │
//! │ ManualSettlementSubmitter │ ─────► │                                    │
//! │ GatewayFlowInitiator      │        │  HttpBackend   reqwest, 15 s       │
//! │ ReconciliationPoller      │        │                timeout, envelope   │
//! │ AuthorizationGate         │        │  (tests)       scripted fake       │
//! └───────────────────────────┘        └────────────────────────────────────┘
//! ```
//!
//! Every method speaks domain types; JSON shapes stay in [`crate::protocol`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use vitrina_core::{
    CheckoutLink, Money, PaymentMethod, PaymentSnapshot, PendingSale, Sale, SettlementStatus,
    Supervisor, TerminalDevice,
};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::protocol::{
    id_string, id_value, unwrap_loose, CheckoutLinkRequest, CheckoutLinkResponse, Envelope,
    ManualBatchRequest, ManualPaymentLine, ObservationRequest, OneOrMany, QrOrderRequest,
    QrOrderResponse, SupervisorVerdict, TerminalOrderRequest, VerifySupervisorRequest, WireAdmin,
    WireDevice, WirePaymentList, WirePendingSale, WireSale, WireSettlement,
};

/// One line of a manual settlement batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualPayment {
    pub method: PaymentMethod,
    pub amount: Money,
    pub reference: Option<String>,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// External collaborators consumed by the checkout engine.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// `GET /api/sales/{id}`
    async fn fetch_sale(&self, sale_id: &str) -> CheckoutResult<Sale>;

    /// `GET /api/sales/by-client-dni/{dni}` (latest first)
    async fn pending_sales(&self, dni: &str) -> CheckoutResult<Vec<PendingSale>>;

    /// `PUT /api/sales/{id}/cancel`
    async fn cancel_sale(&self, sale_id: &str) -> CheckoutResult<()>;

    /// `PUT /api/sales/{id}/observation`
    async fn annotate_sale(&self, sale_id: &str, observation: &str) -> CheckoutResult<()>;

    /// `GET /api/sales/{id}/estado-pago`
    async fn settlement_status(&self, sale_id: &str) -> CheckoutResult<SettlementStatus>;

    /// `GET /api/payments/{saleId}`
    async fn fetch_payments(&self, sale_id: &str) -> CheckoutResult<PaymentSnapshot>;

    /// `POST /api/payments/manual`
    async fn submit_manual(&self, sale_id: &str, payments: &[ManualPayment]) -> CheckoutResult<()>;

    /// `GET /api/payments/mercadopago/devices`
    async fn list_devices(&self) -> CheckoutResult<Vec<TerminalDevice>>;

    /// `POST /api/payments/mercadopago/dynamic`, returns the QR payload.
    async fn create_qr_order(
        &self,
        sale_id: &str,
        amount: Money,
        branch_id: &str,
    ) -> CheckoutResult<String>;

    /// `POST /api/payments/mercadopago/preference`, returns the hosted
    /// checkout page for the amount.
    async fn create_checkout_link(&self, sale_id: &str, amount: Money)
        -> CheckoutResult<CheckoutLink>;

    /// `POST /api/payments/mercadopago/point`
    async fn push_terminal_order(
        &self,
        sale_id: &str,
        amount: Money,
        device_id: &str,
    ) -> CheckoutResult<()>;

    /// `GET /api/users/admins`
    async fn list_supervisors(&self) -> CheckoutResult<Vec<Supervisor>>;

    /// `POST /api/users/verify-supervisor`; `Some(name)` when the PIN matches.
    async fn verify_supervisor(&self, supervisor_id: &str, pin: &str)
        -> CheckoutResult<Option<String>>;
}

// =============================================================================
// HTTP Backend
// =============================================================================

/// [`PaymentBackend`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Builds a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> CheckoutResult<Self> {
        let parsed = Url::parse(base_url)?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CheckoutError::InvalidConfig(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        // The API is often exposed through an ngrok tunnel.
        headers.insert("ngrok-skip-browser-warning", HeaderValue::from_static("true"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| CheckoutError::InvalidConfig(e.to_string()))?;

        Ok(HttpBackend {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds a client from the `[backend]` section of the config.
    pub fn from_config(config: &CheckoutConfig) -> CheckoutResult<Self> {
        Self::new(&config.backend.base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and unwraps the `{success, result}` envelope.
    async fn send_enveloped<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> CheckoutResult<T> {
        let (status, body) = self.send_raw(request).await?;
        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) if status < 400 => envelope.into_result(status),
            Ok(envelope) => Err(CheckoutError::Server {
                status,
                message: envelope
                    .error
                    .or(envelope.message)
                    .unwrap_or_else(|| format!("HTTP {status}")),
            }),
            Err(e) if status < 400 => Err(CheckoutError::Decode(e.to_string())),
            Err(_) => Err(server_error(status, &body)),
        }
    }

    /// Sends a request whose answer may come with or without the envelope.
    async fn send_loose<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> CheckoutResult<T> {
        let (status, body) = self.send_raw(request).await?;
        if status >= 400 {
            return Err(server_error(status, &body));
        }
        unwrap_loose(serde_json::from_str(&body)?, status)
    }

    /// Sends a request whose result is not needed; only `success` counts.
    async fn send_ack(&self, request: reqwest::RequestBuilder) -> CheckoutResult<()> {
        let (status, body) = self.send_raw(request).await?;
        if status >= 400 {
            return Err(server_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(());
        }
        let envelope: Envelope<Value> = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(CheckoutError::Server {
                status,
                message: envelope
                    .error
                    .or(envelope.message)
                    .unwrap_or_else(|| "request failed".to_string()),
            });
        }
        Ok(())
    }

    async fn send_raw(&self, request: reqwest::RequestBuilder) -> CheckoutResult<(u16, String)> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        debug!(status, bytes = body.len(), "Backend response");
        Ok((status, body))
    }
}

fn transport_error(err: reqwest::Error) -> CheckoutError {
    if err.is_timeout() {
        CheckoutError::Network(format!("request timed out: {err}"))
    } else {
        CheckoutError::from(err)
    }
}

fn server_error(status: u16, body: &str) -> CheckoutError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    CheckoutError::Server { status, message }
}

#[async_trait]
impl PaymentBackend for HttpBackend {
    async fn fetch_sale(&self, sale_id: &str) -> CheckoutResult<Sale> {
        let request = self.client.get(self.url(&format!("/api/sales/{sale_id}")));
        let result: OneOrMany<WireSale> = match self.send_enveloped(request).await {
            Err(CheckoutError::Server { status: 404, .. }) => {
                return Err(CheckoutError::SaleNotFound(sale_id.to_string()))
            }
            other => other?,
        };
        result
            .into_first()
            .ok_or_else(|| CheckoutError::SaleNotFound(sale_id.to_string()))?
            .into_sale(sale_id)
    }

    async fn pending_sales(&self, dni: &str) -> CheckoutResult<Vec<PendingSale>> {
        let request = self
            .client
            .get(self.url(&format!("/api/sales/by-client-dni/{dni}")));
        let list: Vec<WirePendingSale> = match self.send_enveloped(request).await {
            Err(CheckoutError::Server { status: 404, .. }) => Vec::new(),
            other => other?,
        };
        Ok(list.into_iter().filter_map(WirePendingSale::into_pending).collect())
    }

    async fn cancel_sale(&self, sale_id: &str) -> CheckoutResult<()> {
        let request = self
            .client
            .put(self.url(&format!("/api/sales/{sale_id}/cancel")));
        self.send_ack(request).await
    }

    async fn annotate_sale(&self, sale_id: &str, observation: &str) -> CheckoutResult<()> {
        let request = self
            .client
            .put(self.url(&format!("/api/sales/{sale_id}/observation")))
            .json(&ObservationRequest { observation });
        self.send_ack(request).await
    }

    async fn settlement_status(&self, sale_id: &str) -> CheckoutResult<SettlementStatus> {
        let request = self
            .client
            .get(self.url(&format!("/api/sales/{sale_id}/estado-pago")));
        let wire: WireSettlement = self.send_loose(request).await?;
        Ok(wire.into_status())
    }

    async fn fetch_payments(&self, sale_id: &str) -> CheckoutResult<PaymentSnapshot> {
        let request = self.client.get(self.url(&format!("/api/payments/{sale_id}")));
        let list: WirePaymentList = self.send_enveloped(request).await?;
        Ok(list.into_snapshot())
    }

    async fn submit_manual(&self, sale_id: &str, payments: &[ManualPayment]) -> CheckoutResult<()> {
        let body = ManualBatchRequest {
            venta_id: id_value(sale_id),
            pagos: payments
                .iter()
                .map(|p| ManualPaymentLine {
                    metodo: p.method.wire_code(),
                    monto: p.amount.to_wire(),
                    referencia: p.reference.clone().unwrap_or_default(),
                })
                .collect(),
        };
        let request = self.client.post(self.url("/api/payments/manual")).json(&body);
        self.send_ack(request).await
    }

    async fn list_devices(&self) -> CheckoutResult<Vec<TerminalDevice>> {
        let request = self.client.get(self.url("/api/payments/mercadopago/devices"));
        let devices: Vec<WireDevice> = self.send_enveloped(request).await?;
        Ok(devices
            .into_iter()
            .filter_map(|d| {
                let device = d.into_device();
                if device.is_none() {
                    warn!("Dropping terminal device without id");
                }
                device
            })
            .collect())
    }

    async fn create_qr_order(
        &self,
        sale_id: &str,
        amount: Money,
        branch_id: &str,
    ) -> CheckoutResult<String> {
        let body = QrOrderRequest {
            total: amount.to_wire(),
            sucursal_id: branch_id,
            venta_id: id_value(sale_id),
        };
        let request = self
            .client
            .post(self.url("/api/payments/mercadopago/dynamic"))
            .json(&body);
        let response: QrOrderResponse = self.send_enveloped(request).await?;
        response
            .qr_data
            .filter(|qr| !qr.trim().is_empty())
            .ok_or_else(|| CheckoutError::Decode("QR order returned no qr_data".to_string()))
    }

    async fn create_checkout_link(
        &self,
        sale_id: &str,
        amount: Money,
    ) -> CheckoutResult<CheckoutLink> {
        let body = CheckoutLinkRequest {
            venta_id: id_value(sale_id),
            monto: amount.to_wire(),
        };
        let request = self
            .client
            .post(self.url("/api/payments/mercadopago/preference"))
            .json(&body);
        let response: CheckoutLinkResponse = self.send_loose(request).await?;
        let url = response
            .init_point
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CheckoutError::Decode("checkout preference returned no init_point".to_string()))?;
        Ok(CheckoutLink {
            amount,
            url,
            preference_id: id_string(&response.id),
        })
    }

    async fn push_terminal_order(
        &self,
        sale_id: &str,
        amount: Money,
        device_id: &str,
    ) -> CheckoutResult<()> {
        let body = TerminalOrderRequest {
            venta_id: id_value(sale_id),
            monto: amount.to_wire(),
            device_id,
        };
        let request = self
            .client
            .post(self.url("/api/payments/mercadopago/point"))
            .json(&body);
        self.send_ack(request).await
    }

    async fn list_supervisors(&self) -> CheckoutResult<Vec<Supervisor>> {
        let request = self.client.get(self.url("/api/users/admins"));
        let admins: Vec<WireAdmin> = self.send_enveloped(request).await?;
        Ok(admins.into_iter().filter_map(WireAdmin::into_supervisor).collect())
    }

    async fn verify_supervisor(
        &self,
        supervisor_id: &str,
        pin: &str,
    ) -> CheckoutResult<Option<String>> {
        let request = self
            .client
            .post(self.url("/api/users/verify-supervisor"))
            .json(&VerifySupervisorRequest {
                admin_id: id_value(supervisor_id),
                pin,
            });
        let (status, body) = self.send_raw(request).await?;
        if status == 401 || status == 403 {
            return Ok(None);
        }
        if status >= 400 {
            return Err(server_error(status, &body));
        }
        let verdict: SupervisorVerdict = serde_json::from_str(&body)?;
        if !verdict.success {
            return Ok(None);
        }
        Ok(Some(
            verdict
                .supervisor_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| supervisor_id.to_string()),
        ))
    }
}
