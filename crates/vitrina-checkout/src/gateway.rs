//! # Gateway Flow Initiator
//!
//! Starts QR and terminal payments at the gateway provider, and hands out
//! hosted checkout links.
//!
//! ```text
//!   start_qr(amount)               start_terminal(amount, device)
//!        │                                │ device empty ──► MissingDevice
//!        ▼                                ▼
//!   reserve slot ── busy ──► FlowAlreadyActive
//!        │ amount > remaining ──► ExceedsBalance
//!        ▼
//!   POST dynamic / point ── error ──► slot released, GatewayInitiationFailed
//!        │
//!        ▼
//!   AWAITING_QR_SCAN / AWAITING_TERMINAL
//! ```
//!
//! A checkout link does not take the flow slot: the customer leaves for the
//! provider's page and the outcome is followed with the settlement watcher.
//!
//! Nothing is written to the ledger here; the gateway payment shows up
//! through reconciliation once the provider reports it.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use vitrina_core::{CheckoutLink, GatewayFlow, Money, TerminalDevice};

use crate::error::{CheckoutError, CheckoutResult};
use crate::state::{FlowSlot, SessionCore};

pub struct GatewayFlowInitiator {
    core: Arc<SessionCore>,
    devices: OnceCell<Vec<TerminalDevice>>,
}

impl GatewayFlowInitiator {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        GatewayFlowInitiator {
            core,
            devices: OnceCell::new(),
        }
    }

    /// Terminal devices, fetched once per session.
    ///
    /// An empty list means the terminal flow is unavailable.
    pub async fn devices(&self) -> CheckoutResult<Vec<TerminalDevice>> {
        let devices = self
            .devices
            .get_or_try_init(|| async {
                let devices = self.core.backend.list_devices().await?;
                info!(count = devices.len(), "Terminal devices loaded");
                Ok::<_, CheckoutError>(devices)
            })
            .await?;
        Ok(devices.clone())
    }

    /// Starts a QR flow and returns it with its epoch.
    pub(crate) async fn start_qr(&self, amount: Money) -> CheckoutResult<(GatewayFlow, u64)> {
        let epoch = self.core.reserve_flow(amount).await?;
        let sale_id = &self.core.sale_id;
        info!(sale_id = %sale_id, amount = %amount, "Starting QR payment");

        let result = self
            .core
            .backend
            .create_qr_order(sale_id, amount, self.core.config.branch_id())
            .await;

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(epoch, e).await),
        };

        let flow = GatewayFlow::qr(amount, payload);
        self.core.activate_flow(epoch, flow.clone()).await?;
        Ok((flow, epoch))
    }

    /// Pushes a charge to a terminal and returns the flow with its epoch.
    pub(crate) async fn start_terminal(
        &self,
        amount: Money,
        device_id: &str,
    ) -> CheckoutResult<(GatewayFlow, u64)> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(CheckoutError::MissingDevice);
        }

        let epoch = self.core.reserve_flow(amount).await?;
        let sale_id = &self.core.sale_id;
        info!(sale_id = %sale_id, amount = %amount, device_id, "Pushing payment to terminal");

        if let Err(e) = self
            .core
            .backend
            .push_terminal_order(sale_id, amount, device_id)
            .await
        {
            return Err(self.fail(epoch, e).await);
        }

        let flow = GatewayFlow::terminal(amount, device_id.to_string());
        self.core.activate_flow(epoch, flow.clone()).await?;
        Ok((flow, epoch))
    }

    /// Creates a hosted checkout link for an amount within the balance.
    ///
    /// Refused while a QR or terminal flow is in flight.
    pub(crate) async fn checkout_link(&self, amount: Money) -> CheckoutResult<CheckoutLink> {
        self.core.ensure_open()?;
        {
            let state = self.core.state.read().await;
            if state.flow != FlowSlot::Empty {
                return Err(CheckoutError::FlowAlreadyActive);
            }
            state.ledger.check_amount(amount)?;
        }

        let sale_id = &self.core.sale_id;
        info!(sale_id = %sale_id, amount = %amount, "Creating hosted checkout link");
        match self.core.backend.create_checkout_link(sale_id, amount).await {
            Ok(link) => Ok(link),
            Err(e) => {
                warn!(sale_id = %sale_id, error = %e, "Checkout link could not be created");
                Err(initiation_error(e))
            }
        }
    }

    async fn fail(&self, epoch: u64, err: CheckoutError) -> CheckoutError {
        warn!(sale_id = %self.core.sale_id, error = %err, "Gateway flow could not start");
        self.core.release_flow(epoch).await;
        initiation_error(err)
    }
}

fn initiation_error(err: CheckoutError) -> CheckoutError {
    match err {
        CheckoutError::SessionClosed => CheckoutError::SessionClosed,
        other => CheckoutError::GatewayInitiationFailed(other.to_string()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
