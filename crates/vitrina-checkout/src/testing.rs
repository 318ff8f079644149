//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vitrina_core::{
    CheckoutLink, ConfirmationState, GatewayFlow, LedgerTotals, Money, PaymentMethod,
    PaymentSnapshot, PendingSale, RemoteContribution, Sale, SettlementStatus, Supervisor,
    TerminalDevice,
};

use crate::backend::{ManualPayment, PaymentBackend};
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::events::{CheckoutEventEmitter, Notice};

pub(crate) const SALE_ID: &str = "1042";
pub(crate) const SUPERVISOR_PIN: &str = "4321";

pub(crate) fn money(units: i64) -> Money {
    Money::from_cents(units * 100)
}

pub(crate) fn remote(method: PaymentMethod, units: i64, state: ConfirmationState) -> RemoteContribution {
    RemoteContribution {
        id: None,
        method,
        amount: money(units),
        state,
    }
}

pub(crate) fn snapshot(entries: Vec<RemoteContribution>) -> PaymentSnapshot {
    PaymentSnapshot {
        entries,
        total: None,
    }
}

/// 3 s interval, 600 s ceiling.
pub(crate) fn test_config() -> CheckoutConfig {
    CheckoutConfig::default()
}

// =============================================================================
// Scripted Backend
// =============================================================================

/// Backend whose payment list follows a script.
///
/// Each fetch pops the next queued snapshot; the last one repeats once the
/// queue is down to it.
pub(crate) struct FakeBackend {
    pub sale_total: Money,
    /// Total served by `fetch_sale` once the sale changed server-side.
    pub revised_total: Mutex<Option<Money>>,
    snapshots: Mutex<VecDeque<PaymentSnapshot>>,
    settlements: Mutex<VecDeque<SettlementStatus>>,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub fail_fetch: AtomicBool,
    pub fail_submit: AtomicBool,
    pub fail_gateway: AtomicBool,
    pub pending: Mutex<Vec<PendingSale>>,
    pub devices: Mutex<Vec<TerminalDevice>>,
    pub supervisors: Mutex<Vec<Supervisor>>,
    pub submitted: Mutex<Vec<Vec<ManualPayment>>>,
    pub observations: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub terminal_orders: Mutex<Vec<(Money, String)>>,
    pub checkout_links: Mutex<Vec<Money>>,
    pub blank_link: AtomicBool,
    pub fetch_count: AtomicUsize,
    pub settlement_calls: AtomicUsize,
    pub device_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new(sale_total: Money) -> Self {
        FakeBackend {
            sale_total,
            revised_total: Mutex::new(None),
            snapshots: Mutex::new(VecDeque::new()),
            settlements: Mutex::new(VecDeque::new()),
            fetch_delay: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            fail_gateway: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            devices: Mutex::new(vec![TerminalDevice {
                id: "PAX_A910__SMARTPOS1495357742".into(),
                name: "Caja 1".into(),
            }]),
            supervisors: Mutex::new(vec![Supervisor {
                id: "7".into(),
                first_name: "Laura".into(),
                last_name: "Gómez".into(),
            }]),
            submitted: Mutex::new(Vec::new()),
            observations: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            terminal_orders: Mutex::new(Vec::new()),
            checkout_links: Mutex::new(Vec::new()),
            blank_link: AtomicBool::new(false),
            fetch_count: AtomicUsize::new(0),
            settlement_calls: AtomicUsize::new(0),
            device_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn shared(sale_total: Money) -> Arc<Self> {
        Arc::new(Self::new(sale_total))
    }

    /// Queues the next payment list returned by a fetch.
    pub(crate) fn push_snapshot(&self, snapshot: PaymentSnapshot) {
        self.snapshots.lock().unwrap().push_back(snapshot);
    }

    /// Queues the next sale status returned by `settlement_status`; the last
    /// one repeats like the payment lists do.
    pub(crate) fn push_settlement(&self, status: SettlementStatus) {
        self.settlements.lock().unwrap().push_back(status);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    fn next_snapshot(&self) -> PaymentSnapshot {
        let mut queue = self.snapshots.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }

    fn unavailable() -> CheckoutError {
        CheckoutError::Network("connection refused".into())
    }
}

#[async_trait]
impl PaymentBackend for FakeBackend {
    async fn fetch_sale(&self, sale_id: &str) -> CheckoutResult<Sale> {
        if sale_id == "404" {
            return Err(CheckoutError::SaleNotFound(sale_id.into()));
        }
        let revised = *self.revised_total.lock().unwrap();
        Ok(Sale {
            id: sale_id.to_string(),
            total: revised.unwrap_or(self.sale_total),
            lines: Vec::new(),
        })
    }

    async fn pending_sales(&self, _dni: &str) -> CheckoutResult<Vec<PendingSale>> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn cancel_sale(&self, sale_id: &str) -> CheckoutResult<()> {
        self.cancelled.lock().unwrap().push(sale_id.to_string());
        Ok(())
    }

    async fn annotate_sale(&self, _sale_id: &str, observation: &str) -> CheckoutResult<()> {
        self.observations.lock().unwrap().push(observation.to_string());
        Ok(())
    }

    async fn settlement_status(&self, _sale_id: &str) -> CheckoutResult<SettlementStatus> {
        self.settlement_calls.fetch_add(1, Ordering::SeqCst);
        let status = {
            let mut queue = self.settlements.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().copied()
            }
        };
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(status.unwrap_or(SettlementStatus::Pending))
    }

    async fn fetch_payments(&self, _sale_id: &str) -> CheckoutResult<PaymentSnapshot> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.next_snapshot();
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(snapshot)
    }

    async fn submit_manual(&self, _sale_id: &str, payments: &[ManualPayment]) -> CheckoutResult<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.submitted.lock().unwrap().push(payments.to_vec());
        Ok(())
    }

    async fn list_devices(&self) -> CheckoutResult<Vec<TerminalDevice>> {
        self.device_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn create_qr_order(
        &self,
        sale_id: &str,
        amount: Money,
        branch_id: &str,
    ) -> CheckoutResult<String> {
        if self.fail_gateway.load(Ordering::SeqCst) {
            return Err(CheckoutError::Server {
                status: 502,
                message: "gateway unavailable".into(),
            });
        }
        Ok(format!("00020101021243650016COM.MERCADOLIBRE|{branch_id}|{sale_id}|{amount}"))
    }

    async fn create_checkout_link(&self, sale_id: &str, amount: Money) -> CheckoutResult<CheckoutLink> {
        if self.fail_gateway.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        if self.blank_link.load(Ordering::SeqCst) {
            return Err(CheckoutError::Decode(
                "checkout preference returned no init_point".into(),
            ));
        }
        self.checkout_links.lock().unwrap().push(amount);
        Ok(CheckoutLink {
            amount,
            url: format!("https://checkout.example/pay?venta={sale_id}"),
            preference_id: Some(format!("pref-{sale_id}")),
        })
    }

    async fn push_terminal_order(
        &self,
        _sale_id: &str,
        amount: Money,
        device_id: &str,
    ) -> CheckoutResult<()> {
        if self.fail_gateway.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.terminal_orders
            .lock()
            .unwrap()
            .push((amount, device_id.to_string()));
        Ok(())
    }

    async fn list_supervisors(&self) -> CheckoutResult<Vec<Supervisor>> {
        Ok(self.supervisors.lock().unwrap().clone())
    }

    async fn verify_supervisor(&self, supervisor_id: &str, pin: &str) -> CheckoutResult<Option<String>> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if pin != SUPERVISOR_PIN {
            return Ok(None);
        }
        Ok(self
            .supervisors
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == supervisor_id)
            .map(Supervisor::full_name))
    }
}

// =============================================================================
// Recording Emitter
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    pub totals: Mutex<Vec<LedgerTotals>>,
    pub flows: Mutex<Vec<Option<GatewayFlow>>>,
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingEmitter {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub(crate) fn last_flow(&self) -> Option<Option<GatewayFlow>> {
        self.flows.lock().unwrap().last().cloned()
    }
}

impl CheckoutEventEmitter for RecordingEmitter {
    fn emit_totals(&self, totals: &LedgerTotals) {
        self.totals.lock().unwrap().push(*totals);
    }

    fn emit_flow(&self, flow: Option<&GatewayFlow>) {
        self.flows.lock().unwrap().push(flow.cloned());
    }

    fn emit_notice(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

/// A session core over `backend` for the fresh sale, nothing fetched yet.
pub(crate) fn core_for(
    backend: Arc<FakeBackend>,
    emitter: Arc<RecordingEmitter>,
) -> Arc<crate::state::SessionCore> {
    let total = backend.sale_total;
    Arc::new(crate::state::SessionCore::new(
        SALE_ID.to_string(),
        vitrina_core::PaymentLedger::new(total),
        backend,
        emitter,
        test_config(),
    ))
}
