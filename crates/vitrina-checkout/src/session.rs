//! # Checkout Session
//!
//! One open sale at the checkout screen. Owns the ledger, the single gateway
//! flow slot and the poller task of that sale; nothing here is global.
//!
//! ## Usage
//! ```rust,ignore
//! let session = CheckoutSession::open(
//!     backend,
//!     Arc::new(NoOpEmitter),
//!     config,
//!     SaleRef::Id("1042".into()),
//! )
//! .await?;
//!
//! session.add_payment(PaymentMethod::Cash, Money::from_cents(40_000)).await?;
//! session.start_qr_flow(Money::from_cents(60_000)).await?;
//! match session.wait_for_flow().await? {
//!     FlowResolution::Approved { .. } => {
//!         session.submit().await?;
//!     }
//!     FlowResolution::Closed => { /* pick another method */ }
//! }
//! ```
//!
//! ## Hosted Checkout
//! `checkout_link()` returns the provider's payment page for an amount;
//! `watch_settlement()` then follows the sale until it is paid or the payment
//! is rejected. The same watch applies after a release without payment.
//!
//! ## Teardown
//! `close()` (or dropping the session) stops the poller and the settlement
//! watcher and bumps the generation counter; HTTP results still in flight
//! are discarded when they land.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use vitrina_core::validation::parse_payment_amount;
use vitrina_core::{
    AddOutcome, CheckoutLink, Contribution, GatewayFlow, LedgerTotals, Money, PaymentLedger,
    PaymentMethod, Sale, Supervisor, TerminalDevice,
};

use crate::auth::{Authorization, AuthorizationGate, GatedAction};
use crate::backend::PaymentBackend;
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::events::CheckoutEventEmitter;
use crate::gateway::GatewayFlowInitiator;
use crate::poller::{
    PollOutcome, PollerHandle, ReconciliationPoller, SettlementOutcome, SettlementWatcher,
};
use crate::resolver::{SaleRef, SaleResolver};
use crate::state::{FlowSlot, SessionCore};
use crate::submitter::{ManualSettlementSubmitter, SubmitOutcome};

/// Observation written when goods leave without payment.
const RELEASE_OBSERVATION_PREFIX: &str = "AUTORIZADO RETIRO SIN PAGO POR:";

/// Successful end of a gateway flow, as seen by [`CheckoutSession::wait_for_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowResolution {
    Approved { amount: Money },
    /// Closed by the user; the gateway may still charge.
    Closed,
}

pub struct CheckoutSession {
    core: Arc<SessionCore>,
    resolver: SaleResolver,
    submitter: ManualSettlementSubmitter,
    initiator: GatewayFlowInitiator,
    gate: AuthorizationGate,
    poller: Mutex<Option<PollerHandle>>,
    watcher: Mutex<Option<PollerHandle>>,
}

impl CheckoutSession {
    /// Resolves the sale and loads its authoritative payments.
    pub async fn open(
        backend: Arc<dyn PaymentBackend>,
        emitter: Arc<dyn CheckoutEventEmitter>,
        config: CheckoutConfig,
        sale_ref: SaleRef,
    ) -> CheckoutResult<Self> {
        let resolver = SaleResolver::new(Arc::clone(&backend));
        let sale = resolver.resolve_ref(&sale_ref).await?;

        let core = Arc::new(SessionCore::new(
            sale.id.clone(),
            PaymentLedger::new(sale.total),
            Arc::clone(&backend),
            emitter,
            config,
        ));
        core.refresh().await?;

        info!(sale_id = %sale.id, total = %sale.total, "Checkout session opened");
        Ok(CheckoutSession {
            submitter: ManualSettlementSubmitter::new(Arc::clone(&core)),
            initiator: GatewayFlowInitiator::new(Arc::clone(&core)),
            gate: AuthorizationGate::new(backend),
            resolver,
            core,
            poller: Mutex::new(None),
            watcher: Mutex::new(None),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn sale_id(&self) -> &str {
        &self.core.sale_id
    }

    pub async fn sale(&self) -> Option<Sale> {
        self.resolver.cached().await
    }

    pub async fn totals(&self) -> LedgerTotals {
        self.core.state.read().await.ledger.totals()
    }

    pub async fn entries(&self) -> Vec<Contribution> {
        self.core.state.read().await.ledger.entries().to_vec()
    }

    /// The active gateway flow, if any.
    pub async fn flow(&self) -> Option<GatewayFlow> {
        self.core.state.read().await.flow.active_flow().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Adds a payment.
    ///
    /// Gateway payments are not recorded; the outcome tells the caller to
    /// start a QR or terminal flow for the amount. The amount of a flow
    /// still in flight is not available to new payments.
    pub async fn add_payment(&self, method: PaymentMethod, amount: Money) -> CheckoutResult<AddOutcome> {
        self.core.ensure_open()?;
        let mut state = self.core.state.write().await;
        let held = state.flow.held();
        let outcome = state.ledger.add_with_hold(method, amount, held)?;
        if let AddOutcome::Recorded { .. } = &outcome {
            info!(sale_id = %self.core.sale_id, %method, amount = %amount, "Payment added");
            self.core.emitter.emit_totals(&state.ledger.totals());
        }
        Ok(outcome)
    }

    /// Adds a payment from the raw amount input.
    pub async fn add_payment_input(&self, method: PaymentMethod, input: &str) -> CheckoutResult<AddOutcome> {
        let amount =
            parse_payment_amount(input).map_err(|e| CheckoutError::InvalidAmount(e.to_string()))?;
        self.add_payment(method, amount).await
    }

    /// Removes an unsubmitted LOCAL payment, returning it.
    pub async fn remove_payment(&self, index: usize) -> CheckoutResult<Contribution> {
        self.core.ensure_open()?;
        if self.submitter.is_in_flight() {
            return Err(CheckoutError::SubmitInFlight);
        }
        let mut state = self.core.state.write().await;
        let removed = state.ledger.remove(index)?;
        info!(sale_id = %self.core.sale_id, index, amount = %removed.amount, "Payment removed");
        self.core.emitter.emit_totals(&state.ledger.totals());
        Ok(removed)
    }

    /// Submits the uncommitted manual payments; the cached sale is
    /// re-fetched once the batch is recorded.
    pub async fn submit(&self) -> CheckoutResult<SubmitOutcome> {
        let outcome = self.submitter.submit().await?;
        if let SubmitOutcome::Submitted { .. } = outcome {
            self.refresh_sale().await;
        }
        Ok(outcome)
    }

    async fn refresh_sale(&self) {
        if let Err(e) = self.resolver.refresh().await {
            warn!(sale_id = %self.core.sale_id, error = %e, "Sale refresh failed");
        }
    }

    /// Merges the authoritative payment list now.
    pub async fn refresh(&self) -> CheckoutResult<LedgerTotals> {
        self.core.refresh().await?;
        Ok(self.totals().await)
    }

    // =========================================================================
    // Gateway Flows
    // =========================================================================

    pub async fn devices(&self) -> CheckoutResult<Vec<TerminalDevice>> {
        self.initiator.devices().await
    }

    /// Starts a QR flow and begins polling for its outcome.
    pub async fn start_qr_flow(&self, amount: Money) -> CheckoutResult<GatewayFlow> {
        let (flow, epoch) = self.initiator.start_qr(amount).await?;
        self.spawn_poller(epoch);
        Ok(flow)
    }

    /// Pushes a charge to a terminal and begins polling for its outcome.
    pub async fn start_terminal_flow(&self, amount: Money, device_id: &str) -> CheckoutResult<GatewayFlow> {
        let (flow, epoch) = self.initiator.start_terminal(amount, device_id).await?;
        self.spawn_poller(epoch);
        Ok(flow)
    }

    /// Creates a hosted checkout link for the amount.
    ///
    /// Fails with `GatewayInitiationFailed` when the provider returns no
    /// page to send the customer to.
    pub async fn checkout_link(&self, amount: Money) -> CheckoutResult<CheckoutLink> {
        self.initiator.checkout_link(amount).await
    }

    fn spawn_poller(&self, epoch: u64) {
        let (poller, handle) = ReconciliationPoller::new(
            Arc::clone(&self.core),
            epoch,
            self.core.config.poll_interval(),
            self.core.config.poll_ceiling(),
        );
        poller.spawn();

        let mut slot = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.cancel();
        }
    }

    fn cancel_poller(&self) {
        let handle = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    // =========================================================================
    // Settlement Watch
    // =========================================================================

    /// Follows the sale's payment status until it is paid, the payment is
    /// rejected, the poll ceiling passes or the watch is stopped.
    ///
    /// A second call replaces (and stops) the running watch.
    pub async fn watch_settlement(&self) -> CheckoutResult<SettlementOutcome> {
        self.core.ensure_open()?;
        let (watcher, handle) = SettlementWatcher::new(
            Arc::clone(&self.core),
            self.core.config.poll_interval(),
            self.core.config.poll_ceiling(),
        );
        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }

        let outcome = watcher.run().await;
        if outcome == SettlementOutcome::Paid {
            self.refresh_sale().await;
            if let Err(e) = self.core.refresh().await {
                warn!(sale_id = %self.core.sale_id, error = %e, "Refresh after settlement failed");
            }
        }
        Ok(outcome)
    }

    /// Stops a running settlement watch; it ends with `Cancelled`.
    pub fn stop_settlement_watch(&self) {
        let handle = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Stops waiting for the active flow.
    ///
    /// The payment is not cancelled at the gateway and may still be charged;
    /// the `FlowClosed` notice says so.
    pub async fn close_flow(&self) -> CheckoutResult<()> {
        let flow = self
            .core
            .end_active_flow(PollOutcome::Cancelled)
            .await
            .ok_or(CheckoutError::NoActiveFlow)?;
        self.cancel_poller();
        warn!(sale_id = %self.core.sale_id, amount = %flow.amount, "Gateway flow closed by user");
        Ok(())
    }

    /// Waits until the current (or just finished) flow ends.
    pub async fn wait_for_flow(&self) -> CheckoutResult<FlowResolution> {
        let mut rx = self.core.subscribe();

        let epoch = {
            let state = self.core.state.read().await;
            match &state.flow {
                FlowSlot::Active { epoch, .. } => *epoch,
                FlowSlot::Initiating { .. } => return Err(CheckoutError::NoActiveFlow),
                FlowSlot::Empty => {
                    let last = *rx.borrow_and_update();
                    return match last {
                        Some(end) if end.epoch == self.core.last_epoch() => {
                            self.resolution(end.outcome)
                        }
                        _ => Err(CheckoutError::NoActiveFlow),
                    };
                }
            }
        };

        loop {
            let end = *rx.borrow_and_update();
            if let Some(end) = end.filter(|e| e.epoch == epoch) {
                return self.resolution(end.outcome);
            }
            if rx.changed().await.is_err() {
                return Err(CheckoutError::SessionClosed);
            }
        }
    }

    fn resolution(&self, outcome: PollOutcome) -> CheckoutResult<FlowResolution> {
        match outcome {
            PollOutcome::Approved { amount } => Ok(FlowResolution::Approved { amount }),
            PollOutcome::Cancelled => Ok(FlowResolution::Closed),
            PollOutcome::Rejected { amount } => Err(CheckoutError::GatewayRejected { amount }),
            PollOutcome::TimedOut => Err(CheckoutError::PollingTimeout {
                after_secs: self.core.config.gateway.poll_ceiling_secs,
            }),
            PollOutcome::Superseded => Err(CheckoutError::SessionClosed),
        }
    }

    // =========================================================================
    // Supervisor Actions
    // =========================================================================

    pub async fn supervisors(&self) -> CheckoutResult<Vec<Supervisor>> {
        self.gate.supervisors().await
    }

    /// Runs the supervisor PIN challenge for an action.
    pub async fn authorize(
        &self,
        action: GatedAction,
        supervisor_id: &str,
        pin: &str,
    ) -> CheckoutResult<Authorization> {
        self.gate.challenge(action, supervisor_id, pin).await
    }

    /// Confirms the discount field may be enabled.
    pub fn authorize_discount(&self, authorization: &Authorization) -> CheckoutResult<()> {
        authorization.require(GatedAction::ApplyDiscount)?;
        info!(
            sale_id = %self.core.sale_id,
            supervisor = %authorization.supervisor_name,
            "Discount enabled"
        );
        Ok(())
    }

    /// Records that goods left without payment, with the supervisor's name.
    pub async fn release_without_payment(&self, authorization: &Authorization) -> CheckoutResult<()> {
        self.core.ensure_open()?;
        authorization.require(GatedAction::ReleaseWithoutPayment)?;

        let observation = format!(
            "{} {}",
            RELEASE_OBSERVATION_PREFIX, authorization.supervisor_name
        );
        self.core
            .backend
            .annotate_sale(&self.core.sale_id, &observation)
            .await?;
        warn!(
            sale_id = %self.core.sale_id,
            supervisor = %authorization.supervisor_name,
            remaining = %self.totals().await.remaining,
            "Goods released without payment"
        );
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Cancels the sale at the sales service and closes the session.
    pub async fn cancel_sale(&self) -> CheckoutResult<()> {
        self.core.ensure_open()?;
        if self.flow().await.is_some() {
            return Err(CheckoutError::FlowAlreadyActive);
        }
        self.resolver.cancel(&self.core.sale_id).await?;
        self.close().await;
        Ok(())
    }

    /// Closes the session. An active flow ends with a `FlowClosed` notice.
    pub async fn close(&self) {
        if self.core.is_closed() {
            return;
        }
        self.cancel_poller();
        self.stop_settlement_watch();
        self.core.end_active_flow(PollOutcome::Cancelled).await;
        if self.core.mark_closed() {
            info!(sale_id = %self.core.sale_id, "Checkout session closed");
        }
    }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) {
        if !self.core.mark_closed() {
            return;
        }
        let handle = self
            .poller
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(handle) = self
            .watcher
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.cancel();
        }
        if let Ok(mut state) = self.core.state.try_write() {
            self.core.end_flow_locked(&mut state, PollOutcome::Superseded);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::events::Notice;
    use crate::testing::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use vitrina_core::{
        ConfirmationState, FlowStatus, Origin, PaymentSnapshot, PendingSale, SettlementStatus,
    };

    async fn open(backend: &Arc<FakeBackend>, emitter: &Arc<RecordingEmitter>) -> CheckoutSession {
        CheckoutSession::open(
            backend.clone(),
            emitter.clone(),
            test_config(),
            SaleRef::Id(SALE_ID.into()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_cash_scenario_submits_and_settles() {
        let backend = FakeBackend::shared(money(1000));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        session.add_payment(PaymentMethod::Cash, money(400)).await.unwrap();
        assert_eq!(session.totals().await.remaining, money(600));
        session.add_payment(PaymentMethod::Cash, money(600)).await.unwrap();
        assert_eq!(session.totals().await.remaining, Money::zero());

        backend.push_snapshot(snapshot(vec![
            remote(PaymentMethod::Cash, 400, ConfirmationState::Approved),
            remote(PaymentMethod::Cash, 600, ConfirmationState::Approved),
        ]));

        let outcome = session.submit().await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                count: 2,
                amount: money(1000)
            }
        );
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);

        let entries = session.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|c| c.origin == Origin::Remote));
        assert_eq!(session.totals().await.uncommitted_count, 0);
        assert_eq!(session.totals().await.paid, money(1000));

        assert_eq!(session.submit().await.unwrap(), SubmitOutcome::AlreadyCovered);
        assert!(emitter
            .notices()
            .contains(&Notice::SaleSettled { sale_id: SALE_ID.into() }));
    }

    #[tokio::test]
    async fn test_submit_refreshes_cached_sale() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.add_payment(PaymentMethod::Cash, money(400)).await.unwrap();
        *backend.revised_total.lock().unwrap() = Some(money(1200));
        backend.push_snapshot(PaymentSnapshot {
            entries: vec![remote(PaymentMethod::Cash, 400, ConfirmationState::Approved)],
            total: Some(money(1200)),
        });

        session.submit().await.unwrap();
        let totals = session.totals().await;
        assert_eq!(totals.total, money(1200));
        assert_eq!(totals.remaining, money(800));
        assert_eq!(session.sale().await.map(|s| s.total), Some(totals.total));
    }

    #[tokio::test]
    async fn test_checkout_link_for_remaining_balance() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.add_payment(PaymentMethod::Cash, money(400)).await.unwrap();
        let remaining = session.totals().await.remaining;
        let link = session.checkout_link(remaining).await.unwrap();
        assert_eq!(link.amount, money(600));
        assert!(link.url.contains(SALE_ID));
        assert_eq!(link.preference_id.as_deref(), Some("pref-1042"));
        assert_eq!(session.flow().await, None);

        backend.blank_link.store(true, Ordering::SeqCst);
        assert!(matches!(
            session.checkout_link(remaining).await,
            Err(CheckoutError::GatewayInitiationFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_watch_after_release() {
        let backend = FakeBackend::shared(money(1000));
        backend.push_settlement(SettlementStatus::Pending);
        backend.push_settlement(SettlementStatus::Paid);
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        let token = session
            .authorize(GatedAction::ReleaseWithoutPayment, "7", SUPERVISOR_PIN)
            .await
            .unwrap();
        session.release_without_payment(&token).await.unwrap();

        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            1000,
            ConfirmationState::Approved,
        )]));
        assert_eq!(session.watch_settlement().await.unwrap(), SettlementOutcome::Paid);
        assert_eq!(backend.settlement_calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.totals().await.remaining, Money::zero());
        assert!(emitter
            .notices()
            .contains(&Notice::SaleSettled { sale_id: SALE_ID.into() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_watch_stops_on_request_and_on_close() {
        let backend = FakeBackend::shared(money(1000));
        let session = Arc::new(open(&backend, &RecordingEmitter::shared()).await);

        let watching = Arc::clone(&session);
        let task = tokio::spawn(async move { watching.watch_settlement().await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        session.stop_settlement_watch();
        assert_eq!(task.await.unwrap().unwrap(), SettlementOutcome::Cancelled);
        assert_eq!(backend.settlement_calls.load(Ordering::SeqCst), 3);

        let watching = Arc::clone(&session);
        let task = tokio::spawn(async move { watching.watch_settlement().await });
        tokio::time::sleep(Duration::from_secs(4)).await;
        session.close().await;
        assert_eq!(task.await.unwrap().unwrap(), SettlementOutcome::Cancelled);
        assert!(matches!(
            session.watch_settlement().await,
            Err(CheckoutError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_add_exceeding_balance() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.add_payment(PaymentMethod::Cash, money(300)).await.unwrap();
        let err = session
            .add_payment(PaymentMethod::Cash, money(800))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::ExceedsBalance { .. }));
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_amount_is_held_from_manual_payments() {
        let backend = FakeBackend::shared(money(500));
        backend.push_snapshot(snapshot(vec![]));
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            500,
            ConfirmationState::Approved,
        )]));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.start_qr_flow(money(500)).await.unwrap();
        match session.add_payment(PaymentMethod::Cash, money(500)).await {
            Err(CheckoutError::ExceedsBalance { amount, remaining }) => {
                assert_eq!(amount, money(500));
                assert_eq!(remaining, Money::zero());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.entries().await.is_empty());

        assert_eq!(
            session.wait_for_flow().await.unwrap(),
            FlowResolution::Approved { amount: money(500) }
        );
        let totals = session.totals().await;
        assert_eq!(totals.paid, money(500));
        assert_eq!(totals.overpaid, Money::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_flow_leaves_rest_for_manual_payments() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.start_qr_flow(money(600)).await.unwrap();
        session.add_payment(PaymentMethod::Cash, money(400)).await.unwrap();
        assert!(matches!(
            session.add_payment(PaymentMethod::Cash, money(1)).await,
            Err(CheckoutError::ExceedsBalance { .. })
        ));

        session.close_flow().await.unwrap();
        session.add_payment(PaymentMethod::Cash, money(600)).await.unwrap();
        assert_eq!(session.totals().await.remaining, Money::zero());
    }

    #[tokio::test]
    async fn test_add_payment_input_parses_amount() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session
            .add_payment_input(PaymentMethod::Debit, "250.50")
            .await
            .unwrap();
        assert_eq!(session.totals().await.paid, Money::from_cents(25_050));

        let err = session
            .add_payment_input(PaymentMethod::Debit, "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_gateway_add_asks_for_flow() {
        let backend = FakeBackend::shared(money(500));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        let outcome = session
            .add_payment(PaymentMethod::Gateway, money(500))
            .await
            .unwrap();
        assert_eq!(outcome, AddOutcome::GatewayRequested { amount: money(500) });
        assert!(session.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_payment_restores_balance() {
        let backend = FakeBackend::shared(money(1000));
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Transfer,
            100,
            ConfirmationState::Approved,
        )]));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.add_payment(PaymentMethod::Cash, money(250)).await.unwrap();
        assert_eq!(session.totals().await.remaining, money(650));

        let removed = session.remove_payment(1).await.unwrap();
        assert_eq!(removed.amount, money(250));
        assert_eq!(session.totals().await.remaining, money(900));

        assert!(matches!(
            session.remove_payment(0).await,
            Err(CheckoutError::Immutable { index: 0 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_scenario_approved() {
        let backend = FakeBackend::shared(money(500));
        backend.push_snapshot(snapshot(vec![]));
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            500,
            ConfirmationState::Approved,
        )]));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        let flow = session.start_qr_flow(money(500)).await.unwrap();
        assert_eq!(flow.status, FlowStatus::AwaitingQrScan);
        assert!(flow.display_payload.as_deref().is_some_and(|p| !p.is_empty()));
        assert_eq!(session.flow().await, Some(flow));

        let resolution = session.wait_for_flow().await.unwrap();
        assert_eq!(resolution, FlowResolution::Approved { amount: money(500) });
        assert_eq!(session.flow().await, None);
        assert_eq!(session.totals().await.paid, money(500));

        let notices = emitter.notices();
        assert!(notices.contains(&Notice::GatewayApproved { amount: money(500) }));
        assert!(notices.contains(&Notice::SaleSettled { sale_id: SALE_ID.into() }));
        assert_eq!(emitter.last_flow(), Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_flow_ends_with_error() {
        let backend = FakeBackend::shared(money(500));
        backend.push_snapshot(snapshot(vec![]));
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            500,
            ConfirmationState::Rejected,
        )]));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        session.start_qr_flow(money(500)).await.unwrap();
        let err = session.wait_for_flow().await.unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayRejected { amount } if amount == money(500)));
        assert!(!err.is_retryable());
        assert_eq!(session.flow().await, None);
        assert_eq!(session.totals().await.paid, Money::zero());
        assert!(emitter
            .notices()
            .contains(&Notice::GatewayRejected { amount: money(500) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_times_out_at_ceiling() {
        let backend = FakeBackend::shared(money(500));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;
        let ceiling = test_config().poll_ceiling();

        let started = tokio::time::Instant::now();
        session.start_qr_flow(money(500)).await.unwrap();
        let err = session.wait_for_flow().await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CheckoutError::PollingTimeout { after_secs: 600 }));
        assert!(elapsed >= ceiling, "timed out early after {elapsed:?}");
        assert!(elapsed < ceiling + Duration::from_secs(1), "timed out late after {elapsed:?}");
        assert_eq!(session.flow().await, None);
        assert!(emitter.notices().contains(&Notice::GatewayTimedOut {
            amount: money(500),
            waited_secs: 600
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_flow_is_rejected() {
        let backend = FakeBackend::shared(money(500));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.start_qr_flow(money(200)).await.unwrap();
        assert!(matches!(
            session.start_qr_flow(money(100)).await,
            Err(CheckoutError::FlowAlreadyActive)
        ));
        let device = session.devices().await.unwrap()[0].id.clone();
        assert!(matches!(
            session.start_terminal_flow(money(100), &device).await,
            Err(CheckoutError::FlowAlreadyActive)
        ));
        assert_eq!(session.flow().await.map(|f| f.amount), Some(money(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flow_reports_not_cancelled() {
        let backend = FakeBackend::shared(money(500));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        session.start_qr_flow(money(500)).await.unwrap();
        session.close_flow().await.unwrap();

        assert_eq!(session.flow().await, None);
        assert_eq!(session.wait_for_flow().await.unwrap(), FlowResolution::Closed);
        assert!(emitter
            .notices()
            .contains(&Notice::FlowClosed { amount: money(500) }));
        assert!(matches!(
            session.close_flow().await,
            Err(CheckoutError::NoActiveFlow)
        ));

        // a new flow may start once the slot is free
        session.start_qr_flow(money(500)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_flow_approved() {
        let backend = FakeBackend::shared(money(800));
        backend.push_snapshot(snapshot(vec![]));
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            300,
            ConfirmationState::Approved,
        )]));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        assert!(matches!(
            session.start_terminal_flow(money(300), "  ").await,
            Err(CheckoutError::MissingDevice)
        ));

        let devices = session.devices().await.unwrap();
        let flow = session
            .start_terminal_flow(money(300), &devices[0].id)
            .await
            .unwrap();
        assert_eq!(flow.status, FlowStatus::AwaitingTerminal);
        assert_eq!(flow.device_id.as_deref(), Some(devices[0].id.as_str()));
        assert_eq!(backend.terminal_orders.lock().unwrap().len(), 1);

        assert_eq!(
            session.wait_for_flow().await.unwrap(),
            FlowResolution::Approved { amount: money(300) }
        );
        assert_eq!(session.totals().await.remaining, money(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initiation_leaves_no_flow() {
        let backend = FakeBackend::shared(money(500));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        backend.fail_gateway.store(true, Ordering::SeqCst);
        let err = session.start_qr_flow(money(500)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayInitiationFailed(_)));
        assert_eq!(session.flow().await, None);
        assert!(session.entries().await.is_empty());
        assert!(matches!(
            session.wait_for_flow().await,
            Err(CheckoutError::NoActiveFlow)
        ));

        backend.fail_gateway.store(false, Ordering::SeqCst);
        assert!(session.start_qr_flow(money(500)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_resolves_active_flow() {
        let backend = FakeBackend::shared(money(500));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.start_qr_flow(money(500)).await.unwrap();
        backend.push_snapshot(snapshot(vec![remote(
            PaymentMethod::Gateway,
            500,
            ConfirmationState::Approved,
        )]));

        let totals = session.refresh().await.unwrap();
        assert_eq!(totals.paid, money(500));
        assert_eq!(session.flow().await, None);
        assert_eq!(
            session.wait_for_flow().await.unwrap(),
            FlowResolution::Approved { amount: money(500) }
        );
    }

    #[tokio::test]
    async fn test_submit_failure_keeps_local_payments() {
        let backend = FakeBackend::shared(money(1000));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        session.add_payment(PaymentMethod::Cash, money(400)).await.unwrap();
        backend.fail_submit.store(true, Ordering::SeqCst);

        let err = session.submit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.totals().await.uncommitted_count, 1);
        assert!(matches!(
            emitter.notices().last(),
            Some(Notice::SubmitFailed { .. })
        ));

        backend.fail_submit.store(false, Ordering::SeqCst);
        assert!(matches!(
            session.submit().await.unwrap(),
            SubmitOutcome::Submitted { count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_nothing_to_submit_with_balance_due() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        match session.submit().await {
            Err(CheckoutError::NothingToSubmit { remaining }) => {
                assert_eq!(remaining, money(1000))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_by_customer_dni() {
        let backend = FakeBackend::shared(money(1000));
        backend.pending.lock().unwrap().extend([
            PendingSale {
                sale_id: "77".into(),
                total: money(1000),
            },
            PendingSale {
                sale_id: "12".into(),
                total: money(50),
            },
        ]);

        let session = CheckoutSession::open(
            backend.clone(),
            RecordingEmitter::shared(),
            test_config(),
            SaleRef::CustomerDni("30.123.456".into()),
        )
        .await
        .unwrap();
        assert_eq!(session.sale_id(), "77");
        assert_eq!(session.sale().await.map(|s| s.total), Some(money(1000)));
    }

    #[tokio::test]
    async fn test_open_unknown_customer_fails() {
        let backend = FakeBackend::shared(money(1000));

        let result = CheckoutSession::open(
            backend.clone(),
            RecordingEmitter::shared(),
            test_config(),
            SaleRef::CustomerDni("30123456".into()),
        )
        .await;
        assert!(matches!(result, Err(CheckoutError::SaleNotFound(_))));

        let result = CheckoutSession::open(
            backend,
            RecordingEmitter::shared(),
            test_config(),
            SaleRef::CustomerDni("30A23456".into()),
        )
        .await;
        assert!(matches!(result, Err(CheckoutError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_release_without_payment_writes_observation() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        let token = session
            .authorize(GatedAction::ReleaseWithoutPayment, "7", SUPERVISOR_PIN)
            .await
            .unwrap();
        session.release_without_payment(&token).await.unwrap();
        assert_eq!(
            backend.observations.lock().unwrap().as_slice(),
            ["AUTORIZADO RETIRO SIN PAGO POR: Laura Gómez".to_string()]
        );

        assert!(matches!(
            session.authorize_discount(&token),
            Err(CheckoutError::Auth(AuthError::Denied))
        ));
    }

    #[tokio::test]
    async fn test_discount_needs_discount_token() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        let token = session
            .authorize(GatedAction::ApplyDiscount, "7", SUPERVISOR_PIN)
            .await
            .unwrap();
        session.authorize_discount(&token).unwrap();
        assert!(session.release_without_payment(&token).await.is_err());
        assert!(backend.observations.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_session_ends_flow_and_rejects_calls() {
        let backend = FakeBackend::shared(money(500));
        let emitter = RecordingEmitter::shared();
        let session = open(&backend, &emitter).await;

        session.start_qr_flow(money(500)).await.unwrap();
        session.close().await;

        assert!(session.is_closed());
        assert_eq!(session.flow().await, None);
        assert!(emitter
            .notices()
            .contains(&Notice::FlowClosed { amount: money(500) }));
        assert!(matches!(
            session.add_payment(PaymentMethod::Cash, money(1)).await,
            Err(CheckoutError::SessionClosed)
        ));
        assert!(matches!(
            session.refresh().await,
            Err(CheckoutError::SessionClosed)
        ));

        // the poller is gone: no fetches once the clock moves on
        let fetches = backend.fetch_count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.fetch_count.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test]
    async fn test_cancel_sale_closes_session() {
        let backend = FakeBackend::shared(money(1000));
        let session = open(&backend, &RecordingEmitter::shared()).await;

        session.cancel_sale().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(backend.cancelled.lock().unwrap().as_slice(), [SALE_ID.to_string()]);
        assert_eq!(session.sale().await, None);
    }
}
