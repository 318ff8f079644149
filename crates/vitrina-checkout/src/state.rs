//! # Session State
//!
//! The shared per-sale state every checkout component works against.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ SessionCore (Arc, one per open sale)                                    │
//! │                                                                         │
//! │  state: RwLock<SessionState>                                            │
//! │          ├── ledger       PaymentLedger                                 │
//! │          ├── flow         Empty | Initiating{epoch} | Active{flow,epoch}│
//! │          └── applied_seq  highest fetch sequence merged so far          │
//! │                                                                         │
//! │  fetch_seq   ++ on every payments fetch, stamped on the result          │
//! │  generation  ++ on close; results stamped with an older one are dropped │
//! │  outcome     watch channel: FlowEnd{epoch, outcome} of the last flow    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fetch result is applied only if it is from the current generation and
//! carries a sequence newer than the last applied one, so a slow response
//! never rolls the ledger back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use vitrina_core::reconcile::evaluate;
use vitrina_core::{GatewayFlow, Money, PaymentLedger, PaymentSnapshot, PollDecision};

use crate::backend::PaymentBackend;
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::events::{CheckoutEventEmitter, Notice};
use crate::poller::PollOutcome;

// =============================================================================
// Flow Slot
// =============================================================================

/// At most one gateway flow per sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FlowSlot {
    Empty,
    /// Reserved while the gateway call is in flight.
    Initiating { epoch: u64, amount: Money },
    Active { flow: GatewayFlow, epoch: u64 },
}

impl FlowSlot {
    pub(crate) fn active_epoch(&self) -> Option<u64> {
        match self {
            FlowSlot::Active { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    pub(crate) fn active_flow(&self) -> Option<&GatewayFlow> {
        match self {
            FlowSlot::Active { flow, .. } => Some(flow),
            _ => None,
        }
    }

    fn is_initiating(&self, expected: u64) -> bool {
        matches!(self, FlowSlot::Initiating { epoch, .. } if *epoch == expected)
    }

    /// Balance promised to the gateway until the flow reports.
    pub(crate) fn held(&self) -> Money {
        match self {
            FlowSlot::Empty => Money::zero(),
            FlowSlot::Initiating { amount, .. } => *amount,
            FlowSlot::Active { flow, .. } => flow.amount,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub ledger: PaymentLedger,
    pub flow: FlowSlot,
    pub applied_seq: u64,
}

/// Last terminal outcome, tagged with the flow it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlowEnd {
    pub epoch: u64,
    pub outcome: PollOutcome,
}

/// A payments snapshot stamped at issue time.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub seq: u64,
    pub generation: u64,
    pub snapshot: PaymentSnapshot,
}

/// What applying a [`Fetched`] snapshot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// Older than the last applied snapshot; ignored.
    Stale,
    /// The flow the caller polls for is no longer the active one.
    Superseded,
    /// Merged; the flow (if any) keeps going.
    Continue,
    /// Merged and the active flow ended with this outcome.
    Ended(PollOutcome),
}

// =============================================================================
// Session Core
// =============================================================================

pub(crate) struct SessionCore {
    pub sale_id: String,
    pub state: RwLock<SessionState>,
    pub backend: Arc<dyn PaymentBackend>,
    pub emitter: Arc<dyn CheckoutEventEmitter>,
    pub config: CheckoutConfig,
    fetch_seq: AtomicU64,
    generation: AtomicU64,
    closed: AtomicBool,
    next_epoch: AtomicU64,
    outcome_tx: watch::Sender<Option<FlowEnd>>,
}

impl SessionCore {
    pub(crate) fn new(
        sale_id: String,
        ledger: PaymentLedger,
        backend: Arc<dyn PaymentBackend>,
        emitter: Arc<dyn CheckoutEventEmitter>,
        config: CheckoutConfig,
    ) -> Self {
        let (outcome_tx, _) = watch::channel(None);
        SessionCore {
            sale_id,
            state: RwLock::new(SessionState {
                ledger,
                flow: FlowSlot::Empty,
                applied_seq: 0,
            }),
            backend,
            emitter,
            config,
            fetch_seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            next_epoch: AtomicU64::new(0),
            outcome_tx,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> CheckoutResult<()> {
        if self.is_closed() {
            return Err(CheckoutError::SessionClosed);
        }
        Ok(())
    }

    /// Marks the session closed; results of calls already in flight are
    /// discarded when they land. Returns false if it was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Epoch of the most recently reserved flow (0 = none yet).
    pub(crate) fn last_epoch(&self) -> u64 {
        self.next_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<FlowEnd>> {
        self.outcome_tx.subscribe()
    }

    // =========================================================================
    // Authoritative Payments
    // =========================================================================

    /// Fetches the authoritative list, stamping sequence and generation.
    pub(crate) async fn fetch_payments(&self) -> CheckoutResult<Fetched> {
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.load(Ordering::SeqCst);
        debug!(sale_id = %self.sale_id, seq, "Fetching payments");

        let snapshot = self.backend.fetch_payments(&self.sale_id).await?;
        Ok(Fetched {
            seq,
            generation,
            snapshot,
        })
    }

    /// Fetches and applies outside of any poller.
    pub(crate) async fn refresh(&self) -> CheckoutResult<Applied> {
        self.ensure_open()?;
        let fetched = self.fetch_payments().await?;
        self.apply(fetched, None).await
    }

    /// Applies a snapshot.
    ///
    /// `owner` is the epoch of the polling flow; a snapshot fetched for a
    /// flow that is no longer active is `Superseded` and left unapplied.
    /// Without an owner, an active flow is still evaluated so a manual
    /// refresh cannot swallow the approval the poller is waiting for.
    pub(crate) async fn apply(&self, fetched: Fetched, owner: Option<u64>) -> CheckoutResult<Applied> {
        if self.is_closed() || fetched.generation != self.generation.load(Ordering::SeqCst) {
            debug!(sale_id = %self.sale_id, seq = fetched.seq, "Discarding result of closed session");
            return Err(CheckoutError::SessionClosed);
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(epoch) = owner {
            if state.flow.active_epoch() != Some(epoch) {
                return Ok(Applied::Superseded);
            }
        }

        if fetched.seq <= state.applied_seq {
            debug!(
                sale_id = %self.sale_id,
                seq = fetched.seq,
                applied = state.applied_seq,
                "Discarding out-of-order payments snapshot"
            );
            return Ok(Applied::Stale);
        }
        state.applied_seq = fetched.seq;

        let decision = match state.flow.active_flow() {
            Some(flow) => evaluate(flow, &state.ledger, &fetched.snapshot),
            None => PollDecision::Refresh,
        };
        debug!(sale_id = %self.sale_id, seq = fetched.seq, ?decision, "Payments snapshot evaluated");

        let before = state.ledger.totals();
        if let Some(total) = fetched.snapshot.total {
            state.ledger.set_total(total);
        }
        state.ledger.merge_remote(&fetched.snapshot.entries);

        let ended = match decision {
            PollDecision::Approved { amount } => Some(PollOutcome::Approved { amount }),
            PollDecision::Rejected { amount } => Some(PollOutcome::Rejected { amount }),
            PollDecision::Refresh | PollDecision::Unchanged => None,
        };
        if let Some(outcome) = ended {
            self.end_flow_locked(state, outcome);
            return Ok(Applied::Ended(outcome));
        }

        let after = state.ledger.totals();
        if after != before {
            self.emitter.emit_totals(&after);
        }
        Ok(Applied::Continue)
    }

    /// Marks a batch as submitted and moves the watermark past every fetch
    /// issued so far.
    pub(crate) async fn commit_submitted(&self, ids: &[String]) -> usize {
        let mut state = self.state.write().await;
        let flipped = state.ledger.mark_submitted(ids);
        state.applied_seq = self.fetch_seq.load(Ordering::SeqCst);
        self.emitter.emit_totals(&state.ledger.totals());
        flipped
    }

    // =========================================================================
    // Flow Slot
    // =========================================================================

    /// Reserves the flow slot for an amount that passes the balance rules.
    pub(crate) async fn reserve_flow(&self, amount: Money) -> CheckoutResult<u64> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if state.flow != FlowSlot::Empty {
            return Err(CheckoutError::FlowAlreadyActive);
        }
        state.ledger.check_amount(amount)?;

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        state.flow = FlowSlot::Initiating { epoch, amount };
        Ok(epoch)
    }

    /// Turns a reservation into an active flow.
    pub(crate) async fn activate_flow(&self, epoch: u64, flow: GatewayFlow) -> CheckoutResult<()> {
        let mut state = self.state.write().await;
        if self.is_closed() || !state.flow.is_initiating(epoch) {
            return Err(CheckoutError::SessionClosed);
        }
        self.emitter.emit_flow(Some(&flow));
        state.flow = FlowSlot::Active { flow, epoch };
        Ok(())
    }

    /// Drops a reservation whose gateway call failed.
    pub(crate) async fn release_flow(&self, epoch: u64) {
        let mut state = self.state.write().await;
        if state.flow.is_initiating(epoch) {
            state.flow = FlowSlot::Empty;
            self.emitter.emit_flow(None);
        }
    }

    /// Ends the active flow, whichever it is.
    pub(crate) async fn end_active_flow(&self, outcome: PollOutcome) -> Option<GatewayFlow> {
        let mut state = self.state.write().await;
        self.end_flow_locked(&mut state, outcome)
    }

    /// Called by the poller task once it stops on its own (timeout, cancel).
    pub(crate) async fn conclude(&self, epoch: u64, outcome: PollOutcome) {
        if self.is_closed() {
            return;
        }
        let mut state = self.state.write().await;
        if state.flow.active_epoch() == Some(epoch) {
            self.end_flow_locked(&mut state, outcome);
        }
    }

    /// Empties the slot, publishes the outcome and notifies the UI.
    pub(crate) fn end_flow_locked(
        &self,
        state: &mut SessionState,
        outcome: PollOutcome,
    ) -> Option<GatewayFlow> {
        let (flow, epoch) = match std::mem::replace(&mut state.flow, FlowSlot::Empty) {
            FlowSlot::Active { flow, epoch } => (flow, epoch),
            other => {
                state.flow = other;
                return None;
            }
        };

        info!(
            sale_id = %self.sale_id,
            epoch,
            amount = %flow.amount,
            ?outcome,
            "Gateway flow ended"
        );
        self.outcome_tx.send_replace(Some(FlowEnd { epoch, outcome }));

        let notice = match outcome {
            PollOutcome::Approved { amount } => Some(Notice::GatewayApproved { amount }),
            PollOutcome::Rejected { amount } => Some(Notice::GatewayRejected { amount }),
            PollOutcome::TimedOut => Some(Notice::GatewayTimedOut {
                amount: flow.amount,
                waited_secs: self.config.gateway.poll_ceiling_secs,
            }),
            PollOutcome::Cancelled => Some(Notice::FlowClosed {
                amount: flow.amount,
            }),
            PollOutcome::Superseded => None,
        };
        if let Some(notice) = notice {
            self.emitter.emit_notice(&notice);
        }

        self.emitter.emit_flow(None);
        self.emitter.emit_totals(&state.ledger.totals());

        if matches!(outcome, PollOutcome::Approved { .. }) && state.ledger.is_settled() {
            self.emitter.emit_notice(&Notice::SaleSettled {
                sale_id: self.sale_id.clone(),
            });
        }
        Some(flow)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
