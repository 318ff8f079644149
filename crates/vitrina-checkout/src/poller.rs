//! # Reconciliation Poller
//!
//! Background task that watches the authoritative payment list while a
//! gateway flow is waiting for the customer.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   start_qr / start_terminal ──► spawn(run)                              │
//! │                                                                         │
//! │   every interval (3 s)          ceiling (10 min)        PollerHandle    │
//! │        │                              │                   .cancel()     │
//! │        ▼                              ▼                      │          │
//! │   fetch payments ──► apply      TimedOut                 Cancelled      │
//! │        │                                                                │
//! │        ├── Rejected  ─┐                                                 │
//! │        ├── Approved  ─┼─► flow slot emptied, outcome published          │
//! │        ├── Refresh / Unchanged ─► keep polling                          │
//! │        └── fetch error ─► warn, keep polling                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The per-tick fetch is raced against cancellation and the ceiling, so a
//! slow request can neither delay the timeout nor land after a cancel.
//!
//! ## Settlement Watcher
//! After the customer leaves for a hosted checkout page, or goods are
//! released without payment, nothing in this session holds a flow. The
//! [`SettlementWatcher`] follows `estado-pago` of the sale on the same
//! interval, ceiling and [`PollerHandle`] until it is PAGADA or the payment
//! is RECHAZADO.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use vitrina_core::{Money, SettlementStatus};

use crate::error::CheckoutError;
use crate::events::Notice;
use crate::state::{Applied, SessionCore};

/// How a poller (and its flow) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollOutcome {
    Approved { amount: Money },
    Rejected { amount: Money },
    /// Ceiling reached; the gateway outcome is unknown.
    TimedOut,
    /// Closed by the user.
    Cancelled,
    /// The flow ended elsewhere, or the session was closed.
    Superseded,
}

// =============================================================================
// Poller
// =============================================================================

pub struct ReconciliationPoller {
    core: Arc<SessionCore>,
    epoch: u64,
    interval: Duration,
    deadline: Instant,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running poller.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl PollerHandle {
    /// Asks the poller to stop. Safe to call more than once.
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// True once the poller task has exited.
    pub fn is_finished(&self) -> bool {
        self.shutdown_tx.is_closed()
    }
}

impl ReconciliationPoller {
    /// Creates a poller for flow `epoch`; the ceiling starts counting now.
    pub(crate) fn new(
        core: Arc<SessionCore>,
        epoch: u64,
        interval: Duration,
        ceiling: Duration,
    ) -> (Self, PollerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let poller = ReconciliationPoller {
            core,
            epoch,
            interval,
            deadline: Instant::now() + ceiling,
            shutdown_rx,
        };
        (poller, PollerHandle { shutdown_tx })
    }

    /// Spawns the poller; the flow is concluded when it stops on its own.
    pub(crate) fn spawn(self) {
        let core = Arc::clone(&self.core);
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = self.run().await;
            core.conclude(epoch, outcome).await;
        });
    }

    /// Runs until the flow resolves, times out or is cancelled.
    pub async fn run(mut self) -> PollOutcome {
        info!(sale_id = %self.core.sale_id, epoch = self.epoch, "Reconciliation poller starting");

        let deadline = sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks: u64 = 0;
        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => break PollOutcome::Cancelled,

                _ = &mut deadline => break PollOutcome::TimedOut,

                _ = ticker.tick() => {
                    ticks += 1;
                    let fetched = tokio::select! {
                        biased;
                        _ = self.shutdown_rx.recv() => break PollOutcome::Cancelled,
                        _ = &mut deadline => break PollOutcome::TimedOut,
                        result = self.core.fetch_payments() => result,
                    };

                    let fetched = match fetched {
                        Ok(fetched) => fetched,
                        Err(e) => {
                            warn!(sale_id = %self.core.sale_id, tick = ticks, error = %e, "Payments poll failed");
                            continue;
                        }
                    };

                    match self.core.apply(fetched, Some(self.epoch)).await {
                        Ok(Applied::Ended(outcome)) => break outcome,
                        Ok(Applied::Superseded) | Err(CheckoutError::SessionClosed) => {
                            break PollOutcome::Superseded
                        }
                        Ok(Applied::Stale) | Ok(Applied::Continue) => {
                            debug!(sale_id = %self.core.sale_id, tick = ticks, "No terminal payment yet");
                        }
                        Err(e) => {
                            warn!(sale_id = %self.core.sale_id, tick = ticks, error = %e, "Failed to apply payments");
                        }
                    }
                }
            }
        };

        info!(
            sale_id = %self.core.sale_id,
            epoch = self.epoch,
            ticks,
            ?outcome,
            "Reconciliation poller stopped"
        );
        outcome
    }
}

// =============================================================================
// Settlement Watcher
// =============================================================================

/// How a [`SettlementWatcher`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Paid,
    Rejected,
    /// Ceiling reached with the sale still pending.
    TimedOut,
    /// Stopped through its handle, or the session was closed.
    Cancelled,
}

impl SettlementOutcome {
    /// The outcome a final status ends the watch with.
    pub fn from_status(status: SettlementStatus) -> Option<Self> {
        match status {
            SettlementStatus::Paid => Some(SettlementOutcome::Paid),
            SettlementStatus::Rejected => Some(SettlementOutcome::Rejected),
            SettlementStatus::Pending => None,
        }
    }
}

pub struct SettlementWatcher {
    core: Arc<SessionCore>,
    interval: Duration,
    deadline: Instant,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SettlementWatcher {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        interval: Duration,
        ceiling: Duration,
    ) -> (Self, PollerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let watcher = SettlementWatcher {
            core,
            interval,
            deadline: Instant::now() + ceiling,
            shutdown_rx,
        };
        (watcher, PollerHandle { shutdown_tx })
    }

    /// Polls the sale status until it is final, times out or is cancelled.
    pub async fn run(mut self) -> SettlementOutcome {
        let sale_id = self.core.sale_id.clone();
        info!(sale_id = %sale_id, "Settlement watcher starting");

        let deadline = sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks: u64 = 0;
        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => break SettlementOutcome::Cancelled,

                _ = &mut deadline => break SettlementOutcome::TimedOut,

                _ = ticker.tick() => {
                    if self.core.is_closed() {
                        break SettlementOutcome::Cancelled;
                    }
                    ticks += 1;
                    let status = tokio::select! {
                        biased;
                        _ = self.shutdown_rx.recv() => break SettlementOutcome::Cancelled,
                        _ = &mut deadline => break SettlementOutcome::TimedOut,
                        result = self.core.backend.settlement_status(&sale_id) => result,
                    };

                    match status {
                        Ok(status) => {
                            if let Some(outcome) = SettlementOutcome::from_status(status) {
                                break outcome;
                            }
                            debug!(sale_id = %sale_id, tick = ticks, "Sale still pending");
                        }
                        Err(e) => {
                            warn!(sale_id = %sale_id, tick = ticks, error = %e, "Settlement poll failed");
                        }
                    }
                }
            }
        };

        if !self.core.is_closed() {
            match outcome {
                SettlementOutcome::Paid => {
                    self.core.emitter.emit_notice(&Notice::SaleSettled {
                        sale_id: sale_id.clone(),
                    });
                }
                SettlementOutcome::Rejected => {
                    self.core.emitter.emit_notice(&Notice::SettlementRejected {
                        sale_id: sale_id.clone(),
                    });
                }
                SettlementOutcome::TimedOut | SettlementOutcome::Cancelled => {}
            }
        }

        info!(sale_id = %sale_id, ticks, ?outcome, "Settlement watcher stopped");
        outcome
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
