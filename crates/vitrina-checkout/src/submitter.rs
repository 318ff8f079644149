//! # Manual Settlement Submitter
//!
//! Commits the LOCAL manual payments of a sale in one batch.
//!
//! ```text
//!   submit()
//!     │ another submit running ──► SubmitInFlight
//!     ▼
//!   uncommitted batch empty? ── remaining > ε ──► NothingToSubmit
//!     │                      └─ remaining ≤ ε ──► AlreadyCovered
//!     ▼
//!   POST /api/payments/manual
//!     ├── error ──► entries kept for a retry, SubmitFailed notice
//!     └── ok ─────► entries frozen, watermark advanced, refresh
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use vitrina_core::{Money, AMOUNT_TOLERANCE};

use crate::backend::ManualPayment;
use crate::error::{CheckoutError, CheckoutResult};
use crate::events::Notice;
use crate::state::SessionCore;

/// Result of a successful [`ManualSettlementSubmitter::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { count: usize, amount: Money },
    /// Nothing to send and the sale is already covered.
    AlreadyCovered,
}

pub struct ManualSettlementSubmitter {
    core: Arc<SessionCore>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when dropped.
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ManualSettlementSubmitter {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        ManualSettlementSubmitter {
            core,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> CheckoutResult<SubmitGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CheckoutError::SubmitInFlight)?;
        Ok(SubmitGuard(&self.in_flight))
    }

    /// Submits every uncommitted manual payment.
    pub async fn submit(&self) -> CheckoutResult<SubmitOutcome> {
        let _guard = self.acquire()?;
        self.core.ensure_open()?;
        let sale_id = self.core.sale_id.clone();

        let (batch, ids, remaining) = {
            let state = self.core.state.read().await;
            let uncommitted = state.ledger.uncommitted();
            let batch: Vec<ManualPayment> = uncommitted
                .iter()
                .map(|c| ManualPayment {
                    method: c.method,
                    amount: c.amount,
                    reference: c.reference.clone(),
                })
                .collect();
            let ids: Vec<String> = uncommitted.iter().map(|c| c.id.clone()).collect();
            (batch, ids, state.ledger.remaining())
        };

        if batch.is_empty() {
            if remaining > AMOUNT_TOLERANCE {
                return Err(CheckoutError::NothingToSubmit { remaining });
            }
            info!(sale_id = %sale_id, "Sale already covered, nothing to submit");
            self.core.emitter.emit_notice(&Notice::SaleSettled { sale_id });
            return Ok(SubmitOutcome::AlreadyCovered);
        }

        let count = batch.len();
        let amount: Money = batch.iter().map(|p| p.amount).sum();
        info!(sale_id = %sale_id, count, amount = %amount, "Submitting manual payments");

        if let Err(e) = self.core.backend.submit_manual(&sale_id, &batch).await {
            warn!(sale_id = %sale_id, error = %e, "Manual payment batch failed");
            self.core.emitter.emit_notice(&Notice::SubmitFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        let flipped = self.core.commit_submitted(&ids).await;
        info!(sale_id = %sale_id, flipped, "Manual payments recorded");
        self.core
            .emitter
            .emit_notice(&Notice::PaymentsRecorded { count, amount });

        if let Err(e) = self.core.refresh().await {
            warn!(sale_id = %sale_id, error = %e, "Refresh after submit failed");
        }

        if self.core.state.read().await.ledger.is_settled() {
            self.core.emitter.emit_notice(&Notice::SaleSettled { sale_id });
        }

        Ok(SubmitOutcome::Submitted { count, amount })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
