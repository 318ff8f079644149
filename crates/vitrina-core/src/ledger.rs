//! # Payment Ledger
//!
//! The ordered collection of payment contributions for the active sale and
//! its derived totals.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  entries: [ REMOTE … (server order) | LOCAL … (insertion order) ]       │
//! │                                                                         │
//! │  REMOTE   replaced wholesale by merge_remote(); never removable         │
//! │  LOCAL    add() appends, remove() deletes while unsubmitted             │
//! │           mark_submitted() freezes them after a successful batch        │
//! │           merge_remote() drops the frozen ones (server now has them)    │
//! │                                                                         │
//! │  paid      = Σ APPROVED                                                 │
//! │  remaining = max(0, total − paid)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Optimistic Local Commit
//! LOCAL manual contributions count as APPROVED from the moment they are
//! added, so the balance drops before the batch reaches the server. A failed
//! submit keeps them in place for a retry.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use crate::types::{
    ConfirmationState, Contribution, LedgerTotals, Origin, PaymentMethod, RemoteContribution,
};
use crate::validation::validate_payment_amount;
use crate::AMOUNT_TOLERANCE;

/// Result of [`PaymentLedger::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A LOCAL/APPROVED entry was appended.
    Recorded { id: String },
    /// Gateway payments are not appended here; the caller starts a flow.
    GatewayRequested { amount: Money },
}

/// Payment contributions of one sale.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLedger {
    total: Money,
    entries: Vec<Contribution>,
}

impl PaymentLedger {
    /// Creates an empty ledger for a sale total.
    pub fn new(total: Money) -> Self {
        PaymentLedger {
            total,
            entries: Vec::new(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn total(&self) -> Money {
        self.total
    }

    #[inline]
    pub fn entries(&self) -> &[Contribution] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of APPROVED contributions.
    pub fn total_paid(&self) -> Money {
        self.sum_where(|c| c.state == ConfirmationState::Approved)
    }

    /// Sum of PENDING contributions.
    pub fn pending(&self) -> Money {
        self.sum_where(|c| c.state == ConfirmationState::Pending)
    }

    /// `max(0, total − total_paid())`.
    pub fn remaining(&self) -> Money {
        self.total.clamped_sub(self.total_paid())
    }

    /// `max(0, total_paid() − total)`.
    pub fn overpaid(&self) -> Money {
        self.total_paid().clamped_sub(self.total)
    }

    /// Remaining balance is within the rounding tolerance.
    pub fn is_settled(&self) -> bool {
        self.remaining() <= AMOUNT_TOLERANCE
    }

    /// Sum of APPROVED entries that came from the server.
    pub fn remote_paid(&self) -> Money {
        self.sum_where(|c| c.origin == Origin::Remote && c.is_approved())
    }

    /// LOCAL, unsubmitted, manual entries: the next batch to submit.
    pub fn uncommitted(&self) -> Vec<&Contribution> {
        self.entries
            .iter()
            .filter(|c| c.is_mutable() && !c.method.is_gateway())
            .collect()
    }

    /// Amounts of APPROVED gateway entries, in ledger order.
    pub fn approved_gateway_amounts(&self) -> Vec<Money> {
        self.entries
            .iter()
            .filter(|c| c.method.is_gateway() && c.is_approved())
            .map(|c| c.amount)
            .collect()
    }

    /// Snapshot of every derived aggregate.
    pub fn totals(&self) -> LedgerTotals {
        LedgerTotals {
            total: self.total,
            paid: self.total_paid(),
            remaining: self.remaining(),
            overpaid: self.overpaid(),
            pending: self.pending(),
            entry_count: self.entries.len(),
            uncommitted_count: self.uncommitted().len(),
        }
    }

    fn sum_where(&self, pred: impl Fn(&Contribution) -> bool) -> Money {
        self.entries
            .iter()
            .filter(|c| pred(c))
            .map(|c| c.amount)
            .sum()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Adds a contribution.
    ///
    /// ## Rules
    /// - `amount` must be positive (`InvalidAmount`)
    /// - `amount` must not exceed `remaining() + AMOUNT_TOLERANCE`
    ///   (`ExceedsBalance`)
    /// - Manual methods append a LOCAL/APPROVED entry
    /// - `Gateway` appends nothing and asks the caller to start a flow
    ///
    /// ## Example
    /// ```rust
    /// use vitrina_core::{AddOutcome, LedgerError, Money, PaymentLedger, PaymentMethod};
    ///
    /// let mut ledger = PaymentLedger::new(Money::from_cents(100_000));
    /// ledger.add(PaymentMethod::Cash, Money::from_cents(30_000)).unwrap();
    ///
    /// let err = ledger.add(PaymentMethod::Cash, Money::from_cents(80_000)).unwrap_err();
    /// assert!(matches!(err, LedgerError::ExceedsBalance { .. }));
    ///
    /// let outcome = ledger.add(PaymentMethod::Gateway, Money::from_cents(70_000)).unwrap();
    /// assert_eq!(outcome, AddOutcome::GatewayRequested { amount: Money::from_cents(70_000) });
    /// ```
    pub fn add(&mut self, method: PaymentMethod, amount: Money) -> LedgerResult<AddOutcome> {
        self.add_with_hold(method, amount, Money::zero())
    }

    /// [`add`](Self::add) while `held` of the balance is promised to a
    /// gateway flow that has not reported yet.
    pub fn add_with_hold(
        &mut self,
        method: PaymentMethod,
        amount: Money,
        held: Money,
    ) -> LedgerResult<AddOutcome> {
        self.check_amount_with_hold(amount, held)?;

        if method.is_gateway() {
            return Ok(AddOutcome::GatewayRequested { amount });
        }

        let id = Uuid::new_v4().to_string();
        self.entries.push(Contribution {
            id: id.clone(),
            method,
            amount,
            origin: Origin::Local,
            state: ConfirmationState::Approved,
            submitted: false,
            reference: None,
            recorded_at: Utc::now(),
        });
        Ok(AddOutcome::Recorded { id })
    }

    /// Checks an amount against the positivity and balance rules without
    /// recording anything.
    pub fn check_amount(&self, amount: Money) -> LedgerResult<()> {
        self.check_amount_with_hold(amount, Money::zero())
    }

    /// Balance still open to new payments once `held` is set aside.
    pub fn available(&self, held: Money) -> Money {
        self.remaining().clamped_sub(held)
    }

    /// Balance rule against [`available`](Self::available); the error
    /// reports the available amount as `remaining`.
    pub fn check_amount_with_hold(&self, amount: Money, held: Money) -> LedgerResult<()> {
        validate_payment_amount(amount)?;

        let remaining = self.available(held);
        if amount > remaining + AMOUNT_TOLERANCE {
            return Err(LedgerError::ExceedsBalance { amount, remaining });
        }
        Ok(())
    }

    /// Removes the entry at `index`, returning it.
    ///
    /// The removed amount is the balance freed for the amount input.
    pub fn remove(&mut self, index: usize) -> LedgerResult<Contribution> {
        let entry = self
            .entries
            .get(index)
            .ok_or(LedgerError::EntryNotFound { index })?;

        if !entry.is_mutable() {
            return Err(LedgerError::Immutable { index });
        }
        Ok(self.entries.remove(index))
    }

    /// Freezes the given LOCAL entries after a successful batch submit.
    ///
    /// Returns how many entries were flipped.
    pub fn mark_submitted(&mut self, ids: &[String]) -> usize {
        let mut flipped = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|c| c.origin == Origin::Local && ids.contains(&c.id))
        {
            if !entry.submitted {
                entry.submitted = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Replaces the REMOTE subset with the authoritative list.
    ///
    /// Submitted LOCAL entries are dropped with it (the list now carries
    /// them); unsubmitted LOCAL entries are kept after the remote ones.
    /// Applying the same list twice leaves the same derived totals.
    pub fn merge_remote(&mut self, remote: &[RemoteContribution]) {
        let now = Utc::now();
        let mut merged: Vec<Contribution> = remote
            .iter()
            .enumerate()
            .map(|(pos, r)| Contribution {
                id: r.id.clone().unwrap_or_else(|| format!("remote-{pos}")),
                method: r.method,
                amount: r.amount,
                origin: Origin::Remote,
                state: r.state,
                submitted: false,
                reference: None,
                recorded_at: now,
            })
            .collect();

        merged.extend(self.entries.drain(..).filter(|c| c.is_mutable()));
        self.entries = merged;
    }

    /// Refreshes the sale total from the server.
    pub fn set_total(&mut self, total: Money) {
        self.total = total;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
