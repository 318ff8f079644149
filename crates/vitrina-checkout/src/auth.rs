//! # Authorization Gate
//!
//! Supervisor PIN challenge in front of sensitive checkout actions.
//!
//! ```text
//!   challenge(action, supervisor_id, pin)
//!     │ PIN empty / non-numeric / > 8 digits ──► InvalidPin  (no call)
//!     ▼
//!   GET  /api/users/admins ── empty ──► NoSupervisors
//!     │                     └ unknown id ──► Denied
//!     ▼
//!   POST /api/users/verify-supervisor ── mismatch ──► Denied
//!     │
//!     ▼
//!   Authorization { supervisor_name, action, granted_at }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use ts_rs::TS;

use vitrina_core::validation::validate_pin;
use vitrina_core::Supervisor;

use crate::backend::PaymentBackend;
use crate::error::{AuthError, CheckoutResult};

/// Actions that need a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GatedAction {
    /// Enables the discount amount field.
    ApplyDiscount,
    /// Hands over goods on an unpaid or zero-payment sale.
    ReleaseWithoutPayment,
}

impl GatedAction {
    pub fn label(&self) -> &'static str {
        match self {
            GatedAction::ApplyDiscount => "Apply discount",
            GatedAction::ReleaseWithoutPayment => "Release goods without payment",
        }
    }
}

/// Proof that a supervisor approved one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct Authorization {
    pub supervisor_name: String,
    pub action: GatedAction,
    #[ts(as = "String")]
    pub granted_at: DateTime<Utc>,
}

impl Authorization {
    /// Checks the token was granted for `action`.
    pub fn require(&self, action: GatedAction) -> Result<(), AuthError> {
        if self.action != action {
            warn!(
                granted = self.action.label(),
                requested = action.label(),
                "Authorization used for another action"
            );
            return Err(AuthError::Denied);
        }
        Ok(())
    }
}

pub struct AuthorizationGate {
    backend: Arc<dyn PaymentBackend>,
}

impl AuthorizationGate {
    pub fn new(backend: Arc<dyn PaymentBackend>) -> Self {
        AuthorizationGate { backend }
    }

    /// Supervisors the cashier can pick from.
    pub async fn supervisors(&self) -> CheckoutResult<Vec<Supervisor>> {
        let supervisors = self.backend.list_supervisors().await?;
        if supervisors.is_empty() {
            return Err(AuthError::NoSupervisors.into());
        }
        Ok(supervisors)
    }

    pub async fn challenge(
        &self,
        action: GatedAction,
        supervisor_id: &str,
        pin: &str,
    ) -> CheckoutResult<Authorization> {
        let pin = pin.trim();
        validate_pin(pin).map_err(|e| AuthError::InvalidPin(e.to_string()))?;

        let supervisors = self.supervisors().await?;
        if !supervisors.iter().any(|s| s.id == supervisor_id) {
            warn!(supervisor_id, action = action.label(), "Unknown supervisor");
            return Err(AuthError::Denied.into());
        }

        match self.backend.verify_supervisor(supervisor_id, pin).await? {
            Some(supervisor_name) => {
                info!(supervisor = %supervisor_name, action = action.label(), "Action authorized");
                Ok(Authorization {
                    supervisor_name,
                    action,
                    granted_at: Utc::now(),
                })
            }
            None => {
                warn!(supervisor_id, action = action.label(), "Supervisor PIN rejected");
                Err(AuthError::Denied.into())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckoutError;
    use crate::testing::*;
    use std::sync::atomic::Ordering;

    fn denied(result: CheckoutResult<Authorization>) -> bool {
        matches!(result, Err(CheckoutError::Auth(AuthError::Denied)))
    }

    #[tokio::test]
    async fn test_valid_pin_grants_action() {
        let gate = AuthorizationGate::new(FakeBackend::shared(money(1)));

        let token = gate
            .challenge(GatedAction::ApplyDiscount, "7", SUPERVISOR_PIN)
            .await
            .unwrap();
        assert_eq!(token.supervisor_name, "Laura Gómez");
        assert_eq!(token.action, GatedAction::ApplyDiscount);
        assert!(token.require(GatedAction::ApplyDiscount).is_ok());
        assert_eq!(
            token.require(GatedAction::ReleaseWithoutPayment),
            Err(AuthError::Denied)
        );
    }

    #[tokio::test]
    async fn test_malformed_pin_never_reaches_service() {
        let backend = FakeBackend::shared(money(1));
        let gate = AuthorizationGate::new(backend.clone());

        for pin in ["", "12a4", "123456789"] {
            let result = gate.challenge(GatedAction::ApplyDiscount, "7", pin).await;
            assert!(
                matches!(result, Err(CheckoutError::Auth(AuthError::InvalidPin(_)))),
                "pin {pin:?}"
            );
        }
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_pin_or_unknown_supervisor_is_denied() {
        let backend = FakeBackend::shared(money(1));
        let gate = AuthorizationGate::new(backend.clone());

        assert!(denied(
            gate.challenge(GatedAction::ReleaseWithoutPayment, "7", "0000")
                .await
        ));
        assert!(denied(
            gate.challenge(GatedAction::ReleaseWithoutPayment, "99", SUPERVISOR_PIN)
                .await
        ));
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_supervisors() {
        let backend = FakeBackend::shared(money(1));
        backend.supervisors.lock().unwrap().clear();
        let gate = AuthorizationGate::new(backend);

        assert!(matches!(
            gate.challenge(GatedAction::ApplyDiscount, "7", SUPERVISOR_PIN).await,
            Err(CheckoutError::Auth(AuthError::NoSupervisors))
        ));
    }

    #[test]
    fn test_action_labels_are_distinct() {
        assert_ne!(
            GatedAction::ApplyDiscount.label(),
            GatedAction::ReleaseWithoutPayment.label()
        );
    }
}
