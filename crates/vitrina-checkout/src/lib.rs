//! # vitrina-checkout: Payment Reconciliation Engine for Vitrina POS
//!
//! This crate drives the checkout screen of the lab's point of sale: it
//! collects manual payments, starts gateway payments (QR or card terminal)
//! and reconciles the local ledger with the payment service's record.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Checkout Session (per sale)                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 CheckoutSession (facade, owned by UI)             │  │
//! │  │   open ─ add/remove ─ submit ─ start flow ─ wait ─ close          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ Arc<SessionCore>                        │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Submitter      │  │ FlowInitiator  │  │ ReconciliationPoller   │    │
//! │  │                │  │                │  │                        │    │
//! │  │ One batch of   │  │ QR order or    │  │ Tokio task, 3 s tick,  │    │
//! │  │ LOCAL payments │  │ terminal push  │  │ 10 min ceiling, seq +  │    │
//! │  │ in-flight flag │  │ one flow slot  │  │ generation guarded     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐                                │
//! │  │ SaleResolver   │  │ AuthGate       │    PaymentBackend trait        │
//! │  │ id / DNI       │  │ supervisor PIN │    └── HttpBackend (reqwest)   │
//! │  └────────────────┘  └────────────────┘                                │
//! │                                                                         │
//! │  EVENTS (to the frontend):                                             │
//! │  • "checkout://totals" - derived totals after every ledger change      │
//! │  • "checkout://flow"   - active gateway flow, null once it ends        │
//! │  • "checkout://notice" - approved / rejected / timed out / closed ...  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`session`] - `CheckoutSession`, the per-sale facade
//! - [`submitter`] - Manual settlement batch submit
//! - [`gateway`] - QR and terminal flow initiation, hosted checkout links
//! - [`poller`] - Reconciliation poller task and settlement watcher
//! - [`resolver`] - Sale lookup by id or customer DNI
//! - [`auth`] - Supervisor authorization gate
//! - [`backend`] - `PaymentBackend` trait and its HTTP implementation
//! - [`protocol`] - Wire shapes of the external services
//! - [`config`] - Checkout configuration (TOML + env)
//! - [`events`] - Notices and the event emitter trait
//! - [`error`] - Checkout error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vitrina_checkout::{CheckoutConfig, CheckoutSession, HttpBackend, NoOpEmitter, SaleRef};
//!
//! let config = CheckoutConfig::load_or_default(None);
//! let backend = Arc::new(HttpBackend::from_config(&config)?);
//!
//! let session =
//!     CheckoutSession::open(backend, Arc::new(NoOpEmitter), config, SaleRef::Id("1042".into()))
//!         .await?;
//! println!("Remaining: {}", session.totals().await.remaining);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod poller;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod submitter;

mod state;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{Authorization, AuthorizationGate, GatedAction};
pub use backend::{HttpBackend, ManualPayment, PaymentBackend};
pub use config::{BackendSettings, CheckoutConfig, GatewaySettings, StoreSettings};
pub use error::{AuthError, CheckoutError, CheckoutResult};
pub use events::{CheckoutEventEmitter, NoOpEmitter, Notice};
pub use gateway::GatewayFlowInitiator;
pub use poller::{PollOutcome, PollerHandle, SettlementOutcome, SettlementWatcher};
pub use resolver::{SaleRef, SaleResolver};
pub use session::{CheckoutSession, FlowResolution};
pub use submitter::{ManualSettlementSubmitter, SubmitOutcome};
