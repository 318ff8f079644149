//! # Checkout Configuration
//!
//! Configuration management for the checkout engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VITRINA_API_URL=https://api.vitrina.example                        │
//! │     VITRINA_POLL_INTERVAL_SECS=3                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/vitrina-pos/checkout.toml (Linux)                        │
//! │     ~/Library/Application Support/com.vitrina.pos/checkout.toml        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     localhost API, 3 s poll, 10 min ceiling, 15 s request timeout      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # checkout.toml
//! [backend]
//! base_url = "https://api.vitrina.example"
//! request_timeout_secs = 15
//!
//! [gateway]
//! branch_id = "SUCURSAL_DEFAULT"
//! poll_interval_secs = 3
//! poll_ceiling_secs = 600
//!
//! [store]
//! name = "Óptica Centro"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CheckoutError, CheckoutResult};

// =============================================================================
// Backend Settings
// =============================================================================

/// Where the sales/payments/users services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL; endpoint paths (`/api/...`) are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds). Expiry is a transient network error.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Gateway Settings
// =============================================================================

/// Gateway flow and reconciliation polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Branch identifier sent with QR orders (`sucursal_id`).
    #[serde(default = "default_branch_id")]
    pub branch_id: String,

    /// Interval between authoritative payment fetches (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Ceiling after which an unresolved flow times out (seconds).
    #[serde(default = "default_poll_ceiling")]
    pub poll_ceiling_secs: u64,
}

fn default_branch_id() -> String {
    "SUCURSAL_DEFAULT".to_string()
}

fn default_poll_interval() -> u64 {
    3
}

fn default_poll_ceiling() -> u64 {
    600
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            branch_id: default_branch_id(),
            poll_interval_secs: default_poll_interval(),
            poll_ceiling_secs: default_poll_ceiling(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Human-readable store name, shown by the probe binary.
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Main Checkout Configuration
// =============================================================================

/// Complete checkout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl CheckoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (checkout.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> CheckoutResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading checkout config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load checkout config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> CheckoutResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| CheckoutError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CheckoutError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| CheckoutError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Checkout config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CheckoutResult<()> {
        let url = Url::parse(&self.backend.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CheckoutError::InvalidConfig(format!(
                "base_url must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(CheckoutError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.poll_interval_secs == 0 {
            return Err(CheckoutError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.poll_interval_secs >= self.gateway.poll_ceiling_secs {
            return Err(CheckoutError::InvalidConfig(format!(
                "poll_interval_secs ({}) must be smaller than poll_ceiling_secs ({})",
                self.gateway.poll_interval_secs, self.gateway.poll_ceiling_secs
            )));
        }

        if self.gateway.branch_id.trim().is_empty() {
            return Err(CheckoutError::InvalidConfig("branch_id must not be empty".into()));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VITRINA_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.backend.base_url = url;
        }

        if let Ok(branch) = std::env::var("VITRINA_BRANCH_ID") {
            self.gateway.branch_id = branch;
        }

        override_secs("VITRINA_POLL_INTERVAL_SECS", &mut self.gateway.poll_interval_secs);
        override_secs("VITRINA_POLL_CEILING_SECS", &mut self.gateway.poll_ceiling_secs);
        override_secs(
            "VITRINA_REQUEST_TIMEOUT_SECS",
            &mut self.backend.request_timeout_secs,
        );
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vitrina", "pos")
            .map(|dirs| dirs.config_dir().join("checkout.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.poll_interval_secs)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.gateway.poll_ceiling_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn branch_id(&self) -> &str {
        &self.gateway.branch_id
    }

    /// Store name for headers and receipts; the branch id when unnamed.
    pub fn store_label(&self) -> &str {
        let name = self.store.name.trim();
        if name.is_empty() {
            self.branch_id()
        } else {
            name
        }
    }
}

fn override_secs(var: &str, target: &mut u64) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse::<u64>() {
            Ok(secs) => {
                debug!(var, secs, "Overriding duration from environment");
                *target = secs;
            }
            Err(_) => warn!(var, value = %raw, "Ignoring non-numeric duration in environment"),
        }
    }
}
