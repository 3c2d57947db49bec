//! # Checkout Configuration
//!
//! Configuration for a till: business details, pricing rules, the
//! mobile-money gateway and the timings of polling and reconciliation.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SOKO_GATEWAY_URL=https://pay.example.com                           │
//! │     SOKO_GATEWAY_API_KEY=...                                           │
//! │     SOKO_TAX_REGISTERED=true                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/soko-pos/checkout.toml (Linux)                           │
//! │     ~/Library/Application Support/com.soko.pos/checkout.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     16% tax (not registered), 100 points = 100.00, 20 polls            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [business]
//! name = "Mama Njeri Groceries"
//! till_id = "till-01"
//!
//! [pricing]
//! tax_registered = true
//! tax_rate_bps = 1600
//! rounding_tolerance_cents = 100
//!
//! [gateway]
//! base_url = "https://pay.example.com"
//! api_key = "sk_live_..."
//!
//! [polling]
//! initial_delay_ms = 5000
//! interval_ms = 3000
//! max_attempts = 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use soko_core::{validation, BusinessProfile, Money, PricingPolicy, TaxRate};

use crate::error::{CheckoutError, CheckoutResult};

// =============================================================================
// Business Settings
// =============================================================================

/// Details printed on receipts and sent with push requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessSettings {
    #[serde(default = "default_business_name")]
    pub name: String,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    /// Tax registration number.
    #[serde(default)]
    pub tax_pin: Option<String>,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_footer")]
    pub footer: Option<String>,

    /// Identifies this till to the gateway.
    #[serde(default = "default_till_id")]
    pub till_id: String,

    /// Thermal printer width in characters.
    #[serde(default = "default_receipt_width")]
    pub receipt_width: usize,
}

fn default_business_name() -> String {
    "Soko POS".to_string()
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_footer() -> Option<String> {
    Some("Thank you for shopping with us!".to_string())
}

fn default_till_id() -> String {
    "till-01".to_string()
}

fn default_receipt_width() -> usize {
    soko_core::receipt::DEFAULT_RECEIPT_WIDTH
}

impl Default for BusinessSettings {
    fn default() -> Self {
        BusinessSettings {
            name: default_business_name(),
            address: None,
            phone: None,
            tax_pin: None,
            currency: default_currency(),
            footer: default_footer(),
            till_id: default_till_id(),
            receipt_width: default_receipt_width(),
        }
    }
}

// =============================================================================
// Pricing Settings
// =============================================================================

/// Tax and loyalty rules. Money values are in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default)]
    pub tax_registered: bool,

    #[serde(default = "default_tax_rate_bps")]
    pub tax_rate_bps: u32,

    #[serde(default = "default_points_per_unit")]
    pub points_per_redemption_unit: i64,

    #[serde(default = "default_unit_value_cents")]
    pub redemption_unit_value_cents: i64,

    #[serde(default = "default_unit_value_cents")]
    pub earn_unit_cents: i64,

    #[serde(default = "default_earn_points")]
    pub earn_points_per_unit: i64,

    /// Largest settled-vs-due difference accepted without a mismatch flag.
    #[serde(default = "default_rounding_tolerance")]
    pub rounding_tolerance_cents: i64,
}

fn default_tax_rate_bps() -> u32 {
    1600
}
fn default_points_per_unit() -> i64 {
    100
}
fn default_unit_value_cents() -> i64 {
    10_000
}
fn default_earn_points() -> i64 {
    1
}
fn default_rounding_tolerance() -> i64 {
    100
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            tax_registered: false,
            tax_rate_bps: default_tax_rate_bps(),
            points_per_redemption_unit: default_points_per_unit(),
            redemption_unit_value_cents: default_unit_value_cents(),
            earn_unit_cents: default_unit_value_cents(),
            earn_points_per_unit: default_earn_points(),
            rounding_tolerance_cents: default_rounding_tolerance(),
        }
    }
}

impl PricingSettings {
    /// Builds the policy the core pricing functions take.
    pub fn policy(&self) -> PricingPolicy {
        PricingPolicy {
            tax_registered: self.tax_registered,
            tax_rate: TaxRate::from_bps(self.tax_rate_bps),
            points_per_redemption_unit: self.points_per_redemption_unit,
            redemption_unit_value: Money::from_cents(self.redemption_unit_value_cents),
            earn_unit: Money::from_cents(self.earn_unit_cents),
            earn_points_per_unit: self.earn_points_per_unit,
        }
    }

    pub fn rounding_tolerance(&self) -> Money {
        Money::from_cents(self.rounding_tolerance_cents)
    }
}

// =============================================================================
// Gateway Settings
// =============================================================================

/// Mobile-money gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Base URL of the gateway. Mobile money is disabled when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Polling Settings
// =============================================================================

/// Timings of the push-payment status poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Wait before the first status query; the customer needs time to
    /// enter their PIN.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Wait between status queries.
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Status queries before the attempt fails with a timeout.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay() -> u64 {
    5_000
}
fn default_poll_interval() -> u64 {
    3_000
}
fn default_max_attempts() -> u32 {
    20
}

impl Default for PollingSettings {
    fn default() -> Self {
        PollingSettings {
            initial_delay_ms: default_initial_delay(),
            interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollingSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

/// Retry behaviour of the reconciliation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Interval between journal scans (seconds).
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Entries loaded per scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Failed runs before an entry is flagged for manual review.
    #[serde(default = "default_max_retries")]
    pub max_attempts: u32,

    /// Initial backoff after a failed scan (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff after repeated failed scans (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_scan_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    50
}
fn default_max_retries() -> u32 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            interval_secs: default_scan_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Phone Settings
// =============================================================================

/// Phone number normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneSettings {
    /// Replaces a leading `0` in local numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_country_code() -> String {
    "254".to_string()
}

impl Default for PhoneSettings {
    fn default() -> Self {
        PhoneSettings {
            country_code: default_country_code(),
        }
    }
}

// =============================================================================
// Main Checkout Configuration
// =============================================================================

/// Complete checkout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub business: BusinessSettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    #[serde(default)]
    pub phone: PhoneSettings,
}

impl CheckoutConfig {
    /// Creates a config with defaults.
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
            warn!(error = %e, "Failed to load checkout config, using defaults");
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
        if self.business.name.trim().is_empty() {
            return Err(CheckoutError::InvalidConfig("business.name is required".into()));
        }

        if self.business.receipt_width < 24 {
            return Err(CheckoutError::InvalidConfig(
                "business.receipt_width must be at least 24".into(),
            ));
        }

        validation::validate_tax_rate_bps(self.pricing.tax_rate_bps)
            .map_err(|e| CheckoutError::InvalidConfig(e.to_string()))?;

        if self.pricing.points_per_redemption_unit <= 0
            || self.pricing.redemption_unit_value_cents <= 0
            || self.pricing.earn_unit_cents <= 0
        {
            return Err(CheckoutError::InvalidConfig(
                "loyalty units must be greater than 0".into(),
            ));
        }

        if self.pricing.earn_points_per_unit < 0 || self.pricing.rounding_tolerance_cents < 0 {
            return Err(CheckoutError::InvalidConfig(
                "earn_points_per_unit and rounding_tolerance_cents cannot be negative".into(),
            ));
        }

        if let Some(ref url) = self.gateway.base_url {
            let parsed = Url::parse(url)?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(CheckoutError::InvalidUrl(format!(
                    "Gateway URL must start with http:// or https://, got: {}",
                    url
                )));
            }
        }

        if self.gateway.request_timeout_secs == 0 {
            return Err(CheckoutError::InvalidConfig(
                "gateway.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.polling.max_attempts == 0 {
            return Err(CheckoutError::InvalidConfig(
                "polling.max_attempts must be greater than 0".into(),
            ));
        }

        if self.reconciliation.batch_size == 0 || self.reconciliation.max_attempts == 0 {
            return Err(CheckoutError::InvalidConfig(
                "reconciliation.batch_size and max_attempts must be greater than 0".into(),
            ));
        }

        if self.phone.country_code.is_empty()
            || !self.phone.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(CheckoutError::InvalidConfig(
                "phone.country_code must be digits only".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SOKO_GATEWAY_URL") {
            debug!(url = %url, "Overriding gateway URL from environment");
            self.gateway.base_url = Some(url);
        }

        if let Ok(key) = std::env::var("SOKO_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(key);
        }

        if let Ok(till) = std::env::var("SOKO_TILL_ID") {
            self.business.till_id = till;
        }

        if let Ok(value) = std::env::var("SOKO_TAX_REGISTERED") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.pricing.tax_registered = true,
                "0" | "false" | "no" => self.pricing.tax_registered = false,
                _ => warn!(value = %value, "Unknown SOKO_TAX_REGISTERED value"),
            }
        }

        if let Ok(bps) = std::env::var("SOKO_TAX_RATE_BPS") {
            if let Ok(b) = bps.parse::<u32>() {
                self.pricing.tax_rate_bps = b;
            }
        }

        if let Ok(max) = std::env::var("SOKO_POLL_MAX_ATTEMPTS") {
            if let Ok(m) = max.parse::<u32>() {
                debug!(max_attempts = m, "Overriding poll budget from environment");
                self.polling.max_attempts = m;
            }
        }

        if let Ok(cc) = std::env::var("SOKO_COUNTRY_CODE") {
            self.phone.country_code = cc;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "soko", "pos")
            .map(|dirs| dirs.config_dir().join("checkout.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn policy(&self) -> PricingPolicy {
        self.pricing.policy()
    }

    pub fn rounding_tolerance(&self) -> Money {
        self.pricing.rounding_tolerance()
    }

    /// The profile printed at the top of every receipt.
    pub fn business_profile(&self) -> BusinessProfile {
        BusinessProfile {
            name: self.business.name.clone(),
            address: self.business.address.clone(),
            phone: self.business.phone.clone(),
            tax_pin: self.business.tax_pin.clone(),
            currency: self.business.currency.clone(),
            tax_rate: TaxRate::from_bps(self.pricing.tax_rate_bps),
            footer: self.business.footer.clone(),
        }
    }

    /// Returns true if mobile money can be offered.
    pub fn mobile_money_enabled(&self) -> bool {
        self.gateway.base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckoutConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.pricing.tax_registered);
        assert_eq!(config.polling.max_attempts, 20);
        assert_eq!(config.rounding_tolerance(), Money::from_cents(100));
        assert!(!config.mobile_money_enabled());

        let policy = config.policy();
        assert_eq!(policy, PricingPolicy::default());
    }

    #[test]
    fn test_default_gateway_settings_have_timeout() {
        let gateway = GatewaySettings::default();
        assert_eq!(gateway.request_timeout_secs, 15);
        assert!(gateway.base_url.is_none());

        let mut config = CheckoutConfig::default();
        config.gateway.base_url = Some("https://pay.example.com".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CheckoutConfig::default();

        config.gateway.base_url = Some("ftp://pay.example.com".into());
        assert!(config.validate().is_err());

        config.gateway.base_url = Some("not a url".into());
        assert!(config.validate().is_err());

        config.gateway.base_url = Some("https://pay.example.com".into());
        assert!(config.validate().is_ok());

        config.polling.max_attempts = 0;
        assert!(config.validate().is_err());
        config.polling.max_attempts = 5;

        config.pricing.tax_rate_bps = 20_000;
        assert!(config.validate().is_err());
        config.pricing.tax_rate_bps = 1600;

        config.phone.country_code = "+254".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CheckoutConfig = toml::from_str(
            r#"
            [pricing]
            tax_registered = true

            [polling]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert!(config.pricing.tax_registered);
        assert_eq!(config.pricing.tax_rate_bps, 1600);
        assert_eq!(config.polling.max_attempts, 3);
        assert_eq!(config.polling.interval(), Duration::from_millis(3_000));
        assert_eq!(config.business.currency, "KES");
    }

    #[test]
    fn test_toml_serialization() {
        let config = CheckoutConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[business]"));
        assert!(toml_str.contains("[polling]"));
        assert!(toml_str.contains("[reconciliation]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("soko-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("checkout.toml");

        let mut config = CheckoutConfig::default();
        config.business.name = "Duka la Mama".into();
        config.pricing.tax_registered = true;
        config.save(Some(path.clone())).unwrap();

        let loaded = CheckoutConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.business.name, "Duka la Mama");
        assert!(loaded.pricing.tax_registered);

        let _ = std::fs::remove_dir_all(dir);
    }
}
