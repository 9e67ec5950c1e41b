//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production default values, and `#[serde(default)]`
//! allows partial JSON: missing fields get their default value.

mod pipeline;
mod server;

pub use pipeline::*;
pub use server::*;

use herald_core::{Channel, ImpactTier, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded once at process start and passed explicitly to the components that
/// need it. Changing the routing table or retry limits requires a restart.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "routing": { "medium": { "immediate": ["ledger", "email"] } },
///   "retry": { "maxAttempts": 3 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP server.
    pub server: ServerSettings,
    /// Ledger storage.
    pub ledger: LedgerSettings,
    /// Event ingestion.
    pub ingest: IngestSettings,
    /// Impact classification.
    pub classifier: ClassifierSettings,
    /// Tier → channel routing.
    pub routing: RoutingSettings,
    /// Delivery retry policy.
    pub retry: RetryConfig,
    /// Channel adapters.
    pub adapters: AdapterSettings,
    /// Digest scheduler.
    pub digest: DigestSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.maxAttempts must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.baseDelayMs must not exceed retry.maxDelayMs"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(invalid("retry.jitterFactor must be within 0.0..=1.0"));
        }
        if self.adapters.timeout_ms == 0 {
            return Err(invalid("adapters.timeoutMs must be positive"));
        }
        if self.digest.period_secs == 0 {
            return Err(invalid("digest.periodSecs must be positive"));
        }
        if self.digest.period_secs > MAX_DIGEST_PERIOD_SECS {
            return Err(invalid(format!(
                "digest.periodSecs must not exceed {MAX_DIGEST_PERIOD_SECS}"
            )));
        }
        if self.ledger.pool_size == 0 {
            return Err(invalid("ledger.poolSize must be positive"));
        }
        for tier in [ImpactTier::Low, ImpactTier::Medium] {
            let route = self.routing.for_tier(tier);
            if let Some(channel) = route.immediate.iter().find(|c| **c != Channel::Ledger) {
                return Err(invalid(format!(
                    "routing.{tier}.immediate may only contain \"ledger\", found \"{channel}\""
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        HeraldSettings::default().validate().unwrap();
    }

    #[test]
    fn default_values() {
        let settings = HeraldSettings::default();
        assert_eq!(settings.server.port, 8470);
        assert_eq!(settings.ingest.clock_skew_ms, 5_000);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.adapters.timeout_ms, 10_000);
        assert_eq!(settings.digest.period_secs, 86_400);
        assert_eq!(settings.ledger.db_path, "ledger.db");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut settings = HeraldSettings::default();
        settings.retry.max_attempts = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn inverted_backoff_rejected() {
        let mut settings = HeraldSettings::default();
        settings.retry.base_delay_ms = 120_000;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn oversized_digest_period_rejected() {
        let mut settings = HeraldSettings::default();
        settings.digest.period_secs = MAX_DIGEST_PERIOD_SECS;
        settings.validate().unwrap();
        settings.digest.period_secs = u64::MAX;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("digest.periodSecs"));
    }

    #[test]
    fn low_tier_cannot_route_to_user_channels() {
        let mut settings = HeraldSettings::default();
        settings.routing.low.immediate.push(Channel::Sms);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("routing.low.immediate"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(HeraldSettings::default()).unwrap();
        assert!(json["adapters"]["timeoutMs"].is_number());
        assert!(json["digest"]["periodSecs"].is_number());
        assert!(json["ingest"]["clockSkewMs"].is_number());
    }
}
