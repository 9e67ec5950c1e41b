//! Pipeline settings: ingestion, classification, routing, adapters, digest.

use herald_core::{ChangeType, Channel, ImpactTier};
use serde::{Deserialize, Serialize};

/// Event ingestion settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestSettings {
    /// Accepted clock skew for event timestamps in the future, in ms.
    pub clock_skew_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            clock_skew_ms: 5_000,
        }
    }
}

/// One entry of the classifier's rule-weight table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightRule {
    /// Policy name the rule applies to (exact match).
    pub policy: String,
    /// Change type the rule applies to.
    pub change: ChangeType,
    /// Tier assigned by the rule.
    pub tier: ImpactTier,
}

/// Impact classifier settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    /// Rule-weight table keyed by (policy, change type).
    pub weights: Vec<WeightRule>,
}

/// Routing for a single tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierRoute {
    /// Channels delivered to immediately.
    pub immediate: Vec<Channel>,
    /// Whether the event is aggregated into the periodic digest.
    pub digest: bool,
}

impl Default for TierRoute {
    fn default() -> Self {
        Self {
            immediate: vec![Channel::Ledger],
            digest: true,
        }
    }
}

/// Tier → channel routing table. Static for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    /// High-tier routing.
    pub high: TierRoute,
    /// Medium-tier routing.
    pub medium: TierRoute,
    /// Low-tier routing.
    pub low: TierRoute,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            high: TierRoute {
                immediate: Channel::ALL.to_vec(),
                digest: false,
            },
            medium: TierRoute::default(),
            low: TierRoute::default(),
        }
    }
}

impl RoutingSettings {
    /// Route for `tier`.
    #[must_use]
    pub fn for_tier(&self, tier: ImpactTier) -> &TierRoute {
        match tier {
            ImpactTier::High => &self.high,
            ImpactTier::Medium => &self.medium,
            ImpactTier::Low => &self.low,
        }
    }
}

/// Settings for an HTTP-backed adapter endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpEndpointSettings {
    /// Endpoint URL. Unset disables delivery (tasks are abandoned).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Optional bearer token sent as `Authorization`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// SMS gateway settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsSettings {
    /// Gateway endpoint.
    #[serde(flatten)]
    pub endpoint: HttpEndpointSettings,
    /// Phone numbers notified of high-impact changes.
    pub recipients: Vec<String>,
}

/// Email API settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSettings {
    /// Email API endpoint.
    #[serde(flatten)]
    pub endpoint: HttpEndpointSettings,
    /// Sender address.
    pub from: String,
    /// Addresses notified of high-impact changes and digests.
    pub recipients: Vec<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            endpoint: HttpEndpointSettings::default(),
            from: "herald@localhost".to_string(),
            recipients: Vec::new(),
        }
    }
}

/// Channel adapter settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterSettings {
    /// Per-attempt timeout in ms.
    pub timeout_ms: u64,
    /// Webhook endpoint.
    pub webhook: HttpEndpointSettings,
    /// SMS gateway.
    pub sms: SmsSettings,
    /// Email API.
    pub email: EmailSettings,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            webhook: HttpEndpointSettings::default(),
            sms: SmsSettings::default(),
            email: EmailSettings::default(),
        }
    }
}

/// Longest accepted digest period (365 days).
pub const MAX_DIGEST_PERIOD_SECS: u64 = 31_536_000;

/// Digest scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DigestSettings {
    /// Whether the scheduler runs.
    pub enabled: bool,
    /// Tick period in seconds.
    pub period_secs: u64,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 86_400,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
