//! Policy-change events and their classified form.
//!
//! A [`PolicyChangeEvent`] is created by the upstream policy engine and is
//! immutable once ingested. The classifier wraps it in a [`ClassifiedEvent`]
//! carrying the computed [`ImpactTier`] and the ingestion sequence number.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::ParseError;
use crate::ids::EventId;

/// Kind of change applied to a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// A new policy was created.
    Created,
    /// An existing policy was modified.
    Updated,
    /// A policy was removed.
    Deleted,
}

impl ChangeType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "create" => Ok(Self::Created),
            "updated" | "update" => Ok(Self::Updated),
            "deleted" | "delete" => Ok(Self::Deleted),
            _ => Err(ParseError::new("change type", s)),
        }
    }
}

/// Severity tier of a policy change. Ordered `Low < Medium < High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactTier {
    /// Aggregated into digests only.
    Low,
    /// Aggregated into digests only.
    Medium,
    /// Delivered immediately on every configured channel.
    High,
}

impl ImpactTier {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// All tiers, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];
}

impl fmt::Display for ImpactTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpactTier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParseError::new("tier", s)),
        }
    }
}

/// A validated policy-change event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyChangeEvent {
    /// Upstream identifier (unique, immutable).
    pub id: EventId,
    /// Name of the changed policy.
    pub policy_name: String,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Who made the change.
    pub actor: String,
    /// When the change happened (upstream clock).
    pub timestamp: DateTime<Utc>,
    /// Rule payload diff as supplied upstream.
    pub diff: Value,
    /// Severity declared by the policy engine, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_hint: Option<ImpactTier>,
}

impl PolicyChangeEvent {
    /// SHA-256 (lowercase hex) over the canonical JSON encoding of the event.
    ///
    /// `serde_json` object maps are key-sorted, so equal events always hash
    /// to the same value.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// A policy-change event with its computed impact tier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedEvent {
    /// The underlying event.
    pub event: PolicyChangeEvent,
    /// Computed tier.
    pub tier: ImpactTier,
    /// Ingestion sequence number (tie-break for equal timestamps).
    pub sequence: i64,
}

impl ClassifiedEvent {
    /// Shorthand for the event's identifier.
    #[must_use]
    pub fn id(&self) -> &EventId {
        &self.event.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
