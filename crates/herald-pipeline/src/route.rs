//! Delivery Router.

use herald_core::{Channel, ClassifiedEvent, DeliveryTask, ImpactTier};
use herald_settings::RoutingSettings;

/// Resolved route of one tier: channels in configuration order, each once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct TierPlan {
    immediate: Vec<Channel>,
    digest: bool,
}

/// Immutable tier → channel table, built once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTable {
    high: TierPlan,
    medium: TierPlan,
    low: TierPlan,
}

impl RoutingTable {
    /// Build from settings, dropping repeated channels.
    pub fn from_settings(settings: &RoutingSettings) -> Self {
        let plan = |tier| {
            let route = settings.for_tier(tier);
            let mut immediate = Vec::with_capacity(route.immediate.len());
            for channel in &route.immediate {
                if !immediate.contains(channel) {
                    immediate.push(*channel);
                }
            }
            TierPlan {
                immediate,
                digest: route.digest,
            }
        };
        Self {
            high: plan(ImpactTier::High),
            medium: plan(ImpactTier::Medium),
            low: plan(ImpactTier::Low),
        }
    }

    fn plan(&self, tier: ImpactTier) -> &TierPlan {
        match tier {
            ImpactTier::High => &self.high,
            ImpactTier::Medium => &self.medium,
            ImpactTier::Low => &self.low,
        }
    }

    /// Channels delivered immediately for `tier`.
    pub fn immediate(&self, tier: ImpactTier) -> &[Channel] {
        &self.plan(tier).immediate
    }

    /// Whether `tier` is aggregated into digests.
    pub fn digests(&self, tier: ImpactTier) -> bool {
        self.plan(tier).digest
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::from_settings(&RoutingSettings::default())
    }
}

/// Tasks for one classified event.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutePlan {
    /// One pending task per immediate channel.
    pub tasks: Vec<DeliveryTask>,
    /// Whether the event will appear in the next digest.
    pub deferred_to_digest: bool,
}

impl RoutePlan {
    /// Channels of the planned tasks, in order.
    pub fn channels(&self) -> Vec<Channel> {
        self.tasks.iter().map(|t| t.channel).collect()
    }
}

/// Turns classified events into delivery tasks.
#[derive(Clone, Debug, Default)]
pub struct Router {
    table: RoutingTable,
}

impl Router {
    /// Router over `table`.
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    /// The routing table.
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Plan delivery of `classified`.
    pub fn route(&self, classified: &ClassifiedEvent) -> RoutePlan {
        let tasks = self
            .table
            .immediate(classified.tier)
            .iter()
            .map(|channel| DeliveryTask::for_event(classified, *channel))
            .collect();
        RoutePlan {
            tasks,
            deferred_to_digest: self.table.digests(classified.tier),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use herald_core::{ChangeType, DeliveryStatus, PolicyChangeEvent};
    use herald_settings::TierRoute;

    fn classified(tier: ImpactTier) -> ClassifiedEvent {
        ClassifiedEvent {
            event: PolicyChangeEvent {
                id: "p1".into(),
                policy_name: "access-control".into(),
                change_type: ChangeType::Updated,
                actor: "alice".into(),
                timestamp: Utc::now(),
                diff: serde_json::Value::Null,
                severity_hint: None,
            },
            tier,
            sequence: 1,
        }
    }

    #[test]
    fn high_goes_to_every_channel() {
        let plan = Router::default().route(&classified(ImpactTier::High));
        assert_eq!(plan.channels(), Channel::ALL.to_vec());
        assert!(!plan.deferred_to_digest);
        assert!(plan.tasks.iter().all(|t| t.status == DeliveryStatus::Pending));
        assert!(plan.tasks.iter().all(|t| t.tier == Some(ImpactTier::High)));
    }

    #[test]
    fn low_and_medium_go_to_ledger_and_digest() {
        for tier in [ImpactTier::Low, ImpactTier::Medium] {
            let plan = Router::default().route(&classified(tier));
            assert_eq!(plan.channels(), vec![Channel::Ledger]);
            assert!(plan.deferred_to_digest);
        }
    }

    #[test]
    fn repeated_channels_are_dropped() {
        let settings = RoutingSettings {
            high: TierRoute {
                immediate: vec![Channel::Webhook, Channel::Ledger, Channel::Webhook],
                digest: false,
            },
            ..Default::default()
        };
        let router = Router::new(RoutingTable::from_settings(&settings));
        let plan = router.route(&classified(ImpactTier::High));
        assert_eq!(plan.channels(), vec![Channel::Webhook, Channel::Ledger]);
    }

    #[test]
    fn task_ids_are_per_channel() {
        let plan = Router::default().route(&classified(ImpactTier::High));
        let ids: Vec<_> = plan.tasks.iter().map(|t| t.id.as_str().to_string()).collect();
        assert_eq!(ids, ["p1:webhook", "p1:sms", "p1:email", "p1:ledger"]);
    }
}
