//! Weighted multi-factor agent fit scoring.
//!
//! Seven independently-toggleable components, each normalized to [0, 1]
//! and worth up to `weight / 100 × 10` points. Missing metrics degrade to
//! a neutral 0.5 instead of erroring — scoring never fails, it only gets
//! less informed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScoringConfig;

const NEUTRAL: f64 = 0.5;

/// Per-agent, per-window performance facts. Produced by an external
/// metrics job; consumed read-only. Every metric is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPerformanceSnapshot {
    pub agent_id: String,
    pub conversion_rate: Option<f64>,
    pub avg_deal_size: Option<f64>,
    pub industry_win_rates: HashMap<String, f64>,
    pub hot_streak: Option<bool>,
    pub recent_wins: Option<u32>,
    pub median_response_minutes: Option<f64>,
    pub burnout_score: Option<f64>,
    pub availability: Option<f64>,
}

impl AgentPerformanceSnapshot {
    /// Snapshot for an agent the metrics job knows nothing about; every
    /// component scores neutral.
    pub fn empty(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }
}

/// The seven scoring components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    IndustryPerf,
    Conversion,
    AvgDeal,
    HotStreak,
    ResponseSpeed,
    Burnout,
    Availability,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::IndustryPerf,
        Component::Conversion,
        Component::AvgDeal,
        Component::HotStreak,
        Component::ResponseSpeed,
        Component::Burnout,
        Component::Availability,
    ];
}

/// One component's contribution to an agent's total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component: Component,
    pub enabled: bool,
    pub weight: u32,
    /// Raw component score in [0, 1] before weighting.
    pub raw: f64,
    /// Weighted points actually contributed; 0 when disabled.
    pub points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent_id: String,
    /// 0–100, rounded to 2 decimals.
    pub total: f64,
    pub breakdown: Vec<ComponentScore>,
}

/// Score and rank candidate agents for a lead. Result is sorted
/// descending by total; ties keep submission order (stable sort).
pub fn score(
    lead_industry: Option<&str>,
    agents: &[AgentPerformanceSnapshot],
    config: &ScoringConfig,
) -> Vec<AgentScore> {
    let mut ranked: Vec<AgentScore> = agents
        .iter()
        .map(|snapshot| score_one(lead_industry, snapshot, config))
        .collect();

    ranked.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(top) = ranked.first() {
        debug!(agent_id = %top.agent_id, total = top.total, "Top-ranked agent");
    }

    ranked
}

fn score_one(
    lead_industry: Option<&str>,
    snapshot: &AgentPerformanceSnapshot,
    config: &ScoringConfig,
) -> AgentScore {
    let mut breakdown = Vec::with_capacity(Component::ALL.len());
    let mut total = 0.0;

    for component in Component::ALL {
        let settings = config.component(component);
        let raw = raw_score(component, lead_industry, snapshot, config);
        let points = if settings.enabled {
            f64::from(settings.weight) / 100.0 * raw * 10.0
        } else {
            0.0
        };
        total += points;
        breakdown.push(ComponentScore {
            component,
            enabled: settings.enabled,
            weight: settings.weight,
            raw,
            points,
        });
    }

    AgentScore {
        agent_id: snapshot.agent_id.clone(),
        total: round2(total),
        breakdown,
    }
}

fn raw_score(
    component: Component,
    lead_industry: Option<&str>,
    snapshot: &AgentPerformanceSnapshot,
    config: &ScoringConfig,
) -> f64 {
    match component {
        Component::IndustryPerf => lead_industry
            .and_then(|industry| snapshot.industry_win_rates.get(industry))
            .map(|rate| clamp01(*rate))
            .unwrap_or(NEUTRAL),

        Component::Conversion => snapshot.conversion_rate.map(clamp01).unwrap_or(NEUTRAL),

        Component::AvgDeal => snapshot
            .avg_deal_size
            .filter(|_| config.deal_size_ceiling > 0.0)
            .map(|size| clamp01(size / config.deal_size_ceiling))
            .unwrap_or(NEUTRAL),

        Component::HotStreak => {
            if snapshot.hot_streak == Some(true) {
                1.0
            } else if config.min_deals_threshold > 0 {
                snapshot
                    .recent_wins
                    .map(|wins| clamp01(f64::from(wins) / f64::from(config.min_deals_threshold)))
                    .unwrap_or(NEUTRAL)
            } else {
                NEUTRAL
            }
        }

        Component::ResponseSpeed => snapshot
            .median_response_minutes
            .filter(|_| config.response_minutes_ceiling > 0.0)
            .map(|minutes| clamp01(1.0 - minutes / config.response_minutes_ceiling))
            .unwrap_or(NEUTRAL),

        // Polarity inverted relative to the raw metric: burnout is
        // "higher = worse", so healthy agents score higher.
        Component::Burnout => snapshot
            .burnout_score
            .map(|b| clamp01(1.0 - b))
            .unwrap_or(NEUTRAL),

        // Advisory capacity signal only; nothing in the apply path
        // enforces it as a hard cap.
        Component::Availability => snapshot.availability.map(clamp01).unwrap_or(NEUTRAL),
    }
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;

    /// Config with only the named components enabled, everything else off.
    fn config_with(enabled: &[(Component, u32)]) -> ScoringConfig {
        let mut config = ScoringConfig::default();
        for component in Component::ALL {
            *config.component_mut(component) = ComponentConfig {
                enabled: false,
                weight: 0,
            };
        }
        for (component, weight) in enabled {
            *config.component_mut(*component) = ComponentConfig {
                enabled: true,
                weight: *weight,
            };
        }
        config
    }

    fn snapshot(agent_id: &str) -> AgentPerformanceSnapshot {
        AgentPerformanceSnapshot::empty(agent_id)
    }

    #[test]
    fn test_weighted_industry_conversion_example() {
        let config = config_with(&[(Component::IndustryPerf, 70), (Component::Conversion, 30)]);

        let mut a = snapshot("A");
        a.industry_win_rates.insert("SaaS".into(), 0.9);
        a.conversion_rate = Some(0.5);

        let mut b = snapshot("B");
        b.industry_win_rates.insert("SaaS".into(), 0.2);
        b.conversion_rate = Some(0.8);

        let ranked = score(Some("SaaS"), &[a, b], &config);
        assert_eq!(ranked[0].agent_id, "A");
        assert_eq!(ranked[0].total, 7.8);
        assert_eq!(ranked[1].agent_id, "B");
        assert_eq!(ranked[1].total, 3.8);
    }

    #[test]
    fn test_conversion_monotonicity() {
        let config = config_with(&[(Component::Conversion, 50)]);

        let mut low = snapshot("low");
        low.conversion_rate = Some(0.3);
        let mut high = snapshot("high");
        high.conversion_rate = Some(0.6);

        let ranked = score(None, &[low.clone(), high.clone()], &config);
        assert_eq!(ranked[0].agent_id, "high");
        assert!(ranked[0].total > ranked[1].total);

        // At weight 0 the same metric difference has no effect.
        let config = config_with(&[(Component::Conversion, 0)]);
        let ranked = score(None, &[low, high], &config);
        assert_eq!(ranked[0].total, ranked[1].total);
    }

    #[test]
    fn test_disabled_component_contributes_zero() {
        let mut config = config_with(&[(Component::Conversion, 100)]);
        config.conversion.enabled = false;

        let mut agent = snapshot("A");
        agent.conversion_rate = Some(1.0);

        let ranked = score(None, &[agent], &config);
        assert_eq!(ranked[0].total, 0.0);
        let conversion = ranked[0]
            .breakdown
            .iter()
            .find(|c| c.component == Component::Conversion)
            .unwrap();
        assert!(!conversion.enabled);
        assert_eq!(conversion.points, 0.0);
    }

    #[test]
    fn test_missing_snapshot_degrades_to_neutral() {
        let config = config_with(&[
            (Component::IndustryPerf, 40),
            (Component::Conversion, 30),
            (Component::ResponseSpeed, 30),
        ]);

        let ranked = score(Some("SaaS"), &[snapshot("unknown")], &config);
        // Every component lands on 0.5: (0.4 + 0.3 + 0.3) * 0.5 * 10 = 5.
        assert_eq!(ranked[0].total, 5.0);
        assert!(ranked[0].breakdown.iter().all(|c| !c.enabled || c.raw == 0.5));
    }

    #[test]
    fn test_unknown_industry_is_neutral() {
        let config = config_with(&[(Component::IndustryPerf, 100)]);

        let mut agent = snapshot("A");
        agent.industry_win_rates.insert("SaaS".into(), 0.9);

        let ranked = score(Some("Logistics"), &[agent], &config);
        assert_eq!(ranked[0].total, 5.0);
    }

    #[test]
    fn test_burnout_polarity_rewards_health() {
        let config = config_with(&[(Component::Burnout, 100)]);

        let mut fried = snapshot("fried");
        fried.burnout_score = Some(0.9);
        let mut fresh = snapshot("fresh");
        fresh.burnout_score = Some(0.1);

        let ranked = score(None, &[fried, fresh], &config);
        assert_eq!(ranked[0].agent_id, "fresh");
        assert_eq!(ranked[0].total, 9.0);
        assert_eq!(ranked[1].total, 1.0);
    }

    #[test]
    fn test_hot_streak_flag_and_ratio() {
        let mut config = config_with(&[(Component::HotStreak, 100)]);
        config.min_deals_threshold = 4;

        let mut flagged = snapshot("flagged");
        flagged.hot_streak = Some(true);
        let mut partial = snapshot("partial");
        partial.hot_streak = Some(false);
        partial.recent_wins = Some(2);

        let ranked = score(None, &[flagged, partial], &config);
        assert_eq!(ranked[0].agent_id, "flagged");
        assert_eq!(ranked[0].total, 10.0);
        assert_eq!(ranked[1].total, 5.0);
    }

    #[test]
    fn test_response_speed_faster_is_higher() {
        let mut config = config_with(&[(Component::ResponseSpeed, 100)]);
        config.response_minutes_ceiling = 100.0;

        let mut slow = snapshot("slow");
        slow.median_response_minutes = Some(80.0);
        let mut fast = snapshot("fast");
        fast.median_response_minutes = Some(10.0);

        let ranked = score(None, &[slow, fast], &config);
        assert_eq!(ranked[0].agent_id, "fast");
        assert_eq!(ranked[0].total, 9.0);
        assert_eq!(ranked[1].total, 2.0);
    }

    #[test]
    fn test_ties_keep_submission_order() {
        let config = config_with(&[(Component::Conversion, 100)]);

        let mut first = snapshot("first");
        first.conversion_rate = Some(0.7);
        let mut second = snapshot("second");
        second.conversion_rate = Some(0.7);

        let ranked = score(None, &[first, second], &config);
        assert_eq!(ranked[0].agent_id, "first");
        assert_eq!(ranked[1].agent_id, "second");
    }

    #[test]
    fn test_clamping() {
        let mut config = config_with(&[(Component::AvgDeal, 100)]);
        config.deal_size_ceiling = 1000.0;

        let mut whale = snapshot("whale");
        whale.avg_deal_size = Some(50_000.0);

        let ranked = score(None, &[whale], &config);
        assert_eq!(ranked[0].total, 10.0);
    }
}
