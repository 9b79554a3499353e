use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, RouterError};
use crate::scoring::Component;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub routing: RoutingSettings,
    pub scoring: ScoringConfig,
    pub queue: QueueConfig,
    pub directory: DirectoryConfig,
}

impl RouterConfig {
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = config_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| RouterError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values; accumulates every violation into a
    /// single error message.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let weight_sum: u32 = Component::ALL
            .iter()
            .map(|c| {
                let component = self.scoring.component(*c);
                if component.enabled { component.weight } else { 0 }
            })
            .sum();
        if weight_sum > 0 && !(90..=110).contains(&weight_sum) {
            errors.push(format!(
                "enabled scoring weights sum to {weight_sum}, expected ~100"
            ));
        }
        for component in Component::ALL {
            if self.scoring.component(component).weight > 100 {
                errors.push(format!("scoring weight for {component:?} exceeds 100"));
            }
        }
        if self.scoring.deal_size_ceiling <= 0.0 {
            errors.push("deal_size_ceiling must be positive".into());
        }
        if self.scoring.response_minutes_ceiling <= 0.0 {
            errors.push("response_minutes_ceiling must be positive".into());
        }
        if self.scoring.industry_field.is_empty() {
            errors.push("industry_field must not be empty".into());
        }

        if self.queue.per_minute_ceiling == 0 {
            errors.push("queue per_minute_ceiling must be greater than 0".into());
        }
        if self.queue.retry.max_attempts == 0 {
            errors.push("retry max_attempts must be greater than 0".into());
        }
        if self.queue.retry.multiplier < 1.0 {
            errors.push("retry multiplier must be at least 1.0".into());
        }

        if self.directory.ttl_secs == 0 {
            errors.push("directory ttl_secs must be greater than 0".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Config(errors.join("; ")))
        }
    }
}

/// How decided proposals proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Auto,
    #[default]
    ManualApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub mode: RoutingMode,
    /// Force manual approval when the lead's industry changed since the
    /// previous proposal for the same item.
    pub manual_on_industry_change: bool,
    pub pending_status_label: String,
    pub routed_status_label: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            mode: RoutingMode::default(),
            manual_on_industry_change: true,
            pending_status_label: "Pending Approval".into(),
            routed_status_label: "Routed".into(),
        }
    }
}

/// Toggle and weight for one scoring component. Weights are 0–100 and
/// expected to sum to roughly 100 across enabled components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    pub enabled: bool,
    pub weight: u32,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub industry_perf: ComponentConfig,
    pub conversion: ComponentConfig,
    pub avg_deal: ComponentConfig,
    pub hot_streak: ComponentConfig,
    pub response_speed: ComponentConfig,
    pub burnout: ComponentConfig,
    pub availability: ComponentConfig,
    /// Deal size at which the avg-deal component saturates.
    pub deal_size_ceiling: f64,
    /// Median response time scoring zero.
    pub response_minutes_ceiling: f64,
    /// Recent wins counting as a full hot streak.
    pub min_deals_threshold: u32,
    /// Lead field holding the industry used for the industry component.
    pub industry_field: String,
}

impl ScoringConfig {
    pub fn component(&self, component: Component) -> &ComponentConfig {
        match component {
            Component::IndustryPerf => &self.industry_perf,
            Component::Conversion => &self.conversion,
            Component::AvgDeal => &self.avg_deal,
            Component::HotStreak => &self.hot_streak,
            Component::ResponseSpeed => &self.response_speed,
            Component::Burnout => &self.burnout,
            Component::Availability => &self.availability,
        }
    }

    pub fn component_mut(&mut self, component: Component) -> &mut ComponentConfig {
        match component {
            Component::IndustryPerf => &mut self.industry_perf,
            Component::Conversion => &mut self.conversion,
            Component::AvgDeal => &mut self.avg_deal,
            Component::HotStreak => &mut self.hot_streak,
            Component::ResponseSpeed => &mut self.response_speed,
            Component::Burnout => &mut self.burnout,
            Component::Availability => &mut self.availability,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let component = |weight| ComponentConfig {
            enabled: true,
            weight,
        };
        Self {
            industry_perf: component(25),
            conversion: component(20),
            avg_deal: component(10),
            hot_streak: component(10),
            response_speed: component(15),
            burnout: component(10),
            availability: component(10),
            deal_size_ceiling: 50_000.0,
            response_minutes_ceiling: 240.0,
            min_deals_threshold: 5,
            industry_field: "industry".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Dispatches allowed per rolling 60 seconds; keep below the
    /// platform's documented limit.
    pub per_minute_ceiling: usize,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            per_minute_ceiling: 40,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// User directory cache lifetime.
    pub ttl_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}
