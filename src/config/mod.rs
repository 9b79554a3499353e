//! Configuration types and loading.
//!
//! Provides all configuration structures for lead-router:
//! - `RouterConfig`: top-level configuration with validation
//! - `RoutingSettings`: routing mode and manual-approval triggers
//! - `ScoringConfig`, `QueueConfig`: engine and scheduler tuning

mod settings;

pub use settings::{
    ComponentConfig, DirectoryConfig, QueueConfig, RetryConfig, RouterConfig, RoutingMode,
    RoutingSettings, ScoringConfig,
};
