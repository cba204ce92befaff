use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::movement::{BlockedRoutePolicy, BudgetMode, MovementRules, Neighborhood};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_movement_budget")]
    pub movement_budget: u32,
    #[serde(default)]
    pub budget_mode: BudgetMode,
    #[serde(default)]
    pub blocked_route_policy: BlockedRoutePolicy,
    #[serde(default)]
    pub neighborhood: Neighborhood,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u32,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: u32,
    #[serde(default = "default_snapshot_directory")]
    pub snapshot_directory: String,
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    #[serde(default = "default_websocket_bind")]
    pub websocket_bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_tick_interval_ms() -> u64 {
    10_000
}
fn default_movement_budget() -> u32 {
    1
}
fn default_snapshot_interval() -> u32 {
    30
}
fn default_max_snapshots() -> u32 {
    10
}
fn default_snapshot_directory() -> String {
    "./snapshots".to_string()
}
fn default_websocket_port() -> u16 {
    8120
}
fn default_websocket_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            tick_interval_ms: default_tick_interval_ms(),
            movement_budget: default_movement_budget(),
            budget_mode: BudgetMode::default(),
            blocked_route_policy: BlockedRoutePolicy::default(),
            neighborhood: Neighborhood::default(),
            snapshot_interval: default_snapshot_interval(),
            max_snapshots: default_max_snapshots(),
            snapshot_directory: default_snapshot_directory(),
            websocket_port: default_websocket_port(),
            websocket_bind: default_websocket_bind(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: ServiceConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.tick_interval_ms == 0 {
            errors.push(format!(
                "tick_interval_ms must be > 0, got {}. Example: tick_interval_ms = 10000",
                self.tick_interval_ms
            ));
        }

        if self.movement_budget == 0 {
            errors.push(format!(
                "movement_budget must be > 0, got {}. Example: movement_budget = 1",
                self.movement_budget
            ));
        }

        if self.snapshot_interval == 0 {
            errors.push(format!(
                "snapshot_interval must be > 0, got {}. Example: snapshot_interval = 30",
                self.snapshot_interval
            ));
        }

        if self.max_snapshots == 0 {
            errors.push(format!(
                "max_snapshots must be > 0, got {}. Example: max_snapshots = 10",
                self.max_snapshots
            ));
        }

        if !(1024..=65535).contains(&self.websocket_port) {
            errors.push(format!(
                "websocket_port must be 1024-65535, got {}. Example: websocket_port = 8120",
                self.websocket_port
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        if self.log_format != "text" && self.log_format != "json" {
            errors.push(format!(
                "log_format must be \"text\" or \"json\", got '{}'. Example: log_format = \"text\"",
                self.log_format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn movement_rules(&self) -> MovementRules {
        MovementRules {
            budget_mode: self.budget_mode,
            budget: self.movement_budget,
            blocked_policy: self.blocked_route_policy,
            neighborhood: self.neighborhood,
        }
    }
}
