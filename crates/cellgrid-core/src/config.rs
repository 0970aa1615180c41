//! cellgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::CellState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CellgridConfig {
    pub cell: CellConfig,
    pub scheduler: SchedulerConfig,
    pub heal: HealConfig,
}

/// The local cell and, for standalone runs, its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub name: String,
    pub capabilities: Map<String, Value>,
    pub capacities: Map<String, Value>,
    pub children: Vec<ChildCellConfig>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            name: "api".to_string(),
            capabilities: Map::new(),
            capacities: Map::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildCellConfig {
    pub name: String,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    #[serde(default)]
    pub capacities: Map<String, Value>,
    pub weight_scale: Option<f64>,
    pub weight_offset: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Filter names, resolved through the placement registry.
    pub filters: Vec<String>,
    /// Weigher names, resolved through the placement registry.
    pub weighers: Vec<String>,
    /// Retries after "no cells available" (negative means none).
    pub retries: i32,
    pub retry_delay_secs: u64,
    /// Cells reachable only through an explicit target.
    pub direct_only_cells: Vec<String>,
    pub ram_weight_multiplier: f64,
    pub mute_child_interval_secs: u64,
    pub mute_weight_multiplier: f64,
    pub mute_weight_value: f64,
    pub weight_offset_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            filters: vec!["all_filters".to_string()],
            weighers: vec!["all_weighers".to_string()],
            retries: 10,
            retry_delay_secs: 2,
            direct_only_cells: Vec::new(),
            ram_weight_multiplier: 10.0,
            mute_child_interval_secs: 300,
            mute_weight_multiplier: -10.0,
            mute_weight_value: 1000.0,
            weight_offset_multiplier: 0.0,
        }
    }
}

impl SchedulerConfig {
    /// Number of retries after the first attempt.
    pub fn retry_count(&self) -> u32 {
        self.retries.max(0) as u32
    }

    /// Delay between attempts, never shorter than one second.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// Seconds between healing passes; 0 disables healing.
    pub interval_secs: u64,
    /// Only heal records changed within this many seconds; 0 means all.
    pub updated_at_threshold_secs: u64,
    /// Records healed per pass.
    pub update_number: u32,
    /// How often the monitor checks whether a pass is due.
    pub tick_secs: u64,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            updated_at_threshold_secs: 0,
            update_number: 10,
            tick_secs: 1,
        }
    }
}

impl CellgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CellgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The local cell as a scheduling candidate.
    pub fn my_cell(&self) -> CellState {
        let mut cell = CellState::new(self.cell.name.clone());
        cell.is_me = true;
        cell.capabilities = self.cell.capabilities.clone();
        cell.capacities = self.cell.capacities.clone();
        cell
    }

    /// Child cells declared in the config.
    pub fn child_cells(&self) -> Vec<CellState> {
        self.cell
            .children
            .iter()
            .map(|child| {
                let mut cell = CellState::new(child.name.clone());
                cell.capabilities = child.capabilities.clone();
                cell.capacities = child.capacities.clone();
                cell.weight_scale = child.weight_scale.unwrap_or(1.0);
                cell.weight_offset = child.weight_offset.unwrap_or(0.0);
                cell
            })
            .collect()
    }
}
