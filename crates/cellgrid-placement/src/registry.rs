//! Static name → constructor registry for filters and weighers.
//!
//! `all_filters` and `all_weighers` expand to every built-in in a fixed
//! order. Any other unknown name is a configuration error.

use std::time::Duration;

use cellgrid_core::config::SchedulerConfig;
use thiserror::Error;
use tracing::info;

use crate::filter::{
    AvailabilityZoneFilter, CellFilter, DirectOnlyFilter, PickCellFilter, RestrictFilter,
};
use crate::pipeline::Pipeline;
use crate::weigher::{CellWeigher, MuteChildWeigher, RamByInstanceTypeWeigher, WeightOffsetWeigher};

pub const ALL_FILTERS: &str = "all_filters";
pub const ALL_WEIGHERS: &str = "all_weighers";

/// Built-in filter names in the order `all_filters` installs them.
pub const FILTER_NAMES: [&str; 4] = ["availability_zone", "restrict", "direct_only", "pick_cell"];

/// Built-in weigher names in the order `all_weighers` installs them.
pub const WEIGHER_NAMES: [&str; 3] = ["ram_by_instance_type", "mute_child", "weight_offset"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown cell filter: {0}")]
    UnknownFilter(String),
    #[error("unknown cell weigher: {0}")]
    UnknownWeigher(String),
}

fn make_filter(name: &str, config: &SchedulerConfig) -> Result<Box<dyn CellFilter>, RegistryError> {
    let filter: Box<dyn CellFilter> = match name {
        "availability_zone" => Box::new(AvailabilityZoneFilter),
        "restrict" => Box::new(RestrictFilter),
        "direct_only" => Box::new(DirectOnlyFilter::new(config.direct_only_cells.clone())),
        "pick_cell" => Box::new(PickCellFilter),
        other => return Err(RegistryError::UnknownFilter(other.to_string())),
    };
    Ok(filter)
}

fn make_weigher(
    name: &str,
    config: &SchedulerConfig,
) -> Result<Box<dyn CellWeigher>, RegistryError> {
    let weigher: Box<dyn CellWeigher> = match name {
        "ram_by_instance_type" => Box::new(RamByInstanceTypeWeigher::new(config.ram_weight_multiplier)),
        "mute_child" => Box::new(MuteChildWeigher::new(
            Duration::from_secs(config.mute_child_interval_secs),
            config.mute_weight_multiplier,
            config.mute_weight_value,
        )),
        "weight_offset" => Box::new(WeightOffsetWeigher::new(config.weight_offset_multiplier)),
        other => return Err(RegistryError::UnknownWeigher(other.to_string())),
    };
    Ok(weigher)
}

/// Resolve filter names, expanding `all_filters`.
pub fn filters(
    names: &[String],
    config: &SchedulerConfig,
) -> Result<Vec<Box<dyn CellFilter>>, RegistryError> {
    let mut out = Vec::new();
    for name in names {
        if name == ALL_FILTERS {
            for builtin in FILTER_NAMES {
                out.push(make_filter(builtin, config)?);
            }
        } else {
            out.push(make_filter(name, config)?);
        }
    }
    Ok(out)
}

/// Resolve weigher names, expanding `all_weighers`.
pub fn weighers(
    names: &[String],
    config: &SchedulerConfig,
) -> Result<Vec<Box<dyn CellWeigher>>, RegistryError> {
    let mut out = Vec::new();
    for name in names {
        if name == ALL_WEIGHERS {
            for builtin in WEIGHER_NAMES {
                out.push(make_weigher(builtin, config)?);
            }
        } else {
            out.push(make_weigher(name, config)?);
        }
    }
    Ok(out)
}

/// Build the pipeline named by the scheduler configuration.
pub fn build_pipeline(config: &SchedulerConfig) -> Result<Pipeline, RegistryError> {
    let pipeline = Pipeline::new(
        filters(&config.filters, config)?,
        weighers(&config.weighers, config)?,
    );
    info!(
        filters = ?pipeline.filter_names(),
        weighers = ?pipeline.weigher_names(),
        "cell scheduling pipeline built"
    );
    Ok(pipeline)
}
