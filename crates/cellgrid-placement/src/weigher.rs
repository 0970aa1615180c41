//! Cell weighers.
//!
//! Each weigher returns a raw score for one cell; the pipeline multiplies it
//! by the weigher's multiplier and sums across weighers.

use std::time::Duration;

use cellgrid_core::{epoch_secs, CellState};
use serde_json::Value;
use tracing::debug;

use crate::filter::FilterProperties;

pub trait CellWeigher: Send + Sync {
    fn name(&self) -> &'static str;

    fn multiplier(&self) -> f64 {
        1.0
    }

    fn weigh(&self, cell: &CellState, props: &FilterProperties) -> f64;
}

// ── RAM by instance type ───────────────────────────────────────────

/// Prefers cells with room for more instances of the requested size.
///
/// Reads `capacities.ram_free.units_by_mb[<memory_mb>]`, the number of
/// instances of that size the cell can still take.
#[derive(Debug)]
pub struct RamByInstanceTypeWeigher {
    multiplier: f64,
}

impl RamByInstanceTypeWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl CellWeigher for RamByInstanceTypeWeigher {
    fn name(&self) -> &'static str {
        "ram_by_instance_type"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh(&self, cell: &CellState, props: &FilterProperties) -> f64 {
        let memory_mb = props.request_spec.instance_type.memory_mb.to_string();
        cell.capacities
            .get("ram_free")
            .and_then(|ram| ram.get("units_by_mb"))
            .and_then(|units| units.get(&memory_mb))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

// ── Mute child ─────────────────────────────────────────────────────

/// Pushes children that have not reported in a while to the bottom.
pub struct MuteChildWeigher {
    interval: Duration,
    multiplier: f64,
    mute_value: f64,
    clock: fn() -> u64,
}

impl MuteChildWeigher {
    pub fn new(interval: Duration, multiplier: f64, mute_value: f64) -> Self {
        Self {
            interval,
            multiplier,
            mute_value,
            clock: epoch_secs,
        }
    }

    /// Replace the wall clock (epoch seconds).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }
}

impl CellWeigher for MuteChildWeigher {
    fn name(&self) -> &'static str {
        "mute_child"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh(&self, cell: &CellState, _props: &FilterProperties) -> f64 {
        if cell.is_me {
            return 0.0;
        }
        match cell.last_seen {
            Some(seen) if (self.clock)().saturating_sub(seen) > self.interval.as_secs() => {
                debug!(cell = %cell.name, last_seen = seen, "cell has been muted");
                self.mute_value
            }
            _ => 0.0,
        }
    }
}

// ── Weight offset ──────────────────────────────────────────────────

/// Adds the cell's configured offset once more, scaled by `multiplier`.
///
/// The pipeline already applies `weight_offset` to every total; with the
/// default multiplier of 0 this weigher contributes nothing.
#[derive(Debug)]
pub struct WeightOffsetWeigher {
    multiplier: f64,
}

impl WeightOffsetWeigher {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl CellWeigher for WeightOffsetWeigher {
    fn name(&self) -> &'static str {
        "weight_offset"
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn weigh(&self, cell: &CellState, _props: &FilterProperties) -> f64 {
        cell.weight_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgrid_core::{InstanceType, RequestContext, RequestSpec, RoutingPath, RunInstanceRequest};
    use serde_json::json;

    fn props(memory_mb: u64) -> FilterProperties {
        let spec = RequestSpec {
            instance_properties: Default::default(),
            instance_uuids: vec!["uuid-1".to_string()],
            instance_type: InstanceType {
                name: "m1.small".to_string(),
                memory_mb,
                vcpus: 1,
                root_gb: 10,
            },
            image: Value::Null,
            security_groups: Vec::new(),
            block_device_mapping: Vec::new(),
        };
        FilterProperties::new(
            &RequestContext::new("user", "project"),
            &RoutingPath::root("api"),
            &RunInstanceRequest::new(spec),
        )
    }

    fn fixed_now() -> u64 {
        10_000
    }

    #[test]
    fn ram_weigher_reads_units_for_requested_size() {
        let mut cell = CellState::new("c1");
        cell.capacities.insert(
            "ram_free".to_string(),
            json!({"total_mb": 8192, "units_by_mb": {"2048": 4, "4096": 2}}),
        );
        let weigher = RamByInstanceTypeWeigher::new(10.0);

        assert_eq!(weigher.weigh(&cell, &props(2048)), 4.0);
        assert_eq!(weigher.weigh(&cell, &props(4096)), 2.0);
        assert_eq!(weigher.weigh(&cell, &props(512)), 0.0);
        assert_eq!(weigher.weigh(&CellState::new("bare"), &props(2048)), 0.0);
        assert_eq!(weigher.multiplier(), 10.0);
    }

    #[test]
    fn mute_weigher_flags_stale_children() {
        let weigher = MuteChildWeigher::new(Duration::from_secs(300), -10.0, 1000.0)
            .with_clock(fixed_now);

        let mut stale = CellState::new("stale");
        stale.last_seen = Some(10_000 - 301);
        let mut fresh = CellState::new("fresh");
        fresh.last_seen = Some(10_000 - 300);
        let mut me = CellState::new("me");
        me.is_me = true;
        me.last_seen = Some(0);

        assert_eq!(weigher.weigh(&stale, &props(512)), 1000.0);
        assert_eq!(weigher.weigh(&fresh, &props(512)), 0.0);
        assert_eq!(weigher.weigh(&me, &props(512)), 0.0);
        assert_eq!(weigher.weigh(&CellState::new("unknown"), &props(512)), 0.0);
    }

    #[test]
    fn offset_weigher_returns_cell_offset() {
        let mut cell = CellState::new("c1");
        cell.weight_offset = 7.5;
        let weigher = WeightOffsetWeigher::new(0.0);
        assert_eq!(weigher.weigh(&cell, &props(512)), 7.5);
        assert_eq!(weigher.multiplier(), 0.0);
    }
}
