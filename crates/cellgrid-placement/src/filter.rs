//! Cell filters.
//!
//! A filter either judges candidates one at a time ([`CellFilter::cell_passes`])
//! or takes the whole list at once ([`CellFilter::filter_all`]). Only
//! whole-list filters can end the pipeline early, by returning a
//! [`Directive`] or [`FilterOutcome::Handled`].

use cellgrid_core::routing::RoutingError;
use cellgrid_core::{
    CellState, RequestContext, RequestSpec, RoutingPath, RunInstanceRequest, ROLE_UNRESTRICTED,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

/// Scheduler hint naming a target cell.
pub const CELL_HINT: &str = "cell";

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("scheduler hint {hint:?} is not a valid cell path: {source}")]
    InvalidTarget {
        hint: String,
        #[source]
        source: RoutingError,
    },
}

/// What the caller of one scheduling attempt knows about the request.
///
/// Built fresh for every attempt. Filters may strip hints they consume
/// from `scheduler_hints`; nothing else is mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterProperties {
    pub context: RequestContext,
    pub routing_path: RoutingPath,
    pub request_spec: RequestSpec,
    pub scheduler_hints: Map<String, Value>,
}

impl FilterProperties {
    pub fn new(
        context: &RequestContext,
        routing_path: &RoutingPath,
        request: &RunInstanceRequest,
    ) -> Self {
        Self {
            context: context.clone(),
            routing_path: routing_path.clone(),
            request_spec: request.request_spec.clone(),
            scheduler_hints: request.filter_properties.scheduler_hints.clone(),
        }
    }

    /// The availability zone named in the instance properties, if non-empty.
    pub fn availability_zone(&self) -> Option<&str> {
        self.request_spec
            .instance_properties
            .availability_zone
            .as_deref()
            .filter(|az| !az.is_empty())
    }

    /// The `cell` scheduler hint, if non-empty.
    pub fn cell_hint(&self) -> Option<&str> {
        self.scheduler_hints
            .get(CELL_HINT)
            .and_then(Value::as_str)
            .filter(|hint| !hint.is_empty())
    }

    /// Whether the request explicitly targets somewhere, by zone or by cell.
    pub fn has_target(&self) -> bool {
        self.availability_zone().is_some() || self.cell_hint().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveAction {
    DirectRoute,
}

/// Instruction to bypass ranking and forward the request to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub action: DirectiveAction,
    pub target: RoutingPath,
}

impl Directive {
    pub fn direct_route(target: RoutingPath) -> Self {
        Self {
            action: DirectiveAction::DirectRoute,
            target,
        }
    }
}

/// Result of applying one filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The surviving candidates, possibly empty.
    Cells(Vec<CellState>),
    /// Stop filtering and execute the directive.
    Directive(Directive),
    /// The filter took care of the request itself; nothing proceeds.
    Handled,
}

pub trait CellFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn cell_passes(&self, _cell: &CellState, _props: &FilterProperties) -> bool {
        true
    }

    fn filter_all(
        &self,
        cells: Vec<CellState>,
        props: &mut FilterProperties,
    ) -> Result<FilterOutcome, FilterError> {
        let props = &*props;
        Ok(FilterOutcome::Cells(
            cells
                .into_iter()
                .filter(|cell| self.cell_passes(cell, props))
                .collect(),
        ))
    }
}

// ── Built-in filters ───────────────────────────────────────────────

/// Keeps cells that advertise the requested availability zone.
#[derive(Debug, Default)]
pub struct AvailabilityZoneFilter;

impl CellFilter for AvailabilityZoneFilter {
    fn name(&self) -> &'static str {
        "availability_zone"
    }

    fn cell_passes(&self, cell: &CellState, props: &FilterProperties) -> bool {
        match props.availability_zone() {
            Some(az) => {
                let zones = cell.availability_zones();
                debug!(cell = %cell.name, %az, ?zones, "filtering on availability zone");
                zones.iter().any(|z| z == az)
            }
            None => true,
        }
    }
}

/// Keeps cells the caller's roles are allowed into.
#[derive(Debug, Default)]
pub struct RestrictFilter;

impl CellFilter for RestrictFilter {
    fn name(&self) -> &'static str {
        "restrict"
    }

    fn cell_passes(&self, cell: &CellState, props: &FilterProperties) -> bool {
        let required = cell.required_roles();
        required.is_empty()
            || required.iter().any(|r| r == ROLE_UNRESTRICTED)
            || required.iter().any(|r| props.context.roles.contains(r))
    }
}

/// Rejects direct-only cells unless the request names a target.
#[derive(Debug, Default)]
pub struct DirectOnlyFilter {
    direct_only_cells: Vec<String>,
}

impl DirectOnlyFilter {
    pub fn new(direct_only_cells: Vec<String>) -> Self {
        Self { direct_only_cells }
    }
}

impl CellFilter for DirectOnlyFilter {
    fn name(&self) -> &'static str {
        "direct_only"
    }

    fn cell_passes(&self, cell: &CellState, props: &FilterProperties) -> bool {
        if !props.has_target() && self.direct_only_cells.contains(&cell.name) {
            debug!(cell = %cell.name, "cell only accessible directly");
            return false;
        }
        true
    }
}

/// Turns a `cell` scheduler hint into a direct route.
///
/// The hint is removed from the properties so the receiving cell schedules
/// normally instead of routing again. `-` in the hint stands for `!`.
#[derive(Debug, Default)]
pub struct PickCellFilter;

impl CellFilter for PickCellFilter {
    fn name(&self) -> &'static str {
        "pick_cell"
    }

    fn filter_all(
        &self,
        cells: Vec<CellState>,
        props: &mut FilterProperties,
    ) -> Result<FilterOutcome, FilterError> {
        let Some(hint) = props.cell_hint().map(str::to_string) else {
            return Ok(FilterOutcome::Cells(cells));
        };
        props.scheduler_hints.remove(CELL_HINT);
        let target = RoutingPath::from_hint(&hint)
            .map_err(|source| FilterError::InvalidTarget { hint, source })?;
        info!(cell = %target, "filtering for a specific cell");
        Ok(FilterOutcome::Directive(Directive::direct_route(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgrid_core::{InstanceType, RequestSpec};
    use serde_json::json;

    fn cell(name: &str, capabilities: Value) -> CellState {
        let mut cell = CellState::new(name);
        if let Value::Object(map) = capabilities {
            cell.capabilities = map;
        }
        cell
    }

    fn props(az: Option<&str>, hints: Value) -> FilterProperties {
        let mut spec = RequestSpec {
            instance_properties: Default::default(),
            instance_uuids: vec!["uuid-1".to_string()],
            instance_type: InstanceType::default(),
            image: Value::Null,
            security_groups: Vec::new(),
            block_device_mapping: Vec::new(),
        };
        spec.instance_properties.availability_zone = az.map(str::to_string);
        let mut request = RunInstanceRequest::new(spec);
        if let Value::Object(map) = hints {
            request.filter_properties.scheduler_hints = map;
        }
        FilterProperties::new(
            &RequestContext::new("user", "project"),
            &RoutingPath::root("api"),
            &request,
        )
    }

    fn names(outcome: FilterOutcome) -> Vec<String> {
        match outcome {
            FilterOutcome::Cells(cells) => cells.into_iter().map(|c| c.name).collect(),
            other => panic!("expected cells, got {other:?}"),
        }
    }

    fn zoned_cells() -> Vec<CellState> {
        vec![
            cell("c1", json!({"availability_zones": ["melbourne", "sydney"]})),
            cell("c2", json!({"availability_zones": ["sydney"]})),
            cell("c3", json!({})),
        ]
    }

    // ── Availability zone ──────────────────────────────────────────

    #[test]
    fn az_filter_keeps_only_matching_cells() {
        let mut p = props(Some("melbourne"), json!({}));
        let outcome = AvailabilityZoneFilter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(outcome), vec!["c1"]);
    }

    #[test]
    fn az_filter_passes_all_without_zone() {
        let mut p = props(None, json!({}));
        let outcome = AvailabilityZoneFilter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(outcome), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn az_filter_ignores_cell_hint() {
        let mut p = props(None, json!({"cell": "sydney"}));
        let outcome = AvailabilityZoneFilter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(outcome).len(), 3);
    }

    // ── Restrict ───────────────────────────────────────────────────

    #[test]
    fn restrict_filter_matches_roles() {
        let cells = vec![
            cell("open", json!({})),
            cell("unrestricted", json!({"required_roles": ["unrestricted", "admin"]})),
            cell("admin-only", json!({"required_roles": ["admin"]})),
            cell("ops-only", json!({"required_roles": "ops,netops"})),
        ];

        let mut p = props(None, json!({}));
        let plain = RestrictFilter.filter_all(cells.clone(), &mut p).unwrap();
        assert_eq!(names(plain), vec!["open", "unrestricted"]);

        p.context = p.context.clone().with_roles(&["member", "netops"]);
        let with_roles = RestrictFilter.filter_all(cells, &mut p).unwrap();
        assert_eq!(names(with_roles), vec!["open", "unrestricted", "ops-only"]);
    }

    // ── Direct only ────────────────────────────────────────────────

    #[test]
    fn direct_only_rejects_without_target() {
        let filter = DirectOnlyFilter::new(vec!["c2".to_string()]);
        let mut p = props(None, json!({}));
        let outcome = filter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(outcome), vec!["c1", "c3"]);
    }

    #[test]
    fn direct_only_allows_with_zone_or_hint() {
        let filter = DirectOnlyFilter::new(vec!["c2".to_string()]);

        let mut zoned = props(Some("sydney"), json!({}));
        assert_eq!(names(filter.filter_all(zoned_cells(), &mut zoned).unwrap()).len(), 3);

        let mut hinted = props(None, json!({"cell": "api-c2"}));
        assert_eq!(names(filter.filter_all(zoned_cells(), &mut hinted).unwrap()).len(), 3);
    }

    // ── Pick cell ──────────────────────────────────────────────────

    #[test]
    fn pick_cell_routes_and_strips_hint() {
        let mut p = props(None, json!({"cell": "api-child1", "other": 1}));
        let outcome = PickCellFilter.filter_all(zoned_cells(), &mut p).unwrap();

        let expected = Directive::direct_route(RoutingPath::parse("api!child1").unwrap());
        assert_eq!(outcome, FilterOutcome::Directive(expected));
        assert!(!p.scheduler_hints.contains_key(CELL_HINT));
        assert!(p.scheduler_hints.contains_key("other"));

        // A second application sees no hint and leaves the list alone.
        let again = PickCellFilter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(again).len(), 3);
    }

    #[test]
    fn pick_cell_without_hint_is_passthrough() {
        let mut p = props(None, json!({"cell": ""}));
        let outcome = PickCellFilter.filter_all(zoned_cells(), &mut p).unwrap();
        assert_eq!(names(outcome), vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn pick_cell_rejects_malformed_target() {
        let mut p = props(None, json!({"cell": "api--child"}));
        let err = PickCellFilter.filter_all(Vec::new(), &mut p).unwrap_err();
        assert!(matches!(err, FilterError::InvalidTarget { .. }));
        assert!(p.cell_hint().is_none());
    }

    #[test]
    fn directive_serializes_as_direct_route() {
        let directive = Directive::direct_route(RoutingPath::parse("api!c1").unwrap());
        assert_eq!(
            serde_json::to_value(&directive).unwrap(),
            json!({"action": "direct_route", "target": "api!c1"})
        );
    }
}
