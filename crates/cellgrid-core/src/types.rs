//! Shared types used across cellgrid crates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Capability key listing the availability zones a cell serves.
pub const CAP_AVAILABILITY_ZONES: &str = "availability_zones";

/// Capability key listing the roles required to schedule into a cell.
pub const CAP_REQUIRED_ROLES: &str = "required_roles";

/// Role that opens a restricted cell to everyone.
pub const ROLE_UNRESTRICTED: &str = "unrestricted";

// ── Cell ───────────────────────────────────────────────────────────

/// A snapshot of one cell as seen by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellState {
    /// Name of the cell; a single routing path segment.
    pub name: String,
    /// True for the cell the scheduler is running in.
    #[serde(default)]
    pub is_me: bool,
    /// Free-form advertised capabilities.
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    /// Free-form capacity information (e.g. `ram_free`).
    #[serde(default)]
    pub capacities: Map<String, Value>,
    #[serde(default = "default_weight_scale")]
    pub weight_scale: f64,
    #[serde(default)]
    pub weight_offset: f64,
    /// Unix timestamp of the last capability/capacity update from this cell.
    #[serde(default)]
    pub last_seen: Option<u64>,
}

fn default_weight_scale() -> f64 {
    1.0
}

impl CellState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_me: false,
            capabilities: Map::new(),
            capacities: Map::new(),
            weight_scale: 1.0,
            weight_offset: 0.0,
            last_seen: None,
        }
    }

    /// Availability zones advertised through capabilities.
    pub fn availability_zones(&self) -> Vec<String> {
        string_list(self.capabilities.get(CAP_AVAILABILITY_ZONES))
    }

    /// Roles required to schedule into this cell. Empty means open.
    pub fn required_roles(&self) -> Vec<String> {
        string_list(self.capabilities.get(CAP_REQUIRED_ROLES))
    }

    pub fn has_capacities(&self) -> bool {
        !self.capacities.is_empty()
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_me {
            write!(f, "Cell '{}' (me)", self.name)
        } else {
            write!(f, "Cell '{}'", self.name)
        }
    }
}

/// Read a capability that may be a list of strings or a single string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// A cell paired with its final score.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCell {
    pub cell: CellState,
    pub score: f64,
}

impl std::fmt::Display for WeightedCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeightedCell [cell: {}, weight: {}]", self.cell.name, self.score)
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// Caller identity attached to every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            roles: Vec::new(),
            request_id: None,
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Properties of the instances being created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Everything else the caller sent, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Flavor of the requested instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceType {
    #[serde(default)]
    pub name: String,
    pub memory_mb: u64,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub root_gb: u64,
}

/// What to build: the request spec half of a scheduling request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSpec {
    pub instance_properties: InstanceProperties,
    pub instance_uuids: Vec<String>,
    pub instance_type: InstanceType,
    #[serde(default)]
    pub image: Value,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub block_device_mapping: Vec<Value>,
}

/// Scheduler input that is allowed to vary per hop.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterHints {
    #[serde(default)]
    pub scheduler_hints: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A full scheduling request as it travels down the hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInstanceRequest {
    pub request_spec: RequestSpec,
    #[serde(default)]
    pub filter_properties: FilterHints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub injected_files: Vec<Value>,
    #[serde(default)]
    pub requested_networks: Option<Value>,
    #[serde(default = "default_true")]
    pub is_first_time: bool,
}

fn default_true() -> bool {
    true
}

/// A request that cannot be scheduled no matter how often it is retried.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed scheduling request: {0}")]
    Malformed(String),
}

impl RunInstanceRequest {
    pub fn new(request_spec: RequestSpec) -> Self {
        Self {
            request_spec,
            filter_properties: FilterHints::default(),
            admin_password: None,
            injected_files: Vec::new(),
            requested_networks: None,
            is_first_time: true,
        }
    }

    /// Parse a request from an untyped message body.
    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        let request: Self = serde_json::from_value(value)
            .map_err(|e| RequestError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Check the fields every hop relies on.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.request_spec.instance_uuids.is_empty() {
            return Err(RequestError::Malformed(
                "request_spec.instance_uuids is empty".to_string(),
            ));
        }
        if let Some(blank) = self
            .request_spec
            .instance_uuids
            .iter()
            .find(|u| u.trim().is_empty())
        {
            return Err(RequestError::Malformed(format!(
                "blank instance uuid {blank:?}"
            )));
        }
        Ok(())
    }

    pub fn instance_uuids(&self) -> &[String] {
        &self.request_spec.instance_uuids
    }

    /// The scheduler hint that names a target cell, if any.
    pub fn cell_hint(&self) -> Option<&str> {
        self.filter_properties
            .scheduler_hints
            .get("cell")
            .and_then(Value::as_str)
    }
}

// ── Instances ──────────────────────────────────────────────────────

/// Coarse lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Building,
    Active,
    Error,
    Deleted,
}

/// A persisted instance record created by the cell that accepted it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub uuid: String,
    pub launch_index: u32,
    pub num_instances: u32,
    pub vm_state: VmState,
    pub project_id: Option<String>,
    pub availability_zone: Option<String>,
    pub display_name: Option<String>,
    pub memory_mb: u64,
    pub cell_name: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Upward notification describing an instance's new state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceUpdate {
    pub uuid: String,
    pub vm_state: VmState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl InstanceUpdate {
    /// An update that only flips the instance into the error state.
    pub fn error(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            vm_state: VmState::Error,
            cell_name: None,
            launch_index: None,
            project_id: None,
        }
    }
}

impl From<&InstanceRecord> for InstanceUpdate {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            uuid: record.uuid.clone(),
            vm_state: record.vm_state,
            cell_name: record.cell_name.clone(),
            launch_index: Some(record.launch_index),
            project_id: record.project_id.clone(),
        }
    }
}

/// An instance action record (e.g. "create started").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceAction {
    pub instance_uuid: String,
    pub action: String,
    pub user_id: String,
    pub project_id: String,
    pub request_id: Option<String>,
    pub start_time: u64,
}

impl InstanceAction {
    pub const CREATE: &'static str = "create";

    /// Pack a "create started" action for one instance.
    pub fn create_started(ctx: &RequestContext, instance_uuid: &str, now: u64) -> Self {
        Self {
            instance_uuid: instance_uuid.to_string(),
            action: Self::CREATE.to_string(),
            user_id: ctx.user_id.clone(),
            project_id: ctx.project_id.clone(),
            request_id: ctx.request_id.clone(),
            start_time: now,
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
