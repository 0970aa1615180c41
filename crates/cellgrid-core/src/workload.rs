//! Instance store — local persistence for workloads a cell accepts.

use thiserror::Error;

use crate::types::{InstanceAction, InstanceRecord, RequestSpec, VmState};

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("instance store error: {0}")]
    Store(String),
}

pub trait InstanceStore: Send + Sync {
    /// Persist the record for instance `index` of `num_instances`.
    fn create_instance(
        &self,
        spec: &RequestSpec,
        uuid: &str,
        num_instances: u32,
        index: u32,
    ) -> Result<InstanceRecord, WorkloadError>;

    fn action_start(&self, action: &InstanceAction) -> Result<(), WorkloadError>;

    fn set_vm_state(&self, uuid: &str, state: VmState) -> Result<(), WorkloadError>;
}
