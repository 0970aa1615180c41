//! Id-mapping handlers (instance ids, S3 images, volume ids).
//!
//! Mappings are only ever re-created; healing a deleted mapping is logged
//! as unsupported.

use std::sync::Arc;

use async_trait::async_trait;
use cellgrid_core::entries::{InstanceIdMapping, S3ImageMapping, VolumeIdMapping};
use cellgrid_core::{
    CellMessage, ConsistencyEntry, EntryFilters, HierarchyMessenger, RecordSource, SortDir,
    SortKey, SourceError,
};
use tracing::{debug, error};

use crate::engine::{BroadcastDirection, HealStrategy};
use crate::error::HealResult;

pub struct MappingHandler<E: ConsistencyEntry> {
    source: Arc<dyn RecordSource<E>>,
    messenger: Arc<dyn HierarchyMessenger>,
    create: fn(&E) -> CellMessage,
    direction: BroadcastDirection,
}

impl<E: ConsistencyEntry> MappingHandler<E> {
    pub fn new(
        source: Arc<dyn RecordSource<E>>,
        messenger: Arc<dyn HierarchyMessenger>,
        create: fn(&E) -> CellMessage,
    ) -> Self {
        Self {
            source,
            messenger,
            create,
            direction: BroadcastDirection::default(),
        }
    }

    pub fn with_direction(mut self, direction: BroadcastDirection) -> Self {
        self.direction = direction;
        self
    }
}

impl MappingHandler<InstanceIdMapping> {
    pub fn instance_id_mappings(
        source: Arc<dyn RecordSource<InstanceIdMapping>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self::new(source, messenger, CellMessage::ec2_instance_create)
    }
}

impl MappingHandler<S3ImageMapping> {
    pub fn s3_images(
        source: Arc<dyn RecordSource<S3ImageMapping>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self::new(source, messenger, CellMessage::s3_image_create)
    }
}

impl MappingHandler<VolumeIdMapping> {
    pub fn volume_id_mappings(
        source: Arc<dyn RecordSource<VolumeIdMapping>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self::new(source, messenger, CellMessage::ec2_volume_create)
    }
}

#[async_trait]
impl<E: ConsistencyEntry> HealStrategy for MappingHandler<E> {
    type Entry = E;

    fn fetch(&self, filters: &EntryFilters) -> Result<Vec<E>, SourceError> {
        self.source.get_entries(filters, SortKey::Deleted, SortDir::Asc)
    }

    async fn send_create(&self, entry: &E) -> HealResult<()> {
        let message = (self.create)(entry);
        let method = message.method();
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(
            kind = %E::KIND,
            id = %entry.id(),
            key = %entry.natural_key(),
            method,
            "sent broadcast to create {}",
            E::KIND.model_name()
        );
        Ok(())
    }

    async fn send_destroy(&self, entry: &E) -> HealResult<()> {
        error!(
            kind = %E::KIND,
            id = %entry.id(),
            "healing attempted to delete an {} entry, which is not supported",
            E::KIND.model_name()
        );
        Ok(())
    }
}
