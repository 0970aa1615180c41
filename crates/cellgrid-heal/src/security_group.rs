//! Security group handlers: groups, their rules, and instance memberships.
//!
//! A deleted record is only propagated as a destroy when no live record with
//! the same natural key has replaced it. Otherwise the destroy would undo a
//! re-create that the parent cell already knows about.

use std::sync::Arc;

use async_trait::async_trait;
use cellgrid_core::entries::{SecurityGroup, SecurityGroupInstanceAssociation, SecurityGroupRule};
use cellgrid_core::{
    CellMessage, ConsistencyEntry, EntryFilters, HierarchyMessenger, RecordSource, SortDir,
    SortKey, SourceError,
};
use tracing::{debug, info, warn};

use crate::engine::{BroadcastDirection, HealStrategy};
use crate::error::HealResult;

// ── Shared lookups ─────────────────────────────────────────────────

/// Whether a live record shares `entry`'s natural key.
fn has_live_replacement<E: ConsistencyEntry>(
    source: &dyn RecordSource<E>,
    entry: &E,
) -> Result<bool, SourceError> {
    let mut filters = EntryFilters::default()
        .live_only()
        .natural_key(entry.natural_key());
    if let Some(project) = entry.project_id() {
        filters = filters.project(project);
    }
    let live = source.get_entries(&filters, SortKey::CreatedAt, SortDir::Desc)?;
    Ok(!live.is_empty())
}

fn find_group(
    groups: &dyn RecordSource<SecurityGroup>,
    id: i64,
    live_only: bool,
) -> Result<Option<SecurityGroup>, SourceError> {
    let mut filters = EntryFilters::default().with_id(id.to_string());
    if live_only {
        filters = filters.live_only();
    }
    let found = groups.get_entries(&filters, SortKey::Deleted, SortDir::Asc)?;
    Ok(found.into_iter().next())
}

fn log_suppressed<E: ConsistencyEntry>(entry: &E) {
    info!(
        kind = %E::KIND,
        id = %entry.id(),
        key = %entry.natural_key(),
        "live {} with the same key exists, not sending destroy",
        E::KIND.model_name()
    );
}

// ── Groups ─────────────────────────────────────────────────────────

pub struct GroupHandler {
    groups: Arc<dyn RecordSource<SecurityGroup>>,
    messenger: Arc<dyn HierarchyMessenger>,
    direction: BroadcastDirection,
}

impl GroupHandler {
    pub fn new(
        groups: Arc<dyn RecordSource<SecurityGroup>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self {
            groups,
            messenger,
            direction: BroadcastDirection::default(),
        }
    }

    pub fn with_direction(mut self, direction: BroadcastDirection) -> Self {
        self.direction = direction;
        self
    }
}

#[async_trait]
impl HealStrategy for GroupHandler {
    type Entry = SecurityGroup;

    fn fetch(&self, filters: &EntryFilters) -> Result<Vec<SecurityGroup>, SourceError> {
        self.groups.get_entries(filters, SortKey::Deleted, SortDir::Asc)
    }

    async fn send_create(&self, group: &SecurityGroup) -> HealResult<()> {
        let message = CellMessage::SecurityGroupCreate {
            group: group.clone(),
        };
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(id = group.id, name = %group.name, "sent security group create");
        Ok(())
    }

    async fn send_destroy(&self, group: &SecurityGroup) -> HealResult<()> {
        if has_live_replacement(self.groups.as_ref(), group)? {
            log_suppressed(group);
            return Ok(());
        }
        let message = CellMessage::SecurityGroupDestroy {
            group: group.clone(),
        };
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(id = group.id, name = %group.name, "sent security group destroy");
        Ok(())
    }
}

// ── Rules ──────────────────────────────────────────────────────────

pub struct RuleHandler {
    rules: Arc<dyn RecordSource<SecurityGroupRule>>,
    groups: Arc<dyn RecordSource<SecurityGroup>>,
    messenger: Arc<dyn HierarchyMessenger>,
    direction: BroadcastDirection,
}

impl RuleHandler {
    pub fn new(
        rules: Arc<dyn RecordSource<SecurityGroupRule>>,
        groups: Arc<dyn RecordSource<SecurityGroup>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self {
            rules,
            groups,
            messenger,
            direction: BroadcastDirection::default(),
        }
    }

    pub fn with_direction(mut self, direction: BroadcastDirection) -> Self {
        self.direction = direction;
        self
    }
}

#[async_trait]
impl HealStrategy for RuleHandler {
    type Entry = SecurityGroupRule;

    fn fetch(&self, filters: &EntryFilters) -> Result<Vec<SecurityGroupRule>, SourceError> {
        self.rules.get_entries(filters, SortKey::Deleted, SortDir::Asc)
    }

    async fn send_create(&self, rule: &SecurityGroupRule) -> HealResult<()> {
        let Some(group) = find_group(self.groups.as_ref(), rule.parent_group_id, true)? else {
            warn!(
                rule = rule.id,
                group = rule.parent_group_id,
                "parent security group not found, skipping rule create"
            );
            return Ok(());
        };
        let message = CellMessage::SecurityGroupRuleCreate {
            group,
            rule: rule.clone(),
        };
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(rule = rule.id, group = rule.parent_group_id, "sent security group rule create");
        Ok(())
    }

    async fn send_destroy(&self, rule: &SecurityGroupRule) -> HealResult<()> {
        if has_live_replacement(self.rules.as_ref(), rule)? {
            log_suppressed(rule);
            return Ok(());
        }
        let Some(group) = find_group(self.groups.as_ref(), rule.parent_group_id, false)? else {
            warn!(
                rule = rule.id,
                group = rule.parent_group_id,
                "parent security group not found, skipping rule destroy"
            );
            return Ok(());
        };
        let message = CellMessage::SecurityGroupRuleDestroy {
            group,
            rule: rule.clone(),
        };
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(rule = rule.id, group = rule.parent_group_id, "sent security group rule destroy");
        Ok(())
    }
}

// ── Instance memberships ───────────────────────────────────────────

pub struct InstanceGroupHandler {
    associations: Arc<dyn RecordSource<SecurityGroupInstanceAssociation>>,
    groups: Arc<dyn RecordSource<SecurityGroup>>,
    messenger: Arc<dyn HierarchyMessenger>,
    direction: BroadcastDirection,
}

impl InstanceGroupHandler {
    pub fn new(
        associations: Arc<dyn RecordSource<SecurityGroupInstanceAssociation>>,
        groups: Arc<dyn RecordSource<SecurityGroup>>,
        messenger: Arc<dyn HierarchyMessenger>,
    ) -> Self {
        Self {
            associations,
            groups,
            messenger,
            direction: BroadcastDirection::default(),
        }
    }

    pub fn with_direction(mut self, direction: BroadcastDirection) -> Self {
        self.direction = direction;
        self
    }

    async fn send_membership(
        &self,
        association: &SecurityGroupInstanceAssociation,
        add: bool,
    ) -> HealResult<()> {
        let Some(group) =
            find_group(self.groups.as_ref(), association.security_group_id, add)?
        else {
            warn!(
                instance = %association.instance_uuid,
                group = association.security_group_id,
                "security group not found, skipping membership sync"
            );
            return Ok(());
        };
        let instance_uuid = association.instance_uuid.clone();
        let message = if add {
            CellMessage::InstanceAddSecurityGroup { instance_uuid, group }
        } else {
            CellMessage::InstanceRemoveSecurityGroup { instance_uuid, group }
        };
        let method = message.method();
        self.direction.send(self.messenger.as_ref(), message).await?;
        debug!(
            instance = %association.instance_uuid,
            group = association.security_group_id,
            method,
            "sent security group membership"
        );
        Ok(())
    }
}

#[async_trait]
impl HealStrategy for InstanceGroupHandler {
    type Entry = SecurityGroupInstanceAssociation;

    fn fetch(
        &self,
        filters: &EntryFilters,
    ) -> Result<Vec<SecurityGroupInstanceAssociation>, SourceError> {
        self.associations
            .get_entries(filters, SortKey::Deleted, SortDir::Asc)
    }

    async fn send_create(&self, association: &SecurityGroupInstanceAssociation) -> HealResult<()> {
        self.send_membership(association, true).await
    }

    async fn send_destroy(&self, association: &SecurityGroupInstanceAssociation) -> HealResult<()> {
        if has_live_replacement(self.associations.as_ref(), association)? {
            log_suppressed(association);
            return Ok(());
        }
        self.send_membership(association, false).await
    }
}
