//! Consistency entries — records whose existence must be mirrored at the
//! top of the cell hierarchy.
//!
//! Every kind shares a `deleted` flag, an identity, and change timestamps.
//! The healing loop only reads these records; the record source owns them.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The kinds of record the healing loop knows how to relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    InstanceIdMapping,
    S3Image,
    VolumeIdMapping,
    SecurityGroup,
    SecurityGroupRule,
    SecurityGroupInstanceAssociation,
}

impl EntryKind {
    pub const ALL: [EntryKind; 6] = [
        EntryKind::InstanceIdMapping,
        EntryKind::S3Image,
        EntryKind::VolumeIdMapping,
        EntryKind::SecurityGroup,
        EntryKind::SecurityGroupRule,
        EntryKind::SecurityGroupInstanceAssociation,
    ];

    pub fn model_name(&self) -> &'static str {
        match self {
            EntryKind::InstanceIdMapping => "instance id mapping",
            EntryKind::S3Image => "s3 image",
            EntryKind::VolumeIdMapping => "volume id mapping",
            EntryKind::SecurityGroup => "security group",
            EntryKind::SecurityGroupRule => "security group rule",
            EntryKind::SecurityGroupInstanceAssociation => "security group instance association",
        }
    }

    pub fn model_name_plural(&self) -> &'static str {
        match self {
            EntryKind::InstanceIdMapping => "instance id mappings",
            EntryKind::S3Image => "s3 images",
            EntryKind::VolumeIdMapping => "volume id mappings",
            EntryKind::SecurityGroup => "security groups",
            EntryKind::SecurityGroupRule => "security group rules",
            EntryKind::SecurityGroupInstanceAssociation => "security group instance associations",
        }
    }

    /// Storage table holding records of this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntryKind::InstanceIdMapping => "ec2_instances",
            EntryKind::S3Image => "s3_images",
            EntryKind::VolumeIdMapping => "ec2_volumes",
            EntryKind::SecurityGroup => "security_groups",
            EntryKind::SecurityGroupRule => "security_group_rules",
            EntryKind::SecurityGroupInstanceAssociation => "security_group_instance_associations",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_name())
    }
}

/// Common view over every consistency record kind.
pub trait ConsistencyEntry:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: EntryKind;

    /// Primary identity within the record's own table.
    fn id(&self) -> String;

    fn deleted(&self) -> bool;

    fn created_at(&self) -> u64;

    /// Latest of created/updated/deleted timestamps.
    fn last_changed(&self) -> u64;

    fn project_id(&self) -> Option<&str> {
        None
    }

    /// Key identifying the logically-same record across delete/re-create.
    fn natural_key(&self) -> String;
}

/// Timestamps and soft-deletion flag carried by every record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub deleted_at: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
}

impl Timestamps {
    pub fn created(at: u64) -> Self {
        Self {
            created_at: at,
            ..Self::default()
        }
    }

    pub fn deleted(created_at: u64, deleted_at: u64) -> Self {
        Self {
            created_at,
            updated_at: None,
            deleted_at: Some(deleted_at),
            deleted: true,
        }
    }

    pub fn last_changed(&self) -> u64 {
        self.created_at
            .max(self.updated_at.unwrap_or(0))
            .max(self.deleted_at.unwrap_or(0))
    }
}

// ── Id mappings ────────────────────────────────────────────────────

/// Maps a uuid onto a short integer id (EC2-style instance ids).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceIdMapping {
    pub id: i64,
    pub uuid: String,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// Maps an image uuid onto its S3 integer id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S3ImageMapping {
    pub id: i64,
    pub uuid: String,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

/// Maps a volume uuid onto a short integer id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeIdMapping {
    pub id: i64,
    pub uuid: String,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

macro_rules! impl_mapping_entry {
    ($ty:ty, $kind:expr) => {
        impl ConsistencyEntry for $ty {
            const KIND: EntryKind = $kind;

            fn id(&self) -> String {
                self.id.to_string()
            }

            fn deleted(&self) -> bool {
                self.timestamps.deleted
            }

            fn created_at(&self) -> u64 {
                self.timestamps.created_at
            }

            fn last_changed(&self) -> u64 {
                self.timestamps.last_changed()
            }

            fn natural_key(&self) -> String {
                self.uuid.clone()
            }
        }
    };
}

impl_mapping_entry!(InstanceIdMapping, EntryKind::InstanceIdMapping);
impl_mapping_entry!(S3ImageMapping, EntryKind::S3Image);
impl_mapping_entry!(VolumeIdMapping, EntryKind::VolumeIdMapping);

// ── Security groups ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub project_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl ConsistencyEntry for SecurityGroup {
    const KIND: EntryKind = EntryKind::SecurityGroup;

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn deleted(&self) -> bool {
        self.timestamps.deleted
    }

    fn created_at(&self) -> u64 {
        self.timestamps.created_at
    }

    fn last_changed(&self) -> u64 {
        self.timestamps.last_changed()
    }

    fn project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }

    fn natural_key(&self) -> String {
        format!("{}/{}", self.project_id, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroupRule {
    pub id: i64,
    pub parent_group_id: i64,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub from_port: Option<i32>,
    #[serde(default)]
    pub to_port: Option<i32>,
    #[serde(default)]
    pub cidr: Option<String>,
    /// Source group for group-to-group rules.
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl ConsistencyEntry for SecurityGroupRule {
    const KIND: EntryKind = EntryKind::SecurityGroupRule;

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn deleted(&self) -> bool {
        self.timestamps.deleted
    }

    fn created_at(&self) -> u64 {
        self.timestamps.created_at
    }

    fn last_changed(&self) -> u64 {
        self.timestamps.last_changed()
    }

    fn natural_key(&self) -> String {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(T::to_string).unwrap_or_default()
        }
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.parent_group_id,
            opt(&self.protocol),
            opt(&self.from_port),
            opt(&self.to_port),
            opt(&self.cidr),
            opt(&self.group_id),
        )
    }
}

/// Membership of one instance in one security group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroupInstanceAssociation {
    pub id: i64,
    pub instance_uuid: String,
    pub security_group_id: i64,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl ConsistencyEntry for SecurityGroupInstanceAssociation {
    const KIND: EntryKind = EntryKind::SecurityGroupInstanceAssociation;

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn deleted(&self) -> bool {
        self.timestamps.deleted
    }

    fn created_at(&self) -> u64 {
        self.timestamps.created_at
    }

    fn last_changed(&self) -> u64 {
        self.timestamps.last_changed()
    }

    fn natural_key(&self) -> String {
        format!("{}:{}", self.instance_uuid, self.security_group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_changed_takes_latest_timestamp() {
        let ts = Timestamps {
            created_at: 100,
            updated_at: Some(150),
            deleted_at: Some(120),
            deleted: true,
        };
        assert_eq!(ts.last_changed(), 150);
        assert_eq!(Timestamps::created(7).last_changed(), 7);
    }

    #[test]
    fn rule_natural_key_ignores_identity() {
        let rule = |id| SecurityGroupRule {
            id,
            parent_group_id: 42,
            protocol: Some("tcp".to_string()),
            from_port: Some(80),
            to_port: Some(80),
            cidr: Some("0.0.0.0/0".to_string()),
            group_id: None,
            timestamps: Timestamps::created(1),
        };
        assert_eq!(rule(1).natural_key(), rule(2).natural_key());
        assert_eq!(rule(1).natural_key(), "42:tcp:80:80:0.0.0.0/0:");
    }

    #[test]
    fn group_natural_key_is_project_and_name() {
        let group = SecurityGroup {
            id: 3,
            name: "web".to_string(),
            description: String::new(),
            project_id: "p1".to_string(),
            user_id: "u1".to_string(),
            timestamps: Timestamps::created(1),
        };
        assert_eq!(group.natural_key(), "p1/web");
        assert_eq!(group.project_id(), Some("p1"));
    }

    #[test]
    fn flattened_timestamps_round_trip() {
        let json = r#"{"id":5,"uuid":"abc","created_at":10,"deleted":true,"deleted_at":20}"#;
        let mapping: InstanceIdMapping = serde_json::from_str(json).unwrap();
        assert!(mapping.deleted());
        assert_eq!(mapping.last_changed(), 20);
        assert_eq!(mapping.natural_key(), "abc");
    }
}
