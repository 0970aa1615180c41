//! Hierarchy messenger — cast/call/broadcast between cells.
//!
//! The scheduler and the healing loop only ever talk to other cells through
//! [`HierarchyMessenger`]. The transport behind it is somebody else's
//! problem; [`ChannelMessenger`] is an in-process implementation that hands
//! every outbound message to a tokio channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::entries::{
    InstanceIdMapping, S3ImageMapping, SecurityGroup, SecurityGroupRule, VolumeIdMapping,
};
use crate::routing::RoutingPath;
use crate::types::{InstanceUpdate, RequestContext, RunInstanceRequest};

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("unknown target cell: {0}")]
    UnknownTarget(String),
    #[error("cell unreachable: {0}")]
    Unreachable(String),
    #[error("message channel closed")]
    ChannelClosed,
}

pub type MessengerResult<T> = Result<T, MessengerError>;

/// Messages exchanged between cells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum CellMessage {
    /// Ask a cell to schedule (or keep routing) a request.
    ScheduleRunInstance {
        ctxt: RequestContext,
        routing_path: RoutingPath,
        request: RunInstanceRequest,
    },
    InstanceUpdateAtTop {
        instance: InstanceUpdate,
    },
    Ec2InstanceCreate {
        uuid: String,
        id: i64,
    },
    S3ImageCreate {
        uuid: String,
        id: i64,
    },
    Ec2VolumeCreate {
        uuid: String,
        id: i64,
    },
    SecurityGroupCreate {
        group: SecurityGroup,
    },
    SecurityGroupDestroy {
        group: SecurityGroup,
    },
    SecurityGroupRuleCreate {
        group: SecurityGroup,
        rule: SecurityGroupRule,
    },
    SecurityGroupRuleDestroy {
        group: SecurityGroup,
        rule: SecurityGroupRule,
    },
    InstanceAddSecurityGroup {
        instance_uuid: String,
        group: SecurityGroup,
    },
    InstanceRemoveSecurityGroup {
        instance_uuid: String,
        group: SecurityGroup,
    },
}

impl CellMessage {
    /// The RPC method name this message is dispatched under.
    pub fn method(&self) -> &'static str {
        match self {
            CellMessage::ScheduleRunInstance { .. } => "schedule_run_instance",
            CellMessage::InstanceUpdateAtTop { .. } => "instance_update_at_top",
            CellMessage::Ec2InstanceCreate { .. } => "ec2_instance_create",
            CellMessage::S3ImageCreate { .. } => "s3_image_create",
            CellMessage::Ec2VolumeCreate { .. } => "ec2_volume_create",
            CellMessage::SecurityGroupCreate { .. } => "security_group_create",
            CellMessage::SecurityGroupDestroy { .. } => "security_group_destroy",
            CellMessage::SecurityGroupRuleCreate { .. } => "security_group_rule_create",
            CellMessage::SecurityGroupRuleDestroy { .. } => "security_group_rule_destroy",
            CellMessage::InstanceAddSecurityGroup { .. } => "instance_add_security_group",
            CellMessage::InstanceRemoveSecurityGroup { .. } => "instance_remove_security_group",
        }
    }

    pub fn ec2_instance_create(mapping: &InstanceIdMapping) -> Self {
        CellMessage::Ec2InstanceCreate {
            uuid: mapping.uuid.clone(),
            id: mapping.id,
        }
    }

    pub fn s3_image_create(mapping: &S3ImageMapping) -> Self {
        CellMessage::S3ImageCreate {
            uuid: mapping.uuid.clone(),
            id: mapping.id,
        }
    }

    pub fn ec2_volume_create(mapping: &VolumeIdMapping) -> Self {
        CellMessage::Ec2VolumeCreate {
            uuid: mapping.uuid.clone(),
            id: mapping.id,
        }
    }
}

/// Delivers messages to other cells.
///
/// Implementations must tolerate concurrent use from many callers.
#[async_trait]
pub trait HierarchyMessenger: Send + Sync {
    /// Fire-and-forget delivery to a named cell.
    async fn cast(&self, target: &RoutingPath, message: CellMessage) -> MessengerResult<()>;

    /// Request/reply delivery to a named cell.
    async fn call(&self, target: &RoutingPath, message: CellMessage) -> MessengerResult<Value>;

    /// Send toward the root of the tree.
    async fn broadcast_up(&self, message: CellMessage) -> MessengerResult<()>;

    /// Send to every descendant.
    async fn broadcast_down(&self, message: CellMessage) -> MessengerResult<()>;
}

/// Where an outbound message is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Cell(RoutingPath),
    Up,
    Down,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Cell(path) => write!(f, "{path}"),
            Route::Up => f.write_str("<up>"),
            Route::Down => f.write_str("<down>"),
        }
    }
}

/// One outbound message as seen by the receiving side of a [`ChannelMessenger`].
#[derive(Debug)]
pub struct Envelope {
    pub route: Route,
    pub message: CellMessage,
    /// Present for `call`; the receiver answers through it.
    pub reply: Option<oneshot::Sender<Value>>,
}

/// In-process messenger backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelMessenger {
    /// Create a messenger and the receiver that sees everything it sends.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, envelope: Envelope) -> MessengerResult<()> {
        debug!(route = %envelope.route, method = envelope.message.method(), "outbound message");
        self.tx.send(envelope).map_err(|_| MessengerError::ChannelClosed)
    }
}

#[async_trait]
impl HierarchyMessenger for ChannelMessenger {
    async fn cast(&self, target: &RoutingPath, message: CellMessage) -> MessengerResult<()> {
        self.send(Envelope {
            route: Route::Cell(target.clone()),
            message,
            reply: None,
        })
    }

    async fn call(&self, target: &RoutingPath, message: CellMessage) -> MessengerResult<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Envelope {
            route: Route::Cell(target.clone()),
            message,
            reply: Some(reply_tx),
        })?;
        reply_rx
            .await
            .map_err(|_| MessengerError::Unreachable(target.to_string()))
    }

    async fn broadcast_up(&self, message: CellMessage) -> MessengerResult<()> {
        self.send(Envelope {
            route: Route::Up,
            message,
            reply: None,
        })
    }

    async fn broadcast_down(&self, message: CellMessage) -> MessengerResult<()> {
        self.send(Envelope {
            route: Route::Down,
            message,
            reply: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cast_and_broadcast_reach_receiver() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let target = RoutingPath::parse("api!child1").unwrap();

        messenger
            .cast(&target, CellMessage::Ec2InstanceCreate { uuid: "u".into(), id: 1 })
            .await
            .unwrap();
        messenger
            .broadcast_up(CellMessage::S3ImageCreate { uuid: "i".into(), id: 2 })
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.route, Route::Cell(target));
        assert_eq!(first.message.method(), "ec2_instance_create");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.route, Route::Up);
    }

    #[tokio::test]
    async fn call_waits_for_reply() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let target = RoutingPath::root("api");

        let responder = tokio::spawn(async move {
            let envelope = rx.recv().await.unwrap();
            envelope.reply.unwrap().send(json!({"ok": true})).unwrap();
        });

        let reply = messenger
            .call(&target, CellMessage::Ec2VolumeCreate { uuid: "v".into(), id: 3 })
            .await
            .unwrap();
        assert_eq!(reply, json!({"ok": true}));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_an_error() {
        let (messenger, rx) = ChannelMessenger::new();
        drop(rx);
        let err = messenger
            .broadcast_down(CellMessage::S3ImageCreate { uuid: "i".into(), id: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::ChannelClosed));
    }

    #[test]
    fn messages_serialize_with_method_tag() {
        let msg = CellMessage::Ec2InstanceCreate { uuid: "u".into(), id: 9 };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"method": "ec2_instance_create", "args": {"uuid": "u", "id": 9}})
        );
    }
}
