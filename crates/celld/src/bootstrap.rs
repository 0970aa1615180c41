//! Shared start-up: state store, topology seeding, messenger, heal engines.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cellgrid_core::config::HealConfig;
use cellgrid_core::messenger::Envelope;
use cellgrid_core::{epoch_secs, CellgridConfig, ChannelMessenger, EntryKind, HierarchyMessenger};
use cellgrid_heal::{
    GroupHandler, HealEngine, Healer, InstanceGroupHandler, MappingHandler, RuleHandler,
};
use cellgrid_state::StateStore;

/// Open the store under `data_dir` and record the configured topology.
pub fn open_state(config: &CellgridConfig, data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("cellgrid.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    seed_topology(&state, config)?;
    Ok(state)
}

/// Write the local cell and every configured child into the store.
///
/// Children are stamped as seen now, so none start out muted.
pub fn seed_topology(state: &StateStore, config: &CellgridConfig) -> anyhow::Result<()> {
    let me = config.my_cell();
    state.set_my_cell(&me)?;

    let now = epoch_secs();
    let children = config.child_cells();
    for mut child in children.iter().cloned() {
        child.last_seen = Some(now);
        state.put_cell(&child)?;
    }
    info!(cell = %me.name, children = children.len(), "topology seeded");
    Ok(())
}

/// Messenger whose outbound traffic is drained by a logging task.
///
/// No transport to other cells is wired in this binary, so `call` replies
/// are always null.
pub fn logging_messenger() -> (Arc<dyn HierarchyMessenger>, JoinHandle<()>) {
    let (messenger, rx) = ChannelMessenger::new();
    let handle = tokio::spawn(log_envelopes(rx));
    (Arc::new(messenger), handle)
}

async fn log_envelopes(mut rx: UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let body = serde_json::to_string(&envelope.message).unwrap_or_default();
        info!(
            route = %envelope.route,
            method = envelope.message.method(),
            %body,
            "cell message"
        );
        if let Some(reply) = envelope.reply {
            if reply.send(Value::Null).is_err() {
                warn!(route = %envelope.route, "caller went away before reply");
            }
        }
    }
    debug!("messenger closed");
}

/// One heal engine per entry kind, all reading from `state`.
pub fn build_healers(
    state: &StateStore,
    messenger: Arc<dyn HierarchyMessenger>,
    config: &HealConfig,
) -> Vec<Box<dyn Healer>> {
    let source = Arc::new(state.clone());
    EntryKind::ALL
        .iter()
        .map(|kind| -> Box<dyn Healer> {
            let messenger = messenger.clone();
            match kind {
                EntryKind::InstanceIdMapping => Box::new(HealEngine::new(
                    MappingHandler::instance_id_mappings(source.clone(), messenger),
                    config,
                )),
                EntryKind::S3Image => Box::new(HealEngine::new(
                    MappingHandler::s3_images(source.clone(), messenger),
                    config,
                )),
                EntryKind::VolumeIdMapping => Box::new(HealEngine::new(
                    MappingHandler::volume_id_mappings(source.clone(), messenger),
                    config,
                )),
                EntryKind::SecurityGroup => Box::new(HealEngine::new(
                    GroupHandler::new(source.clone(), messenger),
                    config,
                )),
                EntryKind::SecurityGroupRule => Box::new(HealEngine::new(
                    RuleHandler::new(source.clone(), source.clone(), messenger),
                    config,
                )),
                EntryKind::SecurityGroupInstanceAssociation => Box::new(HealEngine::new(
                    InstanceGroupHandler::new(source.clone(), source.clone(), messenger),
                    config,
                )),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgrid_core::TopologyProvider;

    fn config() -> CellgridConfig {
        toml_config(
            r#"
[cell]
name = "top"

[[cell.children]]
name = "child-a"
weight_offset = 5.0

[[cell.children]]
name = "child-b"
"#,
        )
    }

    fn toml_config(s: &str) -> CellgridConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellgrid.toml");
        std::fs::write(&path, s).unwrap();
        CellgridConfig::from_file(&path).unwrap()
    }

    #[test]
    fn seeding_records_me_and_children() {
        let state = StateStore::open_in_memory().unwrap();
        seed_topology(&state, &config()).unwrap();

        let me = state.my_cell().unwrap();
        assert_eq!(me.name, "top");
        assert!(me.is_me);

        let children = state.child_cells().unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["child-a", "child-b"]);
        assert_eq!(children[0].weight_offset, 5.0);
        assert!(children.iter().all(|c| c.last_seen.is_some()));
    }

    #[test]
    fn open_state_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("state");
        let state = open_state(&config(), &data_dir).unwrap();
        assert!(data_dir.join("cellgrid.redb").exists());
        assert_eq!(state.list_cells().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_healer_per_kind() {
        let state = StateStore::open_in_memory().unwrap();
        let (messenger, handle) = logging_messenger();
        let healers = build_healers(&state, messenger, &HealConfig::default());

        let kinds: Vec<EntryKind> = healers.iter().map(|h| h.kind()).collect();
        assert_eq!(kinds, EntryKind::ALL.to_vec());
        handle.abort();
    }
}
