//! Run command implementation.

use peerbox_auth::{GroupRegistry, KeyPair};
use peerbox_node::{Node, NodeConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs a node from the configuration at `config_path` until killed.
pub fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::load(config_path)?;
    let registry = Arc::new(build_registry(&config)?);

    if let Some(group_file) = &config.group_file {
        registry.load_groups(group_file)?;
    }
    if registry.group(&config.group).is_none() {
        info!(group = %config.group, "group not on file, creating it");
        registry.new_group(&config.group, &config.sync_root)?;
        registry.add_member(&config.group, registry.fingerprint())?;
        if let Some(group_file) = &config.group_file {
            registry.save_groups(group_file)?;
        }
    }

    info!(
        fingerprint = %registry.fingerprint(),
        group = %config.group,
        sync_root = %config.sync_root.display(),
        "starting node"
    );

    let node = Node::new(config, registry)?;
    node.start()?;

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn build_registry(config: &NodeConfig) -> Result<GroupRegistry, Box<dyn std::error::Error>> {
    match &config.key_file {
        Some(path) => {
            if !path.exists() {
                info!(path = %path.display(), "key file missing, generating a new identity");
                KeyPair::generate().save(path)?;
            }
            Ok(GroupRegistry::load(path)?)
        }
        None => {
            warn!("no key file configured, node identity will not survive a restart");
            Ok(GroupRegistry::new(KeyPair::generate()))
        }
    }
}
