//! Group command implementation.

use clap::Subcommand;
use peerbox_auth::{Fingerprint, GroupRegistry, KeyPair};
use std::path::Path;

/// Group-management actions.
#[derive(Subcommand)]
pub enum GroupAction {
    /// Create a new group
    Create {
        /// Group name
        name: String,

        /// Directory the group synchronizes
        #[arg(short, long)]
        directory: String,
    },

    /// Add a member fingerprint to a group
    AddMember {
        /// Group name
        name: String,

        /// Member fingerprint (hex)
        fingerprint: String,
    },

    /// Remove a member fingerprint from a group
    RemoveMember {
        /// Group name
        name: String,

        /// Member fingerprint (hex)
        fingerprint: String,
    },

    /// List groups and their members
    List,
}

/// Runs a group-management action against the definitions in `file`.
pub fn run(file: &Path, action: GroupAction) -> Result<(), Box<dyn std::error::Error>> {
    // The registry is only used as a group store here; the key pair is
    // throwaway and never persisted.
    let registry = GroupRegistry::new(KeyPair::generate());
    registry.load_groups(file)?;

    match action {
        GroupAction::Create { name, directory } => {
            registry.new_group(&name, &directory)?;
            registry.save_groups(file)?;
            println!("created group {name}");
        }
        GroupAction::AddMember { name, fingerprint } => {
            let added = registry.add_member(&name, Fingerprint::from_hex(fingerprint))?;
            registry.save_groups(file)?;
            println!(
                "{}",
                if added {
                    "member added"
                } else {
                    "already a member"
                }
            );
        }
        GroupAction::RemoveMember { name, fingerprint } => {
            let removed = registry.remove_member(&name, &Fingerprint::from_hex(fingerprint))?;
            registry.save_groups(file)?;
            println!(
                "{}",
                if removed {
                    "member removed"
                } else {
                    "not a member"
                }
            );
        }
        GroupAction::List => {
            let mut names = registry.group_names();
            names.sort();
            for name in names {
                let Some(group) = registry.group(&name) else {
                    continue;
                };
                println!("{} ({})", group.name(), group.directory().display());
                let mut members: Vec<&Fingerprint> = group.members().leaves().collect();
                members.sort_by_key(|f| f.as_str().to_string());
                for member in members {
                    println!("  {member}");
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_add_member_round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("groups.json");

        run(
            &file,
            GroupAction::Create {
                name: "g1".into(),
                directory: "/sync/g1".into(),
            },
        )
        .unwrap();
        run(
            &file,
            GroupAction::AddMember {
                name: "g1".into(),
                fingerprint: "f1".into(),
            },
        )
        .unwrap();

        let registry = GroupRegistry::new(KeyPair::generate());
        registry.load_groups(&file).unwrap();
        assert!(registry.authorize("g1", &Fingerprint::from_hex("f1")));
    }

    #[test]
    fn remove_member_persists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("groups.json");

        run(
            &file,
            GroupAction::Create {
                name: "g1".into(),
                directory: "/sync/g1".into(),
            },
        )
        .unwrap();
        run(
            &file,
            GroupAction::AddMember {
                name: "g1".into(),
                fingerprint: "f1".into(),
            },
        )
        .unwrap();
        run(
            &file,
            GroupAction::RemoveMember {
                name: "g1".into(),
                fingerprint: "f1".into(),
            },
        )
        .unwrap();

        let registry = GroupRegistry::new(KeyPair::generate());
        registry.load_groups(&file).unwrap();
        assert!(!registry.authorize("g1", &Fingerprint::from_hex("f1")));
    }
}
