//! Synchronization groups.

use crate::error::{AuthError, AuthResult};
use crate::keys::Fingerprint;
use crate::merkle::{MembershipProof, MembershipSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named set of members replicating one directory tree.
///
/// A peer belongs to the group iff its public-key fingerprint is a current
/// leaf of the membership set.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    directory: PathBuf,
    members: MembershipSet,
}

impl Group {
    /// Creates an empty group.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            members: MembershipSet::new(),
        }
    }

    /// Returns the group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the synchronized directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the membership set.
    pub fn members(&self) -> &MembershipSet {
        &self.members
    }

    /// Adds a member. Returns false if already present.
    pub fn add_member(&mut self, fingerprint: Fingerprint) -> bool {
        self.members.add(fingerprint)
    }

    /// Removes a member. Returns false if absent.
    pub fn remove_member(&mut self, fingerprint: &Fingerprint) -> bool {
        self.members.remove(fingerprint)
    }

    /// Returns true if the fingerprint is a current member.
    ///
    /// A peer with no established key never matches: callers pass the
    /// fingerprint of a key they have actually received and verified.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    /// Produces an inclusion proof for a member, or `None` if absent.
    pub fn prove(&self, fingerprint: &Fingerprint) -> Option<MembershipProof> {
        self.members.prove(fingerprint)
    }

    /// Builds a group from a persisted definition.
    ///
    /// Fails closed on malformed definitions: an empty name or directory
    /// rejects the whole group rather than loading a partial one.
    pub fn from_definition(definition: GroupDefinition) -> AuthResult<Self> {
        if definition.name.trim().is_empty() {
            return Err(AuthError::GroupStorage("group with empty name".into()));
        }
        if definition.directory.as_os_str().is_empty() {
            return Err(AuthError::GroupStorage(format!(
                "group {} has no directory",
                definition.name
            )));
        }

        let members = MembershipSet::from_leaves(
            definition.members.into_iter().map(Fingerprint::from_hex),
        );

        Ok(Self {
            name: definition.name,
            directory: definition.directory,
            members,
        })
    }

    /// Renders the group for persistence.
    pub fn to_definition(&self) -> GroupDefinition {
        GroupDefinition {
            name: self.name.clone(),
            directory: self.directory.clone(),
            members: self
                .members
                .leaves()
                .map(|l| l.as_str().to_string())
                .collect(),
        }
    }
}

/// Persisted shape of a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    /// Unique group name.
    pub name: String,
    /// Directory the group replicates.
    pub directory: PathBuf,
    /// Member fingerprints.
    pub members: Vec<String>,
}
