//! The group registry: authentication authority for one node.

use crate::challenge::{open_challenge, SealedChallenge};
use crate::error::{AuthError, AuthResult};
use crate::group::{Group, GroupDefinition};
use crate::keys::{Fingerprint, KeyPair};
use crate::merkle::MembershipProof;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns all groups and this node's key pair.
///
/// Explicitly constructed and passed to every component that needs it;
/// there is no ambient global registry, so tests can run several
/// independent instances in one process.
///
/// Reads never block on a reload: key material and the group map are
/// published atomically, so readers see either the fully-old or fully-new
/// state.
pub struct GroupRegistry {
    keys: RwLock<Arc<KeyPair>>,
    key_file: Option<PathBuf>,
    groups: RwLock<HashMap<String, Group>>,
}

impl GroupRegistry {
    /// Creates a registry around an in-memory key pair.
    pub fn new(keys: KeyPair) -> Self {
        Self {
            keys: RwLock::new(Arc::new(keys)),
            key_file: None,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry by loading key material from a key file.
    ///
    /// The path is remembered for hot reloads.
    pub fn load(key_file: impl Into<PathBuf>) -> AuthResult<Self> {
        let key_file = key_file.into();
        let keys = KeyPair::load(&key_file)?;
        Ok(Self {
            keys: RwLock::new(Arc::new(keys)),
            key_file: Some(key_file),
            groups: RwLock::new(HashMap::new()),
        })
    }

    /// Re-reads key material from the key file.
    ///
    /// A failed reload keeps the last successfully loaded key pair in
    /// service; the error is logged and returned so callers can surface it.
    pub fn reload_keys(&self) -> AuthResult<()> {
        let path = self
            .key_file
            .as_ref()
            .ok_or_else(|| AuthError::KeyStorage("registry has no key file".into()))?;

        match KeyPair::load(path) {
            Ok(keys) => {
                let fingerprint = keys.fingerprint();
                *self.keys.write() = Arc::new(keys);
                info!(%fingerprint, "reloaded identity keys");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "key reload failed, keeping previous keys");
                Err(e)
            }
        }
    }

    /// Returns a snapshot of the current key pair.
    pub fn keys(&self) -> Arc<KeyPair> {
        Arc::clone(&self.keys.read())
    }

    /// Returns this node's fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.keys.read().fingerprint()
    }

    /// Returns this node's wire public key.
    pub fn public_key_base64(&self) -> String {
        self.keys.read().public_key_base64()
    }

    /// Decrypts an incoming authentication challenge with the private key.
    pub fn solve_challenge(&self, sealed: &SealedChallenge) -> AuthResult<Vec<u8>> {
        open_challenge(&self.keys.read(), sealed)
    }

    /// Creates a new empty group. Group names are unique keys.
    pub fn new_group(
        &self,
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> AuthResult<()> {
        let name = name.into();
        let mut groups = self.groups.write();
        if groups.contains_key(&name) {
            return Err(AuthError::DuplicateGroup(name));
        }
        groups.insert(name.clone(), Group::new(name, directory));
        Ok(())
    }

    /// Returns a snapshot of a group by name.
    pub fn group(&self, name: &str) -> Option<Group> {
        self.groups.read().get(name).cloned()
    }

    /// Returns the names of all registered groups.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// Returns true if `fingerprint` is a current member of `group`.
    ///
    /// Unknown groups authorize nobody.
    pub fn authorize(&self, group: &str, fingerprint: &Fingerprint) -> bool {
        self.groups
            .read()
            .get(group)
            .map(|g| g.contains(fingerprint))
            .unwrap_or(false)
    }

    /// Produces an inclusion proof for a member of `group`.
    pub fn prove(&self, group: &str, fingerprint: &Fingerprint) -> Option<MembershipProof> {
        self.groups.read().get(group)?.prove(fingerprint)
    }

    /// Adds a member to a group. Returns false if already present.
    pub fn add_member(&self, group: &str, fingerprint: Fingerprint) -> AuthResult<bool> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group)
            .ok_or_else(|| AuthError::UnknownGroup(group.to_string()))?;
        Ok(group.add_member(fingerprint))
    }

    /// Removes a member from a group. Returns false if absent.
    pub fn remove_member(&self, group: &str, fingerprint: &Fingerprint) -> AuthResult<bool> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group)
            .ok_or_else(|| AuthError::UnknownGroup(group.to_string()))?;
        Ok(group.remove_member(fingerprint))
    }

    /// Loads persisted group definitions, replacing the current group map.
    ///
    /// A missing file is not an error (empty group set). A structurally
    /// invalid file is an error and leaves the current map untouched. A
    /// malformed individual definition fails closed: that group is skipped
    /// and logged while the rest load. Returns the number of groups loaded.
    pub fn load_groups(&self, path: &Path) -> AuthResult<usize> {
        if !path.exists() {
            *self.groups.write() = HashMap::new();
            return Ok(0);
        }

        let contents = std::fs::read_to_string(path)?;
        let definitions: Vec<GroupDefinition> = serde_json::from_str(&contents)
            .map_err(|e| AuthError::GroupStorage(format!("{}: {}", path.display(), e)))?;

        let mut loaded = HashMap::new();
        for definition in definitions {
            let name = definition.name.clone();
            match Group::from_definition(definition) {
                Ok(group) => {
                    loaded.insert(group.name().to_string(), group);
                }
                Err(e) => {
                    warn!(group = %name, error = %e, "skipping malformed group definition");
                }
            }
        }

        let count = loaded.len();
        *self.groups.write() = loaded;
        info!(count, "loaded group definitions");
        Ok(count)
    }

    /// Persists all group definitions as JSON.
    pub fn save_groups(&self, path: &Path) -> AuthResult<()> {
        let definitions: Vec<GroupDefinition> = {
            let groups = self.groups.read();
            let mut defs: Vec<GroupDefinition> =
                groups.values().map(Group::to_definition).collect();
            defs.sort_by(|a, b| a.name.cmp(&b.name));
            defs
        };

        let contents = serde_json::to_string_pretty(&definitions)
            .map_err(|e| AuthError::GroupStorage(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{generate_secret, seal_challenge};

    fn registry() -> GroupRegistry {
        GroupRegistry::new(KeyPair::generate())
    }

    #[test]
    fn group_creation_and_lookup() {
        let registry = registry();
        registry.new_group("g1", "/sync/g1").unwrap();

        assert!(registry.group("g1").is_some());
        assert!(registry.group("g2").is_none());
        assert!(matches!(
            registry.new_group("g1", "/elsewhere"),
            Err(AuthError::DuplicateGroup(_))
        ));
    }

    #[test]
    fn authorize_checks_membership() {
        let registry = registry();
        registry.new_group("g1", "/sync/g1").unwrap();

        let member = Fingerprint::from_hex("f1");
        assert!(!registry.authorize("g1", &member));

        registry.add_member("g1", member.clone()).unwrap();
        assert!(registry.authorize("g1", &member));
        assert!(registry.prove("g1", &member).is_some());

        // Unknown groups authorize nobody.
        assert!(!registry.authorize("nope", &member));
    }

    #[test]
    fn member_mutation_on_unknown_group_fails() {
        let registry = registry();
        let result = registry.add_member("missing", Fingerprint::from_hex("f1"));
        assert!(matches!(result, Err(AuthError::UnknownGroup(_))));
    }

    #[test]
    fn solve_challenge_recovers_secret() {
        let registry = registry();
        let secret = generate_secret();
        let keys = registry.keys();
        let sealed = seal_challenge(keys.public_key(), &secret).unwrap();

        let recovered = registry.solve_challenge(&sealed).unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn solve_challenge_for_other_key_fails() {
        let registry = registry();
        let other = KeyPair::generate();
        let sealed = seal_challenge(other.public_key(), &generate_secret()).unwrap();

        assert!(registry.solve_challenge(&sealed).is_err());
    }

    #[test]
    fn groups_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");

        let registry = registry();
        registry.new_group("g1", "/sync/g1").unwrap();
        registry
            .add_member("g1", Fingerprint::from_hex("f1"))
            .unwrap();
        registry.save_groups(&path).unwrap();

        let reloaded = GroupRegistry::new(KeyPair::generate());
        assert_eq!(reloaded.load_groups(&path).unwrap(), 1);
        assert!(reloaded.authorize("g1", &Fingerprint::from_hex("f1")));
    }

    #[test]
    fn missing_group_file_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        assert_eq!(
            registry.load_groups(&dir.path().join("absent.json")).unwrap(),
            0
        );
        assert!(registry.group_names().is_empty());
    }

    #[test]
    fn invalid_group_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        std::fs::write(&path, "{ definitely: not a list").unwrap();

        let registry = registry();
        registry.new_group("keep", "/sync/keep").unwrap();

        assert!(matches!(
            registry.load_groups(&path),
            Err(AuthError::GroupStorage(_))
        ));
        // The pre-existing map survives a failed load.
        assert!(registry.group("keep").is_some());
    }

    #[test]
    fn malformed_definition_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "good", "directory": "/sync/good", "members": ["f1"]},
                {"name": "", "directory": "/sync/bad", "members": []}
            ]"#,
        )
        .unwrap();

        let registry = registry();
        assert_eq!(registry.load_groups(&path).unwrap(), 1);
        assert!(registry.group("good").is_some());
    }

    #[test]
    fn key_reload_keeps_old_keys_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        KeyPair::generate().save(&path).unwrap();

        let registry = GroupRegistry::load(&path).unwrap();
        let before = registry.fingerprint();

        std::fs::write(&path, "corrupted").unwrap();
        assert!(registry.reload_keys().is_err());
        assert_eq!(registry.fingerprint(), before);

        // A repaired file reloads and re-derives the identity.
        KeyPair::generate().save(&path).unwrap();
        registry.reload_keys().unwrap();
        assert_ne!(registry.fingerprint(), before);
    }
}
