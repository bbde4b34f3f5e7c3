//! Property-based test generators using proptest.

use peerbox_auth::Fingerprint;
use peerbox_engine::md5_hex;
use peerbox_proto::FileDescriptor;
use proptest::prelude::*;

/// Strategy for pathnames the engine accepts.
pub fn safe_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::string::string_regex("[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,11}")
        .expect("Invalid regex")
        .prop_filter("components must not be dot-only", |c| {
            c != "." && c != ".."
        }), 1..4)
    .prop_map(|components| components.join("/"))
}

/// Strategy for pathnames the engine must refuse.
pub fn unsafe_path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("..".to_string()),
        Just("../escape.txt".to_string()),
        Just("a/../../escape.txt".to_string()),
        Just("/etc/passwd".to_string()),
        Just("a//b".to_string()),
        Just("a/./b".to_string()),
        safe_path_strategy().prop_map(|p| format!("../{p}")),
        safe_path_strategy().prop_map(|p| format!("/{p}")),
    ]
}

/// Strategy for hex fingerprints.
pub fn fingerprint_strategy() -> impl Strategy<Value = Fingerprint> {
    prop::string::string_regex("[0-9a-f]{64}")
        .expect("Invalid regex")
        .prop_map(|hex| Fingerprint::from_hex(hex))
}

/// Strategy for file contents up to a few chunks long.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Strategy for descriptors consistent with generated content.
pub fn descriptor_strategy() -> impl Strategy<Value = (Vec<u8>, FileDescriptor)> {
    (content_strategy(), 0u64..=2_000_000_000).prop_map(|(content, mtime)| {
        let descriptor = FileDescriptor::new(md5_hex(&content), mtime, content.len() as u64);
        (content, descriptor)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerbox_engine::RelativePath;

    proptest! {
        #[test]
        fn safe_paths_parse(path in safe_path_strategy()) {
            prop_assert!(RelativePath::parse(&path).is_ok());
        }

        #[test]
        fn unsafe_paths_are_refused(path in unsafe_path_strategy()) {
            prop_assert!(RelativePath::parse(&path).is_err());
        }

        #[test]
        fn descriptors_match_their_content((content, descriptor) in descriptor_strategy()) {
            prop_assert_eq!(descriptor.file_size, content.len() as u64);
            prop_assert!(descriptor.same_content(&FileDescriptor::new(
                md5_hex(&content),
                descriptor.last_modified + 1,
                content.len() as u64,
            )));
        }
    }
}
