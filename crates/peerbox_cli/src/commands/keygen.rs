//! Keygen command implementation.

use peerbox_auth::KeyPair;
use std::path::Path;

/// Generates an identity key pair and writes it to `output`.
pub fn run(output: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() && !force {
        return Err(format!(
            "{} already exists, pass --force to overwrite",
            output.display()
        )
        .into());
    }

    let keys = KeyPair::generate();
    keys.save(output)?;

    println!("wrote key file {}", output.display());
    println!("fingerprint: {}", keys.fingerprint());
    Ok(())
}
