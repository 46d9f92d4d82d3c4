// Copyright (c) Microsoft. All rights reserved.

use keychain::Error;

/// Where the file of a key lives.
#[derive(Debug, PartialEq)]
pub(crate) enum Location {
    Generated(std::path::PathBuf),
    Preloaded(std::path::PathBuf),
}

impl Location {
    /// Preloaded keys are looked up by name. Other keys live at `<homedir>/keys/<name>-<sha256(name)>.key`,
    /// where only the ASCII alphanumeric characters of the name are kept in the file name and the hash keeps names distinct.
    pub(crate) fn of(
        name: &str,
        homedir_path: &std::path::Path,
        preloaded_keys: &std::collections::BTreeMap<String, std::path::PathBuf>,
    ) -> Result<Self, Error> {
        if let Some(path) = preloaded_keys.get(name) {
            return Ok(Location::Preloaded(path.clone()));
        }

        let mut path = homedir_path.join("keys");
        if !path.exists() {
            create_keys_dir(&path)?;
        }

        let name_sanitized: String = name.chars().filter(char::is_ascii_alphanumeric).collect();

        let hash = hex::encode(openssl::sha::sha256(name.as_bytes()));
        path.push(format!("{name_sanitized}-{hash}.key"));

        Ok(Location::Generated(path))
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        match self {
            Location::Generated(path) | Location::Preloaded(path) => path,
        }
    }
}

#[cfg(unix)]
fn create_keys_dir(path: &std::path::Path) -> Result<(), Error> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(Error::platform)
}

#[cfg(not(unix))]
fn create_keys_dir(path: &std::path::Path) -> Result<(), Error> {
    std::fs::create_dir_all(path).map_err(Error::platform)
}
