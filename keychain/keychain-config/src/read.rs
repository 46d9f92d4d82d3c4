// Copyright (c) Microsoft. All rights reserved.

use crate::Error;

/// Reads the config file at `config_path`, then applies every `*.toml` file of `config_directory_path` on top of it
/// in lexical order of file names.
///
/// A missing config directory is the same as an empty one.
pub fn read_config<TConfig>(
    config_path: &std::path::Path,
    config_directory_path: &std::path::Path,
) -> Result<TConfig, Error>
where
    TConfig: serde::de::DeserializeOwned,
{
    let mut config = read_toml(config_path)?;

    match std::fs::read_dir(config_directory_path) {
        Ok(entries) => {
            let mut patch_paths = vec![];
            for entry in entries {
                let entry =
                    entry.map_err(|err| Error::read(Some(config_directory_path.into()), err))?;

                let entry_file_type = entry
                    .file_type()
                    .map_err(|err| Error::read(Some(config_directory_path.into()), err))?;
                if !entry_file_type.is_file() {
                    continue;
                }

                let patch_path = entry.path();
                if patch_path.extension().and_then(std::ffi::OsStr::to_str) != Some("toml") {
                    continue;
                }

                patch_paths.push(patch_path);
            }
            patch_paths.sort();

            for patch_path in patch_paths {
                let patch = read_toml(&patch_path)?;
                merge_toml(&mut config, patch);
            }
        }

        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),

        Err(err) => return Err(Error::read(Some(config_directory_path.into()), err)),
    }

    let config: TConfig =
        serde::Deserialize::deserialize(config).map_err(|err| Error::read(None, err))?;

    Ok(config)
}

fn read_toml(path: &std::path::Path) -> Result<toml::Value, Error> {
    let contents = std::fs::read_to_string(path).map_err(|err| Error::read(Some(path.into()), err))?;
    let value = toml::from_str(&contents).map_err(|err| Error::read(Some(path.into()), err))?;
    Ok(value)
}

/// Applies `patch` to `base`. Tables are merged key by key, arrays are concatenated, and anything else is replaced.
///
/// There is no way for a patch to remove a key.
pub(crate) fn merge_toml(base: &mut toml::Value, patch: toml::Value) {
    match (base, patch) {
        (toml::Value::Table(base), toml::Value::Table(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(original_value) => merge_toml(original_value, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }

        (toml::Value::Array(base), toml::Value::Array(patch)) => base.extend(patch),

        (base, patch) => *base = patch,
    }
}
