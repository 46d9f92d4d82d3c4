// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::default_trait_access, clippy::missing_errors_doc)]

mod error;
pub use error::Error;

mod read;
pub use read::read_config;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/keychain/config.toml";

pub const DEFAULT_CONFIG_DIRECTORY_PATH: &str = "/etc/keychain/config.d";

/// Smallest modulus accepted for generated RSA keys.
const MIN_RSA_KEY_BITS: u32 = 2048;

/// Largest modulus accepted for generated RSA keys.
const MAX_RSA_KEY_BITS: u32 = 8192;

#[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Generated keys are stored under `<homedir_path>/keys`.
    pub homedir_path: std::path::PathBuf,

    /// Modulus size of generated RSA keys.
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: u32,

    /// Map of preloaded key names to their location.
    ///
    /// A preloaded key can be loaded and used like any other key, but it is never generated or removed.
    #[serde(default)]
    pub preloaded_keys: std::collections::BTreeMap<String, PreloadedKeyLocation>,
}

fn default_rsa_key_bits() -> u32 {
    2048
}

impl Config {
    /// Reads the config with [`read_config`] and checks the values that deserialization alone does not.
    pub fn load(
        config_path: &std::path::Path,
        config_directory_path: &std::path::Path,
    ) -> Result<Self, Error> {
        let config: Config = read_config(config_path, config_directory_path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.homedir_path.is_absolute() {
            return Err(Error::InvalidConfig(
                "homedir_path",
                "expected an absolute path".into(),
            ));
        }

        if !(MIN_RSA_KEY_BITS..=MAX_RSA_KEY_BITS).contains(&self.rsa_key_bits)
            || self.rsa_key_bits % 8 != 0
        {
            return Err(Error::InvalidConfig(
                "rsa_key_bits",
                format!(
                    "expected a multiple of 8 between {MIN_RSA_KEY_BITS} and {MAX_RSA_KEY_BITS}, got {}",
                    self.rsa_key_bits,
                )
                .into(),
            ));
        }

        if self.preloaded_keys.keys().any(String::is_empty) {
            return Err(Error::InvalidConfig(
                "preloaded_keys",
                "key name is empty".into(),
            ));
        }

        Ok(())
    }
}

/// Where a preloaded key is stored. Written in the config as a URI.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum PreloadedKeyLocation {
    /// A PEM file holding the private key, as a `file://` URI.
    Filesystem { path: std::path::PathBuf },
}

impl std::str::FromStr for PreloadedKeyLocation {
    type Err = Box<dyn std::error::Error + Send + Sync>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scheme_end_index = s.find(':').ok_or("missing scheme")?;
        let scheme = &s[..scheme_end_index];

        match scheme {
            "file" => {
                let uri: url::Url = s.parse()?;
                let path = uri
                    .to_file_path()
                    .map_err(|()| "cannot convert to file path")?;
                Ok(PreloadedKeyLocation::Filesystem { path })
            }

            _ => Err(format!("unrecognized scheme {scheme:?}").into()),
        }
    }
}

impl TryFrom<String> for PreloadedKeyLocation {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PreloadedKeyLocation> for String {
    fn from(location: PreloadedKeyLocation) -> Self {
        match location {
            PreloadedKeyLocation::Filesystem { path } => url::Url::from_file_path(&path)
                .map_or_else(
                    |()| format!("file://{}", path.display()),
                    |uri| uri.to_string(),
                ),
        }
    }
}
