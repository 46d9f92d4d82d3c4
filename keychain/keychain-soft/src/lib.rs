// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! A keychain provider that keeps keys in files, using openssl for all cryptography.
//!
//! Generated keys are stored as PKCS#8 PEM files under `<homedir_path>/keys`. Keys can also be preloaded from arbitrary files
//! through the config; preloaded keys can be loaded and used, but not generated or removed.
//!
//! This provider offers no protection beyond file permissions. It is meant for development, tests,
//! and devices without a hardware key store.

mod key;
pub use key::{verify, SoftKey};

mod location;
use location::Location;

use keychain::{Error, KeyType, Store, StoreKeychain};

/// A [`Store`] of key files.
#[derive(Debug)]
pub struct FileStore {
    homedir_path: std::path::PathBuf,
    rsa_key_bits: u32,
    preloaded_keys: std::collections::BTreeMap<String, std::path::PathBuf>,
}

impl FileStore {
    pub fn new(config: &keychain_config::Config) -> Self {
        let preloaded_keys = config
            .preloaded_keys
            .iter()
            .map(|(name, location)| match location {
                keychain_config::PreloadedKeyLocation::Filesystem { path } => {
                    (name.clone(), path.clone())
                }
            })
            .collect();

        FileStore {
            homedir_path: config.homedir_path.clone(),
            rsa_key_bits: config.rsa_key_bits,
            preloaded_keys,
        }
    }

    fn location(&self, name: &str) -> Result<Location, Error> {
        Location::of(name, &self.homedir_path, &self.preloaded_keys)
    }
}

/// Creates a keychain over a [`FileStore`] with the given config.
pub fn keychain(config: &keychain_config::Config) -> StoreKeychain<FileStore> {
    StoreKeychain::new(FileStore::new(config))
}

impl Store for FileStore {
    type Key = SoftKey;

    fn generate(&self, key_type: KeyType, name: &str) -> Result<Self::Key, Error> {
        let path = match self.location(name)? {
            Location::Generated(path) => path,
            Location::Preloaded(_) => {
                return Err(Error::platform(format!(
                    "key name {name:?} is taken by a preloaded key"
                )))
            }
        };

        let key = SoftKey::generate(key_type, self.rsa_key_bits)?;
        key::write_new(&path, &key)?;
        log::info!("created {key_type} key {name:?} at {}", path.display());

        Ok(key)
    }

    fn load(&self, name: &str) -> Result<Self::Key, Error> {
        let location = self.location(name)?;
        let path = location.path();

        let private_key_pem = match std::fs::read(path) {
            Ok(private_key_pem) => private_key_pem,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(name))
            }
            Err(err) => return Err(Error::platform(err)),
        };

        SoftKey::from_pem(&private_key_pem)
    }

    fn remove(&self, name: &str) -> Result<(), Error> {
        let path = match self.location(name)? {
            Location::Generated(path) => path,
            Location::Preloaded(_) => {
                return Err(Error::unsupported(format!(
                    "key {name:?} is preloaded and cannot be removed"
                )))
            }
        };

        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("removed key {name:?} at {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(name)),
            Err(err) => Err(Error::platform(err)),
        }
    }
}
