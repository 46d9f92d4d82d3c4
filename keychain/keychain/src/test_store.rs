// Copyright (c) Microsoft. All rights reserved.

//! An in-memory [`Store`] with fake key material, for exercising [`crate::StoreKeychain`] without a real key store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Error, KeyType, SignParameter, Store, StoredKey};

#[derive(Default)]
struct Stats {
    signatures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    deny_signing: AtomicBool,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    keys: Mutex<std::collections::BTreeMap<String, KeyType>>,
    stats: Arc<Stats>,
}

impl MemoryStore {
    pub(crate) fn is_empty(&self) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub(crate) fn signatures(&self) -> usize {
        self.stats.signatures.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_signatures(&self) -> usize {
        self.stats.max_in_flight.load(Ordering::SeqCst)
    }

    /// Makes every signature fail as if the user declined.
    pub(crate) fn deny_signing(&self, deny: bool) {
        self.stats.deny_signing.store(deny, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    type Key = MemoryKey;

    fn generate(&self, key_type: KeyType, name: &str) -> Result<Self::Key, Error> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if keys.contains_key(name) {
            return Err(Error::platform(format!("key {name:?} already exists")));
        }
        keys.insert(name.to_owned(), key_type);

        Ok(MemoryKey {
            key_type,
            name: name.to_owned(),
            stats: self.stats.clone(),
        })
    }

    fn load(&self, name: &str) -> Result<Self::Key, Error> {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let key_type = *keys.get(name).ok_or_else(|| Error::not_found(name))?;

        Ok(MemoryKey {
            key_type,
            name: name.to_owned(),
            stats: self.stats.clone(),
        })
    }

    fn remove(&self, name: &str) -> Result<(), Error> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(name))
    }
}

pub(crate) struct MemoryKey {
    key_type: KeyType,
    name: String,
    stats: Arc<Stats>,
}

/// The fake public key of the key with this name: the name repeated to fill 91 bytes.
pub(crate) fn public_key_of(name: &str) -> Vec<u8> {
    name.bytes().cycle().take(91).collect()
}

impl StoredKey for MemoryKey {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        Ok(public_key_of(&self.name))
    }

    fn signature_len(&self, _param: SignParameter) -> Result<usize, Error> {
        match self.key_type {
            KeyType::Rsa => Ok(256),
            KeyType::Ec => Ok(72),
            KeyType::Invalid => Err(Error::unsupported("invalid key type")),
        }
    }

    fn sign(&self, param: SignParameter, data: &[u8]) -> Result<Vec<u8>, Error> {
        if self.stats.deny_signing.load(Ordering::SeqCst) {
            return Err(Error::platform("user declined"));
        }

        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.signatures.fetch_add(1, Ordering::SeqCst);

        // EC signatures are variable-length, so report less than the maximum.
        let len = match self.key_type {
            KeyType::Ec => 70,
            _ => self.signature_len(param)?,
        };
        Ok(data.iter().copied().cycle().take(len).collect())
    }
}
