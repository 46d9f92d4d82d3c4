// Copyright (c) Microsoft. All rights reserved.

use crate::{buffer, Error, HandleTable, KeyHandle, KeyType, Keychain, SignParameter};

/// A key store that can create, open and delete keys by name.
///
/// Implementing this trait and [`StoredKey`] is enough to get a full [`Keychain`] through [`StoreKeychain`],
/// which takes care of handles and buffers.
pub trait Store: Send + Sync {
    type Key: StoredKey;

    /// Creates a key. The store must fail rather than overwrite an existing key with the same name.
    fn generate(&self, key_type: KeyType, name: &str) -> Result<Self::Key, Error>;

    fn load(&self, name: &str) -> Result<Self::Key, Error>;

    fn remove(&self, name: &str) -> Result<(), Error>;
}

/// A key opened from a [`Store`].
pub trait StoredKey: Send + Sync {
    /// The key's type. Never [`KeyType::Invalid`].
    fn key_type(&self) -> KeyType;

    fn public_key_der(&self) -> Result<Vec<u8>, Error>;

    /// The largest signature [`StoredKey::sign`] produces with this parameter.
    fn signature_len(&self, param: SignParameter) -> Result<usize, Error>;

    /// Signs `data`. The parameter has already been checked to be compatible with the key type.
    fn sign(&self, param: SignParameter, data: &[u8]) -> Result<Vec<u8>, Error>;
}

struct Entry<K> {
    key: K,

    // Calls on the same handle take this lock, so a key object is only ever used by one thread at a time.
    serial: std::sync::Mutex<()>,
}

/// A [`Keychain`] over any [`Store`].
///
/// Handles index a table owned by this keychain. Calls on distinct handles run in parallel;
/// calls on the same handle are serialized. The table lock is never held while the store or a key is called.
///
/// Freeing a handle while another thread is still using it is allowed: the in-flight call completes,
/// and any later call with the handle fails.
pub struct StoreKeychain<S: Store> {
    store: S,
    handles: std::sync::Mutex<HandleTable<std::sync::Arc<Entry<S::Key>>>>,
}

impl<S: Store> StoreKeychain<S> {
    pub fn new(store: S) -> Self {
        StoreKeychain {
            store,
            handles: Default::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The number of handles that have been issued and not freed.
    pub fn open_handles(&self) -> usize {
        self.table().len()
    }

    pub fn handle_state(&self, handle: KeyHandle) -> crate::HandleState {
        self.table().state(handle)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HandleTable<std::sync::Arc<Entry<S::Key>>>> {
        // The table is never left inconsistent by a panic, so a poisoned lock is still usable.
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn insert(&self, key: S::Key) -> Result<KeyHandle, Error> {
        let entry = std::sync::Arc::new(Entry {
            key,
            serial: Default::default(),
        });
        self.table().insert(entry)
    }

    /// Runs `f` with the key behind `handle`, holding only that key's lock.
    fn with_key<T>(
        &self,
        handle: KeyHandle,
        f: impl FnOnce(&S::Key) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let entry = self.table().get(handle)?.clone();

        let _serial = entry
            .serial
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&entry.key)
    }
}

impl<S: Store> Keychain for StoreKeychain<S> {
    fn generate_key(&self, key_type: KeyType, name: &str) -> Result<KeyHandle, Error> {
        if key_type == KeyType::Invalid {
            return Err(Error::unsupported("cannot generate a key of type invalid"));
        }
        if name.is_empty() {
            return Err(Error::invalid_argument("name", "empty key name"));
        }

        let key = self.store.generate(key_type, name)?;
        let handle = self.insert(key)?;
        log::debug!("generated {key_type} key {name:?} as handle {handle}");
        Ok(handle)
    }

    fn load_key(&self, name: &str) -> Result<KeyHandle, Error> {
        if name.is_empty() {
            return Err(Error::invalid_argument("name", "empty key name"));
        }

        let key = self.store.load(name)?;
        let handle = self.insert(key)?;
        log::debug!("loaded key {name:?} as handle {handle}");
        Ok(handle)
    }

    fn remove_key(&self, name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::invalid_argument("name", "empty key name"));
        }

        self.store.remove(name)?;
        log::debug!("removed key {name:?}");
        Ok(())
    }

    fn key_type(&self, handle: KeyHandle) -> KeyType {
        self.with_key(handle, |key| Ok(key.key_type()))
            .unwrap_or(KeyType::Invalid)
    }

    fn key_public_len(&self, handle: KeyHandle) -> Result<usize, Error> {
        self.with_key(handle, |key| Ok(key.public_key_der()?.len()))
    }

    fn key_public(&self, handle: KeyHandle, buf: &mut [u8]) -> Result<usize, Error> {
        self.with_key(handle, |key| {
            let public_key = key.public_key_der()?;
            buffer::write(buf, &public_key)
        })
    }

    fn key_sign_len(&self, handle: KeyHandle, param: SignParameter) -> Result<usize, Error> {
        self.with_key(handle, |key| {
            check_param(key.key_type(), param)?;
            key.signature_len(param)
        })
    }

    fn key_sign(
        &self,
        handle: KeyHandle,
        data: &[u8],
        sig: &mut [u8],
        param: SignParameter,
    ) -> Result<usize, Error> {
        self.with_key(handle, |key| {
            check_param(key.key_type(), param)?;

            // Refuse before signing, since signing may involve the user.
            let signature_len = key.signature_len(param)?;
            if sig.len() < signature_len {
                return Err(Error::BufferTooSmall {
                    required: Some(signature_len),
                    capacity: sig.len(),
                });
            }

            let signature = key.sign(param, data).map_err(|err| {
                log::warn!("could not sign with handle {handle}: {err}");
                err
            })?;
            buffer::write(sig, &signature)
        })
    }

    fn free_key(&self, handle: KeyHandle) {
        if handle.is_null() {
            return;
        }

        let entry = self.table().remove(handle);
        match entry {
            Ok(_) => log::debug!("freed handle {handle}"),
            Err(err) => log::debug!("ignoring free of handle {handle}: {err}"),
        }
    }
}

impl<S: Store + std::fmt::Debug> std::fmt::Debug for StoreKeychain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreKeychain")
            .field("store", &self.store)
            .field("handles", &*self.table())
            .finish()
    }
}

fn check_param(key_type: KeyType, param: SignParameter) -> Result<(), Error> {
    if param.is_compatible_with(key_type) {
        Ok(())
    } else {
        Err(Error::unsupported(format!(
            "signing parameter {param} cannot be used with an {key_type} key"
        )))
    }
}
