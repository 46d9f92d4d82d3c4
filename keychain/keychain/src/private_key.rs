// Copyright (c) Microsoft. All rights reserved.

use crate::{Error, KeyHandle, KeyType, Keychain, SignParameter};

/// A keychain-backed private key, as used by the TLS engine.
///
/// Owns its handle and frees it when dropped. The type is fixed when the key is opened,
/// so asking for it again does not call into the keychain.
pub struct PrivateKey {
    keychain: std::sync::Arc<dyn Keychain>,
    handle: KeyHandle,
    key_type: KeyType,
}

impl PrivateKey {
    /// Opens the key with the given name from `keychain`.
    pub fn load(keychain: std::sync::Arc<dyn Keychain>, name: &str) -> Result<Self, Error> {
        let handle = keychain.load_key(name)?;
        PrivateKey::new(keychain, handle)
    }

    /// Creates a new key with the given name in `keychain`.
    pub fn generate(
        keychain: std::sync::Arc<dyn Keychain>,
        key_type: KeyType,
        name: &str,
    ) -> Result<Self, Error> {
        let handle = keychain.generate_key(key_type, name)?;
        PrivateKey::new(keychain, handle)
    }

    /// Opens the key with the given name from the registered keychain.
    pub fn load_from_registry(name: &str) -> Result<Self, Error> {
        let keychain = crate::registry::require()?;
        PrivateKey::load(keychain, name)
    }

    fn new(keychain: std::sync::Arc<dyn Keychain>, handle: KeyHandle) -> Result<Self, Error> {
        let key_type = keychain.key_type(handle);
        if key_type == KeyType::Invalid {
            keychain.free_key(handle);
            return Err(Error::platform(format!(
                "keychain returned handle {handle} for a key of invalid type"
            )));
        }

        Ok(PrivateKey {
            keychain,
            handle,
            key_type,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn handle(&self) -> KeyHandle {
        self.handle
    }

    /// The DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        self.keychain.key_public_to_vec(self.handle)
    }

    /// Signs `data` with the default parameter for the key type, see [`SignParameter::default_for`].
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let param = SignParameter::default_for(self.key_type)
            .ok_or_else(|| Error::unsupported("key type has no default signing parameter"))?;
        self.sign_with(param, data)
    }

    pub fn sign_with(&self, param: SignParameter, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.keychain.key_sign_to_vec(self.handle, data, param)
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.keychain.free_key(self.handle);
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("handle", &self.handle)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}
