// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! The keychain contract lets a TLS engine use private keys that live in an external key store.
//!
//! A keychain hands out opaque [`KeyHandle`]s for the keys it generates or loads. The key material never leaves the keychain;
//! callers can only ask for the key's type, its public key, and signatures made with it.
//!
//! # Buffer convention
//!
//! [`Keychain::key_public`] and [`Keychain::key_sign`] write their output into a caller-supplied buffer whose length is its capacity,
//! and return the number of bytes written. If the output does not fit, they fail with [`Error::BufferTooSmall`] and the buffer is left untouched.
//! [`Keychain::key_public_len`] and [`Keychain::key_sign_len`] report the size to allocate up front.
//!
//! # Handles
//!
//! A handle is valid from the `generate_key` or `load_key` call that returned it until it is passed to [`Keychain::free_key`].
//! Presenting a freed handle, a handle of another keychain, or a made-up handle yields [`ErrorKind::InvalidArgument`]
//! (or [`KeyType::Invalid`] from [`Keychain::key_type`]). Freeing a null or already-freed handle does nothing.
//!
//! # Concurrency
//!
//! Keychains are `Send + Sync`. Every operation may block for a long time, for example while the store prompts the user,
//! so callers must not hold their own locks across a call.

pub use keychain_common::{Error, ErrorKind, KeyHandle, KeyType, MessageDigest, SignParameter};

pub mod buffer;

mod handle;
pub use handle::{HandleState, HandleTable};

mod private_key;
pub use private_key::PrivateKey;

pub mod registry;

mod store;
pub use store::{Store, StoreKeychain, StoredKey};

#[cfg(test)]
mod test_store;

/// The operations a keychain provider implements.
pub trait Keychain: Send + Sync {
    /// Creates a new key of the given type under the given name and returns a handle to it.
    ///
    /// Fails with [`ErrorKind::Unsupported`] if `key_type` is not RSA or EC,
    /// and with [`ErrorKind::PlatformFailure`] if the store rejects the key, for example because the name is taken.
    fn generate_key(&self, key_type: KeyType, name: &str) -> Result<KeyHandle, Error>;

    /// Opens an existing key. Fails with [`ErrorKind::NotFound`] if there is no key with that name.
    fn load_key(&self, name: &str) -> Result<KeyHandle, Error>;

    /// Deletes a key from the store. Fails with [`ErrorKind::NotFound`] if there is no key with that name.
    ///
    /// Whether handles that are still open for the key keep working is up to the provider.
    fn remove_key(&self, name: &str) -> Result<(), Error>;

    /// The type of the key behind `handle`, or [`KeyType::Invalid`] if the handle is null or not recognized.
    fn key_type(&self, handle: KeyHandle) -> KeyType;

    /// The length of the DER encoding written by [`Keychain::key_public`].
    fn key_public_len(&self, handle: KeyHandle) -> Result<usize, Error>;

    /// Writes the DER-encoded SubjectPublicKeyInfo of the key into `buf` and returns its length.
    fn key_public(&self, handle: KeyHandle, buf: &mut [u8]) -> Result<usize, Error>;

    /// The largest signature [`Keychain::key_sign`] can produce for this key and parameter.
    fn key_sign_len(&self, handle: KeyHandle, param: SignParameter) -> Result<usize, Error>;

    /// Signs `data` with the key and writes the signature into `sig`, returning the signature's length.
    ///
    /// `sig` must hold at least [`Keychain::key_sign_len`] bytes. For DER-encoded ECDSA signatures that is the largest
    /// possible encoding, so a smaller buffer may be refused even if the signature would have fit. The check runs before signing,
    /// so a short buffer never costs a signature, which may involve the user.
    fn key_sign(
        &self,
        handle: KeyHandle,
        data: &[u8],
        sig: &mut [u8],
        param: SignParameter,
    ) -> Result<usize, Error>;

    /// Releases the handle. Null and already-freed handles are ignored.
    fn free_key(&self, handle: KeyHandle);

    /// Exports the public key into a newly allocated buffer.
    fn key_public_to_vec(&self, handle: KeyHandle) -> Result<Vec<u8>, Error> {
        buffer::read_to_vec(
            || self.key_public_len(handle),
            |buf| self.key_public(handle, buf),
        )
    }

    /// Signs `data` into a newly allocated buffer.
    fn key_sign_to_vec(
        &self,
        handle: KeyHandle,
        data: &[u8],
        param: SignParameter,
    ) -> Result<Vec<u8>, Error> {
        buffer::read_to_vec(
            || self.key_sign_len(handle, param),
            |buf| self.key_sign(handle, data, buf, param),
        )
    }
}
