// Copyright (c) Microsoft. All rights reserved.

//! The process-wide active keychain.
//!
//! The TLS engine looks the keychain up here whenever it needs to use a private key.
//! Registering a keychain replaces the previous one; callers that already obtained the previous keychain keep using it
//! until they drop their reference.

use crate::{Error, Keychain};

lazy_static::lazy_static! {
    static ref ACTIVE: std::sync::RwLock<Option<std::sync::Arc<dyn Keychain>>> = Default::default();
}

#[cfg(test)]
lazy_static::lazy_static! {
    /// Tests that touch the active keychain hold this, since it is shared by every test in the process.
    pub(crate) static ref TEST_LOCK: std::sync::Mutex<()> = Default::default();
}

/// Makes `keychain` the active keychain and returns the one it replaced, if any.
pub fn register(keychain: std::sync::Arc<dyn Keychain>) -> Option<std::sync::Arc<dyn Keychain>> {
    let mut active = ACTIVE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous = active.replace(keychain);
    log::info!(
        "registered keychain{}",
        if previous.is_some() {
            ", replacing the previous one"
        } else {
            ""
        }
    );
    previous
}

/// Clears the active keychain and returns it, if any.
pub fn unregister() -> Option<std::sync::Arc<dyn Keychain>> {
    let mut active = ACTIVE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous = active.take();
    if previous.is_some() {
        log::info!("unregistered keychain");
    }
    previous
}

/// The active keychain, if any.
pub fn active() -> Option<std::sync::Arc<dyn Keychain>> {
    ACTIVE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// The active keychain, or [`Error::NoActiveKeychain`].
pub fn require() -> Result<std::sync::Arc<dyn Keychain>, Error> {
    active().ok_or(Error::NoActiveKeychain)
}
