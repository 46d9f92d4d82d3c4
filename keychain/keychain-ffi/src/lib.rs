// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    non_camel_case_types,
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::missing_safety_doc,
    clippy::module_name_repetitions
)]

//! The C ABI of the keychain contract.
//!
//! Keychains implemented in C (or anything that can export C functions) describe themselves with a [`KEYCHAIN_FUNCTION_LIST`].
//! [`ForeignKeychain`] wraps such a list as a [`keychain::Keychain`], and [`keychain_register`] installs it as the active keychain.
//!
//! In the other direction, [`keychain_get_function_list`] hands C callers a function list whose functions dispatch to
//! whatever keychain is active in [`keychain::registry`].
//!
//! # API conventions
//!
//! All functions except `key_type` and `free_key` return a [`KEYCHAIN_STATUS`]. Zero is success, anything else is failure.
//! Callers that only care about success may treat all non-zero values alike.
//!
//! Names are NUL-terminated UTF-8 strings. The caller may free them once the call returns.
//!
//! `key_public` and `key_sign` take a buffer and a pointer to its capacity. On success the callee writes the output to the buffer
//! and its length to the capacity pointer. If the output does not fit, the callee fails with [`KEYCHAIN_STATUS_BUFFER_TOO_SMALL`]
//! and writes nothing to the buffer, but sets the length to the required size if it knows it.

mod exported;
pub use exported::{keychain_get_function_list, keychain_register};

mod foreign;
pub use foreign::{ForeignKeychain, LoadFunctionListError};

#[cfg(test)]
mod test_provider;

use keychain::{Error, ErrorKind, KeyHandle, KeyType};

/// Status code. This is a transparent wrapper around a `std::os::raw::c_uint` (`unsigned int`).
///
/// Either `KEYCHAIN_STATUS_SUCCESS` or one of the other `KEYCHAIN_STATUS_*` constants.
/// Providers written against older headers may return other non-zero values, which are treated as platform failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct KEYCHAIN_STATUS {
    inner: std::os::raw::c_uint,
}

/// The operation succeeded.
pub const KEYCHAIN_STATUS_SUCCESS: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 0 };

/// There is no key with the given name.
pub const KEYCHAIN_STATUS_NOT_FOUND: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 1 };

/// A parameter is NULL or invalid, or the key handle is null, freed or unrecognized.
pub const KEYCHAIN_STATUS_INVALID_ARGUMENT: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 2 };

/// The output buffer is too small. Nothing was written to it.
pub const KEYCHAIN_STATUS_BUFFER_TOO_SMALL: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 3 };

/// The key type or signing parameter is not supported.
pub const KEYCHAIN_STATUS_UNSUPPORTED: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 4 };

/// The key store failed or refused the operation.
pub const KEYCHAIN_STATUS_PLATFORM_FAILURE: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 5 };

/// No keychain is registered.
pub const KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN: KEYCHAIN_STATUS = KEYCHAIN_STATUS { inner: 6 };

impl From<&Error> for KEYCHAIN_STATUS {
    fn from(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => KEYCHAIN_STATUS_NOT_FOUND,
            ErrorKind::InvalidArgument => KEYCHAIN_STATUS_INVALID_ARGUMENT,
            ErrorKind::BufferTooSmall => KEYCHAIN_STATUS_BUFFER_TOO_SMALL,
            ErrorKind::Unsupported => KEYCHAIN_STATUS_UNSUPPORTED,
            ErrorKind::PlatformFailure => KEYCHAIN_STATUS_PLATFORM_FAILURE,
            ErrorKind::NoActiveKeychain => KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN,
        }
    }
}

impl std::fmt::Display for KEYCHAIN_STATUS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            KEYCHAIN_STATUS_SUCCESS => f.write_str("KEYCHAIN_STATUS_SUCCESS"),
            KEYCHAIN_STATUS_NOT_FOUND => f.write_str("KEYCHAIN_STATUS_NOT_FOUND"),
            KEYCHAIN_STATUS_INVALID_ARGUMENT => f.write_str("KEYCHAIN_STATUS_INVALID_ARGUMENT"),
            KEYCHAIN_STATUS_BUFFER_TOO_SMALL => f.write_str("KEYCHAIN_STATUS_BUFFER_TOO_SMALL"),
            KEYCHAIN_STATUS_UNSUPPORTED => f.write_str("KEYCHAIN_STATUS_UNSUPPORTED"),
            KEYCHAIN_STATUS_PLATFORM_FAILURE => f.write_str("KEYCHAIN_STATUS_PLATFORM_FAILURE"),
            KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN => {
                f.write_str("KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN")
            }
            KEYCHAIN_STATUS { inner } => write!(f, "0x{inner:08x}"),
        }
    }
}

impl std::error::Error for KEYCHAIN_STATUS {}

/// Key type. This is a transparent wrapper around a `std::os::raw::c_uint` (`unsigned int`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct KEYCHAIN_KEY_TYPE {
    inner: std::os::raw::c_uint,
}

/// Returned by `key_type` for handles that are null or not recognized. Never valid as an input.
pub const KEYCHAIN_KEY_TYPE_INVALID: KEYCHAIN_KEY_TYPE = KEYCHAIN_KEY_TYPE { inner: 0 };

pub const KEYCHAIN_KEY_TYPE_EC: KEYCHAIN_KEY_TYPE = KEYCHAIN_KEY_TYPE { inner: 1 };

pub const KEYCHAIN_KEY_TYPE_RSA: KEYCHAIN_KEY_TYPE = KEYCHAIN_KEY_TYPE { inner: 2 };

impl From<KeyType> for KEYCHAIN_KEY_TYPE {
    fn from(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Ec => KEYCHAIN_KEY_TYPE_EC,
            KeyType::Rsa => KEYCHAIN_KEY_TYPE_RSA,
            KeyType::Invalid => KEYCHAIN_KEY_TYPE_INVALID,
        }
    }
}

impl From<KEYCHAIN_KEY_TYPE> for KeyType {
    fn from(key_type: KEYCHAIN_KEY_TYPE) -> Self {
        match key_type {
            KEYCHAIN_KEY_TYPE_EC => KeyType::Ec,
            KEYCHAIN_KEY_TYPE_RSA => KeyType::Rsa,
            _ => KeyType::Invalid,
        }
    }
}

/// An opaque key handle. Zero is the null handle.
///
/// Handles are only meaningful to the keychain that returned them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct KEYCHAIN_KEY {
    pub inner: u64,
}

pub const KEYCHAIN_KEY_NULL: KEYCHAIN_KEY = KEYCHAIN_KEY { inner: 0 };

impl From<KeyHandle> for KEYCHAIN_KEY {
    fn from(handle: KeyHandle) -> Self {
        KEYCHAIN_KEY {
            inner: handle.into_raw(),
        }
    }
}

impl From<KEYCHAIN_KEY> for KeyHandle {
    fn from(key: KEYCHAIN_KEY) -> Self {
        KeyHandle::from_raw(key.inner)
    }
}

/// Represents the version of the API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct KEYCHAIN_VERSION {
    inner: std::os::raw::c_uint,
}

/// Version 1.0.0.0
pub const KEYCHAIN_VERSION_1_0_0_0: KEYCHAIN_VERSION = KEYCHAIN_VERSION { inner: 0x01_00_00_00 };

/// The functions of a keychain.
///
/// Every function must be set. The function pointers are nullable only so that an incomplete list is detected rather than called.
#[derive(Debug)]
#[repr(C)]
pub struct KEYCHAIN_FUNCTION_LIST {
    /// Must be [`KEYCHAIN_VERSION_1_0_0_0`].
    pub version: KEYCHAIN_VERSION,

    /// Create a new key of type `type_` named `name`, and write a handle to it to `pkey`.
    ///
    /// # Errors
    ///
    /// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`: `name` or `pkey` is `NULL`.
    /// - `KEYCHAIN_STATUS_UNSUPPORTED`: `type_` is not `KEYCHAIN_KEY_TYPE_EC` or `KEYCHAIN_KEY_TYPE_RSA`.
    /// - `KEYCHAIN_STATUS_PLATFORM_FAILURE`: the key could not be created, for example because a key with that name already exists.
    pub gen_key: Option<
        unsafe extern "C" fn(
            type_: KEYCHAIN_KEY_TYPE,
            name: *const std::os::raw::c_char,
            pkey: *mut KEYCHAIN_KEY,
        ) -> KEYCHAIN_STATUS,
    >,

    /// Open the key named `name`, and write a handle to it to `pkey`.
    ///
    /// # Errors
    ///
    /// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`: `name` or `pkey` is `NULL`.
    /// - `KEYCHAIN_STATUS_NOT_FOUND`: there is no key with that name.
    pub load_key: Option<
        unsafe extern "C" fn(
            name: *const std::os::raw::c_char,
            pkey: *mut KEYCHAIN_KEY,
        ) -> KEYCHAIN_STATUS,
    >,

    /// Delete the key named `name`.
    ///
    /// # Errors
    ///
    /// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`: `name` is `NULL`.
    /// - `KEYCHAIN_STATUS_NOT_FOUND`: there is no key with that name.
    pub rem_key: Option<unsafe extern "C" fn(name: *const std::os::raw::c_char) -> KEYCHAIN_STATUS>,

    /// Get the type of the key. Returns `KEYCHAIN_KEY_TYPE_INVALID` for null and unrecognized handles.
    pub key_type: Option<unsafe extern "C" fn(key: KEYCHAIN_KEY) -> KEYCHAIN_KEY_TYPE>,

    /// Write the DER-encoded SubjectPublicKeyInfo of the key to `buf`.
    ///
    /// `*len` is the capacity of `buf` on input and the length of the encoding on output.
    /// On `KEYCHAIN_STATUS_BUFFER_TOO_SMALL` the provider should set `*len` to the required size.
    ///
    /// # Errors
    ///
    /// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`: `len` is `NULL`, or the handle is invalid.
    /// - `KEYCHAIN_STATUS_BUFFER_TOO_SMALL`: the encoding does not fit in `*len` bytes.
    pub key_public: Option<
        unsafe extern "C" fn(
            key: KEYCHAIN_KEY,
            buf: *mut std::os::raw::c_uchar,
            len: *mut usize,
        ) -> KEYCHAIN_STATUS,
    >,

    /// Sign `datalen` bytes at `data` with the key, using the scheme selected by `param`, and write the signature to `sig`.
    ///
    /// `*siglen` is the capacity of `sig` on input and the length of the signature on output.
    /// On `KEYCHAIN_STATUS_BUFFER_TOO_SMALL` the provider should set `*siglen` to the required size.
    ///
    /// # Errors
    ///
    /// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`: `siglen` is `NULL`, or the handle is invalid.
    /// - `KEYCHAIN_STATUS_UNSUPPORTED`: `param` is not recognized for this key type.
    /// - `KEYCHAIN_STATUS_BUFFER_TOO_SMALL`: the signature does not fit in `*siglen` bytes.
    /// - `KEYCHAIN_STATUS_PLATFORM_FAILURE`: the key store failed to sign.
    pub key_sign: Option<
        unsafe extern "C" fn(
            key: KEYCHAIN_KEY,
            data: *const std::os::raw::c_uchar,
            datalen: usize,
            sig: *mut std::os::raw::c_uchar,
            siglen: *mut usize,
            param: std::os::raw::c_int,
        ) -> KEYCHAIN_STATUS,
    >,

    /// Release the handle. Null handles are ignored.
    pub free_key: Option<unsafe extern "C" fn(key: KEYCHAIN_KEY)>,
}

#[cfg(test)]
mod tests {
    use keychain::{Error, KeyHandle, KeyType};

    #[test]
    fn status_of_error() {
        assert_eq!(
            super::KEYCHAIN_STATUS::from(&Error::not_found("k")),
            super::KEYCHAIN_STATUS_NOT_FOUND
        );
        assert_eq!(
            super::KEYCHAIN_STATUS::from(&Error::BufferTooSmall {
                required: None,
                capacity: 0
            }),
            super::KEYCHAIN_STATUS_BUFFER_TOO_SMALL
        );
        assert_eq!(
            super::KEYCHAIN_STATUS::from(&Error::NoActiveKeychain),
            super::KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN
        );
    }

    #[test]
    fn unknown_status_display() {
        let status = super::KEYCHAIN_STATUS { inner: u32::MAX };
        assert_eq!(status.to_string(), "0xffffffff");
    }

    #[test]
    fn key_type_conversions() {
        for key_type in [KeyType::Ec, KeyType::Rsa, KeyType::Invalid] {
            assert_eq!(KeyType::from(super::KEYCHAIN_KEY_TYPE::from(key_type)), key_type);
        }

        let unknown = super::KEYCHAIN_KEY_TYPE { inner: 7 };
        assert_eq!(KeyType::from(unknown), KeyType::Invalid);
    }

    #[test]
    fn null_key_is_null_handle() {
        assert!(KeyHandle::from(super::KEYCHAIN_KEY_NULL).is_null());
        assert_eq!(super::KEYCHAIN_KEY::from(KeyHandle::NULL), super::KEYCHAIN_KEY_NULL);
    }
}
