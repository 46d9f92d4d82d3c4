// Copyright (c) Microsoft. All rights reserved.

use keychain::{buffer, Error, HandleTable, KeyHandle, KeyType, Keychain, SignParameter};

use crate::{
    KEYCHAIN_FUNCTION_LIST, KEYCHAIN_KEY, KEYCHAIN_KEY_NULL, KEYCHAIN_KEY_TYPE, KEYCHAIN_STATUS,
    KEYCHAIN_VERSION,
};

/// Initial buffer size when discovering output sizes, since the function list has no size queries.
///
/// Large enough for the public key and signature of an RSA-8192 key, so well-behaved providers are called once.
const PROBE_INITIAL_LEN: usize = 2048;

/// Outputs larger than this are treated as a provider failure.
const PROBE_MAX_LEN: usize = 64 * 1024;

#[derive(Clone, Copy)]
struct Functions {
    gen_key: unsafe extern "C" fn(
        type_: KEYCHAIN_KEY_TYPE,
        name: *const std::os::raw::c_char,
        pkey: *mut KEYCHAIN_KEY,
    ) -> KEYCHAIN_STATUS,

    load_key: unsafe extern "C" fn(
        name: *const std::os::raw::c_char,
        pkey: *mut KEYCHAIN_KEY,
    ) -> KEYCHAIN_STATUS,

    rem_key: unsafe extern "C" fn(name: *const std::os::raw::c_char) -> KEYCHAIN_STATUS,

    key_type: unsafe extern "C" fn(key: KEYCHAIN_KEY) -> KEYCHAIN_KEY_TYPE,

    key_public: unsafe extern "C" fn(
        key: KEYCHAIN_KEY,
        buf: *mut std::os::raw::c_uchar,
        len: *mut usize,
    ) -> KEYCHAIN_STATUS,

    key_sign: unsafe extern "C" fn(
        key: KEYCHAIN_KEY,
        data: *const std::os::raw::c_uchar,
        datalen: usize,
        sig: *mut std::os::raw::c_uchar,
        siglen: *mut usize,
        param: std::os::raw::c_int,
    ) -> KEYCHAIN_STATUS,

    free_key: unsafe extern "C" fn(key: KEYCHAIN_KEY),
}

/// A key of the foreign provider. The provider's `free_key` is called when the last reference is dropped.
struct ForeignKey {
    key: KEYCHAIN_KEY,
    free_key: unsafe extern "C" fn(key: KEYCHAIN_KEY),
}

impl Drop for ForeignKey {
    fn drop(&mut self) {
        unsafe {
            (self.free_key)(self.key);
        }
    }
}

/// A [`Keychain`] implemented by a foreign [`KEYCHAIN_FUNCTION_LIST`].
///
/// The provider's own key references never reach the caller. Each one is wrapped in a [`KeyHandle`] of this keychain,
/// so handles are checked before the provider sees them, and the provider's `free_key` runs exactly once per key
/// no matter how often the caller frees the handle.
///
/// The function list has no size queries, so `key_public_len` fetches the public key with growing buffers.
pub struct ForeignKeychain {
    functions: Functions,
    keys: std::sync::Mutex<HandleTable<std::sync::Arc<ForeignKey>>>,
}

impl ForeignKeychain {
    pub fn new(
        function_list: &'static KEYCHAIN_FUNCTION_LIST,
    ) -> Result<Self, LoadFunctionListError> {
        if function_list.version != crate::KEYCHAIN_VERSION_1_0_0_0 {
            return Err(LoadFunctionListError::UnsupportedApiVersion(
                function_list.version,
            ));
        }

        let functions = Functions {
            gen_key: function_list
                .gen_key
                .ok_or(LoadFunctionListError::MissingFunction("gen_key"))?,
            load_key: function_list
                .load_key
                .ok_or(LoadFunctionListError::MissingFunction("load_key"))?,
            rem_key: function_list
                .rem_key
                .ok_or(LoadFunctionListError::MissingFunction("rem_key"))?,
            key_type: function_list
                .key_type
                .ok_or(LoadFunctionListError::MissingFunction("key_type"))?,
            key_public: function_list
                .key_public
                .ok_or(LoadFunctionListError::MissingFunction("key_public"))?,
            key_sign: function_list
                .key_sign
                .ok_or(LoadFunctionListError::MissingFunction("key_sign"))?,
            free_key: function_list
                .free_key
                .ok_or(LoadFunctionListError::MissingFunction("free_key"))?,
        };

        Ok(ForeignKeychain {
            functions,
            keys: Default::default(),
        })
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HandleTable<std::sync::Arc<ForeignKey>>> {
        self.keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn insert(&self, key: KEYCHAIN_KEY) -> Result<KeyHandle, Error> {
        if key == KEYCHAIN_KEY_NULL {
            return Err(Error::platform("provider returned a null key"));
        }

        let key = std::sync::Arc::new(ForeignKey {
            key,
            free_key: self.functions.free_key,
        });
        self.table().insert(key)
    }

    fn resolve(&self, handle: KeyHandle) -> Result<std::sync::Arc<ForeignKey>, Error> {
        Ok(self.table().get(handle)?.clone())
    }

    /// When `probing`, a status outside the known codes counts as a short buffer,
    /// since legacy providers report every failure with the same status.
    fn public_key_into(
        &self,
        key: &ForeignKey,
        buf: &mut [u8],
        probing: bool,
    ) -> Result<usize, Error> {
        // The provider writes into a scratch buffer, so the caller's buffer is only written on success.
        let mut scratch = vec![0_u8; buf.len()];
        let mut len = scratch.len();

        let status =
            unsafe { (self.functions.key_public)(key.key, scratch.as_mut_ptr(), &mut len) };
        if probing && !is_known_status(status) {
            return Err(Error::BufferTooSmall {
                required: None,
                capacity: buf.len(),
            });
        }
        check_output(status, "public key", len, buf.len())?;

        if len > scratch.len() {
            // The provider scribbled past the end of the buffer. Crash as soon as possible.
            std::process::abort();
        }

        buf[..len].copy_from_slice(&scratch[..len]);
        Ok(len)
    }
}

impl Keychain for ForeignKeychain {
    fn generate_key(&self, key_type: KeyType, name: &str) -> Result<KeyHandle, Error> {
        if key_type == KeyType::Invalid {
            return Err(Error::unsupported("cannot generate a key of type invalid"));
        }

        let c_name = c_name(name)?;
        let mut key = KEYCHAIN_KEY_NULL;
        let status =
            unsafe { (self.functions.gen_key)(key_type.into(), c_name.as_ptr(), &mut key) };
        check(status, name)?;

        let handle = self.insert(key)?;
        log::debug!("provider generated {key_type} key {name:?} as handle {handle}");
        Ok(handle)
    }

    fn load_key(&self, name: &str) -> Result<KeyHandle, Error> {
        let c_name = c_name(name)?;
        let mut key = KEYCHAIN_KEY_NULL;
        let status = unsafe { (self.functions.load_key)(c_name.as_ptr(), &mut key) };
        check(status, name)?;

        let handle = self.insert(key)?;
        log::debug!("provider loaded key {name:?} as handle {handle}");
        Ok(handle)
    }

    fn remove_key(&self, name: &str) -> Result<(), Error> {
        let c_name = c_name(name)?;
        let status = unsafe { (self.functions.rem_key)(c_name.as_ptr()) };
        check(status, name)
    }

    fn key_type(&self, handle: KeyHandle) -> KeyType {
        match self.resolve(handle) {
            Ok(key) => unsafe { (self.functions.key_type)(key.key) }.into(),
            Err(_) => KeyType::Invalid,
        }
    }

    fn key_public_len(&self, handle: KeyHandle) -> Result<usize, Error> {
        let key = self.resolve(handle)?;
        let public_key = buffer::probe_to_vec(PROBE_INITIAL_LEN, PROBE_MAX_LEN, |buf| {
            self.public_key_into(&key, buf, true)
        })
        .map_err(|err| match err {
            Error::BufferTooSmall { .. } => Error::platform(format!(
                "provider could not export the public key into {PROBE_MAX_LEN} bytes"
            )),
            err => err,
        })?;
        Ok(public_key.len())
    }

    fn key_public(&self, handle: KeyHandle, buf: &mut [u8]) -> Result<usize, Error> {
        let key = self.resolve(handle)?;
        self.public_key_into(&key, buf, false)
    }

    fn key_sign_len(&self, handle: KeyHandle, param: SignParameter) -> Result<usize, Error> {
        let key_type = self.key_type(handle);
        if key_type == KeyType::Invalid {
            return Err(Error::invalid_argument("handle", "unrecognized handle"));
        }
        if !param.is_compatible_with(key_type) {
            return Err(Error::unsupported(format!(
                "signing parameter {param} cannot be used with an {key_type} key"
            )));
        }

        // An RSA or EC public key's encoding is longer than any signature it verifies.
        self.key_public_len(handle)
    }

    fn key_sign(
        &self,
        handle: KeyHandle,
        data: &[u8],
        sig: &mut [u8],
        param: SignParameter,
    ) -> Result<usize, Error> {
        let key = self.resolve(handle)?;

        let mut scratch = vec![0_u8; sig.len()];
        let mut siglen = scratch.len();

        let status = unsafe {
            (self.functions.key_sign)(
                key.key,
                data.as_ptr(),
                data.len(),
                scratch.as_mut_ptr(),
                &mut siglen,
                param.into_raw(),
            )
        };
        check_output(status, "signature", siglen, sig.len())?;

        if siglen > scratch.len() {
            // The provider scribbled past the end of the buffer. Crash as soon as possible.
            std::process::abort();
        }

        sig[..siglen].copy_from_slice(&scratch[..siglen]);
        Ok(siglen)
    }

    fn free_key(&self, handle: KeyHandle) {
        if handle.is_null() {
            return;
        }

        let key = self.table().remove(handle);
        match key {
            // The provider's free_key runs here, or when an in-flight call on another thread drops its reference.
            Ok(key) => drop(key),
            Err(err) => log::debug!("ignoring free of handle {handle}: {err}"),
        }
    }
}

impl Drop for ForeignKeychain {
    fn drop(&mut self) {
        let keys = self.table().drain();
        if !keys.is_empty() {
            log::debug!("releasing {} keys that were never freed", keys.len());
        }
    }
}

impl std::fmt::Debug for ForeignKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignKeychain")
            .field("keys", &*self.table())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum LoadFunctionListError {
    MissingFunction(&'static str),
    NullFunctionList,
    UnsupportedApiVersion(KEYCHAIN_VERSION),
}

impl std::fmt::Display for LoadFunctionListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadFunctionListError::MissingFunction(name) => {
                write!(f, "function list does not define {name}")
            }
            LoadFunctionListError::NullFunctionList => f.write_str("function list is NULL"),
            LoadFunctionListError::UnsupportedApiVersion(version) => {
                write!(f, "function list has unsupported version {version:?}")
            }
        }
    }
}

impl std::error::Error for LoadFunctionListError {}

fn c_name(name: &str) -> Result<std::ffi::CString, Error> {
    if name.is_empty() {
        return Err(Error::invalid_argument("name", "empty key name"));
    }
    std::ffi::CString::new(name).map_err(|err| Error::invalid_argument("name", err))
}

fn is_known_status(status: KEYCHAIN_STATUS) -> bool {
    [
        crate::KEYCHAIN_STATUS_SUCCESS,
        crate::KEYCHAIN_STATUS_NOT_FOUND,
        crate::KEYCHAIN_STATUS_INVALID_ARGUMENT,
        crate::KEYCHAIN_STATUS_BUFFER_TOO_SMALL,
        crate::KEYCHAIN_STATUS_UNSUPPORTED,
        crate::KEYCHAIN_STATUS_PLATFORM_FAILURE,
        crate::KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN,
    ]
    .contains(&status)
}

/// Converts a provider's status to a result. `what` names the key or output the call was about.
fn check(status: KEYCHAIN_STATUS, what: &str) -> Result<(), Error> {
    match status {
        crate::KEYCHAIN_STATUS_SUCCESS => Ok(()),
        crate::KEYCHAIN_STATUS_NOT_FOUND => Err(Error::not_found(what)),
        crate::KEYCHAIN_STATUS_INVALID_ARGUMENT => Err(Error::invalid_argument("key", status)),
        crate::KEYCHAIN_STATUS_UNSUPPORTED => Err(Error::unsupported(status)),
        status => Err(Error::platform(status)),
    }
}

/// Like [`check`], for calls that fill a buffer of `capacity` bytes and report `len`.
///
/// Providers may report the required size along with `KEYCHAIN_STATUS_BUFFER_TOO_SMALL`. A `len` that does not exceed the capacity
/// is not a usable size, so it is ignored.
fn check_output(
    status: KEYCHAIN_STATUS,
    what: &str,
    len: usize,
    capacity: usize,
) -> Result<(), Error> {
    if status == crate::KEYCHAIN_STATUS_BUFFER_TOO_SMALL {
        return Err(Error::BufferTooSmall {
            required: (len > capacity).then_some(len),
            capacity,
        });
    }

    check(status, what)
}
