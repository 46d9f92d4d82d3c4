// Copyright (c) Microsoft. All rights reserved.

//! An in-memory provider behind a C function list.
//!
//! Its state is process-global like a real C library's, so tests that use it hold [`lock`] for their duration.

use keychain::{KeyType, SignParameter};

use crate::{
    KEYCHAIN_FUNCTION_LIST, KEYCHAIN_KEY, KEYCHAIN_KEY_TYPE, KEYCHAIN_STATUS,
    KEYCHAIN_STATUS_BUFFER_TOO_SMALL, KEYCHAIN_STATUS_INVALID_ARGUMENT, KEYCHAIN_STATUS_NOT_FOUND,
    KEYCHAIN_STATUS_PLATFORM_FAILURE, KEYCHAIN_STATUS_SUCCESS, KEYCHAIN_STATUS_UNSUPPORTED,
};

#[derive(Default)]
struct State {
    keys: std::collections::BTreeMap<String, KeyType>,
    open: std::collections::BTreeMap<u64, (String, KeyType)>,
    next_key: u64,
    frees: usize,
    double_frees: usize,
    legacy: bool,
    rsa_bits: Option<usize>,
}

lazy_static::lazy_static! {
    static ref STATE: std::sync::Mutex<State> = Default::default();
    static ref TEST_LOCK: std::sync::Mutex<()> = Default::default();
}

pub(crate) const fn function_list() -> KEYCHAIN_FUNCTION_LIST {
    KEYCHAIN_FUNCTION_LIST {
        version: crate::KEYCHAIN_VERSION_1_0_0_0,
        gen_key: Some(gen_key),
        load_key: Some(load_key),
        rem_key: Some(rem_key),
        key_type: Some(key_type),
        key_public: Some(key_public),
        key_sign: Some(key_sign),
        free_key: Some(free_key),
    }
}

pub(crate) static FUNCTION_LIST: KEYCHAIN_FUNCTION_LIST = function_list();

/// Serializes tests that use the provider or the registry, and resets the provider.
pub(crate) fn lock() -> std::sync::MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let guard = TEST_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    // Dropping a registered keychain frees its keys, so that happens before the reset.
    drop(keychain::registry::unregister());
    *state() = State::default();
    guard
}

/// Makes every failure return -1, like providers that predate distinct status codes.
pub(crate) fn set_legacy(legacy: bool) {
    state().legacy = legacy;
}

/// Sizes the public keys and signatures of RSA keys like those of real keys with this modulus. The default is 2048.
pub(crate) fn set_rsa_bits(bits: usize) {
    state().rsa_bits = Some(bits);
}

/// Invalidates every key the provider handed out, as if it had been restarted.
pub(crate) fn forget_open_keys() {
    state().open.clear();
}

pub(crate) fn frees() -> usize {
    state().frees
}

pub(crate) fn double_frees() -> usize {
    state().double_frees
}

pub(crate) fn open_keys() -> usize {
    state().open.len()
}

pub(crate) fn public_key_of(name: &str, key_type: KeyType) -> Vec<u8> {
    public_key(&state(), name, key_type)
}

pub(crate) fn signature_of(data: &[u8], key_type: KeyType) -> Vec<u8> {
    signature(&state(), data, key_type)
}

fn public_key(state: &State, name: &str, key_type: KeyType) -> Vec<u8> {
    // SubjectPublicKeyInfo of an RSA key is the modulus plus 38 bytes of DER framing.
    let len = match key_type {
        KeyType::Rsa => state.rsa_bits.unwrap_or(2048) / 8 + 38,
        _ => 91,
    };
    name.bytes().cycle().take(len).collect()
}

fn signature(state: &State, data: &[u8], key_type: KeyType) -> Vec<u8> {
    let len = match key_type {
        KeyType::Rsa => state.rsa_bits.unwrap_or(2048) / 8,
        _ => 70,
    };
    data.iter().rev().copied().cycle().take(len).collect()
}

fn state() -> std::sync::MutexGuard<'static, State> {
    STATE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn fail(state: &State, status: KEYCHAIN_STATUS) -> KEYCHAIN_STATUS {
    if state.legacy {
        KEYCHAIN_STATUS { inner: u32::MAX }
    } else {
        status
    }
}

unsafe fn name_of(name: *const std::os::raw::c_char) -> Option<String> {
    let name = name.as_ref()?;
    let name = std::ffi::CStr::from_ptr(name).to_str().ok()?;
    Some(name.to_owned())
}

fn open(state: &mut State, name: String, key_type: KeyType) -> KEYCHAIN_KEY {
    state.next_key += 1;
    let key = 0x1000 + state.next_key;
    state.open.insert(key, (name, key_type));
    KEYCHAIN_KEY { inner: key }
}

fn write(
    state: &State,
    value: &[u8],
    buf: *mut std::os::raw::c_uchar,
    len: *mut usize,
) -> KEYCHAIN_STATUS {
    let Some(len) = (unsafe { len.as_mut() }) else {
        return fail(state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };
    if value.len() > *len {
        if !state.legacy {
            *len = value.len();
        }
        return fail(state, KEYCHAIN_STATUS_BUFFER_TOO_SMALL);
    }

    unsafe {
        std::ptr::copy_nonoverlapping(value.as_ptr(), buf, value.len());
    }
    *len = value.len();
    KEYCHAIN_STATUS_SUCCESS
}

unsafe extern "C" fn gen_key(
    type_: KEYCHAIN_KEY_TYPE,
    name: *const std::os::raw::c_char,
    pkey: *mut KEYCHAIN_KEY,
) -> KEYCHAIN_STATUS {
    let mut state = state();
    let (Some(name), Some(pkey)) = (name_of(name), pkey.as_mut()) else {
        return fail(&state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };

    let key_type = KeyType::from(type_);
    if key_type == KeyType::Invalid {
        return fail(&state, KEYCHAIN_STATUS_UNSUPPORTED);
    }
    if state.keys.contains_key(&name) {
        return fail(&state, KEYCHAIN_STATUS_PLATFORM_FAILURE);
    }

    state.keys.insert(name.clone(), key_type);
    *pkey = open(&mut state, name, key_type);
    KEYCHAIN_STATUS_SUCCESS
}

unsafe extern "C" fn load_key(
    name: *const std::os::raw::c_char,
    pkey: *mut KEYCHAIN_KEY,
) -> KEYCHAIN_STATUS {
    let mut state = state();
    let (Some(name), Some(pkey)) = (name_of(name), pkey.as_mut()) else {
        return fail(&state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };

    let Some(&key_type) = state.keys.get(&name) else {
        return fail(&state, KEYCHAIN_STATUS_NOT_FOUND);
    };
    *pkey = open(&mut state, name, key_type);
    KEYCHAIN_STATUS_SUCCESS
}

unsafe extern "C" fn rem_key(name: *const std::os::raw::c_char) -> KEYCHAIN_STATUS {
    let mut state = state();
    let Some(name) = name_of(name) else {
        return fail(&state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };

    if state.keys.remove(&name).is_none() {
        return fail(&state, KEYCHAIN_STATUS_NOT_FOUND);
    }
    KEYCHAIN_STATUS_SUCCESS
}

unsafe extern "C" fn key_type(key: KEYCHAIN_KEY) -> KEYCHAIN_KEY_TYPE {
    let state = state();
    let key_type = state
        .open
        .get(&key.inner)
        .map_or(KeyType::Invalid, |&(_, key_type)| key_type);
    key_type.into()
}

unsafe extern "C" fn key_public(
    key: KEYCHAIN_KEY,
    buf: *mut std::os::raw::c_uchar,
    len: *mut usize,
) -> KEYCHAIN_STATUS {
    let state = state();
    let Some((name, key_type)) = state.open.get(&key.inner) else {
        return fail(&state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };

    let public_key = public_key(&state, name, *key_type);
    write(&state, &public_key, buf, len)
}

unsafe extern "C" fn key_sign(
    key: KEYCHAIN_KEY,
    data: *const std::os::raw::c_uchar,
    datalen: usize,
    sig: *mut std::os::raw::c_uchar,
    siglen: *mut usize,
    param: std::os::raw::c_int,
) -> KEYCHAIN_STATUS {
    let state = state();
    let Some(&(_, key_type)) = state.open.get(&key.inner) else {
        return fail(&state, KEYCHAIN_STATUS_INVALID_ARGUMENT);
    };

    match SignParameter::from_raw(param) {
        Ok(param) if param.is_compatible_with(key_type) => (),
        _ => return fail(&state, KEYCHAIN_STATUS_UNSUPPORTED),
    }

    let data = if datalen == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data, datalen)
    };
    let signature = signature(&state, data, key_type);
    write(&state, &signature, sig, siglen)
}

unsafe extern "C" fn free_key(key: KEYCHAIN_KEY) {
    let mut state = state();
    if key.inner == 0 {
        return;
    }

    if state.open.remove(&key.inner).is_some() {
        state.frees += 1;
    } else {
        state.double_frees += 1;
    }
}
