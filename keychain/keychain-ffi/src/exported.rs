// Copyright (c) Microsoft. All rights reserved.

use keychain::{registry, Error, ErrorKind, KeyHandle, KeyType, SignParameter};

use crate::{
    ForeignKeychain, LoadFunctionListError, KEYCHAIN_FUNCTION_LIST, KEYCHAIN_KEY,
    KEYCHAIN_KEY_TYPE, KEYCHAIN_STATUS, KEYCHAIN_VERSION,
};

static FUNCTION_LIST_1_0_0_0: KEYCHAIN_FUNCTION_LIST = KEYCHAIN_FUNCTION_LIST {
    version: crate::KEYCHAIN_VERSION_1_0_0_0,
    gen_key: Some(gen_key),
    load_key: Some(load_key),
    rem_key: Some(rem_key),
    key_type: Some(key_type),
    key_public: Some(key_public),
    key_sign: Some(key_sign),
    free_key: Some(free_key),
};

/// Get the function list of the active keychain.
///
/// The functions of the list look up the active keychain in the registry on every call,
/// so the list stays valid when a different keychain is registered. Handles do not: they belong to the keychain that issued them.
///
/// `key_public` and `key_sign` of this list also accept a `NULL` buffer with a non-`NULL` length pointer.
/// They then write the required buffer size to the length pointer and succeed.
///
/// # Errors
///
/// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`:
///   - `version` is not a version supported by this library.
///   - `pfunction_list` is `NULL`.
#[no_mangle]
pub unsafe extern "C" fn keychain_get_function_list(
    version: KEYCHAIN_VERSION,
    pfunction_list: *mut *const KEYCHAIN_FUNCTION_LIST,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let mut function_list_out = std::ptr::NonNull::new(pfunction_list)
            .ok_or_else(|| Error::invalid_argument("pfunction_list", "expected non-NULL"))?;

        match version {
            crate::KEYCHAIN_VERSION_1_0_0_0 => {
                *function_list_out.as_mut() = &FUNCTION_LIST_1_0_0_0;
                Ok(())
            }

            _ => Err(Error::invalid_argument("version", "unsupported version")),
        }
    })
}

/// Make the keychain described by `function_list` the active keychain, replacing the previous one.
///
/// `function_list` must remain valid for the rest of the life of the process.
///
/// # Errors
///
/// - `KEYCHAIN_STATUS_INVALID_ARGUMENT`:
///   - `function_list` is `NULL`.
///   - `function_list` has an unsupported version or is missing a function.
///   - `function_list` is the list returned by [`keychain_get_function_list`].
#[no_mangle]
pub unsafe extern "C" fn keychain_register(
    function_list: *const KEYCHAIN_FUNCTION_LIST,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        if std::ptr::eq(function_list, &FUNCTION_LIST_1_0_0_0) {
            return Err(Error::invalid_argument(
                "function_list",
                "cannot register the function list of the registry itself",
            ));
        }

        let function_list: &'static KEYCHAIN_FUNCTION_LIST = function_list
            .as_ref()
            .ok_or_else(|| {
                Error::invalid_argument("function_list", LoadFunctionListError::NullFunctionList)
            })?;
        let keychain = ForeignKeychain::new(function_list)
            .map_err(|err| Error::invalid_argument("function_list", err))?;

        registry::register(std::sync::Arc::new(keychain));
        Ok(())
    })
}

/// Catches the error or panic, if any, and converts it to a status. Otherwise returns [`crate::KEYCHAIN_STATUS_SUCCESS`].
fn r#catch(f: impl FnOnce() -> Result<(), Error>) -> KEYCHAIN_STATUS {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(())) => crate::KEYCHAIN_STATUS_SUCCESS,

        Ok(Err(err)) => {
            match err.kind() {
                ErrorKind::PlatformFailure => {
                    log::warn!("{err}");
                    let mut source = std::error::Error::source(&err);
                    while let Some(err) = source {
                        log::warn!("caused by: {err}");
                        source = std::error::Error::source(err);
                    }
                }
                _ => log::debug!("{err}"),
            }
            (&err).into()
        }

        Err(_) => {
            log::error!("keychain call panicked");
            crate::KEYCHAIN_STATUS_PLATFORM_FAILURE
        }
    }
}

unsafe fn name_arg<'a>(name: *const std::os::raw::c_char) -> Result<&'a str, Error> {
    if name.is_null() {
        return Err(Error::invalid_argument("name", "expected non-NULL"));
    }
    let name = std::ffi::CStr::from_ptr(name);
    let name = name
        .to_str()
        .map_err(|err| Error::invalid_argument("name", err))?;
    Ok(name)
}

/// Reports the required size through the length pointer of a failed call, if the keychain knows it.
fn report_required(err: &Error, len: &mut usize) {
    if let Error::BufferTooSmall {
        required: Some(required),
        ..
    } = err
    {
        *len = *required;
    }
}

unsafe extern "C" fn gen_key(
    type_: KEYCHAIN_KEY_TYPE,
    name: *const std::os::raw::c_char,
    pkey: *mut KEYCHAIN_KEY,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let name = name_arg(name)?;
        let mut key_out = std::ptr::NonNull::new(pkey)
            .ok_or_else(|| Error::invalid_argument("pkey", "expected non-NULL"))?;

        let keychain = registry::require()?;
        let handle = keychain.generate_key(type_.into(), name)?;
        *key_out.as_mut() = handle.into();
        Ok(())
    })
}

unsafe extern "C" fn load_key(
    name: *const std::os::raw::c_char,
    pkey: *mut KEYCHAIN_KEY,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let name = name_arg(name)?;
        let mut key_out = std::ptr::NonNull::new(pkey)
            .ok_or_else(|| Error::invalid_argument("pkey", "expected non-NULL"))?;

        let keychain = registry::require()?;
        let handle = keychain.load_key(name)?;
        *key_out.as_mut() = handle.into();
        Ok(())
    })
}

unsafe extern "C" fn rem_key(name: *const std::os::raw::c_char) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let name = name_arg(name)?;

        let keychain = registry::require()?;
        keychain.remove_key(name)
    })
}

unsafe extern "C" fn key_type(key: KEYCHAIN_KEY) -> KEYCHAIN_KEY_TYPE {
    let key_type = std::panic::catch_unwind(|| {
        registry::active().map_or(KeyType::Invalid, |keychain| keychain.key_type(key.into()))
    });
    key_type.unwrap_or(KeyType::Invalid).into()
}

unsafe extern "C" fn key_public(
    key: KEYCHAIN_KEY,
    buf: *mut std::os::raw::c_uchar,
    len: *mut usize,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let mut len_out = std::ptr::NonNull::new(len)
            .ok_or_else(|| Error::invalid_argument("len", "expected non-NULL"))?;
        let len_out = len_out.as_mut();

        let keychain = registry::require()?;
        let handle = KeyHandle::from(key);

        if buf.is_null() {
            *len_out = keychain.key_public_len(handle)?;
            return Ok(());
        }

        let buf = std::slice::from_raw_parts_mut(buf, *len_out);
        match keychain.key_public(handle, buf) {
            Ok(written) => {
                *len_out = written;
                Ok(())
            }
            Err(err) => {
                report_required(&err, len_out);
                Err(err)
            }
        }
    })
}

unsafe extern "C" fn key_sign(
    key: KEYCHAIN_KEY,
    data: *const std::os::raw::c_uchar,
    datalen: usize,
    sig: *mut std::os::raw::c_uchar,
    siglen: *mut usize,
    param: std::os::raw::c_int,
) -> KEYCHAIN_STATUS {
    r#catch(|| {
        let mut siglen_out = std::ptr::NonNull::new(siglen)
            .ok_or_else(|| Error::invalid_argument("siglen", "expected non-NULL"))?;
        let siglen_out = siglen_out.as_mut();

        let data = if datalen == 0 {
            &[][..]
        } else if data.is_null() {
            return Err(Error::invalid_argument("data", "expected non-NULL"));
        } else {
            std::slice::from_raw_parts(data, datalen)
        };

        let param = SignParameter::from_raw(param)?;

        let keychain = registry::require()?;
        let handle = KeyHandle::from(key);

        if sig.is_null() {
            *siglen_out = keychain.key_sign_len(handle, param)?;
            return Ok(());
        }

        let sig = std::slice::from_raw_parts_mut(sig, *siglen_out);
        match keychain.key_sign(handle, data, sig, param) {
            Ok(written) => {
                *siglen_out = written;
                Ok(())
            }
            Err(err) => {
                report_required(&err, siglen_out);
                Err(err)
            }
        }
    })
}

unsafe extern "C" fn free_key(key: KEYCHAIN_KEY) {
    let _ = std::panic::catch_unwind(|| {
        if let Some(keychain) = registry::active() {
            keychain.free_key(key.into());
        } else {
            log::debug!("ignoring free of handle {} without a keychain", key.inner);
        }
    });
}

#[cfg(test)]
mod tests {
    use keychain::{KeyType, Keychain, MessageDigest, SignParameter};

    use crate::test_provider;
    use crate::{
        KEYCHAIN_FUNCTION_LIST, KEYCHAIN_KEY, KEYCHAIN_KEY_NULL, KEYCHAIN_KEY_TYPE_EC,
        KEYCHAIN_KEY_TYPE_INVALID, KEYCHAIN_KEY_TYPE_RSA, KEYCHAIN_STATUS_BUFFER_TOO_SMALL,
        KEYCHAIN_STATUS_INVALID_ARGUMENT, KEYCHAIN_STATUS_NOT_FOUND,
        KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN, KEYCHAIN_STATUS_SUCCESS, KEYCHAIN_STATUS_UNSUPPORTED,
    };

    const PKCS1_SHA256: std::os::raw::c_int = 0x11;

    fn exported() -> &'static KEYCHAIN_FUNCTION_LIST {
        let mut function_list: *const KEYCHAIN_FUNCTION_LIST = std::ptr::null();
        let status = unsafe {
            super::keychain_get_function_list(crate::KEYCHAIN_VERSION_1_0_0_0, &mut function_list)
        };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        unsafe { &*function_list }
    }

    fn register_test_provider() {
        let status = unsafe { super::keychain_register(&test_provider::FUNCTION_LIST) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
    }

    #[test]
    fn get_function_list_rejects_bad_arguments() {
        let status = unsafe {
            super::keychain_get_function_list(
                crate::KEYCHAIN_VERSION_1_0_0_0,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        let mut function_list: *const KEYCHAIN_FUNCTION_LIST = std::ptr::null();
        let status = unsafe {
            super::keychain_get_function_list(
                crate::KEYCHAIN_VERSION { inner: 0x02_00_00_00 },
                &mut function_list,
            )
        };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);
        assert!(function_list.is_null());
    }

    #[test]
    fn register_rejects_bad_function_lists() {
        let _guard = test_provider::lock();

        let status = unsafe { super::keychain_register(std::ptr::null()) };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        let status = unsafe { super::keychain_register(exported()) };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        static NO_SIGN: KEYCHAIN_FUNCTION_LIST = KEYCHAIN_FUNCTION_LIST {
            key_sign: None,
            ..test_provider::function_list()
        };
        let status = unsafe { super::keychain_register(&NO_SIGN) };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        assert!(keychain::registry::active().is_none());
    }

    #[test]
    fn calls_without_keychain() {
        let _guard = test_provider::lock();
        let list = exported();

        let mut key = KEYCHAIN_KEY_NULL;
        let status = unsafe { (list.load_key.unwrap())(b"k\0".as_ptr().cast(), &mut key) };
        assert_eq!(status, KEYCHAIN_STATUS_NO_ACTIVE_KEYCHAIN);

        let key_type = unsafe { (list.key_type.unwrap())(KEYCHAIN_KEY { inner: 1 }) };
        assert_eq!(key_type, KEYCHAIN_KEY_TYPE_INVALID);

        unsafe { (list.free_key.unwrap())(KEYCHAIN_KEY { inner: 1 }) };
    }

    #[test]
    fn dispatches_to_registered_provider() {
        let _guard = test_provider::lock();
        register_test_provider();
        let list = exported();

        // Generate RSA key "test1", load it, check its type, export its public key, sign, free, remove.
        let mut generated = KEYCHAIN_KEY_NULL;
        let status = unsafe {
            (list.gen_key.unwrap())(KEYCHAIN_KEY_TYPE_RSA, b"test1\0".as_ptr().cast(), &mut generated)
        };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert_ne!(generated, KEYCHAIN_KEY_NULL);

        let mut key = KEYCHAIN_KEY_NULL;
        let status = unsafe { (list.load_key.unwrap())(b"test1\0".as_ptr().cast(), &mut key) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert_eq!(unsafe { (list.key_type.unwrap())(key) }, KEYCHAIN_KEY_TYPE_RSA);

        let mut buf = [0_u8; 4096];
        let mut len = buf.len();
        let status = unsafe { (list.key_public.unwrap())(key, buf.as_mut_ptr(), &mut len) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert_eq!(
            &buf[..len],
            &test_provider::public_key_of("test1", KeyType::Rsa)[..]
        );

        let data = b"hello";
        let mut sig = [0_u8; 512];
        let mut siglen = sig.len();
        let status = unsafe {
            (list.key_sign.unwrap())(
                key,
                data.as_ptr(),
                data.len(),
                sig.as_mut_ptr(),
                &mut siglen,
                PKCS1_SHA256,
            )
        };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert_eq!(
            &sig[..siglen],
            &test_provider::signature_of(data, KeyType::Rsa)[..]
        );

        unsafe {
            (list.free_key.unwrap())(key);
            (list.free_key.unwrap())(key);
            (list.free_key.unwrap())(generated);
            (list.free_key.unwrap())(KEYCHAIN_KEY_NULL);
        }
        assert_eq!(test_provider::frees(), 2);
        assert_eq!(test_provider::double_frees(), 0);
        assert_eq!(unsafe { (list.key_type.unwrap())(key) }, KEYCHAIN_KEY_TYPE_INVALID);

        let status = unsafe { (list.rem_key.unwrap())(b"test1\0".as_ptr().cast()) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        let status = unsafe { (list.load_key.unwrap())(b"test1\0".as_ptr().cast(), &mut key) };
        assert_eq!(status, KEYCHAIN_STATUS_NOT_FOUND);
    }

    #[test]
    fn size_query_and_short_buffer() {
        let _guard = test_provider::lock();
        register_test_provider();
        let list = exported();

        let mut key = KEYCHAIN_KEY_NULL;
        let status =
            unsafe { (list.gen_key.unwrap())(KEYCHAIN_KEY_TYPE_EC, b"k\0".as_ptr().cast(), &mut key) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);

        let mut required = 0;
        let status =
            unsafe { (list.key_public.unwrap())(key, std::ptr::null_mut(), &mut required) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert_eq!(required, test_provider::public_key_of("k", KeyType::Ec).len());

        // A one-byte buffer fails, leaves the canary alone, and reports the required size.
        let mut buf = [0xA5_u8; 2];
        let mut len = 1;
        let status = unsafe { (list.key_public.unwrap())(key, buf.as_mut_ptr(), &mut len) };
        assert_eq!(status, KEYCHAIN_STATUS_BUFFER_TOO_SMALL);
        assert_eq!(buf, [0xA5, 0xA5]);
        assert_eq!(len, required);

        let status = unsafe {
            (list.key_public.unwrap())(key, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        let mut max_siglen = 0;
        let status = unsafe {
            (list.key_sign.unwrap())(
                key,
                b"x".as_ptr(),
                1,
                std::ptr::null_mut(),
                &mut max_siglen,
                0x31,
            )
        };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);
        assert!(max_siglen >= test_provider::signature_of(b"x", KeyType::Ec).len());

        let mut sig = [0_u8; 512];
        let mut siglen = sig.len();
        let status = unsafe {
            (list.key_sign.unwrap())(
                key,
                b"x".as_ptr(),
                1,
                sig.as_mut_ptr(),
                &mut siglen,
                PKCS1_SHA256,
            )
        };
        assert_eq!(status, KEYCHAIN_STATUS_UNSUPPORTED);

        let status = unsafe {
            (list.key_sign.unwrap())(key, b"x".as_ptr(), 1, sig.as_mut_ptr(), &mut siglen, 0x7f)
        };
        assert_eq!(status, KEYCHAIN_STATUS_UNSUPPORTED);
    }

    #[test]
    fn handles_do_not_survive_replacement() {
        let _guard = test_provider::lock();
        register_test_provider();
        let list = exported();

        let mut key = KEYCHAIN_KEY_NULL;
        let status =
            unsafe { (list.gen_key.unwrap())(KEYCHAIN_KEY_TYPE_EC, b"k\0".as_ptr().cast(), &mut key) };
        assert_eq!(status, KEYCHAIN_STATUS_SUCCESS);

        let previous = keychain::registry::active().unwrap();
        register_test_provider();

        assert_eq!(unsafe { (list.key_type.unwrap())(key) }, KEYCHAIN_KEY_TYPE_INVALID);
        let mut len = 0;
        let status = unsafe { (list.key_public.unwrap())(key, std::ptr::null_mut(), &mut len) };
        assert_eq!(status, KEYCHAIN_STATUS_INVALID_ARGUMENT);

        // The previous keychain still resolves the handle for whoever kept it.
        assert_eq!(previous.key_type(key.into()), KeyType::Ec);
        let signature = previous
            .key_sign_to_vec(key.into(), b"x", SignParameter::Ecdsa(MessageDigest::Sha256))
            .unwrap();
        assert_eq!(signature, test_provider::signature_of(b"x", KeyType::Ec));
    }
}
