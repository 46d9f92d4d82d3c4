// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Types shared by the keychain contract, its providers and its consumers.

mod error;
pub use error::{Error, ErrorKind};

/// The algorithm family of a key.
///
/// `Invalid` is only ever returned by `key_type` queries on null or unrecognized handles. It is never the type of a stored key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ec,
    Invalid,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Rsa => f.write_str("RSA"),
            KeyType::Ec => f.write_str("EC"),
            KeyType::Invalid => f.write_str("invalid"),
        }
    }
}

impl std::str::FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa" | "RSA" => Ok(KeyType::Rsa),
            "ec" | "EC" => Ok(KeyType::Ec),
            _ => Err(Error::unsupported(format!("unrecognized key type {s:?}"))),
        }
    }
}

/// Number of bits of a [`KeyHandle`]'s raw value used for the slot index.
const INDEX_BITS: u32 = 24;

/// Number of bits of a [`KeyHandle`]'s raw value used for the slot generation.
const GENERATION_BITS: u32 = 24;

/// An opaque reference to a key held by the keychain that issued it.
///
/// A handle identifies the issuing keychain instance (its owner), a slot in that keychain's handle table,
/// and the generation of that slot. Only the issuing keychain can resolve a handle. A handle whose generation
/// no longer matches its slot has been freed.
///
/// The all-zero value is the null handle. Live handles are never null because owner IDs start at 1.
///
/// Owner IDs are 16 bits wide, so they repeat once 65535 keychains have been created in the process.
/// A handle kept past the drop of its keychain may then be accepted by a newer keychain with the same owner ID,
/// if that keychain has a live key in the same slot and generation. Handles must not outlive their keychain.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct KeyHandle {
    owner: u16,
    index: u32,
    generation: u32,
}

impl KeyHandle {
    /// The null handle.
    pub const NULL: KeyHandle = KeyHandle {
        owner: 0,
        index: 0,
        generation: 0,
    };

    /// The largest slot index a handle can carry.
    pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;

    /// The largest slot generation a handle can carry.
    pub const MAX_GENERATION: u32 = (1 << GENERATION_BITS) - 1;

    /// Constructs a non-null handle. Returns `None` if `owner` is 0 or `index` or `generation` are out of range.
    pub fn new(owner: u16, index: u32, generation: u32) -> Option<Self> {
        if owner == 0 || index > Self::MAX_INDEX || generation > Self::MAX_GENERATION {
            return None;
        }

        Some(KeyHandle {
            owner,
            index,
            generation,
        })
    }

    pub fn is_null(self) -> bool {
        self.owner == 0
    }

    pub fn owner(self) -> u16 {
        self.owner
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the handle into an integer suitable for crossing a C boundary.
    pub fn into_raw(self) -> u64 {
        (u64::from(self.owner) << (INDEX_BITS + GENERATION_BITS))
            | (u64::from(self.index) << GENERATION_BITS)
            | u64::from(self.generation)
    }

    /// Unpacks a handle previously packed with [`KeyHandle::into_raw`].
    ///
    /// Any integer unpacks to some handle. Whether it refers to a live key is decided by the keychain it is presented to.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(raw: u64) -> Self {
        KeyHandle {
            owner: (raw >> (INDEX_BITS + GENERATION_BITS)) as u16,
            index: ((raw >> GENERATION_BITS) as u32) & Self::MAX_INDEX,
            generation: (raw as u32) & Self::MAX_GENERATION,
        }
    }
}

impl std::fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}:{}.{}", self.owner, self.index, self.generation)
        }
    }
}

/// The digest used by a signature scheme.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageDigest {
    Sha256,
    Sha384,
    Sha512,
}

impl MessageDigest {
    /// Length of the digest in bytes.
    pub fn size(self) -> usize {
        match self {
            MessageDigest::Sha256 => 32,
            MessageDigest::Sha384 => 48,
            MessageDigest::Sha512 => 64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            MessageDigest::Sha256 => "sha256",
            MessageDigest::Sha384 => "sha384",
            MessageDigest::Sha512 => "sha512",
        }
    }

    fn tag(self) -> i32 {
        match self {
            MessageDigest::Sha256 => 0x1,
            MessageDigest::Sha384 => 0x2,
            MessageDigest::Sha512 => 0x3,
        }
    }

    fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0x1 => Some(MessageDigest::Sha256),
            0x2 => Some(MessageDigest::Sha384),
            0x3 => Some(MessageDigest::Sha512),
            _ => None,
        }
    }
}

/// Selects the signature scheme used by `key_sign`.
///
/// The message passed to `key_sign` is hashed by the provider with the scheme's digest.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignParameter {
    /// RSASSA-PKCS1-v1_5. RSA keys only.
    RsaPkcs1(MessageDigest),

    /// RSASSA-PSS with MGF1 over the same digest and a salt as long as the digest. RSA keys only.
    RsaPss(MessageDigest),

    /// ECDSA with a DER-encoded signature. EC keys only.
    Ecdsa(MessageDigest),
}

impl SignParameter {
    pub fn digest(self) -> MessageDigest {
        match self {
            SignParameter::RsaPkcs1(digest)
            | SignParameter::RsaPss(digest)
            | SignParameter::Ecdsa(digest) => digest,
        }
    }

    /// Whether this scheme can be used with a key of the given type.
    pub fn is_compatible_with(self, key_type: KeyType) -> bool {
        matches!(
            (self, key_type),
            (
                SignParameter::RsaPkcs1(_) | SignParameter::RsaPss(_),
                KeyType::Rsa
            ) | (SignParameter::Ecdsa(_), KeyType::Ec)
        )
    }

    /// The SHA-256 scheme conventionally used with a key of the given type.
    pub fn default_for(key_type: KeyType) -> Option<Self> {
        match key_type {
            KeyType::Rsa => Some(SignParameter::RsaPkcs1(MessageDigest::Sha256)),
            KeyType::Ec => Some(SignParameter::Ecdsa(MessageDigest::Sha256)),
            KeyType::Invalid => None,
        }
    }

    /// The integer tag of this scheme at the C boundary.
    ///
    /// The high nibble selects the scheme (1 = PKCS#1 v1.5, 2 = PSS, 3 = ECDSA) and the low nibble the digest
    /// (1 = SHA-256, 2 = SHA-384, 3 = SHA-512).
    pub fn into_raw(self) -> i32 {
        let scheme = match self {
            SignParameter::RsaPkcs1(_) => 0x10,
            SignParameter::RsaPss(_) => 0x20,
            SignParameter::Ecdsa(_) => 0x30,
        };
        scheme | self.digest().tag()
    }

    /// Decodes an integer tag. Fails with [`ErrorKind::Unsupported`] for unrecognized tags.
    pub fn from_raw(raw: i32) -> Result<Self, Error> {
        let digest = MessageDigest::from_tag(raw & 0xf);
        match (raw & !0xf, digest) {
            (0x10, Some(digest)) => Ok(SignParameter::RsaPkcs1(digest)),
            (0x20, Some(digest)) => Ok(SignParameter::RsaPss(digest)),
            (0x30, Some(digest)) => Ok(SignParameter::Ecdsa(digest)),
            _ => Err(Error::unsupported(format!(
                "unrecognized signing parameter 0x{raw:02x}"
            ))),
        }
    }
}

impl std::fmt::Display for SignParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self {
            SignParameter::RsaPkcs1(_) => "rsa-pkcs1",
            SignParameter::RsaPss(_) => "rsa-pss",
            SignParameter::Ecdsa(_) => "ecdsa",
        };
        write!(f, "{}-{}", scheme, self.digest().name())
    }
}

impl std::str::FromStr for SignParameter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, digest) = s
            .rsplit_once('-')
            .ok_or_else(|| Error::unsupported(format!("unrecognized signing parameter {s:?}")))?;

        let digest = match digest {
            "sha256" => MessageDigest::Sha256,
            "sha384" => MessageDigest::Sha384,
            "sha512" => MessageDigest::Sha512,
            _ => {
                return Err(Error::unsupported(format!(
                    "unrecognized digest in signing parameter {s:?}"
                )))
            }
        };

        match scheme {
            "rsa-pkcs1" => Ok(SignParameter::RsaPkcs1(digest)),
            "rsa-pss" => Ok(SignParameter::RsaPss(digest)),
            "ecdsa" => Ok(SignParameter::Ecdsa(digest)),
            _ => Err(Error::unsupported(format!(
                "unrecognized signing scheme in {s:?}"
            ))),
        }
    }
}
