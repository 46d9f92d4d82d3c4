// Copyright (c) Microsoft. All rights reserved.

use keychain::{Error, KeyType, MessageDigest, SignParameter, StoredKey};

/// A private key held in memory by openssl.
pub struct SoftKey {
    key_type: KeyType,
    private_key: openssl::pkey::PKey<openssl::pkey::Private>,
}

impl SoftKey {
    pub(crate) fn generate(key_type: KeyType, rsa_key_bits: u32) -> Result<Self, Error> {
        let private_key = match key_type {
            KeyType::Ec => {
                let mut group =
                    openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1)
                        .map_err(Error::platform)?;
                group.set_asn1_flag(openssl::ec::Asn1Flag::NAMED_CURVE);
                let ec_key = openssl::ec::EcKey::generate(&group).map_err(Error::platform)?;
                openssl::pkey::PKey::from_ec_key(ec_key).map_err(Error::platform)?
            }

            KeyType::Rsa => {
                let rsa = openssl::rsa::Rsa::generate(rsa_key_bits).map_err(Error::platform)?;
                openssl::pkey::PKey::from_rsa(rsa).map_err(Error::platform)?
            }

            KeyType::Invalid => {
                return Err(Error::unsupported("cannot generate a key of type invalid"))
            }
        };

        Ok(SoftKey {
            key_type,
            private_key,
        })
    }

    pub(crate) fn from_pem(private_key_pem: &[u8]) -> Result<Self, Error> {
        let private_key =
            openssl::pkey::PKey::private_key_from_pem(private_key_pem).map_err(Error::platform)?;

        let key_type = match private_key.id() {
            openssl::pkey::Id::RSA => KeyType::Rsa,
            openssl::pkey::Id::EC => KeyType::Ec,
            id => {
                return Err(Error::unsupported(format!(
                    "key algorithm {} is not supported",
                    id.as_raw()
                )))
            }
        };

        Ok(SoftKey {
            key_type,
            private_key,
        })
    }
}

impl std::fmt::Debug for SoftKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftKey")
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

impl StoredKey for SoftKey {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        self.private_key.public_key_to_der().map_err(Error::platform)
    }

    fn signature_len(&self, _param: SignParameter) -> Result<usize, Error> {
        // Modulus length for RSA, largest DER-encoded signature for ECDSA.
        let len = self.private_key.size();
        Ok(len)
    }

    fn sign(&self, param: SignParameter, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signer = openssl::sign::Signer::new(message_digest(param), &self.private_key)
            .map_err(Error::platform)?;
        match param {
            SignParameter::RsaPkcs1(_) => signer
                .set_rsa_padding(openssl::rsa::Padding::PKCS1)
                .map_err(Error::platform)?,

            SignParameter::RsaPss(_) => {
                signer
                    .set_rsa_padding(openssl::rsa::Padding::PKCS1_PSS)
                    .map_err(Error::platform)?;
                signer
                    .set_rsa_pss_saltlen(openssl::sign::RsaPssSaltlen::DIGEST_LENGTH)
                    .map_err(Error::platform)?;
                signer
                    .set_rsa_mgf1_md(message_digest(param))
                    .map_err(Error::platform)?;
            }

            SignParameter::Ecdsa(_) => (),
        }

        signer.update(data).map_err(Error::platform)?;
        let signature = signer.sign_to_vec().map_err(Error::platform)?;
        Ok(signature)
    }
}

/// Writes the key as PKCS#8 PEM to a new file, readable only by the owner on unix.
///
/// Fails if the file already exists.
pub(crate) fn write_new(path: &std::path::Path, key: &SoftKey) -> Result<(), Error> {
    use std::io::Write;

    let private_key_pem = key
        .private_key
        .private_key_to_pem_pkcs8()
        .map_err(Error::platform)?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::platform(format!(
                "key file {} already exists",
                path.display()
            )))
        }
        Err(err) => return Err(Error::platform(err)),
    };

    if let Err(err) = file.write_all(&private_key_pem).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(Error::platform(err));
    }

    Ok(())
}

/// Verifies a signature made by a key with the given SubjectPublicKeyInfo DER encoding.
///
/// Malformed signatures do not verify. Errors are only returned for unusable public keys or incompatible parameters.
pub fn verify(
    public_key_der: &[u8],
    param: SignParameter,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, Error> {
    let public_key = openssl::pkey::PKey::public_key_from_der(public_key_der)
        .map_err(|err| Error::invalid_argument("public_key_der", err))?;

    let key_type = match public_key.id() {
        openssl::pkey::Id::RSA => KeyType::Rsa,
        openssl::pkey::Id::EC => KeyType::Ec,
        _ => return Err(Error::unsupported("unsupported public key algorithm")),
    };
    if !param.is_compatible_with(key_type) {
        return Err(Error::unsupported(format!(
            "{param} cannot be used with {key_type} keys"
        )));
    }

    let mut verifier = openssl::sign::Verifier::new(message_digest(param), &public_key)
        .map_err(Error::platform)?;
    match param {
        SignParameter::RsaPkcs1(_) => verifier
            .set_rsa_padding(openssl::rsa::Padding::PKCS1)
            .map_err(Error::platform)?,

        SignParameter::RsaPss(_) => {
            verifier
                .set_rsa_padding(openssl::rsa::Padding::PKCS1_PSS)
                .map_err(Error::platform)?;
            verifier
                .set_rsa_pss_saltlen(openssl::sign::RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(Error::platform)?;
            verifier
                .set_rsa_mgf1_md(message_digest(param))
                .map_err(Error::platform)?;
        }

        SignParameter::Ecdsa(_) => (),
    }

    verifier.update(data).map_err(Error::platform)?;
    Ok(verifier.verify(signature).unwrap_or(false))
}

fn message_digest(param: SignParameter) -> openssl::hash::MessageDigest {
    match param.digest() {
        MessageDigest::Sha256 => openssl::hash::MessageDigest::sha256(),
        MessageDigest::Sha384 => openssl::hash::MessageDigest::sha384(),
        MessageDigest::Sha512 => openssl::hash::MessageDigest::sha512(),
    }
}
