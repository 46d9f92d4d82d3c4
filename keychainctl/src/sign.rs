// Copyright (c) Microsoft. All rights reserved.

use anyhow::{anyhow, Context, Result};

/// Signed by `keychainctl test`.
const TEST_MESSAGE: &[u8] = b"this is a message";

#[derive(clap::Args)]
pub(crate) struct SignOptions {
    /// Name of the key.
    name: String,

    /// Signature scheme, such as rsa-pkcs1-sha256, rsa-pss-sha384 or ecdsa-sha256.
    /// Defaults to the SHA-256 scheme of the key's type.
    #[arg(long)]
    param: Option<keychain::SignParameter>,

    /// File to sign.
    #[arg(long = "in")]
    input: std::path::PathBuf,

    /// File to write the signature to.
    #[arg(long)]
    out: std::path::PathBuf,
}

#[derive(clap::Args)]
pub(crate) struct TestOptions {
    /// Name of the key.
    name: String,
}

pub(crate) fn sign(options: SignOptions) -> Result<()> {
    let data = std::fs::read(&options.input)
        .with_context(|| format!("could not read {}", options.input.display()))?;

    let key = crate::key::load(&options.name)?;
    let signature = match options.param {
        Some(param) => key.sign_with(param, &data),
        None => key.sign(&data),
    }
    .with_context(|| format!("could not sign with key {:?}", options.name))?;

    std::fs::write(&options.out, &signature)
        .with_context(|| format!("could not write {}", options.out.display()))?;
    log::info!(
        "wrote {}-byte signature to {}",
        signature.len(),
        options.out.display()
    );
    Ok(())
}

pub(crate) fn test(options: TestOptions) -> Result<()> {
    let key = crate::key::load(&options.name)?;
    let param = keychain::SignParameter::default_for(key.key_type())
        .ok_or_else(|| anyhow!("key {:?} has no usable type", options.name))?;

    let public_key_der = key
        .public_key_der()
        .context("could not export public key")?;
    let signature = key
        .sign_with(param, TEST_MESSAGE)
        .with_context(|| format!("could not sign with key {:?}", options.name))?;
    log::debug!("{param} signature: {}", hex::encode(&signature));

    let verified = keychain_soft::verify(&public_key_der, param, TEST_MESSAGE, &signature)
        .context("could not verify signature")?;
    if !verified {
        return Err(anyhow!(
            "{param} signature made by key {:?} does not verify",
            options.name
        ));
    }

    println!("Key {:?} signed and verified with {param}.", options.name);
    Ok(())
}
