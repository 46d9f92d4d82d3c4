// Copyright (c) Microsoft. All rights reserved.

use anyhow::{Context, Result};

#[derive(clap::Args)]
pub(crate) struct GenerateOptions {
    /// Type of the new key.
    #[arg(long = "type", value_name = "rsa|ec")]
    key_type: keychain::KeyType,

    /// Name of the new key.
    name: String,
}

#[derive(clap::Args)]
pub(crate) struct RemoveOptions {
    /// Name of the key.
    name: String,
}

#[derive(clap::Args)]
pub(crate) struct InfoOptions {
    /// Name of the key.
    name: String,
}

#[derive(clap::Args)]
pub(crate) struct ExportPublicOptions {
    /// Name of the key.
    name: String,

    /// File to write the public key to.
    #[arg(long)]
    out: std::path::PathBuf,

    /// Write PEM instead of DER.
    #[arg(long)]
    pem: bool,
}

pub(crate) fn generate(options: GenerateOptions) -> Result<()> {
    let keychain = keychain::registry::require()?;
    let key = keychain::PrivateKey::generate(keychain, options.key_type, &options.name)
        .with_context(|| format!("could not generate key {:?}", options.name))?;

    println!("Generated {} key {:?}.", key.key_type(), options.name);
    Ok(())
}

pub(crate) fn remove(options: RemoveOptions) -> Result<()> {
    let keychain = keychain::registry::require()?;
    keychain
        .remove_key(&options.name)
        .with_context(|| format!("could not remove key {:?}", options.name))?;

    println!("Removed key {:?}.", options.name);
    Ok(())
}

pub(crate) fn info(options: InfoOptions) -> Result<()> {
    let key = load(&options.name)?;
    let public_key_der = key
        .public_key_der()
        .context("could not export public key")?;
    let public_key = openssl::pkey::PKey::public_key_from_der(&public_key_der)
        .context("keychain returned a malformed public key")?;
    let public_key_pem = public_key
        .public_key_to_pem()
        .context("could not encode public key")?;

    println!("name: {}", options.name);
    println!("type: {}", key.key_type());
    println!("bits: {}", public_key.bits());
    println!(
        "sha256 fingerprint: {}",
        hex::encode(openssl::sha::sha256(&public_key_der))
    );
    print!("{}", String::from_utf8_lossy(&public_key_pem));
    Ok(())
}

pub(crate) fn export_public(options: ExportPublicOptions) -> Result<()> {
    let key = load(&options.name)?;
    let mut public_key = key
        .public_key_der()
        .context("could not export public key")?;
    if options.pem {
        public_key = openssl::pkey::PKey::public_key_from_der(&public_key)
            .and_then(|public_key| public_key.public_key_to_pem())
            .context("could not encode public key")?;
    }

    std::fs::write(&options.out, public_key)
        .with_context(|| format!("could not write {}", options.out.display()))?;
    log::info!(
        "wrote public key of {:?} to {}",
        options.name,
        options.out.display()
    );
    Ok(())
}

pub(crate) fn load(name: &str) -> Result<keychain::PrivateKey> {
    let key = keychain::PrivateKey::load_from_registry(name)
        .with_context(|| format!("could not load key {name:?}"))?;
    Ok(key)
}
