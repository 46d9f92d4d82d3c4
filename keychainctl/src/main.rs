// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::needless_pass_by_value)]

use anyhow::{Context, Result};

// Subcommands
mod key;
mod sign;

#[derive(clap::Parser)]
#[command(version, about = "Generate, inspect and use keys of the configured keychain")]
struct Options {
    /// Path of the config file.
    #[arg(
        long,
        global = true,
        env = "KEYCHAIN_CONFIG",
        default_value = keychain_config::DEFAULT_CONFIG_PATH
    )]
    config: std::path::PathBuf,

    /// Directory of config files applied on top of the config file.
    #[arg(
        long,
        global = true,
        env = "KEYCHAIN_CONFIG_DIR",
        default_value = keychain_config::DEFAULT_CONFIG_DIRECTORY_PATH
    )]
    config_dir: std::path::PathBuf,

    /// Log debug messages. KEYCHAIN_LOG takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Generate a new key.
    Generate(key::GenerateOptions),

    /// Remove a key from the keychain.
    Remove(key::RemoveOptions),

    /// Print the type and public key of a key.
    Info(key::InfoOptions),

    /// Write the public key of a key to a file.
    ExportPublic(key::ExportPublicOptions),

    /// Sign the contents of a file.
    Sign(sign::SignOptions),

    /// Sign a fixed message with a key and verify the signature.
    Test(sign::TestOptions),
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Generate(options) => key::generate(options),
        Command::Remove(options) => key::remove(options),
        Command::Info(options) => key::info(options),
        Command::ExportPublic(options) => key::export_public(options),
        Command::Sign(options) => sign::sign(options),
        Command::Test(options) => sign::test(options),
    }
}

fn try_main() -> Result<()> {
    let options: Options = clap::Parser::parse();

    let default_level = if options.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    logger::try_init(default_level).context("could not initialize logger")?;

    openssl::init();

    let config = keychain_config::Config::load(&options.config, &options.config_dir)
        .context("could not load config")?;
    log::debug!("keys are stored under {}", config.homedir_path.display());

    let keychain = keychain_soft::keychain(&config);
    let _ = keychain::registry::register(std::sync::Arc::new(keychain));

    run(options.command)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
