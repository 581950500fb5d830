//! monalisa: Extract content keys from MonaLisa license tickets.
//!
//! Loads the guest module named by a device descriptor, runs one session
//! against the ticket and logs the recovered key material.
//!
//! # Usage
//!
//! ```bash
//! # Print the content key
//! monalisa license "AIUACgMAAAAAAAAAAAQChgACATADhwAnAgAg3UBbUdVCWXAjkgoUgmICmHvomvZai0jGglWe+oaQC+M=" device.mld
//!
//! # Print kid:key pairs
//! monalisa license "$TICKET" device.mld -t full
//!
//! # Print the version banner
//! monalisa -v
//! ```

use chrono::Datelike;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info, warn};
use monalisa_cdm::{extract_keys, Cdm, GuestModule, Key, KeyType, License, Result};
use std::path::{Path, PathBuf};
use std::process;

/// MonaLisa license processing tool.
#[derive(Parser, Debug)]
#[command(name = "monalisa")]
#[command(author, version, about, long_about = None, disable_version_flag = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Print version information
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process an encoded license and extract decryption keys
    License {
        /// Base64 encoded MonaLisa license ticket
        #[arg(value_name = "LICENSE_DATA")]
        license_data: String,

        /// Path to the MonaLisa device descriptor (.mld)
        #[arg(value_name = "DEVICE_PATH")]
        device_path: PathBuf,

        /// Output format for extracted keys
        #[arg(short = 't', long, value_enum, ignore_case = true, default_value = "content")]
        key_type: KeyOutput,
    },
}

/// How extracted keys are printed.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KeyOutput {
    /// Key bytes only
    Content,
    /// `kid:key` pairs
    Full,
}

impl KeyOutput {
    fn render(self, key: &Key) -> String {
        match self {
            KeyOutput::Content => key.key_hex(),
            KeyOutput::Full => format!("{}:{}", key.kid_hex(), key.key_hex()),
        }
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    print_banner();
    if args.version {
        return;
    }

    let Some(Command::License {
        license_data,
        device_path,
        key_type,
    }) = args.command
    else {
        return;
    };

    if !device_path.is_file() {
        error!("Module file not found: {}", device_path.display());
        process::exit(1);
    }

    match process_license(&license_data, &device_path) {
        Ok(keys) if keys.is_empty() => warn!("No keys found in license"),
        Ok(keys) => {
            info!("Found {} keys:", keys.len());
            for key in &keys {
                info!("{}", key_type.render(key));
            }
        }
        Err(e) => {
            error!("{}: {}", e.category(), e);
            process::exit(1);
        }
    }
}

fn print_banner() {
    let current_year = chrono::Local::now().year();
    let copyright_years = if current_year > 2025 {
        format!("2025-{}", current_year)
    } else {
        "2025".to_string()
    };

    info!(
        "monalisa version {} Copyright (c) {} {}",
        env!("CARGO_PKG_VERSION"),
        copyright_years,
        env!("CARGO_PKG_AUTHORS")
    );
    info!("MonaLisa Content Decryption Module");
    info!("Run 'monalisa --help' for help");
}

fn process_license(license_data: &str, device_path: &Path) -> Result<Vec<Key>> {
    info!("Loading module: {}", device_path.display());
    let module = GuestModule::load(device_path)?;
    let cdm = Cdm::from_module(module);

    info!("Parsing license and extracting keys...");
    extract_keys(&cdm, License::from_text(license_data), Some(KeyType::Content))
}
