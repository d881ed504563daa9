//! Utility functions for CLI operations.

use crate::actions::Session;
use crate::config::ClientConfig;
use crate::crypto::Password;
use crate::error::{NomadError, Result};
use crate::relayer::HttpRelayer;
use crate::storage::{RocksDbConfig, RocksDbStore};
use rpassword::prompt_password;
use std::fs;
use std::time::{Duration, UNIX_EPOCH};

/// Session type used by the CLI.
pub type CliSession = Session<HttpRelayer, RocksDbStore>;

/// Opens the local store, creating the data directory if needed.
pub fn open_store(config: &ClientConfig) -> Result<RocksDbStore> {
    if !config.data_dir.exists() {
        fs::create_dir_all(&config.data_dir)?;
    }
    RocksDbStore::open(config.store_path(), &RocksDbConfig::default())
}

/// Opens a session with a locked vault.
pub fn open_session(config: &ClientConfig) -> Result<CliSession> {
    let relayer = HttpRelayer::new(&config.indexer_api, config.request_timeout)?;
    Session::new(relayer, open_store(config)?)
}

/// Opens a session and unlocks the stored identity.
pub fn unlocked_session(config: &ClientConfig) -> Result<CliSession> {
    let mut session = open_session(config)?;
    let identity = session
        .current_identity()
        .map(ToString::to_string)
        .ok_or_else(|| NomadError::invalid_input("No identity stored; run `nomad identity add`"))?;
    let password = prompt_for_password(&format!("Password for {}", identity))?;
    session.tld_login(&password)?;
    Ok(session)
}

/// Format Unix milliseconds as a human-readable string
pub fn format_timestamp(millis: u64) -> String {
    let datetime = UNIX_EPOCH + Duration::from_millis(millis);
    format!("{:?}", datetime)
}

/// Prompt for a password securely (no echo to terminal)
pub fn prompt_for_password(prompt: &str) -> Result<Password> {
    let password_str = prompt_password(format!("{}: ", prompt))
        .map_err(|e| NomadError::invalid_input(format!("Failed to read password: {}", e)))?;

    if password_str.is_empty() {
        return Err(NomadError::invalid_input("Password cannot be empty"));
    }

    Ok(Password::new(password_str))
}

/// Prompt twice and require both entries to match
pub fn prompt_for_new_password(prompt: &str) -> Result<Password> {
    let first = prompt_password(format!("{}: ", prompt))
        .map_err(|e| NomadError::invalid_input(format!("Failed to read password: {}", e)))?;
    let second = prompt_password("Repeat password: ")
        .map_err(|e| NomadError::invalid_input(format!("Failed to read password: {}", e)))?;

    if first.is_empty() {
        return Err(NomadError::invalid_input("Password cannot be empty"));
    }
    if first != second {
        return Err(NomadError::invalid_input("Passwords do not match"));
    }
    Ok(Password::new(first))
}
