//! Platform-specific paths for wallet data and configuration.

use std::path::PathBuf;

const APP_DIR: &str = "BTCZWallet";

/// Get the platform-specific data directory for the local cache store
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\BTCZWallet
/// - macOS: ~/Library/Application Support/BTCZWallet
/// - Linux/Other: ~/.local/share/BTCZWallet
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the default local cache database path
pub fn get_default_database_path() -> PathBuf {
    get_data_dir().join("wallet.db")
}

/// Get the default configuration file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("btczwallet.toml")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
