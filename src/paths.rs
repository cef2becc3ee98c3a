use std::path::PathBuf;

/// Default config file: `~/.config/hvremote/hvremote.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hvremote").join("hvremote.toml"))
}

/// Directory for generated scripts when none is configured.
pub fn default_script_dir() -> PathBuf {
    std::env::temp_dir()
}
