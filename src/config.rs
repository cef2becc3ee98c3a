use std::ffi::OsString;
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::HvError;
use crate::paths;
use crate::session::{Credentials, RemoteHost, Session};

/// Retain generated scripts and log every invocation.
pub const DEBUG_ENV: &str = "HVREMOTE_DEBUG";
/// Log every invocation without retaining scripts.
pub const VERBOSE_ENV: &str = "HVREMOTE_VERBOSE";
/// Directory for generated scripts.
pub const SCRIPT_DIR_ENV: &str = "HVREMOTE_SCRIPT_DIR";

// ── file model ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub interpreter: InterpreterConfig,
    #[facet(default)]
    pub scripts: ScriptsConfig,
    #[facet(default)]
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct InterpreterConfig {
    /// Bare name looked up in PATH, or a path to the executable.
    #[facet(default = "powershell")]
    pub program: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "powershell".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ScriptsConfig {
    /// Where generated scripts are written. Empty means the system temp dir.
    #[facet(default)]
    pub dir: String,
    #[facet(default)]
    pub retain: bool,
    #[facet(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct HostConfig {
    pub name: String,
    pub computer_name: String,
    #[facet(default)]
    pub username: String,
    #[facet(default)]
    pub password: String,
    #[facet(default)]
    pub use_ssl: bool,
}

impl HostConfig {
    pub fn session(&self) -> Session {
        Session::Remote(
            RemoteHost::new(&self.computer_name)
                .with_credentials(Credentials::new(&self.username, &self.password))
                .with_ssl(self.use_ssl),
        )
    }
}

impl Config {
    /// Session for the host entry called `name`.
    pub fn session(&self, name: &str) -> Result<Session, HvError> {
        self.hosts
            .iter()
            .find(|h| h.name == name)
            .map(HostConfig::session)
            .ok_or_else(|| HvError::Validation {
                message: format!("no host named '{name}' in config"),
            })
    }

    /// Runner settings from the file, with environment toggles layered on top.
    pub fn runner_config(&self) -> RunnerConfig {
        let from_file = RunnerConfig {
            program: self.interpreter.program.clone(),
            script_dir: if self.scripts.dir.is_empty() {
                paths::default_script_dir()
            } else {
                PathBuf::from(&self.scripts.dir)
            },
            retain_scripts: self.scripts.retain,
            verbose: self.scripts.verbose,
        };
        from_file.with_env(|key| std::env::var_os(key))
    }
}

// ── runtime settings ──────────────────────────────────────

/// Resolved settings for a [`crate::runner::Runner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub program: String,
    pub script_dir: PathBuf,
    pub retain_scripts: bool,
    pub verbose: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: InterpreterConfig::default().program,
            script_dir: paths::default_script_dir(),
            retain_scripts: false,
            verbose: false,
        }
    }
}

impl RunnerConfig {
    /// Defaults plus the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var_os(key))
    }

    /// Apply the debug/verbose/script-dir toggles. A toggle is on when the
    /// variable is set to anything non-empty. Toggles only ever switch
    /// behavior on; they never turn off what the config enabled.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let is_set = |key: &str| lookup(key).is_some_and(|v| !v.is_empty());
        let debug = is_set(DEBUG_ENV);
        self.retain_scripts |= debug;
        self.verbose |= debug || is_set(VERBOSE_ENV);
        if let Some(dir) = lookup(SCRIPT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.script_dir = PathBuf::from(dir);
        }
        self
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), HvError> {
    if config.interpreter.program.trim().is_empty() {
        return Err(HvError::Validation {
            message: "interpreter.program must not be empty".into(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for (idx, host) in config.hosts.iter().enumerate() {
        let label = format!("hosts[{idx}]");
        validate_name(&host.name).map_err(|message| HvError::Validation {
            message: format!("{label}: {message}"),
        })?;
        if !seen.insert(host.name.as_str()) {
            return Err(HvError::Validation {
                message: format!("{label}: duplicate host name '{}'", host.name),
            });
        }
        if host.computer_name.trim().is_empty() {
            return Err(HvError::Validation {
                message: format!("{label}: computer_name is required"),
            });
        }
        if host.username.is_empty() != host.password.is_empty() {
            return Err(HvError::Validation {
                message: format!("{label}: username and password must be set together"),
            });
        }
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), String> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(format!(
            "host name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"
        ));
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<Config, HvError> {
    let contents = std::fs::read_to_string(path).map_err(|source| HvError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| HvError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;
    tracing::debug!(path = %path.display(), hosts = config.hosts.len(), "loaded config");
    Ok(config)
}

/// Load the config at the default location, or defaults if there is none.
pub fn load_default_config() -> Result<Config, HvError> {
    match paths::default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn host(name: &str) -> HostConfig {
        HostConfig {
            name: name.into(),
            computer_name: "hv01.lab.local".into(),
            ..Default::default()
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base() -> RunnerConfig {
        RunnerConfig {
            program: "powershell".into(),
            script_dir: PathBuf::from("/tmp/scripts"),
            retain_scripts: false,
            verbose: false,
        }
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[interpreter]
program = "pwsh"

[scripts]
dir = "/var/tmp/hv"
retain = true

[[hosts]]
name = "lab"
computer_name = "hv01.lab.local"
username = "LAB\\admin"
password = "s3cret"
use_ssl = true

[[hosts]]
name = "dev"
computer_name = "hv02"
"#;
        let config: Config = facet_toml::from_str(toml).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.interpreter.program, "pwsh");
        assert_eq!(config.scripts.dir, "/var/tmp/hv");
        assert!(config.scripts.retain);
        assert!(!config.scripts.verbose);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].username, "LAB\\admin");
        assert!(config.hosts[1].username.is_empty());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = facet_toml::from_str("").unwrap();
        assert_eq!(config.interpreter.program, "powershell");
        assert!(config.hosts.is_empty());
        validate_config(&config).unwrap();
    }

    #[test]
    fn session_for_host_with_credentials() {
        let mut h = host("lab");
        h.username = "admin".into();
        h.password = "pw".into();
        h.use_ssl = true;
        let config = Config {
            hosts: vec![h],
            ..Default::default()
        };
        let Session::Remote(remote) = config.session("lab").unwrap() else {
            panic!("expected a remote session");
        };
        assert_eq!(remote.computer_name, "hv01.lab.local");
        assert!(remote.use_ssl);
        assert_eq!(remote.credentials.unwrap().username, "admin");
    }

    #[test]
    fn unknown_host_is_validation_error() {
        let config = Config::default();
        assert!(matches!(
            config.session("missing"),
            Err(HvError::Validation { .. })
        ));
    }

    #[test]
    fn duplicate_host_names_rejected() {
        let config = Config {
            hosts: vec![host("lab"), host("lab")],
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn partial_credentials_rejected() {
        let mut h = host("lab");
        h.username = "admin".into();
        let config = Config {
            hosts: vec![h],
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn invalid_host_names_rejected() {
        for name in ["", "-lab", "a b", "lab/1"] {
            assert!(validate_name(name).is_err(), "expected '{name}' to be rejected");
        }
    }

    #[test]
    fn empty_program_rejected() {
        let mut config = Config::default();
        config.interpreter.program = "  ".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn debug_env_enables_retain_and_verbose() {
        let cfg = base().with_env(env(&[(DEBUG_ENV, "1")]));
        assert!(cfg.retain_scripts);
        assert!(cfg.verbose);
    }

    #[test]
    fn verbose_env_does_not_retain() {
        let cfg = base().with_env(env(&[(VERBOSE_ENV, "yes")]));
        assert!(!cfg.retain_scripts);
        assert!(cfg.verbose);
    }

    #[test]
    fn empty_env_values_are_off() {
        let cfg = base().with_env(env(&[(DEBUG_ENV, ""), (VERBOSE_ENV, "")]));
        assert_eq!(cfg, base());
    }

    #[test]
    fn script_dir_env_overrides() {
        let cfg = base().with_env(env(&[(SCRIPT_DIR_ENV, "/scratch")]));
        assert_eq!(cfg.script_dir, PathBuf::from("/scratch"));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hvremote.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[[hosts]]
name = "lab"
computer_name = "hv01"
"#
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.hosts[0].computer_name, "hv01");
    }

    #[test]
    fn missing_config_file_is_load_error() {
        let err = load_config(Path::new("/nonexistent/hvremote.toml")).unwrap_err();
        assert!(matches!(err, HvError::ConfigLoad { .. }));
    }

    #[test]
    fn malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hvremote.toml");
        std::fs::write(&path, "[[hosts]\nname = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, HvError::ConfigParse { .. }));
    }
}
