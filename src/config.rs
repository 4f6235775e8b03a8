use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name looked up in each candidate configuration directory.
pub const CONFIG_FILE_NAME: &str = "mustlink.yml";

/// Login/password pair used to authenticate against WebMUST.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    login: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

// Shape of mustlink.yml:
//
// user:
//     login: "userone"
//     password: "blah"
#[derive(Debug, Deserialize)]
struct ConfigFile {
    user: Option<UserSection>,
}

#[derive(Debug, Deserialize)]
struct UserSection {
    #[serde(default)]
    login: Option<serde_yaml::Value>,
    #[serde(default)]
    password: Option<serde_yaml::Value>,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Reads credentials from a YAML file with a `user` section holding
    /// `login` and `password`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(Some(path.to_path_buf()), format!("cannot read file: {e}"))
        })?;
        Self::from_yaml_str(&text)
            .map_err(|reason| Error::configuration(Some(path.to_path_buf()), reason))
    }

    /// Same as [`Credentials::from_file`] for a YAML document already in memory.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::from_yaml_str(text).map_err(|reason| Error::configuration(None, reason))
    }

    fn from_yaml_str(text: &str) -> std::result::Result<Self, String> {
        let cfg: ConfigFile =
            serde_yaml::from_str(text).map_err(|e| format!("malformed YAML: {e}"))?;
        let user = cfg.user.ok_or_else(|| "missing `user` section".to_string())?;

        let login = user
            .login
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| "missing `user.login`".to_string())?;
        let password = user
            .password
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| "missing `user.password`".to_string())?;

        Ok(Self { login, password })
    }
}

// Passwords made only of digits are common; accept any YAML scalar as text.
fn scalar_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Candidate locations for `mustlink.yml`, in search order:
/// 1) `$APPDATA`
/// 2) `$XDG_CONFIG_HOME`
/// 3) `<home>/.config`
pub(crate) fn config_candidates<F>(env: F, home: Option<PathBuf>) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let mut v = Vec::new();
    for var in ["APPDATA", "XDG_CONFIG_HOME"] {
        if let Some(dir) = env(var).filter(|d| !d.trim().is_empty()) {
            v.push(PathBuf::from(dir).join(CONFIG_FILE_NAME));
        }
    }
    if let Some(home) = home {
        v.push(home.join(".config").join(CONFIG_FILE_NAME));
    }
    v
}

fn first_existing(candidates: &[PathBuf]) -> Result<PathBuf> {
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }

    if candidates.is_empty() {
        return Err(Error::configuration(
            None,
            "no configuration directory available (set APPDATA or XDG_CONFIG_HOME, or pass a config file)",
        ));
    }

    Err(Error::configuration(
        None,
        format!(
            "{} not found, searched: {}",
            CONFIG_FILE_NAME,
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}

/// Locates the default configuration file using the process environment.
pub fn default_config_path() -> Result<PathBuf> {
    let candidates = config_candidates(|k| std::env::var(k).ok(), dirs::home_dir());
    first_existing(&candidates)
}

/// Loads credentials from `config_file`, or from the default search path when `None`.
pub(crate) fn load_credentials(config_file: Option<&Path>) -> Result<Credentials> {
    let path = match config_file {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    tracing::debug!("reading credentials from {}", path.display());
    Credentials::from_file(&path)
}
