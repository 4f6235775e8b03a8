use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a [`Client`](crate::Client) call can report.
#[derive(Debug, Error)]
pub enum Error {
    /// The credentials file is missing, unreadable or lacks `user.login` / `user.password`.
    #[error("configuration error ({}): {reason}", display_path(.path))]
    Configuration {
        /// File that was being read, if any.
        path: Option<PathBuf>,
        /// What went wrong.
        reason: String,
    },

    /// WebMUST rejected the credentials or the session token.
    #[error("authentication failed (HTTP {status}) for {url}: {message}")]
    Authentication {
        status: u16,
        url: String,
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("request failed: HTTP {status} for url ({url}){}", message_suffix(.message))]
    Request {
        status: u16,
        url: String,
        message: String,
    },

    /// The response body could not be turned into the expected shape.
    #[error("could not parse response from {url}: {reason}")]
    Parse { url: String, reason: String },

    /// A table could not be written as CSV.
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),

    /// Connection, TLS or timeout failure below the HTTP layer.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A caller-supplied argument was rejected before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The provider is not one of the data providers visible to this user.
    #[error("provider {0} is not a registered data provider")]
    UnknownProvider(String),

    /// The query was valid but matched nothing.
    #[error("not found: {0}")]
    NotFound(String),
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "no file".to_string())
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

impl Error {
    pub(crate) fn configuration(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            path,
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(url: &str, reason: impl Into<String>) -> Self {
        Error::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Authentication { status, .. } | Error::Request { status, .. } => Some(*status),
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// WebMUST error bodies are not uniform; these are the fields seen in the wild.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct MustErrorResponse {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

impl MustErrorResponse {
    fn summary(&self) -> String {
        [
            self.message.as_deref(),
            self.error.as_deref(),
            self.detail.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
    }
}

/// Maps a non-success response onto the error taxonomy.
pub(crate) fn error_from_status(status: StatusCode, url: &str, body: &str) -> Error {
    let raw = || body.trim().chars().take(512).collect::<String>();
    let message = match serde_json::from_str::<MustErrorResponse>(body) {
        Ok(e) => {
            let summary = e.summary();
            if summary.is_empty() {
                raw()
            } else {
                summary
            }
        }
        Err(_) => raw(),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Error::Authentication {
            status: status.as_u16(),
            url: url.to_string(),
            message: if message.is_empty() {
                "check the login and password in your mustlink.yml".to_string()
            } else {
                message
            },
        };
    }

    Error::Request {
        status: status.as_u16(),
        url: url.to_string(),
        message,
    }
}
