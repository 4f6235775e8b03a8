//! A small blocking Rust client for the WebMUST telemetry API (MUSTlink).
//!
//! The client reads a login and password from a YAML file, logs in to a
//! WebMUST instance and exposes one method per endpoint. Query results come
//! back as [`Table`]s: named columns of typed [`Cell`]s.
//!
//! ## Quick start
//! - Put your credentials in `mustlink.yml`, either passed explicitly or
//!   found in `$APPDATA`, `$XDG_CONFIG_HOME` or `~/.config` (first match wins):
//!
//! ```yaml
//! user:
//!     login: "userone"
//!     password: "blah"
//! ```
//!
//! - Build a [`Client`] and query parameters of a data provider.
//!
//! ```no_run
//! use mustlink::{Client, DataOptions};
//!
//! fn main() -> mustlink::Result<()> {
//!     let client = Client::builder().provider("BEPICRUISE").build()?;
//!     let table = client.data(None, &["NCADAF41"], &DataOptions::default())?;
//!     println!("{}", table.to_csv()?);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod error;
mod parameters;
mod table;
mod tables;
mod util;

pub use client::{Client, ClientBuilder, DEFAULT_URL, UserInfo};
pub use config::{CONFIG_FILE_NAME, Credentials, default_config_path};
pub use error::{Error, Result};
pub use parameters::{DATE_COLUMN, DataOptions, InfoMode, Limits, ParameterInfo, SearchBy};
pub use table::{Cell, Table};
pub use tables::{Representation, TableDataOptions, TableMode};
