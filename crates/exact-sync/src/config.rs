// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Configuration for the EXACT client and the sync operations.
//!
//! Settings are layered with the `config` crate, later sources overriding
//! earlier ones:
//!
//! 1. Built-in defaults.
//! 2. An optional TOML file, by default `config.toml` in the platform config
//!    directory (e.g. `~/.config/exact-sync/config.toml` on Linux).
//! 3. `EXACT_*` environment variables (`EXACT_SERVER`, `EXACT_USERNAME`,
//!    `EXACT_PASSWORD`, `EXACT_VERIFY_SSL`, `EXACT_TIMEOUT`,
//!    `EXACT_MAX_RETRIES`, `EXACT_REQUEST_CEILING`,
//!    `EXACT_DELETE_BATCH_SIZE`, `EXACT_CREATE_BATCH_SIZE`).

use crate::Error;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default number of rows requested per annotation listing. A listing that
/// returns exactly this many rows is treated as truncated.
pub const DEFAULT_REQUEST_CEILING: usize = 50_000;

/// Default number of annotation ids per bulk delete call.
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 20;

/// Default number of annotations per bulk create call.
pub const DEFAULT_CREATE_BATCH_SIZE: usize = 100;

/// Client and sync settings.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Server root URL, e.g. `https://exact.example.org`.
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Verify the server's TLS certificate.
    pub verify_ssl: bool,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Transport retries per request.
    pub max_retries: u32,
    pub request_ceiling: usize,
    pub delete_batch_size: usize,
    pub create_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: "http://localhost:8000".to_owned(),
            username: None,
            password: None,
            verify_ssl: true,
            timeout: 30,
            max_retries: 3,
            request_ceiling: DEFAULT_REQUEST_CEILING,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            create_batch_size: DEFAULT_CREATE_BATCH_SIZE,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, the configuration file and the
    /// environment.
    ///
    /// When `path` is `None` the default file location is used; a missing
    /// default file is not an error, a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("server", defaults.server)?
            .set_default("verify_ssl", defaults.verify_ssl)?
            .set_default("timeout", defaults.timeout)?
            .set_default("max_retries", defaults.max_retries as u64)?
            .set_default("request_ceiling", defaults.request_ceiling as u64)?
            .set_default("delete_batch_size", defaults.delete_batch_size as u64)?
            .set_default("create_batch_size", defaults.create_batch_size as u64)?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => match Self::default_path() {
                Some(path) => builder.add_source(File::from(path).required(false)),
                None => builder,
            },
        };

        let settings: Settings = builder
            .add_source(Environment::with_prefix("EXACT").try_parsing(true))
            .build()?
            .try_deserialize()?;

        log::debug!(
            "Loaded settings for {} (ceiling={}, delete_batch={}, create_batch={})",
            settings.server,
            settings.request_ceiling,
            settings.delete_batch_size,
            settings.create_batch_size
        );

        Ok(settings)
    }

    /// Default configuration file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "exact", "exact-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Limits applied by the sync operations.
///
/// # Examples
///
/// ```rust
/// use exact_sync::SyncOptions;
///
/// let options = SyncOptions::default();
/// assert_eq!(options.request_ceiling(), 50_000);
/// assert_eq!(options.delete_batch_size(), 20);
/// assert_eq!(options.create_batch_size(), 100);
///
/// assert!(SyncOptions::new(10, 0, 5).is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    request_ceiling: usize,
    delete_batch_size: usize,
    create_batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            request_ceiling: DEFAULT_REQUEST_CEILING,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            create_batch_size: DEFAULT_CREATE_BATCH_SIZE,
        }
    }
}

impl SyncOptions {
    /// Creates options, rejecting zero limits.
    pub fn new(
        request_ceiling: usize,
        delete_batch_size: usize,
        create_batch_size: usize,
    ) -> Result<Self, Error> {
        for (name, value) in [
            ("request_ceiling", request_ceiling),
            ("delete_batch_size", delete_batch_size),
            ("create_batch_size", create_batch_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidParameters(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(SyncOptions {
            request_ceiling,
            delete_batch_size,
            create_batch_size,
        })
    }

    pub fn request_ceiling(&self) -> usize {
        self.request_ceiling
    }

    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size
    }

    pub fn create_batch_size(&self) -> usize {
        self.create_batch_size
    }
}

impl TryFrom<&Settings> for SyncOptions {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        SyncOptions::new(
            settings.request_ceiling,
            settings.delete_batch_size,
            settings.create_batch_size,
        )
    }
}
