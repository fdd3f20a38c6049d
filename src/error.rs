//! Error types.
//!
//! Request-scoped errors (`LookupError`, `RaceError`) never reach the wire:
//! the engine logs them and answers with a synthesized empty reply instead.
//! `ConfigError` is fatal at startup.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single exchange against one resolver.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("encode query: {0}")]
    Encode(String),

    #[error("decode reply: {0}")]
    Decode(String),

    #[error("reply id {got:#06x} does not match query id {want:#06x}")]
    IdMismatch { want: u16, got: u16 },

    #[error("http: {0}")]
    Http(String),

    #[error("socks5: {0}")]
    Socks(String),

    /// DoH endpoint asked to resolve its own hostname.
    #[error("not allowed to query myself")]
    QueryMyself,

    #[error("protocol {0} is unsupported")]
    Unsupported(String),

    #[error("resolver has an empty protocol chain")]
    EmptyChain,
}

/// Failure of a per-bucket race.
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("no servers")]
    NoResolvers,

    #[error("no resolver answered within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    AllFailed(MultiError),

    #[error("lookup abroad dns timeout")]
    FallbackTimeout,
}

/// Startup configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid resolver {spec:?}: {reason}")]
    Resolver { spec: String, reason: String },

    #[error("invalid proxy {0:?}: only socks5://host:port is supported")]
    Proxy(String),

    #[error("{path}:{line}: parse {text:?} as CIDR failed")]
    Cidr {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("invalid listen address {0:?}")]
    Listen(String),

    #[error("build http client: {0}")]
    Http(String),
}

/// Ordered collection of per-resolver failures for one race.
///
/// Appends may come from any resolver task; display joins the entries with `;`.
#[derive(Debug, Default)]
pub struct MultiError {
    errs: Mutex<Vec<String>>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, err: impl ToString) {
        if let Ok(mut errs) = self.errs.lock() {
            errs.push(err.to_string());
        }
    }

    /// Move the collected entries into a new, unshared collection.
    pub fn take(&self) -> Self {
        let errs = self
            .errs
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default();
        Self {
            errs: Mutex::new(errs),
        }
    }

    pub fn len(&self) -> usize {
        self.errs.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(errs) = self.errs.lock() else {
            return Ok(());
        };
        f.write_str(&errs.join(";"))
    }
}

impl std::error::Error for MultiError {}
