//! Inspection of the currently deployed `haproxy.cfg`.
use std::{fs, io, path::Path, sync::LazyLock};

use regex::Regex;
use snafu::{ResultExt, Snafu};

static LISTEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*listen\s+(?<name>\S+)\s+(?<host>[^\s:]+):(?<port>\d+)")
        .expect("failed to compile listen regex")
});

static STATS_AUTH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*stats\s+auth\s+[^\s:]+:(?<password>\S+)")
        .expect("failed to compile stats auth regex")
});

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read HAProxy config {path:?}"))]
    ReadConfig {
        source: io::Error,
        path: std::path::PathBuf,
    },
}

/// Reads the deployed configuration, [`None`] if there is none yet.
pub fn load_config(path: &Path) -> Result<Option<String>, Error> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(ReadConfigSnafu { path }),
    }
}

/// Header of a deployed `listen` stanza.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenStanza {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// All `listen` stanzas of `config`, in file order.
pub fn listen_stanzas(config: &str) -> Vec<ListenStanza> {
    LISTEN_REGEX
        .captures_iter(config)
        .filter_map(|captures| {
            Some(ListenStanza {
                name: captures["name"].to_owned(),
                host: captures["host"].to_owned(),
                port: captures["port"].parse().ok()?,
            })
        })
        .collect()
}

/// Ports HAProxy listens on according to `config`.
pub fn service_ports(config: &str) -> Vec<u16> {
    listen_stanzas(config)
        .into_iter()
        .map(|stanza| stanza.port)
        .collect()
}

/// The password of the statistics page, if any.
pub fn monitoring_password(config: &str) -> Option<&str> {
    STATS_AUTH_REGEX
        .captures(config)
        .and_then(|captures| captures.name("password"))
        .map(|password| password.as_str())
}
