//! The charm configuration (`config.yaml` options), as returned by `config-get`.
use std::{fmt::Display, str::FromStr};

use charm_helpers::hookenv::ConfigMap;
use serde::{Deserialize, Deserializer, de::Error as _};
use snafu::{ResultExt, Snafu};

/// Documented default of `monitoring_password`, meaning "generate one for me".
pub const PLACEHOLDER_PASSWORD: &str = "changeme";

const DEFAULT_SERVICES: &str = r#"- service_name: haproxy_service
  service_host: "0.0.0.0"
  service_port: 80
  service_options: [balance leastconn]
  server_options: maxconn 100
"#;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse charm config"))]
    ParseConfig { source: serde_json::Error },
}

/// Typed charm configuration.
///
/// Unset options fall back to the defaults declared in `config.yaml`. Juju reports numbers and
/// booleans as JSON numbers and booleans, but values set through `juju config` as strings are
/// accepted too.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CharmConfig {
    /// Comma separated `log` lines of the `global` section.
    pub global_log: String,
    #[serde(deserialize_with = "lenient")]
    pub global_maxconn: u32,
    pub global_user: String,
    pub global_group: String,
    #[serde(deserialize_with = "lenient")]
    pub global_debug: bool,
    #[serde(deserialize_with = "lenient")]
    pub global_quiet: bool,
    #[serde(deserialize_with = "lenient")]
    pub global_spread_checks: u32,

    pub default_log: String,
    pub default_mode: String,
    /// Comma separated `option` lines of the `defaults` section.
    pub default_options: String,
    #[serde(deserialize_with = "lenient")]
    pub default_retries: u32,
    /// Comma separated `timeout` lines of the `defaults` section.
    pub default_timeouts: String,

    #[serde(deserialize_with = "lenient")]
    pub enable_monitoring: bool,
    #[serde(deserialize_with = "lenient")]
    pub monitoring_port: u16,
    pub monitoring_allowed_cidr: String,
    pub monitoring_username: String,
    pub monitoring_password: String,
    #[serde(deserialize_with = "lenient")]
    pub monitoring_stats_refresh: u32,

    /// YAML list of statically defined services.
    pub services: String,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            global_log: "127.0.0.1 local0, 127.0.0.1 local1 notice".to_owned(),
            global_maxconn: 4096,
            global_user: "haproxy".to_owned(),
            global_group: "haproxy".to_owned(),
            global_debug: false,
            global_quiet: false,
            global_spread_checks: 0,
            default_log: "global".to_owned(),
            default_mode: "http".to_owned(),
            default_options: "httplog, dontlognull".to_owned(),
            default_retries: 3,
            default_timeouts: "queue 1000, connect 1000, client 1000, server 1000".to_owned(),
            enable_monitoring: false,
            monitoring_port: 10000,
            monitoring_allowed_cidr: "127.0.0.1/32".to_owned(),
            monitoring_username: "haproxy".to_owned(),
            monitoring_password: PLACEHOLDER_PASSWORD.to_owned(),
            monitoring_stats_refresh: 3,
            services: DEFAULT_SERVICES.to_owned(),
        }
    }
}

impl CharmConfig {
    /// Converts the raw `config-get` output. Options reported as `null` are treated as unset.
    pub fn from_map(mut map: ConfigMap) -> Result<Self, Error> {
        map.retain(|_, value| !value.is_null());
        serde_json::from_value(serde_json::Value::Object(map)).context(ParseConfigSnafu)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueOrString<T> {
    Value(T),
    String(String),
}

/// Accepts either the value itself or its string representation.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match ValueOrString::<T>::deserialize(deserializer)? {
        ValueOrString::Value(value) => Ok(value),
        ValueOrString::String(string) => string.trim().parse().map_err(D::Error::custom),
    }
}
