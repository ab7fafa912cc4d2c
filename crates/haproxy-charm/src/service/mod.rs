//! Service definitions: one HAProxy `listen` stanza each.
//!
//! Definitions are read from the `services` charm option and from the `services` setting of
//! related units. Both are YAML lists like:
//!
//! ```yaml
//! - service_name: haproxy_test
//!   service_host: "0.0.0.0"
//!   service_port: 88
//!   service_options: [balance leastconn]
//!   server_options: maxconn 25
//!   servers:
//!     - [web-0, 10.0.1.2, 8080, maxconn 25]
//! ```
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, de::Error as _};
use snafu::{OptionExt, ResultExt, Snafu};

use self::merge::Merge;

pub mod merge;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Option appended to services that sit behind another proxy.
pub const FORWARD_FOR_OPTION: &str = "option forwardfor";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse services YAML"))]
    ParseServices { source: serde_yaml::Error },

    #[snafu(display("service definition #{index} has no service_name"))]
    MissingServiceName { index: usize },
}

/// One backend server: `server <name> <address>:<port> <options...>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEntry {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub options: Vec<String>,
}

impl ServerEntry {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// Servers are published as `[name, address, port, options]` sequences, where the port may be
/// quoted and the options may be a single whitespace separated string.
impl<'de> Deserialize<'de> for ServerEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, address, port, options): (String, String, PortValue, Option<StringOrList>) =
            Deserialize::deserialize(deserializer)?;
        Ok(Self {
            name,
            address,
            port: port.into_port().map_err(D::Error::custom)?,
            options: options.map(StringOrList::into_words).unwrap_or_default(),
        })
    }
}

/// Ordered list of [`ServerEntry`]s without exact duplicates.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "Vec<ServerEntry>")]
pub struct ServerList(Vec<ServerEntry>);

impl ServerList {
    /// Appends `server` unless an identical entry is already present.
    ///
    /// Returns whether the entry was added.
    pub fn push(&mut self, server: ServerEntry) -> bool {
        if self.0.contains(&server) {
            return false;
        }
        self.0.push(server);
        true
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerEntry> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ServerEntry> for ServerList {
    fn from_iter<I: IntoIterator<Item = ServerEntry>>(iter: I) -> Self {
        let mut servers = Self::default();
        for server in iter {
            servers.push(server);
        }
        servers
    }
}

impl From<Vec<ServerEntry>> for ServerList {
    fn from(servers: Vec<ServerEntry>) -> Self {
        servers.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a ServerList {
    type IntoIter = std::slice::Iter<'a, ServerEntry>;
    type Item = &'a ServerEntry;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Concatenates both lists, dropping entries of `defaults` that are already present.
impl Merge for ServerList {
    fn merge(&mut self, defaults: &Self) {
        for server in defaults {
            self.push(server.clone());
        }
    }
}

/// Description of one `listen` stanza.
///
/// Every field is optional so that partial definitions from different sources can be
/// [merged](Merge). Keys this charm does not know about end up in [`Self::extra`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub service_host: Option<String>,

    #[serde(default, deserialize_with = "deserialize_port")]
    pub service_port: Option<u16>,

    /// Raw option lines, accepted as a list or a comma separated string.
    #[serde(default, deserialize_with = "deserialize_comma_separated")]
    pub service_options: Option<Vec<String>>,

    /// Default options for servers, accepted as a list or a whitespace separated string.
    #[serde(default, deserialize_with = "deserialize_whitespace_separated")]
    pub server_options: Option<Vec<String>>,

    #[serde(default)]
    pub servers: ServerList,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceDefinition {
    /// A definition carrying nothing but a name.
    pub fn named(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// Makes sure HAProxy passes the client address on, for services fronting another proxy.
    fn ensure_forward_for(&mut self) {
        let options = self.service_options.get_or_insert_with(Vec::new);
        if !options.iter().any(|option| option == FORWARD_FOR_OPTION) {
            options.push(FORWARD_FOR_OPTION.to_owned());
        }
    }
}

impl Merge for ServiceDefinition {
    fn merge(&mut self, defaults: &Self) {
        self.service_name.merge(&defaults.service_name);
        self.service_host.merge(&defaults.service_host);
        self.service_port.merge(&defaults.service_port);
        self.service_options.merge(&defaults.service_options);
        self.server_options.merge(&defaults.server_options);
        self.servers.merge(&defaults.servers);
        Merge::merge(&mut self.extra, &defaults.extra);
    }
}

/// Parses a YAML list of service definitions.
///
/// Every definition needs a `service_name`. Services for which `is_proxy` returns `true` get
/// [`FORWARD_FOR_OPTION`] added to their options. An empty document yields no services.
pub fn parse_services(
    yaml: &str,
    is_proxy: impl Fn(&str) -> bool,
) -> Result<Vec<ServiceDefinition>> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let services: Option<Vec<ServiceDefinition>> =
        serde_yaml::from_str(yaml).context(ParseServicesSnafu)?;
    let mut services = services.unwrap_or_default();

    for (index, service) in services.iter_mut().enumerate() {
        let name = service
            .service_name
            .as_deref()
            .context(MissingServiceNameSnafu { index })?;
        if is_proxy(name) {
            service.ensure_forward_for();
        }
    }
    Ok(services)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn into_port(self) -> Result<u16, String> {
        match self {
            Self::Number(port) => Ok(port),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| format!("invalid port {text:?}")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_words(self) -> Vec<String> {
        match self {
            Self::String(string) => string.split_whitespace().map(str::to_owned).collect(),
            Self::List(list) => list,
        }
    }

    fn into_comma_separated(self) -> Vec<String> {
        match self {
            Self::String(string) => comma_split(&string),
            Self::List(list) => list,
        }
    }
}

/// Splits a comma separated option value, trimming each item and dropping empty ones.
pub fn comma_split(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    Option::<PortValue>::deserialize(deserializer)?
        .map(PortValue::into_port)
        .transpose()
        .map_err(D::Error::custom)
}

fn deserialize_comma_separated<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<StringOrList>::deserialize(deserializer)?.map(StringOrList::into_comma_separated))
}

fn deserialize_whitespace_separated<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<StringOrList>::deserialize(deserializer)?.map(StringOrList::into_words))
}
