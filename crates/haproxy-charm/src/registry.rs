//! Reconciling configured services with the backends announced over relations.
//!
//! A [`ServiceRegistry`] is built from scratch on every hook invocation out of a
//! [`ReconcileContext`] snapshot. Nothing survives the pass, so identical snapshots always yield
//! identical services (in identical order).
use std::collections::BTreeSet;

use charm_helpers::relation::RelationUnit;
use indexmap::IndexMap;
use serde::Serialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    config::CharmConfig,
    service::{self, ServerEntry, ServiceDefinition, merge::Merge, parse_services},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Bind address of services that do not configure one.
pub const DEFAULT_SERVICE_HOST: &str = "0.0.0.0";

/// Offset from the monitoring port at which automatically assigned service ports start.
const AUTO_PORT_OFFSET: u16 = 2;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read services from the charm config"))]
    ConfigServices { source: service::Error },

    #[snafu(display("failed to read services published by '{unit}'"))]
    RelationServices {
        source: service::Error,
        unit: String,
    },

    #[snafu(display("Service '{name}' does not exist."))]
    UnknownService { name: String },

    #[snafu(display("No services configured, exiting."))]
    NoServicesConfigured,

    #[snafu(display("No backend servers, exiting."))]
    NoBackendServers,

    #[snafu(display("no free port left for service '{name}'"))]
    PortsExhausted { name: String },
}

impl Error {
    /// Whether this is the expected outcome of a deployment that has nothing to serve yet,
    /// rather than a failure.
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoServicesConfigured | Self::NoBackendServers)
    }
}

/// A relation unit that did not contribute a server.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum UnitSkipped {
    #[snafu(display("No port in relation data for '{unit}', skipping."))]
    MissingPort { unit: String },

    #[snafu(display("No private-address in relation data for '{unit}', skipping."))]
    MissingPrivateAddress { unit: String },

    #[snafu(display("Invalid port '{port}' in relation data for '{unit}', skipping."))]
    InvalidPort { unit: String, port: String },
}

/// Everything one reconciliation pass needs, fetched once up front.
#[derive(Clone, Debug, Default)]
pub struct ReconcileContext {
    pub config: CharmConfig,

    /// Units of all `reverseproxy` relations, ordered by relation id and unit number.
    pub units: Vec<RelationUnit>,

    /// Services that sit behind another proxy and need `option forwardfor`.
    pub proxy_services: BTreeSet<String>,
}

impl ReconcileContext {
    fn is_proxy(&self, service_name: &str) -> bool {
        self.proxy_services.contains(service_name)
    }
}

/// Identity of a registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    /// Stands in for "no explicit service", resolves to the first service ever registered.
    Default,
    Named(String),
}

/// Services keyed by name, in the order they were first seen.
#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
    entries: IndexMap<ServiceKey, ServiceDefinition>,
}

impl ServiceRegistry {
    /// Merges `service` into the entry of the same name, creating it if needed.
    ///
    /// The existing entry takes precedence, except for servers which are combined. The first
    /// service registered also becomes the [`ServiceKey::Default`].
    ///
    /// Services without a name are ignored; [`parse_services`] never produces them.
    pub fn merge_service(&mut self, service: ServiceDefinition) {
        let Some(name) = service.service_name.clone() else {
            return;
        };
        if self.entries.is_empty() {
            self.entries
                .insert(ServiceKey::Default, ServiceDefinition::named(name.as_str()));
        }
        match self.entries.entry(ServiceKey::Named(name)) {
            indexmap::map::Entry::Occupied(mut entry) => entry.get_mut().merge(&service),
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(service);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&ServiceKey::Named(name.to_owned()))
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.entries.get(&ServiceKey::Named(name.to_owned()))
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut ServiceDefinition> {
        self.entries.get_mut(&ServiceKey::Named(name.to_owned()))
    }

    /// Name of the service units are added to when nothing else matches.
    pub fn default_service_name(&self) -> Option<&str> {
        self.entries
            .get(&ServiceKey::Default)?
            .service_name
            .as_deref()
    }

    fn named_mut(&mut self) -> impl Iterator<Item = (&str, &mut ServiceDefinition)> {
        self.entries.iter_mut().filter_map(|(key, service)| match key {
            ServiceKey::Named(name) => Some((name.as_str(), service)),
            ServiceKey::Default => None,
        })
    }

    fn explicit_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, ServiceKey::Named(_)))
            .filter_map(|(_, service)| service.service_port)
    }

    fn has_servers(&self) -> bool {
        self.entries.values().any(|service| !service.servers.is_empty())
    }

    /// Finds the service a unit's server belongs to.
    ///
    /// In order of precedence: the unit's `service_name` (which must exist), the first of its
    /// `sitenames` naming a service, its application name (also with a `_service` suffix) and
    /// finally the default service.
    pub fn resolve(&self, unit: &RelationUnit) -> Result<String> {
        if let Some(name) = &unit.service_name {
            ensure!(self.contains(name), UnknownServiceSnafu { name });
            return Ok(name.clone());
        }

        if let Some(sitename) = unit.sitenames().find(|sitename| self.contains(sitename)) {
            return Ok(sitename.to_owned());
        }

        if let Some(application) = unit.application() {
            for candidate in [application.to_owned(), format!("{application}_service")] {
                if self.contains(&candidate) {
                    return Ok(candidate);
                }
            }
        }

        let name = self
            .default_service_name()
            .context(NoServicesConfiguredSnafu)?;
        ensure!(self.contains(name), UnknownServiceSnafu { name });
        Ok(name.to_owned())
    }

    /// Drops the default entry, leaving the services to render.
    pub fn into_services(self) -> IndexMap<String, ServiceDefinition> {
        self.entries
            .into_iter()
            .filter_map(|(key, service)| match key {
                ServiceKey::Named(name) => Some((name, service)),
                ServiceKey::Default => None,
            })
            .collect()
    }
}

/// The outcome of a successful reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciledServices {
    /// Services to render, each with a bind address and port.
    pub services: IndexMap<String, ServiceDefinition>,

    /// Units that were ignored, with the reason why.
    pub skipped: Vec<UnitSkipped>,
}

/// What the charm tells website relations about each service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub service_name: String,
    pub service_port: Option<u16>,
}

impl ReconciledServices {
    pub fn summaries(&self) -> Vec<ServiceSummary> {
        self.services
            .iter()
            .map(|(name, service)| ServiceSummary {
                service_name: name.clone(),
                service_port: service.service_port,
            })
            .collect()
    }
}

/// Hands out service ports next to the monitoring port.
struct PortAllocator {
    next: Option<u16>,
    taken: BTreeSet<u16>,
}

impl PortAllocator {
    fn new(monitoring_port: u16, explicit_ports: impl IntoIterator<Item = u16>) -> Self {
        let mut taken = BTreeSet::from_iter(explicit_ports);
        taken.insert(monitoring_port);
        Self {
            next: monitoring_port.checked_add(AUTO_PORT_OFFSET),
            taken,
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        loop {
            let port = self.next?;
            self.next = port.checked_add(1);
            if self.taken.insert(port) {
                return Some(port);
            }
        }
    }

    /// Fills in the bind address and port of `service` if they are missing.
    fn assign(&mut self, name: &str, service: &mut ServiceDefinition) -> Result<()> {
        service
            .service_host
            .get_or_insert_with(|| DEFAULT_SERVICE_HOST.to_owned());
        if service.service_port.is_none() {
            let port = self.allocate().context(PortsExhaustedSnafu { name })?;
            tracing::debug!(service = name, port, "assigned service port");
            service.service_port = Some(port);
        }
        Ok(())
    }
}

/// Builds the server entry a unit contributes to `service`.
fn server_entry(
    unit: &RelationUnit,
    service: &ServiceDefinition,
) -> Result<ServerEntry, UnitSkipped> {
    let unit_name = unit.display_name();
    let raw_port = unit
        .port
        .as_deref()
        .context(MissingPortSnafu { unit: unit_name })?;
    let address = unit
        .private_address
        .as_deref()
        .context(MissingPrivateAddressSnafu { unit: unit_name })?;
    let port = raw_port.trim().parse::<u16>().ok().context(InvalidPortSnafu {
        unit: unit_name,
        port: raw_port,
    })?;

    let name = match (&unit.server_name, &unit.unit) {
        (Some(server_name), _) => server_name.clone(),
        (None, Some(unit)) => format!("{}-{port}", unit.replace('/', "-")),
        (None, None) => format!("{}__{port}", address.replace('.', "_")),
    };
    let options = match &unit.server_options {
        Some(options) => options.split_whitespace().map(str::to_owned).collect(),
        None => service.server_options.clone().unwrap_or_default(),
    };

    Ok(ServerEntry {
        name,
        address: address.to_owned(),
        port,
        options,
    })
}

/// Builds the services to render from the charm config and the related units.
///
/// Units publishing their own `services` are merged in first, in unit order. Every other unit
/// adds one server to the service it [resolves](ServiceRegistry::resolve) to. Services without a
/// bind address or port get one assigned, in the order they are first needed.
pub fn build_registry(context: &ReconcileContext) -> Result<ReconciledServices> {
    let mut registry = ServiceRegistry::default();
    for service in parse_services(&context.config.services, |name| context.is_proxy(name))
        .context(ConfigServicesSnafu)?
    {
        registry.merge_service(service);
    }

    for unit in &context.units {
        let Some(services) = &unit.services else {
            continue;
        };
        let services = parse_services(services, |name| context.is_proxy(name))
            .with_context(|_| RelationServicesSnafu {
                unit: unit.display_name(),
            })?;
        tracing::debug!(
            unit = unit.display_name(),
            services = services.len(),
            "unit publishes its own services"
        );
        for service in services {
            registry.merge_service(service);
        }
    }

    if registry.is_empty() {
        return if context.units.is_empty() {
            NoBackendServersSnafu.fail()
        } else {
            NoServicesConfiguredSnafu.fail()
        };
    }

    let mut ports = PortAllocator::new(
        context.config.monitoring_port,
        registry.explicit_ports().collect::<Vec<_>>(),
    );
    let mut skipped = Vec::new();

    for unit in context.units.iter().filter(|unit| unit.services.is_none()) {
        let target = registry.resolve(unit)?;
        let service = registry
            .get_mut(&target)
            .context(UnknownServiceSnafu { name: &target })?;

        let server = match server_entry(unit, service) {
            Ok(server) => server,
            Err(skip) => {
                tracing::warn!(unit = unit.display_name(), "{skip}");
                skipped.push(skip);
                continue;
            }
        };

        ports.assign(&target, service)?;
        tracing::debug!(service = %target, server = %server.name, "adding backend server");
        service.servers.push(server);
    }

    for (name, service) in registry.named_mut() {
        ports.assign(name, service)?;
    }

    ensure!(registry.has_servers(), NoBackendServersSnafu);

    Ok(ReconciledServices {
        services: registry.into_services(),
        skipped,
    })
}
