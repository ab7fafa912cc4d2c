//! Hook handlers of the HAProxy charm.
//!
//! Every handler that may change the set of services runs a full reconciliation: the charm
//! config and all `reverseproxy` relations are fetched once into a [`ReconcileContext`], the
//! registry is built and rendered, and the result replaces the deployed `haproxy.cfg`.
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use charm_helpers::{
    command::{self, CommandRunner},
    hookenv::{self, HookEnvironment},
    hooks::{Handler, Hooks},
    host::{self, ServiceAction},
    relation::compare_relation_ids,
};
use snafu::{ResultExt, Snafu};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use crate::{
    cli::PathOptions,
    config::{self, CharmConfig},
    deployed,
    ports::update_service_ports,
    registry::{ReconcileContext, ReconciledServices, build_registry},
    render::render_config,
};

type Result<T, E = Error> = std::result::Result<T, E>;

pub const PACKAGES: &[&str] = &["haproxy"];
pub const SERVICE_NAME: &str = "haproxy";
pub const REVERSEPROXY_RELATION: &str = "reverseproxy";
pub const WEBSITE_RELATION: &str = "website";

const PROXY_FLAG_SUFFIX: &str = ".is.proxy";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to install {packages:?}"))]
    InstallPackages {
        source: command::Error,
        packages: Vec<String>,
    },

    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to read {path:?}"))]
    ReadFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write {path:?}"))]
    WriteFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to list proxied services in {path:?}"))]
    ListProxyServices { source: io::Error, path: PathBuf },

    #[snafu(display("failed to parse the charm config"))]
    ParseConfig { source: config::Error },

    #[snafu(display("failed to inspect the deployed HAProxy config"))]
    InspectDeployedConfig { source: deployed::Error },

    #[snafu(display("failed to update the opened ports"))]
    UpdatePorts { source: hookenv::Error },

    #[snafu(display("failed to {action} {SERVICE_NAME}"))]
    ControlService {
        source: command::Error,
        action: ServiceAction,
    },

    #[snafu(display("failed to look up the private address of this unit"))]
    UnitAddress { source: hookenv::Error },

    #[snafu(display("failed to list {WEBSITE_RELATION} relations"))]
    WebsiteRelations { source: hookenv::Error },

    #[snafu(display("failed to serialize the service list"))]
    SerializeServices { source: serde_yaml::Error },

    #[snafu(display("failed to publish services on relation {relation_id:?}"))]
    PublishServices {
        source: hookenv::Error,
        relation_id: String,
    },
}

/// The hooks this charm handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Hook {
    Install,
    ConfigChanged,
    UpgradeCharm,
    Start,
    Stop,
    ReverseproxyRelationJoined,
    ReverseproxyRelationChanged,
    ReverseproxyRelationDeparted,
    ReverseproxyRelationBroken,
    WebsiteRelationJoined,
    WebsiteRelationChanged,
}

impl Hook {
    fn handler<H: HookEnvironment, R: CommandRunner>(self) -> Handler<Charm<H, R>, Error> {
        match self {
            Self::Install => install::<H, R>,
            Self::ConfigChanged
            | Self::ReverseproxyRelationJoined
            | Self::ReverseproxyRelationChanged
            | Self::ReverseproxyRelationDeparted
            | Self::ReverseproxyRelationBroken => config_changed::<H, R>,
            Self::UpgradeCharm => upgrade_charm::<H, R>,
            Self::Start => start::<H, R>,
            Self::Stop => stop::<H, R>,
            Self::WebsiteRelationJoined | Self::WebsiteRelationChanged => website_changed::<H, R>,
        }
    }
}

/// All hook handlers of the charm, keyed by hook name.
pub fn hooks<H: HookEnvironment, R: CommandRunner>() -> Hooks<Charm<H, R>, Error> {
    Hook::iter().fold(Hooks::new(), |hooks, hook| {
        hooks.register(hook.as_ref(), hook.handler::<H, R>())
    })
}

/// State shared by all hook handlers of one invocation.
pub struct Charm<H, R> {
    pub env: H,
    pub runner: R,
    pub paths: PathOptions,
}

impl<H: HookEnvironment, R: CommandRunner> Charm<H, R> {
    pub fn new(env: H, runner: R, paths: PathOptions) -> Self {
        Self { env, runner, paths }
    }

    /// Logs `message` locally and to the Juju log, where operators look for it.
    fn report(&self, message: &str) {
        tracing::info!(message);
        self.env.log(message);
    }

    /// Reports a failed query of the hook environment, including what the tool itself said.
    fn report_query_failure(&self, error: &hookenv::Error, consequence: &str) {
        let message = full_message(error);
        tracing::warn!(error = %message, "failed to query the hook environment, {consequence}");
        self.env.log(&message);
    }

    /// Fetches everything a reconciliation pass needs, or [`None`] if the charm config is not
    /// available.
    ///
    /// Failing to query the hook environment is not fatal. Without config nothing is deployed,
    /// without relation data the pass proceeds without units.
    pub fn reconcile_context(&self) -> Result<Option<ReconcileContext>> {
        let config = match self.env.config() {
            Ok(config) => CharmConfig::from_map(config).context(ParseConfigSnafu)?,
            Err(error) => {
                self.report_query_failure(&error, "keeping the deployed configuration");
                return Ok(None);
            }
        };
        let units = self
            .env
            .relations_of_type(REVERSEPROXY_RELATION)
            .unwrap_or_else(|error| {
                self.report_query_failure(&error, "assuming no units");
                Vec::new()
            });
        let proxy_services = proxy_services(&self.paths.haproxy_service_dir)?;

        Ok(Some(ReconcileContext {
            config,
            units,
            proxy_services,
        }))
    }

    /// Builds the services to deploy, or [`None`] if there is nothing to deploy.
    ///
    /// Registry errors are reported rather than returned: the deployed configuration stays in
    /// place and the hook succeeds.
    fn reconciled_services(&self, context: &ReconcileContext) -> Option<ReconciledServices> {
        match build_registry(context) {
            Ok(reconciled) => {
                for skipped in &reconciled.skipped {
                    self.env.log(&skipped.to_string());
                }
                Some(reconciled)
            }
            Err(error) => {
                if !error.is_no_op() {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to build services, keeping the deployed configuration"
                    );
                }
                self.report(&error.to_string());
                None
            }
        }
    }

    /// Renders and deploys the configuration, returning the deployed services.
    pub fn reconcile(&self) -> Result<Option<ReconciledServices>> {
        let Some(context) = self.reconcile_context()? else {
            return Ok(None);
        };
        let Some(reconciled) = self.reconciled_services(&context) else {
            return Ok(None);
        };

        let path = &self.paths.haproxy_config;
        let current = deployed::load_config(path).context(InspectDeployedConfigSnafu)?;
        let current = current.as_deref().unwrap_or_default();

        let text = render_config(
            &context.config,
            &reconciled.services,
            deployed::monitoring_password(current),
        );
        if text == current {
            tracing::info!(path = %path.display(), "HAProxy config is up to date");
            return Ok(Some(reconciled));
        }

        write_atomically(path, &text)?;
        tracing::info!(
            path = %path.display(),
            services = reconciled.services.len(),
            "wrote HAProxy config"
        );

        update_service_ports(
            &self.env,
            &deployed::service_ports(current),
            &deployed::service_ports(&text),
        )
        .context(UpdatePortsSnafu)?;
        self.control_service(ServiceAction::Reload)?;

        Ok(Some(reconciled))
    }

    /// Tells every `website` relation where the services can be reached.
    pub fn notify_website(&self, reconciled: &ReconciledServices) -> Result<()> {
        let mut relation_ids = self
            .env
            .relation_ids(WEBSITE_RELATION)
            .context(WebsiteRelationsSnafu)?;
        if relation_ids.is_empty() {
            return Ok(());
        }
        relation_ids.sort_by(|a, b| compare_relation_ids(a, b));

        let summaries = reconciled.summaries();
        let mut settings = BTreeMap::from([
            (
                "hostname".to_owned(),
                self.env
                    .unit_get("private-address")
                    .context(UnitAddressSnafu)?,
            ),
            (
                "all_services".to_owned(),
                serde_yaml::to_string(&summaries).context(SerializeServicesSnafu)?,
            ),
        ]);
        if let Some(port) = summaries.first().and_then(|summary| summary.service_port) {
            settings.insert("port".to_owned(), port.to_string());
        }

        for relation_id in relation_ids {
            tracing::debug!(%relation_id, "publishing services");
            self.env
                .relation_set(Some(&relation_id), &settings)
                .context(PublishServicesSnafu {
                    relation_id: relation_id.as_str(),
                })?;
        }
        Ok(())
    }

    fn control_service(&self, action: ServiceAction) -> Result<()> {
        host::service(&self.runner, SERVICE_NAME, action).context(ControlServiceSnafu { action })
    }
}

/// `error` followed by all of its causes.
fn full_message(error: &dyn std::error::Error) -> String {
    std::iter::successors(Some(error), |error| error.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// Names of the services flagged as sitting behind another proxy.
fn proxy_services(service_dir: &Path) -> Result<BTreeSet<String>> {
    let entries = match fs::read_dir(service_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(err).context(ListProxyServicesSnafu { path: service_dir }),
    };

    let mut services = BTreeSet::new();
    for entry in entries {
        let entry = entry.context(ListProxyServicesSnafu { path: service_dir })?;
        if let Some(service) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_suffix(PROXY_FLAG_SUFFIX))
        {
            services.insert(service.to_owned());
        }
    }
    Ok(services)
}

/// Replaces `path` with `contents`, so that readers never see a partially written file.
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".new");
    let staging = PathBuf::from(staging);

    fs::write(&staging, contents).context(WriteFileSnafu { path: &staging })?;
    fs::rename(&staging, path).context(WriteFileSnafu { path })
}

/// Flips `ENABLED=0` to `ENABLED=1` in the package's init defaults.
fn enable_haproxy(default_file: &Path) -> Result<()> {
    let contents = fs::read_to_string(default_file).context(ReadFileSnafu { path: default_file })?;
    let enabled = contents.replace("ENABLED=0", "ENABLED=1");
    if enabled != contents {
        fs::write(default_file, enabled).context(WriteFileSnafu { path: default_file })?;
    }
    Ok(())
}

pub fn install<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    host::apt_install(&charm.runner, PACKAGES).with_context(|_| InstallPackagesSnafu {
        packages: PACKAGES.iter().map(|package| (*package).to_owned()).collect::<Vec<_>>(),
    })?;

    let service_dir = &charm.paths.haproxy_service_dir;
    fs::create_dir_all(service_dir).context(CreateDirectorySnafu { path: service_dir })?;

    enable_haproxy(&charm.paths.haproxy_default_file)
}

pub fn config_changed<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    if let Some(reconciled) = charm.reconcile()? {
        charm.notify_website(&reconciled)?;
    }
    Ok(())
}

pub fn upgrade_charm<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    install(charm)?;
    config_changed(charm)
}

pub fn start<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    charm.control_service(ServiceAction::Start)
}

pub fn stop<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    charm.control_service(ServiceAction::Stop)?;

    let current =
        deployed::load_config(&charm.paths.haproxy_config).context(InspectDeployedConfigSnafu)?;
    let ports = current
        .as_deref()
        .map(deployed::service_ports)
        .unwrap_or_default();
    update_service_ports(&charm.env, &ports, &[]).context(UpdatePortsSnafu)
}

pub fn website_changed<H: HookEnvironment, R: CommandRunner>(charm: &Charm<H, R>) -> Result<()> {
    let Some(context) = charm.reconcile_context()? else {
        return Ok(());
    };
    match charm.reconciled_services(&context) {
        Some(reconciled) => charm.notify_website(&reconciled),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Hook::Install, "install")]
    #[case(Hook::ConfigChanged, "config-changed")]
    #[case(Hook::UpgradeCharm, "upgrade-charm")]
    #[case(Hook::ReverseproxyRelationDeparted, "reverseproxy-relation-departed")]
    #[case(Hook::WebsiteRelationJoined, "website-relation-joined")]
    fn hook_names(#[case] hook: Hook, #[case] name: &str) {
        assert_eq!(hook.as_ref(), name);
    }

    #[test]
    fn failure_messages_include_the_tool_output() {
        let error = hookenv::Error::HookTool {
            source: command::Error::Failed {
                command: "relation-ids reverseproxy".to_owned(),
                code: Some(1),
                stderr: "some error".to_owned(),
            },
        };

        assert_eq!(
            full_message(&error),
            "failed to call hook tool: \"relation-ids reverseproxy\" failed with exit code \
             Some(1): some error"
        );
    }

    #[test]
    fn enables_haproxy() {
        let dir = tempfile::tempdir().expect("failed to create temporary directory");
        let path = dir.path().join("haproxy");
        fs::write(&path, "foo\nENABLED=0\nbar\n").expect("failed to write defaults");

        enable_haproxy(&path).expect("defaults are writable");

        assert_eq!(
            fs::read_to_string(&path).expect("failed to read defaults"),
            "foo\nENABLED=1\nbar\n"
        );
    }

    #[test]
    fn finds_proxied_services() {
        let dir = tempfile::tempdir().expect("failed to create temporary directory");
        for file in ["foo.is.proxy", "bar.is.proxy", "baz.conf"] {
            fs::write(dir.path().join(file), "").expect("failed to write flag file");
        }

        assert_eq!(
            proxy_services(dir.path()).expect("directory is readable"),
            BTreeSet::from(["bar".to_owned(), "foo".to_owned()])
        );
        assert!(
            proxy_services(&dir.path().join("missing"))
                .expect("missing directory is fine")
                .is_empty()
        );
    }

    #[test]
    fn replaces_files_atomically() {
        let dir = tempfile::tempdir().expect("failed to create temporary directory");
        let path = dir.path().join("haproxy.cfg");
        fs::write(&path, "old").expect("failed to write config");

        write_atomically(&path, "new").expect("config is writable");

        assert_eq!(fs::read_to_string(&path).expect("failed to read config"), "new");
        assert!(!dir.path().join("haproxy.cfg.new").exists());
    }
}
