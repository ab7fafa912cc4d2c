//! Access to the Juju hook environment.
//!
//! [`HookEnvironment`] is the interface charms consume. [`JujuHookTools`] implements it by
//! calling the hook tools (`config-get`, `relation-get`, ...) that Juju puts on the `PATH` of a
//! running hook.
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

use crate::{
    command::{self, CommandRunner, SystemCommandRunner},
    relation::{RelationUnit, compare_relation_ids, compare_units},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// The raw charm configuration as returned by `config-get`.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to call hook tool"))]
    HookTool { source: command::Error },

    #[snafu(display("failed to parse JSON output of {tool:?}"))]
    ParseOutput {
        source: serde_json::Error,
        tool: String,
    },
}

/// Transport protocol of a port opened on the unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Everything a charm needs from the orchestration platform.
pub trait HookEnvironment {
    /// The current charm configuration.
    fn config(&self) -> Result<ConfigMap>;

    /// Ids of all established relations with the given name.
    fn relation_ids(&self, relation_name: &str) -> Result<Vec<String>>;

    /// Remote units participating in the given relation.
    fn relation_list(&self, relation_id: &str) -> Result<Vec<String>>;

    /// Settings the remote `unit` published on the given relation.
    fn relation_get(&self, relation_id: &str, unit: &str) -> Result<BTreeMap<String, String>>;

    /// Publishes settings on a relation, the current one if `relation_id` is [`None`].
    fn relation_set(
        &self,
        relation_id: Option<&str>,
        settings: &BTreeMap<String, String>,
    ) -> Result<()>;

    fn open_port(&self, port: u16, protocol: Protocol) -> Result<()>;

    fn close_port(&self, port: u16, protocol: Protocol) -> Result<()>;

    /// Unit level information such as `private-address`.
    fn unit_get(&self, key: &str) -> Result<String>;

    /// Fire-and-forget message to the Juju log.
    fn log(&self, message: &str);

    /// All remote units on all relations called `relation_name`.
    ///
    /// Relations are returned in ascending id order and units in ascending unit number, so that
    /// callers folding over the result see the same order on every invocation.
    fn relations_of_type(&self, relation_name: &str) -> Result<Vec<RelationUnit>> {
        let mut relation_ids = self.relation_ids(relation_name)?;
        relation_ids.sort_by(|a, b| compare_relation_ids(a, b));

        let mut units = Vec::new();
        for relation_id in relation_ids {
            let mut unit_names = self.relation_list(&relation_id)?;
            unit_names.sort_by(|a, b| compare_units(a, b));
            for unit_name in unit_names {
                let settings = self.relation_get(&relation_id, &unit_name)?;
                units.push(RelationUnit::from_settings(
                    relation_id.as_str(),
                    unit_name,
                    settings,
                ));
            }
        }
        Ok(units)
    }
}

/// [`HookEnvironment`] backed by the Juju hook tools.
#[derive(Clone, Debug, Default)]
pub struct JujuHookTools<R = SystemCommandRunner> {
    runner: R,
}

impl<R: CommandRunner> JujuHookTools<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn call_json<T: DeserializeOwned + Default>(&self, tool: &str, args: &[String]) -> Result<T> {
        let stdout = self.runner.output(tool, args).context(HookToolSnafu)?;
        // Tools print `null` (or nothing) when there is no data.
        let value: Option<T> = if stdout.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&stdout).context(ParseOutputSnafu { tool })?
        };
        Ok(value.unwrap_or_default())
    }
}

fn args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.into_iter().map(str::to_owned).collect()
}

impl<R: CommandRunner> HookEnvironment for JujuHookTools<R> {
    fn config(&self) -> Result<ConfigMap> {
        self.call_json("config-get", &args(["--format=json"]))
    }

    fn relation_ids(&self, relation_name: &str) -> Result<Vec<String>> {
        self.call_json("relation-ids", &args(["--format=json", relation_name]))
    }

    fn relation_list(&self, relation_id: &str) -> Result<Vec<String>> {
        self.call_json("relation-list", &args(["--format=json", "-r", relation_id]))
    }

    fn relation_get(&self, relation_id: &str, unit: &str) -> Result<BTreeMap<String, String>> {
        self.call_json(
            "relation-get",
            &args(["--format=json", "-r", relation_id, "-", unit]),
        )
    }

    fn relation_set(
        &self,
        relation_id: Option<&str>,
        settings: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut arguments = Vec::new();
        if let Some(relation_id) = relation_id {
            arguments.extend(args(["-r", relation_id]));
        }
        arguments.extend(settings.iter().map(|(key, value)| format!("{key}={value}")));
        self.runner
            .run("relation-set", &arguments)
            .context(HookToolSnafu)
    }

    fn open_port(&self, port: u16, protocol: Protocol) -> Result<()> {
        self.runner
            .run("open-port", &[format!("{port}/{protocol}")])
            .context(HookToolSnafu)
    }

    fn close_port(&self, port: u16, protocol: Protocol) -> Result<()> {
        self.runner
            .run("close-port", &[format!("{port}/{protocol}")])
            .context(HookToolSnafu)
    }

    fn unit_get(&self, key: &str) -> Result<String> {
        self.runner
            .output("unit-get", &args([key]))
            .map(|value| value.trim().to_owned())
            .context(HookToolSnafu)
    }

    fn log(&self, message: &str) {
        if let Err(error) = self.runner.run("juju-log", &args([message])) {
            tracing::warn!(%error, message, "failed to forward message to juju-log");
        }
    }
}
