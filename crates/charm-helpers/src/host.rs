//! Machine level helpers: packages and system services.
use strum::Display;

use crate::command::{CommandRunner, Error};

/// Action passed to `service <name> <action>`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

/// Installs `packages` non-interactively. Does nothing when no packages are given.
pub fn apt_install(runner: &impl CommandRunner, packages: &[&str]) -> Result<(), Error> {
    if packages.is_empty() {
        return Ok(());
    }
    let args = ["-y", "install", "-qq"]
        .into_iter()
        .chain(packages.iter().copied())
        .map(str::to_owned)
        .collect::<Vec<_>>();
    runner.run("apt-get", &args)
}

pub fn service(runner: &impl CommandRunner, name: &str, action: ServiceAction) -> Result<(), Error> {
    tracing::info!(service = name, %action, "controlling system service");
    runner.run("service", &[name.to_owned(), action.to_string()])
}
