use charm_helpers::{command::SystemCommandRunner, hookenv::JujuHookTools, logging};
use clap::Parser;
use haproxy_charm::{
    charm::{self, Charm},
    cli::Cli,
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "haproxy-charm";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("hook {hook:?} failed"))]
    Hook { source: charm::Error, hook: String },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    logging::initialize_logging("HAPROXY_CHARM_LOG", APP_NAME);

    let cli = Cli::parse();
    let invoked_as = std::env::args().next();
    let Some(hook) = cli.hook_name(invoked_as.as_deref()) else {
        tracing::warn!("no hook given, nothing to do");
        return Ok(());
    };

    let charm = Charm::new(
        JujuHookTools::<SystemCommandRunner>::default(),
        SystemCommandRunner,
        cli.paths,
    );
    match charm::hooks().execute(&hook, &charm) {
        Some(result) => result.context(HookSnafu { hook }),
        None => {
            tracing::info!(%hook, "no handler registered for hook, ignoring");
            Ok(())
        }
    }
}
