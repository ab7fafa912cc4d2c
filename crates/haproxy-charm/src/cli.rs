use std::path::{Path, PathBuf};

use charm_helpers::hooks::normalize_hook_name;
use clap::{Args, Parser};

/// Configures HAProxy from the charm config and the `reverseproxy` relations.
///
/// Juju runs the binary through symlinks named after the hooks (`hooks/config-changed`), in
/// which case the hook is taken from the name the binary was invoked as.
#[derive(Debug, PartialEq, Eq, Parser)]
#[command(version, long_about = "")]
pub struct Cli {
    /// The hook to run, e.g. `config-changed`.
    pub hook: Option<String>,

    #[command(flatten)]
    pub paths: PathOptions,
}

impl Cli {
    /// The hook to run: the explicit argument, or else the name the binary was invoked as.
    pub fn hook_name(&self, invoked_as: Option<&str>) -> Option<String> {
        self.hook
            .as_deref()
            .or(invoked_as)
            .map(normalize_hook_name)
    }
}

/// Where the charm reads and writes files on the machine.
#[derive(Clone, Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Path Options")]
pub struct PathOptions {
    /// The HAProxy configuration file that gets rendered.
    #[arg(long, env, default_value = "/etc/haproxy/haproxy.cfg")]
    pub haproxy_config: PathBuf,

    /// Directory holding per service flag files, such as `<service>.is.proxy`.
    #[arg(long, env, default_value = "/var/run/haproxy")]
    pub haproxy_service_dir: PathBuf,

    /// Init defaults of the HAProxy package, where the service gets enabled.
    #[arg(long, env, default_value = "/etc/default/haproxy")]
    pub haproxy_default_file: PathBuf,
}

impl PathOptions {
    /// Puts every file below `root`, keeping the default file names.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            haproxy_config: root.join("haproxy.cfg"),
            haproxy_service_dir: root.join("services"),
            haproxy_default_file: root.join("haproxy.default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_system_paths() {
        let cli = Cli::try_parse_from(["haproxy-charm"]).expect("no arguments are required");

        assert_eq!(cli.paths.haproxy_config, PathBuf::from("/etc/haproxy/haproxy.cfg"));
        assert_eq!(cli.paths.haproxy_service_dir, PathBuf::from("/var/run/haproxy"));
        assert_eq!(cli.paths.haproxy_default_file, PathBuf::from("/etc/default/haproxy"));
    }

    #[rstest]
    #[case(&["haproxy-charm", "config_changed"], Some("hooks/install"), Some("config-changed"))]
    #[case(&["install"], Some("/var/lib/juju/charm/hooks/install"), Some("install"))]
    #[case(&["haproxy-charm"], None, None)]
    fn resolves_hook_name(
        #[case] args: &[&str],
        #[case] invoked_as: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let cli = Cli::try_parse_from(args.iter().copied()).expect("arguments are valid");

        assert_eq!(cli.hook_name(invoked_as).as_deref(), expected);
    }
}
