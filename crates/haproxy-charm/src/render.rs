//! Rendering of `haproxy.cfg`.
//!
//! Every function here is pure (apart from [`pwgen`]) and keeps the order of its input, so that
//! rendering the same services twice yields the same text.
use indexmap::IndexMap;
use rand::{Rng, distr::Alphanumeric};

use crate::{
    config::{CharmConfig, PLACEHOLDER_PASSWORD},
    registry::DEFAULT_SERVICE_HOST,
    service::{ServiceDefinition, comma_split},
};

/// Name of the statistics stanza.
pub const MONITORING_SERVICE_NAME: &str = "haproxy_monitoring";

pub const DEFAULT_PASSWORD_LENGTH: usize = 20;

const INDENT: &str = "    ";

/// Builds a block of `header` followed by one indented line per entry of `lines`.
fn block<'a>(header: &str, lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut block = header.to_owned();
    for line in lines {
        block.push('\n');
        block.push_str(INDENT);
        block.push_str(line);
    }
    block
}

/// Renders one `listen` stanza.
///
/// Returns [`None`] if the service lacks a name, bind address or port.
pub fn render_listen(service: &ServiceDefinition) -> Option<String> {
    let name = service.service_name.as_deref()?;
    let host = service.service_host.as_deref()?;
    let port = service.service_port?;

    let servers = service
        .servers
        .iter()
        .map(|server| {
            let mut line = format!("server {} {}:{}", server.name, server.address, server.port);
            for option in &server.options {
                line.push(' ');
                line.push_str(option);
            }
            line
        })
        .collect::<Vec<_>>();

    Some(block(
        &format!("listen {name} {host}:{port}"),
        service
            .service_options
            .iter()
            .flatten()
            .map(String::as_str)
            .chain(servers.iter().map(String::as_str)),
    ))
}

/// Generates a random alphanumeric password.
pub fn pwgen(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Password protecting the statistics page.
///
/// A configured password wins. Otherwise the password already deployed is kept, so that it stays
/// stable across hook invocations, and only if there is none a new one is generated.
pub fn monitoring_password(config: &CharmConfig, deployed_password: Option<&str>) -> String {
    if config.monitoring_password != PLACEHOLDER_PASSWORD {
        return config.monitoring_password.clone();
    }
    match deployed_password {
        Some(password) if password != PLACEHOLDER_PASSWORD => password.to_owned(),
        _ => {
            tracing::info!("generating a new monitoring password");
            pwgen(DEFAULT_PASSWORD_LENGTH)
        }
    }
}

/// Renders the statistics stanza, if monitoring is enabled.
pub fn render_monitoring(config: &CharmConfig, deployed_password: Option<&str>) -> Option<String> {
    if !config.enable_monitoring {
        return None;
    }
    let password = monitoring_password(config, deployed_password);
    render_listen(&ServiceDefinition {
        service_host: Some(DEFAULT_SERVICE_HOST.to_owned()),
        service_port: Some(config.monitoring_port),
        service_options: Some(vec![
            "mode http".to_owned(),
            format!("acl allowed_cidr src {}", config.monitoring_allowed_cidr),
            "block unless allowed_cidr".to_owned(),
            "stats enable".to_owned(),
            "stats uri /".to_owned(),
            r"stats realm Haproxy\ Statistics".to_owned(),
            format!("stats auth {}:{password}", config.monitoring_username),
            format!("stats refresh {}", config.monitoring_stats_refresh),
        ]),
        ..ServiceDefinition::named(MONITORING_SERVICE_NAME)
    })
}

pub fn render_globals(config: &CharmConfig) -> String {
    let mut lines = comma_split(&config.global_log)
        .into_iter()
        .map(|log| format!("log {log}"))
        .collect::<Vec<_>>();
    lines.push(format!("maxconn {}", config.global_maxconn));
    lines.push(format!("user {}", config.global_user));
    lines.push(format!("group {}", config.global_group));
    if config.global_debug {
        lines.push("debug".to_owned());
    }
    if config.global_quiet {
        lines.push("quiet".to_owned());
    }
    lines.push(format!("spread-checks {}", config.global_spread_checks));

    block("global", lines.iter().map(String::as_str))
}

pub fn render_defaults(config: &CharmConfig) -> String {
    let mut lines = vec![
        format!("log {}", config.default_log),
        format!("mode {}", config.default_mode),
    ];
    lines.extend(
        comma_split(&config.default_options)
            .into_iter()
            .map(|option| format!("option {option}")),
    );
    lines.push(format!("retries {}", config.default_retries));
    lines.extend(
        comma_split(&config.default_timeouts)
            .into_iter()
            .map(|timeout| format!("timeout {timeout}")),
    );

    block("defaults", lines.iter().map(String::as_str))
}

/// Renders the complete configuration file.
///
/// Blocks are separated by an empty line: `global`, `defaults`, the statistics stanza (if
/// enabled) and then one `listen` stanza per service, in the order given.
pub fn render_config(
    config: &CharmConfig,
    services: &IndexMap<String, ServiceDefinition>,
    deployed_password: Option<&str>,
) -> String {
    let mut blocks = vec![render_globals(config), render_defaults(config)];
    blocks.extend(render_monitoring(config, deployed_password));
    for (name, service) in services {
        match render_listen(service) {
            Some(stanza) => blocks.push(stanza),
            None => tracing::warn!(service = %name, "service is incomplete, not rendering it"),
        }
    }

    let mut text = blocks.join("\n\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use charm_helpers::relation::RelationUnit;
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::{
        registry::{ReconcileContext, build_registry},
        service::ServerEntry,
    };

    fn monitoring_config(password: &str) -> CharmConfig {
        CharmConfig {
            enable_monitoring: true,
            monitoring_allowed_cidr: "some-cidr".to_owned(),
            monitoring_password: password.to_owned(),
            monitoring_username: "some-user".to_owned(),
            monitoring_stats_refresh: 123,
            monitoring_port: 1234,
            ..CharmConfig::default()
        }
    }

    #[test]
    fn creates_a_listen_stanza() {
        let service = ServiceDefinition {
            service_host: Some("10.11.12.13".to_owned()),
            service_port: Some(1234),
            service_options: Some(vec!["foo".to_owned(), "bar".to_owned()]),
            servers: vec![
                ServerEntry::new("name-1", "ip-1", 1, ["foo1", "bar1"]),
                ServerEntry::new("name-2", "ip-2", 2, ["foo2", "bar2"]),
            ]
            .into(),
            ..ServiceDefinition::named("some-name")
        };

        assert_eq!(
            render_listen(&service).as_deref(),
            Some(indoc! {"
                listen some-name 10.11.12.13:1234
                    foo
                    bar
                    server name-1 ip-1:1 foo1 bar1
                    server name-2 ip-2:2 foo2 bar2"})
        );
    }

    #[test]
    fn server_without_options_has_no_trailing_space() {
        let service = ServiceDefinition {
            service_host: Some("0.0.0.0".to_owned()),
            service_port: Some(80),
            servers: vec![ServerEntry::new("web", "10.0.0.1", 8080, Vec::<String>::new())].into(),
            ..ServiceDefinition::named("web")
        };

        assert_eq!(
            render_listen(&service).as_deref(),
            Some("listen web 0.0.0.0:80\n    server web 10.0.0.1:8080")
        );
    }

    #[rstest]
    #[case::no_name(ServiceDefinition {
        service_name: None,
        ..ServiceDefinition::default()
    })]
    #[case::no_host(ServiceDefinition {
        service_port: Some(80),
        ..ServiceDefinition::named("foo")
    })]
    #[case::no_port(ServiceDefinition {
        service_host: Some("0.0.0.0".to_owned()),
        ..ServiceDefinition::named("foo")
    })]
    fn incomplete_services_are_not_rendered(#[case] service: ServiceDefinition) {
        assert_eq!(render_listen(&service), None);
    }

    #[test]
    fn renders_anonymous_unit_with_service_server_options() {
        let context = ReconcileContext {
            config: CharmConfig {
                services: indoc! {"
                    - service_name: haproxy_test
                      service_host: 0.0.0.0
                      service_port: 88
                      service_options: [balance leastconn]
                      server_options: maxconn 25
                "}
                .to_owned(),
                ..CharmConfig::default()
            },
            units: vec![RelationUnit {
                private_address: Some("10.0.1.2".to_owned()),
                port: Some("10000".to_owned()),
                ..RelationUnit::default()
            }],
            ..ReconcileContext::default()
        };

        let reconciled = build_registry(&context).expect("unit is valid");

        assert_eq!(
            render_listen(&reconciled.services["haproxy_test"]).as_deref(),
            Some(indoc! {"
                listen haproxy_test 0.0.0.0:88
                    balance leastconn
                    server 10_0_1_2__10000 10.0.1.2:10000 maxconn 25"})
        );
    }

    #[test]
    fn creates_haproxy_globals() {
        let config = CharmConfig {
            global_log: "foo-log, bar-log".to_owned(),
            global_maxconn: 123,
            global_user: "foo-user".to_owned(),
            global_group: "foo-group".to_owned(),
            global_spread_checks: 234,
            ..CharmConfig::default()
        };

        assert_eq!(
            render_globals(&config),
            indoc! {"
                global
                    log foo-log
                    log bar-log
                    maxconn 123
                    user foo-user
                    group foo-group
                    spread-checks 234"}
        );
    }

    #[test]
    fn creates_haproxy_globals_quietly_with_debug() {
        let config = CharmConfig {
            global_log: "foo-log, bar-log".to_owned(),
            global_maxconn: 123,
            global_user: "foo-user".to_owned(),
            global_group: "foo-group".to_owned(),
            global_spread_checks: 234,
            global_debug: true,
            global_quiet: true,
            ..CharmConfig::default()
        };

        assert_eq!(
            render_globals(&config),
            indoc! {"
                global
                    log foo-log
                    log bar-log
                    maxconn 123
                    user foo-user
                    group foo-group
                    debug
                    quiet
                    spread-checks 234"}
        );
    }

    #[test]
    fn creates_haproxy_defaults() {
        let config = CharmConfig {
            default_options: "foo-option, bar-option".to_owned(),
            default_timeouts: "234, 456".to_owned(),
            default_log: "foo-log".to_owned(),
            default_mode: "foo-mode".to_owned(),
            default_retries: 321,
            ..CharmConfig::default()
        };

        assert_eq!(
            render_defaults(&config),
            indoc! {"
                defaults
                    log foo-log
                    mode foo-mode
                    option foo-option
                    option bar-option
                    retries 321
                    timeout 234
                    timeout 456"}
        );
    }

    #[test]
    fn creates_a_monitoring_stanza() {
        assert_eq!(
            render_monitoring(&monitoring_config("some-pass"), Some("deployed-pass")).as_deref(),
            Some(indoc! {r"
                listen haproxy_monitoring 0.0.0.0:1234
                    mode http
                    acl allowed_cidr src some-cidr
                    block unless allowed_cidr
                    stats enable
                    stats uri /
                    stats realm Haproxy\ Statistics
                    stats auth some-user:some-pass
                    stats refresh 123"})
        );
    }

    #[test]
    fn no_monitoring_stanza_if_disabled() {
        let config = CharmConfig {
            enable_monitoring: false,
            ..monitoring_config("some-pass")
        };

        assert_eq!(render_monitoring(&config, None), None);
    }

    #[test]
    fn keeps_deployed_monitoring_password() {
        assert_eq!(
            monitoring_password(&monitoring_config("changeme"), Some("some-monitoring-pass")),
            "some-monitoring-pass"
        );
    }

    #[rstest]
    #[case(None)]
    #[case(Some("changeme"))]
    fn generates_new_monitoring_password(#[case] deployed: Option<&str>) {
        let password = monitoring_password(&monitoring_config("changeme"), deployed);

        assert_eq!(password.len(), DEFAULT_PASSWORD_LENGTH);
        assert_ne!(password, "changeme");
    }

    #[rstest]
    #[case(DEFAULT_PASSWORD_LENGTH)]
    #[case(15)]
    fn generates_passwords_of_given_length(#[case] length: usize) {
        let password = pwgen(length);

        assert_eq!(password.len(), length);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generates_a_different_password_each_time() {
        assert_ne!(pwgen(DEFAULT_PASSWORD_LENGTH), pwgen(DEFAULT_PASSWORD_LENGTH));
    }

    #[test]
    fn renders_complete_config() {
        let config = CharmConfig {
            global_log: "127.0.0.1 local0".to_owned(),
            default_options: "httplog".to_owned(),
            default_timeouts: "connect 1000".to_owned(),
            ..monitoring_config("secret")
        };
        let services = IndexMap::from([(
            "web".to_owned(),
            ServiceDefinition {
                service_host: Some("0.0.0.0".to_owned()),
                service_port: Some(80),
                servers: vec![ServerEntry::new("web-0", "10.0.0.1", 8080, ["check"])].into(),
                ..ServiceDefinition::named("web")
            },
        )]);

        assert_eq!(
            render_config(&config, &services, None),
            indoc! {r"
                global
                    log 127.0.0.1 local0
                    maxconn 4096
                    user haproxy
                    group haproxy
                    spread-checks 0

                defaults
                    log global
                    mode http
                    option httplog
                    retries 3
                    timeout connect 1000

                listen haproxy_monitoring 0.0.0.0:1234
                    mode http
                    acl allowed_cidr src some-cidr
                    block unless allowed_cidr
                    stats enable
                    stats uri /
                    stats realm Haproxy\ Statistics
                    stats auth some-user:secret
                    stats refresh 123

                listen web 0.0.0.0:80
                    server web-0 10.0.0.1:8080 check
            "}
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let context = ReconcileContext {
            config: CharmConfig {
                services: "- {service_name: first}\n- {service_name: second}".to_owned(),
                ..monitoring_config("changeme")
            },
            units: vec![
                RelationUnit::from_settings(
                    "reverseproxy:1",
                    "foo/0",
                    [
                        ("port".to_owned(), "80".to_owned()),
                        ("private-address".to_owned(), "10.0.0.1".to_owned()),
                        ("service_name".to_owned(), "second".to_owned()),
                    ]
                    .into(),
                ),
                RelationUnit::from_settings(
                    "reverseproxy:1",
                    "foo/1",
                    [
                        ("port".to_owned(), "80".to_owned()),
                        ("private-address".to_owned(), "10.0.0.2".to_owned()),
                    ]
                    .into(),
                ),
            ],
            ..ReconcileContext::default()
        };

        let render = || {
            let reconciled = build_registry(&context).expect("units are valid");
            render_config(&context.config, &reconciled.services, Some("deployed"))
        };

        assert_eq!(render(), render());
    }
}
