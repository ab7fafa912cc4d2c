//! Keeping the ports opened on the unit in line with the deployed services.
use charm_helpers::hookenv::{self, HookEnvironment, Protocol};

/// Closes every port of `old` that is not in `new`, then opens every port of `new` that was not
/// in `old`.
pub fn update_service_ports(
    env: &impl HookEnvironment,
    old: &[u16],
    new: &[u16],
) -> Result<(), hookenv::Error> {
    for &port in old.iter().filter(|port| !new.contains(*port)) {
        tracing::info!(port, "closing port");
        env.close_port(port, Protocol::Tcp)?;
    }
    for &port in new.iter().filter(|port| !old.contains(*port)) {
        tracing::info!(port, "opening port");
        env.open_port(port, Protocol::Tcp)?;
    }
    Ok(())
}
