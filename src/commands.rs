use std::time::Duration;

use crate::serial::protocol::dac_to_percent;
use crate::serial::{DeviceState, DimmerId, RelayId};
use crate::session::SessionManager;

fn relay_id(relay: u8) -> Result<RelayId, String> {
    RelayId::from_number(relay).ok_or_else(|| format!("Invalid relay: {} (expected 1 or 2)", relay))
}

fn dimmer_id(dimmer: u8) -> Result<DimmerId, String> {
    DimmerId::from_number(dimmer).ok_or_else(|| format!("Invalid dimmer: {} (expected 1 or 2)", dimmer))
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

/// Switch a relay on or off
pub async fn set_relay(manager: &SessionManager, relay: u8, on: bool) -> Result<String, String> {
    let id = relay_id(relay)?;
    manager
        .set_relay(id, on)
        .await
        .map_err(|e| format!("Failed to set relay {}: {}", relay, e))?;
    Ok(format!("Relay {} {}", relay, on_off(on)))
}

/// Set a dimmer output as a percentage of full scale
pub async fn set_dimmer(manager: &SessionManager, dimmer: u8, percentage: f32) -> Result<String, String> {
    let id = dimmer_id(dimmer)?;
    let value = manager
        .set_dimmer_percent(id, percentage)
        .await
        .map_err(|e| format!("Failed to set dimmer {}: {}", dimmer, e))?;
    Ok(format!("Dimmer {} set to {}% (DAC: {})", dimmer, percentage, value))
}

pub async fn enable_dimmer(manager: &SessionManager, dimmer: u8, enabled: bool) -> Result<String, String> {
    let id = dimmer_id(dimmer)?;
    manager
        .enable_dimmer(id, enabled)
        .await
        .map_err(|e| format!("Failed to change dimmer {}: {}", dimmer, e))?;
    Ok(format!("Dimmer {} {}", dimmer, if enabled { "enabled" } else { "disabled" }))
}

/// Request a fresh status frame, falling back to the last mirrored one
pub async fn get_status(manager: &SessionManager) -> Result<String, String> {
    let fresh = manager
        .request_status()
        .await
        .map_err(|e| format!("Failed to get status: {}", e))?;

    match fresh {
        Some(state) => Ok(format_status(&state)),
        None => match manager.device_state().await {
            Some(state) => Ok(format!("{} (last known, device did not answer)", format_status(&state))),
            None => Err("No status received from device".to_string()),
        },
    }
}

pub async fn get_version(manager: &SessionManager) -> Result<String, String> {
    match manager.request_version().await {
        Ok(Some(version)) => Ok(format!("Firmware {}", version)),
        Ok(None) => Err("No version received from device".to_string()),
        Err(e) => Err(format!("Failed to get version: {}", e)),
    }
}

/// Relays off, dimmer outputs disabled and zeroed
pub async fn all_off(manager: &SessionManager) -> Result<String, String> {
    manager
        .all_off()
        .await
        .map_err(|e| format!("Failed to turn everything off: {}", e))?;
    Ok("All outputs off".to_string())
}

/// Exercise every output: relays in turn, then opposing dimmer ramps
pub async fn run_test_sequence(manager: &SessionManager, step: Duration) -> Result<String, String> {
    log::info!("Starting test sequence...");

    set_relay(manager, 1, true).await?;
    tokio::time::sleep(step * 2).await;
    set_relay(manager, 2, true).await?;
    tokio::time::sleep(step * 2).await;
    set_relay(manager, 1, false).await?;
    set_relay(manager, 2, false).await?;

    enable_dimmer(manager, 1, true).await?;
    enable_dimmer(manager, 2, true).await?;
    for pct in (0..=100u8).step_by(10) {
        set_dimmer(manager, 1, f32::from(pct)).await?;
        set_dimmer(manager, 2, f32::from(100 - pct)).await?;
        tokio::time::sleep(step).await;
    }

    set_dimmer(manager, 1, 0.0).await?;
    set_dimmer(manager, 2, 0.0).await?;
    enable_dimmer(manager, 1, false).await?;
    enable_dimmer(manager, 2, false).await?;

    Ok("Test sequence completed".to_string())
}

pub fn format_status(state: &DeviceState) -> String {
    let dimmer = |value: u16, enabled: bool| {
        format!(
            "{:.0}% ({}){}",
            dac_to_percent(value),
            value,
            if enabled { "" } else { " [disabled]" }
        )
    };
    format!(
        "Relay 1: {}, Relay 2: {}, Dimmer 1: {}, Dimmer 2: {}",
        on_off(state.relay1),
        on_off(state.relay2),
        dimmer(state.dimmer1_value, state.dimmer1_enabled),
        dimmer(state.dimmer2_value, state.dimmer2_enabled),
    )
}

/// One line of interactive input
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Relay { relay: u8, on: bool },
    Dimmer { dimmer: u8, percentage: f32 },
    Enable(u8),
    Disable(u8),
    Status,
    Version,
    AllOff,
    Help,
    Quit,
}

impl ShellCommand {
    pub const USAGE: &'static str = "Commands:\n  \
        relay <1|2> <on|off>\n  \
        dimmer <1|2> <0-100>\n  \
        enable <1|2>\n  \
        disable <1|2>\n  \
        status\n  \
        version\n  \
        alloff\n  \
        help\n  \
        quit";

    pub fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = parts.split_first() else {
            return Err("Empty command".to_string());
        };

        let channel = |arg: Option<&&str>| -> Result<u8, String> {
            let raw = arg.ok_or_else(|| format!("'{}' needs a channel number", verb))?;
            match raw.parse::<u8>() {
                Ok(n @ 1..=2) => Ok(n),
                _ => Err(format!("Invalid channel: {} (expected 1 or 2)", raw)),
            }
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "relay" => {
                let relay = channel(args.first())?;
                let on = match args.get(1).map(|s| s.to_ascii_lowercase()).as_deref() {
                    Some("on") | Some("1") => true,
                    Some("off") | Some("0") => false,
                    Some(other) => return Err(format!("Invalid relay state: {} (expected on or off)", other)),
                    None => return Err("'relay' needs a state (on or off)".to_string()),
                };
                ShellCommand::Relay { relay, on }
            }
            "dimmer" => {
                let dimmer = channel(args.first())?;
                let raw = args.get(1).ok_or("'dimmer' needs a percentage")?;
                let percentage = raw
                    .trim_end_matches('%')
                    .parse::<f32>()
                    .map_err(|_| format!("Invalid percentage: {}", raw))?;
                if !(0.0..=100.0).contains(&percentage) {
                    return Err(format!("Percentage must be between 0 and 100, got {}", percentage));
                }
                ShellCommand::Dimmer { dimmer, percentage }
            }
            "enable" => ShellCommand::Enable(channel(args.first())?),
            "disable" => ShellCommand::Disable(channel(args.first())?),
            "status" => ShellCommand::Status,
            "version" => ShellCommand::Version,
            "alloff" | "all-off" | "off" => ShellCommand::AllOff,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            other => return Err(format!("Unknown command: {}", other)),
        };

        Ok(command)
    }

    /// Run against a session. `Quit` and `Help` are handled by the caller.
    pub async fn execute(&self, manager: &SessionManager) -> Result<String, String> {
        match *self {
            ShellCommand::Relay { relay, on } => set_relay(manager, relay, on).await,
            ShellCommand::Dimmer { dimmer, percentage } => set_dimmer(manager, dimmer, percentage).await,
            ShellCommand::Enable(dimmer) => enable_dimmer(manager, dimmer, true).await,
            ShellCommand::Disable(dimmer) => enable_dimmer(manager, dimmer, false).await,
            ShellCommand::Status => get_status(manager).await,
            ShellCommand::Version => get_version(manager).await,
            ShellCommand::AllOff => all_off(manager).await,
            ShellCommand::Help => Ok(Self::USAGE.to_string()),
            ShellCommand::Quit => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relay() {
        assert_eq!(
            ShellCommand::parse("relay 1 on").unwrap(),
            ShellCommand::Relay { relay: 1, on: true }
        );
        assert_eq!(
            ShellCommand::parse("  RELAY 2 OFF ").unwrap(),
            ShellCommand::Relay { relay: 2, on: false }
        );
        assert!(ShellCommand::parse("relay 3 on").is_err());
        assert!(ShellCommand::parse("relay 1").is_err());
        assert!(ShellCommand::parse("relay 1 maybe").is_err());
    }

    #[test]
    fn test_parse_dimmer() {
        assert_eq!(
            ShellCommand::parse("dimmer 2 75").unwrap(),
            ShellCommand::Dimmer { dimmer: 2, percentage: 75.0 }
        );
        assert_eq!(
            ShellCommand::parse("dimmer 1 12.5%").unwrap(),
            ShellCommand::Dimmer { dimmer: 1, percentage: 12.5 }
        );
        assert!(ShellCommand::parse("dimmer 1 101").is_err());
        assert!(ShellCommand::parse("dimmer 1 -5").is_err());
        assert!(ShellCommand::parse("dimmer 1 bright").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(ShellCommand::parse("enable 1").unwrap(), ShellCommand::Enable(1));
        assert_eq!(ShellCommand::parse("disable 2").unwrap(), ShellCommand::Disable(2));
        assert_eq!(ShellCommand::parse("status").unwrap(), ShellCommand::Status);
        assert_eq!(ShellCommand::parse("version").unwrap(), ShellCommand::Version);
        assert_eq!(ShellCommand::parse("alloff").unwrap(), ShellCommand::AllOff);
        assert_eq!(ShellCommand::parse("quit").unwrap(), ShellCommand::Quit);
        assert!(ShellCommand::parse("").is_err());
        assert!(ShellCommand::parse("reboot").is_err());
    }

    #[test]
    fn test_format_status() {
        let state = DeviceState {
            relay1: true,
            relay2: false,
            dimmer1_value: 4095,
            dimmer2_value: 0,
            dimmer1_enabled: true,
            dimmer2_enabled: false,
        };
        assert_eq!(
            format_status(&state),
            "Relay 1: ON, Relay 2: OFF, Dimmer 1: 100% (4095), Dimmer 2: 0% (0) [disabled]"
        );
    }
}
