//! NetworkManager CLI adapter.
//!
//! Every mutation of the wireless interface funnels through `nmcli` here —
//! no D-Bus binding, matching the "all host interaction funnels through the
//! shell executor" design. Validation helpers mirror the constraints the
//! host tool itself enforces (SSID length, WPA-PSK password length) so
//! `connect_to_wifi` can fail fast before ever shelling out.

use log::warn;

use crate::error::{HostToolError, InvalidArgumentError};
use crate::shell::{self, ShellResult};

pub const MAX_SSID_LEN: usize = 32;
pub const MIN_WPA_PSK_LEN: usize = 8;
pub const MAX_WPA_PSK_LEN: usize = 63;

pub fn validate_ssid(ssid: &str) -> Result<(), InvalidArgumentError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || !is_printable_ascii(ssid) {
        return Err(InvalidArgumentError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), InvalidArgumentError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < MIN_WPA_PSK_LEN || password.len() > MAX_WPA_PSK_LEN {
        return Err(InvalidArgumentError::WeakPsk);
    }
    Ok(())
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

fn to_host_tool_error(command: &str, result: &ShellResult) -> HostToolError {
    HostToolError {
        command: command.to_string(),
        exit_code: result.exit_code,
        stderr: result.stderr.clone(),
    }
}

/// Delete a connection profile by name. Idempotent — "no such connection" is
/// not treated as a failure by the caller.
pub async fn delete_connection(name: &str) -> ShellResult {
    shell::run(&format!("nmcli connection delete id '{name}'")).await
}

/// Install a persistent client-mode profile with `autoconnect=yes`.
pub async fn add_client_profile(name: &str, ssid: &str, password: Option<&str>) -> Result<(), HostToolError> {
    let mut cmd = format!(
        "nmcli connection add type wifi con-name '{name}' ifname '*' autoconnect yes ssid '{ssid}'"
    );
    if let Some(pw) = password {
        if !pw.is_empty() {
            cmd.push_str(&format!(" wifi-sec.key-mgmt wpa-psk wifi-sec.psk '{pw}'"));
        }
    }
    let result = shell::run(&cmd).await;
    if !result.success {
        warn!("nm: add_client_profile failed: {}", result.stderr.trim());
        return Err(to_host_tool_error("nmcli connection add", &result));
    }
    Ok(())
}

/// One-shot direct-connect fallback when profile installation fails.
pub async fn device_wifi_connect(ssid: &str, password: Option<&str>) -> Result<(), HostToolError> {
    let mut cmd = format!("nmcli device wifi connect '{ssid}'");
    if let Some(pw) = password {
        if !pw.is_empty() {
            cmd.push_str(&format!(" password '{pw}'"));
        }
    }
    let result = shell::run(&cmd).await;
    if !result.success {
        return Err(to_host_tool_error("nmcli device wifi connect", &result));
    }
    Ok(())
}

pub async fn connection_up(name: &str) -> Result<(), HostToolError> {
    let result = shell::run(&format!("nmcli connection up id '{name}'")).await;
    if !result.success {
        return Err(to_host_tool_error("nmcli connection up", &result));
    }
    Ok(())
}

pub async fn connection_down(name: &str) -> ShellResult {
    shell::run(&format!("nmcli connection down id '{name}'")).await
}

pub async fn device_disconnect(interface: &str) -> ShellResult {
    shell::run(&format!("nmcli device disconnect '{interface}'")).await
}

/// `true` if `name` appears in the active-connection table.
pub async fn connection_is_active(name: &str) -> bool {
    let result = shell::run("nmcli -t -f NAME connection show --active").await;
    result.success && result.stdout.lines().any(|line| line.trim() == name)
}

/// The SSID the interface is currently associated with, via `iwgetid -r`.
pub async fn current_ssid() -> Option<String> {
    let result = shell::run("iwgetid -r").await;
    let ssid = result.stdout.trim();
    if result.success && !ssid.is_empty() {
        Some(ssid.to_string())
    } else {
        None
    }
}

/// `true` if the radio itself is enabled (`nmcli radio wifi`).
pub async fn radio_enabled() -> bool {
    let result = shell::run("nmcli -t -f WIFI radio").await;
    result.success && result.stdout.trim().eq_ignore_ascii_case("enabled")
}

/// Install an AP-mode profile (`spec` §4.E start_hotspot step 4).
pub async fn add_ap_profile(name: &str, ssid: &str, password: &str) -> Result<(), HostToolError> {
    let cmd = format!(
        "nmcli connection add type wifi ifname '*' con-name '{name}' autoconnect no ssid '{ssid}' \
         mode ap band bg ipv4.method shared ipv6.method shared wifi-sec.key-mgmt wpa-psk wifi-sec.psk '{password}'"
    );
    let result = shell::run(&cmd).await;
    if !result.success {
        return Err(to_host_tool_error("nmcli connection add (ap)", &result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_ssid() {
        assert_eq!(validate_ssid(""), Err(InvalidArgumentError::InvalidSsid));
    }

    #[test]
    fn rejects_password_shorter_than_eight() {
        assert_eq!(validate_password("short"), Err(InvalidArgumentError::WeakPsk));
    }

    #[test]
    fn accepts_open_network_password() {
        assert!(validate_password("").is_ok());
    }

    #[test]
    fn accepts_valid_wpa_psk() {
        assert!(validate_password("mysecret8").is_ok());
    }
}
