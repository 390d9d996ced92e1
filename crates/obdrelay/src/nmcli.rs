//! `NetworkControl` on top of NetworkManager's `nmcli`.
//!
//! Every call shells out to `nmcli` in terse mode (`-t`) and parses the
//! colon-separated output. `enable` only remembers which connection to
//! bring up; `reconnect` activates it.

use std::ffi::OsString;
use std::io;
use std::sync::{Mutex, PoisonError};

use tokio::process::Command;
use tracing::{debug, trace};

use obdrelay_core::{KnownNetwork, NetworkControl, NetworkError};

const WIFI_CONNECTION_TYPE: &str = "802-11-wireless";

pub struct NmcliNetwork {
    program: OsString,
    /// Wireless interface; detected on first use when `None`.
    interface: Option<String>,
    pending: Mutex<Option<KnownNetwork>>,
}

impl NmcliNetwork {
    pub fn new(interface: Option<String>) -> Self {
        Self::with_program("nmcli", interface)
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(program: impl Into<OsString>, interface: Option<String>) -> Self {
        Self {
            program: program.into(),
            interface,
            pending: Mutex::new(None),
        }
    }

    async fn nmcli(&self, args: &[&str]) -> Result<String, NetworkError> {
        trace!(?args, "nmcli");
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    NetworkError::Unavailable(format!("{} not found", self.program.to_string_lossy()))
                }
                io::ErrorKind::PermissionDenied => NetworkError::PermissionDenied(e.to_string()),
                _ => NetworkError::Command(format!("failed to execute nmcli: {e}")),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        Err(classify_failure(args, &stderr))
    }

    async fn wifi_interface(&self) -> Result<String, NetworkError> {
        if let Some(ref iface) = self.interface {
            return Ok(iface.clone());
        }
        let out = self.nmcli(&["-t", "-f", "DEVICE,TYPE", "device"]).await?;
        parse_wifi_device(&out)
            .ok_or_else(|| NetworkError::Unavailable("no wifi device found".into()))
    }

    fn take_pending(&self) -> Option<KnownNetwork> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl NetworkControl for NmcliNetwork {
    async fn current_ssid(&self) -> Result<Option<String>, NetworkError> {
        let out = self.nmcli(&["-t", "-f", "ACTIVE,SSID", "device", "wifi"]).await?;
        Ok(parse_active_ssid(&out))
    }

    async fn has_internet(&self) -> Result<bool, NetworkError> {
        let out = self.nmcli(&["-t", "-f", "STATE", "general"]).await?;
        Ok(out.trim().starts_with("connected"))
    }

    async fn scan(&self) -> Result<Vec<String>, NetworkError> {
        let out = self
            .nmcli(&["-t", "-f", "SSID", "device", "wifi", "list", "--rescan", "yes"])
            .await?;
        Ok(parse_ssid_list(&out))
    }

    async fn known_networks(&self) -> Result<Vec<KnownNetwork>, NetworkError> {
        let out = self
            .nmcli(&["-t", "-f", "UUID,TYPE,NAME", "connection", "show"])
            .await?;

        let mut known = Vec::new();
        for (uuid, name) in parse_wifi_connections(&out) {
            // The profile name usually, but not always, matches the SSID.
            let ssid = match self
                .nmcli(&["-t", "-g", "802-11-wireless.ssid", "connection", "show", &uuid])
                .await
            {
                Ok(ssid) if !ssid.trim().is_empty() => unescape_terse(ssid.trim()),
                _ => name,
            };
            known.push(KnownNetwork { id: uuid, ssid });
        }
        debug!(count = known.len(), "wifi connection profiles");
        Ok(known)
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        let iface = self.wifi_interface().await?;
        match self.nmcli(&["device", "disconnect", &iface]).await {
            Ok(_) => Ok(()),
            // Already disconnected is fine.
            Err(NetworkError::Command(msg)) if msg.contains("not active") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn enable(&self, network: &KnownNetwork) -> Result<(), NetworkError> {
        self.nmcli(&[
            "connection",
            "modify",
            "uuid",
            &network.id,
            "connection.autoconnect",
            "yes",
        ])
        .await
        .map_err(|err| match err {
            e @ (NetworkError::PermissionDenied(_) | NetworkError::Unavailable(_)) => e,
            other => NetworkError::EnableFailed {
                ssid: network.ssid.clone(),
                reason: other.to_string(),
            },
        })?;

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(network.clone());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), NetworkError> {
        let result = match self.take_pending() {
            Some(network) => {
                self.nmcli(&["connection", "up", "uuid", &network.id])
                    .await
            }
            None => {
                let iface = self.wifi_interface().await?;
                self.nmcli(&["device", "connect", &iface]).await
            }
        };
        result.map(|_| ()).map_err(|err| match err {
            e @ (NetworkError::PermissionDenied(_) | NetworkError::Unavailable(_)) => e,
            other => NetworkError::ReconnectFailed(other.to_string()),
        })
    }
}

// ── Output parsing ───────────────────────────────────────────────────

fn classify_failure(args: &[&str], stderr: &str) -> NetworkError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("not authorized") || lower.contains("insufficient privileges") {
        NetworkError::PermissionDenied(stderr.to_owned())
    } else if lower.contains("networkmanager is not running") {
        NetworkError::Unavailable(stderr.to_owned())
    } else {
        NetworkError::Command(format!("nmcli {}: {stderr}", args.join(" ")))
    }
}

/// Split a terse line on unescaped `:` and undo `\:` / `\\` escaping.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn unescape_terse(value: &str) -> String {
    let mut fields = split_terse(value);
    if fields.len() == 1 {
        fields.pop().unwrap_or_default()
    } else {
        // A bare value with an unescaped colon; keep it whole.
        value.to_owned()
    }
}

fn parse_active_ssid(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let mut fields = split_terse(line).into_iter();
        let active = fields.next()?;
        let ssid = fields.next()?;
        (active == "yes" && !ssid.is_empty()).then_some(ssid)
    })
}

fn parse_ssid_list(out: &str) -> Vec<String> {
    let mut ssids: Vec<String> = out
        .lines()
        .map(unescape_terse)
        .filter(|s| !s.is_empty())
        .collect();
    ssids.sort();
    ssids.dedup();
    ssids
}

fn parse_wifi_connections(out: &str) -> Vec<(String, String)> {
    out.lines()
        .filter_map(|line| {
            let mut fields = split_terse(line).into_iter();
            let uuid = fields.next()?;
            let kind = fields.next()?;
            let name = fields.next()?;
            (kind == WIFI_CONNECTION_TYPE).then_some((uuid, name))
        })
        .collect()
}

fn parse_wifi_device(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let mut fields = split_terse(line).into_iter();
        let device = fields.next()?;
        let kind = fields.next()?;
        (kind == "wifi").then_some(device)
    })
}
