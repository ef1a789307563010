//! Collaborator interface for window-bounds lookups.
//!
//! The waterfall does not track windows itself; callers hand it a service
//! that can resolve the foreground window and window geometry. Lookups are
//! assumed reliable and are not retried.

use std::process::{Command, Stdio};

use log::debug;
use serde_json::Value;

use crate::types::Region;

/// Opaque platform window identifier (an X window id on X11, the compositor
/// window address on Hyprland).
pub type WindowHandle = u64;

/// Window-bounds lookup service consumed by window captures.
pub trait WindowService: Send + Sync {
    /// The currently focused window, when one can be determined.
    fn foreground_window(&self) -> Option<WindowHandle>;

    /// Bounds of `handle` in absolute virtual-screen coordinates.
    fn window_bounds(&self, handle: WindowHandle) -> Option<Region>;
}

/// Window lookups through `hyprctl -j`. Hyprland identifies windows by a
/// compositor-side address, which maps directly onto [`WindowHandle`].
pub struct HyprlandWindowService;

impl HyprlandWindowService {
    fn hyprctl_json(args: &[&str]) -> Option<Value> {
        let output = Command::new("hyprctl")
            .args(args)
            .arg("-j")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            debug!("hyprctl {args:?} exited with {}", output.status);
            return None;
        }
        serde_json::from_slice(&output.stdout).ok()
    }
}

impl WindowService for HyprlandWindowService {
    fn foreground_window(&self) -> Option<WindowHandle> {
        let json = Self::hyprctl_json(&["activewindow"])?;
        parse_address(json.get("address")?.as_str()?)
    }

    fn window_bounds(&self, handle: WindowHandle) -> Option<Region> {
        let clients = Self::hyprctl_json(&["clients"])?;
        for client in clients.as_array()? {
            let address = client.get("address").and_then(Value::as_str);
            if address.and_then(parse_address) != Some(handle) {
                continue;
            }
            return parse_geometry(client);
        }
        None
    }
}

fn parse_address(address: &str) -> Option<WindowHandle> {
    u64::from_str_radix(address.trim_start_matches("0x"), 16).ok()
}

/// Reads the `at` and `size` pairs hyprctl reports for a client.
fn parse_geometry(client: &Value) -> Option<Region> {
    let pair = |key: &str| {
        let values = client.get(key)?.as_array()?;
        Some((values.first()?.as_i64()? as i32, values.get(1)?.as_i64()? as i32))
    };
    let (x, y) = pair("at")?;
    let (width, height) = pair("size")?;
    let region = Region { x, y, width, height };
    region.is_valid().then_some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_as_hex() {
        assert_eq!(parse_address("0x55f6f4a0"), Some(0x55f6_f4a0));
        assert_eq!(parse_address("not-an-address"), None);
    }

    #[test]
    fn client_geometry_parses() {
        let client: Value = serde_json::from_str(
            r#"{"address": "0x10", "at": [100, 50], "size": [640, 480]}"#,
        )
        .unwrap();
        assert_eq!(
            parse_geometry(&client),
            Some(Region { x: 100, y: 50, width: 640, height: 480 })
        );
    }

    #[test]
    fn degenerate_client_geometry_is_rejected() {
        let client: Value =
            serde_json::from_str(r#"{"at": [0, 0], "size": [0, 480]}"#).unwrap();
        assert_eq!(parse_geometry(&client), None);
    }
}
