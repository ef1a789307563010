//! Session classification: display server, desktop environment, sandboxing.
//!
//! The context is derived once per capture call from environment inspection.
//! It is deliberately not cached across calls; the session cannot change at
//! runtime but re-derivation is cheap and avoids stale-state bugs.

use std::path::Path;

/// Desktop environment families the waterfall routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Kde,
    Gnome,
    Cinnamon,
    Mate,
    Lxqt,
    Xfce,
    Hyprland,
    Sway,
    Unknown,
}

impl DesktopEnvironment {
    /// `XDG_CURRENT_DESKTOP` can carry colon-separated values
    /// (e.g. "ubuntu:GNOME"); any matching component wins.
    fn from_desktop_value(value: &str) -> Self {
        for part in value.split(':') {
            let normalized = part.trim().to_ascii_uppercase();
            let matched = match normalized.as_str() {
                "KDE" | "PLASMA" => Some(Self::Kde),
                "GNOME" | "UBUNTU" | "GNOME-CLASSIC" => Some(Self::Gnome),
                "X-CINNAMON" | "CINNAMON" => Some(Self::Cinnamon),
                "MATE" => Some(Self::Mate),
                "LXQT" => Some(Self::Lxqt),
                "XFCE" => Some(Self::Xfce),
                "HYPRLAND" => Some(Self::Hyprland),
                "SWAY" => Some(Self::Sway),
                _ => None,
            };
            if let Some(found) = matched {
                return found;
            }
        }
        Self::Unknown
    }

    /// Compositors built on wlroots share the grim/slurp tool family.
    pub fn is_wlroots(&self) -> bool {
        matches!(self, Self::Hyprland | Self::Sway)
    }
}

/// Everything the orchestrator needs to order backend attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub is_wayland: bool,
    pub desktop: DesktopEnvironment,
    pub is_sandboxed: bool,
}

impl SessionContext {
    /// Classifies the current session from environment variables and sandbox
    /// markers. Absence of every indicator is a valid state and classifies as
    /// X11, unsandboxed, unknown desktop.
    pub fn detect() -> Self {
        let is_wayland = std::env::var("XDG_SESSION_TYPE")
            .map(|v| v.eq_ignore_ascii_case("wayland"))
            .unwrap_or(false);

        let desktop = std::env::var("XDG_CURRENT_DESKTOP")
            .or_else(|_| std::env::var("XDG_SESSION_DESKTOP"))
            .map(|v| DesktopEnvironment::from_desktop_value(&v))
            .unwrap_or(DesktopEnvironment::Unknown);

        Self {
            is_wayland,
            desktop,
            is_sandboxed: detect_sandbox(),
        }
    }

    /// Whether the desktop offers the KWin ScreenShot2 raw-pixel service.
    pub fn has_kwin_screenshot(&self) -> bool {
        matches!(
            self.desktop,
            DesktopEnvironment::Kde | DesktopEnvironment::Lxqt
        )
    }

    /// Whether the desktop offers the GNOME Shell screenshot service.
    pub fn has_gnome_shell_screenshot(&self) -> bool {
        matches!(
            self.desktop,
            DesktopEnvironment::Gnome | DesktopEnvironment::Mate | DesktopEnvironment::Cinnamon
        )
    }
}

/// Flatpak and Snap both restrict direct display access, which makes the
/// portal the only capture path likely to be permitted.
fn detect_sandbox() -> bool {
    if std::env::var_os("FLATPAK_ID").is_some() || std::env::var_os("SNAP").is_some() {
        return true;
    }
    if std::env::var_os("container").is_some() {
        return true;
    }
    Path::new("/.flatpak-info").exists() || Path::new("/run/.containerenv").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_desktop_values() {
        assert_eq!(
            DesktopEnvironment::from_desktop_value("ubuntu:GNOME"),
            DesktopEnvironment::Gnome
        );
        assert_eq!(
            DesktopEnvironment::from_desktop_value("KDE"),
            DesktopEnvironment::Kde
        );
        assert_eq!(
            DesktopEnvironment::from_desktop_value("X-Cinnamon"),
            DesktopEnvironment::Cinnamon
        );
        assert_eq!(
            DesktopEnvironment::from_desktop_value("weird-desktop"),
            DesktopEnvironment::Unknown
        );
    }

    #[test]
    fn kwin_and_gnome_routing() {
        let ctx = SessionContext {
            is_wayland: true,
            desktop: DesktopEnvironment::Lxqt,
            is_sandboxed: false,
        };
        assert!(ctx.has_kwin_screenshot());
        assert!(!ctx.has_gnome_shell_screenshot());

        let ctx = SessionContext {
            desktop: DesktopEnvironment::Mate,
            ..ctx
        };
        assert!(ctx.has_gnome_shell_screenshot());
    }
}
