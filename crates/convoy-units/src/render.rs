//! Rendering units into backend-native text.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::unit::{Unit, UnitKind};

/// A rendered unit, addressed by the sha256 of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitData {
    /// Full unit name, e.g. `app-web-srv-mn@1.service`.
    pub name: String,
    pub content: String,
    pub hash: String,
}

impl UnitData {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = hex::encode(Sha256::digest(content.as_bytes()));
        Self {
            name: name.into(),
            content,
            hash,
        }
    }
}

/// Turns a [`Unit`] into a backend-native artifact.
pub trait Renderer: Send + Sync {
    fn render(&self, unit: &Unit) -> UnitData;
}

/// Renders systemd unit files with an `[X-Fleet]` placement section.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdRenderer;

impl Renderer for SystemdRenderer {
    fn render(&self, unit: &Unit) -> UnitData {
        let mut out = String::new();

        out.push_str("[Unit]\n");
        line(&mut out, "Description", &unit.description);
        for name in &unit.requires {
            line(&mut out, "Requires", name);
        }
        for name in &unit.after {
            line(&mut out, "After", name);
        }
        for name in &unit.part_of {
            line(&mut out, "PartOf", name);
        }

        match unit.kind {
            UnitKind::Service => {
                out.push_str("\n[Service]\n");
                for (key, value) in &unit.environment {
                    line(&mut out, "Environment", &quote(&format!("{key}={value}")));
                }
                for file in &unit.environment_files {
                    line(&mut out, "EnvironmentFile", file);
                }
                for cmd in &unit.start_pre {
                    line(&mut out, "ExecStartPre", cmd);
                }
                if !unit.start.is_empty() {
                    let argv: Vec<String> = unit.start.iter().map(|a| quote(a)).collect();
                    line(&mut out, "ExecStart", &argv.join(" "));
                }
                for cmd in &unit.start_post {
                    line(&mut out, "ExecStartPost", cmd);
                }
                // systemd has no ExecStopPre; stop_pre runs first in ExecStop.
                for cmd in unit.stop_pre.iter().chain(&unit.stop) {
                    line(&mut out, "ExecStop", cmd);
                }
                for cmd in &unit.stop_post {
                    line(&mut out, "ExecStopPost", cmd);
                }
            }
            UnitKind::Timer => out.push_str("\n[Timer]\n"),
        }
        for (key, value) in &unit.settings {
            line(&mut out, key, value);
        }

        let mut fleet = String::new();
        if unit.global {
            line(&mut fleet, "Global", "true");
        }
        for rule in &unit.machine_metadata {
            line(&mut fleet, "MachineMetadata", rule);
        }
        for pattern in &unit.conflicts {
            line(&mut fleet, "Conflicts", pattern);
        }
        if let Some(name) = &unit.machine_of {
            line(&mut fleet, "MachineOf", name);
        }
        if let Some(id) = &unit.machine_id {
            line(&mut fleet, "MachineID", id);
        }
        if !fleet.is_empty() {
            out.push_str("\n[X-Fleet]\n");
            out.push_str(&fleet);
        }

        UnitData::new(unit.full_name.clone(), out)
    }
}

fn line(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{key}={value}");
}

/// Quote an argument for a systemd command line when needed.
fn quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\');
    if !needs_quotes {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
