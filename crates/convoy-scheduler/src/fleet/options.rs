//! Conversion between unit file text and fleet unit options.

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// One `key=value` line of a unit file, tagged with its section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOption {
    pub section: String,
    pub name: String,
    pub value: String,
}

/// Parse unit file text into options, in file order.
///
/// Blank lines and `#`/`;` comments are skipped. A trailing `\` joins the
/// next line onto the value.
pub fn parse_unit(unit: &str, content: &str) -> SchedulerResult<Vec<UnitOption>> {
    let mut options = Vec::new();
    let mut section: Option<String> = None;
    let mut pending: Option<UnitOption> = None;

    for (index, raw) in content.lines().enumerate() {
        if let Some(mut option) = pending.take() {
            let (part, more) = continuation(raw.trim_end());
            option.value.push(' ');
            option.value.push_str(part.trim());
            if more {
                pending = Some(option);
            } else {
                options.push(option);
            }
            continue;
        }

        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.to_string());
            continue;
        }

        let invalid = |reason: &str| SchedulerError::InvalidUnit {
            name: unit.to_string(),
            reason: format!("line {}: {reason}", index + 1),
        };
        let section = section
            .clone()
            .ok_or_else(|| invalid("option outside of a section"))?;
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| invalid("expected key=value"))?;
        let (value, more) = continuation(value.trim());
        let option = UnitOption {
            section,
            name: name.trim().to_string(),
            value: value.trim_end().to_string(),
        };
        if more {
            pending = Some(option);
        } else {
            options.push(option);
        }
    }

    options.extend(pending);
    Ok(options)
}

fn continuation(line: &str) -> (&str, bool) {
    match line.strip_suffix('\\') {
        Some(rest) => (rest, true),
        None => (line, false),
    }
}

/// Render options back to unit file text, one section block per run of
/// options sharing a section.
pub fn render_options(options: &[UnitOption]) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for option in options {
        if current != Some(option.section.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&option.section);
            out.push_str("]\n");
            current = Some(option.section.as_str());
        }
        out.push_str(&option.name);
        out.push('=');
        out.push_str(&option.value);
        out.push('\n');
    }
    out
}

/// Whether the options schedule the unit on every machine.
pub fn is_global(options: &[UnitOption]) -> bool {
    options
        .iter()
        .any(|o| o.section == "X-Fleet" && o.name == "Global" && o.value == "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = "[Unit]\nDescription=web\nAfter=docker.service\n\n[Service]\nExecStart=/usr/bin/docker run \\\n  nginx\n\n[X-Fleet]\nGlobal=true\n";

    #[test]
    fn parses_sections_and_continuations() {
        let options = parse_unit("web.service", UNIT).unwrap();
        assert_eq!(options.len(), 4);
        assert_eq!(options[0].section, "Unit");
        assert_eq!(options[2].name, "ExecStart");
        assert_eq!(options[2].value, "/usr/bin/docker run nginx");
        assert!(is_global(&options));
    }

    #[test]
    fn render_normalizes_layout() {
        let options = parse_unit("web.service", UNIT).unwrap();
        let text = render_options(&options);
        assert_eq!(
            text,
            "[Unit]\nDescription=web\nAfter=docker.service\n\n[Service]\nExecStart=/usr/bin/docker run nginx\n\n[X-Fleet]\nGlobal=true\n"
        );
        assert_eq!(parse_unit("web.service", &text).unwrap(), options);
    }

    #[test]
    fn rejects_orphan_options() {
        let err = parse_unit("web.service", "Description=x\n").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidUnit { .. }));
        assert!(parse_unit("web.service", "[Unit]\nnot an option\n").is_err());
    }
}
