//! `${...}` placeholder expansion.
//!
//! Variables resolve against the names in scope where the string is used:
//!
//! | Variable | Value |
//! |---|---|
//! | `${job}` | job name |
//! | `${group}` / `${group.full}` | group name / `job.group` |
//! | `${task}` / `${task.full}` | task name / `job.group.task` |
//! | `${instance}` | scaling group index |
//! | `${hostname}`, `${machine_id}` | systemd specifiers `%H`, `%m` |
//! | `${private_ipv4}`, `${public_ipv4}` | machine address environment variables |
//!
//! `$${` produces a literal `${`. Any other name is an error.

use crate::error::{ValidationError, ValidationResult};
use crate::names::{GroupName, JobName, TaskName};

/// Names available to placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandScope<'a> {
    pub job: Option<&'a JobName>,
    pub group: Option<&'a GroupName>,
    pub task: Option<&'a TaskName>,
    pub scaling_group: Option<u32>,
}

impl<'a> ExpandScope<'a> {
    pub fn task(job: &'a JobName, group: &'a GroupName, task: &'a TaskName, sg: u32) -> Self {
        Self {
            job: Some(job),
            group: Some(group),
            task: Some(task),
            scaling_group: Some(sg),
        }
    }

    fn resolve(&self, variable: &str) -> Option<String> {
        match variable {
            "job" => self.job.map(ToString::to_string),
            "group" => self.group.map(ToString::to_string),
            "group.full" => Some(format!("{}.{}", self.job?, self.group?)),
            "task" => self.task.map(ToString::to_string),
            "task.full" => Some(format!("{}.{}.{}", self.job?, self.group?, self.task?)),
            "instance" => self.scaling_group.map(|sg| sg.to_string()),
            "hostname" => Some("%H".to_string()),
            "machine_id" => Some("%m".to_string()),
            "private_ipv4" => Some("${COREOS_PRIVATE_IPV4}".to_string()),
            "public_ipv4" => Some("${COREOS_PUBLIC_IPV4}".to_string()),
            _ => None,
        }
    }
}

/// Replace every placeholder in `input`.
pub fn expand(input: &str, scope: &ExpandScope<'_>) -> ValidationResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            out.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| ValidationError::UnterminatedVariable(input.to_string()))?;
            let variable = after[..end].trim();
            let value = scope
                .resolve(variable)
                .ok_or_else(|| ValidationError::UnknownVariable(variable.to_string()))?;
            out.push_str(&value);
            rest = &after[end + 1..];
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Expand every string in a list.
pub fn expand_all<'s>(
    inputs: impl IntoIterator<Item = &'s String>,
    scope: &ExpandScope<'_>,
) -> ValidationResult<Vec<String>> {
    inputs.into_iter().map(|s| expand(s, scope)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Names {
        job: JobName,
        group: GroupName,
        task: TaskName,
    }

    fn names() -> Names {
        Names {
            job: JobName::new("app").unwrap(),
            group: GroupName::new("web").unwrap(),
            task: TaskName::new("srv").unwrap(),
        }
    }

    #[test]
    fn expands_task_scope() {
        let n = names();
        let scope = ExpandScope::task(&n.job, &n.group, &n.task, 2);
        assert_eq!(
            expand("${task.full}@${instance} on ${hostname}", &scope).unwrap(),
            "app.web.srv@2 on %H"
        );
        assert_eq!(expand("${group.full}", &scope).unwrap(), "app.web");
        assert_eq!(
            expand("--bind=${private_ipv4}", &scope).unwrap(),
            "--bind=${COREOS_PRIVATE_IPV4}"
        );
    }

    #[test]
    fn job_scope_hides_task_variables() {
        let n = names();
        let scope = ExpandScope {
            job: Some(&n.job),
            ..Default::default()
        };
        assert_eq!(expand("${job}", &scope).unwrap(), "app");
        assert_eq!(
            expand("${task}", &scope),
            Err(ValidationError::UnknownVariable("task".to_string()))
        );
        assert!(expand("${task.full}", &scope).is_err());
    }

    #[test]
    fn escapes_and_plain_dollars() {
        let scope = ExpandScope::default();
        assert_eq!(expand("$${HOME} costs $5", &scope).unwrap(), "${HOME} costs $5");
        assert_eq!(expand("no placeholders", &scope).unwrap(), "no placeholders");
    }

    #[test]
    fn rejects_unknown_and_unterminated() {
        let scope = ExpandScope::default();
        assert!(matches!(
            expand("${nope}", &scope),
            Err(ValidationError::UnknownVariable(_))
        ));
        assert!(matches!(
            expand("${job", &scope),
            Err(ValidationError::UnterminatedVariable(_))
        ));
    }
}
