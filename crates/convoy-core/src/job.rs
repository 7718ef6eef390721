//! Job → TaskGroup → Task tree.
//!
//! A job is loaded once, validated once, and then only read. Groups and
//! tasks never point back at their owners; callers resolve names through
//! [`Job::group`] and [`TaskGroup::task`], or carry a [`TaskScope`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::image::Image;
use crate::names::{GroupName, JobName, LinkName, TaskName};
use crate::types::{
    Constraint, Link, Metrics, PrivateFrontEnd, PublicFrontEnd, RestartPolicy, Secret, TaskType,
    Volume, merge_constraints, validate_constraints,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: JobName,
    /// Constraints inherited by every group and task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub groups: Vec<TaskGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: GroupName,
    /// Number of scaling groups.
    #[serde(default = "default_count")]
    pub count: u32,
    /// One instance per machine instead of independent scaling slots.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: TaskName,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    /// Task the proxy forwards to. Only for `proxy` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<LinkName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Docker port specs: `port`, `host:port` or `ip:host:port`, optionally `/proto`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<TaskName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<TaskName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    /// Calendar expression (systemd `OnCalendar`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_check_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_frontends: Vec<PublicFrontEnd>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_frontends: Vec<PrivateFrontEnd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl Job {
    /// Load a job from a TOML file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let job = Self::from_toml(&content)?;
        Ok(job)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let job: Job = toml::from_str(content)?;
        job.validate()?;
        Ok(job)
    }

    pub fn group(&self, name: &str) -> Option<&TaskGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Highest scaling group count across all groups.
    pub fn max_count(&self) -> u32 {
        self.groups.iter().map(|g| g.count).max().unwrap_or(0)
    }

    pub fn validate(&self) -> ValidationResult<()> {
        let context = self.name.as_str();
        if self.groups.is_empty() {
            return Err(ValidationError::invalid(context, "job has no groups"));
        }
        validate_constraints(&self.constraints, context)?;
        for (i, group) in self.groups.iter().enumerate() {
            if self.groups[..i].iter().any(|g| g.name == group.name) {
                return Err(ValidationError::Duplicate {
                    context: context.to_string(),
                    kind: "group",
                    name: group.name.to_string(),
                });
            }
            group.validate(self)?;
        }
        Ok(())
    }
}

impl TaskGroup {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks ordered by name.
    pub fn sorted_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Whether units of this group carry an `@<sg>` suffix.
    pub fn is_scalable(&self) -> bool {
        !(self.global && self.count == 1)
    }

    fn validate(&self, job: &Job) -> ValidationResult<()> {
        let context = format!("{}.{}", job.name, self.name);
        if self.count == 0 {
            return Err(ValidationError::InvalidCount { context });
        }
        if self.tasks.is_empty() {
            return Err(ValidationError::invalid(context, "group has no tasks"));
        }
        validate_constraints(&self.constraints, &context)?;
        for (i, task) in self.tasks.iter().enumerate() {
            if self.tasks[..i].iter().any(|t| t.name == task.name) {
                return Err(ValidationError::Duplicate {
                    context,
                    kind: "task",
                    name: task.name.to_string(),
                });
            }
            let scope = TaskScope {
                job,
                group: self,
                task,
            };
            task.validate(&scope)?;
        }
        Ok(())
    }
}

impl Task {
    fn validate(&self, scope: &TaskScope<'_>) -> ValidationResult<()> {
        let context = scope.context();

        match self.task_type {
            TaskType::Proxy => {
                if self.target.is_none() {
                    return Err(ValidationError::invalid(context, "proxy task needs a target"));
                }
            }
            TaskType::Service | TaskType::Oneshot => {
                if self.image.is_none() {
                    return Err(ValidationError::invalid(context, "task needs an image"));
                }
                if self.target.is_some() {
                    return Err(ValidationError::invalid(
                        context,
                        "only proxy tasks may set a target",
                    ));
                }
            }
        }
        if let Some(image) = &self.image {
            image.validate()?;
        }

        for port in &self.ports {
            parse_container_port(port).ok_or_else(|| {
                ValidationError::invalid(&context, format!("invalid port '{port}'"))
            })?;
        }
        for volume in &self.volumes {
            volume.validate(&context)?;
        }
        for secret in &self.secrets {
            secret.validate(&context)?;
        }
        for link in &self.links {
            link.validate(&context)?;
            if link.target.is_local_to(&scope.job.name) {
                let resolved = scope
                    .job
                    .group(link.target.group.as_str())
                    .and_then(|g| g.task(link.target.task.as_str()));
                if resolved.is_none() {
                    return Err(ValidationError::UnknownTask {
                        context,
                        name: link.target.to_string(),
                    });
                }
            }
        }
        if let Some(target) = &self.target
            && target.is_local_to(&scope.job.name)
            && scope
                .job
                .group(target.group.as_str())
                .and_then(|g| g.task(target.task.as_str()))
                .is_none()
        {
            return Err(ValidationError::UnknownTask {
                context,
                name: target.to_string(),
            });
        }

        for name in self.volumes_from.iter().chain(&self.after) {
            if *name == self.name {
                return Err(ValidationError::SelfReference { context });
            }
            if scope.group.task(name.as_str()).is_none() {
                return Err(ValidationError::UnknownTask {
                    context,
                    name: name.to_string(),
                });
            }
        }

        validate_constraints(&self.constraints, &context)?;
        if let Some(timer) = &self.timer
            && timer.trim().is_empty()
        {
            return Err(ValidationError::invalid(context, "timer is empty"));
        }
        Ok(())
    }

    /// Container side ports, in declaration order.
    pub fn container_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter_map(|p| parse_container_port(p))
            .collect()
    }
}

/// Container port of a docker port spec.
fn parse_container_port(spec: &str) -> Option<u16> {
    let spec = spec.split_once('/').map_or(spec, |(port, _proto)| port);
    spec.rsplit(':').next()?.parse().ok()
}

/// Borrowed view of a task together with its owners.
#[derive(Debug, Clone, Copy)]
pub struct TaskScope<'a> {
    pub job: &'a Job,
    pub group: &'a TaskGroup,
    pub task: &'a Task,
}

impl<'a> TaskScope<'a> {
    /// `job.group.task`, used in error messages and logs.
    pub fn context(&self) -> String {
        format!("{}.{}.{}", self.job.name, self.group.name, self.task.name)
    }

    /// `job-group-task`: the base of every unit name for this task.
    pub fn unit_base(&self) -> String {
        format!("{}-{}-{}", self.job.name, self.group.name, self.task.name)
    }

    /// Job, group, then task constraints; later levels win per attribute.
    pub fn constraints(&self) -> Vec<&'a Constraint> {
        merge_constraints(&[
            self.job.constraints.as_slice(),
            self.group.constraints.as_slice(),
            self.task.constraints.as_slice(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
name = "app"

[[constraints]]
attribute = "meta.region"
value = "eu"

[[groups]]
name = "web"
count = 2

[[groups.tasks]]
name = "srv"
image = "pulcy/web:1.0"
ports = ["8080", "0.0.0.0:80:8080/tcp"]
after = ["sidecar"]

[[groups.tasks.links]]
target = "db.main"
type = "tcp"
ports = [5432]

[[groups.tasks.constraints]]
attribute = "meta.region"
value = "us"

[[groups.tasks]]
name = "sidecar"
image = "redis"

[[groups]]
name = "db"
global = true

[[groups.tasks]]
name = "main"
image = "postgres:16"
"#;

    fn job() -> Job {
        Job::from_toml(JOB).unwrap()
    }

    #[test]
    fn loads_and_looks_up() {
        let job = job();
        assert_eq!(job.max_count(), 2);
        let web = job.group("web").unwrap();
        assert!(web.task("srv").is_some());
        assert!(web.task("missing").is_none());
        assert!(job.group("db").unwrap().global);
        assert!(!job.group("db").unwrap().is_scalable());
        assert!(web.is_scalable());
    }

    #[test]
    fn tasks_sort_by_name() {
        let job = job();
        let names: Vec<&str> = job
            .group("web")
            .unwrap()
            .sorted_tasks()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["sidecar", "srv"]);
    }

    #[test]
    fn container_ports_parse_all_forms() {
        let job = job();
        let srv = job.group("web").unwrap().task("srv").unwrap();
        assert_eq!(srv.container_ports(), vec![8080, 8080]);
    }

    #[test]
    fn scope_merges_constraints() {
        let job = job();
        let group = job.group("web").unwrap();
        let scope = TaskScope {
            job: &job,
            group,
            task: group.task("srv").unwrap(),
        };
        let merged = scope.constraints();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].value, "us");
        assert_eq!(scope.unit_base(), "app-web-srv");
    }

    #[test]
    fn rejects_unresolved_after() {
        let mut job = job();
        job.groups[0].tasks[0].after = vec![TaskName::new("ghost").unwrap()];
        assert!(matches!(
            job.validate(),
            Err(ValidationError::UnknownTask { .. })
        ));
    }

    #[test]
    fn rejects_self_reference() {
        let mut job = job();
        job.groups[0].tasks[0].volumes_from = vec![TaskName::new("srv").unwrap()];
        assert!(matches!(
            job.validate(),
            Err(ValidationError::SelfReference { .. })
        ));
    }

    #[test]
    fn rejects_unresolved_local_link() {
        let mut job = job();
        job.groups[0].tasks[0].links[0].target = LinkName::parse("db.replica").unwrap();
        assert!(job.validate().is_err());

        // Cross-job links are not resolved here.
        job.groups[0].tasks[0].links[0].target = LinkName::parse("other.db.replica").unwrap();
        assert!(job.validate().is_ok());
    }

    #[test]
    fn rejects_zero_count_and_duplicates() {
        let mut job = job();
        job.groups[1].count = 0;
        assert!(matches!(
            job.validate(),
            Err(ValidationError::InvalidCount { .. })
        ));

        let mut job = self::job();
        let dup = job.groups[0].tasks[1].clone();
        job.groups[0].tasks.push(dup);
        assert!(matches!(
            job.validate(),
            Err(ValidationError::Duplicate { kind: "task", .. })
        ));
    }

    #[test]
    fn proxy_tasks_need_target_not_image() {
        let mut job = job();
        let task = &mut job.groups[0].tasks[1];
        task.task_type = TaskType::Proxy;
        task.image = None;
        assert!(job.validate().is_err());

        job.groups[0].tasks[1].target = Some(LinkName::parse("db.main").unwrap());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn proxy_target_must_name_a_task() {
        let mut job = job();
        let task = &mut job.groups[0].tasks[1];
        task.task_type = TaskType::Proxy;
        task.image = None;
        task.target = Some(LinkName::parse("db.ghost").unwrap());
        assert!(matches!(
            job.validate(),
            Err(ValidationError::UnknownTask { .. })
        ));

        job.groups[0].tasks[1].target = Some(LinkName::parse("nope.main").unwrap());
        assert!(job.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, JOB).unwrap();
        let job = Job::from_file(&path).unwrap();
        assert_eq!(job.name, "app");
    }

    #[test]
    fn invalid_toml_fails_to_load() {
        assert!(Job::from_toml("name = \"Bad Name\"\n").is_err());
        assert!(Job::from_toml("name = \"app\"\n").is_err());
    }
}
