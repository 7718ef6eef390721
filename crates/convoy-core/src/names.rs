//! Validated identifiers for jobs, groups, and tasks.
//!
//! Names double as unit-name segments, so they are restricted to
//! lowercase alphanumerics and underscores. `-`, `.` and `/` are reserved
//! as separators.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{1,48}$").expect("name pattern compiles"));

/// Check a raw string against the identifier pattern.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

macro_rules! define_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate a name.
            pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
                let name = name.into();
                validate_name(&name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

define_name!(
    /// Name of a job.
    JobName
);
define_name!(
    /// Name of a task group, unique within its job.
    GroupName
);
define_name!(
    /// Name of a task, unique within its group.
    TaskName
);

/// Reference to a task, possibly in another job.
///
/// Written as `<group>.<task>` (same job) or `<job>.<group>.<task>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkName {
    pub job: Option<JobName>,
    pub group: GroupName,
    pub task: TaskName,
}

impl LinkName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = raw.split('.').collect();
        let invalid = || ValidationError::InvalidLinkName(raw.to_string());
        match parts.as_slice() {
            [group, task] => Ok(Self {
                job: None,
                group: GroupName::new(*group).map_err(|_| invalid())?,
                task: TaskName::new(*task).map_err(|_| invalid())?,
            }),
            [job, group, task] => Ok(Self {
                job: Some(JobName::new(*job).map_err(|_| invalid())?),
                group: GroupName::new(*group).map_err(|_| invalid())?,
                task: TaskName::new(*task).map_err(|_| invalid())?,
            }),
            _ => Err(invalid()),
        }
    }

    /// Job this link points into, defaulting to `current`.
    pub fn job_or<'a>(&'a self, current: &'a JobName) -> &'a JobName {
        self.job.as_ref().unwrap_or(current)
    }

    /// Whether the link targets a task of `current`.
    pub fn is_local_to(&self, current: &JobName) -> bool {
        self.job.as_ref().is_none_or(|job| job == current)
    }

    /// Private DNS name of the linked task's service.
    pub fn private_domain(&self, current: &JobName) -> String {
        format!("{}.{}.{}.private", self.task, self.group, self.job_or(current))
    }
}

impl TryFrom<String> for LinkName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LinkName> for String {
    fn from(value: LinkName) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for LinkName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.job {
            Some(job) => write!(f, "{job}.{}.{}", self.group, self.task),
            None => write!(f, "{}.{}", self.group, self.task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(JobName::new("app").is_ok());
        assert!(GroupName::new("0").is_ok());
        assert!(TaskName::new("db_primary").is_ok());
    }

    #[test]
    fn rejects_separators_and_case() {
        for bad in ["", "web-1", "a.b", "a/b", "Web", &"x".repeat(49)] {
            assert!(
                matches!(TaskName::new(bad), Err(ValidationError::InvalidName(_))),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn names_deserialize_with_validation() {
        #[derive(serde::Deserialize)]
        struct Doc {
            name: JobName,
        }

        let ok: Doc = toml::from_str("name = \"app\"").unwrap();
        assert_eq!(ok.name, "app");
        assert!(toml::from_str::<Doc>("name = \"Bad\"").is_err());
    }

    #[test]
    fn parses_link_names() {
        let local = LinkName::parse("db.main").unwrap();
        assert!(local.job.is_none());
        assert_eq!(local.to_string(), "db.main");

        let remote = LinkName::parse("other.db.main").unwrap();
        assert_eq!(remote.job.as_ref().unwrap(), "other");

        let job = JobName::new("app").unwrap();
        assert!(local.is_local_to(&job));
        assert!(!remote.is_local_to(&job));
        assert_eq!(local.private_domain(&job), "main.db.app.private");
        assert_eq!(remote.private_domain(&job), "main.db.other.private");
    }

    #[test]
    fn rejects_malformed_link_names() {
        for bad in ["main", "a.b.c.d", "A.b", "a..b"] {
            assert!(LinkName::parse(bad).is_err(), "expected '{bad}' to be rejected");
        }
    }
}
