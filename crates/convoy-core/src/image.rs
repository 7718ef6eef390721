//! Container image references.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("image component pattern compiles")
});
static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("image version pattern compiles")
});
static REGISTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.-]+(?::[0-9]+)?$").expect("image registry pattern compiles")
});

/// A docker image: `[registry/][namespace/]repository[:version]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Image {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub repository: String,
    pub version: Option<String>,
}

impl Image {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidImage {
            image: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty"));
        }

        let mut parts: Vec<&str> = raw.split('/').collect();
        let registry = if parts.len() > 1 && looks_like_registry(parts[0]) {
            Some(parts.remove(0).to_string())
        } else {
            None
        };

        let last = parts.pop().ok_or_else(|| invalid("missing repository"))?;
        let (repository, version) = match last.split_once(':') {
            Some((repo, version)) => (repo, Some(version.to_string())),
            None => (last, None),
        };
        let namespace = match parts.as_slice() {
            [] => None,
            [ns] => Some(ns.to_string()),
            _ => return Err(invalid("too many path components")),
        };

        let image = Self {
            registry,
            namespace,
            repository: repository.to_string(),
            version,
        };
        image.validate().map_err(|e| match e {
            ValidationError::InvalidImage { reason, .. } => invalid(&reason),
            other => other,
        })?;
        Ok(image)
    }

    /// Check every component independently.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidImage {
            image: self.to_string(),
            reason,
        };
        if let Some(registry) = &self.registry
            && !REGISTRY.is_match(registry)
        {
            return Err(invalid(format!("invalid registry '{registry}'")));
        }
        if let Some(namespace) = &self.namespace
            && !COMPONENT.is_match(namespace)
        {
            return Err(invalid(format!("invalid namespace '{namespace}'")));
        }
        if !COMPONENT.is_match(&self.repository) {
            return Err(invalid(format!("invalid repository '{}'", self.repository)));
        }
        if let Some(version) = &self.version
            && !VERSION.is_match(version)
        {
            return Err(invalid(format!("invalid version '{version}'")));
        }
        Ok(())
    }

    /// Version tag, `latest` when unset.
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or("latest")
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl TryFrom<String> for Image {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Image> for String {
    fn from(value: Image) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repository_only() {
        let image = Image::parse("redis").unwrap();
        assert_eq!(image.repository, "redis");
        assert!(image.registry.is_none());
        assert!(image.namespace.is_none());
        assert_eq!(image.version_or_latest(), "latest");
    }

    #[test]
    fn parse_namespace_and_version() {
        let image = Image::parse("pulcy/web:1.2.3").unwrap();
        assert_eq!(image.namespace.as_deref(), Some("pulcy"));
        assert_eq!(image.repository, "web");
        assert_eq!(image.version.as_deref(), Some("1.2.3"));
        assert_eq!(image.to_string(), "pulcy/web:1.2.3");
    }

    #[test]
    fn parse_registry_with_port() {
        let image = Image::parse("registry.example.com:5000/team/api:v2").unwrap();
        assert_eq!(image.registry.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(image.namespace.as_deref(), Some("team"));
        assert_eq!(image.to_string(), "registry.example.com:5000/team/api:v2");
    }

    #[test]
    fn rejects_bad_components() {
        assert!(Image::parse("").is_err());
        assert!(Image::parse("Web").is_err());
        assert!(Image::parse("a/b/c/d").is_err());
        assert!(Image::parse("web:bad tag").is_err());
    }
}
