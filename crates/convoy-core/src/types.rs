//! Value objects owned by tasks: volumes, secrets, links, constraints,
//! front-ends.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::names::LinkName;

/// What a task runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Long running container, restarted on failure.
    #[default]
    Service,
    /// Runs to completion once per start.
    Oneshot,
    /// Forwards its ports to another task instead of running an image.
    Proxy,
}

/// Restart coupling between the tasks of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Tasks restart independently.
    #[default]
    Default,
    /// A restart of any task restarts every task in the group.
    All,
}

/// A volume mounted into a task container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Mount path inside the container.
    pub path: String,
    /// Host directory for a local mount. Unset means a managed instance volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    /// Docker mount options, e.g. `ro`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Volume {
    pub fn is_local(&self) -> bool {
        self.host_path.is_some()
    }

    pub fn validate(&self, context: &str) -> Result<(), ValidationError> {
        if !self.path.starts_with('/') {
            return Err(ValidationError::invalid(
                context,
                format!("volume path '{}' must be absolute", self.path),
            ));
        }
        if let Some(host) = &self.host_path
            && !host.starts_with('/')
        {
            return Err(ValidationError::invalid(
                context,
                format!("volume host path '{host}' must be absolute"),
            ));
        }
        Ok(())
    }
}

/// Where an extracted secret ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretTarget<'a> {
    File(&'a str),
    Environment(&'a str),
}

/// A vault secret injected into a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Vault path, optionally with `#field`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl Secret {
    pub fn target(&self) -> Option<SecretTarget<'_>> {
        match (&self.file, &self.environment) {
            (Some(file), None) => Some(SecretTarget::File(file)),
            (None, Some(var)) => Some(SecretTarget::Environment(var)),
            _ => None,
        }
    }

    pub fn validate(&self, context: &str) -> Result<(), ValidationError> {
        if self.path.is_empty() {
            return Err(ValidationError::invalid(context, "secret path is empty"));
        }
        match self.target() {
            Some(SecretTarget::File(file)) if !file.starts_with('/') => Err(
                ValidationError::invalid(context, format!("secret file '{file}' must be absolute")),
            ),
            Some(_) => Ok(()),
            None => Err(ValidationError::invalid(
                context,
                format!(
                    "secret '{}' needs exactly one of file or environment",
                    self.path
                ),
            )),
        }
    }
}

/// Protocol of a link between tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[default]
    Http,
    Tcp,
}

/// A dependency on another task, possibly in another job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub target: LinkName,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
    /// Ports forwarded for TCP links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
}

impl Link {
    pub fn validate(&self, context: &str) -> Result<(), ValidationError> {
        if self.link_type == LinkType::Tcp && self.ports.is_empty() {
            return Err(ValidationError::invalid(
                context,
                format!("tcp link to '{}' needs at least one port", self.target),
            ));
        }
        Ok(())
    }
}

/// Attribute a placement constraint applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintAttribute<'a> {
    /// `meta.<key>`: machine metadata must match.
    Meta(&'a str),
    /// `node.id`: pin to one machine.
    NodeId,
}

/// A placement predicate, e.g. `meta.region = "eu"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub value: String,
}

impl Constraint {
    pub fn parse_attribute(&self, context: &str) -> Result<ConstraintAttribute<'_>, ValidationError> {
        if self.attribute == "node.id" {
            return Ok(ConstraintAttribute::NodeId);
        }
        match self.attribute.strip_prefix("meta.") {
            Some(key) if !key.is_empty() => Ok(ConstraintAttribute::Meta(key)),
            _ => Err(ValidationError::UnknownConstraint {
                context: context.to_string(),
                attribute: self.attribute.clone(),
            }),
        }
    }
}

/// Check that a constraint list names each attribute at most once.
pub fn validate_constraints(constraints: &[Constraint], context: &str) -> Result<(), ValidationError> {
    for (i, constraint) in constraints.iter().enumerate() {
        constraint.parse_attribute(context)?;
        if constraints[..i]
            .iter()
            .any(|c| c.attribute == constraint.attribute)
        {
            return Err(ValidationError::DuplicateConstraint {
                context: context.to_string(),
                attribute: constraint.attribute.clone(),
            });
        }
    }
    Ok(())
}

/// Merge constraint lists; later lists override earlier ones per attribute.
pub fn merge_constraints<'a>(layers: &[&'a [Constraint]]) -> Vec<&'a Constraint> {
    let mut merged: Vec<&Constraint> = Vec::new();
    for layer in layers {
        for constraint in layer.iter() {
            match merged.iter_mut().find(|c| c.attribute == constraint.attribute) {
                Some(slot) => *slot = constraint,
                None => merged.push(constraint),
            }
        }
    }
    merged
}

/// Public HTTP routing registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicFrontEnd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Container port to route to; the first task port when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Private (in-cluster) routing registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateFrontEnd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub mode: LinkType,
    /// Also register an instance specific name (`<sg>.<task>...`).
    #[serde(default)]
    pub register_instance: bool,
}

/// Metrics scrape registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
