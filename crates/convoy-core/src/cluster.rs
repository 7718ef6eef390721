//! Cluster configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::image::Image;
use crate::names::validate_name;

/// Target cluster description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Stack name, used in registry keys and log output.
    pub stack: String,
    #[serde(default)]
    pub orchestrator: Orchestrator,
    /// Address of the orchestrator API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Number of machines in the cluster.
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default)]
    pub docker: DockerOptions,
    #[serde(default)]
    pub fleet: FleetOptions,
    #[serde(default)]
    pub images: SidecarImages,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Seconds to wait for started units to reach a running state.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:49153".to_string()
}

fn default_instance_count() -> u32 {
    1
}

fn default_start_timeout_secs() -> u64 {
    300
}

/// Orchestrator backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orchestrator {
    #[default]
    Fleet,
}

/// Options for docker command lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerOptions {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// Log arguments used when a task does not set a log driver.
    #[serde(default)]
    pub logging_args: Vec<String>,
}

fn default_docker_binary() -> String {
    "/usr/bin/docker".to_string()
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            logging_args: Vec::new(),
        }
    }
}

/// Options for fleet unit generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetOptions {
    /// Units every main unit requires and starts after.
    #[serde(default = "default_base_dependencies")]
    pub base_dependencies: Vec<String>,
    /// Machine metadata rules (`key=value`) assigned one per scaling group
    /// to global groups with more than one scaling group.
    #[serde(default)]
    pub global_instance_constraints: Vec<String>,
    /// Key-value registry client used for front-end registration.
    #[serde(default = "default_registry_command")]
    pub registry_command: String,
    #[serde(default = "default_registry_prefix")]
    pub registry_prefix: String,
    /// Host directory under which instance volumes are provisioned.
    #[serde(default = "default_volume_root")]
    pub volume_root: String,
}

fn default_base_dependencies() -> Vec<String> {
    vec!["docker.service".to_string()]
}

fn default_registry_command() -> String {
    "/usr/bin/etcdctl".to_string()
}

fn default_registry_prefix() -> String {
    "/convoy".to_string()
}

fn default_volume_root() -> String {
    "/var/lib/convoy/volumes".to_string()
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            base_dependencies: default_base_dependencies(),
            global_instance_constraints: Vec::new(),
            registry_command: default_registry_command(),
            registry_prefix: default_registry_prefix(),
            volume_root: default_volume_root(),
        }
    }
}

/// Images of the helper containers the builder emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarImages {
    /// TCP forwarder for links and proxy tasks.
    pub proxy: Image,
    /// Instance volume provisioner.
    pub volume: Image,
    /// Vault secret extractor.
    pub secrets: Image,
}

fn sidecar(repository: &str, version: &str) -> Image {
    Image {
        registry: None,
        namespace: Some("convoy".to_string()),
        repository: repository.to_string(),
        version: Some(version.to_string()),
    }
}

impl Default for SidecarImages {
    fn default() -> Self {
        Self {
            proxy: sidecar("tcp-proxy", "0.4.0"),
            volume: sidecar("volume-provisioner", "0.2.1"),
            secrets: sidecar("secret-extractor", "0.3.0"),
        }
    }
}

/// Backoff for remote orchestrator calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

impl Cluster {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cluster: Cluster = toml::from_str(&content)?;
        cluster.validate()?;
        Ok(cluster)
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_name(&self.stack)?;
        if self.instance_count == 0 {
            return Err(ValidationError::InvalidCount {
                context: format!("cluster {}", self.stack),
            });
        }
        for rule in &self.fleet.global_instance_constraints {
            let valid = rule
                .split_once('=')
                .is_some_and(|(key, value)| !key.is_empty() && !value.is_empty());
            if !valid {
                return Err(ValidationError::invalid(
                    format!("cluster {}", self.stack),
                    format!("global instance constraint '{rule}' must be key=value"),
                ));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::invalid(
                format!("cluster {}", self.stack),
                "retry.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cluster: Cluster = toml::from_str("stack = \"alpha\"").unwrap();
        cluster.validate().unwrap();
        assert_eq!(cluster.orchestrator, Orchestrator::Fleet);
        assert_eq!(cluster.instance_count, 1);
        assert_eq!(cluster.fleet.base_dependencies, vec!["docker.service"]);
        assert_eq!(cluster.fleet.registry_command, "/usr/bin/etcdctl");
        assert_eq!(cluster.images.proxy.to_string(), "convoy/tcp-proxy:0.4.0");
        assert_eq!(cluster.start_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(
            &path,
            r#"
stack = "prod"
endpoint = "http://10.0.0.1:49153"
instance_count = 3

[fleet]
global_instance_constraints = ["odd=true", "even=true"]
volume_root = "/data/volumes"

[images]
proxy = "registry.local:5000/ops/proxy:1.0"
volume = "convoy/volume-provisioner:0.2.1"
secrets = "convoy/secret-extractor:0.3.0"

[retry]
max_attempts = 3
initial_backoff_ms = 10
max_backoff_ms = 100
"#,
        )
        .unwrap();

        let cluster = Cluster::from_file(&path).unwrap();
        assert_eq!(cluster.instance_count, 3);
        assert_eq!(cluster.fleet.global_instance_constraints.len(), 2);
        assert_eq!(cluster.fleet.volume_root, "/data/volumes");
        assert_eq!(
            cluster.images.proxy.registry.as_deref(),
            Some("registry.local:5000")
        );
        assert_eq!(cluster.retry.max_attempts, 3);
    }

    #[test]
    fn rejects_malformed_pool_rules() {
        let mut cluster: Cluster = toml::from_str("stack = \"alpha\"").unwrap();
        cluster.fleet.global_instance_constraints = vec!["region".to_string()];
        assert!(cluster.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Cluster::from_file(&dir.path().join("absent.toml")).is_err());
    }
}
