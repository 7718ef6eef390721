//! Convoy job model.
//!
//! A job is a tree of task groups holding containerized tasks. This crate
//! holds the validated in-memory model, `${...}` variable expansion, and the
//! cluster configuration the unit builder and scheduler consume.

pub mod cluster;
pub mod error;
pub mod expand;
pub mod image;
pub mod job;
pub mod names;
pub mod types;

pub use cluster::{Cluster, DockerOptions, FleetOptions, Orchestrator, RetrySettings, SidecarImages};
pub use error::{ValidationError, ValidationResult};
pub use expand::{ExpandScope, expand, expand_all};
pub use image::Image;
pub use job::{Job, Task, TaskGroup, TaskScope};
pub use names::{GroupName, JobName, LinkName, TaskName};
pub use types::*;
