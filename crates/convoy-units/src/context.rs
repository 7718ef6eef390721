//! Inputs that parameterize a unit build.

use convoy_core::{Cluster, DockerOptions, FleetOptions, SidecarImages};

/// Everything a build needs besides the job itself.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    /// 1-based scaling group being built.
    pub scaling_group: u32,
    /// Machines in the cluster.
    pub instance_count: u32,
    pub docker: &'a DockerOptions,
    pub fleet: &'a FleetOptions,
    pub images: &'a SidecarImages,
}

impl<'a> GeneratorContext<'a> {
    pub fn new(cluster: &'a Cluster, scaling_group: u32) -> Self {
        Self {
            scaling_group,
            instance_count: cluster.instance_count,
            docker: &cluster.docker,
            fleet: &cluster.fleet,
            images: &cluster.images,
        }
    }
}
