//! Front-end and metrics registration records.
//!
//! Registrations are written to the cluster key-value registry after the
//! main unit starts and removed before it stops. Each record is keyed by
//! service name and scaling group, so repeated writes are idempotent.

use convoy_core::{LinkType, TaskScope};
use serde::Serialize;

use crate::context::GeneratorContext;
use crate::unit::Unit;

#[derive(Debug, Serialize)]
struct FrontEndRecord<'a> {
    service: &'a str,
    scaling_group: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_check_path: Option<&'a str>,
    selectors: Vec<Selector<'a>>,
}

#[derive(Debug, Serialize)]
struct Selector<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path_prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    private: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    tcp: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    instance: bool,
}

#[derive(Debug, Serialize)]
struct MetricsRecord<'a> {
    service: &'a str,
    scaling_group: u32,
    port: u16,
    path: &'a str,
}

/// Registry key of a front-end record.
pub fn frontend_key(prefix: &str, service: &str, scaling_group: u32) -> String {
    format!("{prefix}/frontend/{service}-{scaling_group}")
}

/// Registry key of a metrics record.
pub fn metrics_key(prefix: &str, service: &str, scaling_group: u32) -> String {
    format!("{prefix}/metrics/{service}-{scaling_group}")
}

/// Add registration commands for the task's front-ends and metrics to its
/// main unit.
pub fn register(
    main: &mut Unit,
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
) -> serde_json::Result<()> {
    let task = scope.task;
    let service = scope.unit_base();
    let sg = ctx.scaling_group;
    let default_port = task.container_ports().first().copied();

    let mut selectors = Vec::new();
    for frontend in &task.public_frontends {
        selectors.push(Selector {
            domain: frontend.domain.as_deref(),
            path_prefix: frontend.path_prefix.as_deref(),
            port: frontend.port.or(default_port),
            private: false,
            tcp: false,
            instance: false,
        });
    }
    for frontend in &task.private_frontends {
        selectors.push(Selector {
            domain: None,
            path_prefix: None,
            port: frontend.port.or(default_port),
            private: true,
            tcp: frontend.mode == LinkType::Tcp,
            instance: frontend.register_instance,
        });
    }

    if !selectors.is_empty() {
        let record = FrontEndRecord {
            service: &service,
            scaling_group: sg,
            http_check_path: task.http_check_path.as_deref(),
            selectors,
        };
        let key = frontend_key(&ctx.fleet.registry_prefix, &service, sg);
        add_record(main, ctx, &key, &serde_json::to_string(&record)?);
    }

    if let Some(metrics) = &task.metrics {
        let record = MetricsRecord {
            service: &service,
            scaling_group: sg,
            port: metrics.port,
            path: &metrics.path,
        };
        let key = metrics_key(&ctx.fleet.registry_prefix, &service, sg);
        add_record(main, ctx, &key, &serde_json::to_string(&record)?);
    }
    Ok(())
}

fn add_record(main: &mut Unit, ctx: &GeneratorContext<'_>, key: &str, json: &str) {
    let command = &ctx.fleet.registry_command;
    main.start_post.push(format!("{command} set {key} '{json}'"));
    main.stop_pre.push(format!("-{command} rm {key}"));
}
