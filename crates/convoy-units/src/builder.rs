//! Task group → unit chains.
//!
//! Building is a pure function of the job, the group, and the
//! [`GeneratorContext`]. Tasks are visited in name order so the output is
//! stable across runs.

use convoy_core::{
    ExpandScope, Job, Link, LinkType, RestartPolicy, SecretTarget, TaskGroup, TaskName, TaskScope,
    TaskType, ValidationError, Volume, expand, expand_all,
};
use tracing::debug;

use crate::context::GeneratorContext;
use crate::error::{BuildError, BuildResult};
use crate::placement;
use crate::registry;
use crate::unit::{Unit, UnitChain, UnitNaming, UnitRole};

const STOP_TIMEOUT: &str = "10";
const SECRETS_ROOT: &str = "/tmp/convoy-secrets";

/// Build every unit chain of `group` for the context's scaling group.
///
/// A scaling group above the group's count yields no chains. Scaling group
/// 0 is rejected.
pub fn build_group(
    job: &Job,
    group: &TaskGroup,
    ctx: &GeneratorContext<'_>,
) -> BuildResult<Vec<UnitChain>> {
    if ctx.scaling_group == 0 {
        return Err(BuildError::InvalidScalingGroup);
    }
    if ctx.scaling_group > group.count {
        debug!(
            job = %job.name,
            group = %group.name,
            scaling_group = ctx.scaling_group,
            count = group.count,
            "scaling group beyond group count"
        );
        return Ok(Vec::new());
    }

    let mut chains = Vec::new();
    for task in group.sorted_tasks() {
        let scope = TaskScope { job, group, task };
        let (chain, timer) = build_task(&scope, ctx)?;
        chains.push(chain);
        chains.extend(timer);
    }
    compose(&mut chains, job, group, ctx)?;

    debug!(
        job = %job.name,
        group = %group.name,
        scaling_group = ctx.scaling_group,
        chains = chains.len(),
        "built group"
    );
    Ok(chains)
}

/// Build the chain of one task plus its optional timer chain.
fn build_task(
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
) -> BuildResult<(UnitChain, Option<UnitChain>)> {
    let task = scope.task;
    let naming = UnitNaming::new(scope, ctx.scaling_group);
    let mut units = Vec::new();

    for (i, link) in tcp_links(&task.links).enumerate() {
        units.push(proxy_unit(scope, ctx, &naming, i, link));
    }
    for (i, volume) in instance_volumes(&task.volumes).enumerate() {
        units.push(volume_unit(scope, ctx, &naming, i, volume));
    }
    let sidekicks: Vec<String> = units.iter().map(|u| u.full_name.clone()).collect();

    let mut main = main_unit(scope, ctx, &naming)?;
    for dependency in &ctx.fleet.base_dependencies {
        main.depends_on(dependency.as_str());
    }
    for sidekick in sidekicks {
        main.depends_on(sidekick);
    }
    for name in &task.volumes_from {
        main.depends_on(sibling(scope, name, ctx)?.full_name(UnitRole::Main));
    }
    registry::register(&mut main, scope, ctx).map_err(|e| BuildError::Registration {
        context: scope.context(),
        reason: e.to_string(),
    })?;
    let main_name = main.full_name.clone();
    units.push(main);

    let mut chain = UnitChain::new(task.name.clone(), units);
    placement::apply(&mut chain, scope, ctx)?;

    let timer = match &task.timer {
        Some(calendar) => {
            let description = format!("Timer for {}", scope.context());
            let mut timer = Unit::new(&naming, UnitRole::Timer, description);
            timer.settings.insert("OnCalendar".to_string(), calendar.clone());
            timer.settings.insert("Unit".to_string(), main_name);
            let mut chain = UnitChain::new(task.name.clone(), vec![timer]);
            placement::apply(&mut chain, scope, ctx)?;
            Some(chain)
        }
        None => None,
    };

    Ok((chain, timer))
}

/// Link chains and add group-wide ordering, coupling, and co-location.
fn compose(
    chains: &mut [UnitChain],
    job: &Job,
    group: &TaskGroup,
    ctx: &GeneratorContext<'_>,
) -> BuildResult<()> {
    for chain in chains.iter_mut() {
        chain.link();
    }

    if group.restart == RestartPolicy::All {
        let mains: Vec<String> = chains
            .iter()
            .filter_map(UnitChain::main)
            .map(|u| u.full_name.clone())
            .collect();
        for main in chains.iter_mut().filter_map(UnitChain::main_mut) {
            for other in &mains {
                if *other != main.full_name {
                    main.part_of.insert(other.clone());
                }
            }
        }
    }

    for chain in chains.iter_mut() {
        let Some(task) = group.task(chain.task().as_str()) else {
            continue;
        };
        let scope = TaskScope { job, group, task };
        let mut ordering = Vec::with_capacity(task.after.len());
        for name in &task.after {
            ordering.push(sibling(&scope, name, ctx)?.full_name(UnitRole::Main));
        }
        if let Some(main) = chain.main_mut() {
            main.after.extend(ordering);
        }
    }

    if !group.global {
        let anchor = chains
            .first()
            .and_then(|c| c.units().first())
            .map(|u| u.full_name.clone());
        if let Some(anchor) = anchor {
            for unit in chains.iter_mut().flat_map(|c| c.units_mut().iter_mut()) {
                if unit.full_name != anchor {
                    unit.machine_of = Some(anchor.clone());
                }
            }
        }
    }
    Ok(())
}

fn tcp_links(links: &[Link]) -> impl Iterator<Item = &Link> {
    links.iter().filter(|l| l.link_type == LinkType::Tcp)
}

fn instance_volumes(volumes: &[Volume]) -> impl Iterator<Item = &Volume> {
    volumes.iter().filter(|v| !v.is_local())
}

/// Naming of another task in the same group and scaling group.
fn sibling(
    scope: &TaskScope<'_>,
    name: &TaskName,
    ctx: &GeneratorContext<'_>,
) -> BuildResult<UnitNaming> {
    let task = scope
        .group
        .task(name.as_str())
        .ok_or_else(|| ValidationError::UnknownTask {
            context: scope.context(),
            name: name.to_string(),
        })?;
    let scope = TaskScope { task, ..*scope };
    Ok(UnitNaming::new(&scope, ctx.scaling_group))
}

fn expand_scope<'a>(scope: &TaskScope<'a>, ctx: &GeneratorContext<'_>) -> ExpandScope<'a> {
    ExpandScope::task(
        &scope.job.name,
        &scope.group.name,
        &scope.task.name,
        ctx.scaling_group,
    )
}

/// Host directory of an instance volume.
pub fn instance_volume_path(
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
    volume: &Volume,
) -> String {
    let escaped = volume.path.trim_matches('/').replace('/', "_");
    format!(
        "{}/{}/{}/{}/{}/{}",
        ctx.fleet.volume_root.trim_end_matches('/'),
        scope.job.name,
        scope.group.name,
        scope.task.name,
        ctx.scaling_group,
        escaped
    )
}

/// Commands shared by every container unit: clear leftovers, pull.
fn container_lifecycle(unit: &mut Unit, ctx: &GeneratorContext<'_>, container: &str, image: &str) {
    let docker = &ctx.docker.docker_binary;
    unit.start_pre
        .push(format!("-{docker} stop -t {STOP_TIMEOUT} {container}"));
    unit.start_pre.push(format!("-{docker} rm -f {container}"));
    unit.start_pre.push(format!("{docker} pull {image}"));
    unit.stop
        .push(format!("-{docker} stop -t {STOP_TIMEOUT} {container}"));
    unit.settings
        .insert("TimeoutStartSec".to_string(), "0".to_string());
}

fn docker_run(ctx: &GeneratorContext<'_>, container: &str) -> Vec<String> {
    vec![
        ctx.docker.docker_binary.clone(),
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container.to_string(),
    ]
}

/// Forwarding spec understood by the proxy image: `<port>:<host>:<port>`.
fn forward_args(domain: &str, ports: &[u16]) -> Vec<String> {
    ports
        .iter()
        .map(|port| format!("{port}:{domain}:{port}"))
        .collect()
}

fn proxy_unit(
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
    naming: &UnitNaming,
    index: usize,
    link: &Link,
) -> Unit {
    let role = UnitRole::Proxy(index);
    let container = naming.container_name(role);
    let image = ctx.images.proxy.to_string();
    let domain = link.target.private_domain(&scope.job.name);

    let mut unit = Unit::new(
        naming,
        role,
        format!("Proxy {index} of {} to {domain}", scope.context()),
    );
    container_lifecycle(&mut unit, ctx, &container, &image);

    let mut start = docker_run(ctx, &container);
    start.push(image);
    start.extend(forward_args(&domain, &link.ports));
    unit.start = start;
    unit.settings
        .insert("Restart".to_string(), "always".to_string());
    unit
}

fn volume_unit(
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
    naming: &UnitNaming,
    index: usize,
    volume: &Volume,
) -> Unit {
    let role = UnitRole::Volume(index);
    let container = naming.container_name(role);
    let image = ctx.images.volume.to_string();
    let root = ctx.fleet.volume_root.trim_end_matches('/');
    let host_path = instance_volume_path(scope, ctx, volume);

    let mut unit = Unit::new(
        naming,
        role,
        format!("Volume {} of {}", volume.path, scope.context()),
    );
    container_lifecycle(&mut unit, ctx, &container, &image);

    let mut start = docker_run(ctx, &container);
    start.push("--privileged".to_string());
    start.push("-v".to_string());
    start.push(format!("{root}:{root}:shared"));
    start.push(image);
    start.push("--target".to_string());
    start.push(host_path);
    unit.start = start;
    unit.settings
        .insert("Restart".to_string(), "always".to_string());
    unit
}

/// Secret extraction commands and the docker arguments that mount the
/// results.
fn secrets(
    unit: &mut Unit,
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
    container: &str,
) -> Vec<String> {
    let task = scope.task;
    if task.secrets.is_empty() {
        return Vec::new();
    }

    let docker = &ctx.docker.docker_binary;
    let image = &ctx.images.secrets;
    let dir = format!("{SECRETS_ROOT}/{container}");
    let env_file = format!("{dir}/env");

    unit.start_pre.push(format!("-/bin/rm -rf {dir}"));
    unit.start_pre.push(format!("/bin/mkdir -p {dir}"));

    let mut args = Vec::new();
    let mut has_env = false;
    for (i, secret) in task.secrets.iter().enumerate() {
        match secret.target() {
            Some(SecretTarget::File(file)) => {
                let target = format!("{dir}/{i}");
                unit.start_pre.push(format!(
                    "{docker} run --rm -v {dir}:{dir} {image} extract file --target {target} {}",
                    secret.path
                ));
                args.push("-v".to_string());
                args.push(format!("{target}:{file}:ro"));
            }
            Some(SecretTarget::Environment(var)) => {
                unit.start_pre.push(format!(
                    "{docker} run --rm -v {dir}:{dir} {image} extract env --target {env_file} --key {var} {}",
                    secret.path
                ));
                has_env = true;
            }
            None => {}
        }
    }
    if has_env {
        args.push("--env-file".to_string());
        args.push(env_file);
    }
    unit.stop_post.push(format!("-/bin/rm -rf {dir}"));
    args
}

fn main_unit(
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
    naming: &UnitNaming,
) -> BuildResult<Unit> {
    let task = scope.task;
    let vars = expand_scope(scope, ctx);
    let role = UnitRole::Main;
    let container = naming.container_name(role);

    let image = match task.task_type {
        TaskType::Proxy => &ctx.images.proxy,
        TaskType::Service | TaskType::Oneshot => task.image.as_ref().ok_or_else(|| {
            ValidationError::Invalid {
                context: scope.context(),
                reason: "task needs an image".to_string(),
            }
        })?,
    };
    let image = image.to_string();

    let mut unit = Unit::new(naming, role, format!("Main unit of {}", scope.context()));
    container_lifecycle(&mut unit, ctx, &container, &image);
    let secret_args = secrets(&mut unit, scope, ctx, &container);

    let mut args = docker_run(ctx, &container);

    for port in &task.ports {
        args.push("-p".to_string());
        args.push(expand(port, &vars)?);
    }

    for volume in &task.volumes {
        let host = match &volume.host_path {
            Some(host) => expand(host, &vars)?,
            None => instance_volume_path(scope, ctx, volume),
        };
        let mut spec = format!("{host}:{}", volume.path);
        if !volume.options.is_empty() {
            spec.push(':');
            spec.push_str(&volume.options.join(","));
        }
        args.push("-v".to_string());
        args.push(spec);
    }
    for name in &task.volumes_from {
        args.push("--volumes-from".to_string());
        args.push(sibling(scope, name, ctx)?.container_name(UnitRole::Main));
    }

    args.extend(secret_args);

    for (key, value) in &task.env {
        args.push("-e".to_string());
        args.push(format!("{key}={}", expand(value, &vars)?));
    }

    for capability in &task.capabilities {
        args.push("--cap-add".to_string());
        args.push(capability.clone());
    }

    let mut proxy_index = 0;
    for link in &task.links {
        let domain = link.target.private_domain(&scope.job.name);
        match link.link_type {
            LinkType::Tcp => {
                let proxy = naming.container_name(UnitRole::Proxy(proxy_index));
                proxy_index += 1;
                args.push("--link".to_string());
                args.push(format!("{proxy}:{domain}"));
            }
            LinkType::Http => {
                args.push("--add-host".to_string());
                args.push(format!("{domain}:${{COREOS_PRIVATE_IPV4}}"));
            }
        }
    }

    match &task.log_driver {
        Some(driver) => {
            args.push("--log-driver".to_string());
            args.push(driver.clone());
        }
        None => args.extend(ctx.docker.logging_args.iter().cloned()),
    }

    args.extend(expand_all(&task.docker_args, &vars)?);
    args.push(image);

    match (&task.task_type, &task.target) {
        (TaskType::Proxy, Some(target)) => {
            let domain = target.private_domain(&scope.job.name);
            args.extend(forward_args(&domain, &task.container_ports()));
        }
        _ => args.extend(expand_all(&task.args, &vars)?),
    }
    unit.start = args;

    match task.task_type {
        TaskType::Oneshot => {
            unit.settings
                .insert("Type".to_string(), "oneshot".to_string());
            unit.settings
                .insert("RemainAfterExit".to_string(), "no".to_string());
        }
        TaskType::Service | TaskType::Proxy => {
            unit.settings
                .insert("Restart".to_string(), "always".to_string());
            unit.settings
                .insert("RestartSec".to_string(), "1".to_string());
        }
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use convoy_core::Cluster;

    use super::*;

    fn cluster() -> Cluster {
        toml::from_str("stack = \"test\"").unwrap()
    }

    fn job(toml: &str) -> Job {
        Job::from_toml(toml).unwrap()
    }

    #[test]
    fn volume_path_escapes_container_path() {
        let job = job(
            r#"
name = "app"
[[groups]]
name = "db"
[[groups.tasks]]
name = "main"
image = "postgres"
[[groups.tasks.volumes]]
path = "/var/lib/data/"
"#,
        );
        let cluster = cluster();
        let ctx = GeneratorContext::new(&cluster, 1);
        let group = &job.groups[0];
        let scope = TaskScope {
            job: &job,
            group,
            task: &group.tasks[0],
        };
        assert_eq!(
            instance_volume_path(&scope, &ctx, &group.tasks[0].volumes[0]),
            "/var/lib/convoy/volumes/app/db/main/1/var_lib_data"
        );
    }

    #[test]
    fn forward_args_cover_every_port() {
        assert_eq!(
            forward_args("main.db.app.private", &[5432, 6432]),
            vec!["5432:main.db.app.private:5432", "6432:main.db.app.private:6432"]
        );
    }
}
