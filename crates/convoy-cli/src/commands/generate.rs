use std::path::Path;

use anyhow::Context;
use convoy_core::{Cluster, Job};
use convoy_units::{GeneratorContext, GroupSelection, SystemdRenderer, UnitData};

use super::Target;

pub fn generate(target: &Target, output: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let (job, cluster) = target.load()?;
    let selection = target.selection(&job)?;
    let units = render(&job, &cluster, &selection, target.scaling_group)?;

    match (output, format) {
        (Some(dir), _) => {
            write_units(dir, &units)?;
            println!("Wrote {} units to {}", units.len(), dir.display());
        }
        (None, "json") => println!("{}", serde_json::to_string_pretty(&units)?),
        (None, "text") => {
            for unit in &units {
                println!("# {}\n{}", unit.name, unit.content);
            }
        }
        (None, other) => anyhow::bail!("unknown format {other:?}, expected text or json"),
    }
    Ok(())
}

/// Units of every selected scaling group, in scaling group order.
fn render(
    job: &Job,
    cluster: &Cluster,
    selection: &GroupSelection,
    scaling_group: Option<u32>,
) -> anyhow::Result<Vec<UnitData>> {
    let mut units = Vec::new();
    for sg in 1..=job.max_count() {
        if scaling_group.is_some_and(|only| only != sg) {
            continue;
        }
        let ctx = GeneratorContext::new(cluster, sg);
        let rendered = convoy_units::generate(job, &ctx, selection, &SystemdRenderer)
            .with_context(|| format!("building scaling group {sg}"))?;
        units.extend(rendered);
    }
    Ok(units)
}

fn write_units(dir: &Path, units: &[UnitData]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for unit in units {
        let path = dir.join(&unit.name);
        std::fs::write(&path, &unit.content).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
name = "app"

[[groups]]
name = "web"
count = 2

[[groups.tasks]]
name = "srv"
image = "nginx:1.25"
"#;

    #[test]
    fn writes_one_file_per_unit() {
        let job = Job::from_toml(JOB).unwrap();
        let cluster: Cluster = toml_cluster();
        let units = render(&job, &cluster, &GroupSelection::all(), None).unwrap();
        assert_eq!(units.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        write_units(dir.path(), &units).unwrap();
        let written = std::fs::read_to_string(dir.path().join("app-web-srv-mn@2.service")).unwrap();
        assert_eq!(written, units[1].content);
    }

    #[test]
    fn scaling_group_filter() {
        let job = Job::from_toml(JOB).unwrap();
        let units = render(&job, &toml_cluster(), &GroupSelection::all(), Some(2)).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["app-web-srv-mn@2.service"]);
    }

    fn toml_cluster() -> Cluster {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, "stack = \"test\"\n").unwrap();
        Cluster::from_file(&path).unwrap()
    }
}
