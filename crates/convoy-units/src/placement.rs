//! Machine placement for the units of one task.

use convoy_core::{ConstraintAttribute, TaskScope};

use crate::context::GeneratorContext;
use crate::error::{BuildError, BuildResult};
use crate::unit::{UnitChain, UnitRole};

/// Apply instance placement and declared constraints to every unit of a
/// task chain.
///
/// On a multi-machine cluster a global group with several scaling groups
/// takes one metadata rule per scaling group from the configured pool,
/// and the main unit of a non-global group conflicts with its siblings in
/// other scaling groups.
pub fn apply(
    chain: &mut UnitChain,
    scope: &TaskScope<'_>,
    ctx: &GeneratorContext<'_>,
) -> BuildResult<()> {
    let group = scope.group;
    let context = scope.context();

    let pool_rule = if ctx.instance_count > 1 && group.global && group.count > 1 {
        let index = ctx.scaling_group as usize - 1;
        let pool = &ctx.fleet.global_instance_constraints;
        let rule = pool.get(index).ok_or_else(|| BuildError::ConstraintPoolExhausted {
            context: context.clone(),
            scaling_group: ctx.scaling_group,
            pool: pool.len(),
        })?;
        Some(rule.clone())
    } else {
        None
    };
    let conflicts = ctx.instance_count > 1 && !group.global;

    let constraints = scope.constraints();

    for unit in chain.units_mut() {
        unit.global = group.global;
        if let Some(rule) = &pool_rule {
            unit.machine_metadata.insert(rule.clone());
        }
        if conflicts && unit.role == UnitRole::Main {
            unit.conflicts
                .insert(format!("{}@*.{}", unit.name, unit.kind.extension()));
        }
        for constraint in &constraints {
            match constraint.parse_attribute(&context)? {
                ConstraintAttribute::Meta(key) => {
                    unit.machine_metadata
                        .insert(format!("{key}={}", constraint.value));
                }
                ConstraintAttribute::NodeId => {
                    unit.machine_id = Some(constraint.value.clone());
                }
            }
        }
    }
    Ok(())
}
