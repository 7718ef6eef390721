use std::sync::Arc;

use convoy_rollout::{AutoConfirm, Confirmer, Deployment, RolloutOptions, Waiter};
use convoy_scheduler::Events;

use super::{Target, watch_interrupts};
use crate::progress;
use crate::prompt::PromptConfirmer;

pub async fn destroy(target: &Target, yes: bool) -> anyhow::Result<()> {
    let (job, cluster) = target.load()?;
    let options = RolloutOptions {
        auto_confirm: yes,
        groups: target.selection(&job)?,
        scaling_group: target.scaling_group,
        ..RolloutOptions::default()
    };
    let scheduler = convoy_scheduler::connect(&cluster)?;
    let confirmer: Arc<dyn Confirmer> = if yes {
        Arc::new(AutoConfirm::default())
    } else {
        Arc::new(PromptConfirmer)
    };

    let waiter = Arc::new(Waiter::default());
    let interrupts = watch_interrupts(waiter.clone());
    let (events, rx) = Events::channel();
    let renderer = progress::spawn(rx);

    let mut deployment = Deployment::new(job, cluster, scheduler)
        .with_options(options)
        .with_confirmer(confirmer)
        .with_waiter(waiter)
        .with_events(events);
    let result = deployment.destroy().await;
    drop(deployment);

    interrupts.abort();
    let _ = renderer.await;
    result?;
    Ok(())
}
