use std::sync::Arc;
use std::time::Duration;

use convoy_rollout::{AutoConfirm, Confirmer, Deployment, Waiter};
use convoy_scheduler::{Events, MemoryScheduler, Scheduler};
use tracing::info;

use super::{RolloutArgs, Target, watch_interrupts};
use crate::progress;
use crate::prompt::PromptConfirmer;

pub async fn run(target: &Target, args: &RolloutArgs, force: bool, simulate: bool) -> anyhow::Result<()> {
    let (job, cluster) = target.load()?;
    let options = args.options(target, &job, force)?;

    let scheduler: Arc<dyn Scheduler> = if simulate {
        info!(job = %job.name, "simulating against an empty in-memory cluster");
        Arc::new(MemoryScheduler::new())
    } else {
        convoy_scheduler::connect(&cluster)?
    };
    let confirmer: Arc<dyn Confirmer> = if args.yes {
        Arc::new(AutoConfirm::default())
    } else {
        Arc::new(PromptConfirmer)
    };

    let waiter = Arc::new(Waiter::new(Duration::from_secs(args.interrupt_window)));
    let interrupts = watch_interrupts(waiter.clone());
    let (events, rx) = Events::channel();
    let renderer = progress::spawn(rx);

    let mut deployment = Deployment::new(job, cluster, scheduler)
        .with_options(options)
        .with_confirmer(confirmer)
        .with_waiter(waiter)
        .with_events(events);
    let result = deployment.run().await;
    drop(deployment);

    interrupts.abort();
    let _ = renderer.await;
    result?;
    Ok(())
}
