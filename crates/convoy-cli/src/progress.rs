//! Plain line renderer for rollout events.

use convoy_scheduler::Event;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Print events until every sender is dropped.
pub fn spawn(mut rx: UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Message(message) => println!("{message}"),
                Event::Unit { unit, action } => println!("  {unit:<48} {action}"),
            }
        }
    })
}
