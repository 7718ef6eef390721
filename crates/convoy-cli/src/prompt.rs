//! Interactive confirmation.

use async_trait::async_trait;
use convoy_rollout::{ChangeSummary, Confirmation, Confirmer};
use dialoguer::Select;
use tracing::warn;

const CHOICES: [&str; 3] = ["yes", "no", "all"];

/// Asks on the terminal with a yes/no/all select.
pub struct PromptConfirmer;

#[async_trait]
impl Confirmer for PromptConfirmer {
    async fn confirm(&self, summary: &ChangeSummary) -> Confirmation {
        let title = match summary.scaling_group {
            Some(sg) => format!("Changes for scaling group {sg}:"),
            None => "Changes:".to_string(),
        };
        let table = summary.to_string();

        let answer = tokio::task::spawn_blocking(move || {
            eprintln!("{title}\n{table}");
            Select::new()
                .with_prompt("Apply these changes?")
                .items(&CHOICES)
                .default(0)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(0)) => Confirmation::Yes,
            Ok(Ok(2)) => Confirmation::All,
            Ok(Ok(_)) => Confirmation::No,
            Ok(Err(e)) => {
                warn!(error = %e, "confirmation prompt failed, treating as no");
                Confirmation::No
            }
            Err(e) => {
                warn!(error = %e, "confirmation prompt panicked, treating as no");
                Confirmation::No
            }
        }
    }
}
