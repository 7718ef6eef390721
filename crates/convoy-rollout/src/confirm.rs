//! Operator confirmation of pending changes.

use async_trait::async_trait;

use crate::summary::ChangeSummary;

/// Operator answer to a change summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
    /// Yes to this and every later prompt of the run.
    All,
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, summary: &ChangeSummary) -> Confirmation;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub Confirmation);

impl Default for AutoConfirm {
    fn default() -> Self {
        Self(Confirmation::Yes)
    }
}

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _summary: &ChangeSummary) -> Confirmation {
        self.0
    }
}
