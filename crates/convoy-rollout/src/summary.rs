//! Change summaries shown to the operator before acting.

use std::fmt;

/// What will happen to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeAction {
    /// Loaded but no longer desired.
    Obsolete,
    Modified,
    Failed,
    New,
    /// Removed by an explicit teardown.
    Destroy,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Obsolete => "obsolete",
            Self::Modified => "modified",
            Self::Failed => "failed",
            Self::New => "new",
            Self::Destroy => "destroy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub unit: String,
    pub action: ChangeAction,
    /// Diff size, failure state, or empty.
    pub extra: String,
}

/// Rows sorted by unit name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// `None` for steps spanning scaling groups.
    pub scaling_group: Option<u32>,
    rows: Vec<ChangeRow>,
}

impl ChangeSummary {
    pub fn new(scaling_group: Option<u32>) -> Self {
        Self {
            scaling_group,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, unit: impl Into<String>, action: ChangeAction, extra: impl Into<String>) {
        let row = ChangeRow {
            unit: unit.into(),
            action,
            extra: extra.into(),
        };
        let at = self.rows.partition_point(|r| r.unit <= row.unit);
        self.rows.insert(at, row);
    }

    pub fn rows(&self) -> &[ChangeRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.rows.iter().filter(|r| r.action == action).count()
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.rows.iter().map(|r| r.unit.len()).max().unwrap_or(0);
        for row in &self.rows {
            let line = format!("{:<width$} | {:<8} | {}", row.unit, row.action, row.extra);
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_sorted_by_unit() {
        let mut summary = ChangeSummary::new(Some(1));
        summary.push("app-web-srv-mn@1.service", ChangeAction::New, "");
        summary.push("app-db-main-mn@1.service", ChangeAction::Modified, "2 lines");
        summary.push("app-cache-redis-mn@1.service", ChangeAction::Obsolete, "");

        let units: Vec<&str> = summary.rows().iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(
            units,
            vec![
                "app-cache-redis-mn@1.service",
                "app-db-main-mn@1.service",
                "app-web-srv-mn@1.service"
            ]
        );
        assert_eq!(summary.count(ChangeAction::Modified), 1);
    }

    #[test]
    fn renders_aligned_table() {
        let mut summary = ChangeSummary::new(None);
        summary.push("b.service", ChangeAction::Failed, "failed");
        summary.push("long-a.service", ChangeAction::New, "");
        assert_eq!(
            summary.to_string(),
            "b.service      | failed   | failed\nlong-a.service | new\n"
        );
    }
}
