//! Human readable results of config operations.
use colored::Colorize;

use crate::Action;

/// Outcome of one definition during `create` or `delete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Created,
    /// The resource already existed, so `create` left it alone.
    Skipped,
    Deleted,
    /// The provider reported that the resource does not exist.
    Absent,
    Failed,
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Created => "created",
            Status::Skipped => "skipped",
            Status::Deleted => "deleted",
            Status::Absent => "absent",
            Status::Failed => "failed",
        })
    }
}

impl Status {
    fn colored(&self) -> colored::ColoredString {
        let label = self.to_string();
        match self {
            Status::Created | Status::Deleted => label.green(),
            Status::Skipped | Status::Absent => label.yellow(),
            Status::Failed => label.red().bold(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub name: String,
    pub status: Status,
    /// ARN of a created resource, or the provider's message.
    pub detail: String,
}

/// The per-definition results of running one action on one config.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub kind: &'static str,
    pub action: Action,
    pub entries: Vec<Entry>,
}

impl Report {
    pub fn new(kind: &'static str, action: Action) -> Self {
        Report {
            kind,
            action,
            entries: vec![],
        }
    }

    pub fn push(&mut self, name: impl Into<String>, status: Status, detail: impl Into<String>) {
        let entry = Entry {
            name: name.into(),
            status,
            detail: detail.into(),
        };
        match entry.status {
            Status::Failed => log::error!(
                "{} {} '{}': {}",
                self.action,
                self.kind,
                entry.name,
                entry.detail
            ),
            _ => log::info!(
                "{} {} '{}': {}",
                self.action,
                self.kind,
                entry.name,
                entry.status
            ),
        }
        self.entries.push(entry);
    }

    /// Returns `true` when no entry failed.
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.status != Status::Failed)
    }

    pub fn count(&self, status: Status) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl core::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}:", self.action, self.kind)?;
        if self.entries.is_empty() {
            writeln!(f, "  (no definitions)")?;
        }
        for entry in &self.entries {
            write!(f, "  {:<8} {}", entry.status.colored(), entry.name)?;
            if entry.detail.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, " {}", entry.detail)?;
            }
        }
        Ok(())
    }
}

/// Remote resources of one kind, as rows of named attribute objects.
///
/// Renders as a table with one row per resource and one column per attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    pub kind: &'static str,
    pub rows: Vec<(String, serde_json::Value)>,
}

impl Listing {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names, in order of first appearance.
    fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = vec![];
        for (_, value) in &self.rows {
            if let serde_json::Value::Object(map) = value {
                for key in map.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }
        columns
    }
}

fn cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl core::fmt::Display for Listing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "No {} resources found", self.kind);
        }
        let columns = self.columns();
        let mut table: Vec<Vec<String>> = vec![];
        table.push(
            std::iter::once(String::new())
                .chain(columns.iter().cloned())
                .collect(),
        );
        for (name, value) in &self.rows {
            table.push(
                std::iter::once(name.clone())
                    .chain(columns.iter().map(|c| cell(value.get(c))))
                    .collect(),
            );
        }
        let widths = (0..=columns.len())
            .map(|i| table.iter().map(|row| row[i].chars().count()).max().unwrap_or(0))
            .collect::<Vec<_>>();
        for row in table {
            let line = row
                .iter()
                .zip(widths.iter().copied())
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join("  ");
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn listing_renders_union_of_columns() {
        let listing = Listing {
            kind: "policy",
            rows: vec![
                (
                    "alpha".to_owned(),
                    serde_json::json!({"Arn": "arn:a", "Count": 1}),
                ),
                (
                    "b".to_owned(),
                    serde_json::json!({"Arn": "arn:bb", "Path": "/"}),
                ),
            ],
        };
        let expected = "       Arn     Count  Path\n\
                        alpha  arn:a   1\n\
                        b      arn:bb         /\n";
        pretty_assertions::assert_eq!(expected, listing.to_string());
    }

    #[test]
    fn empty_listing() {
        let listing = Listing {
            kind: "queue",
            rows: vec![],
        };
        assert_eq!("No queue resources found\n", listing.to_string());
    }

    #[test]
    fn report_success_tracks_failures() {
        let mut report = Report::new("role", Action::Create);
        report.push("a", Status::Created, "arn:a");
        report.push("b", Status::Skipped, "");
        assert!(report.is_success());
        report.push("c", Status::Failed, "boom");
        assert!(!report.is_success());
        assert_eq!(1, report.count(Status::Created));
        assert_eq!("boom", report.get("c").unwrap().detail);
    }
}
