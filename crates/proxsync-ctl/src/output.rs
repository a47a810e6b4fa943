// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Human-readable and JSON rendering of command results.

use proxsync_core::{Outcome, SyncReport};
use proxsync_source::SourceInstance;
use serde::Serialize;

/// Truncate for table display on character boundaries.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line per guest.
pub fn instance_table(instances: &[SourceInstance]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:>6}  {:<28}  {:<9}  {:<8}  {:>5}  {:>8}",
        "VMID", "NAME", "KIND", "STATUS", "VCPU", "MEM MB"
    )];
    for instance in instances {
        lines.push(format!(
            "{:>6}  {:<28}  {:<9}  {:<8}  {:>5}  {:>8}",
            instance.vmid,
            truncate(&instance.name, 28),
            instance.kind.to_string(),
            instance.status.to_string(),
            instance.vcpus,
            instance
                .memory_mb
                .map_or_else(|| "-".to_string(), |m| m.to_string()),
        ));
    }
    lines
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Created => "created".to_string(),
        Outcome::Updated { changes } if changes.is_empty() => "unchanged".to_string(),
        Outcome::Updated { changes } => format!("updated ({})", changes.join(", ")),
        Outcome::OrphanMarked { at } => format!("orphaned at {}", at.format("%Y-%m-%d %H:%M:%S")),
        Outcome::Failed { reason } => format!("FAILED: {}", reason),
        Outcome::Skipped { reason } => format!("skipped: {}", reason),
    }
}

/// Outcome lines followed by warnings and the summary.
pub fn report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in &report.entries {
        lines.push(format!(
            "{:<40}  {}",
            truncate(&entry.entity.to_string(), 40),
            outcome_label(&entry.outcome)
        ));
        for warning in &entry.warnings {
            lines.push(format!("    warning: {}", warning));
        }
    }
    for warning in &report.warnings {
        lines.push(format!("warning: {}", warning));
    }
    if report.cancelled {
        lines.push("batch cancelled".to_string());
    }
    lines.push(report.summary().to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proxsync_core::EntityRef;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("web-01", 10), "web-01");
        assert_eq!(truncate("a-very-long-guest-name", 10), "a-very-...");
        assert_eq!(truncate("żółć-żółć-żółć", 8), "żółć-...");
    }

    #[test]
    fn test_report_lines() {
        let mut report = SyncReport::new(Utc::now());
        report.push(EntityRef::guest(100, "web-01"), Outcome::Created, vec![]);
        report.push(
            EntityRef::guest(101, "db-01"),
            Outcome::Updated { changes: vec![] },
            vec!["disk scsi1 has no known size; left unchanged".to_string()],
        );
        report.push(EntityRef::guest(102, "old"), Outcome::failed("conflict: taken"), vec![]);

        let lines = report_lines(&report);
        assert!(lines[0].ends_with("created"));
        assert!(lines[1].ends_with("unchanged"));
        assert!(lines[2].starts_with("    warning: disk scsi1"));
        assert!(lines[3].ends_with("FAILED: conflict: taken"));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("1 created, 1 updated, 0 orphaned, 1 failed, 0 skipped, 1 warnings")
        );
    }
}
