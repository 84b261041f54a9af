//! CLI Output Formatting Module
//! Colorized terminal output for the rolegate commands

use colored::Colorize;

use crate::engine::observability::{HealthReport, HealthStatus};
use crate::engine::rbac::PolicyRule;

pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a table header
    pub fn table_header(columns: &[&str]) {
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(columns.iter().map(|c| c.len() + 3).sum()).bright_black());
    }

    pub fn table_row(values: &[&str]) {
        println!("  {}", values.join(" │ "));
    }

    /// Print one line per health check, colored by status
    pub fn health(report: &HealthReport) {
        Self::kv("status", &status_label(report.status));
        Self::kv("version", &report.version);
        for check in &report.checks {
            println!("  {} {:<10} {}", status_marker(check.status), check.name, check.message);
        }
    }

    pub fn rules(rules: &[PolicyRule]) {
        if rules.is_empty() {
            Self::info("No rules");
            return;
        }
        Self::table_header(&["subject", "action", "object"]);
        for rule in rules {
            Self::table_row(&[&rule.subject, &rule.action, &rule.object]);
        }
    }
}

fn status_label(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "healthy".green().to_string(),
        HealthStatus::Warning => "warning".yellow().to_string(),
        HealthStatus::Critical => "critical".red().to_string(),
    }
}

fn status_marker(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "✓".green().to_string(),
        HealthStatus::Warning => "⚠".yellow().to_string(),
        HealthStatus::Critical => "✗".red().to_string(),
    }
}

/// Plural-aware count, e.g. `1 rule`, `3 rules`.
pub fn format_count(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0, "rule"), "0 rules");
        assert_eq!(format_count(1, "rule"), "1 rule");
        assert_eq!(format_count(21, "api"), "21 apis");
    }
}
