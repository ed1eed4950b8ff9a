//! Terminal rendering for mocks, rule tables and reconciliation reports.

use apimock_core::edit::leaf_fields;
use apimock_core::template::FieldAnnotation;
use apimock_core::{CompiledUrl, MockRule, display_path};
use apimock_rules::{ReconcileReport, Rule, RuleAction};
use serde_json::Value;

const MAX_VALUE_WIDTH: usize = 48;

// ── Mock collection ──

pub fn print_mock_table(mocks: &[MockRule], global_enabled: bool) {
    println!(
        "Mocking is {} ({} mocks)",
        if global_enabled { "ON" } else { "OFF" },
        mocks.len()
    );
    if mocks.is_empty() {
        return;
    }

    println!();
    println!("  {:<16} {:<4} {:<7} {:<7} PATH", "ID", "ON", "VERB", "RULE");
    for mock in mocks {
        println!(
            "  {:<16} {:<4} {:<7} {:<7} {}",
            mock.id,
            if mock.enabled { "yes" } else { "no" },
            mock.verb,
            mock.id.rule_id(),
            display_path(mock.editable_url()),
        );
    }
}

/// Vertical card for one mock: identity, then every editable body leaf.
pub fn print_mock_card(mock: &MockRule) -> anyhow::Result<()> {
    println!("Mock {}", mock.id);
    println!("  {:<14} {}", "enabled", if mock.enabled { "yes" } else { "no" });
    println!("  {:<14} {}", "verb", mock.verb);
    println!("  {:<14} {}", "endpoint", mock.editable_url());
    println!("  {:<14} {}", "template", mock.url_template);
    println!("  {:<14} {}", "rule id", mock.id.rule_id());
    println!();

    let fields = leaf_fields(&mock.body);
    if !fields.is_empty() {
        println!("Fields");
        for (path, value) in fields {
            println!("  {:<32} {}", path.to_string(), short_value(value));
        }
        println!();
    }

    println!("Body");
    println!("{}", serde_json::to_string_pretty(&mock.body)?);
    Ok(())
}

// ── Templates ──

pub fn print_compiled(compiled: &CompiledUrl) {
    println!("  {:<10} {}", "template", compiled.template);
    println!("  {:<10} {}", "path", compiled.path);
    println!("  {:<10} {}", "verb", compiled.verb);
}

pub fn print_annotations(annotations: &[FieldAnnotation]) {
    if annotations.is_empty() {
        return;
    }
    println!("Annotations");
    for entry in annotations {
        let field = entry.field.as_deref().unwrap_or("(unattached)");
        let type_tag = entry.annotation.type_tag.as_deref().unwrap_or("-");
        let note = entry.annotation.description.as_deref().unwrap_or("");
        println!("  {field:<24} {type_tag:<10} {note}");
    }
    println!();
}

// ── Rule table ──

pub fn print_rules(rules: &[Rule]) {
    if rules.is_empty() {
        println!("No dynamic rules installed.");
        return;
    }
    println!("  {:<7} {:<4} {:<9} FILTER", "ID", "PRI", "ACTION");
    for rule in rules {
        let action = match rule.action {
            RuleAction::Redirect { .. } => "redirect",
            RuleAction::Block => "block",
        };
        println!(
            "  {:<7} {:<4} {:<9} {}",
            rule.id, rule.priority, action, rule.condition.url_filter
        );
    }
}

pub fn print_report(report: &ReconcileReport) {
    println!(
        "Rules synced: {} installed, {} removed{}",
        report.added.len(),
        report.removed.len(),
        if report.global_enabled { "" } else { " (mocking is off)" }
    );
    for id in &report.skipped {
        println!("  skipped mock {id}: its endpoint cannot be expressed as a rule");
    }
}

// ── Helpers ──

fn short_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    };
    if text.chars().count() <= MAX_VALUE_WIDTH {
        return text;
    }
    let cut: String = text.chars().take(MAX_VALUE_WIDTH - 3).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_value_truncates_long_text() {
        assert_eq!(short_value(&json!(5)), "5");
        assert_eq!(short_value(&json!("cam")), "\"cam\"");

        let long = short_value(&json!("x".repeat(100)));
        assert_eq!(long.chars().count(), MAX_VALUE_WIDTH);
        assert!(long.ends_with("..."));
    }
}
