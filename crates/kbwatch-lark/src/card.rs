//! Interactive card rendering.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use kbwatch_core::{ReportStatus, RunReport};
use serde_json::{json, Value};

/// Failed items listed individually; the rest are summarised.
pub const MAX_CARD_ITEMS: usize = 10;

/// Error text shown per item, in characters.
const MAX_ITEM_ERROR_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct CardOptions {
    pub title: String,
    pub timezone_label: String,
    pub utc_offset_hours: i32,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            title: "KB Monitor Report".to_string(),
            timezone_label: "Asia/Tokyo".to_string(),
            utc_offset_hours: 9,
        }
    }
}

fn md(content: impl Into<String>) -> Value {
    json!({ "tag": "div", "text": { "tag": "lark_md", "content": content.into() } })
}

fn hr() -> Value {
    json!({ "tag": "hr" })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `at` rendered in the configured zone, e.g. `2026-10-16 09:30:00 (Asia/Tokyo)`.
pub fn format_timestamp(at: DateTime<Utc>, options: &CardOptions) -> String {
    let offset = FixedOffset::east_opt(options.utc_offset_hours.saturating_mul(3600))
        .unwrap_or(Utc.fix());
    format!(
        "{} ({})",
        at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S"),
        options.timezone_label
    )
}

fn header(status: ReportStatus) -> (&'static str, &'static str, &'static str) {
    match status {
        ReportStatus::Ok => ("green", "✅", "No Failures"),
        ReportStatus::HasFailures => ("red", "🔴", "Failures Detected"),
        ReportStatus::Error => ("red", "🚨", "Run Failed"),
    }
}

fn summary(report: &RunReport, emoji: &str, status_text: &str) -> String {
    let mut lines = vec![
        format!("{emoji} **Status:** {status_text}"),
        format!("📊 **Total Items:** {}", report.total_items),
        format!("❌ **Failed:** {}", report.failed_count),
    ];
    if report.items.iter().any(|i| i.outcome.is_some()) {
        lines.push(format!("⚠️ **Unresolved:** {}", report.unresolved_count));
    }
    if report.retries_triggered > 0 {
        lines.push(format!("🔄 **Retries Triggered:** {}", report.retries_triggered));
    }
    lines.push(format!("⏱️ **Execution Time:** {:.1}s", report.execution_secs()));
    if let Some(error) = &report.error {
        lines.push(format!("🚨 **Error:** {error}"));
    }
    lines.join("\n")
}

/// Build the webhook payload for `report`.
///
/// `image_keys` are uploaded screenshots; when empty but the run took
/// screenshots, the card says they were kept locally.
pub fn build_card(report: &RunReport, image_keys: &[String], options: &CardOptions) -> Value {
    let (color, emoji, status_text) = header(report.status);
    let mut elements = vec![md(summary(report, emoji, status_text))];

    if !report.items.is_empty() {
        elements.push(hr());
        for (i, item) in report.items.iter().take(MAX_CARD_ITEMS).enumerate() {
            let mut text = format!(
                "**{}.** {}\n   Status: {}",
                i + 1,
                item.identifier,
                item.status_text
            );
            if let Some(error) = &item.error_text {
                text.push_str(&format!(
                    "\n   Error: {}",
                    truncate_chars(error, MAX_ITEM_ERROR_CHARS)
                ));
            }
            if let Some(outcome) = &item.outcome {
                text.push_str(&format!(
                    "\n   Retry: {outcome} ({} attempt(s))",
                    item.attempts
                ));
            }
            elements.push(md(text));
        }
        if report.items.len() > MAX_CARD_ITEMS {
            elements.push(md(format!(
                "... and {} more",
                report.items.len() - MAX_CARD_ITEMS
            )));
        }
    }

    if !image_keys.is_empty() {
        elements.push(hr());
        elements.push(md("📸 **Screenshots:**"));
        for key in image_keys {
            elements.push(json!({
                "tag": "img",
                "img_key": key,
                "alt": { "tag": "plain_text", "content": "Screenshot" }
            }));
        }
    } else if !report.screenshots.is_empty() {
        elements.push(hr());
        elements.push(md(format!(
            "📸 **Screenshots:** {} (saved locally)",
            report.screenshots.len()
        )));
    }

    elements.push(hr());
    elements.push(json!({
        "tag": "div",
        "text": {
            "tag": "plain_text",
            "content": format!("Report generated: {}", format_timestamp(report.started_at, options))
        }
    }));

    json!({
        "msg_type": "interactive",
        "card": {
            "header": {
                "title": { "tag": "plain_text", "content": format!("{} - {emoji}", options.title) },
                "template": color
            },
            "elements": elements
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kbwatch_core::ReportItem;
    use std::path::PathBuf;

    fn report(status: ReportStatus, items: usize) -> RunReport {
        RunReport {
            run_id: "run-1".to_string(),
            started_at: Utc.with_ymd_and_hms(2026, 10, 16, 0, 30, 0).unwrap(),
            status,
            total_items: 20,
            failed_count: items,
            unresolved_count: 0,
            items: (0..items)
                .map(|i| ReportItem {
                    identifier: format!("doc{i}.pdf"),
                    status_text: "失敗".to_string(),
                    error_text: None,
                    screenshot: None,
                    outcome: None,
                    attempts: 0,
                })
                .collect(),
            retries_triggered: 0,
            execution_time_ms: 12_340,
            error: None,
            screenshots: vec![],
        }
    }

    fn contents(card: &Value) -> Vec<String> {
        card["card"]["elements"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["text"]["content"].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn clean_run_is_green() {
        let card = build_card(&report(ReportStatus::Ok, 0), &[], &CardOptions::default());
        assert_eq!(card["msg_type"], "interactive");
        assert_eq!(card["card"]["header"]["template"], "green");
        let text = contents(&card).join("\n");
        assert!(text.contains("No Failures"));
        assert!(text.contains("**Total Items:** 20"));
        assert!(text.contains("12.3s"));
        assert!(!text.contains("Retries Triggered"));
    }

    #[test]
    fn failures_are_red_and_capped_at_ten() {
        let card = build_card(
            &report(ReportStatus::HasFailures, 12),
            &[],
            &CardOptions::default(),
        );
        assert_eq!(card["card"]["header"]["template"], "red");
        let text = contents(&card);
        assert!(text.iter().any(|t| t.starts_with("**10.** doc9.pdf")));
        assert!(!text.iter().any(|t| t.starts_with("**11.**")));
        assert!(text.iter().any(|t| t == "... and 2 more"));
    }

    #[test]
    fn error_run_shows_error_line() {
        let mut r = report(ReportStatus::Error, 0);
        r.error = Some("no result table found (tried: tbody tr)".to_string());
        let card = build_card(&r, &[], &CardOptions::default());
        assert_eq!(card["card"]["header"]["template"], "red");
        let text = contents(&card).join("\n");
        assert!(text.contains("Run Failed"));
        assert!(text.contains("no result table found"));
    }

    #[test]
    fn item_error_text_is_truncated_by_chars() {
        let mut r = report(ReportStatus::HasFailures, 1);
        r.items[0].error_text = Some("エ".repeat(150));
        r.items[0].outcome = Some("still_failed".to_string());
        r.items[0].attempts = 3;
        let card = build_card(&r, &[], &CardOptions::default());
        let item = contents(&card)
            .into_iter()
            .find(|t| t.starts_with("**1.**"))
            .unwrap();
        assert!(item.contains(&format!("Error: {}...", "エ".repeat(100))));
        assert!(!item.contains(&"エ".repeat(101)));
        assert!(item.contains("Retry: still_failed (3 attempt(s))"));
    }

    #[test]
    fn images_or_local_fallback() {
        let mut r = report(ReportStatus::Ok, 0);
        r.screenshots = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];

        let with_keys = build_card(&r, &["img_v3_1".to_string()], &CardOptions::default());
        let images: Vec<&Value> = with_keys["card"]["elements"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["tag"] == "img")
            .collect();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["img_key"], "img_v3_1");

        let without = build_card(&r, &[], &CardOptions::default());
        assert!(contents(&without)
            .iter()
            .any(|t| t.contains("2 (saved locally)")));
    }

    #[test]
    fn timestamp_uses_configured_offset() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 0, 30, 0).unwrap();
        assert_eq!(
            format_timestamp(at, &CardOptions::default()),
            "2026-10-16 09:30:00 (Asia/Tokyo)"
        );
        let utc = CardOptions {
            timezone_label: "UTC".to_string(),
            utc_offset_hours: 0,
            ..CardOptions::default()
        };
        assert_eq!(format_timestamp(at, &utc), "2026-10-16 00:30:00 (UTC)");
    }
}
