//! Templated assistant messages.
//!
//! The inference service can answer with `@@@` followed by a JSON object naming a display
//! template. Those messages are expanded into HTML before they reach the message list;
//! anything else is shown as sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix marking a templated (or form) message.
pub const TEMPLATE_PREFIX: &str = "@@@";

/// Column headers of the deal status table, in display order.
pub const STATUS_COLUMNS: [&str; 7] = [
    "Received earnest $",
    "Contingency removed",
    "Appraisal received",
    "Loan approved",
    "Buyer walkthrough",
    "Loan Funded",
    "Project closed",
];

/// Display theme; only affects the dashboard colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

/// Returns the expanded HTML when `content` is a recognized template, `None` otherwise.
pub fn expand_template(content: &str, mode: ThemeMode) -> Option<String> {
    let raw = content.strip_prefix(TEMPLATE_PREFIX)?;
    let payload: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("render: {} payload is not JSON: {}", TEMPLATE_PREFIX, e);
            return None;
        }
    };
    let data = payload.get("data").unwrap_or(&Value::Null);
    match payload.get("template").and_then(Value::as_str) {
        Some("html_dashboard") => Some(dashboard_html(data, mode)),
        Some("status_bar") => Some(status_table_html(data)),
        Some(other) => {
            log::warn!("render: unknown template {:?}, showing raw text", other);
            None
        }
        None => None,
    }
}

/// `expand_template` or the content unchanged.
pub fn display_text(content: &str, mode: ThemeMode) -> String {
    expand_template(content, mode).unwrap_or_else(|| content.to_string())
}

fn dashboard_html(data: &Value, mode: ThemeMode) -> String {
    let (circle, text, container) = match mode {
        ThemeMode::Dark => ("#444", "#fff", "#333"),
        ThemeMode::Light => ("#ddd", "#000", "#fff"),
    };
    let counters = [
        ("active_deals", "Active deals"),
        ("less_than_2_days_deals", "&lt;2 days deals"),
        ("closed_deals", "Closed deals"),
    ];
    let mut html = format!(
        "<div style=\"display: flex; justify-content: center; gap: 40px; text-align: center; \
         margin: 30px; background: {}; padding: 20px; border-radius: 8px; \
         font-family: var(--font-geist-sans), sans-serif;\">\n",
        container
    );
    for (key, label) in counters {
        html.push_str(&format!(
            "  <div style=\"display: flex; flex-direction: column; align-items: center;\">\n    \
             <div style=\"width: 80px; height: 80px; background: {}; border-radius: 50%; \
             display: flex; align-items: center; justify-content: center; font-weight:400; \
             color: {};\">{}</div>\n    \
             <span style=\"margin-top: 5px; color: {};\">{}</span>\n  </div>\n",
            circle,
            text,
            scalar_text(data.get(key)),
            text,
            label
        ));
    }
    html.push_str("</div>");
    html
}

/// Rows come either as an array or as `{ "data": [...] }`; each row is `{id, values:[..]}`.
fn status_table_html(input: &Value) -> String {
    let rows = input
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| input.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut html = String::from(
        "<table border=\"1\" cellspacing=\"0\" cellpadding=\"6\" style=\"border-collapse: collapse; \
         font-family: var(--font-geist-sans), sans-serif;\">\n<thead>\n<tr><th>ID</th>",
    );
    for col in STATUS_COLUMNS {
        html.push_str(&format!("<th>{}</th>", col));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");

    for row in rows {
        let values = row.get("values").and_then(Value::as_array);
        html.push_str(&format!("<tr><td>{}</td>", scalar_text(row.get("id"))));
        for i in 0..STATUS_COLUMNS.len() {
            let color = values
                .and_then(|v| v.get(i))
                .and_then(Value::as_str)
                .unwrap_or("");
            html.push_str(&format!(
                "<td style=\"background-color: {}; border: 1px solid #ccc;\"></td>",
                escape_html(color)
            ));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>");
    html
}

/// Strings without quotes, numbers as written, missing as empty. Always HTML-escaped.
fn scalar_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => escape_html(s),
        Some(other) => escape_html(&other.to_string()),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
