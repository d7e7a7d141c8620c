//! Structured-form payloads: real-estate documents the assistant hands to an edit dialog,
//! and the message a completed form is sent back as.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of document an edit dialog handles. Selected by the tag in the frame's `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormKind {
    /// Residential purchase agreement.
    Rpa,
    /// Seller counter offer.
    Sco,
    /// Deal timeline.
    Timeline,
    /// Role / email / permission grid.
    UserPermission,
}

impl FormKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "RPA" => Some(Self::Rpa),
            "SCO" => Some(Self::Sco),
            "TIMELINE" => Some(Self::Timeline),
            "USER_PERMISSION" | "USERPERMISSION" | "PERMISSION" => Some(Self::UserPermission),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Rpa => "RPA",
            Self::Sco => "SCO",
            Self::Timeline => "TIMELINE",
            Self::UserPermission => "USER_PERMISSION",
        }
    }

    fn heading(self) -> Option<&'static str> {
        match self {
            Self::Rpa => Some("# Real Estate Transaction Summary"),
            Self::Sco => Some("# Seller Counter Offer (SCO) Summary"),
            Self::Timeline => Some("# Project Timeline"),
            Self::UserPermission => None,
        }
    }
}

/// A form the user finished editing, ready to be sent as a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FormSubmission {
    pub kind: FormKind,
    pub document: Value,
}

impl FormSubmission {
    pub fn new(kind: FormKind, document: Value) -> Self {
        Self { kind, document }
    }

    /// Text sent upstream in the `message` field.
    pub fn wire_message(&self) -> String {
        match self.kind {
            FormKind::UserPermission => self.summary_markdown(),
            kind => {
                let body = serde_json::to_string_pretty(&self.document)
                    .unwrap_or_else(|_| self.document.to_string());
                format!("@@@{}@@@{}", kind.tag(), body)
            }
        }
    }

    /// Human-facing summary shown as the user's own message.
    pub fn summary_markdown(&self) -> String {
        match self.kind {
            FormKind::Rpa | FormKind::Sco => item_table(self.kind, &self.document),
            FormKind::Timeline => timeline_table(&self.document),
            FormKind::UserPermission => permission_table(&self.document),
        }
    }
}

fn item_table(kind: FormKind, doc: &Value) -> String {
    let mut md = String::new();
    if let Some(h) = kind.heading() {
        md.push_str(h);
        md.push_str("\n\n");
    }
    md.push_str("| Item | Details |\n| --- | --- |\n");
    if let Some(fields) = doc.as_object() {
        for (key, value) in fields {
            md.push_str(&format!(
                "| {} | {} |\n",
                escape_pipes(key),
                escape_pipes(&field_text(value))
            ));
        }
    }
    md
}

fn timeline_table(doc: &Value) -> String {
    let mut md = String::from("# Project Timeline\n\n");
    md.push_str("| Process Step | Owner | Due Date | Actual Close Date | Comment | Status |\n");
    md.push_str("| --- | --- | --- | --- | --- | --- |\n");
    let rows = doc
        .get("timeline_data_dict_list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let empty = Map::new();
    for row in rows {
        let row = row.as_object().unwrap_or(&empty);
        let cell = |key: &str| row.get(key).map(field_text).unwrap_or_default();
        let comment = cell("Comment").replace('\n', "<br>");
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            escape_pipes(&cell("Process Step")),
            escape_pipes(&cell("Owner")),
            cell("Due Date"),
            cell("Actual Close Date"),
            escape_pipes(&comment),
            escape_pipes(&cell("Status")),
        ));
    }
    md
}

fn permission_table(doc: &Value) -> String {
    let mut md = String::from("| Role | Email | Permissions |\n| --- | --- | --- |\n");
    for row in doc.as_array().map(Vec::as_slice).unwrap_or_default() {
        let text = |key: &str| row.get(key).map(field_text).unwrap_or_default();
        let permissions = match row.get("permission") {
            Some(Value::Array(items)) => items.iter().map(field_text).collect::<Vec<_>>().join(", "),
            Some(other) => field_text(other),
            None => String::new(),
        };
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            text("role"),
            text("email"),
            permissions
        ));
    }
    md
}

/// Scalars as text; date fields `{date, days}` as `date (N days)`.
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Object(obj) if obj.contains_key("date") => {
            let mut out = obj.get("date").map(field_text).unwrap_or_default();
            match obj.get("days") {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) if s.is_empty() => {}
                Some(days) => out.push_str(&format!(" ({} days)", field_text(days))),
            }
            out
        }
        other => other.to_string(),
    }
}

fn escape_pipes(text: &str) -> String {
    text.replace('|', "\\|")
}
