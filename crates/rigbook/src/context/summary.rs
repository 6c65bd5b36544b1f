//! The structured running summary and its validation gate.
//!
//! A summary only replaces history after it parses as JSON, passes the JSON
//! Schema derived from [`Summary`] (all four keys present with the right
//! shapes), and does not throw away a non-empty prior summary.

use crate::json_schema_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable facts distilled from earlier turns.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Bookings made, cancellations done, choices the user confirmed.
    pub decisions: Vec<String>,
    /// Requirements the user stated: dates, subjects, test types, limits.
    pub constraints: Vec<String>,
    /// Requests not yet satisfied.
    pub open_tasks: Vec<String>,
    /// Anything else needed to continue the conversation.
    pub context: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummaryError {
    #[error("summary is not valid JSON: {0}")]
    NotJson(String),
    #[error("summary failed schema validation: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("summary would discard the existing non-empty summary")]
    DiscardsPrior,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
            && self.constraints.is_empty()
            && self.open_tasks.is_empty()
            && self.context.trim().is_empty()
    }

    /// Parse and validate an engine reply, tolerating a surrounding
    /// Markdown code fence.
    pub fn parse_validated(raw: &str) -> Result<Self, SummaryError> {
        let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| SummaryError::NotJson(e.to_string()))?;

        let schema = json_schema_for::<Summary>();
        if let Ok(validator) = jsonschema::validator_for(&schema) {
            let errors: Vec<String> = validator
                .iter_errors(&value)
                .map(|e| format!("{}: {e}", e.instance_path()))
                .collect();
            if !errors.is_empty() {
                return Err(SummaryError::Invalid(errors));
            }
        }

        serde_json::from_value(value).map_err(|e| SummaryError::Invalid(vec![e.to_string()]))
    }

    /// Reject a replacement that would silently wipe accumulated state.
    pub fn ensure_supersedes(&self, prior: &Summary) -> Result<(), SummaryError> {
        if self.is_empty() && !prior.is_empty() {
            return Err(SummaryError::DiscardsPrior);
        }
        Ok(())
    }

    /// Plain-text block for the system prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut section = |title: &str, items: &[String]| {
            if !items.is_empty() {
                out.push_str(title);
                out.push_str(":\n");
                for item in items {
                    out.push_str("- ");
                    out.push_str(item);
                    out.push('\n');
                }
            }
        };
        section("Decisions", &self.decisions);
        section("Constraints", &self.constraints);
        section("Open tasks", &self.open_tasks);
        if !self.context.trim().is_empty() {
            out.push_str("Context: ");
            out.push_str(self.context.trim());
            out.push('\n');
        }
        out
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
