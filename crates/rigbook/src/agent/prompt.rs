//! System prompt assembly for the reasoning stage.

use crate::context::summary::Summary;
use chrono::NaiveDate;

const PREAMBLE: &str = "\
You are the booking assistant for a vehicle test lab. You schedule test \
subjects (vehicles, identified by VIN or numeric id) onto dynamometer rigs \
using the tools provided.

- Never invent allocation ids, rig names or availability; read them from tool results.
- Dates are inclusive and written YYYY-MM-DD. Resolve relative dates with get_datetime_now.
- Book with auto_allocate. Offer backup windows only when the user allows moving the date.
- When a tool reports that nothing is free, say so plainly and suggest alternatives.";

/// Apology appended by `ErrorTerminal`.
pub const APOLOGY: &str = "Sorry, I couldn't complete that request because of a system \
problem. Nothing further was changed. Please try again in a moment.";

/// Builder for multi-section system prompts.
///
/// Sections are joined with blank lines; empty sections are skipped.
///
/// ```
/// use rigbook::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You book rigs.")
///     .section("Today", "2024-01-15")
///     .section_opt("Summary", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Today"));
/// assert!(!prompt.contains("## Summary"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a named section with a `##` heading. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The reasoning-stage system prompt: instructions, today's date, the store
/// schema and the running summary.
pub fn booking_system_prompt(schema: Option<&str>, summary: &Summary, today: NaiveDate) -> String {
    SystemPromptBuilder::new(PREAMBLE)
        .section("Today", today.format("%Y-%m-%d (%A)").to_string())
        .section_opt("Database schema", schema)
        .section("Conversation summary", summary.render())
        .build()
}
