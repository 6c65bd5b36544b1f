//! Records shared by the store, the allocator and the tools.

use crate::schedule::compat::CompatibilityClass;
use crate::schedule::window::Window;
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ResourceId = i64;
pub type SubjectId = i64;
pub type AllocationId = i64;

/// Tags a resource can serve. Matching is set containment.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub weight_classes: Vec<String>,
    pub drive_types: Vec<String>,
    pub test_types: Vec<String>,
}

/// A bookable physical test resource (a dyno rig).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub capabilities: Capabilities,
    pub enabled: bool,
    /// `None` means open on that side.
    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
}

impl Resource {
    /// Whether the availability window covers all of `window`.
    pub fn is_available_for(&self, window: &Window) -> bool {
        self.available_from.is_none_or(|from| from <= window.start())
            && self.available_to.is_none_or(|to| to >= window.end())
    }

    /// Enabled but outside its availability window on `day`.
    pub fn needs_maintenance_on(&self, day: NaiveDate) -> bool {
        self.enabled
            && (self.available_from.is_some_and(|from| from > day)
                || self.available_to.is_some_and(|to| to < day))
    }

    /// Everything except the overlap check: enabled, compatible and available.
    pub fn can_host(&self, class: &CompatibilityClass, window: &Window) -> bool {
        self.enabled && class.is_admitted_by(&self.capabilities) && self.is_available_for(window)
    }
}

/// A test subject (a vehicle).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    /// External identifier, e.g. a VIN.
    pub code: String,
    pub weight_lbs: i32,
    pub drive_type: String,
}

/// How a caller identifies a subject: numeric id or VIN code.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum SubjectRef {
    Id(SubjectId),
    Code(String),
}

impl SubjectRef {
    /// Numeric strings are ids, anything else is a code.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<SubjectId>() {
            Ok(id) => SubjectRef::Id(id),
            Err(_) => SubjectRef::Code(raw.to_string()),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectRef::Id(id) => write!(f, "subject #{id}"),
            SubjectRef::Code(code) => write!(f, "subject {code}"),
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Scheduled,
    Cancelled,
    Completed,
}

impl AllocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Scheduled => "scheduled",
            AllocationStatus::Cancelled => "cancelled",
            AllocationStatus::Completed => "completed",
        }
    }

    /// Every status except `cancelled` holds its window.
    pub fn is_active(self) -> bool {
        self != AllocationStatus::Cancelled
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(AllocationStatus::Scheduled),
            "cancelled" | "canceled" => Ok(AllocationStatus::Cancelled),
            "completed" => Ok(AllocationStatus::Completed),
            other => Err(format!("unknown allocation status '{other}'")),
        }
    }
}

/// A committed booking. Rows are never deleted; cancellation flips the status.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub id: AllocationId,
    pub resource_id: ResourceId,
    pub subject_id: SubjectId,
    pub test_type: String,
    pub window: Window,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Insert payload for a new `scheduled` allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAllocation {
    pub resource_id: ResourceId,
    pub subject_id: SubjectId,
    pub test_type: String,
    pub window: Window,
}

/// Result of an explicit cancellation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(Allocation),
    NotFound,
    /// Only `scheduled` allocations can be cancelled.
    NotCancellable(Allocation),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn rig(from: Option<&str>, to: Option<&str>) -> Resource {
        Resource {
            id: 1,
            name: "Rig-1".into(),
            capabilities: Capabilities::default(),
            enabled: true,
            available_from: from.map(d),
            available_to: to.map(d),
        }
    }

    #[test]
    fn null_bounds_mean_always_available() {
        let window = Window::new(d("2024-01-15"), d("2024-01-20")).unwrap();
        assert!(rig(None, None).is_available_for(&window));
        assert!(rig(Some("2024-01-15"), None).is_available_for(&window));
        assert!(!rig(Some("2024-01-16"), None).is_available_for(&window));
        assert!(!rig(None, Some("2024-01-19")).is_available_for(&window));
    }

    #[test]
    fn maintenance_is_outside_availability() {
        let today = d("2024-06-01");
        assert!(rig(Some("2024-06-02"), None).needs_maintenance_on(today));
        assert!(rig(None, Some("2024-05-31")).needs_maintenance_on(today));
        assert!(!rig(None, None).needs_maintenance_on(today));

        let mut disabled = rig(Some("2024-07-01"), None);
        disabled.enabled = false;
        assert!(!disabled.needs_maintenance_on(today));
    }

    #[test]
    fn subject_ref_parses_ids_and_codes() {
        assert_eq!(SubjectRef::parse("42"), SubjectRef::Id(42));
        assert_eq!(
            SubjectRef::parse(" 1FTFW1E50NFA00001 "),
            SubjectRef::Code("1FTFW1E50NFA00001".into())
        );
    }

    #[test]
    fn status_parsing() {
        assert_eq!("Completed".parse(), Ok(AllocationStatus::Completed));
        assert_eq!("canceled".parse(), Ok(AllocationStatus::Cancelled));
        assert!("pending".parse::<AllocationStatus>().is_err());
        assert!(!AllocationStatus::Cancelled.is_active());
        assert!(AllocationStatus::Completed.is_active());
    }
}
