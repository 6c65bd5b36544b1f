//! Coarse compatibility classes.
//!
//! A subject's raw attributes are reduced to a small tuple of tags (weight
//! class, drive type, test type) so that matching against a resource becomes
//! plain set containment on its capability arrays. Postgres evaluates the
//! same containment with `@>` on `TEXT[]` columns.

use crate::domain::{Capabilities, Subject};
use serde::{Deserialize, Serialize};

/// Subjects at or under this weight are in the light class.
pub const LIGHT_WEIGHT_LIMIT_LBS: i32 = 10_000;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WeightClass {
    #[serde(rename = "<10K")]
    Light,
    #[serde(rename = ">10K")]
    Heavy,
}

impl WeightClass {
    pub fn from_weight(weight_lbs: i32) -> Self {
        if weight_lbs <= LIGHT_WEIGHT_LIMIT_LBS {
            WeightClass::Light
        } else {
            WeightClass::Heavy
        }
    }

    /// Tag stored in `resources.weight_classes`.
    pub fn as_tag(self) -> &'static str {
        match self {
            WeightClass::Light => "<10K",
            WeightClass::Heavy => ">10K",
        }
    }
}

/// The derived requirements a resource must satisfy for one test.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompatibilityClass {
    pub weight_class: WeightClass,
    pub drive_type: String,
    pub test_type: String,
}

impl CompatibilityClass {
    pub fn derive(subject: &Subject, test_type: &str) -> Self {
        Self {
            weight_class: WeightClass::from_weight(subject.weight_lbs),
            drive_type: subject.drive_type.trim().to_string(),
            test_type: test_type.trim().to_string(),
        }
    }

    /// Set containment of this class in `capabilities`.
    pub fn is_admitted_by(&self, capabilities: &Capabilities) -> bool {
        let has = |tags: &[String], want: &str| tags.iter().any(|t| t == want);
        has(&capabilities.weight_classes, self.weight_class.as_tag())
            && has(&capabilities.drive_types, &self.drive_type)
            && has(&capabilities.test_types, &self.test_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(weight_lbs: i32, drive: &str) -> Subject {
        Subject {
            id: 1,
            code: "V1".into(),
            weight_lbs,
            drive_type: drive.into(),
        }
    }

    #[test]
    fn weight_class_boundary_is_inclusive() {
        assert_eq!(WeightClass::from_weight(4_800), WeightClass::Light);
        assert_eq!(WeightClass::from_weight(10_000), WeightClass::Light);
        assert_eq!(WeightClass::from_weight(10_001), WeightClass::Heavy);
    }

    #[test]
    fn admission_requires_every_tag() {
        let caps = Capabilities {
            weight_classes: vec!["<10K".into()],
            drive_types: vec!["AWD".into(), "FWD".into()],
            test_types: vec!["brake".into()],
        };
        let class = CompatibilityClass::derive(&subject(4_800, "AWD"), "brake");
        assert!(class.is_admitted_by(&caps));

        let heavy = CompatibilityClass::derive(&subject(12_000, "AWD"), "brake");
        assert!(!heavy.is_admitted_by(&caps));

        let other_test = CompatibilityClass::derive(&subject(4_800, "AWD"), "emissions");
        assert!(!other_test.is_admitted_by(&caps));
    }

    #[test]
    fn weight_class_serializes_as_tag() {
        assert_eq!(serde_json::to_value(WeightClass::Heavy).unwrap(), ">10K");
    }
}
