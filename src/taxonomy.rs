//! Detection-type taxonomy.
//!
//! A fixed table maps each coarse detection type to the raw model classes it
//! covers. Cameras enable a subset of types; detector output is filtered and
//! grouped against that subset before cooldown and persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::DetectedObject;

/// Coarse detection category. Declaration order is taxonomy order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Person,
    Vehicle,
    Animal,
}

const PERSON_CLASSES: &[&str] = &["person"];
const VEHICLE_CLASSES: &[&str] = &["car", "truck", "bus", "motorcycle"];
const ANIMAL_CLASSES: &[&str] = &[
    "dog", "cat", "bird", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];

impl DetectionType {
    pub const ALL: [DetectionType; 3] = [
        DetectionType::Person,
        DetectionType::Vehicle,
        DetectionType::Animal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionType::Person => "person",
            DetectionType::Vehicle => "vehicle",
            DetectionType::Animal => "animal",
        }
    }

    /// Raw model classes accepted by this type.
    pub fn classes(self) -> &'static [&'static str] {
        match self {
            DetectionType::Person => PERSON_CLASSES,
            DetectionType::Vehicle => VEHICLE_CLASSES,
            DetectionType::Animal => ANIMAL_CLASSES,
        }
    }

    pub fn accepts(self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    /// Title-cased label for human-facing text ("Person").
    pub fn display_name(self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        DetectionType::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| {
                anyhow!(
                    "unknown detection type '{}' (expected one of: person, vehicle, animal)",
                    s
                )
            })
    }
}

/// First enabled type, in taxonomy order, whose class set contains `class`.
pub fn classify(class: &str, enabled: &BTreeSet<DetectionType>) -> Option<DetectionType> {
    DetectionType::ALL
        .into_iter()
        .find(|t| enabled.contains(t) && t.accepts(class))
}

/// True when at least one enabled type maps to a model class of interest.
///
/// Workers skip the detector entirely when this is false.
pub fn wants_detection(enabled: &BTreeSet<DetectionType>) -> bool {
    enabled.iter().any(|t| !t.classes().is_empty())
}

/// Filters detector output for one frame and groups it by detection type.
///
/// Objects below `threshold`, with an invalid confidence, or whose class is
/// not covered by an enabled type are dropped. Groups are keyed in taxonomy
/// order and keep detector order inside each group; no group is empty.
pub fn group_detections(
    objects: Vec<DetectedObject>,
    enabled: &BTreeSet<DetectionType>,
    threshold: f32,
) -> BTreeMap<DetectionType, Vec<DetectedObject>> {
    let mut groups: BTreeMap<DetectionType, Vec<DetectedObject>> = BTreeMap::new();
    for object in objects {
        if !object.has_valid_confidence() || object.confidence < threshold {
            continue;
        }
        let Some(detection_type) = classify(&object.class, enabled) else {
            continue;
        };
        groups.entry(detection_type).or_default().push(object);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn obj(class: &str, confidence: f32) -> DetectedObject {
        DetectedObject::new(class, confidence, BoundingBox::new(0, 0, 10, 10).unwrap())
    }

    fn enabled(types: &[DetectionType]) -> BTreeSet<DetectionType> {
        types.iter().copied().collect()
    }

    #[test]
    fn parses_type_names_case_insensitively() {
        assert_eq!("Vehicle".parse::<DetectionType>().unwrap(), DetectionType::Vehicle);
        assert!("spaceship".parse::<DetectionType>().is_err());
    }

    #[test]
    fn classify_respects_enabled_types() {
        let only_person = enabled(&[DetectionType::Person]);
        assert_eq!(classify("person", &only_person), Some(DetectionType::Person));
        assert_eq!(classify("car", &only_person), None);
        assert_eq!(classify("toaster", &enabled(&DetectionType::ALL)), None);
    }

    #[test]
    fn groups_in_taxonomy_order_and_detector_order() {
        let all = enabled(&DetectionType::ALL);
        let groups = group_detections(
            vec![
                obj("dog", 0.9),
                obj("truck", 0.8),
                obj("person", 0.7),
                obj("car", 0.6),
            ],
            &all,
            0.5,
        );
        let keys: Vec<_> = groups.keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                DetectionType::Person,
                DetectionType::Vehicle,
                DetectionType::Animal
            ]
        );
        let vehicles: Vec<_> = groups[&DetectionType::Vehicle]
            .iter()
            .map(|o| o.class.as_str())
            .collect();
        assert_eq!(vehicles, vec!["truck", "car"]);
    }

    #[test]
    fn drops_low_confidence_and_disabled_classes() {
        let groups = group_detections(
            vec![obj("person", 0.49), obj("car", 0.99), obj("person", f32::NAN)],
            &enabled(&[DetectionType::Person]),
            0.5,
        );
        assert!(groups.is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let groups = group_detections(
            vec![obj("person", 0.5)],
            &enabled(&[DetectionType::Person]),
            0.5,
        );
        assert_eq!(groups[&DetectionType::Person].len(), 1);
    }

    #[test]
    fn short_circuit_requires_an_enabled_type() {
        assert!(!wants_detection(&BTreeSet::new()));
        assert!(wants_detection(&enabled(&[DetectionType::Animal])));
    }

    #[test]
    fn display_name_is_title_cased() {
        assert_eq!(DetectionType::Person.display_name(), "Person");
    }
}
