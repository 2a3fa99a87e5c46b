//! Closed lookup from source-platform activity types to destination types.
//!
//! Unknown types are rejected rather than guessed, so operators extend the
//! table instead of finding mis-filed activities later.

use crate::error::{SyncError, SyncResult};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestinationType {
    StrengthTraining,
    Yoga,
    Pilates,
}

impl DestinationType {
    pub fn display_name(self) -> &'static str {
        match self {
            DestinationType::StrengthTraining => "Strength Training",
            DestinationType::Yoga => "Yoga",
            DestinationType::Pilates => "Pilates",
        }
    }

    /// Remote type key used in activity payloads and list filters.
    pub fn type_key(self) -> &'static str {
        match self {
            DestinationType::StrengthTraining => "strength_training",
            DestinationType::Yoga => "yoga",
            DestinationType::Pilates => "pilates",
        }
    }

    pub fn type_id(self) -> u32 {
        match self {
            DestinationType::StrengthTraining => 13,
            DestinationType::Yoga => 106,
            DestinationType::Pilates => 107,
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

const MAPPING: &[(&str, DestinationType)] = &[
    ("WeightTraining", DestinationType::StrengthTraining),
    ("Workout", DestinationType::StrengthTraining),
    ("Crossfit", DestinationType::StrengthTraining),
    ("Yoga", DestinationType::Yoga),
    ("Pilates", DestinationType::Pilates),
];

/// Case and separator folding so `weight_training` and `WeightTraining` are the same key.
fn fold_key(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn map_activity_type(source_type: &str) -> SyncResult<DestinationType> {
    let wanted = fold_key(source_type.trim());
    MAPPING
        .iter()
        .find(|(key, _)| fold_key(key) == wanted)
        .map(|(_, dest)| *dest)
        .ok_or_else(|| SyncError::UnsupportedActivityType {
            source_type: source_type.to_string(),
            supported: supported_types().collect::<Vec<_>>().join(", "),
        })
}

/// Canonical source keys, in table order.
pub fn supported_types() -> impl Iterator<Item = &'static str> {
    MAPPING.iter().map(|(key, _)| *key)
}
