use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RoutingSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Moderate,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Moderate => "moderate",
            Difficulty::Hard => "hard",
        };
        f.write_str(s)
    }
}

/// Distance and turn bounds separating the difficulty classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyThresholds {
    pub easy_max_meters: f64,
    pub easy_max_turns: usize,
    pub moderate_max_meters: f64,
    pub moderate_max_turns: usize,
}

impl Default for DifficultyThresholds {
    fn default() -> Self {
        DifficultyThresholds::from(&RoutingSettings::default())
    }
}

impl From<&RoutingSettings> for DifficultyThresholds {
    fn from(s: &RoutingSettings) -> Self {
        DifficultyThresholds {
            easy_max_meters: s.easy_max_meters,
            easy_max_turns: s.easy_max_turns,
            moderate_max_meters: s.moderate_max_meters,
            moderate_max_turns: s.moderate_max_turns,
        }
    }
}

impl DifficultyThresholds {
    /// Both bounds are exclusive and both must hold.
    pub fn classify(&self, meters: f64, turns: usize) -> Difficulty {
        if meters < self.easy_max_meters && turns < self.easy_max_turns {
            Difficulty::Easy
        } else if meters < self.moderate_max_meters && turns < self.moderate_max_turns {
            Difficulty::Moderate
        } else {
            Difficulty::Hard
        }
    }
}

/// Score in `[0, 1]`; fewer key waypoints and a larger reduction score higher.
pub fn accessibility_score(key_waypoints: usize, reduction_ratio: f64) -> f64 {
    let score = 1.0 - (key_waypoints as f64 / 100.0) * 0.5 - (1.0 - reduction_ratio) * 0.5;
    score.clamp(0.0, 1.0)
}

pub fn walking_time_secs(meters: f64, speed_mps: f64) -> f64 {
    if speed_mps > 0.0 { meters / speed_mps } else { 0.0 }
}
