// Search criteria types submitted with a MatchRequest.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Casual,
    Competitive,
    Ranked,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Na,
    Eu,
    As,
    Sa,
    Oc,
    Af,
    Any,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Na => "NA",
            Region::Eu => "EU",
            Region::As => "AS",
            Region::Sa => "SA",
            Region::Oc => "OC",
            Region::Af => "AF",
            Region::Any => "ANY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionPreference {
    Strict,
    Preferred,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguagePreference {
    Strict,
    Preferred,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillPreference {
    Similar,
    Any,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupSize {
    pub min: u32,
    pub max: u32,
}

impl GroupSize {
    // Overlap of two [min,max] ranges; `None` when disjoint.
    pub fn overlaps(&self, other: &GroupSize) -> bool {
        self.min.max(other.min) <= self.max.min(other.max)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedGame {
    pub game_id: Uuid,
    // 1..=10
    pub weight: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub games: Vec<WeightedGame>,
    pub game_mode: GameMode,
    pub group_size: GroupSize,
    pub regions: Vec<Region>,
    pub region_preference: RegionPreference,
    pub languages: Vec<String>,
    pub language_preference: LanguagePreference,
    pub skill_preference: SkillPreference,
    pub scheduled_time: Option<u64>,
}

impl SearchCriteria {
    // The request's game with the highest weight, used as the scoring key.
    pub fn primary_game(&self) -> Option<Uuid> {
        self.games
            .iter()
            .max_by_key(|g| g.weight)
            .map(|g| g.game_id)
    }

    // Regions this request is indexed under; `ANY` when unspecified.
    pub fn indexed_regions(&self) -> Vec<Region> {
        if self.regions.is_empty() {
            vec![Region::Any]
        } else {
            self.regions.clone()
        }
    }

    pub fn regions_intersect(&self, other: &SearchCriteria) -> bool {
        self.indexed_regions()
            .iter()
            .any(|r| other.indexed_regions().contains(r))
    }

    pub fn languages_intersect(&self, other: &SearchCriteria) -> bool {
        self.languages.iter().any(|l| other.languages.contains(l))
    }
}
