//! Adventuring-day timelines and simulation requests.

use super::creature::Creature;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    #[serde(default)]
    pub name: String,
    pub monsters: Vec<Creature>,
}

impl Encounter {
    pub fn new(name: impl Into<String>, monsters: Vec<Creature>) -> Self {
        Self {
            name: name.into(),
            monsters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestKind {
    Short,
    Long,
}

/// One step of the adventuring day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TimelineSegment {
    Combat(Encounter),
    Rest { kind: RestKind },
}

impl TimelineSegment {
    pub fn encounter(&self) -> Option<&Encounter> {
        match self {
            TimelineSegment::Combat(encounter) => Some(encounter),
            TimelineSegment::Rest { .. } => None,
        }
    }
}

fn default_iterations() -> u32 {
    1000
}

/// A batch simulation request: one party walking one timeline many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub party: Vec<Creature>,
    pub timeline: Vec<TimelineSegment>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Base seed; drawn from entropy and reported when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Cap on the number of Tier-B timeline buckets.
    #[serde(default)]
    pub max_k: Option<u32>,
}

impl SimulationRequest {
    pub fn new(party: Vec<Creature>, timeline: Vec<TimelineSegment>) -> Self {
        Self {
            party,
            timeline,
            iterations: default_iterations(),
            seed: None,
            max_k: None,
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_k(mut self, max_k: u32) -> Self {
        self.max_k = Some(max_k);
        self
    }

    pub fn encounters(&self) -> impl Iterator<Item = &Encounter> {
        self.timeline.iter().filter_map(TimelineSegment::encounter)
    }

    pub fn encounter_count(&self) -> usize {
        self.encounters().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_json_shape() {
        let json = r#"[
            {"type": "Combat", "name": "Ambush", "monsters": [
                {"name": "Goblin", "hit_points": 7, "armor_class": 15, "count": 2.5}
            ]},
            {"type": "Rest", "kind": "Short"}
        ]"#;
        let timeline: Vec<TimelineSegment> = serde_json::from_str(json).unwrap();
        assert_eq!(timeline.len(), 2);
        let encounter = timeline[0].encounter().unwrap();
        assert_eq!(encounter.monsters[0].count, 2.5);
        assert_eq!(
            timeline[1],
            TimelineSegment::Rest {
                kind: RestKind::Short
            }
        );
    }

    #[test]
    fn test_encounter_count_skips_rests() {
        let request = SimulationRequest::new(
            Vec::new(),
            vec![
                TimelineSegment::Combat(Encounter::new("A", Vec::new())),
                TimelineSegment::Rest {
                    kind: RestKind::Long,
                },
                TimelineSegment::Combat(Encounter::new("B", Vec::new())),
            ],
        );
        assert_eq!(request.encounter_count(), 2);
        assert_eq!(request.iterations, 1000);
    }
}
