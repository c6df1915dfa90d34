//! Combat events: the append-only record of everything that happens in an
//! encounter.
//!
//! Every HP change and every resource change is expressed as exactly one event,
//! so replaying an encounter's events over its starting snapshot reproduces its
//! final state. The [`EventBus`] keeps two views of the stream: the retained log
//! (subject to a [`Retention`] policy) and a pending queue the reaction manager
//! drains after each resolution step.

use crate::model::{
    Ability, Combattant, CombattantId, Condition, DamageType, ResourceKind, Side,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::RangeInclusive;

/// Broad grouping used for filtering.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Topic {
    Lifecycle,
    Combat,
    Spell,
    Status,
    Roll,
    Resource,
}

/// How an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncounterOutcome {
    Victory,
    Defeat,
    Timeout,
    /// The party was wiped before this encounter.
    NotReached,
}

/// Why an action was not carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    RequirementsUnmet,
    InsufficientResource(ResourceKind),
    NoValidTarget,
    Incapacitated,
}

/// What soaked up damage that never reached hit points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Absorber {
    Immunity,
    Resistance,
    Ward,
    TempHp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    // Lifecycle
    EncounterStarted {
        encounter: u32,
        combattants: u32,
    },
    EncounterEnded {
        encounter: u32,
        outcome: EncounterOutcome,
        rounds: u32,
    },
    RoundStarted {
        round: u32,
    },
    RoundEnded {
        round: u32,
    },
    TurnStarted {
        unit: CombattantId,
    },
    TurnEnded {
        unit: CombattantId,
    },
    UnitDied {
        unit: CombattantId,
        killer: Option<CombattantId>,
    },

    // Combat
    ActionStarted {
        actor: CombattantId,
        action: String,
    },
    ActionSkipped {
        actor: CombattantId,
        action: String,
        reason: SkipReason,
    },
    ActionInterrupted {
        actor: CombattantId,
        action: String,
        by: CombattantId,
    },
    AttackDeclared {
        attacker: CombattantId,
        target: CombattantId,
        action: String,
    },
    AttackHit {
        attacker: CombattantId,
        target: CombattantId,
        roll: i32,
        natural: u32,
        armor_class: i32,
        critical: bool,
    },
    AttackMissed {
        attacker: CombattantId,
        target: CombattantId,
        roll: i32,
        natural: u32,
        armor_class: i32,
    },
    DamageTaken {
        target: CombattantId,
        source: Option<CombattantId>,
        amount: i32,
        damage_type: DamageType,
        hp_after: i32,
    },
    DamagePrevented {
        target: CombattantId,
        source: Option<CombattantId>,
        amount: i32,
        absorbed_by: Absorber,
    },
    HealingApplied {
        target: CombattantId,
        source: Option<CombattantId>,
        amount: i32,
        hp_after: i32,
    },
    TempHpGranted {
        target: CombattantId,
        source: Option<CombattantId>,
        amount: i32,
        temp_after: i32,
    },

    // Spell
    SpellCast {
        caster: CombattantId,
        spell: String,
        slot_level: Option<u8>,
    },
    SpellSaved {
        caster: CombattantId,
        target: CombattantId,
        spell: String,
    },
    SpellFailed {
        caster: CombattantId,
        target: CombattantId,
        spell: String,
    },
    ConcentrationBroken {
        caster: CombattantId,
        spell: String,
    },
    ConcentrationMaintained {
        caster: CombattantId,
        spell: String,
    },

    // Status
    BuffApplied {
        target: CombattantId,
        source: CombattantId,
        buff: String,
    },
    BuffExpired {
        target: CombattantId,
        buff: String,
    },
    BuffRemoved {
        target: CombattantId,
        buff: String,
    },
    ConditionAdded {
        target: CombattantId,
        condition: Condition,
    },
    ConditionRemoved {
        target: CombattantId,
        condition: Condition,
    },

    // Roll
    SaveAttempted {
        unit: CombattantId,
        ability: Ability,
        dc: i32,
    },
    SaveResult {
        unit: CombattantId,
        ability: Ability,
        roll: i32,
        dc: i32,
        success: bool,
    },
    AbilityCheckMade {
        unit: CombattantId,
        ability: Ability,
        roll: i32,
        dc: Option<i32>,
    },
    ReactionTriggered {
        unit: CombattantId,
        reaction: String,
    },

    // Resource
    ResourceConsumed {
        unit: CombattantId,
        resource: ResourceKind,
        amount: u32,
        remaining: u32,
    },
    ResourceRestored {
        unit: CombattantId,
        resource: ResourceKind,
        amount: u32,
        remaining: u32,
    },
    ResourceDepleted {
        unit: CombattantId,
        resource: ResourceKind,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        use Event::*;
        match self {
            EncounterStarted { .. }
            | EncounterEnded { .. }
            | RoundStarted { .. }
            | RoundEnded { .. }
            | TurnStarted { .. }
            | TurnEnded { .. }
            | UnitDied { .. } => Topic::Lifecycle,
            ActionStarted { .. }
            | ActionSkipped { .. }
            | ActionInterrupted { .. }
            | AttackDeclared { .. }
            | AttackHit { .. }
            | AttackMissed { .. }
            | DamageTaken { .. }
            | DamagePrevented { .. }
            | HealingApplied { .. }
            | TempHpGranted { .. } => Topic::Combat,
            SpellCast { .. }
            | SpellSaved { .. }
            | SpellFailed { .. }
            | ConcentrationBroken { .. }
            | ConcentrationMaintained { .. } => Topic::Spell,
            BuffApplied { .. }
            | BuffExpired { .. }
            | BuffRemoved { .. }
            | ConditionAdded { .. }
            | ConditionRemoved { .. } => Topic::Status,
            SaveAttempted { .. }
            | SaveResult { .. }
            | AbilityCheckMade { .. }
            | ReactionTriggered { .. } => Topic::Roll,
            ResourceConsumed { .. } | ResourceRestored { .. } | ResourceDepleted { .. } => {
                Topic::Resource
            }
        }
    }

    pub fn name(&self) -> &'static str {
        use Event::*;
        match self {
            EncounterStarted { .. } => "EncounterStarted",
            EncounterEnded { .. } => "EncounterEnded",
            RoundStarted { .. } => "RoundStarted",
            RoundEnded { .. } => "RoundEnded",
            TurnStarted { .. } => "TurnStarted",
            TurnEnded { .. } => "TurnEnded",
            UnitDied { .. } => "UnitDied",
            ActionStarted { .. } => "ActionStarted",
            ActionSkipped { .. } => "ActionSkipped",
            ActionInterrupted { .. } => "ActionInterrupted",
            AttackDeclared { .. } => "AttackDeclared",
            AttackHit { .. } => "AttackHit",
            AttackMissed { .. } => "AttackMissed",
            DamageTaken { .. } => "DamageTaken",
            DamagePrevented { .. } => "DamagePrevented",
            HealingApplied { .. } => "HealingApplied",
            TempHpGranted { .. } => "TempHpGranted",
            SpellCast { .. } => "SpellCast",
            SpellSaved { .. } => "SpellSaved",
            SpellFailed { .. } => "SpellFailed",
            ConcentrationBroken { .. } => "ConcentrationBroken",
            ConcentrationMaintained { .. } => "ConcentrationMaintained",
            BuffApplied { .. } => "BuffApplied",
            BuffExpired { .. } => "BuffExpired",
            BuffRemoved { .. } => "BuffRemoved",
            ConditionAdded { .. } => "ConditionAdded",
            ConditionRemoved { .. } => "ConditionRemoved",
            SaveAttempted { .. } => "SaveAttempted",
            SaveResult { .. } => "SaveResult",
            AbilityCheckMade { .. } => "AbilityCheckMade",
            ReactionTriggered { .. } => "ReactionTriggered",
            ResourceConsumed { .. } => "ResourceConsumed",
            ResourceRestored { .. } => "ResourceRestored",
            ResourceDepleted { .. } => "ResourceDepleted",
        }
    }

    /// The combattant the event is about, if any.
    pub fn subject(&self) -> Option<CombattantId> {
        use Event::*;
        match self {
            TurnStarted { unit }
            | TurnEnded { unit }
            | UnitDied { unit, .. }
            | SaveAttempted { unit, .. }
            | SaveResult { unit, .. }
            | AbilityCheckMade { unit, .. }
            | ReactionTriggered { unit, .. }
            | ResourceConsumed { unit, .. }
            | ResourceRestored { unit, .. }
            | ResourceDepleted { unit, .. } => Some(*unit),
            ActionStarted { actor, .. }
            | ActionSkipped { actor, .. }
            | ActionInterrupted { actor, .. } => Some(*actor),
            AttackDeclared { attacker, .. }
            | AttackHit { attacker, .. }
            | AttackMissed { attacker, .. } => Some(*attacker),
            DamageTaken { target, .. }
            | DamagePrevented { target, .. }
            | HealingApplied { target, .. }
            | TempHpGranted { target, .. }
            | BuffApplied { target, .. }
            | BuffExpired { target, .. }
            | BuffRemoved { target, .. }
            | ConditionAdded { target, .. }
            | ConditionRemoved { target, .. } => Some(*target),
            SpellCast { caster, .. }
            | SpellSaved { caster, .. }
            | SpellFailed { caster, .. }
            | ConcentrationBroken { caster, .. }
            | ConcentrationMaintained { caster, .. } => Some(*caster),
            EncounterStarted { .. }
            | EncounterEnded { .. }
            | RoundStarted { .. }
            | RoundEnded { .. } => None,
        }
    }

    /// The other combattant involved, if any.
    pub fn counterpart(&self) -> Option<CombattantId> {
        use Event::*;
        match self {
            UnitDied { killer, .. } => *killer,
            ActionInterrupted { by, .. } => Some(*by),
            AttackDeclared { target, .. }
            | AttackHit { target, .. }
            | AttackMissed { target, .. }
            | SpellSaved { target, .. }
            | SpellFailed { target, .. } => Some(*target),
            DamageTaken { source, .. }
            | DamagePrevented { source, .. }
            | HealingApplied { source, .. }
            | TempHpGranted { source, .. } => *source,
            BuffApplied { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn involves(&self, unit: CombattantId) -> bool {
        self.subject() == Some(unit) || self.counterpart() == Some(unit)
    }
}

/// An event stamped with its position in the encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub round: u32,
    pub event: Event,
}

/// How many events an encounter keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    Full,
    /// Keep only the most recent `n` events.
    Capped(usize),
    Disabled,
}

/// Selects records from a log. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    topics: Option<Vec<Topic>>,
    names: Option<Vec<&'static str>>,
    unit: Option<CombattantId>,
    rounds: Option<RangeInclusive<u32>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: Topic) -> Self {
        self.topics.get_or_insert_with(Vec::new).push(topic);
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.names.get_or_insert_with(Vec::new).push(name);
        self
    }

    pub fn unit(mut self, unit: CombattantId) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn rounds(mut self, rounds: RangeInclusive<u32>) -> Self {
        self.rounds = Some(rounds);
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(topics) = &self.topics {
            if !topics.contains(&record.event.topic()) {
                return false;
            }
        }
        if let Some(names) = &self.names {
            if !names.contains(&record.event.name()) {
                return false;
            }
        }
        if let Some(unit) = self.unit {
            if !record.event.involves(unit) {
                return false;
            }
        }
        if let Some(rounds) = &self.rounds {
            if !rounds.contains(&record.round) {
                return false;
            }
        }
        true
    }
}

/// Retained, append-only event history.
#[derive(Debug, Clone)]
pub struct EventLog {
    retention: Retention,
    records: VecDeque<EventRecord>,
    dropped: u64,
}

impl EventLog {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            records: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn push(&mut self, record: EventRecord) {
        match self.retention {
            Retention::Disabled => self.dropped += 1,
            Retention::Full => self.records.push_back(record),
            Retention::Capped(cap) => {
                self.records.push_back(record);
                while self.records.len() > cap {
                    self.records.pop_front();
                    self.dropped += 1;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events emitted but not retained.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    pub fn query<'a>(&'a self, filter: &'a EventFilter) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.records.iter().filter(move |record| filter.matches(record))
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records.into()
    }
}

/// Event sink for one encounter: stamps, retains and queues events.
#[derive(Debug)]
pub struct EventBus {
    log: EventLog,
    pending: VecDeque<EventRecord>,
    next_seq: u64,
}

impl EventBus {
    pub fn new(retention: Retention) -> Self {
        Self {
            log: EventLog::new(retention),
            pending: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn publish(&mut self, round: u32, event: Event) {
        let record = EventRecord {
            seq: self.next_seq,
            round,
            event,
        };
        self.next_seq += 1;
        tracing::trace!(seq = record.seq, round, event = record.event.name(), "event");
        self.log.push(record.clone());
        self.pending.push_back(record);
    }

    /// Next event not yet seen by the reaction manager.
    pub fn next_pending(&mut self) -> Option<EventRecord> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn into_log(self) -> EventLog {
        self.log
    }
}

/// Per-unit state captured when an encounter starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: CombattantId,
    pub name: String,
    pub side: Side,
    pub hp: i32,
    pub max_hp: i32,
    pub temp_hp: i32,
    pub ward: i32,
    pub resources: Vec<(ResourceKind, u32)>,
}

impl UnitSnapshot {
    pub fn of(unit: &Combattant) -> Self {
        Self {
            id: unit.id,
            name: unit.name.clone(),
            side: unit.side,
            hp: unit.state.hp,
            max_hp: unit.max_hp,
            temp_hp: unit.state.temp_hp,
            ward: unit.state.ward,
            resources: unit
                .state
                .resources
                .iter()
                .map(|(kind, balance)| (kind.clone(), balance.current))
                .collect(),
        }
    }
}

/// Rebuilds HP, temp HP, ward and resource balances from a snapshot and an
/// event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replay {
    pub hp: BTreeMap<CombattantId, i32>,
    pub temp_hp: BTreeMap<CombattantId, i32>,
    pub ward: BTreeMap<CombattantId, i32>,
    pub resources: BTreeMap<(CombattantId, ResourceKind), i64>,
    pub dead: BTreeSet<CombattantId>,
}

impl Replay {
    pub fn from_snapshots(snapshots: &[UnitSnapshot]) -> Self {
        let mut replay = Replay::default();
        for unit in snapshots {
            replay.hp.insert(unit.id, unit.hp);
            replay.temp_hp.insert(unit.id, unit.temp_hp);
            replay.ward.insert(unit.id, unit.ward);
            for (kind, amount) in &unit.resources {
                replay
                    .resources
                    .insert((unit.id, kind.clone()), i64::from(*amount));
            }
        }
        replay
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::DamageTaken { target, amount, .. } => {
                *self.hp.entry(*target).or_insert(0) -= amount;
            }
            Event::DamagePrevented {
                target,
                amount,
                absorbed_by,
                ..
            } => match absorbed_by {
                Absorber::Ward => *self.ward.entry(*target).or_insert(0) -= amount,
                Absorber::TempHp => *self.temp_hp.entry(*target).or_insert(0) -= amount,
                Absorber::Immunity | Absorber::Resistance => {}
            },
            Event::HealingApplied { target, amount, .. } => {
                *self.hp.entry(*target).or_insert(0) += amount;
            }
            Event::TempHpGranted { target, amount, .. } => {
                *self.temp_hp.entry(*target).or_insert(0) += amount;
            }
            Event::ResourceConsumed {
                unit,
                resource,
                amount,
                ..
            } => {
                *self
                    .resources
                    .entry((*unit, resource.clone()))
                    .or_insert(0) -= i64::from(*amount);
            }
            Event::ResourceRestored {
                unit,
                resource,
                amount,
                ..
            } => {
                *self
                    .resources
                    .entry((*unit, resource.clone()))
                    .or_insert(0) += i64::from(*amount);
            }
            Event::UnitDied { unit, .. } => {
                self.dead.insert(*unit);
            }
            _ => {}
        }
    }

    pub fn apply_all<'a>(&mut self, records: impl IntoIterator<Item = &'a EventRecord>) {
        for record in records {
            self.apply(&record.event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn damage(target: u32, amount: i32) -> Event {
        Event::DamageTaken {
            target: CombattantId(target),
            source: None,
            amount,
            damage_type: DamageType::Fire,
            hp_after: 0,
        }
    }

    #[test]
    fn test_capped_retention_keeps_latest() {
        let mut bus = EventBus::new(Retention::Capped(2));
        for round in 1..=4 {
            bus.publish(round, Event::RoundStarted { round });
        }
        let log = bus.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 2);
        let rounds: Vec<u32> = log.records().map(|r| r.round).collect();
        assert_eq!(rounds, vec![3, 4]);
        assert_eq!(bus.emitted(), 4);
    }

    #[test]
    fn test_disabled_retention_still_queues_pending() {
        let mut bus = EventBus::new(Retention::Disabled);
        bus.publish(1, damage(0, 3));
        assert!(bus.log().is_empty());
        let pending = bus.next_pending().unwrap();
        assert_eq!(pending.seq, 0);
        assert!(bus.next_pending().is_none());
    }

    #[test]
    fn test_filter_by_unit_and_topic() {
        let mut bus = EventBus::new(Retention::Full);
        bus.publish(1, damage(0, 3));
        bus.publish(1, damage(1, 4));
        bus.publish(
            2,
            Event::ResourceDepleted {
                unit: CombattantId(0),
                resource: ResourceKind::SpellSlot(1),
            },
        );
        let filter = EventFilter::new().unit(CombattantId(0)).topic(Topic::Combat);
        let hits: Vec<_> = bus.log().query(&filter).collect();
        assert_eq!(hits.len(), 1);

        let later = EventFilter::new().rounds(2..=2);
        assert_eq!(bus.log().query(&later).count(), 1);

        let named = EventFilter::new().named("DamageTaken");
        assert_eq!(bus.log().query(&named).count(), 2);
    }

    #[test]
    fn test_replay_tracks_hp_and_resources() {
        let snapshot = UnitSnapshot {
            id: CombattantId(0),
            name: "Fighter".to_string(),
            side: Side::Party,
            hp: 20,
            max_hp: 20,
            temp_hp: 0,
            ward: 0,
            resources: vec![(ResourceKind::Action, 1)],
        };
        let mut replay = Replay::from_snapshots(&[snapshot]);
        replay.apply(&damage(0, 8));
        replay.apply(&Event::HealingApplied {
            target: CombattantId(0),
            source: None,
            amount: 5,
            hp_after: 17,
        });
        replay.apply(&Event::ResourceConsumed {
            unit: CombattantId(0),
            resource: ResourceKind::Action,
            amount: 1,
            remaining: 0,
        });
        assert_eq!(replay.hp[&CombattantId(0)], 17);
        assert_eq!(replay.resources[&(CombattantId(0), ResourceKind::Action)], 0);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_string(&Event::RoundStarted { round: 3 }).unwrap();
        assert_eq!(json, r#"{"event":"RoundStarted","round":3}"#);
    }
}
