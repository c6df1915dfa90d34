//! Request validation. Malformed input is rejected before any simulation runs.

use super::action::{Action, ActionCost, ActionKind, HitRoll, ResourceKind};
use super::creature::Creature;
use super::effect::{BuffDuration, BuffSpec};
use super::reaction::ReactionTemplate;
use super::timeline::{SimulationRequest, TimelineSegment};
use crate::resolver::template::is_known_template;
use thiserror::Error;

/// Most copies a single creature entry may muster into one encounter.
pub const MAX_CREATURE_COUNT: f64 = 100.0;

/// A request that cannot be simulated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("request has no party members")]
    EmptyParty,
    #[error("timeline has no combat encounters")]
    NoEncounters,
    #[error("iteration count must be at least 1")]
    NoIterations,
    #[error("max_k must be at least 1")]
    InvalidMaxK,
    #[error("{path}: unknown template '{name}'")]
    UnknownTemplate { path: String, name: String },
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

fn invalid(path: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::Invalid {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Validate a full batch request.
pub fn validate_request(request: &SimulationRequest) -> Result<(), ValidationError> {
    if request.party.is_empty() {
        return Err(ValidationError::EmptyParty);
    }
    if request.iterations == 0 {
        return Err(ValidationError::NoIterations);
    }
    if request.max_k == Some(0) {
        return Err(ValidationError::InvalidMaxK);
    }
    for (i, member) in request.party.iter().enumerate() {
        validate_creature(member, &format!("party[{}]", i))?;
    }

    let mut encounters = 0;
    for (i, segment) in request.timeline.iter().enumerate() {
        if let TimelineSegment::Combat(encounter) = segment {
            encounters += 1;
            let path = format!("timeline[{}]", i);
            if encounter.monsters.is_empty() {
                return Err(invalid(&path, "encounter has no monsters"));
            }
            for (j, monster) in encounter.monsters.iter().enumerate() {
                validate_creature(monster, &format!("{}.monsters[{}]", path, j))?;
            }
        }
    }
    if encounters == 0 {
        return Err(ValidationError::NoEncounters);
    }
    Ok(())
}

pub fn validate_creature(creature: &Creature, path: &str) -> Result<(), ValidationError> {
    if creature.name.trim().is_empty() {
        return Err(invalid(path, "name must not be empty"));
    }
    if creature.hit_points <= 0 {
        return Err(invalid(path, "hit_points must be positive"));
    }
    if creature.armor_class < 0 {
        return Err(invalid(path, "armor_class must not be negative"));
    }
    if !creature.count.is_finite() || creature.count <= 0.0 {
        return Err(invalid(path, "count must be a positive number"));
    }
    if creature.count > MAX_CREATURE_COUNT {
        return Err(invalid(
            path,
            format!("count must be at most {}", MAX_CREATURE_COUNT),
        ));
    }
    if creature.arcane_ward < 0 {
        return Err(invalid(path, "arcane_ward must not be negative"));
    }
    for level in creature.resources.spell_slots.keys() {
        if !(1..=9).contains(level) {
            return Err(invalid(path, format!("spell slot level {} out of range", level)));
        }
    }
    for (i, action) in creature.actions.iter().enumerate() {
        validate_action(action, &format!("{}.actions[{}]", path, i))?;
    }
    for (i, item) in creature.magic_items.iter().enumerate() {
        let item_path = format!("{}.magic_items[{}]", path, i);
        for (j, action) in item.actions.iter().enumerate() {
            validate_action(action, &format!("{}.actions[{}]", item_path, j))?;
        }
    }
    for (i, reaction) in creature.reactions.iter().enumerate() {
        validate_reaction(reaction, &format!("{}.reactions[{}]", path, i))?;
    }
    for (i, buff) in creature.starting_buffs.iter().enumerate() {
        validate_buff(buff, &format!("{}.starting_buffs[{}]", path, i))?;
    }
    Ok(())
}

pub fn validate_action(action: &Action, path: &str) -> Result<(), ValidationError> {
    if action.name.trim().is_empty() {
        return Err(invalid(path, "action name must not be empty"));
    }
    if action.targets == 0 {
        return Err(invalid(path, "targets must be at least 1"));
    }
    validate_costs(&action.cost, path)?;

    match &action.kind {
        ActionKind::Attack(attack) => {
            if attack.attacks == 0 {
                return Err(invalid(path, "attacks must be at least 1"));
            }
            if !(2..=20).contains(&attack.crit_threshold) {
                return Err(invalid(path, "crit_threshold must be between 2 and 20"));
            }
            if let HitRoll::Save { dc, .. } = attack.hit {
                if dc <= 0 {
                    return Err(invalid(path, "save DC must be positive"));
                }
            }
            if let Some(rider) = &attack.on_hit {
                validate_buff(rider, &format!("{}.on_hit", path))?;
            }
        }
        ActionKind::Heal(_) => {}
        ActionKind::Buff(buff) => validate_buff(&buff.buff, &format!("{}.buff", path))?,
        ActionKind::Debuff(debuff) => {
            validate_buff(&debuff.debuff, &format!("{}.debuff", path))?;
            if debuff.save_ends && debuff.save.is_none() {
                return Err(invalid(path, "save_ends requires a save"));
            }
        }
        ActionKind::Template(template) => {
            if !is_known_template(&template.template) {
                return Err(ValidationError::UnknownTemplate {
                    path: path.to_string(),
                    name: template.template.clone(),
                });
            }
            if template.overrides.targets == Some(0) {
                return Err(invalid(path, "override targets must be at least 1"));
            }
        }
    }
    Ok(())
}

fn validate_costs(costs: &[ActionCost], path: &str) -> Result<(), ValidationError> {
    for (i, cost) in costs.iter().enumerate() {
        let cost_path = format!("{}.cost[{}]", path, i);
        if let ResourceKind::SpellSlot(level) = cost.resource() {
            if !(1..=9).contains(level) {
                return Err(invalid(&cost_path, format!("spell slot level {} out of range", level)));
            }
        }
        if let ActionCost::Variable { min, max, .. } = cost {
            if min > max {
                return Err(invalid(&cost_path, "variable cost min exceeds max"));
            }
        }
    }
    Ok(())
}

fn validate_buff(buff: &BuffSpec, path: &str) -> Result<(), ValidationError> {
    if buff.name.trim().is_empty() {
        return Err(invalid(path, "buff name must not be empty"));
    }
    if buff.duration == BuffDuration::Rounds(0) {
        return Err(invalid(path, "buff duration must be at least one round"));
    }
    Ok(())
}

fn validate_reaction(reaction: &ReactionTemplate, path: &str) -> Result<(), ValidationError> {
    if reaction.name.trim().is_empty() {
        return Err(invalid(path, "reaction name must not be empty"));
    }
    validate_costs(&reaction.cost, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DiceExpression;
    use crate::model::timeline::{Encounter, RestKind};

    fn goblin() -> Creature {
        Creature::new("Goblin", 7, 15).with_action(Action::weapon(
            "Scimitar",
            4,
            DiceExpression::parse("1d6+2").unwrap(),
        ))
    }

    fn request() -> SimulationRequest {
        SimulationRequest::new(
            vec![Creature::new("Fighter", 30, 16)],
            vec![TimelineSegment::Combat(Encounter::new("Ambush", vec![goblin()]))],
        )
    }

    #[test]
    fn test_valid_request() {
        assert_eq!(validate_request(&request()), Ok(()));
    }

    #[test]
    fn test_empty_party_rejected() {
        let mut req = request();
        req.party.clear();
        assert_eq!(validate_request(&req), Err(ValidationError::EmptyParty));
    }

    #[test]
    fn test_rest_only_timeline_rejected() {
        let mut req = request();
        req.timeline = vec![TimelineSegment::Rest {
            kind: RestKind::Long,
        }];
        assert_eq!(validate_request(&req), Err(ValidationError::NoEncounters));
    }

    #[test]
    fn test_error_names_offending_path() {
        let mut req = request();
        req.party[0].hit_points = 0;
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.to_string(), "party[0]: hit_points must be positive");
    }

    #[test]
    fn test_unknown_template_rejected() {
        let mut req = request();
        req.party[0]
            .actions
            .push(Action::template("Mystery", "no_such_spell"));
        match validate_request(&req) {
            Err(ValidationError::UnknownTemplate { path, name }) => {
                assert_eq!(path, "party[0].actions[0]");
                assert_eq!(name, "no_such_spell");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fractional_count_must_be_positive() {
        let mut req = request();
        if let TimelineSegment::Combat(encounter) = &mut req.timeline[0] {
            encounter.monsters[0].count = 0.0;
        }
        assert!(matches!(
            validate_request(&req),
            Err(ValidationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_huge_count_rejected() {
        let mut req = request();
        if let TimelineSegment::Combat(encounter) = &mut req.timeline[0] {
            encounter.monsters[0].count = 1e9;
        }
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.to_string(), "timeline[0].monsters[0]: count must be at most 100");

        if let TimelineSegment::Combat(encounter) = &mut req.timeline[0] {
            encounter.monsters[0].count = MAX_CREATURE_COUNT;
        }
        assert_eq!(validate_request(&req), Ok(()));
    }
}
