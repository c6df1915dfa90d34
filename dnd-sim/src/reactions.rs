//! Reaction manager: decides which reactions fire in response to each
//! published event and applies their effects before the engine moves on.

use crate::context::{CostMode, InvariantError, ResourceError, RollModification, TurnContext};
use crate::diagnostics::Diagnostic;
use crate::events::Event;
use crate::model::{
    Combattant, CombattantId, HealMode, ReactionBudget, ReactionEffect, ReactionTemplate,
    TriggerCondition, TriggerRequirement,
};
use std::collections::{BTreeSet, VecDeque};

/// An action granted by a reaction, resolved outside the owner's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmediateAction {
    pub unit: CombattantId,
    pub action: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    owner: CombattantId,
    index: usize,
    priority: i32,
}

/// Per-encounter reaction bookkeeping.
#[derive(Debug)]
pub struct ReactionManager {
    spent_once: BTreeSet<(CombattantId, usize)>,
    interrupt: Option<CombattantId>,
    immediate: VecDeque<ImmediateAction>,
    diagnostics: Vec<Diagnostic>,
    max_cascade: u32,
    fired: u64,
}

impl ReactionManager {
    pub fn new(max_cascade: u32) -> Self {
        Self {
            spent_once: BTreeSet::new(),
            interrupt: None,
            immediate: VecDeque::new(),
            diagnostics: Vec::new(),
            max_cascade: max_cascade.max(1),
            fired: 0,
        }
    }

    /// Drain every pending event, firing matching reactions in priority order.
    /// Events published by fired reactions are drained in the same pass.
    pub fn process(&mut self, ctx: &mut TurnContext) -> Result<(), InvariantError> {
        let mut fired = 0u32;
        while let Some(record) = ctx.next_pending() {
            for candidate in self.candidates(ctx, &record.event)? {
                if fired >= self.max_cascade {
                    tracing::warn!(round = ctx.round(), limit = self.max_cascade, "reaction cascade cut off");
                    self.diagnostics.push(Diagnostic::ReactionCascadeLimit {
                        round: ctx.round(),
                        limit: self.max_cascade,
                    });
                    ctx.clear_pending();
                    return Ok(());
                }
                if self.fire(ctx, candidate, &record.event)? {
                    fired += 1;
                }
            }
        }
        Ok(())
    }

    /// Consume the interrupt flag raised since the last call.
    pub fn take_interrupt(&mut self) -> Option<CombattantId> {
        self.interrupt.take()
    }

    pub fn take_immediate(&mut self) -> Option<ImmediateAction> {
        self.immediate.pop_front()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Total reactions fired this encounter.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    fn usable(
        &self,
        ctx: &TurnContext,
        unit: &Combattant,
        index: usize,
        reaction: &ReactionTemplate,
    ) -> Result<bool, InvariantError> {
        if !unit.is_alive() || unit.is_incapacitated() {
            return Ok(false);
        }
        if reaction.budget == ReactionBudget::OncePerEncounter
            && self.spent_once.contains(&(unit.id, index))
        {
            return Ok(false);
        }
        ctx.can_afford(unit.id, &reaction.total_cost(), CostMode::Normal)
    }

    fn candidates(&self, ctx: &TurnContext, event: &Event) -> Result<Vec<Candidate>, InvariantError> {
        let mut found = Vec::new();
        for unit in ctx.units() {
            for (index, reaction) in unit.reactions.iter().enumerate() {
                if !triggers(ctx, unit, reaction.trigger, event)?
                    || !self.usable(ctx, unit, index, reaction)?
                {
                    continue;
                }
                if let Some(requirement) = &reaction.requirement {
                    if !requirement_holds(unit, requirement, event) {
                        continue;
                    }
                }
                found.push(Candidate {
                    owner: unit.id,
                    index,
                    priority: reaction.priority,
                });
            }
        }
        found.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.owner.cmp(&b.owner))
                .then(a.index.cmp(&b.index))
        });
        Ok(found)
    }

    /// Fire one candidate if it is still usable. Earlier reactions in the same
    /// drain may have spent its budget or downed its owner.
    fn fire(
        &mut self,
        ctx: &mut TurnContext,
        candidate: Candidate,
        event: &Event,
    ) -> Result<bool, InvariantError> {
        let owner = candidate.owner;
        let unit = ctx.unit(owner)?;
        let Some(reaction) = unit.reactions.get(candidate.index).cloned() else {
            return Err(InvariantError::UnknownAction {
                unit: owner,
                index: candidate.index,
            });
        };
        if !self.usable(ctx, unit, candidate.index, &reaction)? {
            return Ok(false);
        }
        let owner_name = unit.name.clone();

        match ctx.pay_costs(owner, &reaction.total_cost(), CostMode::Normal) {
            Ok(()) => {}
            Err(ResourceError::Insufficient { .. }) => return Ok(false),
            Err(ResourceError::Invariant(err)) => return Err(err),
        }
        if reaction.budget == ReactionBudget::OncePerEncounter {
            self.spent_once.insert((owner, candidate.index));
        }
        self.fired += 1;
        ctx.emit(Event::ReactionTriggered {
            unit: owner,
            reaction: reaction.name.clone(),
        });

        match &reaction.effect {
            ReactionEffect::DealDamage {
                damage,
                damage_type,
            } => match other_party(owner, event) {
                Some(target) => {
                    let amount = ctx.roll(damage);
                    ctx.apply_damage(target, amount, *damage_type, Some(owner))?;
                }
                None => tracing::trace!(unit = %owner, reaction = %reaction.name, "no one to strike back at"),
            },
            ReactionEffect::GrantImmediateAction { action } => {
                let index = ctx
                    .unit(owner)?
                    .actions
                    .iter()
                    .position(|candidate| candidate.name == *action);
                match index {
                    Some(index) => self.immediate.push_back(ImmediateAction {
                        unit: owner,
                        action: index,
                    }),
                    None => {
                        tracing::warn!(
                            unit = %owner_name,
                            reaction = %reaction.name,
                            action = %action,
                            "reaction grants an unknown action, ignoring"
                        );
                        let diagnostic = Diagnostic::UnknownReactionAction {
                            unit: owner_name,
                            reaction: reaction.name.clone(),
                            action: action.clone(),
                        };
                        if !self.diagnostics.contains(&diagnostic) {
                            self.diagnostics.push(diagnostic);
                        }
                    }
                }
            }
            ReactionEffect::InterruptAction => {
                if self.interrupt.is_none() {
                    self.interrupt = Some(owner);
                }
            }
            ReactionEffect::AddToRoll { amount } => {
                ctx.push_roll_mod(RollModification::Add(*amount));
            }
            ReactionEffect::ForceReroll { keep } => {
                ctx.push_roll_mod(RollModification::Reroll(*keep));
            }
            ReactionEffect::GainTempHp { amount } => {
                let amount = ctx.roll(amount);
                ctx.apply_healing(owner, amount, HealMode::TemporaryHitPoints, Some(owner))?;
            }
            ReactionEffect::ApplyBuff { buff } => {
                ctx.add_buff(owner, owner, buff, None, None)?;
            }
        }
        Ok(true)
    }
}

fn side_of(ctx: &TurnContext, id: CombattantId) -> Result<crate::model::Side, InvariantError> {
    Ok(ctx.unit(id)?.side)
}

/// Whether `event` matches `trigger` from the point of view of `owner`.
fn triggers(
    ctx: &TurnContext,
    owner: &Combattant,
    trigger: TriggerCondition,
    event: &Event,
) -> Result<bool, InvariantError> {
    let me = owner.id;
    Ok(match (trigger, event) {
        (TriggerCondition::OnHit, Event::AttackHit { attacker, .. }) => *attacker == me,
        (TriggerCondition::OnMiss, Event::AttackMissed { attacker, .. }) => *attacker == me,
        (TriggerCondition::OnBeingAttacked, Event::AttackDeclared { target, .. }) => *target == me,
        (TriggerCondition::OnBeingHit, Event::AttackHit { target, .. }) => *target == me,
        (TriggerCondition::OnBeingDamaged, Event::DamageTaken { target, .. }) => *target == me,
        (TriggerCondition::OnEnemyDeath, Event::UnitDied { unit, .. }) => {
            side_of(ctx, *unit)? != owner.side
        }
        (TriggerCondition::OnAllyDeath, Event::UnitDied { unit, .. }) => {
            *unit != me && side_of(ctx, *unit)? == owner.side
        }
        (TriggerCondition::OnEnemySpellCast, Event::SpellCast { caster, .. }) => {
            side_of(ctx, *caster)? != owner.side
        }
        _ => false,
    })
}

fn requirement_holds(owner: &Combattant, requirement: &TriggerRequirement, event: &Event) -> bool {
    match requirement {
        TriggerRequirement::HasTempHp => owner.state.temp_hp > 0,
        TriggerRequirement::BelowHalfHp => owner.is_bloodied(),
        TriggerRequirement::HasResource { resource, amount } => owner.resource(resource) >= *amount,
        TriggerRequirement::DamageAtLeast(threshold) => {
            matches!(event, Event::DamageTaken { amount, .. } if amount >= threshold)
        }
        TriggerRequirement::CriticalHit => {
            matches!(event, Event::AttackHit { critical: true, .. })
        }
    }
}

/// The other combattant in the triggering event, never the owner itself.
fn other_party(owner: CombattantId, event: &Event) -> Option<CombattantId> {
    let other = match event {
        Event::UnitDied { killer, .. } => *killer,
        _ if event.subject() == Some(owner) => event.counterpart(),
        _ => event.subject(),
    };
    other.filter(|id| *id != owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DiceExpression;
    use crate::events::Retention;
    use crate::model::{
        Action, ActionCost, BuffSpec, Creature, DamageType, ResourceKind, RerollKeep, Side,
    };
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rebuke() -> ReactionTemplate {
        ReactionTemplate::new(
            "Hellish Rebuke",
            TriggerCondition::OnBeingDamaged,
            ReactionEffect::DealDamage {
                damage: DiceExpression::flat(4),
                damage_type: DamageType::Fire,
            },
        )
    }

    fn arena(hero: Creature, foe: Creature) -> TurnContext {
        let units = vec![
            Combattant::from_creature(CombattantId(0), Side::Party, &hero, 0.0),
            Combattant::from_creature(CombattantId(1), Side::Monsters, &foe, 0.0),
        ];
        let mut ctx = TurnContext::new(units, Retention::Full, ChaCha8Rng::seed_from_u64(3));
        ctx.begin_round().unwrap();
        ctx
    }

    fn count(ctx: &TurnContext, name: &str) -> usize {
        ctx.log().records().filter(|r| r.event.name() == name).count()
    }

    #[test]
    fn test_reaction_fires_once_per_round() {
        let mut ctx = arena(
            Creature::new("Warlock", 30, 12).with_reaction(rebuke()),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        let (warlock, orc) = (CombattantId(0), CombattantId(1));

        ctx.apply_damage(warlock, 5, DamageType::Slashing, Some(orc)).unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(ctx.unit(orc).unwrap().state.hp, 26);
        assert_eq!(ctx.unit(warlock).unwrap().resource(&ResourceKind::Reaction), 0);

        ctx.apply_damage(warlock, 5, DamageType::Slashing, Some(orc)).unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(ctx.unit(orc).unwrap().state.hp, 26);

        ctx.end_round().unwrap();
        ctx.begin_round().unwrap();
        ctx.apply_damage(warlock, 5, DamageType::Slashing, Some(orc)).unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(ctx.unit(orc).unwrap().state.hp, 22);
        assert_eq!(count(&ctx, "ReactionTriggered"), 2);
    }

    #[test]
    fn test_once_per_encounter_never_resets() {
        let mut ctx = arena(
            Creature::new("Warlock", 30, 12)
                .with_reaction(rebuke().with_budget(ReactionBudget::OncePerEncounter)),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        for _ in 0..3 {
            ctx.apply_damage(CombattantId(0), 2, DamageType::Slashing, Some(CombattantId(1)))
                .unwrap();
            manager.process(&mut ctx).unwrap();
            ctx.end_round().unwrap();
            ctx.begin_round().unwrap();
        }
        assert_eq!(manager.fired(), 1);
    }

    #[test]
    fn test_priority_decides_which_reaction_spends_the_budget() {
        let low = rebuke().with_priority(1);
        let high = ReactionTemplate::new(
            "Uncanny Dodge",
            TriggerCondition::OnBeingDamaged,
            ReactionEffect::GainTempHp {
                amount: DiceExpression::flat(5),
            },
        )
        .with_priority(10);
        let mut ctx = arena(
            Creature::new("Rogue", 30, 15).with_reaction(low).with_reaction(high),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        ctx.apply_damage(CombattantId(0), 3, DamageType::Slashing, Some(CombattantId(1)))
            .unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(ctx.unit(CombattantId(0)).unwrap().state.temp_hp, 5);
        assert_eq!(ctx.unit(CombattantId(1)).unwrap().state.hp, 30);
    }

    #[test]
    fn test_requirement_gates_trigger() {
        let guarded = rebuke().with_requirement(TriggerRequirement::DamageAtLeast(10));
        let mut ctx = arena(
            Creature::new("Warlock", 30, 12).with_reaction(guarded),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        ctx.apply_damage(CombattantId(0), 4, DamageType::Slashing, Some(CombattantId(1)))
            .unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.fired(), 0);
        ctx.apply_damage(CombattantId(0), 12, DamageType::Slashing, Some(CombattantId(1)))
            .unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.fired(), 1);
    }

    #[test]
    fn test_incapacitated_owner_does_not_react() {
        let mut ctx = arena(
            Creature::new("Warlock", 30, 12).with_reaction(rebuke()),
            Creature::new("Orc", 30, 13),
        );
        let stun = BuffSpec::new("Stunning Strike").with_condition(crate::model::Condition::Stunned);
        ctx.add_buff(CombattantId(0), CombattantId(1), &stun, None, None).unwrap();
        let mut manager = ReactionManager::new(64);
        ctx.apply_damage(CombattantId(0), 4, DamageType::Slashing, Some(CombattantId(1)))
            .unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.fired(), 0);
    }

    #[test]
    fn test_interrupt_and_roll_mods() {
        let counter = ReactionTemplate::new(
            "Counterspell",
            TriggerCondition::OnEnemySpellCast,
            ReactionEffect::InterruptAction,
        );
        let cutting = ReactionTemplate::new(
            "Cutting Words",
            TriggerCondition::OnBeingAttacked,
            ReactionEffect::ForceReroll {
                keep: RerollKeep::Lower,
            },
        )
        .with_budget(ReactionBudget::Free);
        let mut ctx = arena(
            Creature::new("Wizard", 20, 12).with_reaction(counter).with_reaction(cutting),
            Creature::new("Mage", 20, 12),
        );
        let mut manager = ReactionManager::new(64);
        ctx.emit(Event::SpellCast {
            caster: CombattantId(1),
            spell: "Fireball".to_string(),
            slot_level: Some(3),
        });
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.take_interrupt(), Some(CombattantId(0)));
        assert_eq!(manager.take_interrupt(), None);

        ctx.emit(Event::AttackDeclared {
            attacker: CombattantId(1),
            target: CombattantId(0),
            action: "Dagger".to_string(),
        });
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.fired(), 2);
    }

    #[test]
    fn test_unknown_granted_action_is_diagnosed() {
        let grant = ReactionTemplate::new(
            "Riposte",
            TriggerCondition::OnBeingAttacked,
            ReactionEffect::GrantImmediateAction {
                action: "Lunge".to_string(),
            },
        );
        let sword = Action::weapon("Sword", 5, DiceExpression::parse("1d8+3").unwrap());
        let mut ctx = arena(
            Creature::new("Duelist", 30, 15).with_reaction(grant.clone()),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        ctx.emit(Event::AttackDeclared {
            attacker: CombattantId(1),
            target: CombattantId(0),
            action: "Axe".to_string(),
        });
        manager.process(&mut ctx).unwrap();
        assert!(manager.take_immediate().is_none());
        assert!(matches!(
            manager.diagnostics(),
            [Diagnostic::UnknownReactionAction { .. }]
        ));

        let riposte = ReactionTemplate::new(
            "Riposte",
            TriggerCondition::OnBeingAttacked,
            ReactionEffect::GrantImmediateAction {
                action: "Sword".to_string(),
            },
        );
        let mut ctx = arena(
            Creature::new("Duelist", 30, 15).with_action(sword).with_reaction(riposte),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        ctx.emit(Event::AttackDeclared {
            attacker: CombattantId(1),
            target: CombattantId(0),
            action: "Axe".to_string(),
        });
        manager.process(&mut ctx).unwrap();
        assert_eq!(
            manager.take_immediate(),
            Some(ImmediateAction {
                unit: CombattantId(0),
                action: 0
            })
        );
    }

    #[test]
    fn test_cascade_is_bounded() {
        let thorns = |name: &str| {
            ReactionTemplate::new(
                name,
                TriggerCondition::OnBeingDamaged,
                ReactionEffect::DealDamage {
                    damage: DiceExpression::flat(1),
                    damage_type: DamageType::Piercing,
                },
            )
            .with_budget(ReactionBudget::Free)
        };
        let mut ctx = arena(
            Creature::new("Bramble", 1000, 10).with_reaction(thorns("Thorns")),
            Creature::new("Hedge", 1000, 10).with_reaction(thorns("Spines")),
        );
        let mut manager = ReactionManager::new(16);
        ctx.apply_damage(CombattantId(0), 1, DamageType::Piercing, Some(CombattantId(1)))
            .unwrap();
        manager.process(&mut ctx).unwrap();
        assert_eq!(manager.fired(), 16);
        assert!(matches!(
            manager.diagnostics(),
            [Diagnostic::ReactionCascadeLimit { limit: 16, .. }]
        ));
    }

    #[test]
    fn test_extra_cost_is_paid() {
        let smite = ReactionTemplate::new(
            "Divine Smite",
            TriggerCondition::OnHit,
            ReactionEffect::DealDamage {
                damage: DiceExpression::flat(9),
                damage_type: DamageType::Radiant,
            },
        )
        .with_budget(ReactionBudget::Free)
        .with_cost(ActionCost::spell_slot(1));
        let mut ctx = arena(
            Creature::new("Paladin", 30, 18)
                .with_spell_slots(1, 1)
                .with_reaction(smite),
            Creature::new("Orc", 30, 13),
        );
        let mut manager = ReactionManager::new(64);
        for _ in 0..2 {
            ctx.emit(Event::AttackHit {
                attacker: CombattantId(0),
                target: CombattantId(1),
                roll: 18,
                natural: 12,
                armor_class: 13,
                critical: false,
            });
            manager.process(&mut ctx).unwrap();
        }
        assert_eq!(ctx.unit(CombattantId(1)).unwrap().state.hp, 21);
        assert_eq!(
            ctx.unit(CombattantId(0)).unwrap().resource(&ResourceKind::SpellSlot(1)),
            0
        );
    }
}
