//! Turn context: the single owner of mutable encounter state.
//!
//! All HP, resource and status mutations go through here so each one is
//! published as exactly one event.

use crate::dice::{Advantage, D20Roll, DiceExpression};
use crate::events::{Absorber, Event, EventBus, EventLog, EventRecord, Retention, UnitSnapshot};
use crate::model::{
    Ability, ActionCost, ActiveEffect, BuffDuration, BuffSpec, Combattant, CombattantId,
    ConcentrationLink, ConcentrationSlot, DamageType, EffectId, HealMode, RerollKeep,
    ResourceKind, SaveCheck, Side,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use thiserror::Error;

/// An internal consistency violation. Fatal to the run that hit it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("unknown combattant {0}")]
    UnknownCombattant(CombattantId),
    #[error("{unit} has no action at index {index}")]
    UnknownAction { unit: CombattantId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("{unit} needs {needed} {resource} but has {available}")]
    Insufficient {
        unit: CombattantId,
        resource: ResourceKind,
        needed: u32,
        available: u32,
    },
    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// Whether turn-economy costs are charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostMode {
    Normal,
    /// Reaction-granted actions skip action, bonus action, reaction and movement.
    Immediate,
}

/// A pending adjustment applied to the next d20 roll evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollModification {
    Add(i32),
    Reroll(RerollKeep),
}

/// A d20 roll after pending modifications were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifiedRoll {
    pub natural: u32,
    /// Sum of `Add` modifications.
    pub bonus: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DamageReport {
    /// HP actually lost.
    pub taken: i32,
    pub prevented: i32,
    pub killed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    Expired,
    Removed,
}

pub struct TurnContext {
    units: Vec<Combattant>,
    bus: EventBus,
    rng: ChaCha8Rng,
    round: u32,
    roll_mods: Vec<RollModification>,
    next_effect: u32,
    next_token: u32,
}

impl TurnContext {
    /// Units must be indexed by their id.
    pub fn new(units: Vec<Combattant>, retention: Retention, rng: ChaCha8Rng) -> Self {
        Self {
            units,
            bus: EventBus::new(retention),
            rng,
            round: 0,
            roll_mods: Vec::new(),
            next_effect: 0,
            next_token: 0,
        }
    }

    pub fn units(&self) -> &[Combattant] {
        &self.units
    }

    pub fn unit(&self, id: CombattantId) -> Result<&Combattant, InvariantError> {
        self.units
            .get(id.0 as usize)
            .filter(|unit| unit.id == id)
            .ok_or(InvariantError::UnknownCombattant(id))
    }

    fn unit_mut(&mut self, id: CombattantId) -> Result<&mut Combattant, InvariantError> {
        self.units
            .get_mut(id.0 as usize)
            .filter(|unit| unit.id == id)
            .ok_or(InvariantError::UnknownCombattant(id))
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn emit(&mut self, event: Event) {
        self.bus.publish(self.round, event);
    }

    pub fn next_pending(&mut self) -> Option<EventRecord> {
        self.bus.next_pending()
    }

    pub fn clear_pending(&mut self) {
        self.bus.clear_pending();
    }

    pub fn log(&self) -> &EventLog {
        self.bus.log()
    }

    pub fn events_emitted(&self) -> u64 {
        self.bus.emitted()
    }

    pub fn living(&self, side: Side) -> impl Iterator<Item = &Combattant> {
        self.units
            .iter()
            .filter(move |unit| unit.side == side && unit.is_alive())
    }

    pub fn side_defeated(&self, side: Side) -> bool {
        self.living(side).next().is_none()
    }

    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        self.units.iter().map(UnitSnapshot::of).collect()
    }

    /// Hand back the units, the retained log and the generator.
    pub fn finish(self) -> (Vec<Combattant>, EventLog, ChaCha8Rng) {
        (self.units, self.bus.into_log(), self.rng)
    }

    // ------------------------------------------------------------------
    // Round and turn economy
    // ------------------------------------------------------------------

    pub fn begin_round(&mut self) -> Result<(), InvariantError> {
        self.round += 1;
        self.emit(Event::RoundStarted { round: self.round });
        let ids: Vec<CombattantId> = self
            .units
            .iter()
            .filter(|unit| unit.is_alive())
            .map(|unit| unit.id)
            .collect();
        for id in ids {
            self.refill(id, ResourceKind::Reaction)?;
        }
        Ok(())
    }

    /// Tick effect durations, expire what ran out and close the round.
    pub fn end_round(&mut self) -> Result<(), InvariantError> {
        let mut expired = Vec::new();
        for unit in &mut self.units {
            for effect in &mut unit.state.effects {
                if let Some(remaining) = effect.remaining_rounds.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        expired.push((unit.id, effect.id));
                    }
                }
            }
        }
        for (unit, effect) in expired {
            self.remove_effect(unit, effect, RemovalCause::Expired)?;
        }
        self.emit(Event::RoundEnded { round: self.round });
        Ok(())
    }

    pub fn begin_turn(&mut self, id: CombattantId) -> Result<(), InvariantError> {
        self.emit(Event::TurnStarted { unit: id });
        self.unit_mut(id)?.state.used_actions.clear();
        self.refill(id, ResourceKind::Action)?;
        self.refill(id, ResourceKind::BonusAction)?;
        self.refill(id, ResourceKind::Movement)?;
        Ok(())
    }

    pub fn end_turn(&mut self, id: CombattantId) -> Result<(), InvariantError> {
        self.unit(id)?;
        self.emit(Event::TurnEnded { unit: id });
        Ok(())
    }

    /// Restore a resource to its maximum, publishing only what was spent.
    fn refill(&mut self, id: CombattantId, kind: ResourceKind) -> Result<(), InvariantError> {
        let unit = self.unit_mut(id)?;
        let Some(balance) = unit.state.resources.get_mut(&kind) else {
            return Ok(());
        };
        let missing = balance.max.saturating_sub(balance.current);
        if missing == 0 {
            return Ok(());
        }
        balance.current = balance.max;
        let remaining = balance.current;
        self.emit(Event::ResourceRestored {
            unit: id,
            resource: kind,
            amount: missing,
            remaining,
        });
        Ok(())
    }

    pub fn mark_action_used(&mut self, id: CombattantId, index: usize) -> Result<(), InvariantError> {
        self.unit_mut(id)?.state.used_actions.insert(index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Costs
    // ------------------------------------------------------------------

    /// Merge costs per resource into (minimum, maximum) amounts.
    fn cost_plan(costs: &[ActionCost], mode: CostMode) -> BTreeMap<ResourceKind, (u32, u32)> {
        let mut plan: BTreeMap<ResourceKind, (u32, u32)> = BTreeMap::new();
        for cost in costs {
            let resource = cost.resource();
            if mode == CostMode::Immediate && resource.is_turn_economy() {
                continue;
            }
            let (min, max) = match cost {
                ActionCost::Discrete { amount, .. } => (*amount, *amount),
                ActionCost::Variable { min, max, .. } => (*min, *max),
            };
            let entry = plan.entry(resource.clone()).or_insert((0, 0));
            entry.0 += min;
            entry.1 += max;
        }
        plan
    }

    /// First resource that cannot cover its share of `costs`, if any.
    pub fn shortfall(
        &self,
        id: CombattantId,
        costs: &[ActionCost],
        mode: CostMode,
    ) -> Result<Option<ResourceKind>, InvariantError> {
        let unit = self.unit(id)?;
        Ok(Self::cost_plan(costs, mode)
            .into_iter()
            .find(|(kind, (min, _))| unit.resource(kind) < *min)
            .map(|(kind, _)| kind))
    }

    pub fn can_afford(
        &self,
        id: CombattantId,
        costs: &[ActionCost],
        mode: CostMode,
    ) -> Result<bool, InvariantError> {
        Ok(self.shortfall(id, costs, mode)?.is_none())
    }

    /// Pay every cost or none of them.
    pub fn pay_costs(
        &mut self,
        id: CombattantId,
        costs: &[ActionCost],
        mode: CostMode,
    ) -> Result<(), ResourceError> {
        let plan = Self::cost_plan(costs, mode);
        let unit = self.unit(id)?;
        for (kind, (min, _)) in &plan {
            let available = unit.resource(kind);
            if available < *min {
                return Err(ResourceError::Insufficient {
                    unit: id,
                    resource: kind.clone(),
                    needed: *min,
                    available,
                });
            }
        }

        for (kind, (_, max)) in plan {
            let unit = self.unit_mut(id)?;
            let Some(balance) = unit.state.resources.get_mut(&kind) else {
                continue;
            };
            let amount = max.min(balance.current);
            if amount == 0 {
                continue;
            }
            balance.current -= amount;
            let remaining = balance.current;
            let pooled = !kind.is_turn_economy();
            self.emit(Event::ResourceConsumed {
                unit: id,
                resource: kind.clone(),
                amount,
                remaining,
            });
            if pooled && remaining == 0 {
                self.emit(Event::ResourceDepleted {
                    unit: id,
                    resource: kind,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rolls
    // ------------------------------------------------------------------

    pub fn push_roll_mod(&mut self, modification: RollModification) {
        self.roll_mods.push(modification);
    }

    pub fn clear_roll_mods(&mut self) {
        self.roll_mods.clear();
    }

    /// Roll a d20, consuming every pending roll modification.
    pub fn roll_d20(&mut self, advantage: Advantage) -> ModifiedRoll {
        let roll = D20Roll::roll(advantage, &mut self.rng);
        let mut natural = roll.natural;
        let mut bonus = 0;
        for modification in std::mem::take(&mut self.roll_mods) {
            match modification {
                RollModification::Add(amount) => bonus += amount,
                RollModification::Reroll(keep) => {
                    let again = self.rng.gen_range(1..=20u32);
                    natural = match keep {
                        RerollKeep::Lower => natural.min(again),
                        RerollKeep::Higher => natural.max(again),
                    };
                }
            }
        }
        ModifiedRoll { natural, bonus }
    }

    pub fn roll(&mut self, dice: &DiceExpression) -> i32 {
        dice.roll(&mut self.rng).total
    }

    fn roll_all(&mut self, flat: i32, dice: Vec<DiceExpression>, critical: bool) -> i32 {
        let mut total = flat;
        for expr in dice {
            total += if critical {
                expr.roll_critical(&mut self.rng).total
            } else {
                expr.roll(&mut self.rng).total
            };
        }
        total
    }

    /// Flat and rolled to-hit bonus from active effects.
    pub fn attack_bonus(&mut self, attacker: CombattantId) -> Result<i32, InvariantError> {
        let unit = self.unit(attacker)?;
        let flat = unit.state.effects.iter().map(|e| e.buff.modifiers.to_hit).sum();
        let dice = unit
            .state
            .effects
            .iter()
            .filter_map(|e| e.buff.modifiers.to_hit_dice.clone())
            .collect();
        Ok(self.roll_all(flat, dice, false))
    }

    /// Extra damage from active effects; dice double on a critical.
    pub fn damage_bonus(&mut self, attacker: CombattantId, critical: bool) -> Result<i32, InvariantError> {
        let unit = self.unit(attacker)?;
        let flat = unit.state.effects.iter().map(|e| e.buff.modifiers.damage).sum();
        let dice = unit
            .state
            .effects
            .iter()
            .filter_map(|e| e.buff.modifiers.damage_dice.clone())
            .collect();
        Ok(self.roll_all(flat, dice, critical))
    }

    fn save_bonus(&mut self, id: CombattantId) -> Result<i32, InvariantError> {
        let unit = self.unit(id)?;
        let flat = unit.state.effects.iter().map(|e| e.buff.modifiers.save).sum();
        let dice = unit
            .state
            .effects
            .iter()
            .filter_map(|e| e.buff.modifiers.save_dice.clone())
            .collect();
        Ok(self.roll_all(flat, dice, false))
    }

    pub fn effective_ac(&self, id: CombattantId) -> Result<i32, InvariantError> {
        let unit = self.unit(id)?;
        let bonus: i32 = unit
            .state
            .effects
            .iter()
            .map(|e| e.buff.modifiers.armor_class)
            .sum();
        Ok(unit.armor_class + bonus)
    }

    /// Advantage from conditions on both sides of an attack.
    pub fn attack_advantage(
        &self,
        attacker: CombattantId,
        target: CombattantId,
    ) -> Result<Advantage, InvariantError> {
        let attacker = self.unit(attacker)?;
        let target = self.unit(target)?;
        let disadvantage = attacker
            .state
            .conditions
            .keys()
            .any(|c| c.imposes_attack_disadvantage());
        let advantage = target
            .state
            .conditions
            .keys()
            .any(|c| c.grants_advantage_to_attackers());
        let mut result = Advantage::Normal;
        if advantage {
            result = result.combine(Advantage::Advantage);
        }
        if disadvantage {
            result = result.combine(Advantage::Disadvantage);
        }
        Ok(result)
    }

    /// Roll a saving throw, publishing the attempt and its result.
    pub fn saving_throw(
        &mut self,
        id: CombattantId,
        ability: Ability,
        dc: i32,
    ) -> Result<bool, InvariantError> {
        let unit = self.unit(id)?;
        let base = unit.save_for(ability);
        let auto_fail = unit.is_incapacitated()
            && matches!(ability, Ability::Strength | Ability::Dexterity);
        self.emit(Event::SaveAttempted {
            unit: id,
            ability,
            dc,
        });
        let bonus = self.save_bonus(id)?;
        let roll = self.roll_d20(Advantage::Normal);
        let total = roll.natural as i32 + roll.bonus + base + bonus;
        let success = !auto_fail && total >= dc;
        self.emit(Event::SaveResult {
            unit: id,
            ability,
            roll: total,
            dc,
            success,
        });
        Ok(success)
    }

    // ------------------------------------------------------------------
    // Hit points
    // ------------------------------------------------------------------

    /// Apply damage through immunity, resistance, vulnerability, ward and
    /// temporary HP, in that order.
    pub fn apply_damage(
        &mut self,
        target: CombattantId,
        amount: i32,
        damage_type: DamageType,
        source: Option<CombattantId>,
    ) -> Result<DamageReport, InvariantError> {
        let mut report = DamageReport::default();
        let unit = self.unit(target)?;
        if amount <= 0 || !unit.is_alive() {
            return Ok(report);
        }

        let mut prevented: Vec<(Absorber, i32)> = Vec::new();
        let mut remaining = amount;
        let resistant = unit.resistances.contains(&damage_type);
        let vulnerable = unit.vulnerabilities.contains(&damage_type);
        if unit.immunities.contains(&damage_type) {
            prevented.push((Absorber::Immunity, remaining));
            remaining = 0;
        } else if resistant && !vulnerable {
            let reduced = remaining / 2;
            prevented.push((Absorber::Resistance, remaining - reduced));
            remaining = reduced;
        } else if vulnerable && !resistant {
            remaining *= 2;
        }

        let unit = self.unit_mut(target)?;
        let ward = unit.state.ward.min(remaining);
        unit.state.ward -= ward;
        remaining -= ward;
        prevented.push((Absorber::Ward, ward));

        let temp = unit.state.temp_hp.min(remaining);
        unit.state.temp_hp -= temp;
        remaining -= temp;
        prevented.push((Absorber::TempHp, temp));

        let taken = unit.state.hp.min(remaining);
        unit.state.hp -= taken;
        let hp_after = unit.state.hp;

        for (absorbed_by, absorbed) in prevented {
            if absorbed > 0 {
                report.prevented += absorbed;
                self.emit(Event::DamagePrevented {
                    target,
                    source,
                    amount: absorbed,
                    absorbed_by,
                });
            }
        }
        if taken > 0 {
            report.taken = taken;
            self.emit(Event::DamageTaken {
                target,
                source,
                amount: taken,
                damage_type,
                hp_after,
            });
        }

        if hp_after <= 0 {
            self.kill(target, source)?;
            report.killed = true;
        } else if taken + temp > 0 {
            self.concentration_check(target, taken + temp)?;
        }
        Ok(report)
    }

    fn kill(&mut self, id: CombattantId, killer: Option<CombattantId>) -> Result<(), InvariantError> {
        let unit = self.unit_mut(id)?;
        if unit.state.dead {
            return Ok(());
        }
        unit.state.dead = true;
        unit.state.hp = 0;
        tracing::trace!(unit = %id, "unit died");
        self.emit(Event::UnitDied { unit: id, killer });
        self.break_concentration(id)
    }

    /// Heal HP up to maximum, or grant temporary HP (which never stacks).
    /// Returns the amount actually gained; dead units gain nothing.
    pub fn apply_healing(
        &mut self,
        target: CombattantId,
        amount: i32,
        mode: HealMode,
        source: Option<CombattantId>,
    ) -> Result<i32, InvariantError> {
        let unit = self.unit_mut(target)?;
        if amount <= 0 || unit.state.dead {
            return Ok(0);
        }
        match mode {
            HealMode::HitPoints => {
                let healed = amount.min(unit.max_hp - unit.state.hp).max(0);
                if healed == 0 {
                    return Ok(0);
                }
                unit.state.hp += healed;
                let hp_after = unit.state.hp;
                self.emit(Event::HealingApplied {
                    target,
                    source,
                    amount: healed,
                    hp_after,
                });
                Ok(healed)
            }
            HealMode::TemporaryHitPoints => {
                let gained = (amount - unit.state.temp_hp).max(0);
                if gained == 0 {
                    return Ok(0);
                }
                unit.state.temp_hp += gained;
                let temp_after = unit.state.temp_hp;
                self.emit(Event::TempHpGranted {
                    target,
                    source,
                    amount: gained,
                    temp_after,
                });
                Ok(gained)
            }
        }
    }

    // ------------------------------------------------------------------
    // Buffs, conditions and concentration
    // ------------------------------------------------------------------

    /// Start concentrating on `spell`, ending any previous concentration.
    pub fn begin_concentration(
        &mut self,
        caster: CombattantId,
        spell: &str,
    ) -> Result<ConcentrationLink, InvariantError> {
        self.break_concentration(caster)?;
        let token = self.next_token;
        self.next_token += 1;
        self.unit_mut(caster)?.state.concentration = Some(ConcentrationSlot {
            spell: spell.to_string(),
            token,
        });
        Ok(ConcentrationLink { caster, token })
    }

    /// End a caster's concentration and every effect tied to it.
    pub fn break_concentration(&mut self, caster: CombattantId) -> Result<(), InvariantError> {
        let Some(slot) = self.unit_mut(caster)?.state.concentration.take() else {
            return Ok(());
        };
        self.emit(Event::ConcentrationBroken {
            caster,
            spell: slot.spell.clone(),
        });
        let link = ConcentrationLink {
            caster,
            token: slot.token,
        };
        let mut linked = Vec::new();
        for unit in &self.units {
            for effect in &unit.state.effects {
                if effect.concentration == Some(link) {
                    linked.push((unit.id, effect.id));
                }
            }
        }
        for (unit, effect) in linked {
            self.remove_effect(unit, effect, RemovalCause::Removed)?;
        }
        Ok(())
    }

    fn concentration_check(&mut self, id: CombattantId, damage: i32) -> Result<(), InvariantError> {
        let Some(slot) = self.unit(id)?.state.concentration.clone() else {
            return Ok(());
        };
        let dc = (damage / 2).max(10);
        if self.saving_throw(id, Ability::Constitution, dc)? {
            self.emit(Event::ConcentrationMaintained {
                caster: id,
                spell: slot.spell,
            });
        } else {
            self.break_concentration(id)?;
        }
        Ok(())
    }

    /// Apply a buff or debuff. Returns `None` if the target is dead.
    pub fn add_buff(
        &mut self,
        target: CombattantId,
        source: CombattantId,
        buff: &BuffSpec,
        concentration: Option<ConcentrationLink>,
        save_ends: Option<SaveCheck>,
    ) -> Result<Option<EffectId>, InvariantError> {
        if !self.unit(target)?.is_alive() {
            return Ok(None);
        }
        let id = EffectId(self.next_effect);
        self.next_effect += 1;
        let remaining_rounds = match buff.duration {
            BuffDuration::Rounds(rounds) => Some(rounds),
            BuffDuration::UntilRemoved => None,
        };
        let unit = self.unit_mut(target)?;
        unit.state.effects.push(ActiveEffect {
            id,
            buff: buff.clone(),
            source,
            remaining_rounds,
            concentration,
            save_ends,
        });
        let newly_added = buff.modifiers.condition.map(|condition| {
            let count = unit.state.conditions.entry(condition).or_insert(0);
            *count += 1;
            (condition, *count == 1)
        });
        self.emit(Event::BuffApplied {
            target,
            source,
            buff: buff.name.clone(),
        });
        if let Some((condition, true)) = newly_added {
            self.emit(Event::ConditionAdded { target, condition });
        }
        Ok(Some(id))
    }

    /// Remove an effect. Returns false if it was already gone.
    pub fn remove_effect(
        &mut self,
        target: CombattantId,
        effect: EffectId,
        cause: RemovalCause,
    ) -> Result<bool, InvariantError> {
        let unit = self.unit_mut(target)?;
        let Some(index) = unit.state.effects.iter().position(|e| e.id == effect) else {
            return Ok(false);
        };
        let removed = unit.state.effects.remove(index);
        let mut lifted = None;
        if let Some(condition) = removed.buff.modifiers.condition {
            if let Some(count) = unit.state.conditions.get_mut(&condition) {
                *count -= 1;
                if *count == 0 {
                    unit.state.conditions.remove(&condition);
                    lifted = Some(condition);
                }
            }
        }

        let buff = removed.buff.name.clone();
        self.emit(match cause {
            RemovalCause::Expired => Event::BuffExpired { target, buff },
            RemovalCause::Removed => Event::BuffRemoved { target, buff },
        });
        if let Some(condition) = lifted {
            self.emit(Event::ConditionRemoved { target, condition });
        }

        // Concentration ends once nothing tied to it remains.
        if let Some(link) = removed.concentration {
            let still_linked = self.units.iter().any(|unit| {
                unit.state
                    .effects
                    .iter()
                    .any(|e| e.concentration == Some(link))
            });
            let caster_slot = self
                .unit(link.caster)?
                .state
                .concentration
                .as_ref()
                .map(|slot| slot.token);
            if !still_linked && caster_slot == Some(link.token) {
                self.break_concentration(link.caster)?;
            }
        }
        Ok(true)
    }

    /// Repeat save-ends saves at the end of a unit's turn.
    pub fn resolve_save_ends(&mut self, id: CombattantId) -> Result<(), InvariantError> {
        let checks: Vec<(EffectId, SaveCheck)> = self
            .unit(id)?
            .state
            .effects
            .iter()
            .filter_map(|effect| effect.save_ends.map(|check| (effect.id, check)))
            .collect();
        for (effect, check) in checks {
            if !self.unit(id)?.is_alive() {
                break;
            }
            if self.saving_throw(id, check.ability, check.dc)? {
                self.remove_effect(id, effect, RemovalCause::Removed)?;
            }
        }
        Ok(())
    }

    /// Apply every unit's starting buffs at the top of an encounter.
    pub fn apply_starting_buffs(&mut self) -> Result<(), InvariantError> {
        let starting: Vec<(CombattantId, BuffSpec)> = self
            .units
            .iter()
            .flat_map(|unit| unit.starting_buffs.iter().map(move |b| (unit.id, b.clone())))
            .collect();
        for (id, buff) in starting {
            self.add_buff(id, id, &buff, None, None)?;
        }
        Ok(())
    }
}
