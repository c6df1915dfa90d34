//! Requirement checks and target selection.

use crate::context::{InvariantError, TurnContext};
use crate::dice::d20_success_chance;
use crate::model::{
    ActionKind, Combattant, CombatPredicate, CombattantId, HealMode, Requirement, Subject,
    TargetStrategy,
};
use rand::seq::SliceRandom;
use std::cmp::Ordering;

/// Attack bonus assumed when ranking how hard a target is to bring down.
const REFERENCE_ATTACK_BONUS: i32 = 5;

fn predicate_holds(
    ctx: &TurnContext,
    actor: &Combattant,
    target: Option<&Combattant>,
    predicate: &CombatPredicate,
) -> bool {
    match predicate {
        CombatPredicate::SelfBloodied => actor.is_bloodied(),
        CombatPredicate::TargetBloodied => target.map(|t| t.is_bloodied()).unwrap_or(false),
        CombatPredicate::AllyInjured => ctx.living(actor.side).any(|ally| ally.is_injured()),
        CombatPredicate::AllyDown => ctx
            .units()
            .iter()
            .any(|unit| unit.side == actor.side && !unit.is_alive()),
        CombatPredicate::EnemiesAtLeast(n) => {
            ctx.living(actor.side.opposing()).count() >= *n as usize
        }
        CombatPredicate::RoundAtMost(n) => ctx.round() <= *n,
        CombatPredicate::RoundAtLeast(n) => ctx.round() >= *n,
        CombatPredicate::NotConcentrating => actor.state.concentration.is_none(),
    }
}

/// Named predicates usable from scenario files. Unknown names hold.
fn custom_holds(ctx: &TurnContext, actor: &Combattant, name: &str) -> bool {
    match name {
        "first_round" => ctx.round() == 1,
        "bloodied" => actor.is_bloodied(),
        "outnumbered" => {
            ctx.living(actor.side.opposing()).count() > ctx.living(actor.side).count()
        }
        "last_standing" => ctx.living(actor.side).count() == 1,
        "concentrating" => actor.state.concentration.is_some(),
        "ally_down" => predicate_holds(ctx, actor, None, &CombatPredicate::AllyDown),
        other => {
            tracing::debug!(requirement = other, "unknown custom requirement treated as met");
            true
        }
    }
}

/// Whether every actor-level requirement holds.
pub fn actor_requirements_met(
    ctx: &TurnContext,
    actor: CombattantId,
    requirements: &[Requirement],
) -> Result<bool, InvariantError> {
    let unit = ctx.unit(actor)?;
    Ok(requirements
        .iter()
        .filter(|req| !req.applies_to_target())
        .all(|req| match req {
            Requirement::Resource { resource, amount } => unit.resource(resource) >= *amount,
            Requirement::CombatState(predicate) => predicate_holds(ctx, unit, None, predicate),
            Requirement::HasCondition {
                condition, present, ..
            } => unit.has_condition(*condition) == *present,
            Requirement::HasBuff { buff, present, .. } => unit.has_buff(buff) == *present,
            Requirement::Custom(name) => custom_holds(ctx, unit, name),
        }))
}

fn target_passes(
    ctx: &TurnContext,
    actor: &Combattant,
    target: &Combattant,
    requirements: &[Requirement],
) -> bool {
    requirements
        .iter()
        .filter(|req| req.applies_to_target())
        .all(|req| match req {
            Requirement::CombatState(predicate) => {
                predicate_holds(ctx, actor, Some(target), predicate)
            }
            Requirement::HasCondition {
                subject: Subject::Target,
                condition,
                present,
            } => target.has_condition(*condition) == *present,
            Requirement::HasBuff {
                subject: Subject::Target,
                buff,
                present,
            } => target.has_buff(buff) == *present,
            _ => true,
        })
}

/// Every unit a concrete action kind could affect, ordered by id.
pub fn candidates(
    ctx: &TurnContext,
    actor: CombattantId,
    kind: &ActionKind,
    requirements: &[Requirement],
) -> Result<Vec<CombattantId>, InvariantError> {
    let unit = ctx.unit(actor)?;
    let pool: Vec<&Combattant> = match kind {
        ActionKind::Attack(_) => ctx.living(unit.side.opposing()).collect(),
        ActionKind::Heal(heal) => match heal.mode {
            HealMode::HitPoints => ctx.living(unit.side).filter(|a| a.is_injured()).collect(),
            HealMode::TemporaryHitPoints => ctx
                .living(unit.side)
                .filter(|a| a.state.temp_hp == 0)
                .collect(),
        },
        ActionKind::Buff(buff) => ctx
            .living(unit.side)
            .filter(|a| !a.has_buff(&buff.buff.name))
            .collect(),
        ActionKind::Debuff(debuff) => ctx
            .living(unit.side.opposing())
            .filter(|e| !e.has_buff(&debuff.debuff.name))
            .collect(),
        ActionKind::Template(_) => Vec::new(),
    };
    Ok(pool
        .into_iter()
        .filter(|target| target_passes(ctx, unit, target, requirements))
        .map(|target| target.id)
        .collect())
}

fn survivability(ctx: &TurnContext, unit: &Combattant) -> f64 {
    let ac = ctx.effective_ac(unit.id).unwrap_or(unit.armor_class);
    let hit_chance = d20_success_chance(REFERENCE_ATTACK_BONUS, ac);
    f64::from(unit.state.hp + unit.state.temp_hp) / hit_chance
}

/// Order candidates by strategy and take up to `count`.
pub fn select_targets(
    ctx: &mut TurnContext,
    actor: CombattantId,
    kind: &ActionKind,
    requirements: &[Requirement],
    strategy: TargetStrategy,
    count: u32,
) -> Result<Vec<CombattantId>, InvariantError> {
    let mut pool = candidates(ctx, actor, kind, requirements)?;
    let count = count as usize;

    match strategy {
        TargetStrategy::SelfOnly => {
            pool.retain(|id| *id == actor);
            return Ok(pool);
        }
        TargetStrategy::All => return Ok(pool),
        TargetStrategy::Random => {
            pool.shuffle(ctx.rng());
            pool.truncate(count);
            return Ok(pool);
        }
        _ => {}
    }

    let mut keyed: Vec<(f64, CombattantId)> = Vec::with_capacity(pool.len());
    for id in pool {
        let unit = ctx.unit(id)?;
        let key = match strategy {
            TargetStrategy::LeastHp => f64::from(unit.state.hp),
            TargetStrategy::MostHp => -f64::from(unit.state.hp),
            TargetStrategy::HighestDpr => -unit.dpr,
            TargetStrategy::LowestAc => f64::from(ctx.effective_ac(id)?),
            TargetStrategy::HighestSurvivability => -survivability(ctx, unit),
            TargetStrategy::Random | TargetStrategy::SelfOnly | TargetStrategy::All => 0.0,
        };
        keyed.push((key, id));
    }
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));
    Ok(keyed.into_iter().take(count).map(|(_, id)| id).collect())
}
