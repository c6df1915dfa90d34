//! Action selection: score every usable action and take the best.
//!
//! The weights come from [`AiWeights`]; they are tuned heuristics, so the
//! tests here pin the current choices rather than any notion of optimal play.

use crate::config::AiWeights;
use crate::context::{CostMode, InvariantError, TurnContext};
use crate::dice::d20_success_chance;
use crate::model::{
    Action, ActionKind, AttackAction, CombattantId, HealAction, HitRoll, TargetStrategy,
};
use crate::resolver::template::find_template;
use crate::resolver::{targeting, ActionResolver, Plan};

/// Armor class assumed when estimating damage output outside combat.
const REFERENCE_AC: i32 = 15;
/// Save bonus assumed when estimating damage output outside combat.
const REFERENCE_SAVE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionChoice {
    pub index: usize,
    pub score: f64,
}

/// Fraction of `attack`'s average damage expected to land, given a target's
/// armor class and save bonus.
fn landing_chance(attack: &AttackAction, armor_class: f64, save: f64) -> f64 {
    match &attack.hit {
        HitRoll::ToHit(bonus) => {
            d20_success_chance(*bonus, armor_class.round() as i32)
        }
        HitRoll::Save {
            dc,
            half_on_success,
            ..
        } => {
            let saves = d20_success_chance(save.round() as i32, *dc);
            let on_save = if *half_on_success { 0.5 } else { 0.0 };
            (1.0 - saves) + saves * on_save
        }
        HitRoll::Auto => 1.0,
    }
}

fn expected_attack_damage(attack: &AttackAction, armor_class: f64, save: f64) -> f64 {
    attack.damage.average() * f64::from(attack.attacks) * landing_chance(attack, armor_class, save)
}

fn targets_reached(plan: &Plan, candidates: usize) -> usize {
    match plan.target {
        TargetStrategy::All => candidates,
        TargetStrategy::SelfOnly => candidates.min(1),
        _ => candidates.min(plan.targets as usize),
    }
}

/// Average damage a creature deals per round with its best single action.
pub fn estimate_dpr(actions: &[Action]) -> f64 {
    actions
        .iter()
        .filter_map(|action| {
            let (kind, targets) = match &action.kind {
                ActionKind::Template(reference) => {
                    let template = find_template(&reference.template)?;
                    let resolved = template.instantiate(&reference.overrides);
                    (resolved.kind, resolved.targets)
                }
                kind => (kind.clone(), action.targets),
            };
            match kind {
                ActionKind::Attack(attack) => Some(
                    expected_attack_damage(&attack, f64::from(REFERENCE_AC), f64::from(REFERENCE_SAVE))
                        * f64::from(targets.max(1)),
                ),
                _ => None,
            }
        })
        .fold(0.0, f64::max)
}

fn score(
    ctx: &TurnContext,
    action: &Action,
    plan: &Plan,
    candidates: &[CombattantId],
    weights: &AiWeights,
) -> Result<f64, InvariantError> {
    let reached = targets_reached(plan, candidates.len()) as f64;
    let early = weights.is_early(ctx.round());
    Ok(match (&action.kind, &plan.kind) {
        (ActionKind::Template(_), _) => {
            if early {
                weights.template_early
            } else {
                weights.template_late
            }
        }
        (_, ActionKind::Attack(attack)) => {
            let mut armor = 0.0;
            let mut save = 0.0;
            for id in candidates {
                armor += f64::from(ctx.effective_ac(*id)?);
                let target = ctx.unit(*id)?;
                save += f64::from(match &attack.hit {
                    HitRoll::Save { ability, .. } => target.save_for(*ability),
                    _ => target.save_bonus,
                });
            }
            let n = candidates.len().max(1) as f64;
            expected_attack_damage(attack, armor / n, save / n) * reached * weights.attack
        }
        // Every injured ally counts, however many the heal itself reaches.
        (_, ActionKind::Heal(HealAction { amount, .. })) => {
            amount.average() * candidates.len() as f64 * weights.heal
        }
        (_, ActionKind::Buff(_)) => {
            if early {
                weights.buff_early
            } else {
                weights.buff_late
            }
        }
        (_, ActionKind::Debuff(_)) => {
            let dangerous = candidates
                .iter()
                .filter(|id| {
                    ctx.unit(**id)
                        .map(|unit| !unit.is_incapacitated())
                        .unwrap_or(false)
                })
                .count();
            dangerous as f64 * weights.debuff
        }
        (_, ActionKind::Template(_)) => 0.0,
    })
}

/// The highest-scoring usable action; ties go to the earliest declared.
pub fn choose_action(
    ctx: &TurnContext,
    resolver: &mut ActionResolver,
    actor: CombattantId,
    weights: &AiWeights,
) -> Result<Option<ActionChoice>, InvariantError> {
    let unit = ctx.unit(actor)?;
    let actions = unit.actions.clone();
    let used = unit.state.used_actions.clone();

    let mut best: Option<ActionChoice> = None;
    for (index, action) in actions.iter().enumerate() {
        if used.contains(&index)
            || !ctx.can_afford(actor, &action.cost, CostMode::Normal)?
            || !targeting::actor_requirements_met(ctx, actor, &action.requirements)?
        {
            continue;
        }
        let Some(plan) = resolver.plan(action) else {
            continue;
        };
        let candidates = targeting::candidates(ctx, actor, &plan.kind, &action.requirements)?;
        let candidates: Vec<CombattantId> = match plan.target {
            TargetStrategy::SelfOnly => candidates.into_iter().filter(|id| *id == actor).collect(),
            _ => candidates,
        };
        if candidates.is_empty() {
            continue;
        }
        let value = score(ctx, action, &plan, &candidates, weights)?;
        if value > 0.0 && best.map(|b| value > b.score).unwrap_or(true) {
            best = Some(ActionChoice { index, score: value });
        }
    }
    Ok(best)
}
