//! Attack resolution: attack rolls, save-for-damage and automatic hits.

use super::{targeting, InFlight};
use crate::context::InvariantError;
use crate::events::Event;
use crate::model::{Ability, AttackAction, CombattantId, HitRoll};

/// Resolve an attack against the selected targets. Returns who interrupted
/// it, if anyone.
pub fn resolve(
    flight: &mut InFlight<'_>,
    attack: &AttackAction,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    match &attack.hit {
        HitRoll::ToHit(bonus) => weapon(flight, attack, *bonus, targets),
        HitRoll::Save {
            ability,
            dc,
            half_on_success,
        } => save_for_damage(flight, attack, *ability, *dc, *half_on_success, targets),
        HitRoll::Auto => automatic(flight, attack, targets),
    }
}

/// Pick a fresh target when the current one went down mid-sequence.
fn retarget(flight: &mut InFlight<'_>) -> Result<Option<CombattantId>, InvariantError> {
    let picked = targeting::select_targets(
        flight.ctx,
        flight.actor,
        &flight.plan.kind,
        &flight.action.requirements,
        flight.plan.target,
        1,
    )?;
    Ok(picked.first().copied())
}

fn weapon(
    flight: &mut InFlight<'_>,
    attack: &AttackAction,
    bonus: i32,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    for first in targets {
        let mut target = first;
        for _ in 0..attack.attacks {
            if !flight.actor_active()? {
                return Ok(None);
            }
            if !flight.is_alive(target)? {
                match retarget(flight)? {
                    Some(next) => target = next,
                    None => return Ok(None),
                }
            }
            if let Some(by) = swing(flight, attack, bonus, target)? {
                return Ok(Some(by));
            }
        }
    }
    Ok(None)
}

fn swing(
    flight: &mut InFlight<'_>,
    attack: &AttackAction,
    bonus: i32,
    target: CombattantId,
) -> Result<Option<CombattantId>, InvariantError> {
    let attacker = flight.actor;
    flight.ctx.emit(Event::AttackDeclared {
        attacker,
        target,
        action: flight.action.name.clone(),
    });
    if let Some(by) = flight.checkpoint()? {
        return Ok(Some(by));
    }
    // Reactions to the declaration can drop either side.
    if !flight.actor_active()? || !flight.is_alive(target)? {
        return Ok(None);
    }

    let ctx = &mut *flight.ctx;
    let advantage = ctx.attack_advantage(attacker, target)?;
    let effect_bonus = ctx.attack_bonus(attacker)?;
    let roll = ctx.roll_d20(advantage);
    let total = roll.natural as i32 + roll.bonus + bonus + effect_bonus;
    let armor_class = ctx.effective_ac(target)?;
    let critical = roll.natural >= attack.crit_threshold;
    let hit = roll.natural != 1 && (critical || total >= armor_class);

    if !hit {
        ctx.emit(Event::AttackMissed {
            attacker,
            target,
            roll: total,
            natural: roll.natural,
            armor_class,
        });
        return flight.checkpoint();
    }

    ctx.emit(Event::AttackHit {
        attacker,
        target,
        roll: total,
        natural: roll.natural,
        armor_class,
        critical,
    });
    if let Some(by) = flight.checkpoint()? {
        return Ok(Some(by));
    }
    if !flight.is_alive(target)? {
        return Ok(None);
    }

    let ctx = &mut *flight.ctx;
    let base = if critical {
        attack.damage.roll_critical(ctx.rng()).total
    } else {
        ctx.roll(&attack.damage)
    };
    let damage = (base + ctx.damage_bonus(attacker, critical)?).max(0);
    let report = ctx.apply_damage(target, damage, attack.damage_type, Some(attacker))?;
    if let Some(rider) = &attack.on_hit {
        if !report.killed {
            ctx.add_buff(target, attacker, rider, None, None)?;
        }
    }
    flight.checkpoint()
}

fn save_for_damage(
    flight: &mut InFlight<'_>,
    attack: &AttackAction,
    ability: Ability,
    dc: i32,
    half_on_success: bool,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    let caster = flight.actor;
    // One damage roll shared by every target.
    let rolled = flight.ctx.roll(&attack.damage) + flight.ctx.damage_bonus(caster, false)?;
    for target in targets {
        if !flight.is_alive(target)? {
            continue;
        }
        let ctx = &mut *flight.ctx;
        let saved = ctx.saving_throw(target, ability, dc)?;
        if flight.plan.spell {
            let spell = flight.action.name.clone();
            ctx.emit(if saved {
                Event::SpellSaved {
                    caster,
                    target,
                    spell,
                }
            } else {
                Event::SpellFailed {
                    caster,
                    target,
                    spell,
                }
            });
        }
        let amount = match (saved, half_on_success) {
            (false, _) => rolled,
            (true, true) => rolled / 2,
            (true, false) => 0,
        };
        let report = ctx.apply_damage(target, amount, attack.damage_type, Some(caster))?;
        if let (false, Some(rider)) = (saved, &attack.on_hit) {
            if !report.killed {
                ctx.add_buff(target, caster, rider, None, None)?;
            }
        }
        if let Some(by) = flight.checkpoint()? {
            return Ok(Some(by));
        }
    }
    Ok(None)
}

fn automatic(
    flight: &mut InFlight<'_>,
    attack: &AttackAction,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    let source = flight.actor;
    for target in targets {
        for _ in 0..attack.attacks {
            if !flight.is_alive(target)? {
                break;
            }
            let ctx = &mut *flight.ctx;
            let damage = (ctx.roll(&attack.damage) + ctx.damage_bonus(source, false)?).max(0);
            ctx.apply_damage(target, damage, attack.damage_type, Some(source))?;
            if let Some(by) = flight.checkpoint()? {
                return Ok(Some(by));
            }
        }
    }
    Ok(None)
}
