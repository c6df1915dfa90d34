//! Healing, buffs and debuffs.

use super::InFlight;
use crate::context::InvariantError;
use crate::events::Event;
use crate::model::{BuffSpec, CombattantId, ConcentrationLink, DebuffAction, HealAction};

pub fn heal(
    flight: &mut InFlight<'_>,
    heal: &HealAction,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    let amount = flight.ctx.roll(&heal.amount);
    for target in targets {
        flight
            .ctx
            .apply_healing(target, amount, heal.mode, Some(flight.actor))?;
        if let Some(by) = flight.checkpoint()? {
            return Ok(Some(by));
        }
    }
    Ok(None)
}

/// Concentration starts with the first effect that actually lands, so a
/// spell every target resisted leaves the caster's previous concentration
/// alone.
fn concentration_link(
    flight: &mut InFlight<'_>,
    spec: &BuffSpec,
    link: &mut Option<ConcentrationLink>,
) -> Result<Option<ConcentrationLink>, InvariantError> {
    if !spec.concentration {
        return Ok(None);
    }
    if link.is_none() {
        *link = Some(flight.ctx.begin_concentration(flight.actor, &spec.name)?);
    }
    Ok(*link)
}

/// Whether the concentration earlier targets were linked to has since ended.
fn concentration_lost(
    flight: &InFlight<'_>,
    link: &Option<ConcentrationLink>,
) -> Result<bool, InvariantError> {
    let Some(link) = link else {
        return Ok(false);
    };
    let slot = &flight.ctx.unit(link.caster)?.state.concentration;
    Ok(slot.as_ref().map(|s| s.token) != Some(link.token))
}

pub fn buff(
    flight: &mut InFlight<'_>,
    spec: &BuffSpec,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    let mut link = None;
    for target in targets {
        if concentration_lost(flight, &link)? {
            break;
        }
        if !flight.is_alive(target)? {
            continue;
        }
        let concentration = concentration_link(flight, spec, &mut link)?;
        flight
            .ctx
            .add_buff(target, flight.actor, spec, concentration, None)?;
        if let Some(by) = flight.checkpoint()? {
            return Ok(Some(by));
        }
    }
    Ok(None)
}

pub fn debuff(
    flight: &mut InFlight<'_>,
    debuff: &DebuffAction,
    targets: Vec<CombattantId>,
) -> Result<Option<CombattantId>, InvariantError> {
    let caster = flight.actor;
    let mut link = None;
    for target in targets {
        if concentration_lost(flight, &link)? {
            break;
        }
        if !flight.is_alive(target)? {
            continue;
        }
        let resisted = match debuff.save {
            Some(check) => {
                let saved = flight.ctx.saving_throw(target, check.ability, check.dc)?;
                if flight.plan.spell {
                    let spell = flight.action.name.clone();
                    flight.ctx.emit(if saved {
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
                saved
            }
            None => false,
        };
        if !resisted {
            let concentration = concentration_link(flight, &debuff.debuff, &mut link)?;
            let save_ends = if debuff.save_ends { debuff.save } else { None };
            flight
                .ctx
                .add_buff(target, caster, &debuff.debuff, concentration, save_ends)?;
        }
        if let Some(by) = flight.checkpoint()? {
            return Ok(Some(by));
        }
    }
    Ok(None)
}
