//! Action resolution.
//!
//! [`ActionResolver::resolve`] turns one declared action into turn-context
//! mutations. Resolution is a sequence of checkpoints: after each discrete
//! step the reaction manager drains what was published, and an interrupt
//! raised there stops the action before its next step.

pub mod attack;
pub mod support;
pub mod targeting;
pub mod template;

use crate::context::{CostMode, InvariantError, ResourceError, TurnContext};
use crate::events::{Event, SkipReason};
use crate::model::{Action, ActionKind, CombattantId, TargetStrategy};
use crate::reactions::ReactionManager;
use template::TemplateCache;

/// How a resolution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    Skipped(SkipReason),
    Interrupted { by: CombattantId },
}

/// An action with any template reference replaced by its concrete kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub kind: ActionKind,
    pub target: TargetStrategy,
    pub targets: u32,
    pub spell: bool,
}

/// One action in flight.
pub struct InFlight<'a> {
    pub ctx: &'a mut TurnContext,
    pub reactions: &'a mut ReactionManager,
    pub actor: CombattantId,
    pub action: &'a Action,
    pub plan: &'a Plan,
}

impl InFlight<'_> {
    /// Let reactions answer everything published so far. Returns who
    /// interrupted the action, if anyone did.
    pub fn checkpoint(&mut self) -> Result<Option<CombattantId>, InvariantError> {
        self.reactions.process(self.ctx)?;
        Ok(self.reactions.take_interrupt())
    }

    /// Whether the actor can still carry on with the action.
    pub fn actor_active(&self) -> Result<bool, InvariantError> {
        let actor = self.ctx.unit(self.actor)?;
        Ok(actor.is_alive() && !actor.is_incapacitated())
    }

    pub fn is_alive(&self, id: CombattantId) -> Result<bool, InvariantError> {
        Ok(self.ctx.unit(id)?.is_alive())
    }
}

pub struct ActionResolver {
    cache: TemplateCache,
}

impl ActionResolver {
    pub fn new(cache: TemplateCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub fn into_cache(self) -> TemplateCache {
        self.cache
    }

    /// Concrete form of an action, or `None` for an unknown template.
    pub fn plan(&mut self, action: &Action) -> Option<Plan> {
        match &action.kind {
            ActionKind::Template(reference) => {
                let resolved = self.cache.resolve(reference)?;
                Some(Plan {
                    kind: resolved.kind,
                    target: action.target.unwrap_or(resolved.target),
                    targets: resolved.targets,
                    spell: true,
                })
            }
            kind => Some(Plan {
                kind: kind.clone(),
                target: action.target_strategy(),
                targets: action.targets,
                spell: action.spell,
            }),
        }
    }

    fn skip(
        ctx: &mut TurnContext,
        actor: CombattantId,
        action: &Action,
        reason: SkipReason,
    ) -> Resolution {
        tracing::trace!(unit = %actor, action = %action.name, ?reason, "action skipped");
        ctx.emit(Event::ActionSkipped {
            actor,
            action: action.name.clone(),
            reason: reason.clone(),
        });
        Resolution::Skipped(reason)
    }

    /// Resolve action `index` of `actor`.
    pub fn resolve(
        &mut self,
        ctx: &mut TurnContext,
        reactions: &mut ReactionManager,
        actor: CombattantId,
        index: usize,
        mode: CostMode,
    ) -> Result<Resolution, InvariantError> {
        let unit = ctx.unit(actor)?;
        let action = unit
            .actions
            .get(index)
            .cloned()
            .ok_or(InvariantError::UnknownAction { unit: actor, index })?;
        // The dead take no actions, not even skipped ones.
        if !unit.is_alive() {
            return Ok(Resolution::Skipped(SkipReason::Incapacitated));
        }
        let incapacitated = unit.is_incapacitated();
        if mode == CostMode::Normal {
            ctx.mark_action_used(actor, index)?;
        }
        if incapacitated {
            return Ok(Self::skip(ctx, actor, &action, SkipReason::Incapacitated));
        }

        let Some(plan) = self.plan(&action) else {
            tracing::warn!(unit = %actor, action = %action.name, "unknown template at resolution time");
            return Ok(Self::skip(ctx, actor, &action, SkipReason::RequirementsUnmet));
        };
        if !targeting::actor_requirements_met(ctx, actor, &action.requirements)? {
            return Ok(Self::skip(ctx, actor, &action, SkipReason::RequirementsUnmet));
        }
        if let Some(resource) = ctx.shortfall(actor, &action.cost, mode)? {
            return Ok(Self::skip(ctx, actor, &action, SkipReason::InsufficientResource(resource)));
        }
        let targets = targeting::select_targets(
            ctx,
            actor,
            &plan.kind,
            &action.requirements,
            plan.target,
            plan.targets,
        )?;
        if targets.is_empty() {
            return Ok(Self::skip(ctx, actor, &action, SkipReason::NoValidTarget));
        }
        match ctx.pay_costs(actor, &action.cost, mode) {
            Ok(()) => {}
            Err(ResourceError::Insufficient { resource, .. }) => {
                return Ok(Self::skip(ctx, actor, &action, SkipReason::InsufficientResource(resource)));
            }
            Err(ResourceError::Invariant(err)) => return Err(err),
        }

        ctx.emit(Event::ActionStarted {
            actor,
            action: action.name.clone(),
        });
        if plan.spell {
            ctx.emit(Event::SpellCast {
                caster: actor,
                spell: action.name.clone(),
                slot_level: action.slot_level(),
            });
        }

        let mut flight = InFlight {
            ctx,
            reactions,
            actor,
            action: &action,
            plan: &plan,
        };
        let interrupted = match flight.checkpoint()? {
            Some(by) => Some(by),
            None => match &plan.kind {
                ActionKind::Attack(attack) => attack::resolve(&mut flight, attack, targets)?,
                ActionKind::Heal(heal) => support::heal(&mut flight, heal, targets)?,
                ActionKind::Buff(buff) => support::buff(&mut flight, &buff.buff, targets)?,
                ActionKind::Debuff(debuff) => support::debuff(&mut flight, debuff, targets)?,
                // Plans never carry template references.
                ActionKind::Template(_) => None,
            },
        };
        flight.ctx.clear_roll_mods();

        match interrupted {
            Some(by) => {
                tracing::trace!(unit = %actor, action = %action.name, by = %by, "action interrupted");
                flight.ctx.emit(Event::ActionInterrupted {
                    actor,
                    action: action.name.clone(),
                    by,
                });
                Ok(Resolution::Interrupted { by })
            }
            None => Ok(Resolution::Completed),
        }
    }
}
