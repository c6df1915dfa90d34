//! Built-in spell templates and the resolution cache.
//!
//! A template action names an entry in [`TEMPLATES`] plus overrides. Resolving
//! it produces a concrete [`ActionKind`]; results are memoized per
//! (template, overrides) pair for the life of a batch.

use crate::dice::{DiceExpression, DieType};
use crate::model::{
    Ability, ActionKind, AttackAction, BuffAction, BuffDuration, BuffModifiers, BuffSpec,
    Condition, DamageType, DebuffAction, HealAction, HealMode, HitRoll, SaveCheck,
    TargetStrategy, TemplateAction, TemplateOverrides,
};
use std::collections::{HashMap, VecDeque};

/// A named action blueprint.
#[derive(Debug, Clone)]
pub struct SpellTemplate {
    pub id: &'static str,
    pub default_target: TargetStrategy,
    pub default_targets: u32,
    base: ActionKind,
}

impl SpellTemplate {
    fn new(id: &'static str, base: ActionKind) -> Self {
        let default_target = base.default_target();
        Self {
            id,
            default_target,
            default_targets: 1,
            base,
        }
    }

    fn targeting(mut self, strategy: TargetStrategy, count: u32) -> Self {
        self.default_target = strategy;
        self.default_targets = count;
        self
    }

    /// Apply overrides to the blueprint.
    pub fn instantiate(&self, overrides: &TemplateOverrides) -> ResolvedTemplate {
        let mut kind = self.base.clone();
        match &mut kind {
            ActionKind::Attack(attack) => {
                match &mut attack.hit {
                    HitRoll::ToHit(bonus) => {
                        if let Some(to_hit) = overrides.to_hit {
                            *bonus = to_hit;
                        }
                    }
                    HitRoll::Save { dc, .. } => {
                        if let Some(save_dc) = overrides.save_dc {
                            *dc = save_dc;
                        }
                    }
                    HitRoll::Auto => {}
                }
                if let Some(amount) = &overrides.amount {
                    attack.damage = amount.clone();
                }
            }
            ActionKind::Heal(heal) => {
                if let Some(amount) = &overrides.amount {
                    heal.amount = amount.clone();
                }
            }
            ActionKind::Debuff(debuff) => {
                if let (Some(save), Some(dc)) = (debuff.save.as_mut(), overrides.save_dc) {
                    save.dc = dc;
                }
            }
            ActionKind::Buff(_) | ActionKind::Template(_) => {}
        }
        ResolvedTemplate {
            kind,
            target: overrides.target.unwrap_or(self.default_target),
            targets: overrides.targets.unwrap_or(self.default_targets),
        }
    }
}

/// A template after overrides: the concrete kind and its targeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    pub kind: ActionKind,
    pub target: TargetStrategy,
    pub targets: u32,
}

fn spell_attack(hit: HitRoll, damage: DiceExpression, damage_type: DamageType) -> ActionKind {
    ActionKind::Attack(AttackAction {
        hit,
        damage,
        damage_type,
        attacks: 1,
        crit_threshold: 20,
        on_hit: None,
    })
}

fn heal(amount: DiceExpression, mode: HealMode) -> ActionKind {
    ActionKind::Heal(HealAction { amount, mode })
}

fn buff(spec: BuffSpec) -> ActionKind {
    ActionKind::Buff(BuffAction { buff: spec })
}

lazy_static::lazy_static! {
    /// The built-in template library.
    pub static ref TEMPLATES: Vec<SpellTemplate> = vec![
        SpellTemplate::new(
            "fire_bolt",
            spell_attack(HitRoll::ToHit(5), DiceExpression::dice(1, DieType::D10, 0), DamageType::Fire),
        ),
        SpellTemplate::new(
            "sacred_flame",
            spell_attack(
                HitRoll::Save { ability: Ability::Dexterity, dc: 13, half_on_success: false },
                DiceExpression::dice(1, DieType::D8, 0),
                DamageType::Radiant,
            ),
        ),
        SpellTemplate::new(
            "fireball",
            spell_attack(
                HitRoll::Save { ability: Ability::Dexterity, dc: 15, half_on_success: true },
                DiceExpression::dice(8, DieType::D6, 0),
                DamageType::Fire,
            ),
        )
        .targeting(TargetStrategy::Random, 3),
        SpellTemplate::new(
            "magic_missile",
            spell_attack(HitRoll::Auto, DiceExpression::dice(3, DieType::D4, 3), DamageType::Force),
        ),
        SpellTemplate::new("cure_wounds", heal(DiceExpression::dice(1, DieType::D8, 3), HealMode::HitPoints)),
        SpellTemplate::new("healing_word", heal(DiceExpression::dice(1, DieType::D4, 3), HealMode::HitPoints)),
        SpellTemplate::new(
            "false_life",
            heal(DiceExpression::dice(1, DieType::D4, 4), HealMode::TemporaryHitPoints),
        )
        .targeting(TargetStrategy::SelfOnly, 1),
        SpellTemplate::new(
            "bless",
            buff(
                BuffSpec::new("Bless")
                    .with_modifiers(BuffModifiers {
                        to_hit_dice: Some(DiceExpression::dice(1, DieType::D4, 0)),
                        save_dice: Some(DiceExpression::dice(1, DieType::D4, 0)),
                        ..Default::default()
                    })
                    .concentration(),
            ),
        )
        .targeting(TargetStrategy::HighestDpr, 3),
        SpellTemplate::new(
            "shield_of_faith",
            buff(
                BuffSpec::new("Shield of Faith")
                    .with_duration(BuffDuration::Rounds(100))
                    .with_modifiers(BuffModifiers { armor_class: 2, ..Default::default() })
                    .concentration(),
            ),
        )
        .targeting(TargetStrategy::LowestAc, 1),
        SpellTemplate::new(
            "bane",
            ActionKind::Debuff(DebuffAction {
                save: Some(SaveCheck { ability: Ability::Charisma, dc: 13 }),
                debuff: BuffSpec::new("Bane")
                    .with_modifiers(BuffModifiers { to_hit: -2, save: -2, ..Default::default() })
                    .concentration(),
                save_ends: false,
            }),
        )
        .targeting(TargetStrategy::HighestDpr, 3),
        SpellTemplate::new(
            "hold_person",
            ActionKind::Debuff(DebuffAction {
                save: Some(SaveCheck { ability: Ability::Wisdom, dc: 13 }),
                debuff: BuffSpec::new("Hold Person")
                    .with_condition(Condition::Paralyzed)
                    .concentration(),
                save_ends: true,
            }),
        ),
        SpellTemplate::new(
            "hunters_mark",
            buff(
                BuffSpec::new("Hunter's Mark")
                    .with_duration(BuffDuration::Rounds(600))
                    .with_modifiers(BuffModifiers {
                        damage_dice: Some(DiceExpression::dice(1, DieType::D6, 0)),
                        ..Default::default()
                    })
                    .concentration(),
            ),
        )
        .targeting(TargetStrategy::SelfOnly, 1),
    ];
}

pub fn find_template(name: &str) -> Option<&'static SpellTemplate> {
    TEMPLATES.iter().find(|template| template.id == name)
}

pub fn is_known_template(name: &str) -> bool {
    find_template(name).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    template: String,
    overrides: Vec<(&'static str, String)>,
}

impl CacheKey {
    fn new(action: &TemplateAction) -> Self {
        Self {
            template: action.template.clone(),
            overrides: action.overrides.key_parts(),
        }
    }
}

/// Memoized template resolutions, evicting oldest-first past capacity.
///
/// The cache carries the engine version it was filled under; a mismatch
/// clears it.
#[derive(Debug)]
pub struct TemplateCache {
    version: u32,
    capacity: usize,
    entries: HashMap<CacheKey, ResolvedTemplate>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            version: crate::ENGINE_VERSION,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Drop every entry if the cache was filled under another engine version.
    pub fn ensure_version(&mut self, version: u32) {
        if self.version != version {
            tracing::debug!(from = self.version, to = version, "template cache invalidated");
            self.entries.clear();
            self.order.clear();
            self.version = version;
        }
    }

    /// Resolve a template reference; `None` for unknown templates.
    pub fn resolve(&mut self, action: &TemplateAction) -> Option<ResolvedTemplate> {
        let key = CacheKey::new(action);
        if let Some(resolved) = self.entries.get(&key) {
            self.hits += 1;
            return Some(resolved.clone());
        }
        self.misses += 1;
        let resolved = find_template(&action.template)?.instantiate(&action.overrides);
        self.entries.insert(key.clone(), resolved.clone());
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(template: &str, overrides: TemplateOverrides) -> TemplateAction {
        TemplateAction {
            template: template.to_string(),
            overrides,
        }
    }

    #[test]
    fn test_library_contents() {
        for name in [
            "fire_bolt",
            "sacred_flame",
            "fireball",
            "magic_missile",
            "cure_wounds",
            "healing_word",
            "false_life",
            "bless",
            "shield_of_faith",
            "bane",
            "hold_person",
            "hunters_mark",
        ] {
            assert!(is_known_template(name), "missing {}", name);
        }
        assert!(!is_known_template("wish"));
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = TemplateOverrides {
            save_dc: Some(17),
            targets: Some(5),
            ..Default::default()
        };
        let resolved = find_template("fireball").unwrap().instantiate(&overrides);
        assert_eq!(resolved.targets, 5);
        assert_eq!(resolved.target, TargetStrategy::Random);
        match resolved.kind {
            ActionKind::Attack(attack) => {
                assert_eq!(
                    attack.hit,
                    HitRoll::Save {
                        ability: Ability::Dexterity,
                        dc: 17,
                        half_on_success: true
                    }
                );
                assert_eq!(attack.damage.average(), 28.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cache_hits_on_same_overrides() {
        let mut cache = TemplateCache::new(10);
        let action = reference("cure_wounds", TemplateOverrides::default());
        let first = cache.resolve(&action).unwrap();
        let second = cache.resolve(&action).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert!(cache.resolve(&reference("nope", TemplateOverrides::default())).is_none());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = TemplateCache::new(2);
        for dc in 10..13 {
            let overrides = TemplateOverrides {
                save_dc: Some(dc),
                ..Default::default()
            };
            cache.resolve(&reference("sacred_flame", overrides));
        }
        assert_eq!(cache.len(), 2);
        // The first entry was evicted and resolves as a miss again
        let first = TemplateOverrides {
            save_dc: Some(10),
            ..Default::default()
        };
        cache.resolve(&reference("sacred_flame", first));
        assert_eq!(cache.misses(), 4);
    }

    #[test]
    fn test_version_change_clears() {
        let mut cache = TemplateCache::new(10);
        cache.resolve(&reference("bless", TemplateOverrides::default()));
        cache.ensure_version(cache.version() + 1);
        assert!(cache.is_empty());
    }
}
