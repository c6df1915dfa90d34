//! D&D dice rolling system.
//!
//! Supports standard dice notation: XdY+Z, keep highest/lowest and
//! advantage/disadvantage on d20 rolls. Every roll draws from a caller-supplied
//! RNG so a simulation run is a pure function of its seed.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Cannot keep {keep} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        keep: u32,
        count: u32,
        notation: String,
    },
}

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }
}

/// Standard D&D die types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        match sides {
            4 => Some(DieType::D4),
            6 => Some(DieType::D6),
            8 => Some(DieType::D8),
            10 => Some(DieType::D10),
            12 => Some(DieType::D12),
            20 => Some(DieType::D20),
            100 => Some(DieType::D100),
            _ => None,
        }
    }

    /// Mean face value.
    pub fn average(&self) -> f64 {
        (self.sides() as f64 + 1.0) / 2.0
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// A single die component of a dice expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceComponent {
    pub count: u32,
    pub die_type: DieType,
    pub keep_highest: Option<u32>,
    pub keep_lowest: Option<u32>,
}

/// A complete dice expression (e.g., 2d6+3).
///
/// Serialized as its notation string so scenario documents stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceExpression {
    pub components: Vec<DiceComponent>,
    pub modifier: i32,
    pub original: String,
}

impl DiceExpression {
    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim().to_lowercase();
        if notation.is_empty() {
            return Err(DiceError::NoDice);
        }

        let mut components = Vec::new();
        let mut modifier: i32 = 0;
        let mut current = String::new();
        let mut sign: i32 = 1;

        for ch in notation.chars() {
            match ch {
                '+' | '-' => {
                    if !current.is_empty() {
                        Self::parse_component(&current, sign, &mut components, &mut modifier)?;
                        current.clear();
                    }
                    sign = if ch == '+' { 1 } else { -1 };
                }
                ' ' => continue,
                _ => current.push(ch),
            }
        }

        if !current.is_empty() {
            Self::parse_component(&current, sign, &mut components, &mut modifier)?;
        }

        if components.is_empty() && modifier == 0 {
            return Err(DiceError::NoDice);
        }

        Ok(DiceExpression {
            components,
            modifier,
            original: notation,
        })
    }

    /// A constant expression with no dice.
    pub fn flat(value: i32) -> Self {
        DiceExpression {
            components: Vec::new(),
            modifier: value,
            original: value.to_string(),
        }
    }

    /// `count` dice of one type plus a flat modifier.
    pub fn dice(count: u32, die_type: DieType, modifier: i32) -> Self {
        let original = match modifier {
            0 => format!("{}{}", count, die_type),
            m if m > 0 => format!("{}{}+{}", count, die_type, m),
            m => format!("{}{}{}", count, die_type, m),
        };
        DiceExpression {
            components: vec![DiceComponent {
                count,
                die_type,
                keep_highest: None,
                keep_lowest: None,
            }],
            modifier,
            original,
        }
    }

    fn parse_component(
        s: &str,
        sign: i32,
        components: &mut Vec<DiceComponent>,
        modifier: &mut i32,
    ) -> Result<(), DiceError> {
        if let Some(d_pos) = s.find('d') {
            if sign < 0 {
                // Subtracted dice are not supported
                return Err(DiceError::InvalidNotation(s.to_string()));
            }
            let count_str = &s[..d_pos];
            let rest = &s[d_pos + 1..];

            let count: u32 = if count_str.is_empty() {
                1
            } else {
                count_str
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(s.to_string()))?
            };

            let (sides_str, keep_highest, keep_lowest) = if let Some(kh_pos) = rest.find("kh") {
                let sides = &rest[..kh_pos];
                let keep: u32 = rest[kh_pos + 2..]
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
                (sides, Some(keep), None)
            } else if let Some(kl_pos) = rest.find("kl") {
                let sides = &rest[..kl_pos];
                let keep: u32 = rest[kl_pos + 2..]
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
                (sides, None, Some(keep))
            } else {
                (rest, None, None)
            };

            let sides: u32 = sides_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;

            let die_type = DieType::from_sides(sides).ok_or(DiceError::InvalidDieSize(sides))?;

            // Validate keep count doesn't exceed dice count
            if let Some(keep) = keep_highest.or(keep_lowest) {
                if keep > count {
                    return Err(DiceError::InvalidKeepCount {
                        keep,
                        count,
                        notation: s.to_string(),
                    });
                }
            }

            components.push(DiceComponent {
                count,
                die_type,
                keep_highest,
                keep_lowest,
            });
        } else {
            let value: i32 = s
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            *modifier += sign * value;
        }

        Ok(())
    }

    /// Roll the dice expression.
    pub fn roll<R: Rng>(&self, rng: &mut R) -> RollResult {
        self.roll_inner(rng, 1)
    }

    /// Roll with every die count doubled (critical hit damage).
    pub fn roll_critical<R: Rng>(&self, rng: &mut R) -> RollResult {
        self.roll_inner(rng, 2)
    }

    fn roll_inner<R: Rng>(&self, rng: &mut R, multiplier: u32) -> RollResult {
        let mut component_results = Vec::with_capacity(self.components.len());

        for component in &self.components {
            let count = component.count * multiplier;
            let rolls: Vec<u32> = (0..count)
                .map(|_| rng.gen_range(1..=component.die_type.sides()))
                .collect();

            let kept = match (component.keep_highest, component.keep_lowest) {
                (Some(keep), _) => {
                    let mut sorted = rolls.clone();
                    sorted.sort_by(|a, b| b.cmp(a));
                    sorted.truncate((keep * multiplier) as usize);
                    sorted
                }
                (None, Some(keep)) => {
                    let mut sorted = rolls.clone();
                    sorted.sort();
                    sorted.truncate((keep * multiplier) as usize);
                    sorted
                }
                (None, None) => rolls.clone(),
            };

            let subtotal: u32 = kept.iter().sum();
            component_results.push(ComponentResult {
                die_type: component.die_type,
                rolls,
                kept,
                subtotal,
            });
        }

        let dice_total: i32 = component_results.iter().map(|c| c.subtotal as i32).sum();

        RollResult {
            component_results,
            modifier: self.modifier,
            total: dice_total + self.modifier,
        }
    }

    /// Expected value of the expression, ignoring keep rules.
    pub fn average(&self) -> f64 {
        let dice: f64 = self
            .components
            .iter()
            .map(|c| {
                let kept = c.keep_highest.or(c.keep_lowest).unwrap_or(c.count);
                kept as f64 * c.die_type.average()
            })
            .sum();
        dice + self.modifier as f64
    }

    /// Expected value when the dice are doubled on a critical hit.
    pub fn critical_average(&self) -> f64 {
        self.average() * 2.0 - self.modifier as f64
    }

    /// Whether the expression contains any dice at all.
    pub fn has_dice(&self) -> bool {
        !self.components.is_empty()
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl TryFrom<String> for DiceExpression {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DiceExpression::parse(&value)
    }
}

impl From<DiceExpression> for String {
    fn from(value: DiceExpression) -> Self {
        value.original
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Result of rolling a single dice component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub die_type: DieType,
    pub rolls: Vec<u32>,
    pub kept: Vec<u32>,
    pub subtotal: u32,
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub component_results: Vec<ComponentResult>,
    pub modifier: i32,
    pub total: i32,
}

impl RollResult {
    /// Check if the roll meets or exceeds a DC.
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice: Vec<String> = self
            .component_results
            .iter()
            .map(|c| {
                let kept: Vec<String> = c.kept.iter().map(|r| r.to_string()).collect();
                format!("[{}]", kept.join(", "))
            })
            .collect();
        if self.modifier != 0 {
            write!(f, "{} {:+} = {}", dice.join(" + "), self.modifier, self.total)
        } else {
            write!(f, "{} = {}", dice.join(" + "), self.total)
        }
    }
}

/// A d20 roll with its natural face, used for attacks, saves and initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct D20Roll {
    /// The face that counts after advantage/disadvantage.
    pub natural: u32,
    /// The discarded face when rolling with advantage or disadvantage.
    pub other: Option<u32>,
}

impl D20Roll {
    /// Roll a d20 honoring advantage.
    pub fn roll<R: Rng>(advantage: Advantage, rng: &mut R) -> Self {
        let first = rng.gen_range(1..=20u32);
        match advantage {
            Advantage::Normal => D20Roll {
                natural: first,
                other: None,
            },
            Advantage::Advantage | Advantage::Disadvantage => {
                let second = rng.gen_range(1..=20u32);
                let keep_high = advantage == Advantage::Advantage;
                let (chosen, other) = if (first >= second) == keep_high {
                    (first, second)
                } else {
                    (second, first)
                };
                D20Roll {
                    natural: chosen,
                    other: Some(other),
                }
            }
        }
    }

    pub fn is_natural_20(&self) -> bool {
        self.natural == 20
    }

    pub fn is_natural_1(&self) -> bool {
        self.natural == 1
    }
}

/// Probability that `1d20 + bonus` meets `target`, with natural 1 always failing
/// and natural 20 always succeeding.
pub fn d20_success_chance(bonus: i32, target: i32) -> f64 {
    let needed = (target - bonus).clamp(2, 20);
    (21 - needed) as f64 / 20.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_parse_simple() {
        let expr = DiceExpression::parse("1d20").unwrap();
        assert_eq!(expr.components.len(), 1);
        assert_eq!(expr.components[0].count, 1);
        assert_eq!(expr.components[0].die_type, DieType::D20);
        assert_eq!(expr.modifier, 0);
    }

    #[test]
    fn test_parse_with_modifier() {
        let expr = DiceExpression::parse("1d20+5").unwrap();
        assert_eq!(expr.modifier, 5);

        let expr = DiceExpression::parse("2d6-2").unwrap();
        assert_eq!(expr.modifier, -2);
    }

    #[test]
    fn test_parse_multiple_dice() {
        let expr = DiceExpression::parse("2d6+1d4+3").unwrap();
        assert_eq!(expr.components.len(), 2);
        assert_eq!(expr.modifier, 3);
    }

    #[test]
    fn test_parse_flat_value() {
        let expr = DiceExpression::parse("7").unwrap();
        assert!(!expr.has_dice());
        assert_eq!(expr.average(), 7.0);
    }

    #[test]
    fn test_invalid_notation() {
        assert!(DiceExpression::parse("").is_err());
        assert!(DiceExpression::parse("2d7").is_err());
        assert!(DiceExpression::parse("abc").is_err());
        assert!(DiceExpression::parse("5-1d4").is_err());
        assert!(matches!(
            DiceExpression::parse("4d6kh5").unwrap_err(),
            DiceError::InvalidKeepCount {
                keep: 5,
                count: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_roll_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let expr = DiceExpression::parse("1d20+5").unwrap();
        for _ in 0..200 {
            let result = expr.roll(&mut rng);
            assert!(result.total >= 6 && result.total <= 25);
        }
    }

    #[test]
    fn test_critical_doubles_dice_not_modifier() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let expr = DiceExpression::parse("1d6+3").unwrap();
        for _ in 0..200 {
            let result = expr.roll_critical(&mut rng);
            assert_eq!(result.component_results[0].rolls.len(), 2);
            assert!(result.total >= 5 && result.total <= 15);
        }
        assert_eq!(expr.critical_average(), 10.0);
    }

    #[test]
    fn test_average() {
        assert_eq!(DiceExpression::parse("1d6+3").unwrap().average(), 6.5);
        assert_eq!(DiceExpression::parse("2d8").unwrap().average(), 9.0);
        assert_eq!(DiceExpression::parse("4d6kh3").unwrap().average(), 10.5);
    }

    #[test]
    fn test_same_seed_same_rolls() {
        let expr = DiceExpression::parse("3d8+2").unwrap();
        let mut a = ChaCha8Rng::seed_from_u64(99);
        let mut b = ChaCha8Rng::seed_from_u64(99);
        for _ in 0..50 {
            assert_eq!(expr.roll(&mut a).total, expr.roll(&mut b).total);
        }
    }

    #[test]
    fn test_serde_as_notation_string() {
        let expr = DiceExpression::parse("2d6+1").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"2d6+1\"");
        let back: DiceExpression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        assert!(serde_json::from_str::<DiceExpression>("\"2d7\"").is_err());
    }

    #[test]
    fn test_d20_advantage_keeps_higher() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let roll = D20Roll::roll(Advantage::Advantage, &mut rng);
            assert!(roll.natural >= roll.other.unwrap());
            let roll = D20Roll::roll(Advantage::Disadvantage, &mut rng);
            assert!(roll.natural <= roll.other.unwrap());
        }
    }

    #[test]
    fn test_d20_success_chance() {
        // +5 vs AC 15 needs a 10
        assert!((d20_success_chance(5, 15) - 0.55).abs() < 1e-9);
        // natural 20 always hits, natural 1 always misses
        assert!((d20_success_chance(0, 40) - 0.05).abs() < 1e-9);
        assert!((d20_success_chance(30, 5) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_advantage_combine() {
        assert_eq!(
            Advantage::Normal.combine(Advantage::Advantage),
            Advantage::Advantage
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Disadvantage),
            Advantage::Normal
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Advantage),
            Advantage::Advantage
        );
    }

    #[test]
    fn test_dice_constructor_matches_parse() {
        let built = DiceExpression::dice(8, DieType::D6, 0);
        assert_eq!(built, DiceExpression::parse("8d6").unwrap());
        let with_bonus = DiceExpression::dice(1, DieType::D4, 3);
        assert_eq!(with_bonus.to_string(), "1d4+3");
        assert_eq!(with_bonus.average(), 5.5);
    }
}
