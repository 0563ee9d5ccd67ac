//! Dice roll requested through the `dicealpha` NLU model.
//!
//! "roll three d twenty plus four" is read as 3 dice with 20 sides and a
//! `+ 4` modifier. Every concept is optional; missing or unusable values fall
//! back to a single d20 with no modifier.

use std::fmt;

use rand::Rng;

use crate::interpretation::Interpretation;

pub const DEFAULT_SIDES: u32 = 20;
pub const DEFAULT_COUNT: u32 = 1;

const SIDES: &[&str] = &["DiceGroup", "Dice"];
const COUNT: &[&str] = &["DiceGroup", "nuance_CARDINAL_NUMBER"];
const OPERATOR: &[&str] = &["Math"];
const MODIFIER: &[&str] = &["nuance_CARDINAL_NUMBER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl Operator {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "plus" => Some(Operator::Plus),
            "minus" => Some(Operator::Minus),
            "multiply" => Some(Operator::Multiply),
            "divide" => Some(Operator::Divide),
            _ => None,
        }
    }

    /// Apply the modifier; division rounds half to even
    pub fn apply(self, tally: i64, modifier: i64) -> i64 {
        match self {
            Operator::Plus => tally.saturating_add(modifier),
            Operator::Minus => tally.saturating_sub(modifier),
            Operator::Multiply => tally.saturating_mul(modifier),
            Operator::Divide => (tally as f64 / modifier as f64).round_ties_even() as i64,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Plus => "plus",
            Operator::Minus => "minus",
            Operator::Multiply => "multiply",
            Operator::Divide => "divide",
        };
        f.write_str(name)
    }
}

/// Roll request read from an interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct DiceRoll {
    pub sides: u32,
    pub count: u32,
    /// `None` when the model returned an operator this client cannot apply
    pub operator: Option<Operator>,
    pub modifier: i64,
    pub confidence: Option<f64>,
}

impl Default for DiceRoll {
    fn default() -> Self {
        Self {
            sides: DEFAULT_SIDES,
            count: DEFAULT_COUNT,
            operator: Some(Operator::Plus),
            modifier: 0,
            confidence: None,
        }
    }
}

/// Result of one roll
#[derive(Debug, Clone, PartialEq)]
pub struct RollOutcome {
    pub rolls: Vec<u32>,
    /// Sum of the rolls before the modifier
    pub subtotal: i64,
    /// Operator and modifier actually applied, if any
    pub applied: Option<(Operator, i64)>,
    pub total: i64,
}

impl DiceRoll {
    pub fn from_interpretation(interpretation: &Interpretation) -> Self {
        let positive = |path: &[&str]| {
            interpretation
                .concept_number(path)
                .filter(|value| *value >= 1)
                .and_then(|value| u32::try_from(value).ok())
        };
        let defaults = Self::default();

        Self {
            sides: positive(SIDES).unwrap_or(defaults.sides),
            count: positive(COUNT).unwrap_or(defaults.count),
            operator: match interpretation.concept_value(OPERATOR) {
                Some(name) => Operator::parse(&name),
                None => defaults.operator,
            },
            modifier: interpretation.concept_number(MODIFIER).unwrap_or(defaults.modifier),
            confidence: interpretation.confidence,
        }
    }

    /// Total for a given set of rolls
    ///
    /// A modifier below 1 leaves the sum untouched.
    pub fn resolve(&self, rolls: Vec<u32>) -> RollOutcome {
        let subtotal: i64 = rolls.iter().map(|&roll| i64::from(roll)).sum();
        let applied = match self.operator {
            Some(operator) if self.modifier >= 1 => Some((operator, self.modifier)),
            _ => None,
        };
        let total = match applied {
            Some((operator, modifier)) => operator.apply(subtotal, modifier),
            None => subtotal,
        };
        RollOutcome {
            rolls,
            subtotal,
            applied,
            total,
        }
    }

    /// Draw `count` dice; a zero-sided die always shows 1
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> RollOutcome {
        let rolls = (0..self.count).map(|_| rng.gen_range(1..=self.sides.max(1))).collect();
        self.resolve(rolls)
    }
}
