//! Best-effort summary of an NLU result payload.
//!
//! Every field is optional on the wire. Missing or oddly-typed fields come
//! back as `None` instead of failing the whole exchange.

use serde_json::{Map, Value};

use crate::message::Message;

const FIRST_INTERPRETATION: &str = "/nlu_interpretation_results/payload/interpretations/0";

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub literal: Option<String>,
    concepts: Map<String, Value>,
}

impl Interpretation {
    /// First interpretation carried by `message`, if it carries any
    pub fn from_message(message: &Message) -> Option<Self> {
        message.pointer(FIRST_INTERPRETATION).map(Self::from_value)
    }

    pub fn from_value(value: &Value) -> Self {
        Self {
            intent: value
                .pointer("/action/intent/value")
                .and_then(Value::as_str)
                .map(str::to_string),
            confidence: value
                .pointer("/action/intent/confidence")
                .and_then(Value::as_f64),
            literal: value.get("literal").and_then(Value::as_str).map(str::to_string),
            concepts: value
                .get("concepts")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn concept_names(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    /// First entry of a concept; `path` descends into nested concept groups,
    /// e.g. `["DiceGroup", "Dice"]`
    pub fn concept(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut entry = self.concepts.get(*first)?.get(0)?;
        for name in rest {
            entry = entry.get("concepts")?.get(*name)?.get(0)?;
        }
        Some(entry)
    }

    /// Value of a concept rendered as text
    pub fn concept_value(&self, path: &[&str]) -> Option<String> {
        match self.concept(path)?.get("value")? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    /// Value of a concept parsed as an integer
    pub fn concept_number(&self, path: &[&str]) -> Option<i64> {
        match self.concept(path)?.get("value")? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}
