use records::LocalizedText;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    FormData, FormValue, OneOrMany, Question, Renderer, builder_arg, parse_data, unknown_method,
};
use crate::error::{Error, Result};

/// One or more integers typed by the student.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericQuestion {
    text: LocalizedText,
    correct: Vec<i64>,
    correct_in_order: bool,
    min_count: usize,
    max_count: usize,
    /// Radix used when disclosing values (2, 10 or 16).
    radix: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NumericData {
    text: LocalizedText,
    correct: OneOrMany<i64>,
    correct_in_order: Option<bool>,
    min_count: Option<usize>,
    max_count: Option<usize>,
    radix: Option<u32>,
}

impl Default for NumericQuestion {
    fn default() -> Self {
        Self {
            text: LocalizedText::default(),
            correct: vec![],
            correct_in_order: true,
            min_count: 1,
            max_count: 10,
            radix: 10,
        }
    }
}

/// Decimal, `0x` hexadecimal or `0b` binary integer.
pub fn parse_number(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().filter(|_| !hex.starts_with(['+', '-']));
    }
    if let Some(bin) = raw.strip_prefix("0b").or_else(|| raw.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).ok().filter(|_| !bin.starts_with(['+', '-']));
    }
    raw.parse::<i64>().ok()
}

pub fn format_number(value: i64, radix: u32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    match radix {
        16 => format!("{sign}0x{magnitude:X}"),
        2 => format!("{sign}0b{magnitude:b}"),
        _ => value.to_string(),
    }
}

impl NumericQuestion {
    fn apply(&mut self, data: NumericData, prefix: &str) -> Result<()> {
        let defaults = Self::default();
        self.text = data.text;
        self.correct = data.correct.into_vec();
        self.correct_in_order = data.correct_in_order.unwrap_or(defaults.correct_in_order);
        self.min_count = data.min_count.unwrap_or(defaults.min_count);
        self.max_count = data.max_count.unwrap_or(defaults.max_count);
        self.radix = data.radix.unwrap_or(defaults.radix);
        self.check(prefix)
    }

    fn check(&self, prefix: &str) -> Result<()> {
        if self.min_count > self.max_count {
            return Err(Error::Validation(format!(
                "{prefix}, the minimal-maximal count range is inverted"
            )));
        }
        if self.correct.len() < self.min_count || self.correct.len() > self.max_count {
            return Err(Error::Validation(format!(
                "{prefix}, the correct answer is out of the minCount-maxCount range"
            )));
        }
        if ![2, 10, 16].contains(&self.radix) {
            return Err(Error::Validation(format!(
                "{prefix}, unsupported radix {}",
                self.radix
            )));
        }
        Ok(())
    }

    fn values(answer: &Value) -> Option<Vec<i64>> {
        answer.as_array()?.iter().map(Value::as_i64).collect()
    }

    fn render_numeric(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        params: Value,
    ) -> Result<String> {
        let mut params = params;
        let answer: Vec<String> = answer
            .and_then(Self::values)
            .unwrap_or_default()
            .into_iter()
            .map(|v| format_number(v, self.radix))
            .collect();
        params["locale"] = json!(locale);
        params["text"] = json!(self.text.resolve(locale));
        params["answer"] = json!(answer);
        params["maxCount"] = json!(self.max_count);
        renderer.render("numeric", locale, &params)
    }
}

impl Question for NumericQuestion {
    fn type_tag(&self) -> &'static str {
        "numeric"
    }

    fn instantiate(&mut self, template: &Value, _seed: u64) -> Result<()> {
        let prefix = "invalid question template";
        self.apply(parse_data(template, prefix)?, prefix)
    }

    fn load(&mut self, data: &Value) -> Result<()> {
        let prefix = "corrupted question data";
        self.apply(parse_data(data, prefix)?, prefix)
    }

    fn text(&self) -> &LocalizedText {
        &self.text
    }

    fn set_text(&mut self, text: LocalizedText) {
        self.text = text;
    }

    fn to_json(&self) -> Value {
        json!({
            "text": self.text,
            "correct": self.correct,
            "correctInOrder": self.correct_in_order,
            "minCount": self.min_count,
            "maxCount": self.max_count,
            "radix": self.radix,
        })
    }

    fn render_form_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
    ) -> Result<String> {
        self.render_numeric(renderer, locale, answer, json!({ "readonly": false }))
    }

    fn render_result_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        answer_is_correct: Option<bool>,
    ) -> Result<String> {
        let correct = answer_is_correct
            .unwrap_or_else(|| answer.is_some_and(|a| self.is_answer_correct(a)));
        let expected: Vec<String> = self
            .correct
            .iter()
            .map(|&v| format_number(v, self.radix))
            .collect();
        let params = json!({
            "readonly": true,
            "inputClass": if correct { "text-success" } else { "text-danger" },
            "correct": expected,
        });
        self.render_numeric(renderer, locale, answer, params)
    }

    /// Empty slots are skipped; one unparsable slot invalidates the whole answer.
    fn process_answer_submit(&self, form: &FormData) -> Value {
        let slots = match form.get("answer") {
            None => return json!([]),
            Some(FormValue::Text(raw)) if raw.trim().is_empty() => return json!([]),
            Some(FormValue::Text(_)) => return Value::Null,
            Some(FormValue::List(slots)) => slots,
        };
        slots
            .iter()
            .filter(|slot| !slot.trim().is_empty())
            .map(|slot| parse_number(slot))
            .collect::<Option<Vec<i64>>>()
            .map_or(Value::Null, |values| json!(values))
    }

    fn is_answer_valid(&self, answer: &Value) -> bool {
        Self::values(answer)
            .is_some_and(|values| (self.min_count..=self.max_count).contains(&values.len()))
    }

    fn is_answer_correct(&self, answer: &Value) -> bool {
        let Some(mut values) = Self::values(answer) else {
            return false;
        };
        if values.len() != self.correct.len() {
            return false;
        }
        let mut correct = self.correct.clone();
        if !self.correct_in_order {
            correct.sort_unstable();
            values.sort_unstable();
        }
        values == correct
    }

    fn correct_answer(&self) -> Value {
        json!(self.correct)
    }

    fn configure(&mut self, method: &str, args: &[Value]) -> Result<()> {
        match method {
            "setCorrect" => {
                let correct: OneOrMany<i64> = builder_arg(method, args, 0)?;
                self.correct = correct.into_vec();
            }
            "setLimits" => {
                let min: usize = builder_arg(method, args, 0)?;
                let max: usize = builder_arg(method, args, 1)?;
                if min > max {
                    return Err(Error::Generation(format!("invalid count range [{min}, {max}]")));
                }
                self.min_count = min;
                self.max_count = max;
            }
            "setCorrectInOrder" => self.correct_in_order = builder_arg(method, args, 0)?,
            "setRadix" => {
                let radix: u32 = builder_arg(method, args, 0)?;
                if ![2, 10, 16].contains(&radix) {
                    return Err(Error::Generation(format!("unsupported radix {radix}")));
                }
                self.radix = radix;
            }
            _ => return Err(unknown_method("numeric", method)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::test_support::{EchoRenderer, form, rendered};
    use pretty_assertions::assert_eq;

    fn question(correct: Value, in_order: bool) -> NumericQuestion {
        let mut q = NumericQuestion::default();
        q.instantiate(
            &json!({
                "text": "Enter the values",
                "correct": correct,
                "correctInOrder": in_order,
                "minCount": 1,
                "maxCount": 4
            }),
            0,
        )
        .unwrap();
        q
    }

    #[test]
    fn parses_number_notations() {
        assert_eq!(parse_number("0x1F"), Some(31));
        assert_eq!(parse_number("0b101"), Some(5));
        assert_eq!(parse_number(" -12 "), Some(-12));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("0b102"), None);
        assert_eq!(parse_number("0x-1"), None);
    }

    #[test]
    fn invalid_slot_invalidates_answer() {
        let q = question(json!([1, 2]), true);
        let answer = q.process_answer_submit(&form(&[(
            "answer",
            FormValue::List(vec!["0x1F".into(), "".into(), "0b101".into()]),
        )]));
        assert_eq!(answer, json!([31, 5]));

        let answer = q.process_answer_submit(&form(&[(
            "answer",
            FormValue::List(vec!["1".into(), "abc".into()]),
        )]));
        assert_eq!(answer, Value::Null);
        assert!(!q.is_answer_valid(&answer));
    }

    #[test]
    fn order_sensitivity_is_configurable() {
        let strict = question(json!([3, 1, 2]), true);
        assert!(strict.is_answer_correct(&json!([3, 1, 2])));
        assert!(!strict.is_answer_correct(&json!([1, 2, 3])));

        let loose = question(json!([3, 1, 2]), false);
        assert!(loose.is_answer_correct(&json!([1, 2, 3])));
        assert!(!loose.is_answer_correct(&json!([1, 2])));
    }

    #[test]
    fn validity_follows_count_limits() {
        let q = question(json!(42), true);
        assert!(q.is_answer_valid(&json!([1])));
        assert!(!q.is_answer_valid(&json!([])));
        assert!(!q.is_answer_valid(&json!([1, 2, 3, 4, 5])));
        assert!(!q.is_answer_valid(&json!(["1"])));
    }

    #[test]
    fn rejects_correct_outside_limits() {
        let mut q = NumericQuestion::default();
        let err = q.instantiate(&json!({"text": "t", "correct": [1, 2], "maxCount": 1}), 0);
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn discloses_in_configured_radix() {
        let mut q = question(json!([255, -2]), true);
        q.configure("setRadix", &[json!(16)]).unwrap();
        let out = rendered(
            &q.render_result_content(&EchoRenderer, "en", Some(&json!([255, 2])), None)
                .unwrap(),
        );
        assert_eq!(out["params"]["correct"], json!(["0xFF", "-0x2"]));
        assert_eq!(out["params"]["answer"], json!(["0xFF", "0x2"]));
        assert_eq!(out["params"]["inputClass"], "text-danger");
        assert_eq!(format_number(5, 2), "0b101");

        let mut reloaded = NumericQuestion::default();
        reloaded.load(&q.to_json()).unwrap();
        assert_eq!(reloaded, q);
    }

    #[test]
    fn serializes_every_setting() {
        let q = question(json!([3, 1]), false);
        assert_eq!(
            q.to_json(),
            json!({
                "text": "Enter the values",
                "correct": [3, 1],
                "correctInOrder": false,
                "minCount": 1,
                "maxCount": 4,
                "radix": 10,
            })
        );
    }
}
