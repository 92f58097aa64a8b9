use std::collections::{BTreeMap, BTreeSet};

use records::LocalizedText;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::trace;

use super::{
    FormData, FormValue, Question, Renderer, answer_indices, builder_arg, has_duplicates,
    parse_data, unknown_method,
};
use crate::error::{Error, Result};
use crate::random::Random;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderItem {
    pub text: LocalizedText,
    /// `None` for items that do not belong to the answer.
    pub correct_order: Option<i64>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub preselected: bool,
    #[serde(default)]
    pub group: Option<String>,
}

impl OrderItem {
    pub fn is_correct(&self) -> bool {
        self.correct_order.is_some()
    }
}

/// Pick the right items and arrange them in the right order.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderQuestion {
    text: LocalizedText,
    #[serde(default)]
    min_count: Option<usize>,
    #[serde(default)]
    max_count: Option<usize>,
    items: Vec<OrderItem>,
}

impl OrderQuestion {
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    fn check_limits(&self) -> Result<(usize, usize)> {
        let prefix = "invalid question template";
        let (Some(min), Some(max)) = (self.min_count, self.max_count) else {
            return Err(Error::Validation(format!(
                "{prefix}, the minimal and maximal counts must be set"
            )));
        };
        if min > max {
            return Err(Error::Validation(format!(
                "{prefix}, the minimal-maximal count range is inverted"
            )));
        }
        if max > self.items.len() {
            return Err(Error::Validation(format!(
                "{prefix}, the number of items is out of the minCount-maxCount range"
            )));
        }
        Ok((min, max))
    }

    /// Keeps mandatory items and whole groups with a mandatory member; returns the rest.
    fn split_optional(&mut self) -> Vec<OrderItem> {
        let mandatory_groups: BTreeSet<String> = self
            .items
            .iter()
            .filter(|item| item.mandatory)
            .filter_map(|item| item.group.clone())
            .collect();

        let (kept, optional): (Vec<OrderItem>, Vec<OrderItem>) =
            std::mem::take(&mut self.items).into_iter().partition(|item| {
                item.mandatory
                    || item
                        .group
                        .as_ref()
                        .is_some_and(|g| mandatory_groups.contains(g))
            });
        self.items = kept;
        optional
    }

    /// Ungrouped items first (one per group), then named groups in order of appearance.
    fn split_in_groups(items: Vec<OrderItem>) -> Vec<Vec<OrderItem>> {
        let mut singles = vec![];
        let mut named: Vec<Vec<OrderItem>> = vec![];
        let mut positions: BTreeMap<String, usize> = BTreeMap::new();
        for item in items {
            match item.group.clone() {
                None => singles.push(vec![item]),
                Some(group) => match positions.get(&group) {
                    Some(&position) => named[position].push(item),
                    None => {
                        positions.insert(group, named.len());
                        named.push(vec![item]);
                    }
                },
            }
        }
        singles.extend(named);
        singles
    }

    fn render_order(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        readonly: bool,
        correct_class: &str,
    ) -> Result<String> {
        let selected: Vec<usize> = match answer.and_then(answer_indices) {
            Some(indices) => indices,
            None if answer.is_none() => self
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.preselected)
                .map(|(idx, _)| idx)
                .collect(),
            None => vec![],
        };
        let remaining: Vec<usize> = (0..self.items.len())
            .filter(|idx| !selected.contains(idx))
            .collect();
        let items: Vec<&str> = self.items.iter().map(|i| i.text.resolve(locale)).collect();
        let params = json!({
            "locale": locale,
            "text": self.text.resolve(locale),
            "items": items,
            "selected": selected,
            "remaining": remaining,
            "readonly": readonly,
            "correctClass": correct_class,
        });
        renderer.render("order", locale, &params)
    }
}

impl Question for OrderQuestion {
    fn type_tag(&self) -> &'static str {
        "order"
    }

    fn instantiate(&mut self, template: &Value, seed: u64) -> Result<()> {
        *self = parse_data(template, "invalid question template")?;
        let (min, max) = self.check_limits()?;

        let optional = self.split_optional();
        if self.items.len() > max {
            return Err(Error::InvalidConfig(format!(
                "{} mandatory items exceed the maximal count {max}",
                self.items.len()
            )));
        }

        let mut random = Random::new(seed);
        let missing_min = min.saturating_sub(self.items.len());
        let missing_max = max - self.items.len();
        if missing_max > 0 {
            let groups = Self::split_in_groups(optional);
            let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
            let chosen = random.select_random_knapsack(&sizes, missing_min, missing_max)?;
            trace!(?sizes, ?chosen, "optional item groups selected");

            let added: usize = chosen.iter().map(|&idx| sizes[idx]).sum();
            if added < missing_min {
                return Err(Error::InvalidConfig(format!(
                    "item groups cannot fill the minimal count {min}"
                )));
            }
            let chosen: BTreeSet<usize> = chosen.into_iter().collect();
            for (idx, group) in groups.into_iter().enumerate() {
                if chosen.contains(&idx) {
                    self.items.extend(group);
                }
            }
        } else if missing_min > 0 {
            return Err(Error::InvalidConfig(format!(
                "item groups cannot fill the minimal count {min}"
            )));
        }

        random.shuffle(&mut self.items);
        Ok(())
    }

    fn load(&mut self, data: &Value) -> Result<()> {
        *self = parse_data(data, "corrupted question data")?;
        Ok(())
    }

    fn text(&self) -> &LocalizedText {
        &self.text
    }

    fn set_text(&mut self, text: LocalizedText) {
        self.text = text;
    }

    fn to_json(&self) -> Value {
        let mut data = json!({
            "text": self.text,
            "items": self.items,
        });
        if let Some(min) = self.min_count {
            data["minCount"] = json!(min);
        }
        if let Some(max) = self.max_count {
            data["maxCount"] = json!(max);
        }
        data
    }

    fn render_form_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
    ) -> Result<String> {
        self.render_order(renderer, locale, answer, false, "")
    }

    fn render_result_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        answer_is_correct: Option<bool>,
    ) -> Result<String> {
        let class = match answer_is_correct {
            Some(true) => "correct",
            Some(false) => "wrong",
            None => "",
        };
        self.render_order(renderer, locale, answer, true, class)
    }

    /// Indices come as one whitespace separated text field.
    fn process_answer_submit(&self, form: &FormData) -> Value {
        let raw = match form.get("answer") {
            None => return json!([]),
            Some(FormValue::Text(raw)) => raw.trim(),
            Some(FormValue::List(_)) => return Value::Null,
        };
        if raw.is_empty() {
            return json!([]);
        }
        raw.split_whitespace()
            .map(|token| token.parse::<usize>().ok())
            .collect::<Option<Vec<usize>>>()
            .map_or(Value::Null, |indices| json!(indices))
    }

    fn is_answer_valid(&self, answer: &Value) -> bool {
        answer_indices(answer).is_some_and(|indices| {
            !has_duplicates(&indices) && indices.iter().all(|&i| i < self.items.len())
        })
    }

    fn is_answer_correct(&self, answer: &Value) -> bool {
        if !self.is_answer_valid(answer) {
            return false;
        }
        let Some(selected) = answer_indices(answer) else {
            return false;
        };

        let unselected_correct = self
            .items
            .iter()
            .enumerate()
            .any(|(idx, item)| item.is_correct() && !selected.contains(&idx));
        if unselected_correct {
            return false;
        }

        let mut last_order = i64::MIN;
        for idx in selected {
            match self.items[idx].correct_order {
                Some(order) if order >= last_order => last_order = order,
                _ => return false,
            }
        }
        true
    }

    fn correct_answer(&self) -> Value {
        let mut correct: Vec<(i64, usize)> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| item.correct_order.map(|order| (order, idx)))
            .collect();
        correct.sort();
        json!(correct.into_iter().map(|(_, idx)| idx).collect::<Vec<_>>())
    }

    fn configure(&mut self, method: &str, args: &[Value]) -> Result<()> {
        match method {
            "setLimits" => {
                let min: usize = builder_arg(method, args, 0)?;
                let max: usize = builder_arg(method, args, 1)?;
                if min > max {
                    return Err(Error::Generation(format!("invalid count range [{min}, {max}]")));
                }
                self.min_count = Some(min);
                self.max_count = Some(max);
            }
            "addItem" => {
                self.items.push(OrderItem {
                    text: builder_arg(method, args, 0)?,
                    correct_order: builder_arg(method, args, 1)?,
                    mandatory: builder_arg::<Option<bool>>(method, args, 2)?.unwrap_or(false),
                    preselected: builder_arg::<Option<bool>>(method, args, 3)?.unwrap_or(false),
                    group: builder_arg(method, args, 4)?,
                });
            }
            _ => return Err(unknown_method("order", method)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::test_support::{EchoRenderer, form, rendered};
    use pretty_assertions::assert_eq;

    fn template() -> Value {
        json!({
            "text": "Order the steps of making tea",
            "minCount": 4,
            "maxCount": 5,
            "items": [
                {"text": "Boil water", "correctOrder": 1, "mandatory": true},
                {"text": "Pour water", "correctOrder": 3, "mandatory": true},
                {"text": "Add tea bag", "correctOrder": 2, "group": "bag"},
                {"text": "Remove tea bag", "correctOrder": 4, "group": "bag", "mandatory": true},
                {"text": "Freeze water", "correctOrder": null},
                {"text": "Add salt", "correctOrder": null, "preselected": true},
                {"text": "Whistle", "correctOrder": null}
            ]
        })
    }

    fn texts(q: &OrderQuestion) -> Vec<&str> {
        q.items().iter().map(|i| i.text.resolve("en")).collect()
    }

    #[test]
    fn mandatory_groups_are_kept_whole() {
        for seed in 0..50 {
            let mut q = OrderQuestion::default();
            q.instantiate(&template(), seed).unwrap();
            let texts = texts(&q);
            assert!((4..=5).contains(&texts.len()), "{texts:?}");
            for required in ["Boil water", "Pour water", "Add tea bag", "Remove tea bag"] {
                assert!(texts.contains(&required));
            }
        }
    }

    #[test]
    fn correct_answer_is_graded_correct() {
        let mut q = OrderQuestion::default();
        q.instantiate(&template(), 8).unwrap();
        let correct = q.correct_answer();
        assert_eq!(correct.as_array().unwrap().len(), 4);
        assert!(q.is_answer_correct(&correct));

        let first = q.items()[correct[0].as_u64().unwrap() as usize].text.resolve("en");
        assert_eq!(first, "Boil water");
    }

    #[test]
    fn wrong_orders_and_omissions_fail() {
        let mut q = OrderQuestion::default();
        q.instantiate(&template(), 21).unwrap();
        let correct: Vec<u64> = q
            .correct_answer()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();

        let mut swapped = correct.clone();
        swapped.swap(0, 1);
        assert!(!q.is_answer_correct(&json!(swapped)));

        assert!(!q.is_answer_correct(&json!(&correct[1..])));

        if let Some(wrong) = (0..q.items().len() as u64).find(|i| !correct.contains(i)) {
            let mut with_wrong = correct.clone();
            with_wrong.push(wrong);
            assert!(!q.is_answer_correct(&json!(with_wrong)));
        }
    }

    #[test]
    fn answer_parsing() {
        let q = OrderQuestion::default();
        assert_eq!(
            q.process_answer_submit(&form(&[("answer", FormValue::Text(" 3  0\t1 ".into()))])),
            json!([3, 0, 1])
        );
        assert_eq!(
            q.process_answer_submit(&form(&[("answer", FormValue::Text("   ".into()))])),
            json!([])
        );
        assert_eq!(
            q.process_answer_submit(&form(&[("answer", FormValue::Text("1 b".into()))])),
            Value::Null
        );
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let mut t = template();
        t["minCount"] = json!(6);
        t["maxCount"] = json!(5);
        assert!(matches!(
            OrderQuestion::default().instantiate(&t, 0),
            Err(Error::Validation(_))
        ));

        let mut t = template();
        t["maxCount"] = json!(3);
        t["minCount"] = json!(2);
        assert!(matches!(
            OrderQuestion::default().instantiate(&t, 0),
            Err(Error::InvalidConfig(_))
        ));

        let mut t = template();
        t.as_object_mut().unwrap().remove("minCount");
        assert!(OrderQuestion::default().instantiate(&t, 0).is_err());
    }

    #[test]
    fn form_preselects_items_without_answer() {
        let q: OrderQuestion = serde_json::from_value(json!({
            "text": "t",
            "items": [
                {"text": "a", "correctOrder": 1},
                {"text": "b", "correctOrder": null, "preselected": true}
            ]
        }))
        .unwrap();
        let out = rendered(&q.render_form_content(&EchoRenderer, "en", None).unwrap());
        assert_eq!(out["params"]["selected"], json!([1]));
        assert_eq!(out["params"]["remaining"], json!([0]));

        let out = rendered(
            &q.render_result_content(&EchoRenderer, "en", Some(&json!([0])), Some(true))
                .unwrap(),
        );
        assert_eq!(out["params"]["selected"], json!([0]));
        assert_eq!(out["params"]["correctClass"], "correct");
    }

    #[test]
    fn load_restores_without_randomness() {
        let mut q = OrderQuestion::default();
        q.instantiate(&template(), 4).unwrap();
        let mut loaded = OrderQuestion::default();
        loaded.load(&q.to_json()).unwrap();
        assert_eq!(loaded, q);
    }
}
