use records::LocalizedText;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    FormData, FormValue, OneOrMany, Question, Renderer, answer_indices, builder_arg,
    has_duplicates, parse_data, unknown_method,
};
use crate::error::{Error, Result};
use crate::random::Random;

/// Fixed list of options with one (single) or several (multi) correct ones.
#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceQuestion {
    multiple: bool,
    text: LocalizedText,
    answers: Vec<LocalizedText>,
    correct: Vec<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChoiceTemplate {
    text: LocalizedText,
    answers: Vec<LocalizedText>,
    /// Offered answers; all of them when missing.
    count: Option<usize>,
    correct: OneOrMany<usize>,
    #[serde(default)]
    exclusive: Vec<(usize, usize)>,
}

#[derive(Deserialize)]
struct ChoiceData {
    text: LocalizedText,
    answers: Vec<LocalizedText>,
    correct: OneOrMany<usize>,
}

impl ChoiceQuestion {
    pub fn single() -> Self {
        Self {
            multiple: false,
            text: LocalizedText::default(),
            answers: vec![],
            correct: vec![],
        }
    }

    pub fn multi() -> Self {
        Self {
            multiple: true,
            ..Self::single()
        }
    }

    pub fn answers(&self) -> &[LocalizedText] {
        &self.answers
    }

    fn tag(&self) -> &'static str {
        if self.multiple { "multi" } else { "single" }
    }

    /// Checks the shape of `correct` for this variant and returns the indices.
    fn correct_indices(&self, correct: OneOrMany<usize>, prefix: &str) -> Result<Vec<usize>> {
        let indices = match (self.multiple, correct) {
            (false, OneOrMany::One(index)) => vec![index],
            (false, OneOrMany::Many(_)) => {
                return Err(Error::Validation(format!(
                    "{prefix}, single choice question needs exactly one correct answer"
                )));
            }
            (true, OneOrMany::One(_)) => {
                return Err(Error::Validation(format!(
                    "{prefix}, correct answers of a multi choice question must be a list"
                )));
            }
            (true, OneOrMany::Many(mut indices)) => {
                indices.sort_unstable();
                indices.dedup();
                indices
            }
        };
        Ok(indices)
    }

    fn check_references(&self, correct: &[usize], len: usize, prefix: &str) -> Result<()> {
        if let Some(index) = correct.iter().find(|&&i| i >= len) {
            return Err(Error::Validation(format!(
                "{prefix}, correct answer {index} refers to a non-existing option"
            )));
        }
        Ok(())
    }

    fn render_choices(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        graded: Option<bool>,
    ) -> Result<String> {
        let options: Vec<&str> = self.answers.iter().map(|a| a.resolve(locale)).collect();
        let selected = match answer {
            Some(Value::Array(items)) => Value::Array(items.clone()),
            Some(Value::Number(n)) => json!([n]),
            _ => json!([]),
        };
        let mut params = json!({
            "type": if self.multiple { "checkbox" } else { "radio" },
            "locale": locale,
            "text": self.text.resolve(locale),
            "options": options,
            "selected": selected,
            "readonly": graded.is_some(),
        });
        if let Some(correct) = graded {
            params["graded"] = json!(if correct { "success" } else { "danger" });
        }
        renderer.render("choices", locale, &params)
    }
}

impl Question for ChoiceQuestion {
    fn type_tag(&self) -> &'static str {
        self.tag()
    }

    fn instantiate(&mut self, template: &Value, seed: u64) -> Result<()> {
        let prefix = "invalid question template";
        let template: ChoiceTemplate = parse_data(template, prefix)?;
        if template.text.is_empty() {
            return Err(Error::Validation(format!("{prefix}, question text is empty")));
        }
        let correct = self.correct_indices(template.correct, prefix)?;
        self.check_references(&correct, template.answers.len(), prefix)?;

        let mut random = Random::new(seed);
        let selected = random.select_random_subset(
            &template.answers,
            template.count.unwrap_or(template.answers.len()),
            &correct,
            &template.exclusive,
        )?;

        let mut remapped: Vec<usize> = selected
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| correct.contains(key))
            .map(|(position, _)| position)
            .collect();
        remapped.sort_unstable();
        if remapped.len() != correct.len() {
            return Err(Error::Generation(
                "correct answer was lost while selecting random options".to_string(),
            ));
        }

        self.text = template.text;
        self.answers = selected.into_iter().map(|(_, a)| a.clone()).collect();
        self.correct = remapped;
        Ok(())
    }

    fn load(&mut self, data: &Value) -> Result<()> {
        let prefix = "corrupted question data";
        let data: ChoiceData = parse_data(data, prefix)?;
        let correct = self.correct_indices(data.correct, prefix)?;
        self.check_references(&correct, data.answers.len(), prefix)?;
        self.text = data.text;
        self.answers = data.answers;
        self.correct = correct;
        Ok(())
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
            "answers": self.answers,
            "correct": self.correct_answer(),
        })
    }

    fn render_form_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
    ) -> Result<String> {
        self.render_choices(renderer, locale, answer, None)
    }

    fn render_result_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        answer_is_correct: Option<bool>,
    ) -> Result<String> {
        let graded = answer_is_correct
            .unwrap_or_else(|| answer.is_some_and(|a| self.is_answer_correct(a)));
        self.render_choices(renderer, locale, answer, Some(graded))
    }

    fn process_answer_submit(&self, form: &FormData) -> Value {
        let parse = |raw: &str| raw.trim().parse::<usize>().ok();
        match (self.multiple, form.get("answer")) {
            (false, Some(FormValue::Text(raw))) => parse(raw).map_or(Value::Null, |i| json!(i)),
            (false, _) => Value::Null,
            (true, None) => json!([]),
            (true, Some(FormValue::List(raw))) => raw
                .iter()
                .map(|r| parse(r))
                .collect::<Option<Vec<usize>>>()
                .map_or(Value::Null, |indices| json!(indices)),
            (true, Some(FormValue::Text(_))) => Value::Null,
        }
    }

    fn is_answer_valid(&self, answer: &Value) -> bool {
        if self.multiple {
            answer_indices(answer).is_some_and(|indices| {
                !has_duplicates(&indices) && indices.iter().all(|&i| i < self.answers.len())
            })
        } else {
            answer
                .as_u64()
                .is_some_and(|i| (i as usize) < self.answers.len())
        }
    }

    fn is_answer_correct(&self, answer: &Value) -> bool {
        if !self.is_answer_valid(answer) {
            return false;
        }
        if self.multiple {
            let Some(mut indices) = answer_indices(answer) else {
                return false;
            };
            indices.sort_unstable();
            indices == self.correct
        } else {
            answer.as_u64().map(|i| i as usize) == self.correct.first().copied()
        }
    }

    fn correct_answer(&self) -> Value {
        if self.multiple {
            json!(self.correct)
        } else {
            self.correct.first().map_or(Value::Null, |c| json!(c))
        }
    }

    fn configure(&mut self, method: &str, args: &[Value]) -> Result<()> {
        match method {
            "addAnswer" => {
                let text: LocalizedText = builder_arg(method, args, 0)?;
                let correct: Option<bool> = builder_arg(method, args, 1)?;
                if correct.unwrap_or(false) {
                    if !self.multiple {
                        self.correct.clear();
                    }
                    self.correct.push(self.answers.len());
                }
                self.answers.push(text);
            }
            "setAnswers" => {
                let answers: Vec<LocalizedText> = builder_arg(method, args, 0)?;
                let correct: OneOrMany<usize> = builder_arg(method, args, 1)?;
                let correct = self.correct_indices(correct, "invalid generated question")?;
                self.check_references(&correct, answers.len(), "invalid generated question")?;
                self.answers = answers;
                self.correct = correct;
            }
            "setCorrect" => {
                let correct: OneOrMany<usize> = builder_arg(method, args, 0)?;
                let correct = self.correct_indices(correct, "invalid generated question")?;
                self.check_references(&correct, self.answers.len(), "invalid generated question")?;
                self.correct = correct;
            }
            _ => return Err(unknown_method(self.tag(), method)),
        }
        self.correct.sort_unstable();
        self.correct.dedup();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::test_support::{EchoRenderer, form, rendered};
    use pretty_assertions::assert_eq;

    fn single_template() -> Value {
        json!({
            "text": "Which one is a mammal?",
            "answers": ["Shark", "Dolphin", "Trout", "Salmon", "Tuna"],
            "count": 3,
            "correct": 1,
            "exclusive": [[0, 4]]
        })
    }

    fn multi_template() -> Value {
        json!({
            "text": {"en": "Select even numbers", "cs": "Vyberte sudá čísla"},
            "answers": ["1", "2", "3", "4", "5", "6"],
            "count": 4,
            "correct": [1, 3]
        })
    }

    #[test]
    fn single_keeps_correct_option() {
        for seed in 0..50 {
            let mut q = ChoiceQuestion::single();
            q.instantiate(&single_template(), seed).unwrap();
            assert_eq!(q.answers().len(), 3);
            let correct = q.correct_answer().as_u64().unwrap() as usize;
            assert_eq!(q.answers()[correct].resolve("en"), "Dolphin");
            let texts: Vec<&str> = q.answers().iter().map(|a| a.resolve("en")).collect();
            assert!(!(texts.contains(&"Shark") && texts.contains(&"Tuna")));
        }
    }

    #[test]
    fn instantiation_is_reproducible() {
        let mut a = ChoiceQuestion::multi();
        let mut b = ChoiceQuestion::multi();
        a.instantiate(&multi_template(), 99).unwrap();
        b.instantiate(&multi_template(), 99).unwrap();
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn single_grading() {
        let mut q = ChoiceQuestion::single();
        q.instantiate(&single_template(), 5).unwrap();
        let correct = q.correct_answer();
        assert!(q.is_answer_correct(&correct));
        let wrong = (correct.as_u64().unwrap() + 1) % 3;
        assert!(!q.is_answer_correct(&json!(wrong)));
        assert!(!q.is_answer_valid(&json!(3)));
        assert!(!q.is_answer_valid(&Value::Null));
    }

    #[test]
    fn multi_grading_ignores_order() {
        let mut q = ChoiceQuestion::multi();
        q.instantiate(&multi_template(), 3).unwrap();
        let correct: Vec<u64> = q
            .correct_answer()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();
        assert_eq!(correct.len(), 2);
        for i in &correct {
            let text = q.answers()[*i as usize].resolve("en");
            assert!(text == "2" || text == "4");
        }

        let reversed: Vec<u64> = correct.iter().rev().copied().collect();
        assert!(q.is_answer_correct(&json!(correct)));
        assert!(q.is_answer_correct(&json!(reversed)));

        let missing_one = &correct[..1];
        assert!(!q.is_answer_correct(&json!(missing_one)));
        let extra = (0..4u64).find(|i| !correct.contains(i)).unwrap();
        let mut with_extra = correct.clone();
        with_extra.push(extra);
        assert!(!q.is_answer_correct(&json!(with_extra)));
        assert!(!q.is_answer_valid(&json!([correct[0], correct[0]])));
    }

    #[test]
    fn rejects_inconsistent_templates() {
        let mut bad = single_template();
        bad["correct"] = json!(7);
        assert!(matches!(
            ChoiceQuestion::single().instantiate(&bad, 1),
            Err(Error::Validation(_))
        ));

        let mut bad = multi_template();
        bad["correct"] = json!(1);
        assert!(matches!(
            ChoiceQuestion::multi().instantiate(&bad, 1),
            Err(Error::Validation(_))
        ));

        let mut bad = single_template();
        bad["count"] = json!(9);
        assert!(matches!(
            ChoiceQuestion::single().instantiate(&bad, 1),
            Err(Error::InvalidConfig(_))
        ));

        let mut bad = single_template();
        bad["text"] = json!({"de": "Welches?"});
        assert!(ChoiceQuestion::single().instantiate(&bad, 1).is_err());
    }

    #[test]
    fn processes_form_fields() {
        let single = ChoiceQuestion::single();
        assert_eq!(
            single.process_answer_submit(&form(&[("answer", FormValue::Text(" 2 ".into()))])),
            json!(2)
        );
        assert_eq!(
            single.process_answer_submit(&form(&[("answer", FormValue::Text("x".into()))])),
            Value::Null
        );

        let multi = ChoiceQuestion::multi();
        assert_eq!(multi.process_answer_submit(&FormData::new()), json!([]));
        assert_eq!(
            multi.process_answer_submit(&form(&[(
                "answer",
                FormValue::List(vec!["0".into(), "3".into()])
            )])),
            json!([0, 3])
        );
        assert_eq!(
            multi.process_answer_submit(&form(&[(
                "answer",
                FormValue::List(vec!["0".into(), "three".into()])
            )])),
            Value::Null
        );
    }

    #[test]
    fn renders_localized_options() {
        let mut q = ChoiceQuestion::multi();
        q.instantiate(&multi_template(), 11).unwrap();
        let out = rendered(
            &q.render_result_content(&EchoRenderer, "cs", Some(&q.correct_answer()), None)
                .unwrap(),
        );
        assert_eq!(out["template"], "choices");
        assert_eq!(out["params"]["type"], "checkbox");
        assert_eq!(out["params"]["text"], "Vyberte sudá čísla");
        assert_eq!(out["params"]["graded"], "success");
        assert_eq!(out["params"]["options"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn builder_methods() {
        let mut q = ChoiceQuestion::single();
        q.configure("addAnswer", &[json!("3"), json!(false)]).unwrap();
        q.configure("addAnswer", &[json!("4"), json!(true)]).unwrap();
        q.configure("addAnswer", &[json!({"en": "five", "cs": "pět"})]).unwrap();
        assert_eq!(q.correct_answer(), json!(1));
        assert!(q.configure("setCorrect", &[json!(5)]).is_err());
        assert!(matches!(
            q.configure("addItem", &[json!("x")]),
            Err(Error::Generation(_))
        ));
    }
}
