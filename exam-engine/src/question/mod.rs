//! Question types.
//!
//! A question is created from a template with [`Question::instantiate`],
//! which draws the concrete variant for a seed, or restored from its
//! persisted form with [`Question::load`]. The persisted form is the output of
//! [`Question::to_json`] and never needs the template again.
use std::collections::BTreeMap;
use std::fmt::Debug;

use records::LocalizedText;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

mod choice;
mod numeric;
mod order;

pub use choice::ChoiceQuestion;
pub use numeric::{NumericQuestion, format_number, parse_number};
pub use order::{OrderItem, OrderQuestion};

/// Raw submitted form field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    List(Vec<String>),
}

pub type FormData = BTreeMap<String, FormValue>;

/// Produces a displayable fragment from a named template and structured params.
pub trait Renderer {
    fn render(&self, name: &str, locale: &str, params: &Value) -> Result<String>;
}

pub trait Question: Debug {
    fn type_tag(&self) -> &'static str;

    /// Validates template data and derives a concrete question for the seed.
    fn instantiate(&mut self, template: &Value, seed: u64) -> Result<()>;

    /// Restores a previously instantiated question. No randomness involved.
    fn load(&mut self, data: &Value) -> Result<()>;

    fn text(&self) -> &LocalizedText;

    fn set_text(&mut self, text: LocalizedText);

    fn get_text(&self, locale: &str) -> &str {
        self.text().resolve(locale)
    }

    fn to_json(&self) -> Value;

    fn render_form_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
    ) -> Result<String>;

    fn render_result_content(
        &self,
        renderer: &dyn Renderer,
        locale: &str,
        answer: Option<&Value>,
        answer_is_correct: Option<bool>,
    ) -> Result<String>;

    /// Turns raw form fields into the answer representation.
    ///
    /// Malformed input yields `Value::Null`, which no question accepts as valid.
    fn process_answer_submit(&self, form: &FormData) -> Value;

    /// Shape check only, independent of correctness.
    fn is_answer_valid(&self, answer: &Value) -> bool;

    fn is_answer_correct(&self, answer: &Value) -> bool;

    /// The correct answer, shaped like a submitted answer.
    fn correct_answer(&self) -> Value;

    /// Builder call issued by a dynamic question generator.
    fn configure(&mut self, method: &str, args: &[Value]) -> Result<()>;
}

pub type QuestionConstructor = fn() -> Box<dyn Question>;

/// Maps question type tags to their constructors.
#[derive(Clone, Debug)]
pub struct QuestionFactory {
    known: BTreeMap<String, QuestionConstructor>,
}

impl Default for QuestionFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("single", new_single);
        factory.register("multi", new_multi);
        factory.register("order", new_order);
        factory.register("numeric", new_numeric);
        factory
    }
}

fn new_single() -> Box<dyn Question> {
    Box::new(ChoiceQuestion::single())
}

fn new_multi() -> Box<dyn Question> {
    Box::new(ChoiceQuestion::multi())
}

fn new_order() -> Box<dyn Question> {
    Box::new(OrderQuestion::default())
}

fn new_numeric() -> Box<dyn Question> {
    Box::new(NumericQuestion::default())
}

impl QuestionFactory {
    pub fn empty() -> Self {
        Self {
            known: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tag: &str, constructor: QuestionConstructor) {
        self.known.insert(tag.to_string(), constructor);
    }

    pub fn create(&self, tag: &str) -> Result<Box<dyn Question>> {
        let constructor = self
            .known
            .get(tag)
            .ok_or_else(|| Error::UnknownQuestionType(tag.to_string()))?;
        Ok(constructor())
    }

    pub fn instantiate(&self, tag: &str, template: &Value, seed: u64) -> Result<Box<dyn Question>> {
        let mut question = self.create(tag)?;
        question.instantiate(template, seed)?;
        debug!(question_type = tag, seed, "question instantiated");
        Ok(question)
    }

    pub fn load(&self, tag: &str, data: &Value) -> Result<Box<dyn Question>> {
        let mut question = self.create(tag)?;
        question.load(data)?;
        Ok(question)
    }
}

/// Deserializes question data, reporting failures as validation errors.
pub(crate) fn parse_data<T: DeserializeOwned>(data: &Value, prefix: &str) -> Result<T> {
    T::deserialize(data).map_err(|e| Error::Validation(format!("{prefix}, {e}")))
}

/// `int` or `[int]` in question data.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Indices from a JSON answer; `None` unless every entry is a non-negative integer.
pub(crate) fn answer_indices(answer: &Value) -> Option<Vec<usize>> {
    answer
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| usize::try_from(n).ok()))
        .collect()
}

pub(crate) fn has_duplicates(indices: &[usize]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    !indices.iter().all(|i| seen.insert(*i))
}

/// Parses a builder argument for a dynamic generator call.
pub(crate) fn builder_arg<T: DeserializeOwned>(
    method: &str,
    args: &[Value],
    position: usize,
) -> Result<T> {
    let value = args.get(position).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        Error::Generation(format!(
            "invalid argument {} of '{method}': {e}",
            position + 1
        ))
    })
}

pub(crate) fn unknown_method(tag: &str, method: &str) -> Error {
    Error::Generation(format!(
        "method '{method}' is not available for {tag} questions"
    ))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_knows_builtin_types() {
        let factory = QuestionFactory::default();
        for tag in ["multi", "numeric", "order", "single"] {
            assert_eq!(factory.create(tag).unwrap().type_tag(), tag);
        }
        assert!(matches!(
            factory.create("essay"),
            Err(Error::UnknownQuestionType(t)) if t == "essay"
        ));
    }

    #[test]
    fn loaded_question_replays_instantiated_one() {
        let factory = QuestionFactory::default();
        let template = json!({
            "text": {"en": "Pick the prime", "cs": "Vyber prvočíslo"},
            "answers": ["4", "6", "7", "8", "9"],
            "count": 3,
            "correct": 2
        });
        let question = factory.instantiate("single", &template, 17).unwrap();
        let data = question.to_json();
        let loaded = factory.load("single", &data).unwrap();
        assert_eq!(loaded.to_json(), data);
        assert_eq!(loaded.get_text("cs"), "Vyber prvočíslo");
        assert_eq!(loaded.get_text("de"), "Pick the prime");
    }

    #[test]
    fn form_values_deserialize_untagged() {
        let form: FormData = serde_json::from_value(json!({"answer": ["1", "2"], "x": "3"})).unwrap();
        assert_eq!(form["answer"], FormValue::List(vec!["1".into(), "2".into()]));
        assert_eq!(form["x"], FormValue::Text("3".into()));
    }
}
