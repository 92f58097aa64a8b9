//! Template tests exchanged as JSON files.
//!
//! ```json
//! {
//!   "caption": {"en": "Arithmetic", "cs": "Aritmetika"},
//!   "grading": {"1": 17, "2": 14, "3": 11, "4": 0},
//!   "groups": [
//!     {"selectCount": 2, "points": 5, "questions": [
//!       {"type": "single", "caption": "Sum", "data": {"text": "1 + 1", "answers": ["1", "2"], "correct": 1}}
//!     ]}
//!   ]
//! }
//! ```
use std::path::Path;

use anyhow::Context;
use records::{
    LocalizedText, MemoryStore, Store, TemplateQuestion, TemplateQuestionsGroup, TemplateTest,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub caption: LocalizedText,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub grading: Option<Value>,
    pub groups: Vec<BundleGroup>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleGroup {
    /// Position in the exam; defaults to the position in the file.
    #[serde(default)]
    pub ordering: Option<u32>,
    pub select_count: u32,
    pub points: i64,
    pub questions: Vec<BundleQuestion>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleQuestion {
    /// Missing for dynamically generated questions.
    #[serde(default, rename = "type")]
    pub question_type: Option<String>,
    pub caption: LocalizedText,
    pub data: Value,
    #[serde(default)]
    pub disabled: bool,
}

impl Bundle {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read bundle {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("bundle {} is not valid", path.display()))
    }

    /// Stores the template test with its groups and questions.
    pub fn persist<S: Store>(&self, store: &mut S) -> anyhow::Result<TemplateTest> {
        let mut test = TemplateTest::new(self.caption.clone(), self.external_id.clone(), None);
        test.grading = self.grading.clone();
        store.persist(&test)?;

        for (idx, group) in self.groups.iter().enumerate() {
            let ordering = group.ordering.unwrap_or(idx as u32 + 1);
            let stored = TemplateQuestionsGroup::new(test.id, ordering, group.select_count, group.points);
            store.persist(&stored)?;
            for question in &group.questions {
                let mut template = TemplateQuestion::new(
                    test.id,
                    stored.id,
                    question.question_type.clone(),
                    question.data.clone(),
                    question.caption.clone(),
                );
                template.disabled = question.disabled;
                store.persist(&template)?;
            }
        }
        Ok(test)
    }

    pub fn to_store(&self) -> anyhow::Result<(MemoryStore, TemplateTest)> {
        let mut store = MemoryStore::new();
        let test = self.persist(&mut store)?;
        Ok((store, test))
    }

    /// Template question by 1-based group and question position.
    pub fn question(&self, group: usize, question: usize) -> anyhow::Result<&BundleQuestion> {
        let Some(found) = group
            .checked_sub(1)
            .and_then(|g| self.groups.get(g))
            .and_then(|g| question.checked_sub(1).and_then(|q| g.questions.get(q)))
        else {
            anyhow::bail!("bundle has no question {question} in group {group}");
        };
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn persists_groups_in_file_order() {
        let bundle: Bundle = serde_json::from_value(json!({
            "caption": "Mixed",
            "groups": [
                {"selectCount": 1, "points": 2, "questions": [
                    {"caption": "Dynamic", "data": {"code": "init(\"numeric\");"}}
                ]},
                {"ordering": 7, "selectCount": 1, "points": 3, "questions": [
                    {"type": "numeric", "caption": "Static", "data": {"text": "x", "correct": 1}, "disabled": true}
                ]}
            ]
        }))
        .unwrap();
        let (store, test) = bundle.to_store().unwrap();
        let mut groups: Vec<TemplateQuestionsGroup> = store
            .find_by(|g: &TemplateQuestionsGroup| g.test_id == test.id)
            .unwrap();
        groups.sort_by_key(|g| g.ordering);
        assert_eq!(groups.iter().map(|g| g.ordering).collect::<Vec<_>>(), vec![1, 7]);
        assert_eq!(store.count::<TemplateQuestion>(), 2);

        assert!(bundle.question(1, 1).unwrap().question_type.is_none());
        assert!(bundle.question(2, 1).unwrap().disabled);
        assert!(bundle.question(0, 1).is_err());
        assert!(bundle.question(2, 2).is_err());
    }
}
