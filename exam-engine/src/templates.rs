//! Append-only versioning of template groups and questions.
//!
//! Editing never rewrites a row in place: a new row is created with
//! `previous_version` pointing back, and the old row is retired with
//! `superseded_by` pointing forward. Generated exams keep referencing the
//! version they were drawn from.
use chrono::Utc;
use records::{Entity, LocalizedText, Store, TemplateQuestion, TemplateQuestionsGroup};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::orchestrator::transaction;

/// Guards `current_version` against cyclic chains.
const MAX_VERSION_HOPS: usize = 1000;

/// A template record that can be superseded by a newer version.
pub trait Versioned: Entity {
    fn superseded_by(&self) -> Option<Uuid>;
}

impl Versioned for TemplateQuestionsGroup {
    fn superseded_by(&self) -> Option<Uuid> {
        self.superseded_by
    }
}

impl Versioned for TemplateQuestion {
    fn superseded_by(&self) -> Option<Uuid> {
        self.superseded_by
    }
}

/// Follows the `superseded_by` chain to the newest version.
pub fn current_version<T: Versioned, S: Store>(store: &S, id: &Uuid) -> Result<T> {
    let mut record: T = store.fetch(id)?;
    for _ in 0..MAX_VERSION_HOPS {
        match record.superseded_by() {
            Some(next) => record = store.fetch(&next)?,
            None => return Ok(record),
        }
    }
    Err(Error::Validation(format!(
        "{} {id} has a cyclic version chain",
        T::COLLECTION
    )))
}

pub fn replace_group<S: Store>(
    store: &mut S,
    group_id: &Uuid,
    select_count: u32,
    points: i64,
) -> Result<TemplateQuestionsGroup> {
    let mut old: TemplateQuestionsGroup = store.fetch(group_id)?;
    if !old.is_live() {
        return Err(Error::StateConflict(format!(
            "question group {group_id} was already replaced or retired"
        )));
    }

    let mut group = TemplateQuestionsGroup::new(old.test_id, old.ordering, select_count, points);
    group.external_id = old.external_id.clone();
    group.previous_version = Some(old.id);
    old.superseded_by = Some(group.id);
    old.retired_at = Some(group.created_at);

    transaction(store, "replace group", |store| {
        store.persist(&old)?;
        store.persist(&group)?;
        let old_id = old.id;
        let questions: Vec<TemplateQuestion> = store
            .find_by(|q: &TemplateQuestion| q.group_id == old_id && q.retired_at.is_none())?;
        for mut question in questions {
            question.group_id = group.id;
            store.persist(&question)?;
        }
        Ok(())
    })?;
    debug!(old = %old.id, new = %group.id, "question group replaced");
    Ok(group)
}

pub fn replace_question<S: Store>(
    store: &mut S,
    question_id: &Uuid,
    question_type: Option<String>,
    data: Value,
    caption: LocalizedText,
) -> Result<TemplateQuestion> {
    let mut old: TemplateQuestion = store.fetch(question_id)?;
    if old.retired_at.is_some() {
        return Err(Error::StateConflict(format!(
            "template question {question_id} was already replaced or retired"
        )));
    }

    let mut question = TemplateQuestion::new(old.test_id, old.group_id, question_type, data, caption);
    question.external_id = old.external_id.clone();
    question.disabled = old.disabled;
    question.previous_version = Some(old.id);
    old.superseded_by = Some(question.id);
    old.retired_at = Some(question.created_at);

    transaction(store, "replace question", |store| {
        store.persist(&old)?;
        store.persist(&question)?;
        Ok(())
    })?;
    debug!(old = %old.id, new = %question.id, "template question replaced");
    Ok(question)
}

/// Removes a question from future draws without a successor.
pub fn retire_question<S: Store>(store: &mut S, question_id: &Uuid) -> Result<TemplateQuestion> {
    let mut question: TemplateQuestion = store.fetch(question_id)?;
    if question.retired_at.is_some() {
        return Err(Error::StateConflict(format!(
            "template question {question_id} is already retired"
        )));
    }
    question.retired_at = Some(Utc::now());
    store.persist(&question)?;
    Ok(question)
}

pub fn disable_question<S: Store>(
    store: &mut S,
    question_id: &Uuid,
    disabled: bool,
) -> Result<TemplateQuestion> {
    let mut question: TemplateQuestion = store.fetch(question_id)?;
    question.disabled = disabled;
    store.persist(&question)?;
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use records::MemoryStore;
    use serde_json::json;

    fn seeded() -> (MemoryStore, TemplateQuestionsGroup, TemplateQuestion) {
        let mut store = MemoryStore::new();
        let test_id = Uuid::new_v4();
        let group = TemplateQuestionsGroup::new(test_id, 1, 1, 2);
        let question = TemplateQuestion::new(
            test_id,
            group.id,
            Some("single".into()),
            json!({"text": "?", "answers": ["a", "b"], "correct": 0}),
            "Q".into(),
        );
        store.persist(&group).unwrap();
        store.persist(&question).unwrap();
        (store, group, question)
    }

    #[test]
    fn replaced_question_links_both_ways() {
        let (mut store, _, question) = seeded();
        let v2 = replace_question(&mut store, &question.id, Some("multi".into()), json!({}), "Q2".into())
            .unwrap();
        let v3 = replace_question(&mut store, &v2.id, None, json!({"code": ""}), "Q3".into()).unwrap();

        let old: TemplateQuestion = store.fetch(&question.id).unwrap();
        assert_eq!(old.superseded_by, Some(v2.id));
        assert!(old.retired_at.is_some());
        assert_eq!(v3.previous_version, Some(v2.id));
        assert!(v3.is_dynamic());

        let current: TemplateQuestion = current_version(&store, &question.id).unwrap();
        assert_eq!(current.id, v3.id);
        assert!(replace_question(&mut store, &question.id, None, json!({}), "x".into()).is_err());
    }

    #[test]
    fn replaced_group_takes_live_questions() {
        let (mut store, group, question) = seeded();
        let extra = TemplateQuestion::new(group.test_id, group.id, None, json!({}), "old".into());
        store.persist(&extra).unwrap();
        let retired = retire_question(&mut store, &extra.id).unwrap();

        let replacement = replace_group(&mut store, &group.id, 1, 3).unwrap();
        assert_eq!(replacement.ordering, group.ordering);
        let moved: TemplateQuestion = store.fetch(&question.id).unwrap();
        assert_eq!(moved.group_id, replacement.id);
        let stayed: TemplateQuestion = store.fetch(&retired.id).unwrap();
        assert_eq!(stayed.group_id, group.id);

        let current: TemplateQuestionsGroup = current_version(&store, &group.id).unwrap();
        assert_eq!(current.points, 3);
        assert!(replace_group(&mut store, &group.id, 1, 1).is_err());
    }

    #[test]
    fn retire_and_disable() {
        let (mut store, _, question) = seeded();
        let disabled = disable_question(&mut store, &question.id, true).unwrap();
        assert!(!disabled.is_selectable());
        retire_question(&mut store, &question.id).unwrap();
        assert!(retire_question(&mut store, &question.id).is_err());
    }

    #[test]
    fn cyclic_chains_are_detected() {
        let (mut store, _, mut question) = seeded();
        question.superseded_by = Some(question.id);
        store.persist(&question).unwrap();
        let err = current_version::<TemplateQuestion, _>(&store, &question.id).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
