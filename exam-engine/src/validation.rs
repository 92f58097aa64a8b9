use std::collections::HashSet;

use records::{
    EnrolledUser, Question as ExamQuestion, Store, TemplateQuestion, TemplateQuestionsGroup,
    TemplateTest,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::dynamic::validate_code;
use crate::error::{Error, Result};
use crate::orchestrator::TestOrchestrator;

/// Seed used to check that template data instantiates at all.
pub const PROBE_SEED: u64 = 0;

/// Instantiates template data once, discarding the result.
pub fn probe_template_question<S: Store>(
    orchestrator: &TestOrchestrator<S>,
    question_type: Option<&str>,
    data: &Value,
) -> Result<()> {
    if question_type.is_none() {
        let code = data.get("code").and_then(Value::as_str).ok_or_else(|| {
            Error::Validation("dynamic question data has no code".to_string())
        })?;
        validate_code(code, orchestrator.limits())?;
    }
    orchestrator
        .instantiate_question_data(question_type, data, PROBE_SEED)
        .map(|_| ())
}

/// Checks that every exam drawn from the template test can be generated.
///
/// - at least one live group, with distinct orderings
/// - non-negative points
/// - enough selectable questions for `select_count`
/// - every selectable question instantiates
pub fn validate_template_test<S: Store>(
    orchestrator: &TestOrchestrator<S>,
    test_id: &Uuid,
) -> Result<()> {
    let store = orchestrator.store();
    let test: TemplateTest = store.fetch(test_id)?;
    let test_id = test.id;
    let mut groups: Vec<TemplateQuestionsGroup> =
        store.find_by(|g: &TemplateQuestionsGroup| g.test_id == test_id && g.is_live())?;
    if groups.is_empty() {
        return Err(Error::Validation(format!(
            "template test {test_id} has no question groups"
        )));
    }
    groups.sort_by_key(|g| g.ordering);

    let mut orderings = HashSet::new();
    for group in &groups {
        if !orderings.insert(group.ordering) {
            return Err(Error::Validation(format!(
                "question group ordering {} is used twice",
                group.ordering
            )));
        }
        if group.points < 0 {
            return Err(Error::Validation(format!(
                "question group {} has negative points",
                group.ordering
            )));
        }

        let group_id = group.id;
        let questions: Vec<TemplateQuestion> =
            store.find_by(|q: &TemplateQuestion| q.group_id == group_id && q.is_selectable())?;
        if questions.len() < group.select_count as usize {
            return Err(Error::InvalidConfig(format!(
                "question group {} selects {} questions, but only {} are available",
                group.ordering,
                group.select_count,
                questions.len()
            )));
        }
        for question in &questions {
            probe_template_question(orchestrator, question.question_type.as_deref(), &question.data)
                .map_err(|e| e.context(format!("template question {}", question.id)))?;
        }
    }
    debug!(test = %test_id, groups = groups.len(), "template test is valid");
    Ok(())
}

/// Checks a generated exam against the templates it was drawn from.
pub fn validate_generated_exam<S: Store>(
    orchestrator: &TestOrchestrator<S>,
    enrolled_id: &Uuid,
) -> Result<()> {
    let store = orchestrator.store();
    let enrolled: EnrolledUser = store.fetch(enrolled_id)?;
    let questions: Vec<ExamQuestion> = orchestrator.questions_of(enrolled_id)?;

    let mut template_ids = vec![];
    let mut total = 0;
    for (idx, question) in questions.iter().enumerate() {
        if question.ordering as usize != idx + 1 {
            return Err(Error::Generation(format!(
                "question {} has ordering {}, expected {}",
                question.id,
                question.ordering,
                idx + 1
            )));
        }
        if template_ids.contains(&question.template_question_id) {
            return Err(Error::Generation(format!(
                "question {} duplicates template question {}",
                question.id, question.template_question_id
            )));
        }
        template_ids.push(question.template_question_id);

        let group: TemplateQuestionsGroup = store.fetch(&question.template_group_id)?;
        if group.points != question.points {
            return Err(Error::Generation(format!(
                "question {} is worth {} points, its group {}",
                question.id, question.points, group.points
            )));
        }
        orchestrator
            .load_question(question)
            .map_err(|e| Error::Generation(format!("question {} cannot be replayed: {e}", question.id)))?;
        total += question.points;
    }

    if enrolled.max_score != Some(total) {
        return Err(Error::Generation(format!(
            "max score {:?} does not match the sum of question points {total}",
            enrolled.max_score
        )));
    }
    Ok(())
}
