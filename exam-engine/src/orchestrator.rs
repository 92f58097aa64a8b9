//! Exam lifecycle: enrollment, exam instantiation, answering and evaluation.
//!
//! Operations that write more than one record run inside a single store
//! transaction. A failed operation is logged with its full error and rolled
//! back, so callers only ever see complete state.
use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use records::{
    Answer, EnrolledUser, EnrollmentRegistration, LocalizedText, Question as ExamQuestion, Store,
    TemplateQuestion, TemplateQuestionsGroup, TermState, TestTerm,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::dynamic::{self, GeneratedQuestion, GeneratorLimits};
use crate::error::{Error, Result};
use crate::grading::Grading;
use crate::question::{FormData, Question, QuestionFactory};
use crate::random::Random;
use crate::templates;
use crate::validation;

/// Upper bound (inclusive) of enrollment seeds.
pub const MAX_SEED: u32 = 2_000_000_000;

/// Runs `f` inside a store transaction, rolling back on error.
pub fn transaction<S, T, F>(store: &mut S, operation: &str, f: F) -> Result<T>
where
    S: Store,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    let result = f(store);
    finish_transaction(store, operation, result)
}

fn finish_transaction<S: Store, T>(store: &mut S, operation: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(e) => {
            error!(operation, error = ?e, "operation failed, rolling back");
            if let Err(rollback) = store.rollback() {
                error!(operation, error = ?rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Score summary of one enrollment.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub score: Option<i64>,
    pub max_score: Option<i64>,
    pub mark: Option<String>,
    pub color: &'static str,
}

pub struct TestOrchestrator<S: Store> {
    store: S,
    factory: QuestionFactory,
    limits: GeneratorLimits,
}

impl<S: Store> TestOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self::with_factory(store, QuestionFactory::default(), GeneratorLimits::default())
    }

    pub fn with_factory(store: S, factory: QuestionFactory, limits: GeneratorLimits) -> Self {
        Self {
            store,
            factory,
            limits,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn factory(&self) -> &QuestionFactory {
        &self.factory
    }

    pub fn limits(&self) -> &GeneratorLimits {
        &self.limits
    }

    fn transactional<T>(&mut self, operation: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.store.begin()?;
        let result = f(self);
        finish_transaction(&mut self.store, operation, result)
    }

    /// Builds a question from template data. `None` type runs the dynamic generator.
    ///
    /// Works on any template question, retired ones included, so supervisors
    /// can preview what a given seed produces.
    pub fn instantiate_question_data(
        &self,
        question_type: Option<&str>,
        data: &Value,
        seed: u64,
    ) -> Result<GeneratedQuestion> {
        match question_type {
            Some(tag) => Ok(GeneratedQuestion {
                question_type: tag.to_string(),
                question: self.factory.instantiate(tag, data, seed)?,
            }),
            None => dynamic::generate(&self.factory, data, seed, &self.limits),
        }
    }

    /// Replays a generated question from its persisted data.
    pub fn load_question(&self, question: &ExamQuestion) -> Result<Box<dyn Question>> {
        self.factory.load(&question.question_type, &question.data)
    }

    pub fn questions_of(&self, enrolled_id: &Uuid) -> Result<Vec<ExamQuestion>> {
        let enrolled_id = *enrolled_id;
        let mut questions: Vec<ExamQuestion> = self
            .store
            .find_by(|q: &ExamQuestion| q.enrolled_user_id == enrolled_id)?;
        questions.sort_by_key(|q| q.ordering);
        Ok(questions)
    }

    /// Generates the exam of an enrollment and sets its maximal score.
    ///
    /// Does not open a transaction; run it inside one (as `enroll` does).
    #[instrument(skip_all, fields(enrolled = %enrolled.id, seed = enrolled.seed), err(Debug))]
    pub fn instantiate(&mut self, enrolled: &mut EnrolledUser) -> Result<()> {
        let enrolled_id = enrolled.id;
        let existing: Option<ExamQuestion> = self
            .store
            .find_one_by(|q: &ExamQuestion| q.enrolled_user_id == enrolled_id)?;
        if existing.is_some() {
            return Err(Error::StateConflict(
                "the exam of this enrollment was already generated".to_string(),
            ));
        }

        let term: TestTerm = self.store.fetch(&enrolled.term_id)?;
        let template_id = term.template_id;
        let mut groups: Vec<TemplateQuestionsGroup> = self.store.find_by(|g: &TemplateQuestionsGroup| {
            g.test_id == template_id && g.is_live()
        })?;
        groups.sort_by_key(|g| (g.ordering, g.created_at, g.id));

        let seed = u64::from(enrolled.seed);
        let mut random = Random::new(seed);
        let mut ordering = 0u32;
        let mut max_score = 0i64;

        for group in &groups {
            let group_id = group.id;
            let mut candidates: Vec<TemplateQuestion> = self.store.find_by(|q: &TemplateQuestion| {
                q.group_id == group_id && q.is_selectable()
            })?;
            candidates.sort_by_key(|q| (q.created_at, q.id));

            let selected = random
                .select_random_subset(&candidates, group.select_count as usize, &[], &[])
                .map_err(|e| e.context(format!("question group {}", group.ordering)))?;

            for (_, template) in selected {
                ordering += 1;
                let generated = self
                    .instantiate_question_data(
                        template.question_type.as_deref(),
                        &template.data,
                        seed + u64::from(ordering),
                    )
                    .map_err(|e| e.context(format!("template question {}", template.id)))?;
                let question = ExamQuestion {
                    id: Uuid::new_v4(),
                    enrolled_user_id: enrolled.id,
                    term_id: enrolled.term_id,
                    template_group_id: group.id,
                    template_question_id: template.id,
                    ordering,
                    points: group.points,
                    question_type: generated.question_type,
                    caption: template.caption.clone(),
                    data: generated.question.to_json(),
                    last_answer_id: None,
                };
                self.store.persist(&question)?;
                max_score += group.points;
            }
        }

        enrolled.max_score = Some(max_score);
        self.store.persist(enrolled)?;
        debug!(questions = ordering, max_score, "exam instantiated");
        Ok(())
    }

    /// Grades the last answer of every question of the term and stores the scores.
    ///
    /// Does not open a transaction; `finish_term` runs it inside one.
    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn evaluate(&mut self, term_id: &Uuid) -> Result<()> {
        let term_id = *term_id;
        let enrolled: Vec<EnrolledUser> = self
            .store
            .find_by(|e: &EnrolledUser| e.term_id == term_id)?;
        let mut scores: BTreeMap<Uuid, i64> = enrolled.iter().map(|e| (e.id, 0)).collect();

        let questions: Vec<ExamQuestion> = self
            .store
            .find_by(|q: &ExamQuestion| q.term_id == term_id)?;
        for question in &questions {
            let Some(answer_id) = question.last_answer_id else {
                continue;
            };
            let mut answer: Answer = self.store.fetch(&answer_id)?;
            let model = self.load_question(question)?;
            let correct = model.is_answer_correct(&answer.answer);
            let points = if correct { question.points } else { 0 };

            let now = Utc::now();
            answer.points = Some(points);
            answer.auto_points = Some(points);
            answer.correctness = Some(if correct { 1.0 } else { 0.0 });
            answer.evaluated_at = Some(now);
            answer.auto_evaluated_at = Some(now);
            self.store.persist(&answer)?;

            *scores.entry(question.enrolled_user_id).or_default() += points;
        }

        for mut enrollment in enrolled {
            enrollment.score = Some(scores.get(&enrollment.id).copied().unwrap_or_default());
            self.store.persist(&enrollment)?;
        }
        debug!(questions = questions.len(), "term evaluated");
        Ok(())
    }

    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn start_term(&mut self, term_id: &Uuid) -> Result<TestTerm> {
        let mut term: TestTerm = self.store.fetch(term_id)?;
        match term.state() {
            TermState::Scheduled => {}
            TermState::Archived => {
                return Err(Error::StateConflict("the term is archived".to_string()));
            }
            TermState::Started | TermState::Finished => {
                return Err(Error::StateConflict("the term was already started".to_string()));
            }
        }
        term.started_at = Some(Utc::now());
        self.store.persist(&term)?;
        info!("term started");
        Ok(term)
    }

    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn revoke_start(&mut self, term_id: &Uuid) -> Result<TestTerm> {
        let mut term: TestTerm = self.store.fetch(term_id)?;
        if term.state() != TermState::Started {
            return Err(Error::StateConflict(
                "only a running term can be returned to scheduled".to_string(),
            ));
        }
        term.started_at = None;
        self.store.persist(&term)?;
        info!("term start revoked");
        Ok(term)
    }

    /// Ends a running term and evaluates it, atomically.
    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn finish_term(&mut self, term_id: &Uuid) -> Result<TestTerm> {
        let mut term: TestTerm = self.store.fetch(term_id)?;
        if term.state() != TermState::Started {
            return Err(Error::StateConflict(
                "only a running term can be finished".to_string(),
            ));
        }
        self.transactional("finish term", |this| {
            this.evaluate(&term.id)?;
            term.finished_at = Some(Utc::now());
            this.store.persist(&term)?;
            Ok(())
        })?;
        info!("term finished");
        Ok(term)
    }

    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn revoke_finish(&mut self, term_id: &Uuid) -> Result<TestTerm> {
        let mut term: TestTerm = self.store.fetch(term_id)?;
        if term.state() != TermState::Finished {
            return Err(Error::StateConflict(
                "only a finished term can be reopened".to_string(),
            ));
        }
        term.finished_at = None;
        self.store.persist(&term)?;
        info!("term finish revoked");
        Ok(term)
    }

    #[instrument(skip_all, fields(term = %term_id), err(Debug))]
    pub fn archive_term(&mut self, term_id: &Uuid) -> Result<TestTerm> {
        let mut term: TestTerm = self.store.fetch(term_id)?;
        if term.state() != TermState::Finished {
            return Err(Error::StateConflict(
                "only a finished term can be archived".to_string(),
            ));
        }
        term.archived_at = Some(Utc::now());
        self.store.persist(&term)?;
        info!("term archived");
        Ok(term)
    }

    fn enrollment_of(&self, term_id: Uuid, user_id: Uuid) -> Result<Option<EnrolledUser>> {
        Ok(self
            .store
            .find_one_by(|e: &EnrolledUser| e.term_id == term_id && e.user_id == user_id)?)
    }

    fn registration_of(&self, term_id: Uuid, user_id: Uuid) -> Result<Option<EnrollmentRegistration>> {
        Ok(self.store.find_one_by(|r: &EnrollmentRegistration| {
            r.term_id == term_id && r.user_id == user_id
        })?)
    }

    /// Registers a user for a term. Registering twice returns the first registration.
    #[instrument(skip_all, fields(term = %term_id, user = %user_id), err(Debug))]
    pub fn register(&mut self, term_id: &Uuid, user_id: &Uuid) -> Result<EnrollmentRegistration> {
        let term: TestTerm = self.store.fetch(term_id)?;
        if term.is_archived() {
            return Err(Error::StateConflict("the term is archived".to_string()));
        }
        if self.enrollment_of(*term_id, *user_id)?.is_some() {
            return Err(Error::StateConflict(
                "the user is already enrolled in the term".to_string(),
            ));
        }
        if let Some(registration) = self.registration_of(*term_id, *user_id)? {
            return Ok(registration);
        }
        let registration = EnrollmentRegistration::new(*term_id, *user_id);
        self.store.persist(&registration)?;
        debug!("user registered");
        Ok(registration)
    }

    /// Enrolls a registered user with a fresh random seed.
    pub fn enroll(&mut self, term_id: &Uuid, user_id: &Uuid) -> Result<EnrolledUser> {
        let seed = rand::rng().random_range(0..=MAX_SEED);
        self.enroll_with_seed(term_id, user_id, seed)
    }

    /// Turns a registration into an enrollment and generates the exam, atomically.
    /// An existing enrollment is returned unchanged.
    #[instrument(skip_all, fields(term = %term_id, user = %user_id, seed = seed), err(Debug))]
    pub fn enroll_with_seed(&mut self, term_id: &Uuid, user_id: &Uuid, seed: u32) -> Result<EnrolledUser> {
        if let Some(enrolled) = self.enrollment_of(*term_id, *user_id)? {
            return Ok(enrolled);
        }
        let term: TestTerm = self.store.fetch(term_id)?;
        if term.is_archived() {
            return Err(Error::StateConflict("the term is archived".to_string()));
        }
        let Some(registration) = self.registration_of(*term_id, *user_id)? else {
            return Err(Error::StateConflict(
                "the user is not registered for the term".to_string(),
            ));
        };

        let mut enrolled = EnrolledUser::new(*term_id, *user_id, seed);
        self.transactional("enroll", |this| {
            this.store.persist(&enrolled)?;
            this.store.remove::<EnrollmentRegistration>(&registration.id)?;
            this.instantiate(&mut enrolled)
        })?;
        info!(enrolled = %enrolled.id, "user enrolled");
        Ok(enrolled)
    }

    /// Removes an enrollment with its exam and answers; the user becomes registered again.
    #[instrument(skip_all, fields(enrolled = %enrolled_id), err(Debug))]
    pub fn delete_enrollment(&mut self, enrolled_id: &Uuid) -> Result<EnrollmentRegistration> {
        let enrolled: EnrolledUser = self.store.fetch(enrolled_id)?;
        let term: TestTerm = self.store.fetch(&enrolled.term_id)?;
        if term.is_archived() {
            return Err(Error::StateConflict("the term is archived".to_string()));
        }
        let questions = self.questions_of(enrolled_id)?;
        let registration = self.transactional("delete enrollment", |this| {
            for question in &questions {
                let question_id = question.id;
                let answers: Vec<Answer> = this
                    .store
                    .find_by(|a: &Answer| a.question_id == question_id)?;
                for answer in answers {
                    this.store.remove::<Answer>(&answer.id)?;
                }
                this.store.remove::<ExamQuestion>(&question.id)?;
            }
            this.store.remove::<EnrolledUser>(&enrolled.id)?;
            let registration = EnrollmentRegistration::new(enrolled.term_id, enrolled.user_id);
            this.store.persist(&registration)?;
            Ok(registration)
        })?;
        info!("enrollment deleted");
        Ok(registration)
    }

    pub fn set_locked(&mut self, enrolled_id: &Uuid, locked: bool) -> Result<EnrolledUser> {
        let mut enrolled: EnrolledUser = self.store.fetch(enrolled_id)?;
        enrolled.locked = locked;
        self.store.persist(&enrolled)?;
        debug!(enrolled = %enrolled_id, locked, "enrollment lock changed");
        Ok(enrolled)
    }

    /// Records a student's answer from the submitted form fields.
    #[instrument(skip_all, fields(question = %question_id), err(Debug))]
    pub fn submit_answer(
        &mut self,
        question_id: &Uuid,
        form: &FormData,
        ip_address: Option<String>,
    ) -> Result<Answer> {
        let mut question: ExamQuestion = self.store.fetch(question_id)?;
        let enrolled: EnrolledUser = self.store.fetch(&question.enrolled_user_id)?;
        if enrolled.locked {
            return Err(Error::StateConflict("the enrollment is locked".to_string()));
        }
        let term: TestTerm = self.store.fetch(&question.term_id)?;
        if term.state() != TermState::Started {
            return Err(Error::StateConflict(
                "answers are only accepted while the term is running".to_string(),
            ));
        }

        let model = self.load_question(&question)?;
        let submitted = model.process_answer_submit(form);
        if submitted.is_null() || !model.is_answer_valid(&submitted) {
            return Err(Error::Validation("the submitted answer is not valid".to_string()));
        }

        let answer = Answer::new(question.id, submitted, ip_address);
        self.transactional("submit answer", |this| {
            this.store.persist(&answer)?;
            question.last_answer_id = Some(answer.id);
            this.store.persist(&question)?;
            Ok(())
        })?;
        debug!(answer = %answer.id, "answer submitted");
        Ok(answer)
    }

    /// Replaces the awarded points of an answer and refreshes the owner's score.
    #[instrument(skip_all, fields(answer = %answer_id, points = points), err(Debug))]
    pub fn override_points(
        &mut self,
        answer_id: &Uuid,
        points: i64,
        public_comment: Option<String>,
        private_comment: Option<String>,
    ) -> Result<Answer> {
        let mut answer: Answer = self.store.fetch(answer_id)?;
        let question: ExamQuestion = self.store.fetch(&answer.question_id)?;
        if !(0..=question.points).contains(&points) {
            return Err(Error::Validation(format!(
                "points must lie between 0 and {}",
                question.points
            )));
        }
        answer.points = Some(points);
        answer.evaluated_at = Some(Utc::now());
        answer.public_comment = public_comment;
        answer.private_comment = private_comment;

        self.transactional("override points", |this| {
            this.store.persist(&answer)?;
            this.recompute_score(&question.enrolled_user_id)
        })?;
        Ok(answer)
    }

    /// Sums the points of the last answers of an enrollment into its score.
    pub fn recompute_score(&mut self, enrolled_id: &Uuid) -> Result<i64> {
        let mut enrolled: EnrolledUser = self.store.fetch(enrolled_id)?;
        let mut score = 0;
        for question in self.questions_of(enrolled_id)? {
            if let Some(answer_id) = question.last_answer_id {
                let answer: Answer = self.store.fetch(&answer_id)?;
                score += answer.points.unwrap_or_default();
            }
        }
        enrolled.score = Some(score);
        self.store.persist(&enrolled)?;
        Ok(score)
    }

    /// Grading scale of a term; a term without one grades nothing.
    pub fn term_grading(&self, term_id: &Uuid) -> Result<Grading> {
        let term: TestTerm = self.store.fetch(term_id)?;
        match &term.grading {
            Some(grading) => Grading::from_json(grading),
            None => Ok(Grading::default()),
        }
    }

    pub fn exam_result(&self, enrolled_id: &Uuid, grading: &Grading) -> Result<ExamResult> {
        let enrolled: EnrolledUser = self.store.fetch(enrolled_id)?;
        let points = enrolled.score.unwrap_or_default();
        Ok(ExamResult {
            score: enrolled.score,
            max_score: enrolled.max_score,
            mark: enrolled
                .score
                .and_then(|score| grading.get_grade(score))
                .map(str::to_string),
            color: grading.get_grade_color(points),
        })
    }

    /// New version of a question group; live questions move to it.
    pub fn replace_group(&mut self, group_id: &Uuid, select_count: u32, points: i64) -> Result<TemplateQuestionsGroup> {
        if points < 0 {
            return Err(Error::Validation("group points must not be negative".to_string()));
        }
        templates::replace_group(&mut self.store, group_id, select_count, points)
    }

    /// New version of a template question. The new data must instantiate.
    pub fn replace_question(
        &mut self,
        question_id: &Uuid,
        question_type: Option<String>,
        data: Value,
        caption: LocalizedText,
    ) -> Result<TemplateQuestion> {
        let question_type = question_type.filter(|t| !t.is_empty());
        validation::probe_template_question(self, question_type.as_deref(), &data)?;
        templates::replace_question(&mut self.store, question_id, question_type, data, caption)
    }

    pub fn retire_question(&mut self, question_id: &Uuid) -> Result<TemplateQuestion> {
        templates::retire_question(&mut self.store, question_id)
    }

    pub fn disable_question(&mut self, question_id: &Uuid, disabled: bool) -> Result<TemplateQuestion> {
        templates::disable_question(&mut self.store, question_id, disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::FormValue;
    use pretty_assertions::assert_eq;
    use records::{MemoryStore, TemplateTest};
    use serde_json::json;

    struct Fixture {
        orchestrator: TestOrchestrator<MemoryStore>,
        term: TestTerm,
        user: Uuid,
    }

    fn fixture() -> Fixture {
        let mut store = MemoryStore::new();
        let mut template = TemplateTest::new("Arithmetic".into(), None, None);
        template.grading = Some(json!({"1": 9, "2": 6, "3": 3, "4": 0}));
        store.persist(&template).unwrap();

        let group = TemplateQuestionsGroup::new(template.id, 1, 1, 5);
        store.persist(&group).unwrap();
        let question = TemplateQuestion::new(
            template.id,
            group.id,
            Some("numeric".into()),
            json!({"text": "2 + 2", "correct": 4}),
            "Sum".into(),
        );
        store.persist(&question).unwrap();
        let dynamic = TemplateQuestionsGroup::new(template.id, 2, 1, 5);
        store.persist(&dynamic).unwrap();
        let generator = TemplateQuestion::new(
            template.id,
            dynamic.id,
            None,
            json!({"code": "let a = random(1, 5); let q = init(\"numeric\"); setText(\"Echo \" + a); q.setCorrect(a);"}),
            "Echo".into(),
        );
        store.persist(&generator).unwrap();

        let term = TestTerm::new(&template, None);
        store.persist(&term).unwrap();
        Fixture {
            orchestrator: TestOrchestrator::new(store),
            term,
            user: Uuid::new_v4(),
        }
    }

    fn answer_form(value: &str) -> FormData {
        FormData::from([("answer".to_string(), FormValue::List(vec![value.to_string()]))])
    }

    #[test]
    fn enrollment_requires_registration() {
        let Fixture { mut orchestrator, term, user } = fixture();
        let err = orchestrator.enroll(&term.id, &user).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        orchestrator.register(&term.id, &user).unwrap();
        let enrolled = orchestrator.enroll(&term.id, &user).unwrap();
        assert!(enrolled.seed <= MAX_SEED);
        assert_eq!(enrolled.max_score, Some(10));
        assert_eq!(orchestrator.store().count::<EnrollmentRegistration>(), 0);

        let again = orchestrator.enroll(&term.id, &user).unwrap();
        assert_eq!(again.id, enrolled.id);
        assert_eq!(orchestrator.questions_of(&enrolled.id).unwrap().len(), 2);
    }

    #[test]
    fn failed_generation_leaves_nothing_behind() {
        let Fixture { mut orchestrator, term, user } = fixture();
        let broken = TemplateQuestionsGroup::new(term.template_id, 3, 1, 1);
        orchestrator.store_mut().persist(&broken).unwrap();
        let question = TemplateQuestion::new(
            term.template_id,
            broken.id,
            None,
            json!({"code": "setText(\"never initialized\");"}),
            "Broken".into(),
        );
        orchestrator.store_mut().persist(&question).unwrap();

        orchestrator.register(&term.id, &user).unwrap();
        let err = orchestrator.enroll_with_seed(&term.id, &user, 1).unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        let store = orchestrator.store();
        assert!(!store.in_transaction());
        assert_eq!(store.count::<EnrolledUser>(), 0);
        assert_eq!(store.count::<ExamQuestion>(), 0);
        assert_eq!(store.count::<EnrollmentRegistration>(), 1);
    }

    #[test]
    fn lifecycle_transitions_are_guarded() {
        let Fixture { mut orchestrator, term, .. } = fixture();
        assert!(orchestrator.finish_term(&term.id).is_err());
        assert!(orchestrator.revoke_start(&term.id).is_err());
        orchestrator.start_term(&term.id).unwrap();
        assert!(orchestrator.start_term(&term.id).is_err());
        orchestrator.revoke_start(&term.id).unwrap();
        orchestrator.start_term(&term.id).unwrap();
        assert!(orchestrator.archive_term(&term.id).is_err());
        orchestrator.finish_term(&term.id).unwrap();
        assert!(orchestrator.finish_term(&term.id).is_err());
        orchestrator.revoke_finish(&term.id).unwrap();
        orchestrator.finish_term(&term.id).unwrap();
        let archived = orchestrator.archive_term(&term.id).unwrap();
        assert!(archived.is_archived());
        assert!(orchestrator.revoke_finish(&term.id).is_err());
        assert!(orchestrator.start_term(&term.id).is_err());
    }

    #[test]
    fn answers_only_while_running_and_unlocked() {
        let Fixture { mut orchestrator, term, user } = fixture();
        orchestrator.register(&term.id, &user).unwrap();
        let enrolled = orchestrator.enroll_with_seed(&term.id, &user, 42).unwrap();
        let first = orchestrator.questions_of(&enrolled.id).unwrap().remove(0);

        let err = orchestrator.submit_answer(&first.id, &answer_form("4"), None).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        orchestrator.start_term(&term.id).unwrap();
        let err = orchestrator.submit_answer(&first.id, &answer_form("four"), None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        orchestrator.set_locked(&enrolled.id, true).unwrap();
        assert!(orchestrator.submit_answer(&first.id, &answer_form("4"), None).is_err());
        orchestrator.set_locked(&enrolled.id, false).unwrap();

        let answer = orchestrator
            .submit_answer(&first.id, &answer_form("4"), Some("10.0.0.1".into()))
            .unwrap();
        let stored: ExamQuestion = orchestrator.store().fetch(&first.id).unwrap();
        assert_eq!(stored.last_answer_id, Some(answer.id));
        assert_eq!(answer.ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn evaluation_and_manual_override() {
        let Fixture { mut orchestrator, term, user } = fixture();
        orchestrator.register(&term.id, &user).unwrap();
        let enrolled = orchestrator.enroll_with_seed(&term.id, &user, 7).unwrap();
        orchestrator.start_term(&term.id).unwrap();

        let mut last = None;
        for question in orchestrator.questions_of(&enrolled.id).unwrap() {
            let model = orchestrator.load_question(&question).unwrap();
            let correct = model.correct_answer()[0].as_i64().unwrap();
            // the second answer is off by one
            let value = if question.ordering == 1 { correct } else { correct + 1 };
            last = Some(
                orchestrator
                    .submit_answer(&question.id, &answer_form(&value.to_string()), None)
                    .unwrap(),
            );
        }
        orchestrator.finish_term(&term.id).unwrap();

        let grading = orchestrator.term_grading(&term.id).unwrap();
        let result = orchestrator.exam_result(&enrolled.id, &grading).unwrap();
        assert_eq!(result.score, Some(5));
        assert_eq!(result.mark.as_deref(), Some("3"));

        let wrong = last.unwrap();
        assert!(orchestrator.override_points(&wrong.id, 6, None, None).is_err());
        let overridden = orchestrator
            .override_points(&wrong.id, 4, Some("almost".into()), None)
            .unwrap();
        assert_eq!(overridden.auto_points, Some(0));
        assert_eq!(overridden.points, Some(4));
        let result = orchestrator.exam_result(&enrolled.id, &grading).unwrap();
        assert_eq!(result.score, Some(9));
        assert_eq!(result.mark.as_deref(), Some("1"));
    }

    #[test]
    fn deleting_an_enrollment_restores_the_registration() {
        let Fixture { mut orchestrator, term, user } = fixture();
        orchestrator.register(&term.id, &user).unwrap();
        let enrolled = orchestrator.enroll(&term.id, &user).unwrap();
        assert!(orchestrator.register(&term.id, &user).is_err());

        let registration = orchestrator.delete_enrollment(&enrolled.id).unwrap();
        assert_eq!(registration.user_id, user);
        let store = orchestrator.store();
        assert_eq!(store.count::<EnrolledUser>(), 0);
        assert_eq!(store.count::<ExamQuestion>(), 0);
        assert_eq!(store.count::<EnrollmentRegistration>(), 1);
    }

    #[test]
    fn instantiating_twice_is_a_conflict() {
        let Fixture { mut orchestrator, term, user } = fixture();
        orchestrator.register(&term.id, &user).unwrap();
        let mut enrolled = orchestrator.enroll(&term.id, &user).unwrap();
        let err = orchestrator.instantiate(&mut enrolled).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }
}
