use exam_engine::{
    Error, FormData, FormValue, Grading, TestOrchestrator, validation::validate_generated_exam,
};
use pretty_assertions::assert_eq;
use records::{
    EnrolledUser, MemoryStore, Question, Store, TemplateQuestion, TemplateQuestionsGroup,
    TemplateTest, TestTerm,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// One group choosing 2 of 3 single-choice questions, 5 points each.
fn single_choice_term() -> (MemoryStore, TestTerm) {
    let mut store = MemoryStore::new();
    let mut template = TemplateTest::new("Capitals".into(), None, None);
    template.grading = Some(json!({"1": 17, "2": 14, "3": 11, "4": 0}));
    store.persist(&template).unwrap();

    let group = TemplateQuestionsGroup::new(template.id, 1, 2, 5);
    store.persist(&group).unwrap();
    let pool = [
        ("Capital of France?", ["Lyon", "Paris", "Nice"], 1),
        ("Capital of Czechia?", ["Prague", "Brno", "Ostrava"], 0),
        ("Capital of Italy?", ["Milan", "Turin", "Rome"], 2),
    ];
    for (text, answers, correct) in pool {
        let question = TemplateQuestion::new(
            template.id,
            group.id,
            Some("single".into()),
            json!({"text": text, "answers": answers, "correct": correct}),
            text.into(),
        );
        store.persist(&question).unwrap();
    }

    let term = TestTerm::new(&template, None);
    store.persist(&term).unwrap();
    (store, term)
}

fn enroll(orchestrator: &mut TestOrchestrator<MemoryStore>, term: &TestTerm, seed: u32) -> EnrolledUser {
    let user = Uuid::new_v4();
    orchestrator.register(&term.id, &user).unwrap();
    orchestrator.enroll_with_seed(&term.id, &user, seed).unwrap()
}

fn form(answer: &Value) -> FormData {
    FormData::from([("answer".to_string(), FormValue::Text(answer.to_string()))])
}

#[test]
fn end_to_end_single_choice_exam() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let enrolled = enroll(&mut orchestrator, &term, 1234);

    let questions = orchestrator.questions_of(&enrolled.id).unwrap();
    assert_eq!(questions.len(), 2);
    assert_eq!(questions.iter().map(|q| q.ordering).collect::<Vec<_>>(), vec![1, 2]);
    assert!(questions.iter().all(|q| q.points == 5));
    assert_eq!(enrolled.max_score, Some(10));
    assert_ne!(questions[0].template_question_id, questions[1].template_question_id);
    validate_generated_exam(&orchestrator, &enrolled.id).unwrap();

    orchestrator.start_term(&term.id).unwrap();
    for question in &questions {
        let correct = orchestrator.load_question(question).unwrap().correct_answer();
        orchestrator.submit_answer(&question.id, &form(&correct), None).unwrap();
    }
    orchestrator.finish_term(&term.id).unwrap();

    let grading = orchestrator.term_grading(&term.id).unwrap();
    let result = orchestrator.exam_result(&enrolled.id, &grading).unwrap();
    assert_eq!(result.score, Some(10));
    assert_eq!(result.max_score, Some(10));
    assert_eq!(result.mark.as_deref(), Some("4"));
    assert_eq!(result.color, exam_engine::grading::FAIL_COLOR);
}

#[test]
fn same_seed_generates_identical_exams() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let first = enroll(&mut orchestrator, &term, 555);
    let second = enroll(&mut orchestrator, &term, 555);

    let data = |enrolled: &EnrolledUser| -> Vec<(Uuid, Value)> {
        orchestrator
            .questions_of(&enrolled.id)
            .unwrap()
            .into_iter()
            .map(|q| (q.template_question_id, q.data))
            .collect()
    };
    assert_eq!(data(&first), data(&second));
}

#[test]
fn only_the_last_answer_counts() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let enrolled = enroll(&mut orchestrator, &term, 8);
    orchestrator.start_term(&term.id).unwrap();

    let questions = orchestrator.questions_of(&enrolled.id).unwrap();
    for question in &questions {
        let correct = orchestrator.load_question(question).unwrap().correct_answer();
        let wrong = json!((correct.as_u64().unwrap() + 1) % 3);
        orchestrator.submit_answer(&question.id, &form(&correct), None).unwrap();
        orchestrator.submit_answer(&question.id, &form(&wrong), None).unwrap();
    }
    orchestrator.finish_term(&term.id).unwrap();

    let stored: EnrolledUser = orchestrator.store().fetch(&enrolled.id).unwrap();
    assert_eq!(stored.score, Some(0));
    let ungraded = Grading::new([("A", 3)]);
    let result = orchestrator.exam_result(&enrolled.id, &ungraded).unwrap();
    assert_eq!(result.mark, None);
}

#[test]
fn unanswered_enrollments_score_zero() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let enrolled = enroll(&mut orchestrator, &term, 3);
    orchestrator.start_term(&term.id).unwrap();
    orchestrator.finish_term(&term.id).unwrap();
    let stored: EnrolledUser = orchestrator.store().fetch(&enrolled.id).unwrap();
    assert_eq!(stored.score, Some(0));
}

#[test]
fn failed_evaluation_rolls_back_the_finish() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let enrolled = enroll(&mut orchestrator, &term, 21);
    orchestrator.start_term(&term.id).unwrap();

    let mut question: Question = orchestrator.questions_of(&enrolled.id).unwrap().remove(0);
    let correct = orchestrator.load_question(&question).unwrap().correct_answer();
    orchestrator.submit_answer(&question.id, &form(&correct), None).unwrap();
    question = orchestrator.store().fetch(&question.id).unwrap();
    question.question_type = "essay".into();
    orchestrator.store_mut().persist(&question).unwrap();

    let err = orchestrator.finish_term(&term.id).unwrap_err();
    assert!(matches!(err, Error::UnknownQuestionType(_)));
    assert_eq!(
        err.user_message(),
        "An internal error occurred, the operation was not completed."
    );
    let term: TestTerm = orchestrator.store().fetch(&term.id).unwrap();
    assert!(!term.is_finished());
    let stored: EnrolledUser = orchestrator.store().fetch(&enrolled.id).unwrap();
    assert_eq!(stored.score, None);
}

#[test]
fn duplicate_enrollment_is_rejected_by_the_store() {
    let (store, term) = single_choice_term();
    let mut orchestrator = TestOrchestrator::new(store);
    let enrolled = enroll(&mut orchestrator, &term, 1);
    let duplicate = EnrolledUser::new(term.id, enrolled.user_id, 2);
    let err = orchestrator.store_mut().persist(&duplicate).unwrap_err();
    assert!(matches!(err, records::StoreError::Conflict { .. }));
}

#[test]
fn retired_questions_are_never_drawn() {
    let (mut store, term) = single_choice_term();
    let pool: Vec<TemplateQuestion> = store.find_by(|_: &TemplateQuestion| true).unwrap();
    exam_engine::templates::retire_question(&mut store, &pool[2].id).unwrap();
    let live = [pool[0].id, pool[1].id];

    let mut orchestrator = TestOrchestrator::new(store);
    for seed in 0..10 {
        let enrolled = enroll(&mut orchestrator, &term, seed);
        for question in orchestrator.questions_of(&enrolled.id).unwrap() {
            assert!(live.contains(&question.template_question_id));
        }
    }
}
