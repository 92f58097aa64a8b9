use anyhow::Context;
use chrono::Utc;
use exam_engine::validation::{validate_generated_exam, validate_template_test};
use exam_engine::{
    ExamResult, FormData, FormValue, GeneratorLimits, Grading, QuestionFactory, Random,
    TestOrchestrator,
};
use records::{MemoryStore, Store, TestTerm};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bundle::Bundle;
use crate::render::TextRenderer;

fn orchestrator(store: MemoryStore, limits: GeneratorLimits) -> TestOrchestrator<MemoryStore> {
    TestOrchestrator::with_factory(store, QuestionFactory::default(), limits)
}

/// Form fields that submit `answer` the way a student's browser would.
pub fn answer_form(question_type: &str, answer: &Value) -> FormData {
    let value = match (question_type, answer) {
        ("order", Value::Array(items)) => FormValue::Text(
            items
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        (_, Value::Array(items)) => FormValue::List(items.iter().map(Value::to_string).collect()),
        (_, other) => FormValue::Text(other.to_string()),
    };
    FormData::from([("answer".to_string(), value)])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub question_type: String,
    pub form: String,
    pub result: String,
    pub correct_answer: Value,
    pub data: Value,
}

/// Instantiates one template question of the bundle for a seed.
pub fn preview(
    bundle: &Bundle,
    group: usize,
    question: usize,
    seed: u64,
    locale: &str,
    limits: GeneratorLimits,
) -> anyhow::Result<Preview> {
    let template = bundle.question(group, question)?;
    let orchestrator = orchestrator(MemoryStore::new(), limits);
    let generated = orchestrator.instantiate_question_data(
        template.question_type.as_deref(),
        &template.data,
        seed,
    )?;
    let question = generated.question;
    let correct_answer = question.correct_answer();
    Ok(Preview {
        form: question.render_form_content(&TextRenderer, locale, None)?,
        result: question.render_result_content(
            &TextRenderer,
            locale,
            Some(&correct_answer),
            Some(true),
        )?,
        correct_answer,
        data: question.to_json(),
        question_type: generated.question_type,
    })
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub groups: usize,
    pub questions: usize,
    pub max_score: i64,
}

/// Validates every group and question of the bundle.
pub fn check(bundle: &Bundle, limits: GeneratorLimits) -> anyhow::Result<CheckReport> {
    if let Some(grading) = &bundle.grading {
        Grading::from_json(grading).context("invalid grading scale")?;
    }
    let (store, test) = bundle.to_store()?;
    let orchestrator = orchestrator(store, limits);
    validate_template_test(&orchestrator, &test.id)?;

    Ok(CheckReport {
        groups: bundle.groups.len(),
        questions: bundle.groups.iter().map(|g| g.questions.len()).sum(),
        max_score: bundle
            .groups
            .iter()
            .map(|g| i64::from(g.select_count) * g.points)
            .sum(),
    })
}

#[derive(Clone, Copy, Debug)]
pub struct SimulateOptions {
    pub students: usize,
    /// Base enrollment seed; random seeds when missing.
    pub seed: Option<u32>,
    /// Chance (0-100) that a simulated student answers a question correctly.
    pub correct_percent: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student: usize,
    pub seed: u32,
    #[serde(flatten)]
    pub result: ExamResult,
}

/// Runs a whole term of the bundle: enrollment, answering and evaluation.
pub fn simulate(
    bundle: &Bundle,
    options: SimulateOptions,
    limits: GeneratorLimits,
) -> anyhow::Result<Vec<StudentResult>> {
    let (mut store, test) = bundle.to_store()?;
    let term = TestTerm::new(&test, Some(Utc::now()));
    store.persist(&term)?;
    let mut orchestrator = orchestrator(store, limits);

    let mut enrollments = Vec::with_capacity(options.students);
    for student in 0..options.students {
        let user = Uuid::new_v4();
        orchestrator.register(&term.id, &user)?;
        let enrolled = match options.seed {
            Some(seed) => {
                orchestrator.enroll_with_seed(&term.id, &user, seed.wrapping_add(student as u32))?
            }
            None => orchestrator.enroll(&term.id, &user)?,
        };
        validate_generated_exam(&orchestrator, &enrolled.id)
            .with_context(|| format!("exam of student {student} is inconsistent"))?;
        enrollments.push(enrolled);
    }

    orchestrator.start_term(&term.id)?;
    for enrolled in &enrollments {
        let mut random = Random::new(u64::from(enrolled.seed));
        for question in orchestrator.questions_of(&enrolled.id)? {
            if random.range(0, 99)? >= i64::from(options.correct_percent) {
                continue;
            }
            let correct = orchestrator.load_question(&question)?.correct_answer();
            let form = answer_form(&question.question_type, &correct);
            orchestrator.submit_answer(&question.id, &form, None)?;
        }
        debug!(enrolled = %enrolled.id, "answers submitted");
    }
    orchestrator.finish_term(&term.id)?;

    let grading = orchestrator.term_grading(&term.id)?;
    let mut results = Vec::with_capacity(enrollments.len());
    for (student, enrolled) in enrollments.iter().enumerate() {
        results.push(StudentResult {
            student: student + 1,
            seed: enrolled.seed,
            result: orchestrator.exam_result(&enrolled.id, &grading)?,
        });
    }
    info!(students = results.len(), "simulation finished");
    Ok(results)
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub mark: Option<String>,
    pub color: &'static str,
    /// Points range of every mark, best first.
    pub ranges: Vec<(String, i64, Option<i64>)>,
}

pub fn grade(grading: &str, points: i64) -> anyhow::Result<GradeReport> {
    let grading: Value = serde_json::from_str(grading).context("grading is not valid JSON")?;
    let grading = Grading::from_json(&grading)?;
    let ranges = grading
        .marks()
        .filter_map(|mark| {
            grading
                .mark_range(mark)
                .map(|(min, max)| (mark.to_string(), min, max))
        })
        .collect();
    Ok(GradeReport {
        mark: grading.get_grade(points).map(str::to_string),
        color: grading.get_grade_color(points),
        ranges,
    })
}
