//! Dynamically generated questions.
//!
//! A dynamic template carries a small program instead of a fixed question
//! type. The program may only call the functions in [`FUNCTIONS`] and the
//! question builder methods in [`METHODS`]; nothing else is reachable from it.
//!
//! ```text
//! let a = random(2, 9);
//! let b = random(2, 9);
//! let q = init("numeric");
//! setText("Compute " + str(a) + " * " + str(b), "en");
//! setText("Spočítejte " + str(a) + " * " + str(b), "cs");
//! q.setCorrect(a * b);
//! ```
use std::collections::HashSet;

use records::LocalizedText;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::question::{Question, QuestionFactory, parse_data};

mod interpreter;
mod lexer;
mod parser;
mod text;

use interpreter::Interpreter;
use parser::{Expr, Program, Stmt, StmtKind};
pub use text::TextBuffer;

/// Functions a generator may call.
pub const FUNCTIONS: &[&str] = &[
    "init",
    "setText",
    "appendText",
    "replaceText",
    "random",
    "shuffle",
    "len",
    "str",
    "hex",
    "bin",
    "abs",
    "min",
    "max",
];

/// Builder methods a generator may call on the question handle.
pub const METHODS: &[&str] = &[
    "addAnswer",
    "setAnswers",
    "setCorrect",
    "setLimits",
    "addItem",
    "setCorrectInOrder",
    "setRadix",
];

/// Bounds on a single generator run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratorLimits {
    /// Evaluated statements and expressions.
    pub max_operations: u64,
    /// Bytes of source code, question text and any single string or list.
    pub max_text_len: usize,
}

impl Default for GeneratorLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_text_len: 64 * 1024,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DynamicData {
    code: String,
    #[serde(default)]
    text: Option<LocalizedText>,
}

#[derive(Debug)]
pub struct GeneratedQuestion {
    pub question_type: String,
    pub question: Box<dyn Question>,
}

/// Parses the code and rejects anything outside the whitelist.
pub fn validate_code(code: &str, limits: &GeneratorLimits) -> Result<()> {
    check_program(code, limits).map(|_| ())
}

fn check_program(code: &str, limits: &GeneratorLimits) -> Result<Program> {
    if code.len() > limits.max_text_len {
        return Err(Error::Generation(format!(
            "generator code exceeds {} bytes",
            limits.max_text_len
        )));
    }
    let program = parser::parse(code)?;
    let mut declared = HashSet::new();
    check_block(&program, &mut declared)?;
    Ok(program)
}

fn check_block(block: &[Stmt], declared: &mut HashSet<String>) -> Result<()> {
    for stmt in block {
        let fail = |msg: String| Error::Generation(format!("line {}: {msg}", stmt.line));
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                check_expr(expr, declared).map_err(fail)?;
                declared.insert(name.clone());
            }
            StmtKind::Assign(name, expr) => {
                if !declared.contains(name) {
                    return Err(fail(format!("assignment to undeclared variable '{name}'")));
                }
                check_expr(expr, declared).map_err(fail)?;
            }
            StmtKind::Expr(expr) => check_expr(expr, declared).map_err(fail)?,
            StmtKind::If(condition, then, otherwise) => {
                check_expr(condition, declared).map_err(fail)?;
                check_block(then, declared)?;
                check_block(otherwise, declared)?;
            }
            StmtKind::For(name, from, to, body) => {
                check_expr(from, declared).map_err(fail)?;
                check_expr(to, declared).map_err(fail)?;
                declared.insert(name.clone());
                check_block(body, declared)?;
            }
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, declared: &HashSet<String>) -> std::result::Result<(), String> {
    match expr {
        Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => Ok(()),
        Expr::Var(name) if declared.contains(name) => Ok(()),
        Expr::Var(name) => Err(format!("undefined variable '{name}'")),
        Expr::List(items) => items.iter().try_for_each(|e| check_expr(e, declared)),
        Expr::Map(entries) => entries.iter().try_for_each(|(_, e)| check_expr(e, declared)),
        Expr::Index(target, index) => {
            check_expr(target, declared)?;
            check_expr(index, declared)
        }
        Expr::Unary(_, operand) => check_expr(operand, declared),
        Expr::Binary(_, left, right) => {
            check_expr(left, declared)?;
            check_expr(right, declared)
        }
        Expr::Call(name, args) => {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(format!("function '{name}' is not allowed"));
            }
            args.iter().try_for_each(|e| check_expr(e, declared))
        }
        Expr::Method(target, method, args) => {
            if !METHODS.contains(&method.as_str()) {
                return Err(format!("method '{method}' is not allowed"));
            }
            check_expr(target, declared)?;
            args.iter().try_for_each(|e| check_expr(e, declared))
        }
    }
}

/// Runs the generator of a dynamic template for the seed.
///
/// The built question is serialized and loaded back, so whatever is returned
/// is exactly what a later `load` of the persisted data produces.
#[instrument(skip_all, fields(seed = seed), err(Debug))]
pub fn generate(
    factory: &QuestionFactory,
    data: &Value,
    seed: u64,
    limits: &GeneratorLimits,
) -> Result<GeneratedQuestion> {
    let data: DynamicData = parse_data(data, "invalid dynamic question template")?;
    let program = check_program(&data.code, limits)?;

    let buffer = TextBuffer::new(data.text.as_ref(), limits.max_text_len);
    let mut interpreter = Interpreter::new(factory, limits, seed, buffer);
    interpreter.run(&program)?;

    let (Some(question_type), Some(mut question)) =
        (interpreter.question_type.take(), interpreter.question.take())
    else {
        return Err(Error::Generation(
            "the generator did not initialize the question".to_string(),
        ));
    };
    question.set_text(interpreter.text.to_localized()?);

    let question = factory
        .load(&question_type, &question.to_json())
        .map_err(|e| Error::Generation(format!("the generated question is not valid: {e}")))?;
    debug!(question_type = %question_type, "dynamic question generated");
    Ok(GeneratedQuestion {
        question_type,
        question,
    })
}
