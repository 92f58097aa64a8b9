use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::{Value, json};

use super::parser::{BinaryOp, Expr, Program, Stmt, StmtKind, UnaryOp};
use super::text::TextBuffer;
use super::{FUNCTIONS, GeneratorLimits, METHODS};
use crate::error::{Error, Result};
use crate::question::{Question, QuestionFactory, format_number};
use crate::random::Random;

/// Lists and maps nested deeper than this are rejected.
const MAX_VALUE_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
    /// Handle to the question created by `init`.
    Question,
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Int(i) => write!(f, "{i}"),
            ScriptValue::Str(s) => f.write_str(s),
            ScriptValue::Question => f.write_str("<question>"),
            ScriptValue::List(_) | ScriptValue::Map(_) => match self.to_json() {
                Ok(json) => write!(f, "{json}"),
                Err(_) => f.write_str("<value>"),
            },
        }
    }
}

impl ScriptValue {
    fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Str(_) => "string",
            ScriptValue::List(_) => "list",
            ScriptValue::Map(_) => "map",
            ScriptValue::Question => "question",
        }
    }

    fn depth(&self) -> usize {
        match self {
            ScriptValue::List(items) => 1 + items.iter().map(ScriptValue::depth).max().unwrap_or(0),
            ScriptValue::Map(entries) => 1 + entries.values().map(ScriptValue::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn to_json(&self) -> Result<Value> {
        Ok(match self {
            ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => json!(b),
            ScriptValue::Int(i) => json!(i),
            ScriptValue::Str(s) => json!(s),
            ScriptValue::List(items) => {
                Value::Array(items.iter().map(ScriptValue::to_json).collect::<Result<_>>()?)
            }
            ScriptValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
            ScriptValue::Question => {
                return Err(Error::Generation(
                    "the question handle cannot be used as a value".to_string(),
                ));
            }
        })
    }
}

pub(crate) struct Interpreter<'a> {
    factory: &'a QuestionFactory,
    limits: &'a GeneratorLimits,
    random: Random,
    variables: HashMap<String, ScriptValue>,
    pub(crate) text: TextBuffer,
    pub(crate) question_type: Option<String>,
    pub(crate) question: Option<Box<dyn Question>>,
    operations: u64,
    line: usize,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        factory: &'a QuestionFactory,
        limits: &'a GeneratorLimits,
        seed: u64,
        text: TextBuffer,
    ) -> Self {
        Self {
            factory,
            limits,
            random: Random::new(seed),
            variables: HashMap::new(),
            text,
            question_type: None,
            question: None,
            operations: 0,
            line: 0,
        }
    }

    fn fail(&self, msg: impl fmt::Display) -> Error {
        Error::Generation(format!("line {}: {msg}", self.line))
    }

    fn tick(&mut self) -> Result<()> {
        self.operations += 1;
        if self.operations > self.limits.max_operations {
            return Err(self.fail(format!(
                "operation limit of {} exceeded",
                self.limits.max_operations
            )));
        }
        Ok(())
    }

    fn check_size(&self, value: ScriptValue) -> Result<ScriptValue> {
        let size = match &value {
            ScriptValue::Str(s) => s.len(),
            ScriptValue::List(items) => items.len(),
            _ => 0,
        };
        if size > self.limits.max_text_len {
            return Err(self.fail("value is too large"));
        }
        if value.depth() > MAX_VALUE_DEPTH {
            return Err(self.fail("value is nested too deeply"));
        }
        Ok(value)
    }

    pub(crate) fn run(&mut self, program: &Program) -> Result<()> {
        self.block(program)
    }

    fn block(&mut self, statements: &[Stmt]) -> Result<()> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Stmt) -> Result<()> {
        self.line = statement.line;
        self.tick()?;
        match &statement.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                self.variables.insert(name.clone(), value);
            }
            StmtKind::Assign(name, expr) => {
                if !self.variables.contains_key(name) {
                    return Err(self.fail(format!("assignment to undeclared variable '{name}'")));
                }
                let value = self.eval(expr)?;
                self.variables.insert(name.clone(), value);
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::If(condition, then, otherwise) => {
                if self.condition(condition)? {
                    self.block(then)?;
                } else {
                    self.block(otherwise)?;
                }
            }
            StmtKind::For(name, from, to, body) => {
                let from = self.int(from)?;
                let to = self.int(to)?;
                for i in from..to {
                    self.tick()?;
                    self.variables.insert(name.clone(), ScriptValue::Int(i));
                    self.block(body)?;
                }
            }
        }
        Ok(())
    }

    fn condition(&mut self, expr: &Expr) -> Result<bool> {
        match self.eval(expr)? {
            ScriptValue::Bool(b) => Ok(b),
            other => Err(self.fail(format!("condition must be bool, got {}", other.type_name()))),
        }
    }

    fn int(&mut self, expr: &Expr) -> Result<i64> {
        match self.eval(expr)? {
            ScriptValue::Int(i) => Ok(i),
            other => Err(self.fail(format!("expected int, got {}", other.type_name()))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<ScriptValue> {
        self.tick()?;
        match expr {
            Expr::Int(i) => Ok(ScriptValue::Int(*i)),
            Expr::Str(s) => Ok(ScriptValue::Str(s.clone())),
            Expr::Bool(b) => Ok(ScriptValue::Bool(*b)),
            Expr::Null => Ok(ScriptValue::Null),
            Expr::List(items) => {
                let items = items.iter().map(|e| self.eval(e)).collect::<Result<_>>()?;
                self.check_size(ScriptValue::List(items))
            }
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, expr) in entries {
                    map.insert(key.clone(), self.eval(expr)?);
                }
                self.check_size(ScriptValue::Map(map))
            }
            Expr::Var(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| self.fail(format!("undefined variable '{name}'"))),
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                self.index(target, index)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Neg, ScriptValue::Int(i)) => i
                        .checked_neg()
                        .map(ScriptValue::Int)
                        .ok_or_else(|| self.fail("integer overflow")),
                    (UnaryOp::Not, ScriptValue::Bool(b)) => Ok(ScriptValue::Bool(!b)),
                    (_, value) => Err(self.fail(format!(
                        "invalid operand of type {}",
                        value.type_name()
                    ))),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                Ok(ScriptValue::Bool(self.condition(left)? && self.condition(right)?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                Ok(ScriptValue::Bool(self.condition(left)? || self.condition(right)?))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = self.binary(op, left, right)?;
                self.check_size(value)
            }
            Expr::Call(name, args) => {
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                self.call(name, args)
            }
            Expr::Method(target, method, args) => {
                let target = self.eval(target)?;
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                self.method(target, method, args)
            }
        }
    }

    fn index(&self, target: ScriptValue, index: ScriptValue) -> Result<ScriptValue> {
        match (target, index) {
            (ScriptValue::List(items), ScriptValue::Int(i)) => usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| self.fail(format!("index {i} out of range"))),
            (ScriptValue::Str(s), ScriptValue::Int(i)) => usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| ScriptValue::Str(c.to_string()))
                .ok_or_else(|| self.fail(format!("index {i} out of range"))),
            (ScriptValue::Map(map), ScriptValue::Str(key)) => map
                .get(&key)
                .cloned()
                .ok_or_else(|| self.fail(format!("missing key '{key}'"))),
            (target, index) => Err(self.fail(format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ))),
        }
    }

    fn binary(&self, op: &BinaryOp, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue> {
        use ScriptValue::{Bool, Int, List, Str};
        let overflow = || self.fail("integer overflow");
        Ok(match (op, left, right) {
            (BinaryOp::Eq, l, r) => Bool(l == r),
            (BinaryOp::Ne, l, r) => Bool(l != r),
            (BinaryOp::Add, Int(a), Int(b)) => Int(a.checked_add(b).ok_or_else(overflow)?),
            (BinaryOp::Add, List(mut a), List(b)) => {
                a.extend(b);
                List(a)
            }
            (BinaryOp::Add, l @ Str(_), r) | (BinaryOp::Add, l, r @ Str(_)) => {
                Str(format!("{l}{r}"))
            }
            (BinaryOp::Sub, Int(a), Int(b)) => Int(a.checked_sub(b).ok_or_else(overflow)?),
            (BinaryOp::Mul, Int(a), Int(b)) => Int(a.checked_mul(b).ok_or_else(overflow)?),
            (BinaryOp::Div | BinaryOp::Rem, Int(_), Int(0)) => {
                return Err(self.fail("division by zero"));
            }
            (BinaryOp::Div, Int(a), Int(b)) => Int(a.checked_div(b).ok_or_else(overflow)?),
            (BinaryOp::Rem, Int(a), Int(b)) => Int(a.checked_rem(b).ok_or_else(overflow)?),
            (BinaryOp::Lt, Int(a), Int(b)) => Bool(a < b),
            (BinaryOp::Le, Int(a), Int(b)) => Bool(a <= b),
            (BinaryOp::Gt, Int(a), Int(b)) => Bool(a > b),
            (BinaryOp::Ge, Int(a), Int(b)) => Bool(a >= b),
            (BinaryOp::Lt, Str(a), Str(b)) => Bool(a < b),
            (BinaryOp::Le, Str(a), Str(b)) => Bool(a <= b),
            (BinaryOp::Gt, Str(a), Str(b)) => Bool(a > b),
            (BinaryOp::Ge, Str(a), Str(b)) => Bool(a >= b),
            (op, l, r) => {
                return Err(self.fail(format!(
                    "unsupported operation {op:?} on {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            }
        })
    }

    fn arity(&self, name: &str, args: &[ScriptValue], min: usize, max: usize) -> Result<()> {
        if args.len() < min || args.len() > max {
            return Err(self.fail(format!(
                "'{name}' takes {min} to {max} arguments, {} given",
                args.len()
            )));
        }
        Ok(())
    }

    fn text_arg(&self, value: &ScriptValue) -> Result<String> {
        match value {
            ScriptValue::Str(s) => Ok(s.clone()),
            ScriptValue::Int(i) => Ok(i.to_string()),
            other => Err(self.fail(format!("expected text, got {}", other.type_name()))),
        }
    }

    fn int_arg(&self, value: &ScriptValue) -> Result<i64> {
        match value {
            ScriptValue::Int(i) => Ok(*i),
            other => Err(self.fail(format!("expected int, got {}", other.type_name()))),
        }
    }

    fn locales_arg(&self, value: Option<&ScriptValue>) -> Result<Option<Vec<String>>> {
        match value {
            None | Some(ScriptValue::Null) => Ok(None),
            Some(ScriptValue::Str(locale)) => Ok(Some(vec![locale.clone()])),
            Some(ScriptValue::List(items)) => items
                .iter()
                .map(|item| match item {
                    ScriptValue::Str(locale) => Ok(locale.clone()),
                    other => Err(self.fail(format!("expected locale, got {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(self.fail(format!("expected locales, got {}", other.type_name()))),
        }
    }

    fn call(&mut self, name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue> {
        if !FUNCTIONS.contains(&name) {
            return Err(self.fail(format!("unknown function '{name}'")));
        }
        match name {
            "init" => {
                self.arity(name, &args, 1, 1)?;
                let tag = self.text_arg(&args[0])?;
                if self.question.is_some() {
                    return Err(self.fail("the question is already initialized"));
                }
                self.question = Some(self.factory.create(&tag)?);
                self.question_type = Some(tag);
                Ok(ScriptValue::Question)
            }
            "setText" | "appendText" => {
                self.arity(name, &args, 1, 2)?;
                let text = self.text_arg(&args[0])?;
                let locales = self.locales_arg(args.get(1))?;
                if name == "setText" {
                    self.text.set(&text, locales.as_deref())?;
                } else {
                    self.text.append(&text, locales.as_deref())?;
                }
                Ok(ScriptValue::Null)
            }
            "replaceText" => {
                self.arity(name, &args, 2, 4)?;
                let search = self.text_arg(&args[0])?;
                let replace = self.text_arg(&args[1])?;
                let locales = self.locales_arg(args.get(2))?;
                let regex = match args.get(3) {
                    None => false,
                    Some(ScriptValue::Bool(b)) => *b,
                    Some(other) => {
                        return Err(self.fail(format!("expected bool, got {}", other.type_name())));
                    }
                };
                self.text.replace(&search, &replace, locales.as_deref(), regex)?;
                Ok(ScriptValue::Null)
            }
            "random" => {
                self.arity(name, &args, 2, 2)?;
                let min = self.int_arg(&args[0])?;
                let max = self.int_arg(&args[1])?;
                if min > max {
                    return Err(self.fail(format!("invalid random range [{min}, {max}]")));
                }
                Ok(ScriptValue::Int(self.random.range(min, max)?))
            }
            "shuffle" => {
                self.arity(name, &args, 1, 1)?;
                let ScriptValue::List(mut items) = args[0].clone() else {
                    return Err(self.fail("shuffle expects a list"));
                };
                self.random.shuffle(&mut items);
                Ok(ScriptValue::List(items))
            }
            "len" => {
                self.arity(name, &args, 1, 1)?;
                let len = match &args[0] {
                    ScriptValue::Str(s) => s.chars().count(),
                    ScriptValue::List(items) => items.len(),
                    ScriptValue::Map(map) => map.len(),
                    other => return Err(self.fail(format!("{} has no length", other.type_name()))),
                };
                Ok(ScriptValue::Int(len as i64))
            }
            "str" => {
                self.arity(name, &args, 1, 1)?;
                Ok(ScriptValue::Str(args[0].to_string()))
            }
            "hex" | "bin" => {
                self.arity(name, &args, 1, 1)?;
                let radix = if name == "hex" { 16 } else { 2 };
                Ok(ScriptValue::Str(format_number(self.int_arg(&args[0])?, radix)))
            }
            "abs" => {
                self.arity(name, &args, 1, 1)?;
                self.int_arg(&args[0])?
                    .checked_abs()
                    .map(ScriptValue::Int)
                    .ok_or_else(|| self.fail("integer overflow"))
            }
            "min" | "max" => {
                let values = match args.as_slice() {
                    [ScriptValue::List(items)] => Some(items.clone()),
                    _ => None,
                }
                .unwrap_or(args);
                let ints = values
                    .iter()
                    .map(|v| self.int_arg(v))
                    .collect::<Result<Vec<_>>>()?;
                let result = if name == "min" {
                    ints.into_iter().min()
                } else {
                    ints.into_iter().max()
                };
                result
                    .map(ScriptValue::Int)
                    .ok_or_else(|| self.fail(format!("'{name}' needs at least one value")))
            }
            _ => Err(self.fail(format!("unknown function '{name}'"))),
        }
    }

    fn method(
        &mut self,
        target: ScriptValue,
        method: &str,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue> {
        if target != ScriptValue::Question {
            return Err(self.fail(format!("{} has no methods", target.type_name())));
        }
        if !METHODS.contains(&method) {
            return Err(self.fail(format!("unknown method '{method}'")));
        }
        let args = args
            .iter()
            .map(ScriptValue::to_json)
            .collect::<Result<Vec<_>>>()?;
        let line = self.line;
        let Some(question) = self.question.as_mut() else {
            return Err(Error::Generation(format!(
                "line {line}: the question is not initialized"
            )));
        };
        question.configure(method, &args).map_err(|e| match e {
            Error::Generation(msg) => Error::Generation(format!("line {line}: {msg}")),
            other => other,
        })?;
        Ok(ScriptValue::Null)
    }
}
