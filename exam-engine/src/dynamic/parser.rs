use super::lexer::{Spanned, Token, tokenize};
use crate::error::{Error, Result};

const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Var(String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    Expr(Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    For(String, Expr, Expr, Vec<Stmt>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

pub(crate) type Program = Vec<Stmt>;

pub(crate) fn parse(source: &str) -> Result<Program> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let mut program = vec![];
    while parser.peek() != &Token::Eof {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn fail(&self, msg: impl std::fmt::Display) -> Error {
        Error::Generation(format!("line {}: {msg}", self.line()))
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.fail(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(self.fail(format!("expected identifier, found {other:?}"))),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.fail("code is nested too deeply"));
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.enter()?;
        let kind = match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.ident()?;
                self.expect(Token::Assign, "'='")?;
                let value = self.expression()?;
                self.expect(Token::Semicolon, "';'")?;
                StmtKind::Let(name, value)
            }
            Token::If => self.if_statement()?,
            Token::For => {
                self.advance();
                let name = self.ident()?;
                self.expect(Token::In, "'in'")?;
                let from = self.expression()?;
                self.expect(Token::DotDot, "'..'")?;
                let to = self.expression()?;
                let body = self.block()?;
                StmtKind::For(name, from, to, body)
            }
            Token::Ident(_) if self.peek_at(1) == &Token::Assign => {
                let name = self.ident()?;
                self.advance();
                let value = self.expression()?;
                self.expect(Token::Semicolon, "';'")?;
                StmtKind::Assign(name, value)
            }
            _ => {
                let expr = self.expression()?;
                self.expect(Token::Semicolon, "';'")?;
                StmtKind::Expr(expr)
            }
        };
        self.depth -= 1;
        Ok(Stmt { line, kind })
    }

    fn if_statement(&mut self) -> Result<StmtKind> {
        self.expect(Token::If, "'if'")?;
        let condition = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.peek() == &Token::Else {
            self.advance();
            if self.peek() == &Token::If {
                let line = self.line();
                self.enter()?;
                let kind = self.if_statement()?;
                self.depth -= 1;
                vec![Stmt { line, kind }]
            } else {
                self.block()?
            }
        } else {
            vec![]
        };
        Ok(StmtKind::If(condition, then, otherwise))
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = vec![];
        while self.peek() != &Token::RBrace {
            if self.peek() == &Token::Eof {
                return Err(self.fail("unterminated block"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.binary(0)?;
        self.depth -= 1;
        Ok(expr)
    }

    /// Precedence climbing: `||` < `&&` < equality < comparison < additive < multiplicative.
    ///
    /// Every folded operator deepens the tree and counts against the nesting limit.
    fn binary(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: [&[(Token, BinaryOp)]; 6] = [
            &[(Token::Or, BinaryOp::Or)],
            &[(Token::And, BinaryOp::And)],
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        let mut folded = 0;
        loop {
            let Some((_, op)) = LEVELS[level].iter().find(|(t, _)| t == self.peek()) else {
                self.depth -= folded;
                return Ok(left);
            };
            let op = op.clone();
            self.advance();
            self.enter()?;
            folded += 1;
            let right = self.binary(level + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Not => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        let mut folded = 0;
        loop {
            if matches!(self.peek(), Token::LBracket | Token::Dot) {
                self.enter()?;
                folded += 1;
            }
            match self.peek() {
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::Dot => {
                    self.advance();
                    let method = self.ident()?;
                    self.expect(Token::LParen, "'(' after method name")?;
                    let args = self.arguments()?;
                    expr = Expr::Method(Box::new(expr), method, args);
                }
                _ => {
                    self.depth -= folded;
                    return Ok(expr);
                }
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = vec![];
        if self.peek() == &Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => return Err(self.fail(format!("expected ',' or ')', found {other:?}"))),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Ident(name) => {
                if self.peek() == &Token::LParen {
                    self.advance();
                    Ok(Expr::Call(name, self.arguments()?))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = vec![];
                while self.peek() != &Token::RBracket {
                    items.push(self.expression()?);
                    if self.peek() == &Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut entries = vec![];
                while self.peek() != &Token::RBrace {
                    let key = match self.advance() {
                        Token::Ident(key) | Token::Str(key) => key,
                        other => return Err(self.fail(format!("expected map key, found {other:?}"))),
                    };
                    self.expect(Token::Colon, "':'")?;
                    entries.push((key, self.expression()?));
                    if self.peek() == &Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                Ok(Expr::Map(entries))
            }
            other => Err(self.fail(format!("unexpected {other:?}"))),
        }
    }
}
