use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Let,
    If,
    Else,
    For,
    In,
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Dot,
    DotDot,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    And,
    Or,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "let" => Token::Let,
        "if" => Token::If,
        "else" => Token::Else,
        "for" => Token::For,
        "in" => Token::In,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => return None,
    })
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = vec![];
    let mut line = 1;
    let mut pos = 0;

    let fail = |line: usize, msg: String| Error::Generation(format!("line {line}: {msg}"));

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        if c == '\n' {
            line += 1;
            pos += 1;
            continue;
        }
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '/' && next == Some('/') {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            let digits: String = chars[start..pos].iter().collect();
            let value = digits
                .parse::<i64>()
                .map_err(|_| fail(line, format!("integer literal {digits} is too large")))?;
            tokens.push(Spanned {
                token: Token::Int(value),
                line,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            let token = keyword(&word).unwrap_or(Token::Ident(word));
            tokens.push(Spanned { token, line });
            continue;
        }

        if c == '"' {
            let start_line = line;
            let mut value = String::new();
            pos += 1;
            loop {
                let Some(&c) = chars.get(pos) else {
                    return Err(fail(start_line, "unterminated string literal".to_string()));
                };
                pos += 1;
                match c {
                    '"' => break,
                    '\\' => {
                        let escaped = chars.get(pos).copied();
                        pos += 1;
                        value.push(match escaped {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('"') => '"',
                            Some('\\') => '\\',
                            other => {
                                return Err(fail(
                                    line,
                                    format!("unknown escape sequence \\{}", other.unwrap_or(' ')),
                                ));
                            }
                        });
                    }
                    '\n' => {
                        line += 1;
                        value.push(c);
                    }
                    _ => value.push(c),
                }
            }
            tokens.push(Spanned {
                token: Token::Str(value),
                line: start_line,
            });
            continue;
        }

        let (token, width) = match (c, next) {
            ('.', Some('.')) => (Token::DotDot, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semicolon, 1),
            (':', _) => (Token::Colon, 1),
            ('.', _) => (Token::Dot, 1),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('!', _) => (Token::Not, 1),
            _ => return Err(fail(line, format!("unexpected character '{c}'"))),
        };
        tokens.push(Spanned { token, line });
        pos += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}
