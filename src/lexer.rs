use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Identifier(String),
    Number(f64),
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
            Token::Number(value) => write!(f, "number {}", value),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?m)#.*$").unwrap();
    static ref TOKEN_RE: Regex = Regex::new(
        &[
            r"(?P<ident>\p{Alphabetic}\w*)",
            r"(?P<number>[0-9]+\.?[0-9]*|\.[0-9]+)",
            r"(?P<char>\S)",
        ]
        .join("|")
    )
    .unwrap();
}

fn strip_comments(input: &str) -> String {
    COMMENT_RE.replace_all(input, "").to_string()
}

/// Pull-based tokenizer. Once the input is exhausted every call to
/// `next_token` yields `Token::Eof`.
#[derive(Debug, Clone)]
pub struct Lexer {
    source: String,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            source: strip_comments(input),
            position: 0,
        }
    }

    pub fn next_token(&mut self) -> Token {
        let cap = match TOKEN_RE.captures_at(&self.source, self.position) {
            Some(cap) => cap,
            None => {
                self.position = self.source.len();
                return Token::Eof;
            }
        };
        self.position = cap.get(0).map_or(self.source.len(), |m| m.end());

        if let Some(ident) = cap.name("ident") {
            match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                name => Token::Identifier(name.to_string()),
            }
        } else if let Some(number) = cap.name("number") {
            match number.as_str().parse() {
                Ok(value) => Token::Number(value),
                Err(_) => {
                    // hand back one character and resume right after it
                    self.position = number.start() + 1;
                    Token::Char(number.as_str().chars().next().unwrap_or('.'))
                }
            }
        } else {
            cap.name("char")
                .and_then(|c| c.as_str().chars().next())
                .map_or(Token::Eof, Token::Char)
        }
    }
}

/// lex the whole input up front, without the trailing `Token::Eof`
pub fn lex(input: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(input);
    let mut res = Vec::new();
    loop {
        match lexer.next_token() {
            Token::Eof => break,
            token => res.push(token),
        }
    }
    res
}
