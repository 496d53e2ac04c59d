//! FQL (Fact Query Language) Lexer
//!
//! Turns query text into a flat token stream. FQL is a prefix
//! S-expression language:
//!
//! ```text
//! (and (eq kind 'order')   # a comment runs to the end of the line
//!      (gt total 100.5)
//!      (lt placed 2024-05-25T19:43:48Z))
//! ```
//!
//! Bare words are classified after quote and comment handling: integers,
//! floats, UTC timestamps, and finally symbols (`name` or `$param`). Anything
//! else is rejected here, before the parser sees it.

use crate::error::{FactbaseError, Result};
use crate::types::{format_float, format_time, Value};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"^[+-]?[0-9]+$").unwrap();
    static ref FLOAT: Regex = Regex::new(r"^[+-]?[0-9]+\.[0-9]+(e[+-][0-9]+)?$").unwrap();
    static ref TIMESTAMP: Regex =
        Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}Z$").unwrap();
    static ref SYMBOL: Regex = Regex::new(r"^([_a-z][a-zA-Z0-9_]*|\$[a-z]+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Open,
    Close,
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Symbol(String),
}

impl Token {
    /// The literal value carried by the token, if any
    pub fn literal(&self) -> Option<Value> {
        match self {
            Token::Integer(n) => Some(Value::Int(*n)),
            Token::Float(n) => Some(Value::Float(*n)),
            Token::String(s) => Some(Value::Str(s.clone())),
            Token::Timestamp(t) => Some(Value::Time(*t)),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", format_float(*n)),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Timestamp(t) => write!(f, "{}", format_time(t)),
            Token::Symbol(s) => write!(f, ":{}", s),
        }
    }
}

/// Render a token stream for diagnostics
pub fn dump(tokens: &[Token]) -> String {
    let items: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// A bare word or quoted segment, before classification
enum Raw {
    Open,
    Close,
    Word(String),
    Quoted(String),
}

pub struct Lexer<'a> {
    query: &'a str,
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(query: &'a str) -> Self {
        let chars: Vec<char> = query.chars().collect();
        let current = chars.first().copied();
        Lexer {
            query,
            input: chars,
            position: 0,
            current_char: current,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut raw = Vec::new();
        let mut word = String::new();

        while let Some(ch) = self.current_char {
            match ch {
                '#' => self.skip_comment(),
                '\'' | '"' => {
                    flush(&mut word, &mut raw);
                    let s = self.read_string(ch)?;
                    raw.push(Raw::Quoted(s));
                }
                '(' => {
                    flush(&mut word, &mut raw);
                    raw.push(Raw::Open);
                    self.advance();
                }
                ')' => {
                    flush(&mut word, &mut raw);
                    raw.push(Raw::Close);
                    self.advance();
                }
                c if c.is_whitespace() => {
                    flush(&mut word, &mut raw);
                    self.advance();
                }
                c => {
                    word.push(c);
                    self.advance();
                }
            }
        }
        flush(&mut word, &mut raw);

        raw.into_iter().map(|r| self.classify(r)).collect()
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Reads up to the closing quote. A backslash right before a quote
    /// character is dropped and the quote is kept as text.
    fn read_string(&mut self, quote_char: char) -> Result<String> {
        self.advance();
        let mut result = String::new();

        while let Some(ch) = self.current_char {
            if ch == '\'' || ch == '"' {
                if result.ends_with('\\') {
                    result.pop();
                    result.push(ch);
                    self.advance();
                    continue;
                }
                if ch == quote_char {
                    self.advance();
                    if result.is_empty() {
                        return Err(self.error("String literal can't be empty"));
                    }
                    return Ok(result);
                }
            }
            result.push(ch);
            self.advance();
        }

        Err(self.error("String not closed"))
    }

    fn classify(&self, raw: Raw) -> Result<Token> {
        let word = match raw {
            Raw::Open => return Ok(Token::Open),
            Raw::Close => return Ok(Token::Close),
            Raw::Quoted(s) => return Ok(Token::String(s)),
            Raw::Word(w) => w,
        };

        if INTEGER.is_match(&word) {
            word.trim_start_matches('+')
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|e| self.error(&format!("Invalid integer '{}': {}", word, e)))
        } else if FLOAT.is_match(&word) {
            let f = word
                .trim_start_matches('+')
                .parse::<f64>()
                .map_err(|e| self.error(&format!("Invalid float '{}': {}", word, e)))?;
            if !f.is_finite() {
                return Err(self.error(&format!("Float '{}' is out of range", word)));
            }
            Ok(Token::Float(f))
        } else if TIMESTAMP.is_match(&word) {
            DateTime::parse_from_rfc3339(&word)
                .map(|t| Token::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| self.error(&format!("Invalid timestamp '{}': {}", word, e)))
        } else if SYMBOL.is_match(&word) {
            Ok(Token::Symbol(word))
        } else {
            Err(self.error(&format!("Wrong symbol format ({})", word)))
        }
    }

    fn error(&self, message: &str) -> FactbaseError {
        FactbaseError::Parse {
            message: message.to_string(),
            query: self.query.to_string(),
            tokens: String::new(),
        }
    }
}

fn flush(word: &mut String, raw: &mut Vec<Raw>) {
    if !word.is_empty() {
        raw.push(Raw::Word(std::mem::take(word)));
    }
}

/// Tokenize a query in one call
pub fn tokenize(query: &str) -> Result<Vec<Token>> {
    Lexer::new(query).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sym(s: &str) -> Token {
        Token::Symbol(s.to_string())
    }

    #[test]
    fn test_structure() {
        let tokens = tokenize("(eq foo 42)").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Open, sym("eq"), sym("foo"), Token::Integer(42), Token::Close]
        );
    }

    #[test]
    fn test_parens_split_words() {
        let tokens = tokenize("(and(exists a)(absent b))").unwrap();
        assert_eq!(tokens.len(), 11);
        assert_eq!(tokens[1], sym("and"));
        assert_eq!(tokens[2], Token::Open);
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 -7 +3 3.14 -0.5 3.0e+21").unwrap();
        assert_eq!(tokens[0], Token::Integer(42));
        assert_eq!(tokens[1], Token::Integer(-7));
        assert_eq!(tokens[2], Token::Integer(3));
        assert_eq!(tokens[3], Token::Float(3.14));
        assert_eq!(tokens[4], Token::Float(-0.5));
        assert_eq!(tokens[5], Token::Float(3.0e21));
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#"'hello world' "it's" 'Dude\'s' "say \"hi\"""#).unwrap();
        assert_eq!(tokens[0], Token::String("hello world".to_string()));
        assert_eq!(tokens[1], Token::String("it's".to_string()));
        assert_eq!(tokens[2], Token::String("Dude's".to_string()));
        assert_eq!(tokens[3], Token::String("say \"hi\"".to_string()));
    }

    #[test]
    fn test_timestamp() {
        let tokens = tokenize("2024-05-25T19:43:48Z").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 25, 19, 43, 48).unwrap();
        assert_eq!(tokens[0], Token::Timestamp(expected));
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = tokenize("(foo # (this is ignored\n bar) # tail").unwrap();
        assert_eq!(tokens, vec![Token::Open, sym("foo"), sym("bar"), Token::Close]);
    }

    #[test]
    fn test_hash_inside_string_is_text() {
        let tokens = tokenize("(eq x '#1')").unwrap();
        assert_eq!(tokens[3], Token::String("#1".to_string()));
    }

    #[test]
    fn test_parameters() {
        let tokens = tokenize("(eq foo $bar)").unwrap();
        assert_eq!(tokens[3], sym("$bar"));
    }

    #[test]
    fn test_failures() {
        for bad in [
            "(bad-term-name 42)",
            "(foo 'unterminated)",
            "(foo '')",
            "(foo \"\")",
            "(Foo 1)",
            "(foo $Bar)",
            "(foo 1.)",
            "(foo 99999999999999999999)",
            "(foo 1.0e+999)",
            "(foo -2.5e+400)",
        ] {
            let err = tokenize(bad).unwrap_err();
            assert!(err.to_string().contains(bad), "{}", err);
        }
    }
}
