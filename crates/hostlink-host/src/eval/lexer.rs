//! Tokenizer for the host expression language
//!
//! Raw tokens come from a logos lexer; [`tokenize`] then drops newlines
//! inside brackets so that displays and calls may span lines.

use logos::Logos;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    Newline,
    Eof,
}

const OPERATORS: [&str; 26] = [
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "(", ")", "[", "]", "{", "}",
    ",", ":", ".", "=", "<", ">", ";", "@", "~",
];

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|\\\n|#[^\n]*")]
enum LogosToken<'s> {
    #[token("\n")]
    Newline,

    #[regex(r"[\p{L}_][\p{L}\p{N}_]*", |lex| lex.slice().to_string())]
    Name(String),

    #[regex(r"[0-9][0-9_]*", parse_int)]
    Int(i64),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", parse_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    #[regex(r"'([^'\\\n]|\\.)*'", parse_string)]
    Str(String),

    // Two-character operators win over their one-character prefixes
    #[token("**", |lex| lex.slice())]
    #[token("//", |lex| lex.slice())]
    #[token("==", |lex| lex.slice())]
    #[token("!=", |lex| lex.slice())]
    #[token("<=", |lex| lex.slice())]
    #[token(">=", |lex| lex.slice())]
    #[token("+", |lex| lex.slice())]
    #[token("-", |lex| lex.slice())]
    #[token("*", |lex| lex.slice())]
    #[token("/", |lex| lex.slice())]
    #[token("%", |lex| lex.slice())]
    #[token("(", |lex| lex.slice())]
    #[token(")", |lex| lex.slice())]
    #[token("[", |lex| lex.slice())]
    #[token("]", |lex| lex.slice())]
    #[token("{", |lex| lex.slice())]
    #[token("}", |lex| lex.slice())]
    #[token(",", |lex| lex.slice())]
    #[token(":", |lex| lex.slice())]
    #[token(".", |lex| lex.slice())]
    #[token("=", |lex| lex.slice())]
    #[token("<", |lex| lex.slice())]
    #[token(">", |lex| lex.slice())]
    #[token(";", |lex| lex.slice())]
    #[token("@", |lex| lex.slice())]
    #[token("~", |lex| lex.slice())]
    Op(&'s str),
}

fn parse_int<'s>(lex: &mut logos::Lexer<'s, LogosToken<'s>>) -> Option<i64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_float<'s>(lex: &mut logos::Lexer<'s, LogosToken<'s>>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_string<'s>(lex: &mut logos::Lexer<'s, LogosToken<'s>>) -> Option<String> {
    let s = lex.slice();
    Some(unescape(&s[1..s.len() - 1]))
}

fn unescape(s: &str) -> String {
    let mut text = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some(other) => text.push(other),
            None => break,
        }
    }
    text
}

fn describe_error(slice: &str) -> String {
    match slice.chars().next() {
        Some('\'' | '"') => "unterminated string literal".to_string(),
        Some(c) if c.is_ascii_digit() || c == '.' => format!("invalid numeric literal '{slice}'"),
        Some(c) => format!("invalid character '{c}'"),
        None => "unexpected end of input".to_string(),
    }
}

/// Split source text into tokens, ending with [`Token::Eof`]
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut lexer = LogosToken::lexer(source);
    let mut tokens = Vec::new();
    let mut depth = 0usize;

    while let Some(result) = lexer.next() {
        let token = match result {
            Ok(token) => token,
            Err(()) => return Err(describe_error(lexer.slice())),
        };
        match token {
            LogosToken::Newline => {
                if depth == 0 && !matches!(tokens.last(), Some(Token::Newline) | None) {
                    tokens.push(Token::Newline);
                }
            }
            LogosToken::Name(name) => tokens.push(Token::Name(name)),
            LogosToken::Int(value) => tokens.push(Token::Int(value)),
            LogosToken::Float(value) => tokens.push(Token::Float(value)),
            LogosToken::Str(text) => tokens.push(Token::Str(text)),
            LogosToken::Op(text) => {
                let op = OPERATORS
                    .iter()
                    .copied()
                    .find(|op| *op == text)
                    .ok_or_else(|| format!("invalid character '{text}'"))?;
                match op {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token::Op(op));
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}
