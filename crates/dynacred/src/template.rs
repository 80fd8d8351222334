//! Username template language
//!
//! A small subset of Go's `text/template`: literal text interleaved with
//! `{{ pipeline }}` actions. A pipeline is a chain of commands separated by
//! `|`; each command is either a value (`.DisplayName`, `.RoleName`, a
//! string or integer literal, a parenthesized pipeline) or a function call.
//! The output of one command is passed as the *last* argument of the next.
//!
//! ```
//! use dynacred::template::{UsernameMetadata, UsernameTemplate};
//!
//! let tpl = UsernameTemplate::parse(r#"{{ .RoleName | truncate 4 | uppercase }}_x"#).unwrap();
//! let meta = UsernameMetadata::new("token", "reader");
//! assert_eq!(tpl.render(&meta).unwrap(), "READ_x");
//! ```

use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;

/// Template used when `username_template` is not configured
pub const DEFAULT_USERNAME_TEMPLATE: &str = r#"{{ printf "V_%s_%s_%s_%s" (.DisplayName | truncate 8) (.RoleName | truncate 8) (random 20) (unix_time) | truncate 30 | uppercase | replace "-" "_" | replace "." "_" }}"#;

/// Template parse or render error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template source is malformed
    #[error("template parse error at byte {offset}: {message}")]
    Parse {
        /// Byte offset into the template source
        offset: usize,
        /// What the parser expected
        message: String,
    },

    /// A function or field lookup failed while rendering
    #[error("template render error: {0}")]
    Render(String),
}

fn parse_err(offset: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        offset,
        message: message.into(),
    }
}

fn render_err(message: impl Into<String>) -> TemplateError {
    TemplateError::Render(message.into())
}

/// Input to username rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsernameMetadata {
    /// Display name of the requesting token
    pub display_name: String,
    /// Role the credential is created for
    pub role_name: String,
}

impl UsernameMetadata {
    /// Create metadata
    pub fn new(display_name: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            role_name: role_name.into(),
        }
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Pipeline),
}

type Pipeline = Vec<Command>;
type Command = Vec<Arg>;

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Field(Field),
    Str(String),
    Int(i64),
    Ident(String),
    Sub(Pipeline),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DisplayName,
    RoleName,
}

#[derive(Debug, Clone, PartialEq)]
enum TValue {
    Str(String),
    Int(i64),
}

impl std::fmt::Display for TValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
        }
    }
}

impl TValue {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Field),
    Str(String),
    Int(i64),
    Ident(String),
    LParen,
    RParen,
    Pipe,
}

fn lex_action(src: &str, base: usize) -> Result<Vec<(usize, Token)>, TemplateError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let at = base + i;
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                tokens.push((at, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((at, Token::RParen));
                i += 1;
            }
            b'|' => {
                tokens.push((at, Token::Pipe));
                i += 1;
            }
            b'"' => {
                let mut value = String::new();
                let mut chars = src[i + 1..].char_indices();
                let mut end = None;
                while let Some((j, ch)) = chars.next() {
                    match ch {
                        '"' => {
                            end = Some(i + 1 + j + 1);
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, '"')) => value.push('"'),
                            Some((_, other)) => {
                                return Err(parse_err(at, format!("unknown escape \\{}", other)))
                            }
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                let end = end.ok_or_else(|| parse_err(at, "unterminated string"))?;
                tokens.push((at, Token::Str(value)));
                i = end;
            }
            b'`' => {
                let close = src[i + 1..]
                    .find('`')
                    .ok_or_else(|| parse_err(at, "unterminated raw string"))?;
                tokens.push((at, Token::Str(src[i + 1..i + 1 + close].to_string())));
                i += close + 2;
            }
            b'.' => {
                let len = src[i + 1..]
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(src.len() - i - 1);
                let field = match &src[i + 1..i + 1 + len] {
                    "DisplayName" => Field::DisplayName,
                    "RoleName" => Field::RoleName,
                    other => return Err(parse_err(at, format!("unknown field .{}", other))),
                };
                tokens.push((at, Token::Field(field)));
                i += len + 1;
            }
            b'-' | b'0'..=b'9' => {
                let len = src[i + 1..]
                    .find(|ch: char| !ch.is_ascii_digit())
                    .unwrap_or(src.len() - i - 1)
                    + 1;
                let literal = &src[i..i + len];
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| parse_err(at, format!("invalid number {:?}", literal)))?;
                tokens.push((at, Token::Int(value)));
                i += len;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let len = src[i..]
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(src.len() - i);
                tokens.push((at, Token::Ident(src[i..i + len].to_string())));
                i += len;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(parse_err(at, format!("unexpected character {:?}", ch)));
            }
        }
    }
    Ok(tokens)
}

struct ActionParser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl ActionParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(at, _)| *at)
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut pipeline = vec![self.command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            pipeline.push(self.command()?);
        }
        Ok(pipeline)
    }

    fn command(&mut self) -> Result<Command, TemplateError> {
        let mut args = Vec::new();
        loop {
            let arg = match self.peek() {
                None | Some(Token::Pipe) | Some(Token::RParen) => break,
                Some(Token::LParen) => {
                    self.pos += 1;
                    let sub = self.pipeline()?;
                    if self.peek() != Some(&Token::RParen) {
                        return Err(parse_err(self.offset(), "expected ')'"));
                    }
                    self.pos += 1;
                    Arg::Sub(sub)
                }
                Some(Token::Field(f)) => {
                    let f = *f;
                    self.pos += 1;
                    Arg::Field(f)
                }
                Some(Token::Str(s)) => {
                    let s = s.clone();
                    self.pos += 1;
                    Arg::Str(s)
                }
                Some(Token::Int(i)) => {
                    let i = *i;
                    self.pos += 1;
                    Arg::Int(i)
                }
                Some(Token::Ident(name)) => {
                    if !is_function(name) {
                        return Err(parse_err(
                            self.offset(),
                            format!("function {:?} not defined", name),
                        ));
                    }
                    let name = name.clone();
                    self.pos += 1;
                    Arg::Ident(name)
                }
            };
            args.push(arg);
        }
        if args.is_empty() {
            return Err(parse_err(self.offset(), "missing value for command"));
        }
        Ok(args)
    }
}

fn parse_action(src: &str, base: usize) -> Result<Pipeline, TemplateError> {
    let tokens = lex_action(src, base)?;
    let mut parser = ActionParser {
        tokens,
        pos: 0,
        end: base + src.len(),
    };
    let pipeline = parser.pipeline()?;
    if parser.pos != parser.tokens.len() {
        return Err(parse_err(parser.offset(), "unexpected token in action"));
    }
    Ok(pipeline)
}

/// A parsed username template
#[derive(Debug, Clone, PartialEq)]
pub struct UsernameTemplate {
    nodes: Vec<Node>,
}

impl Default for UsernameTemplate {
    fn default() -> Self {
        // The default template is a constant known to parse.
        Self::parse(DEFAULT_USERNAME_TEMPLATE).unwrap_or(Self { nodes: Vec::new() })
    }
}

impl UsernameTemplate {
    /// Parse a template
    pub fn parse(src: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut rest = src;
        let mut offset = 0;
        let mut trim_next_text = false;

        while let Some(open) = rest.find("{{") {
            let mut text = &rest[..open];
            if trim_next_text {
                text = text.trim_start();
            }
            let mut inner_start = open + 2;
            // "{{- " trims whitespace before the action
            if rest[inner_start..].starts_with("- ") || rest[inner_start..].starts_with("-\t") {
                text = text.trim_end();
                inner_start += 1;
            }
            if !text.is_empty() {
                nodes.push(Node::Text(text.to_string()));
            }

            let close = rest[inner_start..]
                .find("}}")
                .ok_or_else(|| parse_err(offset + open, "unclosed action"))?
                + inner_start;
            let mut inner_end = close;
            trim_next_text = false;
            // " -}}" trims whitespace after the action
            if close > inner_start
                && rest[..close].ends_with('-')
                && rest[..close - 1].ends_with(|c: char| c.is_ascii_whitespace())
            {
                inner_end -= 1;
                trim_next_text = true;
            }

            let action = &rest[inner_start..inner_end];
            if action.trim().is_empty() {
                return Err(parse_err(offset + open, "missing value for command"));
            }
            nodes.push(Node::Action(parse_action(action, offset + inner_start)?));

            offset += close + 2;
            rest = &rest[close + 2..];
        }

        let text = if trim_next_text { rest.trim_start() } else { rest };
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }
        Ok(Self { nodes })
    }

    /// Render with the given metadata
    pub fn render(&self, metadata: &UsernameMetadata) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let value = eval_pipeline(pipeline, metadata)?;
                    let _ = write!(out, "{}", value);
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval_pipeline(pipeline: &Pipeline, meta: &UsernameMetadata) -> Result<TValue, TemplateError> {
    let mut piped: Option<TValue> = None;
    for command in pipeline {
        piped = Some(eval_command(command, meta, piped.take())?);
    }
    piped.ok_or_else(|| render_err("empty pipeline"))
}

fn eval_arg(arg: &Arg, meta: &UsernameMetadata) -> Result<TValue, TemplateError> {
    match arg {
        Arg::Field(Field::DisplayName) => Ok(TValue::Str(meta.display_name.clone())),
        Arg::Field(Field::RoleName) => Ok(TValue::Str(meta.role_name.clone())),
        Arg::Str(s) => Ok(TValue::Str(s.clone())),
        Arg::Int(i) => Ok(TValue::Int(*i)),
        Arg::Sub(pipeline) => eval_pipeline(pipeline, meta),
        Arg::Ident(name) => call(name, Vec::new()),
    }
}

fn eval_command(
    command: &Command,
    meta: &UsernameMetadata,
    piped: Option<TValue>,
) -> Result<TValue, TemplateError> {
    match command.split_first() {
        Some((Arg::Ident(name), rest)) => {
            let mut args = rest
                .iter()
                .map(|a| eval_arg(a, meta))
                .collect::<Result<Vec<_>, _>>()?;
            args.extend(piped);
            call(name, args)
        }
        Some((arg, [])) => {
            if piped.is_some() {
                return Err(render_err("can't give argument to non-function"));
            }
            eval_arg(arg, meta)
        }
        Some(_) => Err(render_err("can't give argument to non-function")),
        None => Err(render_err("empty command")),
    }
}

const FUNCTIONS: [&str; 13] = [
    "printf",
    "random",
    "truncate",
    "truncate_sha256",
    "uppercase",
    "lowercase",
    "replace",
    "sha256",
    "base64",
    "unix_time",
    "unix_time_millis",
    "timestamp",
    "uuid",
];

fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

fn arity(name: &str, args: &[TValue], expected: usize) -> Result<(), TemplateError> {
    if args.len() != expected {
        return Err(render_err(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(name: &str, value: &TValue) -> Result<i64, TemplateError> {
    match value {
        TValue::Int(i) => Ok(*i),
        TValue::Str(s) => s
            .parse()
            .map_err(|_| render_err(format!("{}: expected integer, got {:?}", name, s))),
    }
}

fn str_arg(value: TValue) -> String {
    value.into_string()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn call(name: &str, args: Vec<TValue>) -> Result<TValue, TemplateError> {
    let mut args = args;
    let value = match name {
        "printf" => {
            if args.is_empty() {
                return Err(render_err("printf requires a format"));
            }
            let format = str_arg(args.remove(0));
            TValue::Str(sprintf(&format, &args))
        }
        "random" => {
            arity(name, &args, 1)?;
            let len = int_arg(name, &args[0])?;
            if len <= 0 {
                return Err(render_err(format!("random: length must be > 0, got {}", len)));
            }
            let s: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len as usize)
                .map(char::from)
                .collect();
            TValue::Str(s)
        }
        "truncate" => {
            arity(name, &args, 2)?;
            let max = int_arg(name, &args[0])?;
            if max <= 0 {
                return Err(render_err(format!(
                    "truncate: max length must be > 0, got {}",
                    max
                )));
            }
            let s = str_arg(args.remove(1));
            TValue::Str(s.chars().take(max as usize).collect())
        }
        "truncate_sha256" => {
            arity(name, &args, 2)?;
            let max = int_arg(name, &args[0])?;
            if max <= 8 {
                return Err(render_err(format!(
                    "truncate_sha256: max length must be > 8, got {}",
                    max
                )));
            }
            let s = str_arg(args.remove(1));
            let max = max as usize;
            if s.chars().count() <= max {
                TValue::Str(s)
            } else {
                let keep: String = s.chars().take(max - 8).collect();
                let tail: String = s.chars().skip(max - 8).collect();
                let hash = sha256_hex(&tail);
                TValue::Str(format!("{}{}", keep, &hash[..8]))
            }
        }
        "uppercase" => {
            arity(name, &args, 1)?;
            TValue::Str(str_arg(args.remove(0)).to_uppercase())
        }
        "lowercase" => {
            arity(name, &args, 1)?;
            TValue::Str(str_arg(args.remove(0)).to_lowercase())
        }
        "replace" => {
            arity(name, &args, 3)?;
            let s = str_arg(args.remove(2));
            let new = str_arg(args.remove(1));
            let old = str_arg(args.remove(0));
            TValue::Str(s.replace(&old, &new))
        }
        "sha256" => {
            arity(name, &args, 1)?;
            TValue::Str(sha256_hex(&str_arg(args.remove(0))))
        }
        "base64" => {
            arity(name, &args, 1)?;
            TValue::Str(base64::engine::general_purpose::STANDARD.encode(str_arg(args.remove(0))))
        }
        "unix_time" => {
            arity(name, &args, 0)?;
            TValue::Int(chrono::Utc::now().timestamp())
        }
        "unix_time_millis" => {
            arity(name, &args, 0)?;
            TValue::Int(chrono::Utc::now().timestamp_millis())
        }
        "timestamp" => {
            arity(name, &args, 1)?;
            let layout = str_arg(args.remove(0));
            let format = go_layout_to_strftime(&layout);
            TValue::Str(chrono::Utc::now().format(&format).to_string())
        }
        "uuid" => {
            arity(name, &args, 0)?;
            TValue::Str(uuid::Uuid::new_v4().to_string())
        }
        other => return Err(render_err(format!("function {:?} not defined", other))),
    };
    Ok(value)
}

/// `%s`, `%d`, `%v` and `%%`; missing operands render as `%!v(MISSING)`
fn sprintf(format: &str, args: &[TValue]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut operands = args.iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'd' | 'v')) => match operands.next() {
                Some(value) => {
                    let _ = write!(out, "{}", value);
                }
                None => {
                    let _ = write!(out, "%!{}(MISSING)", verb);
                }
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Translate a Go reference-time layout into a chrono format string
fn go_layout_to_strftime(layout: &str) -> String {
    const TABLE: [(&str, &str); 18] = [
        ("2006", "%Y"),
        ("Z07:00", "%:z"),
        ("-07:00", "%:z"),
        ("-0700", "%z"),
        ("January", "%B"),
        ("Monday", "%A"),
        ("Jan", "%b"),
        ("Mon", "%a"),
        ("MST", "%Z"),
        ("01", "%m"),
        ("02", "%d"),
        ("15", "%H"),
        ("03", "%I"),
        ("04", "%M"),
        ("05", "%S"),
        ("06", "%y"),
        ("PM", "%p"),
        (".000", "%.3f"),
    ];

    let mut out = String::new();
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (go, chrono_fmt) in TABLE {
            if let Some(tail) = rest.strip_prefix(go) {
                out.push_str(chrono_fmt);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}
