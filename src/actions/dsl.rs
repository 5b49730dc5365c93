//! Free-text action grammar: `do(action="Tap", element=[x, y])` and
//! `finish(message="...")`, optionally wrapped in `<think>`/`<answer>` tags.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::actions::types::{Action, DeviceAction};

pub const FINISH_MARKER: &str = "finish(message=";
pub const DO_MARKER: &str = "do(action=";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

/// Checked in this order when streaming.
const ACTION_MARKERS: [&str; 2] = [FINISH_MARKER, DO_MARKER];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionParseError {
    #[error("empty action")]
    Empty,

    #[error("expected do(...) or finish(...), got '{0}'")]
    UnknownCall(String),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),

    #[error("argument '{name}' should be {expected}")]
    WrongType { name: &'static str, expected: &'static str },

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

/// Split a complete model reply into `(thinking, action_text)`.
///
/// Whichever of `<answer>`, `finish(message=` or `do(action=` occurs first
/// decides the form. With none of them the whole reply is thinking and the
/// action text is empty.
pub fn split_response(text: &str) -> (String, String) {
    let first = [ANSWER_OPEN, FINISH_MARKER, DO_MARKER]
        .into_iter()
        .filter_map(|m| text.find(m).map(|pos| (pos, m)))
        .min_by_key(|(pos, _)| *pos);

    match first {
        Some((pos, ANSWER_OPEN)) => {
            let thinking = strip_think_tags(&text[..pos]);
            let action = text[pos + ANSWER_OPEN.len()..]
                .replace(ANSWER_CLOSE, "")
                .trim()
                .to_string();
            (thinking, action)
        }
        Some((pos, _)) => (strip_think_tags(&text[..pos]), text[pos..].trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

fn strip_think_tags(s: &str) -> String {
    s.replace("<think>", "")
        .replace("</think>", "")
        .trim()
        .to_string()
}

/// Parse an action expression. Text after the closing parenthesis is ignored.
pub fn parse_action(text: &str) -> Result<Action, ActionParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ActionParseError::Empty);
    }
    match parse_call(text) {
        Ok((name, args)) => build_action(&name, &args),
        Err(err) => type_fallback(text).ok_or(err),
    }
}

/// Total variant of [`parse_action`]: malformed text becomes
/// `Finish { message: <text> }`.
pub fn parse_or_finish(text: &str) -> Action {
    parse_action(text).unwrap_or_else(|e| {
        tracing::warn!(error = %e, action = text, "unparseable action, finishing");
        Action::finish(text.trim())
    })
}

/// `Type` text containing raw quotes does not tokenize; take everything
/// between `text="` and the final `")`.
fn type_fallback(text: &str) -> Option<Action> {
    static TYPE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TYPE_RE
        .get_or_init(|| Regex::new(r#"(?s)^do\(action="Type(?:_Name)?",\s*text="(.*)"\)"#).ok())
        .as_ref()?;
    let caps = re.captures(text)?;
    Some(Action::Do(DeviceAction::Type {
        text: caps.get(1)?.as_str().to_string(),
    }))
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    List(Vec<Value>),
    Bool(bool),
    None,
}

impl Value {
    fn as_number(&self) -> Option<i32> {
        match self {
            Value::Int(i) => i32::try_from(*i).ok(),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i32),
            _ => None,
        }
    }
}

type Kwargs = Vec<(String, Value)>;

fn build_action(name: &str, args: &Kwargs) -> Result<Action, ActionParseError> {
    match name {
        "finish" => {
            let message = match arg(args, "message") {
                Some(Value::Str(s)) => s.clone(),
                Some(Value::Int(i)) => i.to_string(),
                Some(Value::Float(f)) => f.to_string(),
                _ => "Task completed".to_string(),
            };
            Ok(Action::Finish { message })
        }
        "do" => {
            let kind = match arg(args, "action") {
                Some(Value::Str(s)) => s.as_str(),
                Some(_) => {
                    return Err(ActionParseError::WrongType {
                        name: "action",
                        expected: "a string",
                    })
                }
                None => return Err(ActionParseError::MissingArgument("action")),
            };
            build_device_action(kind, args).map(Action::Do)
        }
        other => Err(ActionParseError::UnknownCall(other.to_string())),
    }
}

fn build_device_action(kind: &str, args: &Kwargs) -> Result<DeviceAction, ActionParseError> {
    let action = match kind {
        "Tap" => DeviceAction::Tap {
            element: point(args, "element")?,
        },
        "Double Tap" => DeviceAction::DoubleTap {
            element: point(args, "element")?,
        },
        "Long Press" => DeviceAction::LongPress {
            element: point(args, "element")?,
        },
        "Swipe" => DeviceAction::Swipe {
            start: point(args, "start")?,
            end: point(args, "end")?,
        },
        "Type" | "Type_Name" => DeviceAction::Type {
            text: string(args, "text")?,
        },
        "Launch" => DeviceAction::Launch {
            app: string(args, "app")?,
        },
        "Back" => DeviceAction::Back,
        "Home" => DeviceAction::Home,
        "Wait" => DeviceAction::Wait {
            duration: match arg(args, "duration") {
                Some(Value::Str(s)) => s.clone(),
                Some(v) => match v.as_number() {
                    Some(n) => format!("{n} seconds"),
                    None => "1 seconds".to_string(),
                },
                None => "1 seconds".to_string(),
            },
        },
        other => return Err(ActionParseError::UnknownAction(other.to_string())),
    };
    Ok(action)
}

fn arg<'a>(args: &'a Kwargs, key: &str) -> Option<&'a Value> {
    args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn point(args: &Kwargs, key: &'static str) -> Result<[i32; 2], ActionParseError> {
    let wrong = ActionParseError::WrongType {
        name: key,
        expected: "a [x, y] pair",
    };
    match arg(args, key) {
        Some(Value::List(items)) if items.len() == 2 => {
            match (items[0].as_number(), items[1].as_number()) {
                (Some(x), Some(y)) => Ok([x, y]),
                _ => Err(wrong),
            }
        }
        Some(_) => Err(wrong),
        None => Err(ActionParseError::MissingArgument(key)),
    }
}

fn string(args: &Kwargs, key: &'static str) -> Result<String, ActionParseError> {
    match arg(args, key) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(_) => Err(ActionParseError::WrongType {
            name: key,
            expected: "a string",
        }),
        None => Err(ActionParseError::MissingArgument(key)),
    }
}

fn parse_call(text: &str) -> Result<(String, Kwargs), ActionParseError> {
    let mut p = Parser { src: text, pos: 0 };
    let name = p.ident();
    if name != "do" && name != "finish" {
        let head: String = text.chars().take(24).collect();
        return Err(ActionParseError::UnknownCall(head));
    }
    p.skip_ws();
    p.expect('(')?;
    let mut args = Kwargs::new();
    loop {
        p.skip_ws();
        if p.eat(')') {
            break;
        }
        let key = p.ident();
        if key.is_empty() {
            return Err(p.unexpected());
        }
        p.skip_ws();
        p.expect('=')?;
        let value = p.value()?;
        args.push((key, value));
        p.skip_ws();
        if p.eat(',') {
            continue;
        }
        p.expect(')')?;
        break;
    }
    Ok((name, args))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ActionParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ActionParseError {
        match self.peek() {
            Some(found) => ActionParseError::Unexpected {
                found,
                offset: self.pos,
            },
            None => ActionParseError::UnexpectedEnd,
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn value(&mut self) -> Result<Value, ActionParseError> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.string(q).map(Value::Str)
            }
            Some(open @ ('[' | '(')) => {
                self.bump();
                let close = if open == '[' { ']' } else { ')' };
                self.list(close).map(Value::List)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => match self.ident().as_str() {
                "True" | "true" => Ok(Value::Bool(true)),
                "False" | "false" => Ok(Value::Bool(false)),
                "None" | "null" => Ok(Value::None),
                _ => Err(self.unexpected()),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ActionParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ActionParseError::UnexpectedEnd),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(ActionParseError::UnexpectedEnd),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn list(&mut self, close: char) -> Result<Vec<Value>, ActionParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn number(&mut self) -> Result<Value, ActionParseError> {
        let start = self.pos;
        self.eat('-');
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.bump();
        }
        let raw = &self.src[start..self.pos];
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::Int(i));
        }
        raw.parse::<f64>().map(Value::Float).map_err(|_| {
            ActionParseError::WrongType {
                name: "number",
                expected: "a valid number",
            }
        })
    }
}

/// Incremental thinking extractor for streamed replies.
///
/// Buffers text while its tail could be the start of an action marker and
/// stops emitting once a marker has been seen. A held-back tail that never
/// completes a marker is released only when a later chunk breaks the match;
/// nothing is flushed at end of stream.
#[derive(Debug, Default)]
pub struct ThinkingSplitter {
    buffer: String,
    in_action: bool,
}

impl ThinkingSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed chunk, returning thinking text that is safe to show.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.in_action {
            return None;
        }
        self.buffer.push_str(chunk);

        for marker in ACTION_MARKERS {
            if let Some(pos) = self.buffer.find(marker) {
                let thinking = self.buffer[..pos].to_string();
                self.buffer.clear();
                self.in_action = true;
                return (!thinking.is_empty()).then_some(thinking);
            }
        }

        let partial = ACTION_MARKERS
            .iter()
            .any(|m| (1..m.len()).any(|i| self.buffer.ends_with(&m[..i])));
        if partial || self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}
