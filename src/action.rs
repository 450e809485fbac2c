//! Action templates such as `do(action="Tap", element="B3")`.
//!
//! Templates are parsed once into [`Action`]; nothing downstream looks at the
//! raw text again. Only a single call with literal keyword arguments is
//! accepted, anything else is a parse error.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Text the oracle emits when it considers the task done.
pub const FINISH_SENTINEL: &str = "Finish";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Tap,
    #[serde(rename = "Double Tap")]
    DoubleTap,
    #[serde(rename = "Long Press")]
    LongPress,
    Type,
    Swipe,
    Launch,
    Back,
    Home,
    Wait,
    #[serde(rename = "Take_over")]
    TakeOver,
    Note,
    #[serde(rename = "Call_API")]
    CallApi,
    Interact,
    Finish,
    /// A canned multi-step skill; never produced by the template parser.
    Skill,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Tap => "Tap",
            ActionKind::DoubleTap => "Double Tap",
            ActionKind::LongPress => "Long Press",
            ActionKind::Type => "Type",
            ActionKind::Swipe => "Swipe",
            ActionKind::Launch => "Launch",
            ActionKind::Back => "Back",
            ActionKind::Home => "Home",
            ActionKind::Wait => "Wait",
            ActionKind::TakeOver => "Take_over",
            ActionKind::Note => "Note",
            ActionKind::CallApi => "Call_API",
            ActionKind::Interact => "Interact",
            ActionKind::Finish => "Finish",
            ActionKind::Skill => "Skill",
        }
    }

    fn from_name(raw: &str) -> Option<Self> {
        let kind = match raw.trim() {
            "Tap" | "Click" => ActionKind::Tap,
            "Double Tap" => ActionKind::DoubleTap,
            "Long Press" => ActionKind::LongPress,
            "Type" | "Type_Name" => ActionKind::Type,
            "Swipe" => ActionKind::Swipe,
            "Launch" => ActionKind::Launch,
            "Back" => ActionKind::Back,
            "Home" => ActionKind::Home,
            "Wait" => ActionKind::Wait,
            "Take_over" => ActionKind::TakeOver,
            "Note" => ActionKind::Note,
            "Call_API" => ActionKind::CallApi,
            "Interact" => ActionKind::Interact,
            "Finish" => ActionKind::Finish,
            _ => return None,
        };
        Some(kind)
    }
}

/// Where an action lands: a symbolic id from a rendered element list, or a
/// concrete screen point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementRef {
    Symbolic(String),
    Point { x: i32, y: i32 },
    /// Any other literal, kept as written. Nothing can resolve it.
    Unbound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDistance {
    Short,
    #[default]
    Medium,
    Long,
}

impl SwipeDistance {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeDistance::Short => "short",
            SwipeDistance::Medium => "medium",
            SwipeDistance::Long => "long",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Tap { element: Option<ElementRef> },
    DoubleTap { element: Option<ElementRef> },
    LongPress { element: Option<ElementRef> },
    Type { text: String, element: Option<ElementRef> },
    Swipe {
        element: Option<ElementRef>,
        direction: SwipeDirection,
        distance: SwipeDistance,
    },
    Launch { app: String },
    Back,
    Home,
    Wait { seconds: f64 },
    TakeOver { message: String },
    Note { message: String },
    CallApi { instruction: String },
    Interact,
    Finish { message: Option<String> },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Tap { .. } => ActionKind::Tap,
            Action::DoubleTap { .. } => ActionKind::DoubleTap,
            Action::LongPress { .. } => ActionKind::LongPress,
            Action::Type { .. } => ActionKind::Type,
            Action::Swipe { .. } => ActionKind::Swipe,
            Action::Launch { .. } => ActionKind::Launch,
            Action::Back => ActionKind::Back,
            Action::Home => ActionKind::Home,
            Action::Wait { .. } => ActionKind::Wait,
            Action::TakeOver { .. } => ActionKind::TakeOver,
            Action::Note { .. } => ActionKind::Note,
            Action::CallApi { .. } => ActionKind::CallApi,
            Action::Interact => ActionKind::Interact,
            Action::Finish { .. } => ActionKind::Finish,
        }
    }

    pub fn element(&self) -> Option<&ElementRef> {
        match self {
            Action::Tap { element }
            | Action::DoubleTap { element }
            | Action::LongPress { element }
            | Action::Type { element, .. }
            | Action::Swipe { element, .. } => element.as_ref(),
            _ => None,
        }
    }

    pub fn set_element(&mut self, target: ElementRef) {
        match self {
            Action::Tap { element }
            | Action::DoubleTap { element }
            | Action::LongPress { element }
            | Action::Type { element, .. }
            | Action::Swipe { element, .. } => *element = Some(target),
            _ => {}
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// Short human-readable form, used in history entries and logs.
    pub fn describe(&self) -> String {
        let target = match self.element() {
            Some(ElementRef::Symbolic(id)) => format!(" {}", id),
            Some(ElementRef::Point { x, y }) => format!(" ({}, {})", x, y),
            Some(ElementRef::Unbound(raw)) => format!(" {}", raw),
            None => String::new(),
        };
        match self {
            Action::Type { text, .. } => format!("Type '{}'{}", text, target),
            Action::Swipe { direction, distance, .. } => {
                format!("Swipe {} {}{}", direction.as_str(), distance.as_str(), target)
            }
            Action::Launch { app } => format!("Launch {}", app),
            Action::Wait { seconds } => format!("Wait {}s", seconds),
            Action::Finish { message: Some(m) } => format!("Finish: {}", m),
            other => format!("{}{}", other.kind().as_str(), target),
        }
    }
}

pub fn is_finish_sentinel(template: &str) -> bool {
    template.trim() == FINISH_SENTINEL
}

/// Parse `do(...)` / `finish(...)` into an [`Action`].
pub fn parse_template(template: &str) -> Result<Action> {
    let call = LiteralParser::new(template).parse_call()?;
    let kwargs = Kwargs(call.kwargs);

    match call.name.as_str() {
        "finish" => Ok(Action::Finish {
            message: kwargs.opt_string("message")?,
        }),
        "do" => {
            let name = kwargs
                .opt_string("action")?
                .ok_or_else(|| parse_err("do() requires an 'action' argument"))?;
            let kind = ActionKind::from_name(&name)
                .ok_or_else(|| parse_err(format!("unknown action '{}'", name)))?;
            build_action(kind, &kwargs)
        }
        other => Err(parse_err(format!("unknown call '{}'", other))),
    }
}

fn build_action(kind: ActionKind, kw: &Kwargs) -> Result<Action> {
    let action = match kind {
        ActionKind::Tap => Action::Tap { element: kw.element()? },
        ActionKind::DoubleTap => Action::DoubleTap { element: kw.element()? },
        ActionKind::LongPress => Action::LongPress { element: kw.element()? },
        ActionKind::Type => Action::Type {
            text: kw.opt_string("text")?.unwrap_or_default(),
            element: kw.element()?,
        },
        ActionKind::Swipe => {
            let raw = kw
                .opt_string("direction")?
                .ok_or_else(|| parse_err("Swipe requires 'direction'"))?;
            let direction = match raw.to_lowercase().as_str() {
                "up" => SwipeDirection::Up,
                "down" => SwipeDirection::Down,
                "left" => SwipeDirection::Left,
                "right" => SwipeDirection::Right,
                other => return Err(parse_err(format!("invalid swipe direction '{}'", other))),
            };
            let distance = match kw.opt_string("dist")?.or(kw.opt_string("distance")?) {
                None => SwipeDistance::Medium,
                Some(d) => match d.to_lowercase().as_str() {
                    "short" => SwipeDistance::Short,
                    "medium" => SwipeDistance::Medium,
                    "long" => SwipeDistance::Long,
                    other => return Err(parse_err(format!("invalid swipe distance '{}'", other))),
                },
            };
            Action::Swipe {
                element: kw.element()?,
                direction,
                distance,
            }
        }
        ActionKind::Launch => Action::Launch {
            app: kw
                .opt_string("app")?
                .ok_or_else(|| parse_err("Launch requires 'app'"))?,
        },
        ActionKind::Back => Action::Back,
        ActionKind::Home => Action::Home,
        ActionKind::Wait => Action::Wait {
            seconds: kw.duration_seconds()?,
        },
        ActionKind::TakeOver => Action::TakeOver {
            message: kw
                .opt_string("message")?
                .unwrap_or_else(|| "User intervention required".to_string()),
        },
        ActionKind::Note => Action::Note {
            message: kw.opt_string("message")?.unwrap_or_default(),
        },
        ActionKind::CallApi => Action::CallApi {
            instruction: kw.opt_string("instruction")?.unwrap_or_default(),
        },
        ActionKind::Interact => Action::Interact,
        ActionKind::Finish => Action::Finish {
            message: kw.opt_string("message")?,
        },
        ActionKind::Skill => return Err(parse_err("skills cannot be expressed as templates")),
    };
    Ok(action)
}

fn parse_err(msg: impl Into<String>) -> EngineError {
    EngineError::Parse(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Literal>),
}

impl Literal {
    fn is_numeric(&self) -> bool {
        matches!(self, Literal::Int(_) | Literal::Float(_))
    }

    fn render(&self) -> String {
        match self {
            Literal::Str(s) => format!("{:?}", s),
            Literal::Int(n) => n.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
            Literal::None => "None".to_string(),
            Literal::List(items) => {
                let inner: Vec<String> = items.iter().map(Literal::render).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

struct Call {
    name: String,
    kwargs: Vec<(String, Literal)>,
}

struct Kwargs(Vec<(String, Literal)>);

impl Kwargs {
    fn get(&self, key: &str) -> Option<&Literal> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None | Some(Literal::None) => Ok(None),
            Some(Literal::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(parse_err(format!("'{}' must be a string, got {:?}", key, other))),
        }
    }

    fn element(&self) -> Result<Option<ElementRef>> {
        match self.get("element") {
            None | Some(Literal::None) => Ok(None),
            Some(Literal::Str(id)) => Ok(Some(ElementRef::Symbolic(id.clone()))),
            Some(Literal::List(items)) if items.len() == 2 && items.iter().all(Literal::is_numeric) => {
                let x = literal_to_i32(&items[0])?;
                let y = literal_to_i32(&items[1])?;
                Ok(Some(ElementRef::Point { x, y }))
            }
            Some(other) => Ok(Some(ElementRef::Unbound(other.render()))),
        }
    }

    fn duration_seconds(&self) -> Result<f64> {
        match self.get("duration") {
            None | Some(Literal::None) => Ok(1.0),
            Some(Literal::Int(n)) => Ok(*n as f64),
            Some(Literal::Float(f)) => Ok(*f),
            Some(Literal::Str(s)) => Ok(s.replace("seconds", "").trim().parse::<f64>().unwrap_or(1.0)),
            Some(other) => Err(parse_err(format!("'duration' has unsupported value {:?}", other))),
        }
    }
}

fn literal_to_i32(lit: &Literal) -> Result<i32> {
    match lit {
        Literal::Int(n) => i32::try_from(*n).map_err(|_| parse_err("coordinate out of range")),
        Literal::Float(f) => Ok(*f as i32),
        other => Err(parse_err(format!("coordinate must be numeric, got {:?}", other))),
    }
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.trim().chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(parse_err(format!("expected '{}' at {}, found '{}'", want, self.pos - 1, c))),
            None => Err(parse_err(format!("expected '{}', found end of input", want))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(parse_err(format!("expected identifier at {}", start)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_call(mut self) -> Result<Call> {
        let name = self.ident()?;
        self.skip_ws();
        self.expect('(')?;

        let mut kwargs: Vec<(String, Literal)> = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.pos += 1;
                break;
            }
            let key = self
                .ident()
                .map_err(|_| parse_err("only keyword arguments are supported"))?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.literal()?;
            if kwargs.iter().any(|(k, _)| *k == key) {
                return Err(parse_err(format!("duplicate keyword '{}'", key)));
            }
            kwargs.push((key, value));
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(parse_err(format!("unexpected '{}' in argument list", c))),
                None => return Err(parse_err("unterminated argument list")),
            }
        }

        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(parse_err("trailing input after action call"));
        }
        Ok(Call { name, kwargs })
    }

    fn literal(&mut self) -> Result<Literal> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.string(q)
            }
            Some(open @ ('[' | '(')) => {
                self.pos += 1;
                let close = if open == '[' { ']' } else { ')' };
                self.list(close)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() => match self.ident()?.as_str() {
                "True" => Ok(Literal::Bool(true)),
                "False" => Ok(Literal::Bool(false)),
                "None" => Ok(Literal::None),
                other => Err(parse_err(format!("'{}' is not a literal", other))),
            },
            Some(c) => Err(parse_err(format!("unexpected '{}' where a literal was expected", c))),
            None => Err(parse_err("missing value")),
        }
    }

    fn string(&mut self, quote: char) -> Result<Literal> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(parse_err("unterminated string literal")),
                Some(c) if c == quote => return Ok(Literal::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(parse_err("unterminated string literal")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn list(&mut self, close: char) -> Result<Literal> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Literal::List(items));
            }
            items.push(self.literal()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Literal::List(items)),
                _ => return Err(parse_err("malformed list literal")),
            }
        }
    }

    fn number(&mut self) -> Result<Literal> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_')) {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(Literal::Int(n));
        }
        raw.parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| parse_err(format!("invalid number '{}'", raw)))
    }
}
