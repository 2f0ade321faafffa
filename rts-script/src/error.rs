use std::fmt;
use std::path::PathBuf;

use crate::ctx::Frame;
use crate::pos::Pos;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: Pos,
    pub message: String,
}

impl ParseError {
    pub fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Error reported by an embedding host when it refuses a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HostError {}

#[derive(Debug, Clone)]
pub enum ErrorKind {
    Type(String),
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    UndefinedVariable(String),
    ConstAssign(String),
    UnknownMember {
        type_name: String,
        member: String,
    },
    NotCallable(String),
    DivisionByZero,
    Limit(String),
    ReadOnly(String),
    AliasDefined(String),
    MissingModuleName(PathBuf),
    Regex(String),
    Decode(String),
    Host(String),
    Io {
        path: PathBuf,
        message: String,
    },
    Random(String),
    Fail(String),
    Invalid(String),
    Module {
        path: PathBuf,
        source: Box<ScriptError>,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Type(message) => write!(f, "type error: {message}"),
            ErrorKind::Arity {
                name,
                expected,
                got,
            } => write!(f, "{name}: expected {expected} arguments, got {got}"),
            ErrorKind::UndefinedVariable(name) => write!(f, "undefined variable '{name}'"),
            ErrorKind::ConstAssign(name) => write!(f, "cannot assign to constant '{name}'"),
            ErrorKind::UnknownMember { type_name, member } => {
                write!(f, "unknown member '{member}' on {type_name}")
            }
            ErrorKind::NotCallable(type_name) => {
                write!(f, "value of type {type_name} is not callable")
            }
            ErrorKind::DivisionByZero => write!(f, "division by zero"),
            ErrorKind::Limit(message) => write!(f, "resource limit exceeded: {message}"),
            ErrorKind::ReadOnly(message) => write!(f, "read-only: {message}"),
            ErrorKind::AliasDefined(alias) => write!(f, "alias already defined: {alias}"),
            ErrorKind::MissingModuleName(path) => {
                write!(f, "missing module name in '{}'", path.display())
            }
            ErrorKind::Regex(message) => write!(f, "invalid regex: {message}"),
            ErrorKind::Decode(message) => write!(f, "{message}"),
            ErrorKind::Host(message) => write!(f, "host error: {message}"),
            ErrorKind::Io { path, message } => {
                write!(f, "cannot read '{}': {message}", path.display())
            }
            ErrorKind::Random(message) => write!(f, "{message}"),
            ErrorKind::Fail(message) => write!(f, "fail: {message}"),
            ErrorKind::Invalid(message) => write!(f, "{message}"),
            ErrorKind::Module { path, source } => {
                write!(f, "in module '{}': {source}", path.display())
            }
        }
    }
}

/// Failure raised while evaluating. Natives create errors without a position;
/// the evaluator attaches the call site and the frame chain as the error
/// unwinds.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub pos: Option<Pos>,
    pub frames: Vec<Frame>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            pos: None,
            frames: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type(message.into()))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid(message.into()))
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode(message.into()))
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Limit(message.into()))
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReadOnly(message.into()))
    }

    pub fn host(err: HostError) -> Self {
        Self::new(ErrorKind::Host(err.0))
    }

    /// Attaches `pos` unless a more precise position is already known.
    pub fn at(mut self, pos: &Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos.clone());
        }
        self
    }

    pub fn pos(&self) -> Option<&Pos> {
        self.pos.as_ref()
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{pos}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ErrorKind> for RuntimeError {
    fn from(kind: ErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}

#[derive(Debug, Clone)]
pub enum ScriptError {
    Parse(ParseError),
    Runtime(RuntimeError),
}

impl ScriptError {
    pub fn pos(&self) -> Option<&Pos> {
        match self {
            ScriptError::Parse(err) => Some(&err.pos),
            ScriptError::Runtime(err) => err.pos(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ScriptError::Parse(err) => err.message.clone(),
            ScriptError::Runtime(err) => err.kind.to_string(),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        match self {
            ScriptError::Parse(_) => &[],
            ScriptError::Runtime(err) => &err.frames,
        }
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            ScriptError::Parse(_) => None,
            ScriptError::Runtime(err) => Some(&err.kind),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Parse(err) => write!(f, "{err}"),
            ScriptError::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<ParseError> for ScriptError {
    fn from(value: ParseError) -> Self {
        ScriptError::Parse(value)
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(value: RuntimeError) -> Self {
        ScriptError::Runtime(value)
    }
}
