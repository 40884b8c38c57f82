use serde::{Deserialize, Serialize};

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(into = "FormattedEngineError", from = "FormattedEngineError")]
pub struct EngineError {
    pub kind: ErrorKind,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct FormattedEngineError {
    pub kind: ErrorKind,
    pub formatted: String,
}

impl From<EngineError> for FormattedEngineError {
    fn from(other: EngineError) -> Self {
        Self {
            formatted: other.to_string(),
            kind: other.kind,
        }
    }
}

impl From<FormattedEngineError> for EngineError {
    fn from(other: FormattedEngineError) -> Self {
        Self { kind: other.kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Runtime(RuntimeError),
    Operational(OperationalError),
    Compile(CompileError),
}

impl EngineError {
    /// True for errors after which the session's tables can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Operational(_))
            || matches!(
                self.kind,
                ErrorKind::Runtime(RuntimeError::Builtin { .. } | RuntimeError::StackOverflow { .. })
            )
    }
}

impl From<RuntimeError> for EngineError {
    fn from(err: RuntimeError) -> Self {
        Self {
            kind: ErrorKind::Runtime(err),
        }
    }
}

impl From<OperationalError> for EngineError {
    fn from(err: OperationalError) -> Self {
        Self {
            kind: ErrorKind::Operational(err),
        }
    }
}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        Self {
            kind: ErrorKind::Compile(err),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl std::error::Error for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ErrorKind::Runtime(e) => write!(f, "{}", e),
            ErrorKind::Operational(e) => write!(f, "{}", e),
            ErrorKind::Compile(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeError {
    /// The triple store changed underneath an open result iterator.
    ConcurrentModification {
        expected: u64,
        found: u64,
    },
    /// An iterator was advanced after `close()`.
    IteratorClosed,
    StackOverflow {
        msg: String,
    },
    /// A builtin signalled an internal fault (as opposed to simply failing).
    Builtin {
        name: String,
        msg: String,
    },
    /// A fatal error left the session's tables in an unknown state.
    SessionInvalid {
        msg: String,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConcurrentModification { expected, found } => write!(
                f,
                "Concurrent modification: triple store changed from version {} to {} during iteration",
                expected, found
            ),
            Self::IteratorClosed => write!(f, "Iterator already closed"),
            Self::StackOverflow { msg } => write!(f, "Hit a stack limit: {}", msg),
            Self::Builtin { name, msg } => write!(f, "Builtin {} failed: {}", name, msg),
            Self::SessionInvalid { msg } => write!(
                f,
                "Inference session is invalid after an earlier error ({}); reset the engine",
                msg
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalError {
    /// A compiled clause referenced a register, builtin or constant that does not exist.
    MalformedClause { clause: String, msg: String },
    InvalidState(String),
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MalformedClause { clause, msg } => write!(
                f,
                "Internal error in backward rule system, malformed clause {}: {}",
                clause, msg
            ),
            Self::InvalidState(s) => write!(f, "Invalid state: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileError {
    BadHead { rule: String },
    TooComplex { rule: String, msg: String },
    UnknownBuiltin { rule: String, name: String },
    BuiltinArity {
        rule: String,
        name: String,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadHead { rule } => {
                write!(f, "Heads of backward rules must be triple patterns: {}", rule)
            }
            Self::TooComplex { rule, msg } => write!(
                f,
                "Rule too complex for current implementation: {} in {}",
                msg, rule
            ),
            Self::UnknownBuiltin { rule, name } => {
                write!(f, "Unknown builtin operation {} in {}", name, rule)
            }
            Self::BuiltinArity {
                rule,
                name,
                expected,
                found,
            } => write!(
                f,
                "Wrong number of arguments to {} in {}: got {}, expected {}",
                name, rule, found, expected
            ),
        }
    }
}

pub fn invalid_state<T, U>(msg: T) -> EngineResult<U>
where
    T: AsRef<str>,
{
    Err(OperationalError::InvalidState(msg.as_ref().into()).into())
}

pub fn malformed<T, U>(clause: impl fmt::Display, msg: T) -> EngineResult<U>
where
    T: AsRef<str>,
{
    Err(OperationalError::MalformedClause {
        clause: clause.to_string(),
        msg: msg.as_ref().into(),
    }
    .into())
}
