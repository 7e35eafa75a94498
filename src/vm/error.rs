use std::fmt;

/// Structured runtime-error causes. Every variant carries exactly the data
/// its message format needs; the embedding API condenses these down to the
/// closed `Status` set from `spec.md` §6.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    BadArg(String),
    BadCompare,
    StackOverflow,
    FrameOverflow,
    ArgcMismatch { name: String, expected: u8, got: usize },
    ArgcMin { name: String, expected: u8, got: usize },
    BadBinop { op: &'static str },
    UndefinedProperty(String),
    BadPropertyAccess,
    BadInherit,
    FixedAssign(String),
    UndefinedGlobal(String),
    GlobalRedef(String),
    BadDisplay,
    NotCallable(&'static str),
    /// VM-internal invariant violations (bad OVERLOAD slot, malformed
    /// bytecode offset) -- should never surface from well-formed programs.
    Internal(String),
}

impl ErrorKind {
    pub fn message(&self) -> String {
        match self {
            ErrorKind::BadArg(msg) => msg.clone(),
            ErrorKind::BadCompare => "operands must be numbers".to_string(),
            ErrorKind::StackOverflow => "stack overflow".to_string(),
            ErrorKind::FrameOverflow => "call frame overflow".to_string(),
            ErrorKind::ArgcMismatch { name, expected, got } => {
                format!("'{name}' expects {expected} argument(s), got {got}")
            }
            ErrorKind::ArgcMin { name, expected, got } => {
                format!("'{name}' expects at least {expected} argument(s), got {got}")
            }
            ErrorKind::BadBinop { op } => format!("operands must be numbers for '{op}'"),
            ErrorKind::UndefinedProperty(name) => format!("undefined property '{name}'"),
            ErrorKind::BadPropertyAccess => "only instances have properties".to_string(),
            ErrorKind::BadInherit => "superclass must be a class".to_string(),
            ErrorKind::FixedAssign(name) => format!("'{name}' is fixed and cannot be reassigned"),
            ErrorKind::UndefinedGlobal(name) => format!("undefined variable '{name}'"),
            ErrorKind::GlobalRedef(name) => format!("global '{name}' is already declared"),
            ErrorKind::BadDisplay => "__display__ must return a string".to_string(),
            ErrorKind::NotCallable(type_name) => format!("tried calling non-callable value of type '{type_name}'"),
            ErrorKind::Internal(msg) => msg.clone(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ErrorKind::BadArg(_) => Status::BadArg,
            ErrorKind::BadCompare => Status::BadCompare,
            ErrorKind::StackOverflow => Status::StackOverflow,
            ErrorKind::FrameOverflow => Status::FrameOverflow,
            ErrorKind::ArgcMismatch { .. } => Status::ArgcMismatch,
            ErrorKind::ArgcMin { .. } => Status::ArgcMin,
            ErrorKind::BadBinop { .. } => Status::BadBinop,
            ErrorKind::UndefinedProperty(_) => Status::UndefinedProperty,
            ErrorKind::BadPropertyAccess => Status::BadPropertyAccess,
            ErrorKind::BadInherit => Status::BadInherit,
            ErrorKind::FixedAssign(_) => Status::FixedAssign,
            ErrorKind::UndefinedGlobal(_) => Status::UndefinedGlobal,
            ErrorKind::GlobalRedef(_) => Status::GlobalRedef,
            ErrorKind::BadDisplay => Status::BadDisplay,
            ErrorKind::NotCallable(_) => Status::NotCallable,
            ErrorKind::Internal(_) => Status::BadArg,
        }
    }
}

/// The closed status set the embedding API surfaces from `pcall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadArg,
    BadCompare,
    StackOverflow,
    FrameOverflow,
    ArgcMismatch,
    ArgcMin,
    BadBinop,
    UndefinedProperty,
    BadPropertyAccess,
    BadInherit,
    FixedAssign,
    UndefinedGlobal,
    GlobalRedef,
    BadDisplay,
    NotCallable,
}

/// One line of a printed stack trace: the enclosing script-or-function name
/// and the source line active in that frame when the error was raised.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct VMError {
    pub kind: ErrorKind,
    /// Innermost frame first, matching the trace's printed order.
    pub stack_trace: Vec<TraceFrame>,
}

impl VMError {
    pub fn status(&self) -> Status {
        self.kind.status()
    }
}

impl fmt::Display for VMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Skooma: [runtime error]")?;
        writeln!(f, "{}", self.kind.message())?;
        for frame in &self.stack_trace {
            let where_ = if frame.name == "script" { "script".to_string() } else { format!("{}()", frame.name) };
            writeln!(f, "Skooma: ['{}' on line {}] in {}", frame.name, frame.line, where_)?;
        }
        Ok(())
    }
}

impl std::error::Error for VMError {}
