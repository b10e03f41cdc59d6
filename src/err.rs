use std::fmt;

use remindee_script::{ParseError, ValueError};

/// Engine-wide error taxonomy.  Statement handlers print these with a
/// `filename(line):` prefix and carry on with the next line; only I/O
/// failures on the initial file abort a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Parse(ParseError),
    Value(ValueError),
    UndefinedVariable(String),
    UndefinedFunction(String),
    RecursiveCall(String),
    WrongArgCount(String),
    ExpressionDisabled,
    TimeExceeded,
    RunDisabled,
    CantComputeTrigger,
    TooManyAttempts,
    Expired,
    BadDate,
    DateOutOfRange,
    RepNeedsFullDate,
    DurationNeedsAt,
    TooManyLocalOmits,
    TooManyOmits,
    OmitBoundsExceeded,
    IfNestingTooDeep,
    ElseWithoutIf,
    EndifWithoutIf,
    PopWithoutPush,
    NestedIncludeTooDeep,
    CantOpen(String),
    CantAccess(String),
    LineTooLong,
    ReadOnlySysVar(String),
    UnknownSysVar(String),
    SysVarOutOfRange(String),
    BadSysVarType(String),
    CantCoerce,
    TimezoneConversion(String),
    ExitRequested(i32),
    BadCommandLineArg(String),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Parse(ref err) => write!(f, "{}", err),
            Self::Value(ref err) => write!(f, "{}", err),
            Self::UndefinedVariable(ref name) => {
                write!(f, "Undefined variable '{}'", name)
            }
            Self::UndefinedFunction(ref name) => {
                write!(f, "Undefined function '{}'", name)
            }
            Self::RecursiveCall(ref name) => {
                write!(f, "Recursive call to '{}' detected", name)
            }
            Self::WrongArgCount(ref name) => {
                write!(f, "Wrong number of arguments to '{}'", name)
            }
            Self::ExpressionDisabled => {
                write!(f, "Expression evaluation is disabled")
            }
            Self::TimeExceeded => {
                write!(f, "Expression evaluation time limit exceeded")
            }
            Self::RunDisabled => write!(f, "RUN is disabled"),
            Self::CantComputeTrigger => write!(f, "Can't compute trigger"),
            Self::TooManyAttempts => {
                write!(f, "Too many attempts to compute trigger")
            }
            Self::Expired => write!(f, "Expired"),
            Self::BadDate => write!(f, "Bad date specification"),
            Self::DateOutOfRange => write!(f, "Date out of range"),
            Self::RepNeedsFullDate => {
                write!(f, "Repeat needs a fully-specified date")
            }
            Self::DurationNeedsAt => write!(f, "DURATION needs AT"),
            Self::TooManyLocalOmits => {
                write!(f, "Too many local OMITs - every day omitted")
            }
            Self::TooManyOmits => write!(f, "Too many full OMITs"),
            Self::OmitBoundsExceeded => write!(f, "Too many partial OMITs"),
            Self::IfNestingTooDeep => write!(f, "IF nested too deeply"),
            Self::ElseWithoutIf => write!(f, "ELSE with no matching IF"),
            Self::EndifWithoutIf => write!(f, "ENDIF with no matching IF"),
            Self::PopWithoutPush => write!(f, "POP without matching PUSH"),
            Self::NestedIncludeTooDeep => {
                write!(f, "INCLUDE nested too deeply")
            }
            Self::CantOpen(ref path) => {
                write!(f, "Can't open file '{}'", path)
            }
            Self::CantAccess(ref path) => {
                write!(f, "Can't access file '{}'", path)
            }
            Self::LineTooLong => write!(f, "Line too long"),
            Self::ReadOnlySysVar(ref name) => {
                write!(f, "System variable ${} is read-only", name)
            }
            Self::UnknownSysVar(ref name) => {
                write!(f, "Unknown system variable ${}", name)
            }
            Self::SysVarOutOfRange(ref name) => {
                write!(f, "Value out of range for ${}", name)
            }
            Self::BadSysVarType(ref name) => {
                write!(f, "Wrong value type for ${}", name)
            }
            Self::CantCoerce => write!(f, "Can't coerce"),
            Self::TimezoneConversion(ref tz) => {
                write!(f, "Can't convert timezone '{}'", tz)
            }
            Self::ExitRequested(code) => {
                write!(f, "Exit requested with code {}", code)
            }
            Self::BadCommandLineArg(ref arg) => {
                write!(f, "Bad command-line argument '{}'", arg)
            }
            Self::Other(ref msg) => write!(f, "{}", msg),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<ValueError> for Error {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::DateOutOfRange => Self::DateOutOfRange,
            other => Self::Value(other),
        }
    }
}
