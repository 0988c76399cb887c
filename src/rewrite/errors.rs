use std::fmt;

/// Failure to rewrite a placeholder
///
/// Every variant carries the name of the placeholder being rewritten (eg. `invoke`). None of these
/// are recoverable: the instructions around the placeholder don't have the expected shape, and
/// the method is left partially rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An operand of the placeholder could not be found before reaching the start of the method,
    /// the placeholder itself, or another placeholder
    ArgumentNotFound { insertion: String },

    /// Name under the placeholder owner which is not part of the vocabulary
    UnsupportedOperation { insertion: String },

    /// Element of an `indy` argument array isn't one of the known argument wrappers
    MalformedArgumentKind { insertion: String, kind: String },

    /// Opcode enum member which isn't known, or which is the wrong sort of opcode for where it
    /// is used (eg. a handle kind passed to `invoke`)
    UnknownOpcodeTag { insertion: String, member: String },
}

impl Error {
    /// Name of the placeholder which failed to be rewritten
    pub fn insertion(&self) -> &str {
        match self {
            Error::ArgumentNotFound { insertion }
            | Error::UnsupportedOperation { insertion }
            | Error::MalformedArgumentKind { insertion, .. }
            | Error::UnknownOpcodeTag { insertion, .. } => insertion,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ArgumentNotFound { insertion } => {
                write!(f, "argument of `{}` not found", insertion)
            }
            Error::UnsupportedOperation { insertion } => {
                write!(f, "unsupported placeholder operation `{}`", insertion)
            }
            Error::MalformedArgumentKind { insertion, kind } => {
                write!(f, "malformed `{}` argument: {}", insertion, kind)
            }
            Error::UnknownOpcodeTag { insertion, member } => {
                write!(f, "opcode `{}` cannot be used by `{}`", member, insertion)
            }
        }
    }
}

impl std::error::Error for Error {}
