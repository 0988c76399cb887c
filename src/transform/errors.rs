use crate::jvm;
use crate::rewrite;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Class file couldn't be read or written back
    ClassFile(jvm::Error),

    /// A placeholder in a method couldn't be rewritten
    Rewrite {
        class: String,

        /// Method name followed by its descriptor (eg. `main([Ljava/lang/String;)V`)
        method: String,
        error: rewrite::Error,
    },
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::ClassFile(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassFile(err) => write!(f, "bad class file: {:?}", err),
            Error::Rewrite {
                class,
                method,
                error,
            } => write!(f, "in {}.{}: {}", class, method, error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClassFile(_) => None,
            Error::Rewrite { error, .. } => Some(error),
        }
    }
}
