use core::fmt;
use std::io;

use subpython_alloc::MemoryError;

use crate::config::ConfigError;

pub type RtResult<T> = Result<T, Exception>;

/// The class of a language-level exception
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    MemoryError,
    /// An evaluator failure not attributable to user code
    Internal,
}
impl ExceptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::NameError => "NameError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::MemoryError => "MemoryError",
            Self::Internal => "<internal>",
        }
    }
}
impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exception raised by the value layer, carried as a plain value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
}
impl Exception {
    pub fn new<S: Into<String>>(kind: ExceptionKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn name_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::NameError, message)
    }

    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn index_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn key_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::KeyError, message)
    }

    pub fn syntax_error<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::SyntaxError, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ExceptionKind::Internal, message)
    }
}
impl From<io::Error> for Exception {
    fn from(err: io::Error) -> Self {
        Self::internal(err.to_string())
    }
}
impl From<MemoryError> for Exception {
    fn from(err: MemoryError) -> Self {
        Self::new(ExceptionKind::MemoryError, err.to_string())
    }
}

/// Errors which can occur while bringing up a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("invalid heap configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to allocate the runtime singletons: {0}")]
    Memory(#[from] MemoryError),
}

/// The exception channel shared between the evaluator and the value layer.
///
/// At most one exception is pending at a time; raising a new one replaces
/// whatever was there before.
#[derive(Debug, Default)]
pub struct Exceptions {
    current: Option<Exception>,
}
impl Exceptions {
    pub fn set(&mut self, exception: Exception) {
        log::trace!(target: "exceptions", "raised {}", &exception);
        self.current = Some(exception);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.current = None;
    }

    #[inline]
    pub fn occurred(&self) -> bool {
        self.current.is_some()
    }

    #[inline]
    pub fn current(&self) -> Option<&Exception> {
        self.current.as_ref()
    }

    /// Removes and returns the pending exception, if any
    #[inline]
    pub fn take(&mut self) -> Option<Exception> {
        self.current.take()
    }

    /// Writes the pending exception as `Kind: message`, if there is one
    pub fn print<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match self.current {
            Some(ref exception) => writeln!(out, "{}", exception),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn memory_errors_keep_the_allocator_message() {
        let exception = Exception::from(MemoryError {
            requested: 56,
            used: 208,
        });
        assert_eq!(exception.kind, ExceptionKind::MemoryError);
        assert_eq!(
            exception.to_string(),
            "MemoryError: cannot service request of size 56 with 208 bytes allocated"
        );
    }

    #[test]
    fn the_channel_holds_the_latest_exception() {
        let mut exceptions = Exceptions::default();
        assert!(!exceptions.occurred());

        exceptions.set(Exception::type_error("list indices must be integers"));
        exceptions.set(Exception::index_error("list index out of bounds"));
        assert!(exceptions.occurred());

        let mut out = Vec::new();
        exceptions.print(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "IndexError: list index out of bounds\n"
        );

        let taken = exceptions.take().unwrap();
        assert_eq!(taken.kind, ExceptionKind::IndexError);
        assert!(!exceptions.occurred());

        exceptions.set(Exception::name_error("name 'x' is not defined"));
        exceptions.clear();
        assert_eq!(exceptions.current(), None);
    }
}
