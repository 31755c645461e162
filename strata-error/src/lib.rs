#![feature(error_generic_member_access)]
#![deny(missing_docs)]

//! This crate defines error & result types for Strata.
//! It also contains a variety of useful macros for error handling.

mod ext;

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;
use std::{env, fmt, io};

pub use ext::*;

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("STRATA_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The coarse classification of a [`StrataError`].
///
/// Every failure aborts the whole read; the kind only tells the caller what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A data source could not be read.
    Io,
    /// The encoded data is malformed or inconsistent.
    Format,
    /// The data uses a codec, encoding or page type that is not supported.
    Unsupported,
    /// The memory budget of the read was exhausted.
    Allocation,
    /// The caller passed invalid arguments.
    InvalidArgument,
    /// An internal invariant was violated.
    Internal,
}

/// The top-level error type for Strata.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum StrataError {
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Backtrace),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// The encoded bytes could not be parsed.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidSerde(ErrString, Backtrace),
    /// A feature is not implemented.
    #[error("function {0} not implemented for {1}\nBacktrace:\n{2}")]
    NotImplemented(ErrString, ErrString, Backtrace),
    /// A memory reservation could not be satisfied.
    #[error("failed to allocate {0} bytes, {1} bytes available\nBacktrace:\n{2}")]
    AllocationFailed(usize, usize, Backtrace),
    /// An assertion failed.
    #[error("{0}\nBacktrace:\n{1}")]
    AssertionFailed(ErrString, Backtrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<StrataError>),
    /// A wrapper for shared errors that require cloning.
    #[error(transparent)]
    Shared(Arc<StrataError>),
    /// A wrapper for IO errors.
    #[error("{0}\nBacktrace:\n{1}")]
    IOError(io::Error, Backtrace),
    /// A wrapper for object store errors.
    #[cfg(feature = "object_store")]
    #[error("{0}\nBacktrace:\n{1}")]
    ObjectStore(object_store::Error, Backtrace),
}

impl StrataError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        StrataError::Context(msg.into(), Box::new(self))
    }

    /// Classify the error, looking through context and shared wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Context(_, inner) => inner.kind(),
            StrataError::Shared(inner) => inner.kind(),
            StrataError::IOError(..) => ErrorKind::Io,
            #[cfg(feature = "object_store")]
            StrataError::ObjectStore(..) => ErrorKind::Io,
            StrataError::InvalidSerde(..) => ErrorKind::Format,
            StrataError::NotImplemented(..) => ErrorKind::Unsupported,
            StrataError::AllocationFailed(..) => ErrorKind::Allocation,
            StrataError::InvalidArgument(..) | StrataError::OutOfBounds(..) => {
                ErrorKind::InvalidArgument
            }
            StrataError::AssertionFailed(..) => ErrorKind::Internal,
        }
    }
}

impl Debug for StrataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for StrataError {
    fn from(value: io::Error) -> Self {
        StrataError::IOError(value, Backtrace::capture())
    }
}

impl From<Arc<StrataError>> for StrataError {
    fn from(value: Arc<StrataError>) -> Self {
        StrataError::Shared(value)
    }
}

#[cfg(feature = "object_store")]
impl From<object_store::Error> for StrataError {
    fn from(value: object_store::Error) -> Self {
        StrataError::ObjectStore(value, Backtrace::capture())
    }
}

/// A type alias for Results that return StrataErrors as their error type.
pub type StrataResult<T> = Result<T, StrataError>;

/// A trait for unwrapping a StrataResult.
pub trait StrataUnwrap {
    /// The type of the value being unwrapped.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn strata_unwrap(self) -> Self::Output;
}

impl<T, E> StrataUnwrap for Result<T, E>
where
    E: Into<StrataError>,
{
    type Output = T;

    #[inline(always)]
    fn strata_unwrap(self) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|err| strata_panic!(err))
    }
}

/// A trait for expect-ing a StrataResult or an Option.
pub trait StrataExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn strata_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> StrataExpect for Result<T, E>
where
    E: Into<StrataError>,
{
    type Output = T;

    #[inline(always)]
    fn strata_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| strata_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> StrataExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn strata_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = StrataError::AssertionFailed(msg.to_string().into(), Backtrace::capture());
            strata_panic!(err)
        })
    }
}

/// A convenient macro for creating a StrataError.
#[macro_export]
macro_rules! strata_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::StrataError::OutOfBounds($idx, $start, $stop, Backtrace::capture())
        )
    }};
    (NotImplemented: $func:expr, $by_whom:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::StrataError::NotImplemented($func.into(), format!("{}", $by_whom).into(), Backtrace::capture())
        )
    }};
    (AllocationFailed: $requested:expr, $available:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::StrataError::AllocationFailed($requested, $available, Backtrace::capture())
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::StrataError::Context($msg.into(), Box::new($err))
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::StrataError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::StrataError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::strata_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning a StrataError.
#[macro_export]
macro_rules! strata_bail {
    ($($tt:tt)+) => {
        return Err($crate::strata_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a StrataError in the presence of a programmer error
/// (e.g., an invariant has been violated).
#[macro_export]
macro_rules! strata_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::strata_panic!($crate::strata_err!(OutOfBounds: $idx, $start, $stop))
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::strata_panic!($crate::strata_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::StrataError = $err;
        panic!("{}", err.with_context(format!($fmt, $($arg),*)))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::strata_panic!($crate::strata_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::StrataError = $err;
        panic!("{}", err)
    }};
}

// Not public, referenced by macros only.
#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::StrataError) -> crate::StrataError {
        error
    }
}
