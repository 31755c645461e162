use crate::{ErrString, StrataResult};

/// Extension trait for StrataResult
pub trait ResultExt<T>: private::Sealed {
    /// Flatten a nested [`StrataResult`]. Helper function until <https://github.com/rust-lang/rust/issues/70142> is stabilized.
    fn flatten(self) -> StrataResult<T>;
}

/// Attach context to the error of a [`StrataResult`].
pub trait ContextExt<T> {
    /// Wrap the error, if any, with a lazily built context message.
    fn with_context<F, M>(self, msg: F) -> StrataResult<T>
    where
        F: FnOnce() -> M,
        M: Into<ErrString>;
}

mod private {
    use crate::StrataResult;

    pub trait Sealed {}

    impl<T> Sealed for StrataResult<StrataResult<T>> {}
}

impl<T> ResultExt<T> for StrataResult<StrataResult<T>> {
    fn flatten(self) -> StrataResult<T> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }
}

impl<T> ContextExt<T> for StrataResult<T> {
    fn with_context<F, M>(self, msg: F) -> StrataResult<T>
    where
        F: FnOnce() -> M,
        M: Into<ErrString>,
    {
        self.map_err(|e| e.with_context(msg()))
    }
}
