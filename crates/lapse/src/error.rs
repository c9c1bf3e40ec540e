// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

/// An error produced by a [`Cache`](crate::Cache).
///
/// Plain lookups, inserts and deletions never fail. Errors come from building a cache with
/// an invalid configuration or from the loader passed to [`Cache::take`](crate::Cache::take).
///
/// The type is cheap to clone so that one failed load can be handed to every caller that
/// waited for it.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The loader passed to [`Cache::take`](crate::Cache::take) returned an error.
    ///
    /// Use [`Error::source_as`] to recover the loader's own error type.
    #[error("fetching the value failed: {0}")]
    Fetch(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The loader passed to [`Cache::take`](crate::Cache::take) panicked.
    #[error("fetching the value panicked")]
    FetchPanicked,

    /// The expiry timing wheel rejected the configured geometry.
    #[error("invalid cache configuration: {0}")]
    Wheel(#[from] lapse_wheel::Error),
}

impl Error {
    pub(crate) fn fetch(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Fetch(Arc::new(source))
    }

    /// Returns the loader's error if this is a [`Fetch`](Self::Fetch) error of type `E`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io;
    ///
    /// use lapse::Cache;
    /// # #[tokio::main(flavor = "current_thread", start_paused = true)]
    /// # async fn main() -> Result<(), lapse::Error> {
    /// let cache = Cache::<&str, u32>::builder(std::time::Duration::from_secs(60)).build()?;
    ///
    /// let error = cache
    ///     .take(&"missing", || async { Err(io::Error::from(io::ErrorKind::NotFound)) })
    ///     .await
    ///     .unwrap_err();
    /// let io_error = error.source_as::<io::Error>().unwrap();
    /// assert_eq!(io_error.kind(), io::ErrorKind::NotFound);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn source_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Fetch(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error as _, fmt, io};

    use super::*;

    #[derive(Debug)]
    struct Unavailable;

    impl fmt::Display for Unavailable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("backend unavailable")
        }
    }

    impl std::error::Error for Unavailable {}

    #[test]
    fn fetch_error_keeps_its_source() {
        let error = Error::fetch(Unavailable);

        assert_eq!(error.to_string(), "fetching the value failed: backend unavailable");
        assert!(error.source_as::<Unavailable>().is_some());
        assert!(error.source_as::<io::Error>().is_none());
        assert_eq!(error.source().map(ToString::to_string).as_deref(), Some("backend unavailable"));
    }

    #[test]
    fn clones_share_the_source() {
        let error = Error::fetch(Unavailable);
        let clone = error.clone();

        match (&error, &clone) {
            (Error::Fetch(a), Error::Fetch(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn other_variants_have_no_fetch_source() {
        assert!(Error::FetchPanicked.source_as::<Unavailable>().is_none());

        let wheel = Error::from(lapse_wheel::Error::InvalidSlots);
        assert!(wheel.source_as::<Unavailable>().is_none());
        assert!(wheel.to_string().starts_with("invalid cache configuration"));
    }
}
