// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A specialized `Result` type for timing wheel construction.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned when a [`TimingWheel`](crate::TimingWheel) cannot be built.
///
/// Construction is the only fallible step: once the wheel runs, scheduling calls
/// never fail and invalid requests are silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tick interval was zero.
    #[error("timing wheel tick interval must be greater than zero")]
    InvalidInterval,

    /// The wheel was configured without any slots.
    #[error("timing wheel must have at least one slot")]
    InvalidSlots,

    /// The wheel was created outside of a Tokio runtime, so its loop could not be spawned.
    #[error("timing wheel must be created from within a Tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_invalid_parameter() {
        assert!(Error::InvalidInterval.to_string().contains("interval"));
        assert!(Error::InvalidSlots.to_string().contains("slot"));
        assert!(Error::NoRuntime.to_string().contains("runtime"));
    }
}
