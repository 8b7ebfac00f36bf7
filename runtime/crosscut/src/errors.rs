//! Errors raised while registering receivers and binding exports.
//!
//! Every variant is a contract violation detected eagerly, before any wrapped
//! function runs (or, for [`CrosscutError::TypeMismatch`] and undeclared
//! names passed to a [`Frame`](crate::Frame), at the offending call). None of
//! them are retryable.
//!
//! Failures of a receiver's default producer are deliberately absent: they
//! reach the lookup caller as the receiver's own error type `E`, untouched.

use thiserror::Error;

/// A registration, binding or frame-access contract violation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CrosscutError {
    /// A default producer was declared with parameters.
    #[error("receivers can't take arguments: `{function}` declares {arity} parameter(s)")]
    Contract { function: String, arity: usize },

    /// A name is neither a parameter nor a local of the function.
    #[error("`{function}` has no local variable or argument '{name}'")]
    UnknownName { function: String, name: String },

    /// An export target was not produced by receiver registration.
    #[error("not a crosscut receiver: {target}")]
    NotAReceiver { target: String },

    /// Two names of one export mapping target the same receiver.
    #[error("{receiver} is already exported by '{existing}' in `{function}`; cannot also export it as '{name}'")]
    DuplicateExport {
        receiver: String,
        function: String,
        existing: String,
        name: String,
    },

    /// A value bound to an exported name has a different type than the
    /// receiver it is exported to.
    #[error("'{name}' in `{function}` is exported to {receiver} as `{expected}`, got `{found}`")]
    TypeMismatch {
        function: String,
        name: String,
        receiver: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A later export layer feeds a name to a receiver whose value type
    /// differs from that of a receiver an earlier layer feeds it to.
    #[error("'{name}' in `{function}` is already exported to {existing} as `{expected}`; {receiver} expects `{found}`")]
    ConflictingExport {
        function: String,
        name: String,
        existing: String,
        expected: &'static str,
        receiver: String,
        found: &'static str,
    },
}

impl CrosscutError {
    pub(crate) fn unknown_name(function: &str, name: &str) -> Self {
        CrosscutError::UnknownName {
            function: function.to_owned(),
            name: name.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests;
