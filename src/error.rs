use std::fmt;

use crate::render::RenderError;

/// Stable error categories for presentation-layer retry affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    Validation,
    Render,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Render => "render",
            ErrorKind::NotFound => "not-found",
        })
    }
}

/// Failures surfaced by the loaders. None of them are ever cached.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not load {resource}: {message}")]
    Network { resource: String, message: String },

    #[error("{resource} is not valid JSON: {message}")]
    Parse { resource: String, message: String },

    #[error("{resource} is invalid: {}", .problems.join("; "))]
    Validation {
        resource: String,
        problems: Vec<String>,
    },

    #[error("could not render {resource}: {source}")]
    Render {
        resource: String,
        #[source]
        source: RenderError,
    },

    #[error("no lesson with slug {slug:?} in the manifest")]
    UnknownLesson { slug: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Render { .. } => ErrorKind::Render,
            Error::UnknownLesson { .. } => ErrorKind::NotFound,
        }
    }

    /// The resource the failure concerns (manifest path, lesson title or slug).
    pub fn resource(&self) -> &str {
        match self {
            Error::Network { resource, .. }
            | Error::Parse { resource, .. }
            | Error::Validation { resource, .. }
            | Error::Render { resource, .. } => resource,
            Error::UnknownLesson { slug } => slug,
        }
    }

    pub fn network(resource: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Network {
            resource: resource.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a load that may be superseded or cancelled.
///
/// Cancellation is an expected outcome rather than an error: the caller
/// observes nothing and nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<T> {
    Ready(T),
    Cancelled,
}

impl<T> Loaded<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Loaded::Ready(value) => Some(value),
            Loaded::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Loaded::Cancelled)
    }
}
