use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::platform::display_power::PowerAction;

/// An image could not be turned into a display frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to resize {}: {reason}", path.display())]
    Resize { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LocalPath,
    Share,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalPath => f.write_str("local path"),
            Self::Share => f.write_str("network share"),
        }
    }
}

/// A configured image root could not be scanned; its contents are left out
/// of the catalog.
#[derive(Debug, Clone, Error)]
#[error("{kind} {} unavailable: {reason}", root.display())]
pub struct SourceUnavailable {
    pub root: PathBuf,
    pub kind: SourceKind,
    pub reason: String,
}

/// An overlay format string cannot be rendered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {overlay} format {format:?}")]
pub struct FormatError {
    pub overlay: &'static str,
    pub format: String,
}

/// A platform display-power call failed. The power cycle still advances.
#[derive(Debug, Clone, Error)]
#[error("display power {action:?} failed: {detail}")]
pub struct PowerControlError {
    pub action: PowerAction,
    pub detail: String,
}
