//! Definition of errors.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

pub type Result<T, E = SparseTcError> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum SparseTcError {
    InvalidConfig(InvalidConfigError),
    InvalidFormat(InvalidFormatError),
    Alignment(AlignmentError),
    UnknownFeature(UnknownFeatureError),
    InvalidModel(InvalidModelError),
    File(FileError),
    UTF8Error(std::string::FromUtf8Error),
    CastError(std::num::TryFromIntError),
    DecodeError(bincode::error::DecodeError),
    EncodeError(bincode::error::EncodeError),
    JsonError(serde_json::Error),
    IOError(std::io::Error),
}

impl SparseTcError {
    pub(crate) fn invalid_config<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidConfig(InvalidConfigError { msg: msg.into() })
    }

    pub(crate) fn invalid_format<S>(source: &Path, line: Option<usize>, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            source: source.to_path_buf(),
            line,
            msg: msg.into(),
        })
    }

    pub(crate) fn misaligned<S>(what: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Alignment(AlignmentError {
            what,
            msg: msg.into(),
        })
    }

    pub(crate) fn count_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::misaligned(what, format!("expected [{expected}] but were [{actual}]"))
    }

    pub(crate) fn unknown_feature<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self::UnknownFeature(UnknownFeatureError { name: name.into() })
    }

    pub(crate) fn invalid_model<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidModel(InvalidModelError { msg: msg.into() })
    }

    pub(crate) fn file<P>(path: P, error: std::io::Error) -> Self
    where
        P: Into<PathBuf>,
    {
        Self::File(FileError {
            path: path.into(),
            error,
        })
    }
}

impl fmt::Display for SparseTcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => e.fmt(f),
            Self::InvalidFormat(e) => e.fmt(f),
            Self::Alignment(e) => e.fmt(f),
            Self::UnknownFeature(e) => e.fmt(f),
            Self::InvalidModel(e) => e.fmt(f),
            Self::File(e) => e.fmt(f),
            Self::UTF8Error(e) => e.fmt(f),
            Self::CastError(e) => e.fmt(f),
            Self::DecodeError(e) => e.fmt(f),
            Self::EncodeError(e) => e.fmt(f),
            Self::JsonError(e) => e.fmt(f),
            Self::IOError(e) => e.fmt(f),
        }
    }
}

impl Error for SparseTcError {}

/// Error used when the configuration cannot be satisfied.
#[derive(Debug)]
pub struct InvalidConfigError {
    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidConfigError: {}", self.msg)
    }
}

impl Error for InvalidConfigError {}

/// Error used when a file or a value cannot be parsed.
#[derive(Debug)]
pub struct InvalidFormatError {
    /// Offending file. `<memory>` for in-memory values.
    pub(crate) source: PathBuf,

    /// 1-based line number, if known.
    pub(crate) line: Option<usize>,

    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "InvalidFormatError: {}:{}: {}",
                self.source.display(),
                line,
                self.msg
            ),
            None => write!(
                f,
                "InvalidFormatError: {}: {}",
                self.source.display(),
                self.msg
            ),
        }
    }
}

impl Error for InvalidFormatError {}

/// Error used when predictions and the data they belong to fall out of step.
#[derive(Debug)]
pub struct AlignmentError {
    /// What was being aligned.
    pub(crate) what: &'static str,

    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for AlignmentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AlignmentError: {}: {}", self.what, self.msg)
    }
}

impl Error for AlignmentError {}

/// Error used when a training-time feature is missing from the feature index.
#[derive(Debug)]
pub struct UnknownFeatureError {
    /// Name of the feature.
    pub(crate) name: String,
}

impl fmt::Display for UnknownFeatureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "UnknownFeatureError: feature [{}] is not in the feature index",
            self.name
        )
    }
}

impl Error for UnknownFeatureError {}

/// Error used when the model is invalid.
#[derive(Debug)]
pub struct InvalidModelError {
    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidModelError: {}", self.msg)
    }
}

impl Error for InvalidModelError {}

/// Error used when an I/O operation on a named file fails.
#[derive(Debug)]
pub struct FileError {
    pub(crate) path: PathBuf,
    pub(crate) error: std::io::Error,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FileError: {}: {}", self.path.display(), self.error)
    }
}

impl Error for FileError {}

impl From<std::string::FromUtf8Error> for SparseTcError {
    fn from(error: std::string::FromUtf8Error) -> Self {
        Self::UTF8Error(error)
    }
}

impl From<std::num::TryFromIntError> for SparseTcError {
    fn from(error: std::num::TryFromIntError) -> Self {
        Self::CastError(error)
    }
}

impl From<bincode::error::DecodeError> for SparseTcError {
    fn from(error: bincode::error::DecodeError) -> Self {
        Self::DecodeError(error)
    }
}

impl From<bincode::error::EncodeError> for SparseTcError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::EncodeError(error)
    }
}

impl From<serde_json::Error> for SparseTcError {
    fn from(error: serde_json::Error) -> Self {
        Self::JsonError(error)
    }
}

impl From<std::io::Error> for SparseTcError {
    fn from(error: std::io::Error) -> Self {
        Self::IOError(error)
    }
}
