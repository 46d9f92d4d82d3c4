// Copyright (c) Microsoft. All rights reserved.

#[derive(Debug)]
pub enum Error {
    /// The named key does not exist.
    NotFound(String),

    /// A parameter, usually a key handle, has an invalid value.
    InvalidArgument(&'static str, Box<dyn std::error::Error + Send + Sync>),

    /// The caller's buffer cannot hold the output. Nothing was written.
    ///
    /// `required` is the size that would have been needed, if the implementation knows it.
    BufferTooSmall {
        required: Option<usize>,
        capacity: usize,
    },

    /// The key type or signing parameter is not implemented.
    Unsupported(Box<dyn std::error::Error + Send + Sync>),

    /// The underlying key store failed, was denied, or threw.
    PlatformFailure(Box<dyn std::error::Error + Send + Sync>),

    /// No keychain is registered.
    NoActiveKeychain,
}

/// The classification of an [`Error`], without its payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    BufferTooSmall,
    Unsupported,
    PlatformFailure,
    NoActiveKeychain,
}

impl Error {
    pub fn not_found(name: impl Into<String>) -> Self {
        Error::NotFound(name.into())
    }

    pub fn invalid_argument<E>(name: &'static str, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::InvalidArgument(name, err.into())
    }

    pub fn unsupported<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Unsupported(err.into())
    }

    pub fn platform<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::PlatformFailure(err.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(..) => ErrorKind::InvalidArgument,
            Error::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::PlatformFailure(_) => ErrorKind::PlatformFailure,
            Error::NoActiveKeychain => ErrorKind::NoActiveKeychain,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(name) => write!(f, "key {name:?} not found"),
            Error::InvalidArgument(name, err) => {
                write!(f, "parameter {name:?} has an invalid value: {err}")
            }
            Error::BufferTooSmall {
                required: Some(required),
                capacity,
            } => write!(
                f,
                "buffer of {capacity} bytes is too small, {required} bytes are required"
            ),
            Error::BufferTooSmall {
                required: None,
                capacity,
            } => write!(f, "buffer of {capacity} bytes is too small"),
            Error::Unsupported(err) => write!(f, "unsupported: {err}"),
            Error::PlatformFailure(_) => f.write_str("key store operation failed"),
            Error::NoActiveKeychain => f.write_str("no keychain is registered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PlatformFailure(err) => Some(&**err),
            Error::NotFound(_)
            | Error::InvalidArgument(..)
            | Error::BufferTooSmall { .. }
            | Error::Unsupported(_)
            | Error::NoActiveKeychain => None,
        }
    }
}
