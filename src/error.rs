// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

use std::sync::Arc;

use nix::errno::Errno;
use thiserror::Error;

/// Error payload carried by rejected promises.
///
/// Cloneable on purpose: a single rejection fans out to every registered
/// continuation and every awaiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("io_uring setup failed: {0}")]
    RingInit(Errno),

    #[error("{op} failed: {errno}")]
    Io { op: &'static str, errno: Errno },

    #[error("file is not open")]
    NotOpen,

    #[error("socket error: {0}")]
    Socket(Arc<str>),

    #[error("failed to connect: {0}")]
    Connect(Errno),

    #[error("failed to bind: {0}")]
    Bind(Errno),

    #[error("failed to accept: {0}")]
    Accept(Errno),

    /// A user-supplied rejection message.
    #[error("{0}")]
    Msg(Arc<str>),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Msg(message.into().into())
    }

    pub(crate) fn socket(message: impl Into<String>) -> Self {
        Error::Socket(message.into().into())
    }

    /// The OS error code behind this error, if there is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::RingInit(errno)
            | Error::Io { errno, .. }
            | Error::Connect(errno)
            | Error::Bind(errno)
            | Error::Accept(errno) => Some(*errno),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::msg(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::msg(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
