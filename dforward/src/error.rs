// Copyright 2024 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! This module provides the universal error type used in the library. The error type uses `thiserror`.

pub use crate::upstreams::UpstreamError;
use domain::base::{name::PushError, octets::ParseError, ShortBuf};
use thiserror::Error;

/// A shorthand for returning library errors.
pub type Result<T> = std::result::Result<T, ForwardError>;

/// ForwardError enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Error related to the upstream dispatcher.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// I/O error from listeners.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The message buffer was too short during reconstruction.
    #[error(transparent)]
    ShortBuf(#[from] ShortBuf),

    /// A record or option failed to parse during reconstruction.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A domain name could not be rebuilt.
    #[error(transparent)]
    Push(#[from] PushError),

    /// `start` was called while the proxy was already running.
    #[error("the proxy has already been started")]
    AlreadyRunning,

    /// `stop` was called while the proxy was not running.
    #[error("the proxy is not running")]
    NotRunning,
}
