// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the [`Error`] type for dispatcher operations.

use std::fmt;

/// Errors that arise while resolving lookup types, opening backends,
/// and finding items.
///
/// A failed lookup is *not* an error: [`Search::find`] returns
/// `Ok(None)` for a miss. [`Error::Defer`] is the case callers most
/// often need to distinguish; it means the backend could not answer
/// just now and the whole operation should be retried later. See
/// [`Error::is_defer`].
///
/// [`Search::find`]: super::Search::find
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The lookup type name is not in the registry.
    UnknownType(String),
    /// The lookup type name is recognized, but its driver is not built
    /// into this binary.
    TypeNotAvailable(String),
    /// The decorated lookup type string does not follow the syntax.
    BadTypeFormat(String),
    /// `partial` was specified for a query-style lookup type.
    PartialNotPermitted(String),
    /// `*` or `*@` was specified for a query-style lookup type.
    DefaultsNotPermitted(String),
    /// A tainted string was passed as a filename.
    TaintedFilename(String),
    /// A tainted query reached a quoting driver without having been
    /// quoted for it, and the policy is strict.
    UnquotedQuery(String),
    /// The driver's open hook failed; the message is the driver's.
    Open(String),
    /// The driver's check hook rejected the opened file; the message
    /// is the driver's.
    Check(String),
    /// The driver could not answer just now; retry later.
    Defer(String),
    /// The handle does not name a live slot (tidy has intervened).
    StaleHandle,
}

impl Error {
    /// Returns whether this error is a defer, i.e. the backend asked
    /// for the lookup to be retried later rather than reporting a
    /// plain failure.
    pub fn is_defer(&self) -> bool {
        matches!(self, Self::Defer(_) | Self::UnquotedQuery(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownType(name) => write!(f, "unknown lookup type \"{}\"", name),
            Self::TypeNotAvailable(name) => write!(
                f,
                "lookup type \"{}\" is not available (not in the binary)",
                name,
            ),
            Self::BadTypeFormat(name) => write!(f, "format error in lookup type \"{}\"", name),
            Self::PartialNotPermitted(name) => write!(
                f,
                "\"partial\" is not permitted for lookup type \"{}\"",
                name,
            ),
            Self::DefaultsNotPermitted(name) => write!(
                f,
                "defaults using \"*\" or \"*@\" are not permitted for lookup type \"{}\"",
                name,
            ),
            Self::TaintedFilename(filename) => {
                write!(f, "tainted filename for search: \"{}\"", filename)
            }
            Self::UnquotedQuery(query) => write!(
                f,
                "tainted search query is not properly quoted: {}",
                query,
            ),
            Self::Open(message) | Self::Check(message) | Self::Defer(message) => {
                f.write_str(message)
            }
            Self::StaleHandle => f.write_str("lookup handle is no longer valid"),
        }
    }
}

impl std::error::Error for Error {}

/// A result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;
