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

//! Taint tracking for strings that cross the trust boundary.
//!
//! Any string that originates outside the trust boundary (message
//! envelopes, network data, files the administrator does not control)
//! is marked [`Taint::Tainted`]. The dispatcher enforces two rules on
//! such strings: a tainted filename is never accepted when opening a
//! backend, and a tainted query sent to a driver with quoting support
//! must have been quoted for that driver.
//!
//! [`Text`] is a borrowed string carrying its marker; [`TextBuf`] is
//! the owned equivalent. Detainting ([`Text::detaint`]) is an explicit
//! operation, performed only once a lookup has validated the string.
//! Quoting provenance is recorded alongside the marker: a string quoted
//! through [`Search::quote`](crate::search::Search::quote) remembers
//! which driver it was quoted for.

use std::fmt;

/// Whether a string originated outside the trust boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Taint {
    /// Trusted: from the configuration or derived from validated data.
    Clean,
    /// Untrusted: from a message, the network, or another outside
    /// source.
    Tainted,
}

/// A borrowed string together with its taint marker and quoting
/// provenance.
#[derive(Clone, Copy, Debug)]
pub struct Text<'a> {
    text: &'a str,
    taint: Taint,
    quoter: Option<usize>,
}

impl<'a> Text<'a> {
    /// Wraps a trusted string.
    pub fn clean(text: &'a str) -> Self {
        Self::new(text, Taint::Clean)
    }

    /// Wraps an untrusted string.
    pub fn tainted(text: &'a str) -> Self {
        Self::new(text, Taint::Tainted)
    }

    /// Wraps a string with the given marker.
    pub fn new(text: &'a str, taint: Taint) -> Self {
        Self {
            text,
            taint,
            quoter: None,
        }
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Returns the taint marker.
    pub fn taint(&self) -> Taint {
        self.taint
    }

    /// Returns whether the string is tainted.
    pub fn is_tainted(&self) -> bool {
        self.taint == Taint::Tainted
    }

    /// Returns the driver this string was quoted for, if any.
    pub fn quoter(&self) -> Option<usize> {
        self.quoter
    }

    /// Removes the taint marker. This must only be done once the
    /// string has been validated, e.g. by a successful lookup.
    pub fn detaint(self) -> Text<'a> {
        Text {
            taint: Taint::Clean,
            ..self
        }
    }

    /// Copies into an owned [`TextBuf`].
    pub fn to_buf(self) -> TextBuf {
        TextBuf {
            text: self.text.to_string(),
            taint: self.taint,
            quoter: self.quoter,
        }
    }
}

impl fmt::Display for Text<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.text)
    }
}

/// An owned string together with its taint marker and quoting
/// provenance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextBuf {
    text: String,
    taint: Taint,
    quoter: Option<usize>,
}

impl TextBuf {
    /// Wraps a trusted string.
    pub fn clean(text: String) -> Self {
        Self {
            text,
            taint: Taint::Clean,
            quoter: None,
        }
    }

    /// Wraps an untrusted string.
    pub fn tainted(text: String) -> Self {
        Self {
            text,
            taint: Taint::Tainted,
            quoter: None,
        }
    }

    /// Wraps a string quoted for the driver at `quoter` in the
    /// registry, preserving the original marker.
    pub fn with_quoter(text: String, taint: Taint, quoter: usize) -> Self {
        Self {
            text,
            taint,
            quoter: Some(quoter),
        }
    }

    /// Borrows as a [`Text`].
    pub fn as_text(&self) -> Text<'_> {
        Text {
            text: &self.text,
            taint: self.taint,
            quoter: self.quoter,
        }
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the taint marker.
    pub fn taint(&self) -> Taint {
        self.taint
    }

    /// Returns whether the string is tainted.
    pub fn is_tainted(&self) -> bool {
        self.taint == Taint::Tainted
    }

    /// Returns the driver this string was quoted for, if any.
    pub fn quoter(&self) -> Option<usize> {
        self.quoter
    }

    /// Unwraps the underlying string, discarding the marker.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for TextBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for TextBuf {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detaint_clears_the_marker() {
        let tainted = Text::tainted("payload");
        assert!(tainted.is_tainted());
        assert!(!tainted.detaint().is_tainted());
    }

    #[test]
    fn quoting_provenance_survives_borrowing() {
        let quoted = TextBuf::with_quoter("it''s".to_string(), Taint::Tainted, 3);
        assert_eq!(quoted.as_text().quoter(), Some(3));
        assert!(quoted.as_text().is_tainted());
    }

    #[test]
    fn to_buf_round_trips() {
        let text = Text::tainted("alice@example.com");
        let buf = text.to_buf();
        assert_eq!(buf.as_str(), "alice@example.com");
        assert_eq!(buf.taint(), Taint::Tainted);
    }
}
