// Copyright 2023 Matthew Ingwersen.
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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum number of non-root labels in a domain name.
const MAX_N_LABELS: usize = 127;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

/// The maximum number of compression pointers we will follow while
/// decoding a single name. Since valid pointers must point strictly
/// backwards, well-formed messages never come close to this.
const MAX_POINTER_FOLLOWS: usize = 64;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A domain name.
///
/// A `Name` owns its labels, stored leftmost first and without the
/// trailing root label. Labels are normalized to ASCII lowercase at
/// construction, so the derived [`PartialEq`] and [`Hash`]
/// implementations give the case-insensitive comparisons that DNS
/// lookups require ([RFC 1035 § 2.3.3]).
///
/// `Name`s can be constructed through the [`FromStr`] implementation
/// (from the conventional dotted presentation form) or decoded from a
/// DNS message with [`Name::parse_wire`], which understands the
/// compressed-label encoding of [RFC 1035 § 4.1.4].
///
/// [RFC 1035 § 2.3.3]: https://datatracker.ietf.org/doc/html/rfc1035#section-2.3.3
/// [RFC 1035 § 4.1.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Name {
    labels: Vec<Box<[u8]>>,
}

impl Name {
    /// Returns the DNS root name `.`.
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Returns whether this `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the number of labels in the `Name`, not counting the
    /// root label. The root name has zero labels.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns label `index`, where label 0 is the leftmost.
    pub fn label(&self, index: usize) -> &[u8] {
        &self.labels[index]
    }

    /// Returns an iterator over the labels, leftmost first.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &[u8]> {
        self.labels.iter().map(Box::as_ref)
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.label_count() >= other.label_count()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns the `Name` produced by removing the first `skip` labels.
    ///
    /// # Panics
    ///
    /// Panics if `skip` exceeds the label count.
    pub fn suffix(&self, skip: usize) -> Name {
        Name {
            labels: self.labels[skip..].to_vec(),
        }
    }

    /// Returns the parent domain of this `Name`, or [`None`] for the
    /// root.
    pub fn parent(&self) -> Option<Name> {
        if self.is_root() {
            None
        } else {
            Some(self.suffix(1))
        }
    }

    /// Returns the length of the uncompressed on-the-wire
    /// representation of the `Name`.
    pub fn wire_len(&self) -> usize {
        1 + self.labels().map(|l| 1 + l.len()).sum::<usize>()
    }

    /// Serializes the `Name` in the uncompressed on-the-wire
    /// representation.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut octets = Vec::with_capacity(self.wire_len());
        for label in self.labels() {
            octets.push(label.len() as u8);
            octets.extend_from_slice(label);
        }
        octets.push(0);
        octets
    }

    /// Decodes a (possibly compressed) domain name starting at
    /// `message[start]`.
    ///
    /// On success, this returns the `Name` and the number of octets the
    /// encoding occupies *at `start`* (that is, up to and including the
    /// null label or the first compression pointer). Pointers must
    /// point strictly backwards; forward pointers and pointer chains
    /// longer than an internal bound are rejected, so decoding always
    /// terminates.
    pub fn parse_wire(message: &[u8], start: usize) -> Result<(Self, usize), Error> {
        let mut labels: ArrayVec<Box<[u8]>, MAX_N_LABELS> = ArrayVec::new();
        let mut wire_len = 1;
        let mut pos = start;
        let mut consumed = None;
        let mut follows = 0;

        loop {
            let octet = *message.get(pos).ok_or(Error::UnexpectedEnd)?;
            if octet == 0 {
                let consumed = consumed.unwrap_or(pos + 1 - start);
                let labels = labels.into_iter().collect();
                return Ok((Self { labels }, consumed));
            } else if octet & 0xc0 == 0xc0 {
                let low = *message.get(pos + 1).ok_or(Error::UnexpectedEnd)?;
                let target = usize::from(octet & 0x3f) << 8 | usize::from(low);
                if consumed.is_none() {
                    consumed = Some(pos + 2 - start);
                }
                if target >= pos {
                    return Err(Error::BadPointer);
                }
                follows += 1;
                if follows > MAX_POINTER_FOLLOWS {
                    return Err(Error::BadPointer);
                }
                pos = target;
            } else if octet & 0xc0 != 0 {
                return Err(Error::ReservedLabelType);
            } else {
                let len = usize::from(octet);
                let label = message
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(Error::UnexpectedEnd)?;
                wire_len += 1 + len;
                if wire_len > MAX_WIRE_LEN {
                    return Err(Error::NameTooLong);
                }
                let mut owned = label.to_vec();
                owned.make_ascii_lowercase();
                labels
                    .try_push(owned.into_boxed_slice())
                    .map_err(|_| Error::TooManyLabels)?;
                pos += 1 + len;
            }
        }
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        if text == "." {
            return Ok(Self::root());
        }
        let text = text.strip_suffix('.').unwrap_or(text);

        let mut labels = Vec::new();
        let mut wire_len = 1;
        for part in text.split('.') {
            if part.is_empty() {
                return Err(Error::EmptyLabel);
            } else if part.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            } else if !part.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(Error::BadCharacter);
            }
            wire_len += 1 + part.len();
            if wire_len > MAX_WIRE_LEN {
                return Err(Error::NameTooLong);
            }
            labels.push(part.to_ascii_lowercase().into_bytes().into_boxed_slice());
        }
        if labels.len() > MAX_N_LABELS {
            return Err(Error::TooManyLabels);
        }
        Ok(Self { labels })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &octet in label {
                // Escape unusual octets as \DDD (RFC 1035 § 5.1).
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{octet:03}")?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error produced when parsing a domain name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    EmptyLabel,
    LabelTooLong,
    NameTooLong,
    TooManyLabels,
    BadCharacter,
    UnexpectedEnd,
    BadPointer,
    ReservedLabelType,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::EmptyLabel => f.write_str("empty label"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("name exceeds 255 octets"),
            Self::TooManyLabels => f.write_str("too many labels"),
            Self::BadCharacter => f.write_str("label contains a forbidden character"),
            Self::UnexpectedEnd => f.write_str("unexpected end of message in name"),
            Self::BadPointer => f.write_str("invalid compression pointer"),
            Self::ReservedLabelType => f.write_str("reserved label type"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn from_str_normalizes_case_and_trailing_dot() {
        assert_eq!(name("WWW.Example.TEST."), name("www.example.test"));
        assert_eq!(name("www.example.test").to_string(), "www.example.test.");
    }

    #[test]
    fn from_str_rejects_bad_labels() {
        assert_eq!("a..b.".parse::<Name>(), Err(Error::EmptyLabel));
        let long = format!("{}.test.", "x".repeat(64));
        assert_eq!(long.parse::<Name>(), Err(Error::LabelTooLong));
    }

    #[test]
    fn root_parses_and_displays() {
        let root = name(".");
        assert!(root.is_root());
        assert_eq!(root.label_count(), 0);
        assert_eq!(root.to_string(), ".");
        assert_eq!(root.to_wire(), vec![0]);
    }

    #[test]
    fn subdomain_relation_works() {
        let apex = name("example.test.");
        assert!(name("example.test.").eq_or_subdomain_of(&apex));
        assert!(name("a.b.example.test.").eq_or_subdomain_of(&apex));
        assert!(!name("example.org.").eq_or_subdomain_of(&apex));
        assert!(!name("test.").eq_or_subdomain_of(&apex));
        assert!(apex.eq_or_subdomain_of(&Name::root()));
    }

    #[test]
    fn suffix_and_parent_work() {
        let full = name("a.b.c.test.");
        assert_eq!(full.suffix(2), name("c.test."));
        assert_eq!(full.parent().unwrap(), name("b.c.test."));
        assert_eq!(name("test.").parent().unwrap(), Name::root());
        assert!(Name::root().parent().is_none());
    }

    #[test]
    fn wire_round_trip() {
        let original = name("ns1.example.test.");
        let wire = original.to_wire();
        assert_eq!(wire.len(), original.wire_len());
        let (decoded, consumed) = Name::parse_wire(&wire, 0).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn parse_wire_follows_pointers() {
        // "example.test." at offset 0, then "www" + pointer to it at
        // offset 14.
        let mut message = Vec::new();
        message.extend_from_slice(b"\x07example\x04test\x00");
        message.extend_from_slice(b"\x03www\xc0\x00");
        let (decoded, consumed) = Name::parse_wire(&message, 14).unwrap();
        assert_eq!(decoded, name("www.example.test."));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn parse_wire_rejects_forward_pointers() {
        // A pointer at offset 0 pointing at itself can never terminate.
        let message = b"\xc0\x00";
        assert_eq!(Name::parse_wire(message, 0), Err(Error::BadPointer));
    }

    #[test]
    fn parse_wire_rejects_truncated_names() {
        let message = b"\x07exam";
        assert_eq!(Name::parse_wire(message, 0), Err(Error::UnexpectedEnd));
    }
}
