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

//! Typed record data for the RR types scenario fixtures may carry.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::name::{self, Name};

use super::Type;

////////////////////////////////////////////////////////////////////////
// RECORD DATA                                                        //
////////////////////////////////////////////////////////////////////////

/// The RDATA of a DNS resource record, as a closed tagged variant with
/// one payload shape per supported RR type.
///
/// Both the wire serialization ([`RecordData::to_wire`]) and the wire
/// parser ([`RecordData::read`]) match exhaustively over this
/// enumeration, so a newly added record kind cannot be forgotten in
/// either path. Payload layouts follow [RFC 1035 § 3.3] (and
/// [RFC 3596] for AAAA).
///
/// A deliberately malformed fixture — say, two SPF TXT records, or a
/// CNAME co-located with an A record — is represented *faithfully* at
/// this layer; nothing here validates the semantics of what a zone
/// holds.
///
/// [RFC 1035 § 3.3]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.3
/// [RFC 3596]: https://datatracker.ietf.org/doc/html/rfc3596
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    /// One or more character-strings. Multi-string TXT records are
    /// intentionally representable: splitting an SPF policy across
    /// strings is one of the misconfigurations fixtures encode.
    Txt(Vec<Box<[u8]>>),
    Soa {
        mname: Name,
        rname: Name,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
}

impl RecordData {
    /// Returns the RR [`Type`] this payload belongs to.
    pub fn rr_type(&self) -> Type {
        match self {
            Self::A(_) => Type::A,
            Self::Aaaa(_) => Type::AAAA,
            Self::Ns(_) => Type::NS,
            Self::Cname(_) => Type::CNAME,
            Self::Ptr(_) => Type::PTR,
            Self::Mx { .. } => Type::MX,
            Self::Txt(_) => Type::TXT,
            Self::Soa { .. } => Type::SOA,
        }
    }

    /// Serializes the RDATA in its on-the-wire representation.
    ///
    /// Domain names embedded in RDATA are always written uncompressed,
    /// so the output is independent of the containing message.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::A(addr) => addr.octets().to_vec(),
            Self::Aaaa(addr) => addr.octets().to_vec(),
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) => name.to_wire(),
            Self::Mx {
                preference,
                exchange,
            } => {
                let mut octets = preference.to_be_bytes().to_vec();
                octets.extend_from_slice(&exchange.to_wire());
                octets
            }
            Self::Txt(strings) => {
                let mut octets = Vec::new();
                for string in strings {
                    debug_assert!(string.len() <= 255);
                    octets.push(string.len() as u8);
                    octets.extend_from_slice(string);
                }
                octets
            }
            Self::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                let mut octets = mname.to_wire();
                octets.extend_from_slice(&rname.to_wire());
                for field in [serial, refresh, retry, expire, minimum] {
                    octets.extend_from_slice(&field.to_be_bytes());
                }
                octets
            }
        }
    }

    /// Parses RDATA of type `rr_type` occupying
    /// `message[start..start + rdlength]`.
    ///
    /// The whole message is provided so that compressed domain names
    /// within RDATA (legal for the RFC 1035 types) can be followed.
    pub fn read(
        rr_type: Type,
        message: &[u8],
        start: usize,
        rdlength: usize,
    ) -> Result<Self, ReadRdataError> {
        let end = start + rdlength;
        let region = message
            .get(start..end)
            .ok_or(ReadRdataError::UnexpectedEom)?;
        match rr_type {
            Type::A => {
                let octets: [u8; 4] = region.try_into().or(Err(ReadRdataError::BadLength))?;
                Ok(Self::A(octets.into()))
            }
            Type::AAAA => {
                let octets: [u8; 16] = region.try_into().or(Err(ReadRdataError::BadLength))?;
                Ok(Self::Aaaa(octets.into()))
            }
            Type::NS | Type::CNAME | Type::PTR => {
                let (name, consumed) = Name::parse_wire(message, start)?;
                if consumed != rdlength {
                    return Err(ReadRdataError::BadLength);
                }
                Ok(match rr_type {
                    Type::NS => Self::Ns(name),
                    Type::CNAME => Self::Cname(name),
                    _ => Self::Ptr(name),
                })
            }
            Type::MX => {
                let preference_octets: [u8; 2] = region
                    .get(0..2)
                    .ok_or(ReadRdataError::BadLength)?
                    .try_into()
                    .unwrap();
                let (exchange, consumed) = Name::parse_wire(message, start + 2)?;
                if 2 + consumed != rdlength {
                    return Err(ReadRdataError::BadLength);
                }
                Ok(Self::Mx {
                    preference: u16::from_be_bytes(preference_octets),
                    exchange,
                })
            }
            Type::TXT => {
                let mut strings = Vec::new();
                let mut pos = 0;
                while pos < region.len() {
                    let len = usize::from(region[pos]);
                    let string = region
                        .get(pos + 1..pos + 1 + len)
                        .ok_or(ReadRdataError::BadLength)?;
                    strings.push(string.to_vec().into_boxed_slice());
                    pos += 1 + len;
                }
                if strings.is_empty() {
                    return Err(ReadRdataError::EmptyTxt);
                }
                Ok(Self::Txt(strings))
            }
            Type::SOA => {
                let (mname, mname_len) = Name::parse_wire(message, start)?;
                let (rname, rname_len) = Name::parse_wire(message, start + mname_len)?;
                let fixed_start = start + mname_len + rname_len;
                if fixed_start + 20 != end {
                    return Err(ReadRdataError::BadLength);
                }
                let fixed = &message[fixed_start..fixed_start + 20];
                let field = |i: usize| {
                    let octets: [u8; 4] = fixed[i * 4..i * 4 + 4].try_into().unwrap();
                    u32::from_be_bytes(octets)
                };
                Ok(Self::Soa {
                    mname,
                    rname,
                    serial: field(0),
                    refresh: field(1),
                    retry: field(2),
                    expire: field(3),
                    minimum: field(4),
                })
            }
            other => Err(ReadRdataError::UnsupportedType(other)),
        }
    }

    /// Returns the character-strings of a TXT record, or [`None`] for
    /// other kinds.
    pub fn txt_segments(&self) -> Option<&[Box<[u8]>]> {
        match self {
            Self::Txt(strings) => Some(strings),
            _ => None,
        }
    }

    /// Returns the concatenated text of a TXT record (the form SPF
    /// evaluators see, per [RFC 7208 § 3.3]), or [`None`] for other
    /// kinds. Non-UTF-8 octets are replaced.
    ///
    /// [RFC 7208 § 3.3]: https://datatracker.ietf.org/doc/html/rfc7208#section-3.3
    pub fn txt_text(&self) -> Option<String> {
        self.txt_segments().map(|strings| {
            strings
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect::<Vec<_>>()
                .concat()
        })
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that RDATA could not be parsed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadRdataError {
    UnexpectedEom,
    BadLength,
    EmptyTxt,
    InvalidName(name::Error),
    UnsupportedType(Type),
}

impl From<name::Error> for ReadRdataError {
    fn from(err: name::Error) -> Self {
        Self::InvalidName(err)
    }
}

impl fmt::Display for ReadRdataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UnexpectedEom => f.write_str("unexpected end of message in RDATA"),
            Self::BadLength => f.write_str("RDLENGTH does not match the RDATA content"),
            Self::EmptyTxt => f.write_str("TXT RDATA contains no character-strings"),
            Self::InvalidName(err) => write!(f, "invalid name in RDATA: {err}"),
            Self::UnsupportedType(rr_type) => write!(f, "unsupported RR type {rr_type}"),
        }
    }
}

impl std::error::Error for ReadRdataError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn samples() -> Vec<RecordData> {
        vec![
            RecordData::A("192.0.2.1".parse().unwrap()),
            RecordData::Aaaa("2001:db8::1".parse().unwrap()),
            RecordData::Ns(name("ns1.example.test.")),
            RecordData::Cname(name("target.example.test.")),
            RecordData::Ptr(name("host.example.test.")),
            RecordData::Mx {
                preference: 10,
                exchange: name("mail.example.test."),
            },
            RecordData::Txt(vec![
                b"v=spf1 include:_spf.example.net".to_vec().into_boxed_slice(),
                b" -all".to_vec().into_boxed_slice(),
            ]),
            RecordData::Soa {
                mname: name("ns1.example.test."),
                rname: name("admin.example.test."),
                serial: 1,
                refresh: 3600,
                retry: 600,
                expire: 86400,
                minimum: 300,
            },
        ]
    }

    #[test]
    fn wire_round_trip_preserves_every_kind() {
        for original in samples() {
            let wire = original.to_wire();
            let parsed =
                RecordData::read(original.rr_type(), &wire, 0, wire.len()).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn read_rejects_bad_address_lengths() {
        assert_eq!(
            RecordData::read(Type::A, b"\x7f\x00\x00", 0, 3),
            Err(ReadRdataError::BadLength),
        );
    }

    #[test]
    fn read_rejects_unsupported_types() {
        assert_eq!(
            RecordData::read(Type::from(41), b"", 0, 0),
            Err(ReadRdataError::UnsupportedType(Type::from(41))),
        );
    }

    #[test]
    fn txt_text_concatenates_character_strings() {
        let txt = RecordData::Txt(vec![
            b"v=spf1".to_vec().into_boxed_slice(),
            b" -all".to_vec().into_boxed_slice(),
        ]);
        assert_eq!(txt.txt_text().unwrap(), "v=spf1 -all");
    }
}
