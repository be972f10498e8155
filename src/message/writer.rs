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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::collections::HashMap;
use std::fmt;

use super::constants::*;
use super::{Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::Name;
use crate::rr::{RecordData, Rrset, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer that serializes a DNS message into it.
///
/// A `Writer` is constructed with [`Writer::new`], giving the
/// underlying buffer and a message size limit (for UDP responses, the
/// classic 512-octet limit; for TCP, up to 65,535 octets). The message
/// header is initially zeroed, and header fields can be set at any time
/// through the appropriate methods.
///
/// Questions and resource records are written sequentially into the
/// buffer based on a cursor, so the section methods must be used in
/// message order (question, answer, authority, additional); using them
/// out of order fails with [`Error::OutOfOrder`]. Each `add_*` call is
/// atomic: if the record (or the whole RRset) does not fit within the
/// limit, the call fails with [`Error::Truncation`] and the message is
/// left exactly as it was.
///
/// Owner names are compressed against previously written names per
/// [RFC 1035 § 4.1.4]; names inside RDATA are written uncompressed.
/// When everything has been added, [`Writer::finish`] fills in the
/// section counts and returns the message length.
///
/// [RFC 1035 § 4.1.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
pub struct Writer<'a> {
    octets: &'a mut [u8],
    cursor: usize,
    limit: usize,
    section: Section,
    body_start: usize,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
    compress: HashMap<Vec<u8>, u16>,
}

/// A type for recording which section of a DNS message a [`Writer`] is
/// currently serializing.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl<'a> Writer<'a> {
    /// Creates a new `Writer` from the underlying buffer `octets`. The
    /// message size is limited to `limit` or `octets.len()` (whichever
    /// is smaller). If the smaller limit is too small to hold a full
    /// DNS message header of 12 octets, then this will fail.
    pub fn new(octets: &'a mut [u8], limit: usize) -> Result<Self> {
        let limit = limit.min(octets.len());
        if limit < HEADER_SIZE {
            return Err(Error::Truncation);
        }
        octets[0..HEADER_SIZE].fill(0);
        Ok(Self {
            octets,
            cursor: HEADER_SIZE,
            limit,
            section: Section::Question,
            body_start: HEADER_SIZE,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
            compress: HashMap::new(),
        })
    }

    ////////////////////////////////////////////////////////////////////
    // HEADER FIELDS                                                  //
    ////////////////////////////////////////////////////////////////////

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        self.octets[ID_START..ID_END].copy_from_slice(&id.to_be_bytes());
    }

    /// Sets or clears the QR (query response) bit.
    pub fn set_qr(&mut self, qr: bool) {
        self.set_flag(QR_BYTE, QR_MASK, qr);
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.octets[OPCODE_BYTE] &= !OPCODE_MASK;
        self.octets[OPCODE_BYTE] |= u8::from(opcode) << OPCODE_SHIFT;
    }

    /// Sets or clears the AA (authoritative answer) bit.
    pub fn set_aa(&mut self, aa: bool) {
        self.set_flag(AA_BYTE, AA_MASK, aa);
    }

    /// Sets or clears the TC (truncation) bit.
    pub fn set_tc(&mut self, tc: bool) {
        self.set_flag(TC_BYTE, TC_MASK, tc);
    }

    /// Sets or clears the RD (recursion desired) bit.
    pub fn set_rd(&mut self, rd: bool) {
        self.set_flag(RD_BYTE, RD_MASK, rd);
    }

    /// Sets the RCODE of the message.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.octets[RCODE_BYTE] &= !RCODE_MASK;
        self.octets[RCODE_BYTE] |= u8::from(rcode);
    }

    /// Returns the RCODE currently set in the message.
    pub fn rcode(&self) -> Rcode {
        (self.octets[RCODE_BYTE] & RCODE_MASK).try_into().unwrap()
    }

    fn set_flag(&mut self, byte: usize, mask: u8, value: bool) {
        if value {
            self.octets[byte] |= mask;
        } else {
            self.octets[byte] &= !mask;
        }
    }

    ////////////////////////////////////////////////////////////////////
    // QUESTIONS AND RESOURCE RECORDS                                 //
    ////////////////////////////////////////////////////////////////////

    /// Adds a [`Question`] to the message.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if self.section != Section::Question {
            return Err(Error::OutOfOrder);
        }
        let saved = self.cursor;
        let result = self.write_name(&question.qname).and_then(|()| {
            self.write_u16(question.qtype.into())?;
            self.write_u16(question.qclass.into())
        });
        match result {
            Ok(()) => {
                self.qdcount += 1;
                self.body_start = self.cursor;
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    /// Adds a single resource record to the answer section.
    pub fn add_answer_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        ttl: Ttl,
        data: &RecordData,
    ) -> Result<()> {
        self.add_rr_impl(Section::Answer, owner, rr_type, ttl, data)
    }

    /// Adds a whole RRset to the answer section.
    pub fn add_answer_rrset(&mut self, owner: &Name, rrset: &Rrset) -> Result<()> {
        self.add_rrset_impl(Section::Answer, owner, rrset)
    }

    /// Adds a single resource record to the authority section.
    pub fn add_authority_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        ttl: Ttl,
        data: &RecordData,
    ) -> Result<()> {
        self.add_rr_impl(Section::Authority, owner, rr_type, ttl, data)
    }

    /// Adds a whole RRset to the authority section.
    pub fn add_authority_rrset(&mut self, owner: &Name, rrset: &Rrset) -> Result<()> {
        self.add_rrset_impl(Section::Authority, owner, rrset)
    }

    /// Adds a whole RRset to the additional section.
    pub fn add_additional_rrset(&mut self, owner: &Name, rrset: &Rrset) -> Result<()> {
        self.add_rrset_impl(Section::Additional, owner, rrset)
    }

    /// Removes all resource records from the message, leaving the
    /// header and question section intact. This is used to produce
    /// truncated and error responses.
    pub fn clear_rrs(&mut self) {
        self.cursor = self.body_start;
        self.ancount = 0;
        self.nscount = 0;
        self.arcount = 0;
        self.section = Section::Answer;
        let body_start = self.body_start;
        self.compress.retain(|_, &mut off| (off as usize) < body_start);
    }

    /// Finishes the message, filling in the section counts. Returns the
    /// length of the message.
    pub fn finish(self) -> usize {
        self.octets[QDCOUNT_START..QDCOUNT_END].copy_from_slice(&self.qdcount.to_be_bytes());
        self.octets[ANCOUNT_START..ANCOUNT_END].copy_from_slice(&self.ancount.to_be_bytes());
        self.octets[NSCOUNT_START..NSCOUNT_END].copy_from_slice(&self.nscount.to_be_bytes());
        self.octets[ARCOUNT_START..ARCOUNT_END].copy_from_slice(&self.arcount.to_be_bytes());
        self.cursor
    }

    ////////////////////////////////////////////////////////////////////
    // INTERNALS                                                      //
    ////////////////////////////////////////////////////////////////////

    fn add_rr_impl(
        &mut self,
        section: Section,
        owner: &Name,
        rr_type: Type,
        ttl: Ttl,
        data: &RecordData,
    ) -> Result<()> {
        self.advance_section(section)?;
        let saved = self.cursor;
        match self.write_rr(owner, rr_type, ttl, data) {
            Ok(()) => {
                self.bump_count(section, 1);
                Ok(())
            }
            Err(e) => {
                self.rollback(saved);
                Err(e)
            }
        }
    }

    fn add_rrset_impl(&mut self, section: Section, owner: &Name, rrset: &Rrset) -> Result<()> {
        self.advance_section(section)?;
        let saved = self.cursor;
        let mut written = 0;
        for data in rrset.datas() {
            match self.write_rr(owner, rrset.rr_type, rrset.ttl, data) {
                Ok(()) => written += 1,
                Err(e) => {
                    self.rollback(saved);
                    return Err(e);
                }
            }
        }
        self.bump_count(section, written);
        Ok(())
    }

    fn write_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        ttl: Ttl,
        data: &RecordData,
    ) -> Result<()> {
        self.write_name(owner)?;
        self.write_u16(rr_type.into())?;
        self.write_u16(Class::IN.into())?;
        self.write_u32(ttl.into())?;
        let rdata = data.to_wire();
        self.write_u16(rdata.len() as u16)?;
        self.write_octets(&rdata)
    }

    /// Writes a domain name, compressing against previously written
    /// names. The longest matching suffix already in the message is
    /// replaced by a pointer; any labels written out are registered for
    /// future compression.
    fn write_name(&mut self, name: &Name) -> Result<()> {
        let n = name.label_count();
        for skip in 0..n {
            if let Some(&offset) = self.compress.get(&suffix_wire(name, skip)) {
                for index in 0..skip {
                    self.write_label(name, index)?;
                }
                return self.write_u16(0xc000 | offset);
            }
        }
        for index in 0..n {
            self.write_label(name, index)?;
        }
        self.write_u8(0)
    }

    fn write_label(&mut self, name: &Name, index: usize) -> Result<()> {
        if self.cursor <= 0x3fff {
            let offset = self.cursor as u16;
            self.compress.entry(suffix_wire(name, index)).or_insert(offset);
        }
        let label = name.label(index);
        self.write_u8(label.len() as u8)?;
        self.write_octets(label)
    }

    fn advance_section(&mut self, target: Section) -> Result<()> {
        if target < self.section {
            return Err(Error::OutOfOrder);
        }
        self.section = target;
        Ok(())
    }

    fn bump_count(&mut self, section: Section, by: u16) {
        match section {
            Section::Question => self.qdcount += by,
            Section::Answer => self.ancount += by,
            Section::Authority => self.nscount += by,
            Section::Additional => self.arcount += by,
        }
    }

    /// Rewinds the cursor to `saved` and drops compression entries that
    /// point into the discarded region.
    fn rollback(&mut self, saved: usize) {
        self.cursor = saved;
        self.compress.retain(|_, &mut off| (off as usize) < saved);
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_octets(&[value])
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_octets(&value.to_be_bytes())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_octets(&value.to_be_bytes())
    }

    fn write_octets(&mut self, bytes: &[u8]) -> Result<()> {
        if self.cursor + bytes.len() > self.limit {
            return Err(Error::Truncation);
        }
        self.octets[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        Ok(())
    }
}

/// Returns the uncompressed wire encoding of `name` with its first
/// `skip` labels removed. Used as the key of the compression map.
fn suffix_wire(name: &Name, skip: usize) -> Vec<u8> {
    let mut key = Vec::new();
    for index in skip..name.label_count() {
        let label = name.label(index);
        key.push(label.len() as u8);
        key.extend_from_slice(label);
    }
    key.push(0);
    key
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error produced while writing a DNS message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The message would exceed the size limit.
    Truncation,

    /// Sections were written out of order.
    OutOfOrder,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Truncation => f.write_str("message exceeds the size limit"),
            Self::OutOfOrder => f.write_str("message sections written out of order"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
