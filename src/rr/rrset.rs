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

//! Implementation of RRset-related data structures.

use std::fmt;

use super::{RecordData, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// RRSETS                                                             //
////////////////////////////////////////////////////////////////////////

/// A resource record set.
///
/// [RFC 2181 § 5] defines an RRset as a group of records with the same
/// owner, class, and type, and stipulates that all records in an RRset
/// have the same TTL. Since DNS data is looked up and served through
/// RRsets, zone nodes store records grouped this way. The owner is not
/// stored in the structure itself; it is kept track of by the node that
/// owns the [`RrsetList`].
///
/// [RFC 2181 § 5]: https://datatracker.ietf.org/doc/html/rfc2181#section-5
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rrset {
    pub rr_type: Type,
    pub ttl: Ttl,
    datas: Vec<RecordData>,
}

impl Rrset {
    /// Creates a new `Rrset` with the given RR type and TTL. It will
    /// initially contain no record data.
    pub fn new(rr_type: Type, ttl: Ttl) -> Self {
        Self {
            rr_type,
            ttl,
            datas: Vec::new(),
        }
    }

    /// Adds a [`RecordData`] to this `Rrset`. Following the behavior of
    /// other nameservers, data already present in the `Rrset` is
    /// silently discarded.
    pub fn push(&mut self, data: RecordData) {
        debug_assert_eq!(data.rr_type(), self.rr_type);
        if !self.datas.contains(&data) {
            self.datas.push(data);
        }
    }

    /// Returns an iterator over the [`RecordData`] of this `Rrset`, in
    /// insertion order.
    pub fn datas(&self) -> impl Iterator<Item = &RecordData> {
        self.datas.iter()
    }

    /// Returns the number of records in this `Rrset`.
    pub fn len(&self) -> usize {
        self.datas.len()
    }

    /// Returns whether this `Rrset` holds no records.
    pub fn is_empty(&self) -> bool {
        self.datas.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// RRSET LISTS                                                        //
////////////////////////////////////////////////////////////////////////

/// A data structure to contain all of the [`Rrset`]s of various
/// [`Type`]s at a node in the DNS tree hierarchy. Individual records
/// are added using [`RrsetList::add`]; the various [`Rrset`]s are
/// constructed and managed internally.
///
/// An `RrsetList` will happily hold a CNAME next to other types at the
/// same node. That configuration is invalid in a real zone, and that is
/// precisely why fixtures need to express it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RrsetList {
    rrsets: Vec<Rrset>,
}

impl RrsetList {
    /// Creates a new, empty `RrsetList`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to the `RrsetList`, creating a new [`Rrset`] if
    /// none of the record's type exists yet.
    ///
    /// This fails if the record's TTL does not match the TTL of
    /// existing records of the same type (RFC 2181 § 5.2).
    pub fn add(&mut self, ttl: Ttl, data: RecordData) -> Result<(), RrsetListAddError> {
        let rr_type = data.rr_type();
        match self.rrsets.iter_mut().find(|rrset| rrset.rr_type == rr_type) {
            Some(rrset) => {
                if rrset.ttl != ttl {
                    return Err(RrsetListAddError::TtlMismatch);
                }
                rrset.push(data);
            }
            None => {
                let mut rrset = Rrset::new(rr_type, ttl);
                rrset.push(data);
                self.rrsets.push(rrset);
            }
        }
        Ok(())
    }

    /// Looks up the [`Rrset`] of the given type.
    pub fn lookup(&self, rr_type: Type) -> Option<&Rrset> {
        self.rrsets.iter().find(|rrset| rrset.rr_type == rr_type)
    }

    /// Returns an iterator over the [`Rrset`]s, in the order their
    /// types first appeared.
    pub fn iter(&self) -> impl Iterator<Item = &Rrset> {
        self.rrsets.iter()
    }

    /// Returns whether the list contains no RRsets.
    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error returned by [`RrsetList::add`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RrsetListAddError {
    TtlMismatch,
}

impl fmt::Display for RrsetListAddError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::TtlMismatch => f.write_str(
                "the record's TTL does not match the TTL of existing records in the same RRset",
            ),
        }
    }
}

impl std::error::Error for RrsetListAddError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn a(last_octet: u8) -> RecordData {
        RecordData::A([192, 0, 2, last_octet].into())
    }

    #[test]
    fn add_groups_records_into_rrsets() {
        let mut list = RrsetList::new();
        list.add(Ttl::from(300), a(1)).unwrap();
        list.add(Ttl::from(300), a(2)).unwrap();
        list.add(Ttl::from(300), RecordData::Cname("x.test.".parse().unwrap()))
            .unwrap();
        let a_rrset = list.lookup(Type::A).unwrap();
        assert_eq!(a_rrset.len(), 2);
        assert!(list.lookup(Type::CNAME).is_some());
        assert!(list.lookup(Type::MX).is_none());
    }

    #[test]
    fn add_rejects_mismatched_ttls() {
        let mut list = RrsetList::new();
        list.add(Ttl::from(300), a(1)).unwrap();
        assert_eq!(
            list.add(Ttl::from(600), a(2)),
            Err(RrsetListAddError::TtlMismatch),
        );
    }

    #[test]
    fn duplicate_data_is_discarded() {
        let mut list = RrsetList::new();
        list.add(Ttl::from(300), a(1)).unwrap();
        list.add(Ttl::from(300), a(1)).unwrap();
        assert_eq!(list.lookup(Type::A).unwrap().len(), 1);
    }
}
