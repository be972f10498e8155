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

//! Implementation of DNS zone data structures, for keeping fixture
//! zones loaded in memory.

use std::collections::HashMap;

use crate::name::Name;
use crate::rr::{RecordData, Rrset, RrsetList, Ttl};

mod delegation;
mod error;
mod lookup;
mod store;
pub use delegation::{DelegationEdge, DelegationGraph, DelegationMismatch};
pub use error::Error;
pub use lookup::{Cname, Found, FoundAll, LookupAllResult, LookupResult, Referral};
pub use store::ZoneStore;

/// A DNS zone loaded into memory.
///
/// The most important part of a `Zone` is its tree of `Node`s, which
/// own RRsets. [`Zone::lookup`] and related methods allow the zone's
/// data to be queried according to the algorithm specified by
/// [RFC 1034 § 4.3.2]; the `lookup` module provides the implementation.
///
/// `Zone`s are constructed with [`Zone::new`], which provides an empty
/// structure, and subsequent calls to [`Zone::add`], which adds
/// resource records one at a time, zone-file style. A `Zone` is a
/// faithful container for whatever a scenario fixture dictates:
/// semantically broken content (a CNAME next to an A record, duplicate
/// SPF TXT records) is stored and served exactly as written.
///
/// [RFC 1034 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc1034#section-4.3.2
#[derive(Debug, Eq, PartialEq)]
pub struct Zone {
    origin: Name,
    serial: u32,
    apex: Node,
}

/// A node in the DNS tree, which may own RRsets.
#[derive(Debug, Eq, PartialEq)]
struct Node {
    name: Name,
    rrsets: RrsetList,
    children: HashMap<Box<[u8]>, Node>,
}

impl Node {
    fn new(name: Name) -> Self {
        Self {
            name,
            rrsets: RrsetList::new(),
            children: HashMap::new(),
        }
    }

    /// Gets or creates a descendant node corresponding to `name`. Any
    /// nodes between the target descendant node and `self` will also be
    /// created. `remaining` gives how many labels of `name` lie below
    /// `self`.
    fn get_or_create_descendant(&mut self, name: &Name, remaining: usize) -> &mut Node {
        if remaining == 0 {
            self
        } else {
            let index = remaining - 1;
            let label: Box<[u8]> = name.label(index).to_vec().into_boxed_slice();
            let child_name = name.suffix(index);
            self.children
                .entry(label)
                .or_insert_with(|| Node::new(child_name))
                .get_or_create_descendant(name, remaining - 1)
        }
    }
}

impl Zone {
    /// Creates a new `Zone` with the specified origin and serial. The
    /// zone is initially empty.
    pub fn new(origin: Name, serial: u32) -> Self {
        let apex = Node::new(origin.clone());
        Self {
            origin,
            serial,
            apex,
        }
    }

    /// Returns the zone's origin (apex) name.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Returns the zone's serial.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Adds a record to the `Zone`.
    ///
    /// Records are added in a "flat" manner, one by one, as they appear
    /// in a fixture; the implementation organizes them into RRsets
    /// attached to `Node`s mirroring the conceptual DNS tree.
    ///
    /// This fails if the owner is not at or below the zone origin, or
    /// if the record's TTL does not match other records in its RRset.
    /// Those are *structural* failures; semantic misconfigurations are
    /// accepted by design.
    pub fn add(&mut self, owner: &Name, ttl: Ttl, data: RecordData) -> Result<(), Error> {
        if !owner.eq_or_subdomain_of(&self.origin) {
            return Err(Error::NotInZone);
        }
        let remaining = owner.label_count() - self.origin.label_count();
        let node = self.apex.get_or_create_descendant(owner, remaining);
        node.rrsets.add(ttl, data).map_err(Into::into)
    }

    /// Calls `f` for every RRset in the zone, with its owner name. The
    /// visit order is unspecified.
    pub fn for_each_rrset<F>(&self, f: &mut F)
    where
        F: FnMut(&Name, &Rrset),
    {
        fn visit<F>(node: &Node, f: &mut F)
        where
            F: FnMut(&Name, &Rrset),
        {
            for rrset in node.rrsets.iter() {
                f(&node.name, rrset);
            }
            for child in node.children.values() {
                visit(child, f);
            }
        }
        visit(&self.apex, f);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::Type;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn localhost() -> RecordData {
        RecordData::A([127, 0, 0, 1].into())
    }

    #[test]
    fn add_rejects_owner_outside_of_zone() {
        let mut zone = Zone::new(name("pitfall.test."), 1);
        assert_eq!(
            zone.add(&name("other.test."), Ttl::from(3600), localhost()),
            Err(Error::NotInZone),
        );
    }

    #[test]
    fn add_rejects_mismatched_ttl() {
        let mut zone = Zone::new(name("pitfall.test."), 1);
        let owner = name("pitfall.test.");
        zone.add(&owner, Ttl::from(3600), localhost()).unwrap();
        assert_eq!(
            zone.add(&owner, Ttl::from(7200), RecordData::A([127, 0, 0, 2].into())),
            Err(Error::TtlMismatch),
        );
    }

    #[test]
    fn add_works() {
        // This test is designed to exercise both Zone::add and the
        // underlying Node::get_or_create_descendant method.
        let owner = name("a.b.c.d.");
        let mut zone = Zone::new(name("d."), 1);
        zone.add(&owner, Ttl::from(3600), localhost()).unwrap();

        let c_node = zone.apex.children.get(b"c".as_slice()).unwrap();
        let b_node = c_node.children.get(b"b".as_slice()).unwrap();
        let a_node = b_node.children.get(b"a".as_slice()).unwrap();
        assert_eq!(a_node.name, owner);
        assert_eq!(a_node.children.len(), 0);
        assert_eq!(a_node.rrsets.iter().next().unwrap().rr_type, Type::A);

        // Make sure that Node::get_or_create_descendant now finds
        // existing nodes, rather than creating new ones.
        let found = zone.apex.get_or_create_descendant(&owner, 3);
        assert_eq!(found.rrsets.iter().next().unwrap().rr_type, Type::A);
    }

    #[test]
    fn conflicting_records_are_preserved() {
        // The whole point of this server: a CNAME alongside an A record
        // is fixture content, not an error.
        let mut zone = Zone::new(name("pitfall.test."), 1);
        let owner = name("conflict.pitfall.test.");
        zone.add(&owner, Ttl::from(300), localhost()).unwrap();
        zone.add(
            &owner,
            Ttl::from(300),
            RecordData::Cname(name("target.example.net.")),
        )
        .unwrap();
        let mut types = Vec::new();
        zone.for_each_rrset(&mut |owner_name, rrset| {
            if *owner_name == owner {
                types.push(rrset.rr_type);
            }
        });
        types.sort();
        assert_eq!(types, vec![Type::A, Type::CNAME]);
    }
}
