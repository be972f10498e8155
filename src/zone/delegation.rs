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

//! Implementation of the [`DelegationGraph`] structure.
//!
//! DNS keeps two separate claims about who is authoritative for a
//! subdomain: the NS RRset the *parent* zone holds at the delegation
//! point, and the NS RRset the *child* zone holds at its own apex. In a
//! healthy deployment the two agree; a divergence is the classic
//! misconfigured-delegation fault, and fixtures encode it as
//! first-class data. The `DelegationGraph` derives both views from a
//! loaded [`ZoneStore`] and keeps them deliberately separate — they are
//! never reconciled.

use crate::name::Name;
use crate::rr::{RecordData, Rrset, Type};

use super::ZoneStore;

////////////////////////////////////////////////////////////////////////
// DELEGATION GRAPH                                                   //
////////////////////////////////////////////////////////////////////////

/// The delegation structure derived from a [`ZoneStore`] snapshot.
///
/// Built once per scenario alongside the store, and immutable for the
/// run's duration.
#[derive(Debug, Default)]
pub struct DelegationGraph {
    edges: Vec<DelegationEdge>,
    apexes: Vec<(Name, Vec<Name>)>,
}

/// What a parent zone claims about a subdomain's authoritative servers:
/// an NS RRset held at a non-apex node.
#[derive(Debug)]
pub struct DelegationEdge {
    /// The origin of the zone holding the delegation.
    pub parent: Name,

    /// The delegation point.
    pub child: Name,

    /// The parent's NS RRset at the delegation point.
    pub ns_rrset: Rrset,
}

impl DelegationEdge {
    /// Returns the nameserver names the parent advertises.
    pub fn advertised(&self) -> Vec<Name> {
        ns_names(&self.ns_rrset)
    }
}

/// A divergence between a parent zone's delegation NS RRset and the
/// child zone's own apex NS RRset.
#[derive(Debug)]
pub struct DelegationMismatch {
    pub child: Name,
    pub parent_claims: Vec<Name>,
    pub child_claims: Vec<Name>,
}

impl DelegationGraph {
    /// Derives the delegation graph from `store`.
    pub fn build(store: &ZoneStore) -> Self {
        let mut edges = Vec::new();
        let mut apexes = Vec::new();
        for zone in store.iter() {
            if let Some(ns_rrset) = zone.ns() {
                apexes.push((zone.origin().clone(), ns_names(ns_rrset)));
            }
            zone.for_each_rrset(&mut |owner, rrset| {
                if rrset.rr_type == Type::NS && owner != zone.origin() {
                    edges.push(DelegationEdge {
                        parent: zone.origin().clone(),
                        child: owner.clone(),
                        ns_rrset: rrset.clone(),
                    });
                }
            });
        }
        Self { edges, apexes }
    }

    /// Returns the delegation edge at exactly `name`, if a parent zone
    /// advertises one there.
    pub fn edge_at(&self, name: &Name) -> Option<&DelegationEdge> {
        self.edges.iter().find(|edge| &edge.child == name)
    }

    /// Returns the nameserver identities advertised for `name` by the
    /// nearest enclosing view: the deepest delegation point covering
    /// `name` if there is one, and otherwise the apex NS RRset of the
    /// nearest enclosing zone.
    pub fn nameservers_for(&self, name: &Name) -> Vec<Name> {
        let deepest_edge = self
            .edges
            .iter()
            .filter(|edge| name.eq_or_subdomain_of(&edge.child))
            .max_by_key(|edge| edge.child.label_count());
        if let Some(edge) = deepest_edge {
            return edge.advertised();
        }
        self.apexes
            .iter()
            .filter(|(origin, _)| name.eq_or_subdomain_of(origin))
            .max_by_key(|(origin, _)| origin.label_count())
            .map(|(_, claims)| claims.clone())
            .unwrap_or_default()
    }

    /// Returns what the parent zones claim about `child`, if any parent
    /// delegates it.
    pub fn parent_view(&self, child: &Name) -> Option<Vec<Name>> {
        self.edge_at(child).map(DelegationEdge::advertised)
    }

    /// Returns what the zone rooted at `child` claims about itself, if
    /// such a zone is loaded and has apex NS records.
    pub fn child_view(&self, child: &Name) -> Option<&[Name]> {
        self.apexes
            .iter()
            .find(|(origin, _)| origin == child)
            .map(|(_, claims)| claims.as_slice())
    }

    /// Returns every delegation point where the parent's claims and the
    /// child zone's own claims diverge. Divergence is intentional
    /// fixture content; this method *observes* it, nothing repairs it.
    pub fn mismatches(&self) -> Vec<DelegationMismatch> {
        self.edges
            .iter()
            .filter_map(|edge| {
                let child_claims = self.child_view(&edge.child)?;
                let parent_claims = edge.advertised();
                if same_set(&parent_claims, child_claims) {
                    None
                } else {
                    Some(DelegationMismatch {
                        child: edge.child.clone(),
                        parent_claims,
                        child_claims: child_claims.to_vec(),
                    })
                }
            })
            .collect()
    }

    /// Returns an iterator over all delegation edges.
    pub fn edges(&self) -> impl Iterator<Item = &DelegationEdge> {
        self.edges.iter()
    }
}

/// Extracts the target names from an NS RRset.
fn ns_names(rrset: &Rrset) -> Vec<Name> {
    rrset
        .datas()
        .filter_map(|data| match data {
            RecordData::Ns(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Compares two nameserver lists as sets.
fn same_set(a: &[Name], b: &[Name]) -> bool {
    a.len() == b.len() && a.iter().all(|name| b.contains(name))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
