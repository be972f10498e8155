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

//! Implementation of the in-zone lookup step of [RFC 1034 § 4.3.2], as
//! clarified for wildcards by [RFC 4592].
//!
//! Once the zone to search has been determined (see
//! [`ZoneStore::zone_for`](super::ZoneStore::zone_for)), the zone's
//! tree is searched for the node corresponding to the target name, or,
//! failing that, for an appropriate wildcard domain name. A non-apex
//! node owning an NS RRset marks a zone cut: by default the search
//! stops there and reports a referral, since continuing would leave
//! authoritative data. The raw variants accept a `process_referrals`
//! knob to turn this off, which is how glue addresses below cuts are
//! looked up.
//!
//! [RFC 1034 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc1034#section-4.3.2
//! [RFC 4592]: https://datatracker.ietf.org/doc/html/rfc4592

use crate::name::Name;
use crate::rr::{RecordData, Rrset, RrsetList, Ttl, Type};

use super::{Node, Zone};

/// The result of a lookup of records of a specific type.
#[derive(Debug)]
pub enum LookupResult<'a> {
    /// The desired records were found.
    Found(Found<'a>),

    /// No records of the desired type were found, but a CNAME record
    /// was present. The CNAME is *not* chased; deciding what to do with
    /// it is the querier's business.
    Cname(Cname<'a>),

    /// The lookup encountered an NS RRset and would therefore leave
    /// authoritative data.
    Referral(Referral<'a>),

    /// A node with the given name exists, but it has no records of the
    /// desired type.
    NoRecords,

    /// No node with the given name exists.
    NxDomain,

    /// The provided name is not within the zone's hierarchy.
    WrongZone,
}

/// The result of a lookup of *all* records for a name.
#[derive(Debug)]
pub enum LookupAllResult<'a> {
    /// A node with the given name exists.
    Found(FoundAll<'a>),

    /// The lookup encountered an NS RRset and would therefore leave
    /// authoritative data.
    Referral(Referral<'a>),

    /// No node with the given name exists.
    NxDomain,

    /// The provided name is not within the zone's hierarchy.
    WrongZone,
}

/// Data returned when a single-type lookup finds records of the
/// requested type.
#[derive(Debug)]
pub struct Found<'a> {
    /// The RRset that was looked up.
    pub rrset: &'a Rrset,
}

/// Data returned when a lookup of all record types successfully finds
/// the target domain name.
#[derive(Debug)]
pub struct FoundAll<'a> {
    /// The RRsets of the domain name that was looked up.
    pub rrsets: &'a RrsetList,
}

/// Data returned when a single-type lookup finds a CNAME at the target
/// domain (and another RR type was requested).
#[derive(Debug)]
pub struct Cname<'a> {
    /// The CNAME RRset found at the target domain name.
    pub rrset: &'a Rrset,
}

/// Data returned when a lookup encounters a zone cut.
#[derive(Debug)]
pub struct Referral<'a> {
    /// The name of the zone cut, i.e., the owner of the NS RRset.
    pub cut: &'a Name,

    /// The NS RRset found at the zone cut — the *parent's* claim about
    /// who is authoritative below the cut.
    pub ns_rrset: &'a Rrset,
}

impl Zone {
    /// Looks up records for the given name and RR type, with referral
    /// processing.
    pub fn lookup(&self, name: &Name, rr_type: Type) -> LookupResult {
        self.lookup_raw(name, rr_type, true)
    }

    /// Looks up *all* records for the given name, with referral
    /// processing.
    pub fn lookup_all(&self, name: &Name) -> LookupAllResult {
        self.lookup_all_raw(name, true)
    }

    /// Looks up records for the given name and RR type, *optionally*
    /// processing referrals.
    ///
    /// If `process_referrals` is `false`, the lookup process will
    /// continue below zone cuts into non-authoritative data.
    /// Consequently, [`LookupResult::Referral`] will never be returned.
    /// This is primarily useful for looking up glue records.
    pub fn lookup_raw(&self, name: &Name, rr_type: Type, process_referrals: bool) -> LookupResult {
        match self.lookup_all_raw(name, process_referrals) {
            LookupAllResult::Found(found_all) => {
                if let Some(rrset) = found_all.rrsets.lookup(rr_type) {
                    LookupResult::Found(Found { rrset })
                } else if let Some(rrset) = found_all.rrsets.lookup(Type::CNAME) {
                    LookupResult::Cname(Cname { rrset })
                } else {
                    LookupResult::NoRecords
                }
            }
            LookupAllResult::Referral(referral) => LookupResult::Referral(referral),
            LookupAllResult::NxDomain => LookupResult::NxDomain,
            LookupAllResult::WrongZone => LookupResult::WrongZone,
        }
    }

    /// Looks up *all* records for the given name, *optionally*
    /// processing referrals.
    pub fn lookup_all_raw(&self, name: &Name, process_referrals: bool) -> LookupAllResult {
        if !name.eq_or_subdomain_of(&self.origin) {
            LookupAllResult::WrongZone
        } else {
            let remaining = name.label_count() - self.origin.label_count();
            lookup_impl(&self.apex, name, remaining, process_referrals, true)
        }
    }

    /// Looks up the SOA RRset at the zone's apex.
    pub fn soa(&self) -> Option<&Rrset> {
        self.apex.rrsets.lookup(Type::SOA)
    }

    /// Looks up the NS RRset at the zone's apex — the zone's *own*
    /// claim about its authoritative nameservers.
    pub fn ns(&self) -> Option<&Rrset> {
        self.apex.rrsets.lookup(Type::NS)
    }

    /// Returns the TTL to use for negative caching: the SOA MINIMUM
    /// field, per [RFC 2308 § 3].
    ///
    /// [RFC 2308 § 3]: https://datatracker.ietf.org/doc/html/rfc2308#section-3
    pub fn negative_ttl(&self) -> Option<Ttl> {
        self.soa().and_then(|rrset| {
            rrset.datas().next().and_then(|data| match data {
                RecordData::Soa { minimum, .. } => Some(Ttl::from(*minimum)),
                _ => None,
            })
        })
    }
}

/// Implements the DNS lookup algorithm.
///
/// `node` is the deepest node matched so far; `remaining` is the number
/// of labels of `name` below it. If the target node has not been
/// reached, the function recursively matches down the tree. When
/// `process_referrals` is `true`, a non-apex node with an NS RRset
/// results in a referral — even when that node is the target node.
fn lookup_impl<'a>(
    node: &'a Node,
    name: &Name,
    remaining: usize,
    process_referrals: bool,
    at_apex: bool,
) -> LookupAllResult<'a> {
    if !at_apex && process_referrals {
        if let Some(ns_rrset) = node.rrsets.lookup(Type::NS) {
            return LookupAllResult::Referral(Referral {
                cut: &node.name,
                ns_rrset,
            });
        }
    }

    if remaining == 0 {
        LookupAllResult::Found(FoundAll {
            rrsets: &node.rrsets,
        })
    } else if let Some(subnode) = node.children.get(name.label(remaining - 1)) {
        lookup_impl(subnode, name, remaining - 1, process_referrals, false)
    } else if let Some(wildcard) = node.children.get(b"*".as_slice()) {
        // The closest encloser has a wildcard child: synthesize from it
        // (RFC 4592 § 3.3.1).
        LookupAllResult::Found(FoundAll {
            rrsets: &wildcard.rrsets,
        })
    } else {
        LookupAllResult::NxDomain
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::RecordData;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn new_zone() -> Zone {
        Zone::new(name("pitfall.test."), 1)
    }

    fn a(last_octet: u8) -> RecordData {
        RecordData::A([192, 0, 2, last_octet].into())
    }

    #[test]
    fn lookup_works() {
        let mut zone = new_zone();
        let www = name("www.pitfall.test.");
        zone.add(&www, Ttl::from(3600), a(1)).unwrap();
        match zone.lookup(&www, Type::A) {
            LookupResult::Found(found) => {
                assert_eq!(found.rrset.rr_type, Type::A);
                assert_eq!(found.rrset.datas().next(), Some(&a(1)));
            }
            other => panic!("expected an A record, got {other:?}"),
        }
    }

    #[test]
    fn lookup_handles_nxdomain() {
        let zone = new_zone();
        assert!(matches!(
            zone.lookup(&name("www.pitfall.test."), Type::A),
            LookupResult::NxDomain,
        ));
    }

    #[test]
    fn lookup_handles_exists_but_no_records() {
        let mut zone = new_zone();
        let www = name("www.pitfall.test.");
        zone.add(&www, Ttl::from(3600), a(1)).unwrap();
        assert!(matches!(
            zone.lookup(&www, Type::AAAA),
            LookupResult::NoRecords,
        ));
    }

    #[test]
    fn lookup_reports_cnames_without_chasing() {
        let mut zone = new_zone();
        let alias = name("alias.pitfall.test.");
        zone.add(
            &alias,
            Ttl::from(300),
            RecordData::Cname(name("target.example.net.")),
        )
        .unwrap();
        match zone.lookup(&alias, Type::A) {
            LookupResult::Cname(cname) => {
                assert_eq!(
                    cname.rrset.datas().next(),
                    Some(&RecordData::Cname(name("target.example.net."))),
                );
            }
            other => panic!("expected a CNAME, got {other:?}"),
        }
    }

    #[test]
    fn lookup_rejects_wrong_zone() {
        let zone = new_zone();
        assert!(matches!(
            zone.lookup_all_raw(&name("other.test."), false),
            LookupAllResult::WrongZone,
        ));
    }

    #[test]
    fn referral_processing_works() {
        let mut zone = new_zone();
        let subdel = name("subdel.pitfall.test.");
        let ns = name("ns.subdel.pitfall.test.");
        zone.add(&subdel, Ttl::from(3600), RecordData::Ns(ns.clone()))
            .unwrap();
        zone.add(&ns, Ttl::from(3600), a(1)).unwrap();

        // With process_referrals == true, we expect a referral, even
        // when the target name is the delegation point.
        for target in [&ns, &subdel] {
            match zone.lookup_all_raw(target, true) {
                LookupAllResult::Referral(referral) => {
                    assert_eq!(referral.cut, &subdel);
                    assert_eq!(referral.ns_rrset.rr_type, Type::NS);
                }
                other => panic!("expected a referral, got {other:?}"),
            }
        }

        // With process_referrals == false, we expect lookups to enter
        // non-authoritative data (this is how glue is found).
        match zone.lookup_raw(&ns, Type::A, false) {
            LookupResult::Found(found) => {
                assert_eq!(found.rrset.datas().next(), Some(&a(1)));
            }
            other => panic!("expected a glue A record, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_synthesis_works() {
        let mut zone = new_zone();
        zone.add(
            &name("*.pitfall.test."),
            Ttl::from(300),
            RecordData::Txt(vec![b"wildcard".to_vec().into_boxed_slice()]),
        )
        .unwrap();
        assert!(matches!(
            zone.lookup(&name("anything.pitfall.test."), Type::TXT),
            LookupResult::Found(_),
        ));
        // A name *below* an existing node does not match the wildcard
        // at the apex level.
        zone.add(&name("www.pitfall.test."), Ttl::from(300), a(1))
            .unwrap();
        assert!(matches!(
            zone.lookup(&name("deep.www.pitfall.test."), Type::TXT),
            LookupResult::NxDomain,
        ));
    }

    #[test]
    fn negative_ttl_comes_from_soa_minimum() {
        let mut zone = new_zone();
        zone.add(
            &name("pitfall.test."),
            Ttl::from(3600),
            RecordData::Soa {
                mname: name("ns1.pitfall.test."),
                rname: name("admin.pitfall.test."),
                serial: 1,
                refresh: 3600,
                retry: 600,
                expire: 86400,
                minimum: 300,
            },
        )
        .unwrap();
        assert_eq!(zone.negative_ttl(), Some(Ttl::from(300)));
    }
}
