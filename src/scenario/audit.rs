// Copyright 2024 Matthew Ingwersen.
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

//! Fixture auditing: deriving the observable fault kinds from a zone
//! snapshot.
//!
//! This is an independent oracle over raw zone data — it shares no code
//! with the scorer's verdict normalization, so a scenario cannot "pass"
//! merely because the fixture and the verdict were written with the
//! same words. The loader uses it to reject fixtures that do not
//! exhibit the fault they declare.

use std::collections::HashMap;

use crate::name::Name;
use crate::rr::Type;
use crate::zone::{DelegationGraph, ZoneStore};

use super::FaultKind;

/// Address-record TTLs above this bound (one day) read as the
/// stale-cache fixture: caches will keep serving the old value long
/// after the zone changes.
const STALE_TTL_BOUND: u32 = 86_400;

/// Derives which fault kinds the zones in `store` observably exhibit.
///
/// The result is evidence, not a diagnosis: it reports every detectable
/// kind, in no particular order, and an empty result means the store
/// looks clean.
pub fn fault_evidence(store: &ZoneStore, delegation: &DelegationGraph) -> Vec<FaultKind> {
    let mut found = Vec::new();
    let add = |kind: FaultKind, found: &mut Vec<FaultKind>| {
        if !found.contains(&kind) {
            found.push(kind);
        }
    };

    let mut types_by_owner: HashMap<Name, Vec<Type>> = HashMap::new();
    for zone in store.iter() {
        zone.for_each_rrset(&mut |owner, rrset| {
            types_by_owner
                .entry(owner.clone())
                .or_default()
                .push(rrset.rr_type);

            if rrset.rr_type == Type::TXT {
                let spf_texts: Vec<String> = rrset
                    .datas()
                    .filter_map(|data| data.txt_text())
                    .filter(|text| is_spf(text))
                    .collect();
                if spf_texts.len() >= 2 {
                    add(FaultKind::MultipleSpf, &mut found);
                }
                for text in &spf_texts {
                    if text.split_whitespace().any(|token| token == "+all") {
                        add(FaultKind::PermissiveAll, &mut found);
                    } else if !has_all_qualifier(text) {
                        add(FaultKind::MissingAllQualifier, &mut found);
                    }
                }
            }

            if matches!(rrset.rr_type, Type::A | Type::AAAA)
                && u32::from(rrset.ttl) > STALE_TTL_BOUND
            {
                add(FaultKind::StaleTtl, &mut found);
            }
        });
    }

    for types in types_by_owner.values() {
        if types.contains(&Type::CNAME) && types.len() > 1 {
            add(FaultKind::CnameConflict, &mut found);
        }
    }

    if !delegation.mismatches().is_empty() {
        add(FaultKind::DelegationMismatch, &mut found);
    }

    found
}

/// Returns whether a TXT string is an SPF policy (RFC 7208 § 4.5: the
/// version section is `v=spf1`, terminated by a space or the end of the
/// record).
fn is_spf(text: &str) -> bool {
    let lower = text.trim_start().to_ascii_lowercase();
    lower == "v=spf1" || lower.starts_with("v=spf1 ")
}

/// Returns whether an SPF policy carries any `all` mechanism
/// (qualified or not).
fn has_all_qualifier(text: &str) -> bool {
    text.split_whitespace()
        .any(|token| matches!(token, "all" | "+all" | "-all" | "~all" | "?all"))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{RecordData, Ttl};
    use crate::zone::Zone;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn txt(text: &str) -> RecordData {
        RecordData::Txt(vec![text.as_bytes().to_vec().into_boxed_slice()])
    }

    fn evidence_for(zone: Zone) -> Vec<FaultKind> {
        let mut store = ZoneStore::new();
        store.insert(zone).unwrap();
        let delegation = DelegationGraph::build(&store);
        fault_evidence(&store, &delegation)
    }

    #[test]
    fn clean_zone_has_no_evidence() {
        let mut zone = Zone::new(name("clean.test."), 1);
        zone.add(
            &name("clean.test."),
            Ttl::from(300),
            txt("v=spf1 ip4:192.0.2.0/24 -all"),
        )
        .unwrap();
        zone.add(
            &name("clean.test."),
            Ttl::from(300),
            RecordData::A([192, 0, 2, 1].into()),
        )
        .unwrap();
        assert!(evidence_for(zone).is_empty());
    }

    #[test]
    fn duplicate_spf_records_are_detected() {
        let mut zone = Zone::new(name("spf.test."), 1);
        zone.add(&name("spf.test."), Ttl::from(300), txt("v=spf1 include:a.test -all"))
            .unwrap();
        zone.add(&name("spf.test."), Ttl::from(300), txt("v=spf1 include:b.test -all"))
            .unwrap();
        assert_eq!(evidence_for(zone), vec![FaultKind::MultipleSpf]);
    }

    #[test]
    fn spf_without_all_mechanism_is_detected() {
        let mut zone = Zone::new(name("spf.test."), 1);
        zone.add(
            &name("spf.test."),
            Ttl::from(300),
            txt("v=spf1 include:_spf.example.net"),
        )
        .unwrap();
        assert_eq!(evidence_for(zone), vec![FaultKind::MissingAllQualifier]);
    }

    #[test]
    fn multi_string_spf_is_evaluated_as_one_policy() {
        // The concatenated form has a terminal -all, so the policy is
        // complete even though no single character-string contains it.
        let mut zone = Zone::new(name("spf.test."), 1);
        zone.add(
            &name("spf.test."),
            Ttl::from(300),
            RecordData::Txt(vec![
                b"v=spf1 include:_spf.example.net".to_vec().into_boxed_slice(),
                b" -all".to_vec().into_boxed_slice(),
            ]),
        )
        .unwrap();
        assert!(evidence_for(zone).is_empty());
    }

    #[test]
    fn permissive_all_is_detected() {
        let mut zone = Zone::new(name("spf.test."), 1);
        zone.add(&name("spf.test."), Ttl::from(300), txt("v=spf1 +all"))
            .unwrap();
        assert_eq!(evidence_for(zone), vec![FaultKind::PermissiveAll]);
    }

    #[test]
    fn cname_conflicts_are_detected() {
        let mut zone = Zone::new(name("conflict.test."), 1);
        let www = name("www.conflict.test.");
        zone.add(&www, Ttl::from(300), RecordData::A([192, 0, 2, 1].into()))
            .unwrap();
        zone.add(
            &www,
            Ttl::from(300),
            RecordData::Cname(name("target.example.net.")),
        )
        .unwrap();
        assert_eq!(evidence_for(zone), vec![FaultKind::CnameConflict]);
    }

    #[test]
    fn lone_cnames_are_not_conflicts() {
        let mut zone = Zone::new(name("alias.test."), 1);
        zone.add(
            &name("www.alias.test."),
            Ttl::from(300),
            RecordData::Cname(name("target.example.net.")),
        )
        .unwrap();
        assert!(evidence_for(zone).is_empty());
    }

    #[test]
    fn excessive_address_ttls_are_detected() {
        let mut zone = Zone::new(name("ttl.test."), 1);
        zone.add(
            &name("ttl.test."),
            Ttl::from(604_800),
            RecordData::A([192, 0, 2, 1].into()),
        )
        .unwrap();
        assert_eq!(evidence_for(zone), vec![FaultKind::StaleTtl]);
    }

    #[test]
    fn delegation_mismatches_are_detected() {
        let mut parent = Zone::new(name("example.test."), 1);
        parent
            .add(
                &name("sub.example.test."),
                Ttl::from(3600),
                RecordData::Ns(name("ns1.example.test.")),
            )
            .unwrap();
        let mut child = Zone::new(name("sub.example.test."), 1);
        child
            .add(
                &name("sub.example.test."),
                Ttl::from(3600),
                RecordData::Ns(name("ns2.example.test.")),
            )
            .unwrap();
        let mut store = ZoneStore::new();
        store.insert(parent).unwrap();
        store.insert(child).unwrap();
        let delegation = DelegationGraph::build(&store);
        assert_eq!(
            fault_evidence(&store, &delegation),
            vec![FaultKind::DelegationMismatch],
        );
    }
}
