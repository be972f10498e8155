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

//! Handling of DNS QUERY messages.

use super::{ProcessingError, ProcessingResult, Server, Transport};
use crate::class::Class;
use crate::message::{writer, Qclass, Qtype, Question, Rcode, Writer};
use crate::name::Name;
use crate::rr::{RecordData, Rrset, Type};
use crate::zone::{LookupAllResult, LookupResult, Zone};

impl Server {
    /// Answers a validated question, applying error-recovery policy:
    /// any internal failure becomes SERVFAIL, and an over-long UDP
    /// response becomes a truncated reply rather than an error.
    pub(super) fn handle_query(
        &self,
        question: &Question,
        transport: Transport,
        response: &mut Writer,
    ) {
        // Zone transfers and the obsolete mail-agent QTYPEs are out of
        // scope for a test fixture.
        if matches!(
            question.qtype,
            Qtype::IXFR | Qtype::AXFR | Qtype::MAILB | Qtype::MAILA
        ) {
            response.set_rcode(Rcode::NotImp);
            return;
        }

        // Fixtures are Internet-class only.
        if question.qclass == Qclass::ANY || Class::from(question.qclass) != Class::IN {
            response.set_rcode(Rcode::NotImp);
            return;
        }

        match self.answer_question(question, response) {
            Ok(()) => (),
            Err(ProcessingError::ServFail) => {
                response.set_aa(false);
                response.set_rcode(Rcode::ServFail);
                response.clear_rrs();
            }
            Err(ProcessingError::Truncation) => {
                response.clear_rrs();
                if transport == Transport::Tcp {
                    // We can't ask the client to retry over TCP, since
                    // we are already over TCP.
                    response.set_aa(false);
                    response.set_rcode(Rcode::ServFail);
                } else {
                    response.set_tc(true);
                }
            }
        }
    }

    fn answer_question(&self, question: &Question, response: &mut Writer) -> ProcessingResult<()> {
        let qname = &question.qname;

        // An NS question at a delegation point advertised by a hosted
        // parent zone is answered with a referral carrying the
        // *parent's* NS RRset, even when the child zone is hosted here
        // too. The fixture plays one authoritative server in a chain:
        // the parent's claim is what a querier of the parent would see,
        // while the child zone's own records (its SOA and apex NS)
        // remain visible through other question types. Keeping the two
        // views separately observable is what lets an agent notice a
        // mismatched delegation.
        if Type::from(question.qtype) == Type::NS {
            if let Some(edge) = self.delegation().edge_at(qname) {
                return self.write_referral(&edge.child, &edge.ns_rrset, response);
            }
        }

        let zone = match self.store().zone_for(qname) {
            Some(zone) => zone,
            None => {
                // No zone in the scenario covers the name: NXDOMAIN at
                // the root. There is no enclosing SOA to offer.
                response.set_rcode(Rcode::NxDomain);
                return Ok(());
            }
        };

        if question.qtype == Qtype::ANY {
            self.answer_any(zone, qname, response)
        } else {
            self.answer(zone, qname, question.qtype.into(), response)
        }
    }

    /// Answers a query for a specific RR type once the appropriate zone
    /// to search has been determined.
    fn answer(
        &self,
        zone: &Zone,
        qname: &Name,
        rr_type: Type,
        response: &mut Writer,
    ) -> ProcessingResult<()> {
        match zone.lookup(qname, rr_type) {
            LookupResult::Found(found) => {
                response.set_aa(true);
                response.add_answer_rrset(qname, found.rrset)?;
                Ok(())
            }
            LookupResult::Cname(cname) => {
                // The raw CNAME is the answer; it is never chased
                // server-side. Whether to follow it is the querier's
                // decision, exactly as against a real authoritative
                // server.
                response.set_aa(true);
                response.add_answer_rrset(qname, cname.rrset)?;
                Ok(())
            }
            LookupResult::Referral(referral) => {
                self.write_referral(referral.cut, referral.ns_rrset, response)
            }
            LookupResult::NoRecords => {
                // The name exists but the type does not: an empty
                // authoritative answer, distinguished from NXDOMAIN.
                response.set_aa(true);
                add_negative_caching_soa(zone, response)
            }
            LookupResult::NxDomain => {
                response.set_rcode(Rcode::NxDomain);
                response.set_aa(true);
                add_negative_caching_soa(zone, response)
            }
            LookupResult::WrongZone => panic!("tried to look up a name in the wrong zone"),
        }
    }

    /// Answers a query with QTYPE * (ANY): the union of every RRset at
    /// the exact name. Deliberately co-located conflicts (CNAME next to
    /// A) are returned exactly as the fixture wrote them — the server
    /// never "fixes" the conflict it exists to expose.
    fn answer_any(&self, zone: &Zone, qname: &Name, response: &mut Writer) -> ProcessingResult<()> {
        match zone.lookup_all(qname) {
            LookupAllResult::Found(found) => {
                response.set_aa(true);
                let mut n_added = 0;
                for rrset in found.rrsets.iter() {
                    response.add_answer_rrset(qname, rrset)?;
                    n_added += 1;
                }
                if n_added == 0 {
                    add_negative_caching_soa(zone, response)?;
                }
                Ok(())
            }
            LookupAllResult::Referral(referral) => {
                self.write_referral(referral.cut, referral.ns_rrset, response)
            }
            LookupAllResult::NxDomain => {
                response.set_rcode(Rcode::NxDomain);
                response.set_aa(true);
                add_negative_caching_soa(zone, response)
            }
            LookupAllResult::WrongZone => panic!("tried to look up a name in the wrong zone"),
        }
    }

    /// Creates a referral response: the NS RRset at the zone cut goes
    /// into the authority section, and any addresses we hold for the
    /// named servers go into the additional section as glue. The AA bit
    /// stays unset — a referral is by definition not authoritative.
    fn write_referral(
        &self,
        cut: &Name,
        ns_rrset: &Rrset,
        response: &mut Writer,
    ) -> ProcessingResult<()> {
        response.add_authority_rrset(cut, ns_rrset)?;
        for data in ns_rrset.datas() {
            if let RecordData::Ns(target) = data {
                // Glue is extra information and may be dropped if it
                // does not fit (RFC 2181 § 9).
                execute_allowing_truncation(|| self.add_additional_addresses(target, response))?;
            }
        }
        Ok(())
    }

    /// Looks up `owner` across the store (descending below zone cuts,
    /// since glue lives there) and adds any A/AAAA RRsets found to the
    /// additional section.
    fn add_additional_addresses(
        &self,
        owner: &Name,
        response: &mut Writer,
    ) -> writer::Result<()> {
        if let Some(zone) = self.store().zone_for(owner) {
            if let LookupResult::Found(found) = zone.lookup_raw(owner, Type::A, false) {
                response.add_additional_rrset(owner, found.rrset)?;
            }
            if let LookupResult::Found(found) = zone.lookup_raw(owner, Type::AAAA, false) {
                response.add_additional_rrset(owner, found.rrset)?;
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

/// Adds the SOA record from `zone` to the authority section of
/// `response` for negative caching. Per [RFC 2308 § 3], the TTL used is
/// the SOA MINIMUM field, not the TTL of the SOA record itself.
///
/// [RFC 2308 § 3]: https://datatracker.ietf.org/doc/html/rfc2308#section-3
fn add_negative_caching_soa(zone: &Zone, response: &mut Writer) -> ProcessingResult<()> {
    let soa_rrset = zone.soa().ok_or(ProcessingError::ServFail)?;
    let soa = soa_rrset
        .datas()
        .next()
        .ok_or(ProcessingError::ServFail)?;
    let ttl = zone.negative_ttl().ok_or(ProcessingError::ServFail)?;
    response
        .add_authority_rr(zone.origin(), Type::SOA, ttl, soa)
        .map_err(Into::into)
}

/// Executes `f`, without returning an error if `f` itself fails with
/// [`writer::Error::Truncation`].
fn execute_allowing_truncation(
    f: impl FnOnce() -> writer::Result<()>,
) -> ProcessingResult<()> {
    match f() {
        Err(writer::Error::Truncation) => Ok(()),
        result => result.map_err(Into::into),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use super::super::ReceivedInfo;
    use super::*;
    use crate::message::Reader;
    use crate::scenario::ScenarioSet;

    fn server_for(id: &str) -> Server {
        let scenario = ScenarioSet::builtin().get(id).unwrap();
        Server::new(Arc::new(scenario.build_store().unwrap()))
    }

    fn query_bytes(qname: &str, qtype: Qtype) -> Vec<u8> {
        let mut buf = vec![0; 512];
        let mut writer = Writer::new(&mut buf, 512).unwrap();
        writer.set_id(0x4242);
        writer.set_rd(true);
        writer
            .add_question(&Question {
                qname: qname.parse().unwrap(),
                qtype,
                qclass: Class::IN.into(),
            })
            .unwrap();
        let len = writer.finish();
        buf.truncate(len);
        buf
    }

    fn ask_raw(server: &Server, query: &[u8]) -> Vec<u8> {
        let mut response = vec![0; 512];
        let len = server.handle_message(
            query,
            ReceivedInfo::new(Ipv4Addr::LOCALHOST.into(), Transport::Udp),
            &mut response,
        );
        response.truncate(len);
        response
    }

    fn ask(server: &Server, qname: &str, qtype: Qtype) -> Vec<u8> {
        ask_raw(server, &query_bytes(qname, qtype))
    }

    #[test]
    fn authoritative_answer_carries_all_matching_records() {
        let server = server_for("multiple-spf");
        let response = ask(
            &server,
            "multiple-spf.dnstest.local.",
            Type::TXT.into(),
        );
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.id(), 0x4242);
        assert!(reader.qr());
        assert!(reader.aa());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.ancount(), 2);
        reader.read_question().unwrap();
        for _ in 0..2 {
            let rr = reader.read_rr().unwrap();
            assert!(rr.data.txt_text().unwrap().starts_with("v=spf1"));
        }
    }

    #[test]
    fn absent_type_yields_empty_authoritative_answer_with_soa() {
        let server = server_for("clean");
        let response = ask(&server, "clean.dnstest.local.", Type::AAAA.into());
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert!(reader.aa());
        assert_eq!(reader.ancount(), 0);
        assert_eq!(reader.nscount(), 1);
        reader.read_question().unwrap();
        let soa = reader.read_rr().unwrap();
        assert_eq!(soa.rr_type, Type::SOA);
        // The negative-caching TTL is the SOA MINIMUM field.
        assert_eq!(u32::from(soa.ttl), 300);
    }

    #[test]
    fn uncovered_names_yield_nxdomain_regardless_of_qtype() {
        let server = server_for("clean");
        for qtype in [Qtype::from(Type::A), Type::TXT.into(), Qtype::ANY] {
            let response = ask(&server, "nowhere.invalid.", qtype);
            let reader = Reader::try_from(response.as_slice()).unwrap();
            assert_eq!(reader.rcode(), Rcode::NxDomain);
            assert!(!reader.aa());
            assert_eq!(reader.ancount(), 0);
            assert_eq!(reader.nscount(), 0);
        }
    }

    #[test]
    fn nonexistent_name_within_zone_yields_nxdomain_with_soa() {
        let server = server_for("clean");
        let response = ask(&server, "missing.clean.dnstest.local.", Type::A.into());
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.rcode(), Rcode::NxDomain);
        assert!(reader.aa());
        assert_eq!(reader.nscount(), 1);
        reader.read_question().unwrap();
        assert_eq!(reader.read_rr().unwrap().rr_type, Type::SOA);
    }

    #[test]
    fn any_query_returns_colocated_conflicts_verbatim() {
        let server = server_for("cname-conflict");
        let response = ask(&server, "www.cname-conflict.dnstest.local.", Qtype::ANY);
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        assert!(reader.aa());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.ancount(), 2);
        reader.read_question().unwrap();
        let mut types = Vec::new();
        for _ in 0..2 {
            types.push(reader.read_rr().unwrap().rr_type);
        }
        types.sort();
        assert_eq!(types, vec![Type::A, Type::CNAME]);
    }

    #[test]
    fn cname_is_returned_raw_and_never_chased() {
        let server = server_for("cname-conflict");
        let response = ask(&server, "www.cname-conflict.dnstest.local.", Type::MX.into());
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        assert!(reader.aa());
        assert_eq!(reader.ancount(), 1);
        reader.read_question().unwrap();
        let rr = reader.read_rr().unwrap();
        assert_eq!(rr.rr_type, Type::CNAME);
        assert_eq!(
            rr.data,
            RecordData::Cname("target.example.net.".parse().unwrap()),
        );
    }

    #[test]
    fn ns_question_at_the_cut_returns_the_parents_view() {
        let server = server_for("delegation-mismatch");
        let response = ask(&server, "sub.example.test.", Type::NS.into());
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        // A referral: not authoritative, NS RRset in the authority
        // section, and it is the *parent's* claim (ns1, not ns2).
        assert!(!reader.aa());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.ancount(), 0);
        assert_eq!(reader.nscount(), 1);
        reader.read_question().unwrap();
        let rr = reader.read_rr().unwrap();
        assert_eq!(rr.rr_type, Type::NS);
        assert_eq!(
            rr.data,
            RecordData::Ns("ns1.example.test.".parse().unwrap()),
        );
        // Glue for ns1 rides along in the additional section.
        assert_eq!(reader.arcount(), 1);
        let glue = reader.read_rr().unwrap();
        assert_eq!(glue.owner, "ns1.example.test.".parse().unwrap());
        assert_eq!(glue.rr_type, Type::A);
    }

    #[test]
    fn child_zone_keeps_its_own_claims_observable() {
        let server = server_for("delegation-mismatch");
        let response = ask(&server, "sub.example.test.", Type::SOA.into());
        let mut reader = Reader::try_from(response.as_slice()).unwrap();
        // The child zone's own SOA is authoritative data, so the
        // disagreement (parent says ns1, child says ns2) is observable.
        assert!(reader.aa());
        assert_eq!(reader.ancount(), 1);
        reader.read_question().unwrap();
        let rr = reader.read_rr().unwrap();
        match rr.data {
            RecordData::Soa { ref mname, .. } => {
                assert_eq!(mname, &"ns2.example.test.".parse().unwrap());
            }
            ref other => panic!("expected SOA RDATA, got {other:?}"),
        }
    }

    #[test]
    fn malformed_messages_get_formerr_not_silence() {
        let server = server_for("clean");
        // Too short to even hold a header.
        let response = ask_raw(&server, b"\x12\x34\x00");
        let reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.id(), 0x1234);
        assert!(reader.qr());
        assert_eq!(reader.rcode(), Rcode::FormErr);

        // A full header with no question.
        let mut empty = vec![0; 12];
        empty[0] = 0xab;
        let response = ask_raw(&server, &empty);
        let reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.id(), 0xab00);
        assert_eq!(reader.rcode(), Rcode::FormErr);

        // A message claiming to be a response.
        let mut not_a_query = query_bytes("clean.dnstest.local.", Type::A.into());
        not_a_query[2] |= 0x80;
        let response = ask_raw(&server, &not_a_query);
        let reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.rcode(), Rcode::FormErr);
    }

    #[test]
    fn zone_transfers_are_not_implemented() {
        let server = server_for("clean");
        let response = ask(&server, "clean.dnstest.local.", Qtype::AXFR);
        let reader = Reader::try_from(response.as_slice()).unwrap();
        assert_eq!(reader.rcode(), Rcode::NotImp);
    }

    #[test]
    fn queries_are_recorded_in_the_log() {
        let server = server_for("clean");
        ask(&server, "clean.dnstest.local.", Type::A.into());
        ask(&server, "missing.clean.dnstest.local.", Type::A.into());
        let log = server.query_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].rcode, Rcode::NoError);
        assert_eq!(log[1].rcode, Rcode::NxDomain);
        assert_eq!(log[1].qname, "missing.clean.dnstest.local.".parse().unwrap());
    }
}
