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

//! The processing logic of the fixture's authoritative DNS server.
//!
//! The [`Server`] structure is the heart of this module; see its
//! documentation for details.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use log::debug;

use crate::message::writer;
use crate::message::{Opcode, Question, Rcode, Reader, Writer};
use crate::zone::{DelegationGraph, ZoneStore};

mod query;
mod query_log;

pub use query_log::{QueryLog, QueryRecord};

////////////////////////////////////////////////////////////////////////
// SERVER PUBLIC API AND CORE MESSAGE-HANDLING LOGIC                  //
////////////////////////////////////////////////////////////////////////

/// An authoritative DNS server over one scenario's zone snapshot,
/// abstracted from any underlying network I/O.
///
/// A `Server` is constructed per evaluation run from an immutable
/// [`ZoneStore`]; the corresponding [`DelegationGraph`] is derived at
/// construction. There is no way to swap or mutate zone data afterwards
/// — cross-run state is exactly what a reproducible fixture must not
/// have. The only mutable state is the append-only [`QueryLog`], kept
/// for post-hoc grading transparency.
///
/// [`Server::handle_message`] receives, parses, and responds to DNS
/// messages. An underlying network I/O provider (see
/// [`io`](crate::io)) is responsible for moving the buffers to and from
/// the network.
pub struct Server {
    store: Arc<ZoneStore>,
    delegation: DelegationGraph,
    query_log: QueryLog,
}

impl Server {
    /// Creates a new `Server` answering for the zones in `store`.
    pub fn new(store: Arc<ZoneStore>) -> Self {
        let delegation = DelegationGraph::build(&store);
        Self {
            store,
            delegation,
            query_log: QueryLog::new(),
        }
    }

    /// Returns the store this `Server` answers from.
    pub fn store(&self) -> &ZoneStore {
        &self.store
    }

    /// Returns the delegation graph derived from the store.
    pub fn delegation(&self) -> &DelegationGraph {
        &self.delegation
    }

    /// Returns a snapshot of the queries handled so far.
    pub fn query_log(&self) -> Vec<QueryRecord> {
        self.query_log.snapshot()
    }

    /// Handles a received DNS message. This is the API through which
    /// I/O providers submit messages.
    ///
    /// `received_buf` contains the message received and `received_info`
    /// provides additional information about it. The response is
    /// serialized into `response_buf` and its length returned. *Every*
    /// input produces a response — even one too mangled to parse gets a
    /// FORMERR, because a diagnostic run must observe a deterministic
    /// failure rather than a timeout.
    ///
    /// The caller must provide a `response_buf` of at least 512 octets
    /// for UDP transport and 65,535 octets for TCP transport; this
    /// method panics otherwise.
    pub fn handle_message(
        &self,
        received_buf: &[u8],
        received_info: ReceivedInfo,
        response_buf: &mut [u8],
    ) -> usize {
        let limit = match received_info.transport {
            Transport::Tcp => u16::MAX as usize,
            Transport::Udp => 512,
        };
        if response_buf.len() < limit {
            panic!("the response buffer is not large enough");
        }

        // A message without a full header cannot be interrogated at
        // all: answer FORMERR, echoing as much of the ID as was
        // received.
        let mut received = match Reader::try_from(received_buf) {
            Ok(reader) => reader,
            Err(_) => {
                let mut response = Writer::new(response_buf, limit).unwrap();
                if received_buf.len() >= 2 {
                    response.set_id(u16::from_be_bytes([received_buf[0], received_buf[1]]));
                }
                response.set_qr(true);
                response.set_rcode(Rcode::FormErr);
                return response.finish();
            }
        };

        // Start the response by copying information from the received
        // message and setting the QR bit.
        let mut response = Writer::new(response_buf, limit).unwrap();
        response.set_id(received.id());
        response.set_qr(true);
        response.set_opcode(received.opcode());
        if received.opcode() == Opcode::Query {
            // Per the ISC DNS compliance testing tool, RD is only
            // defined for opcode QUERY and thus we shouldn't copy it
            // otherwise.
            response.set_rd(received.rd());
        }

        let question = self.preprocess(&mut received, &mut response);
        if let Some(ref question) = question {
            self.handle_query(question, received_info.transport, &mut response);
        }

        let rcode = response.rcode();
        if let Some(question) = question {
            debug!(
                "{} query {}/{} from {} -> {}",
                match received_info.transport {
                    Transport::Udp => "udp",
                    Transport::Tcp => "tcp",
                },
                question.qname,
                question.qtype,
                received_info.source,
                rcode,
            );
            self.query_log.append(QueryRecord {
                source: received_info.source,
                transport: received_info.transport,
                qname: question.qname,
                qtype: question.qtype,
                rcode,
            });
        }
        response.finish()
    }

    /// Validates the received message and extracts its question. On any
    /// protocol violation, the appropriate error RCODE is set on the
    /// response and [`None`] is returned.
    ///
    /// The strictness here is deliberate and differs from lenient
    /// production servers: a message with the QR bit set, with QDCOUNT
    /// other than one, or with trailing garbage gets a FORMERR response
    /// rather than being dropped, so that misbehaving harness clients
    /// surface immediately.
    fn preprocess(&self, received: &mut Reader, response: &mut Writer) -> Option<Question> {
        if received.qr() {
            response.set_rcode(Rcode::FormErr);
            return None;
        }

        if received.qdcount() != 1 {
            response.set_rcode(Rcode::FormErr);
            return None;
        }
        let question = match received.read_question() {
            Ok(question) => question,
            Err(_) => {
                response.set_rcode(Rcode::FormErr);
                return None;
            }
        };
        if response.add_question(&question).is_err() {
            response.set_rcode(Rcode::ServFail);
            return None;
        }

        // Skip over any remaining records without decoding their
        // RDATA. Queries in the wild routinely carry an EDNS OPT record
        // in the additional section; we offer no EDNS features, but the
        // record is well-formed and must not trip the strictness check.
        let rr_count = received.ancount() as usize
            + received.nscount() as usize
            + received.arcount() as usize;
        for _ in 0..rr_count {
            if received.skip_rr().is_err() {
                response.set_rcode(Rcode::FormErr);
                return None;
            }
        }
        if !received.at_eom() {
            response.set_rcode(Rcode::FormErr);
            return None;
        }

        if received.opcode() != Opcode::Query {
            response.set_rcode(Rcode::NotImp);
            return None;
        }

        Some(question)
    }
}

////////////////////////////////////////////////////////////////////////
// RECEIVED MESSAGE INFORMATION                                       //
////////////////////////////////////////////////////////////////////////

/// Provides network-related information about a received DNS message to
/// [`Server::handle_message`].
#[derive(Clone, Copy, Debug)]
pub struct ReceivedInfo {
    source: IpAddr,
    transport: Transport,
}

impl ReceivedInfo {
    /// Creates a new [`ReceivedInfo`].
    ///
    /// IPv4-mapped IPv6 addresses of the kind that dual-stack sockets
    /// produce (e.g. `::ffff:127.0.0.1`) are canonicalized to IPv4
    /// addresses, so the query log reads uniformly.
    pub fn new(source: IpAddr, transport: Transport) -> Self {
        let source = match source {
            original @ IpAddr::V4(_) => original,
            original @ IpAddr::V6(ipv6) => {
                let octets = ipv6.octets();
                if octets[0..10].iter().all(|o| *o == 0) && octets[10] == 0xff && octets[11] == 0xff
                {
                    IpAddr::V4(Ipv4Addr::new(
                        octets[12], octets[13], octets[14], octets[15],
                    ))
                } else {
                    original
                }
            }
        };
        Self { source, transport }
    }

    /// Returns the source address of the message.
    pub fn source(&self) -> IpAddr {
        self.source
    }

    /// Returns the transport the message arrived over.
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

/// Indicates the transport through which a DNS message was received.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    Tcp,
    Udp,
}

////////////////////////////////////////////////////////////////////////
// PROCESSING ERRORS                                                  //
////////////////////////////////////////////////////////////////////////

/// An error internal to the [`server`](crate::server) module used to
/// signal problems encountered while processing a DNS message.
#[derive(Debug, Eq, PartialEq)]
enum ProcessingError {
    ServFail,
    Truncation,
}

impl From<writer::Error> for ProcessingError {
    fn from(writer_error: writer::Error) -> Self {
        match writer_error {
            writer::Error::Truncation => Self::Truncation,
            _ => Self::ServFail,
        }
    }
}

/// A result type used internally by [`server`](crate::server) functions
/// that process DNS messages.
type ProcessingResult<T> = Result<T, ProcessingError>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
