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

//! Pitfall is a synthetic authoritative DNS server for driving
//! reproducible diagnostic-evaluation scenarios.
//!
//! It answers DNS queries exactly as a hand-authored zone fixture
//! dictates, *including* deliberately broken configurations (duplicate
//! SPF records, CNAME conflicts, mismatched delegations), so that an
//! evaluation harness can verify whether a diagnostic process correctly
//! identifies the injected fault. The crate is organized as follows:
//!
//! * [`scenario`] materializes named test scenarios — zone data plus an
//!   expected fault classification — into immutable [`zone`] snapshots.
//! * [`server`] resolves parsed queries against those snapshots,
//!   reproducing authoritative, referral, and negative-answer
//!   semantics; [`message`] implements the wire format it speaks.
//! * [`io`] runs a [`server::Server`] over UDP and TCP sockets.
//! * [`score`] judges a diagnostic agent's verdict against the
//!   scenario's expected fault taxonomy.
//!
//! This is a test fixture, not a production nameserver: there is no
//! DNSSEC, no zone transfer, and no recursive service.

pub mod class;
pub mod io;
pub mod message;
pub mod name;
pub mod rr;
pub mod scenario;
pub mod score;
pub mod server;
pub mod zone;

mod util;
