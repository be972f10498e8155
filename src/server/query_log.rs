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

//! The per-run query log.

use std::net::IpAddr;
use std::sync::Mutex;

use crate::message::{Qtype, Rcode};
use crate::name::Name;

use super::Transport;

/// An append-only record of the queries a server has answered during
/// one evaluation run.
///
/// This is the only mutable state a [`Server`](super::Server) carries.
/// Workers append concurrently under a mutex; entries are never
/// modified or removed, so a snapshot taken after a run is a faithful
/// trace for grading transparency.
#[derive(Debug, Default)]
pub struct QueryLog {
    entries: Mutex<Vec<QueryRecord>>,
}

/// One handled query.
#[derive(Clone, Debug)]
pub struct QueryRecord {
    pub source: IpAddr,
    pub transport: Transport,
    pub qname: Name,
    pub qtype: Qtype,
    pub rcode: Rcode,
}

impl QueryLog {
    /// Creates a new, empty `QueryLog`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to the log.
    pub fn append(&self, record: QueryRecord) {
        self.entries.lock().unwrap().push(record);
    }

    /// Returns a copy of all records appended so far, in order.
    pub fn snapshot(&self) -> Vec<QueryRecord> {
        self.entries.lock().unwrap().clone()
    }

    /// Returns the number of records appended so far.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::rr::Type;

    #[test]
    fn appended_records_come_back_in_order() {
        let log = QueryLog::new();
        for i in 0..3 {
            log.append(QueryRecord {
                source: Ipv4Addr::LOCALHOST.into(),
                transport: Transport::Udp,
                qname: format!("q{i}.pitfall.test.").parse().unwrap(),
                qtype: Type::A.into(),
                rcode: Rcode::NoError,
            });
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].qname, "q0.pitfall.test.".parse().unwrap());
        assert_eq!(snapshot[2].qname, "q2.pitfall.test.".parse().unwrap());
    }
}
