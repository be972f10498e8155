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

//! Implementation of the [`Error`] type for zone-related errors.

use std::fmt;

use crate::rr::RrsetListAddError;

/// Errors that arise during operations on a [`Zone`](super::Zone) or
/// [`ZoneStore`](super::ZoneStore).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    NotInZone,
    TtlMismatch,
    DuplicateZone,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::NotInZone => f.write_str("the record's owner is not within the zone"),
            Self::TtlMismatch => f.write_str(
                "the record's TTL does not match the TTL of existing records in the same RRset",
            ),
            Self::DuplicateZone => f.write_str("the store already holds a zone with this origin"),
        }
    }
}

impl From<RrsetListAddError> for Error {
    fn from(error: RrsetListAddError) -> Self {
        match error {
            RrsetListAddError::TtlMismatch => Self::TtlMismatch,
        }
    }
}

impl std::error::Error for Error {}
