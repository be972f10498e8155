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

//! Implementation of the [`ZoneStore`] structure.

use crate::name::Name;

use super::{Error, Zone};

/// The set of zones a server answers for: one scenario's worth of
/// authoritative data.
///
/// A `ZoneStore` is built once, before any query is served, and is
/// immutable afterwards; concurrent readers therefore always observe a
/// single consistent snapshot and need no locks. A scenario holds at
/// most a handful of zones, so zone selection is a scan over origins
/// rather than a tree walk.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ZoneStore {
    zones: Vec<Zone>,
}

impl ZoneStore {
    /// Creates a new, initially empty `ZoneStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `zone` to the store. Each origin may appear only once.
    pub fn insert(&mut self, zone: Zone) -> Result<(), Error> {
        if self.zones.iter().any(|z| z.origin() == zone.origin()) {
            return Err(Error::DuplicateZone);
        }
        self.zones.push(zone);
        Ok(())
    }

    /// Looks up the [`Zone`] that is the nearest enclosing zone for
    /// `name`: the zone whose origin matches the most consecutive
    /// labels of `name`, starting from the right. This is step 2 of the
    /// lookup algorithm given in [RFC 1034 § 4.3.2].
    ///
    /// [RFC 1034 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc1034#section-4.3.2
    pub fn zone_for(&self, name: &Name) -> Option<&Zone> {
        self.zones
            .iter()
            .filter(|zone| name.eq_or_subdomain_of(zone.origin()))
            .max_by_key(|zone| zone.origin().label_count())
    }

    /// Returns the zone with exactly the given origin, if any.
    pub fn get(&self, origin: &Name) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.origin() == origin)
    }

    /// Returns an iterator over the zones, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    /// Returns the number of zones in the store.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns whether the store holds no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn zone_for_picks_the_longest_match() {
        let mut store = ZoneStore::new();
        store.insert(Zone::new(name("test."), 1)).unwrap();
        store
            .insert(Zone::new(name("x.pitfall.test."), 1))
            .unwrap();

        assert!(store.zone_for(&Name::root()).is_none());
        assert_eq!(store.zone_for(&name("test.")).unwrap().origin(), &name("test."));
        assert_eq!(
            store.zone_for(&name("pitfall.test.")).unwrap().origin(),
            &name("test."),
        );
        assert_eq!(
            store.zone_for(&name("x.pitfall.test.")).unwrap().origin(),
            &name("x.pitfall.test."),
        );
        assert_eq!(
            store.zone_for(&name("y.x.pitfall.test.")).unwrap().origin(),
            &name("x.pitfall.test."),
        );
        assert!(store.zone_for(&name("other.example.")).is_none());
    }

    #[test]
    fn insert_rejects_duplicate_origins() {
        let mut store = ZoneStore::new();
        store.insert(Zone::new(name("test."), 1)).unwrap();
        assert_eq!(
            store.insert(Zone::new(name("test."), 2)),
            Err(Error::DuplicateZone),
        );
    }
}
