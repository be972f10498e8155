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

//! Scenario fixtures: named, reproducible bundles of zone data with an
//! expected fault classification.
//!
//! A scenario is the unit of evaluation: the loader materializes its
//! zones into a [`ZoneStore`] snapshot, the server answers queries from
//! that snapshot, and the [scorer](crate::score) judges the diagnostic
//! agent's verdict against the scenario's [`FaultKind`].
//!
//! Fixtures are TOML (see `builtin.toml` for the shipped set); the
//! layout is stable so recorded scenarios stay valid across harness
//! versions. Loading is strict and deterministic: the same scenario id
//! always produces byte-identical zone data, a malformed fixture fails
//! fast before any socket is bound, and a fixture whose zones do not
//! actually exhibit the fault it declares is rejected (see
//! [`fault_evidence`]) — a scenario that lies about its injected fault
//! would silently invalidate every run scored against it.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::Deserialize;

use crate::name::Name;
use crate::rr::{RecordData, Ttl, Type};
use crate::util::Caseless;
use crate::zone::{DelegationGraph, Zone, ZoneStore};

mod audit;
pub use audit::fault_evidence;

////////////////////////////////////////////////////////////////////////
// FAULT TAXONOMY                                                     //
////////////////////////////////////////////////////////////////////////

/// The closed taxonomy of injectable misconfigurations.
///
/// Every scenario declares exactly one of these, and every verdict is
/// normalized to one of these before comparison. Anything that does not
/// normalize cleanly is ambiguous, never a silent match.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    /// More than one `v=spf1` TXT record at a name (permerror).
    MultipleSpf,

    /// An SPF policy with no terminal `all` qualifier.
    MissingAllQualifier,

    /// An SPF policy ending in `+all`, allowing anyone to spoof.
    PermissiveAll,

    /// A CNAME co-located with another record type at the same name.
    CnameConflict,

    /// Parent and child zones disagree about the delegated
    /// nameservers.
    DelegationMismatch,

    /// A record TTL so long that caches will serve stale data well
    /// after the zone changes.
    StaleTtl,

    /// No injected fault; the control scenario.
    Clean,
}

impl FaultKind {
    /// Every fault kind, in a fixed order.
    pub const ALL: [FaultKind; 7] = [
        FaultKind::MultipleSpf,
        FaultKind::MissingAllQualifier,
        FaultKind::PermissiveAll,
        FaultKind::CnameConflict,
        FaultKind::DelegationMismatch,
        FaultKind::StaleTtl,
        FaultKind::Clean,
    ];

    /// Returns the stable fixture identifier of the fault kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleSpf => "multiple-spf",
            Self::MissingAllQualifier => "missing-all-qualifier",
            Self::PermissiveAll => "permissive-all",
            Self::CnameConflict => "cname-conflict",
            Self::DelegationMismatch => "delegation-mismatch",
            Self::StaleTtl => "stale-ttl",
            Self::Clean => "clean",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        FaultKind::ALL
            .into_iter()
            .find(|kind| Caseless(kind.as_str()) == Caseless(text))
            .ok_or("unknown fault kind")
    }
}

////////////////////////////////////////////////////////////////////////
// SCENARIOS                                                          //
////////////////////////////////////////////////////////////////////////

/// A named evaluation scenario: zone fixtures plus the expected
/// diagnosis.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub id: String,
    pub description: String,
    pub expected_fault: FaultKind,
    /// Free text describing the fix, for human-readable grading
    /// support. Matching never depends on it.
    pub expected_remediation: String,
    #[serde(rename = "zone")]
    zones: Vec<ZoneFixture>,
}

impl Scenario {
    /// Materializes the scenario's zones into a fresh [`ZoneStore`].
    ///
    /// This is a pure function of the fixture: calling it twice yields
    /// identical stores, which is what makes repeated evaluation runs
    /// reproducible. Malformed zone data fails here, as does a fixture
    /// whose zones do not exhibit the declared fault.
    pub fn build_store(&self) -> Result<ZoneStore, ScenarioError> {
        let mut store = ZoneStore::new();
        for fixture in &self.zones {
            let zone = fixture.build(&self.id)?;
            store.insert(zone).map_err(|e| ScenarioError::BadZone {
                scenario: self.id.clone(),
                detail: e.to_string(),
            })?;
        }

        let delegation = DelegationGraph::build(&store);
        let found = fault_evidence(&store, &delegation);
        let consistent = match self.expected_fault {
            FaultKind::Clean => found.is_empty(),
            fault => found.contains(&fault),
        };
        if !consistent {
            return Err(ScenarioError::MissingFaultEvidence {
                scenario: self.id.clone(),
                expected: self.expected_fault,
                found,
            });
        }
        Ok(store)
    }
}

////////////////////////////////////////////////////////////////////////
// SCENARIO SETS                                                      //
////////////////////////////////////////////////////////////////////////

/// A collection of [`Scenario`]s addressed by id.
#[derive(Clone, Debug)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioSetFile {
    #[serde(rename = "scenario", default)]
    scenarios: Vec<Scenario>,
}

lazy_static! {
    static ref BUILTIN: ScenarioSet =
        ScenarioSet::from_toml_str(include_str!("builtin.toml"))
            .expect("the built-in scenario fixtures are invalid");
}

impl ScenarioSet {
    /// Returns the built-in scenario set shipped with the crate.
    pub fn builtin() -> &'static ScenarioSet {
        &BUILTIN
    }

    /// Parses a scenario set from TOML text. Every scenario is built
    /// once immediately, so a malformed or self-inconsistent fixture is
    /// rejected here rather than surfacing mid-run.
    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        let file: ScenarioSetFile =
            toml::from_str(text).map_err(|e| ScenarioError::Parse(e.to_string()))?;
        for (index, scenario) in file.scenarios.iter().enumerate() {
            if file.scenarios[..index].iter().any(|s| s.id == scenario.id) {
                return Err(ScenarioError::Parse(format!(
                    "duplicate scenario id {:?}",
                    scenario.id,
                )));
            }
            scenario.build_store()?;
        }
        Ok(Self {
            scenarios: file.scenarios,
        })
    }

    /// Loads a scenario set from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ScenarioError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Looks up a scenario by id.
    pub fn get(&self, id: &str) -> Result<&Scenario, ScenarioError> {
        self.scenarios
            .iter()
            .find(|scenario| scenario.id == id)
            .ok_or_else(|| ScenarioError::UnknownScenario(id.to_owned()))
    }

    /// Returns an iterator over the scenarios, in fixture order.
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    /// Returns the number of scenarios in the set.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// ZONE AND RECORD FIXTURES                                           //
////////////////////////////////////////////////////////////////////////

/// One zone of a scenario, as written in the fixture file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ZoneFixture {
    origin: String,
    #[serde(default = "default_serial")]
    serial: u32,
    #[serde(rename = "record")]
    records: Vec<RecordFixture>,
}

/// One record of a zone fixture. `owner` may be `@` (the origin), a
/// relative name, or an absolute name with a trailing dot.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordFixture {
    #[serde(default = "default_owner")]
    owner: String,
    #[serde(rename = "type")]
    rr_type: String,
    #[serde(default = "default_ttl")]
    ttl: u32,
    data: FixtureData,
}

/// Record data as written in a fixture: a single presentation string,
/// or (for TXT only) a list of character-strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum FixtureData {
    Single(String),
    Strings(Vec<String>),
}

fn default_serial() -> u32 {
    1
}

fn default_owner() -> String {
    "@".to_owned()
}

fn default_ttl() -> u32 {
    300
}

impl ZoneFixture {
    fn build(&self, scenario: &str) -> Result<Zone, ScenarioError> {
        let bad = |detail: String| ScenarioError::BadZone {
            scenario: scenario.to_owned(),
            detail,
        };
        let origin: Name = self
            .origin
            .parse()
            .map_err(|e| bad(format!("invalid origin {:?}: {e}", self.origin)))?;
        let mut zone = Zone::new(origin.clone(), self.serial);
        for record in &self.records {
            let owner = resolve_owner(&record.owner, &origin).map_err(&bad)?;
            let data = record
                .parse_data()
                .map_err(|detail| bad(format!("{} {} record: {detail}", owner, record.rr_type)))?;
            zone.add(&owner, Ttl::from(record.ttl), data)
                .map_err(|e| bad(format!("record at {owner}: {e}")))?;
        }
        Ok(zone)
    }
}

/// Resolves a fixture owner field against the zone origin.
fn resolve_owner(owner: &str, origin: &Name) -> Result<Name, String> {
    let absolute = if owner == "@" {
        return Ok(origin.clone());
    } else if owner.ends_with('.') {
        owner.to_owned()
    } else if origin.is_root() {
        format!("{owner}.")
    } else {
        format!("{owner}.{origin}")
    };
    absolute
        .parse()
        .map_err(|e| format!("invalid owner {owner:?}: {e}"))
}

impl RecordFixture {
    fn parse_data(&self) -> Result<RecordData, String> {
        let rr_type: Type = self.rr_type.parse().map_err(str::to_owned)?;

        if rr_type == Type::TXT {
            let strings = match &self.data {
                FixtureData::Single(s) => vec![s.clone()],
                FixtureData::Strings(list) => list.clone(),
            };
            if strings.is_empty() {
                return Err("TXT record needs at least one string".to_owned());
            }
            let mut segments = Vec::new();
            for string in strings {
                if string.len() > 255 {
                    return Err("TXT character-string exceeds 255 octets".to_owned());
                }
                segments.push(string.into_bytes().into_boxed_slice());
            }
            return Ok(RecordData::Txt(segments));
        }

        let text = match &self.data {
            FixtureData::Single(s) => s.as_str(),
            FixtureData::Strings(_) => {
                return Err("only TXT records accept a list of strings".to_owned());
            }
        };
        match rr_type {
            Type::A => text
                .parse()
                .map(RecordData::A)
                .map_err(|e| format!("invalid IPv4 address: {e}")),
            Type::AAAA => text
                .parse()
                .map(RecordData::Aaaa)
                .map_err(|e| format!("invalid IPv6 address: {e}")),
            Type::NS => parse_name(text).map(RecordData::Ns),
            Type::CNAME => parse_name(text).map(RecordData::Cname),
            Type::PTR => parse_name(text).map(RecordData::Ptr),
            Type::MX => {
                let mut fields = text.split_whitespace();
                let preference = fields
                    .next()
                    .ok_or("MX record needs a preference")?
                    .parse()
                    .map_err(|e| format!("invalid MX preference: {e}"))?;
                let exchange = parse_name(fields.next().ok_or("MX record needs an exchange")?)?;
                if fields.next().is_some() {
                    return Err("trailing fields in MX record".to_owned());
                }
                Ok(RecordData::Mx {
                    preference,
                    exchange,
                })
            }
            Type::SOA => {
                let fields: Vec<&str> = text.split_whitespace().collect();
                if fields.len() != 7 {
                    return Err(format!(
                        "SOA record needs 7 fields (mname rname serial refresh retry expire \
                         minimum), got {}",
                        fields.len(),
                    ));
                }
                let int = |index: usize, what: &str| {
                    fields[index]
                        .parse::<u32>()
                        .map_err(|e| format!("invalid SOA {what}: {e}"))
                };
                Ok(RecordData::Soa {
                    mname: parse_name(fields[0])?,
                    rname: parse_name(fields[1])?,
                    serial: int(2, "serial")?,
                    refresh: int(3, "refresh")?,
                    retry: int(4, "retry")?,
                    expire: int(5, "expire")?,
                    minimum: int(6, "minimum")?,
                })
            }
            other => Err(format!("unsupported record type {other}")),
        }
    }
}

fn parse_name(text: &str) -> Result<Name, String> {
    text.parse()
        .map_err(|e| format!("invalid domain name {text:?}: {e}"))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors produced while loading or materializing scenarios.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScenarioError {
    /// No scenario with the requested id exists.
    UnknownScenario(String),

    /// The fixture file could not be parsed.
    Parse(String),

    /// The fixture file could not be read.
    Io(String),

    /// A zone in the fixture is malformed.
    BadZone { scenario: String, detail: String },

    /// The fixture's zones do not exhibit the fault it declares (or, for
    /// a clean scenario, exhibit one it does not declare).
    MissingFaultEvidence {
        scenario: String,
        expected: FaultKind,
        found: Vec<FaultKind>,
    },
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownScenario(id) => write!(f, "unknown scenario {id:?}"),
            Self::Parse(detail) => write!(f, "failed to parse the scenario fixtures: {detail}"),
            Self::Io(detail) => write!(f, "failed to read the scenario fixtures: {detail}"),
            Self::BadZone { scenario, detail } => {
                write!(f, "scenario {scenario:?} has a malformed zone: {detail}")
            }
            Self::MissingFaultEvidence {
                scenario,
                expected,
                found,
            } => {
                write!(
                    f,
                    "scenario {scenario:?} declares fault {expected} but its zones exhibit ",
                )?;
                if found.is_empty() {
                    write!(f, "none")
                } else {
                    let list: Vec<&str> = found.iter().map(FaultKind::as_str).collect();
                    write!(f, "{}", list.join(", "))
                }
            }
        }
    }
}

impl std::error::Error for ScenarioError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
