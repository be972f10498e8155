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

//! Scoring of diagnostic verdicts against a scenario's expected fault.
//!
//! The scorer never does free-text similarity. A verdict is first
//! *normalized* to one kind of the closed [`FaultKind`] taxonomy via a
//! fixed keyword table; only then is it compared with the scenario's
//! expected fault. A verdict that does not normalize confidently — no
//! recognized keywords, or keywords spanning several fault kinds — is
//! reported as [`Outcome::Ambiguous`] for human review, never coerced
//! into a pass or a fail. This keeps the matching logic independently
//! testable from however the diagnostic agent happens to phrase things.

use crate::scenario::{FaultKind, Scenario};

////////////////////////////////////////////////////////////////////////
// VERDICTS AND REPORTS                                               //
////////////////////////////////////////////////////////////////////////

/// A diagnostic agent's final output, as captured by the evaluation
/// harness.
#[derive(Clone, Debug)]
pub struct Verdict {
    /// The agent's stated fault classification. This may be one of the
    /// taxonomy identifiers verbatim, or free text.
    pub fault_classification: String,

    /// Whatever the agent cited in support (dig output, record text,
    /// reasoning). Consulted for normalization only when the
    /// classification field alone is not conclusive.
    pub supporting_evidence: String,
}

/// The scorer's judgment of one verdict.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScoreReport {
    pub outcome: Outcome,
    /// Human-readable explanation of the judgment, naming the expected
    /// and observed fault kinds.
    pub rationale: String,
}

/// How a verdict compares to the scenario's expected fault.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Outcome {
    /// The normalized verdict names the expected fault kind.
    Matched,

    /// The normalized verdict names a *different* fault kind.
    Mismatched,

    /// The verdict could not be confidently normalized; a human must
    /// review it.
    Ambiguous,
}

impl ScoreReport {
    /// Convenience predicate for aggregate pass/fail reporting: only a
    /// confident match counts.
    pub fn matched(&self) -> bool {
        self.outcome == Outcome::Matched
    }
}

////////////////////////////////////////////////////////////////////////
// NORMALIZATION                                                      //
////////////////////////////////////////////////////////////////////////

/// The fixed phrase-to-fault-kind table. Phrases are matched as
/// lowercase substrings. The table is data, not code: adjusting how
/// agents phrase a fault means editing a row here, with the matching
/// semantics untouched.
const KEYWORDS: &[(&str, FaultKind)] = &[
    ("multiple spf", FaultKind::MultipleSpf),
    ("duplicate spf", FaultKind::MultipleSpf),
    ("two spf", FaultKind::MultipleSpf),
    ("more than one spf", FaultKind::MultipleSpf),
    ("second spf", FaultKind::MultipleSpf),
    ("missing all", FaultKind::MissingAllQualifier),
    ("no all mechanism", FaultKind::MissingAllQualifier),
    ("without an all", FaultKind::MissingAllQualifier),
    ("lacks an all", FaultKind::MissingAllQualifier),
    ("incomplete", FaultKind::MissingAllQualifier),
    ("open-ended spf", FaultKind::MissingAllQualifier),
    ("+all", FaultKind::PermissiveAll),
    ("permissive", FaultKind::PermissiveAll),
    ("anyone to spoof", FaultKind::PermissiveAll),
    ("anyone can send", FaultKind::PermissiveAll),
    ("cname conflict", FaultKind::CnameConflict),
    ("cname and a record", FaultKind::CnameConflict),
    ("cname alongside", FaultKind::CnameConflict),
    ("cname coexist", FaultKind::CnameConflict),
    ("cname with other", FaultKind::CnameConflict),
    ("delegation mismatch", FaultKind::DelegationMismatch),
    ("delegation disagree", FaultKind::DelegationMismatch),
    ("parent and child", FaultKind::DelegationMismatch),
    ("ns mismatch", FaultKind::DelegationMismatch),
    ("ns records disagree", FaultKind::DelegationMismatch),
    ("misconfigured delegation", FaultKind::DelegationMismatch),
    ("stale ttl", FaultKind::StaleTtl),
    ("ttl too high", FaultKind::StaleTtl),
    ("excessive ttl", FaultKind::StaleTtl),
    ("cache divergence", FaultKind::StaleTtl),
    ("cached value", FaultKind::StaleTtl),
    ("no fault", FaultKind::Clean),
    ("no issue", FaultKind::Clean),
    ("no problem", FaultKind::Clean),
    ("correctly configured", FaultKind::Clean),
    ("healthy", FaultKind::Clean),
    ("looks fine", FaultKind::Clean),
];

/// The result of normalizing a verdict's text.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Classification {
    Kind(FaultKind),
    Ambiguous(String),
}

/// Normalizes a verdict to a single [`FaultKind`], if that can be done
/// confidently.
///
/// An exact taxonomy identifier in the classification field wins
/// outright. Otherwise the keyword table is applied to the
/// classification, and — only if that yields nothing — to the
/// supporting evidence. Exactly one distinct fault kind must emerge.
fn normalize(verdict: &Verdict) -> Classification {
    if let Ok(kind) = verdict.fault_classification.trim().parse::<FaultKind>() {
        return Classification::Kind(kind);
    }

    let mut hits = scan(&verdict.fault_classification);
    if hits.is_empty() {
        hits = scan(&verdict.supporting_evidence);
    }
    match hits.len() {
        0 => Classification::Ambiguous(
            "no recognized fault keywords in the verdict".to_owned(),
        ),
        1 => Classification::Kind(hits[0]),
        _ => {
            let list: Vec<&str> = hits.iter().map(FaultKind::as_str).collect();
            Classification::Ambiguous(format!(
                "the verdict matches several fault kinds: {}",
                list.join(", "),
            ))
        }
    }
}

/// Applies the keyword table to `text`, returning the distinct fault
/// kinds whose phrases occur in it.
fn scan(text: &str) -> Vec<FaultKind> {
    let lower = text.to_ascii_lowercase();
    let mut kinds = Vec::new();
    for &(phrase, kind) in KEYWORDS {
        if lower.contains(phrase) && !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

////////////////////////////////////////////////////////////////////////
// SCORING                                                            //
////////////////////////////////////////////////////////////////////////

/// Scores `verdict` against `scenario`'s expected fault.
pub fn score(verdict: &Verdict, scenario: &Scenario) -> ScoreReport {
    match normalize(verdict) {
        Classification::Kind(kind) if kind == scenario.expected_fault => ScoreReport {
            outcome: Outcome::Matched,
            rationale: format!(
                "the verdict names {kind}, which is scenario {:?}'s expected fault",
                scenario.id,
            ),
        },
        Classification::Kind(kind) => ScoreReport {
            outcome: Outcome::Mismatched,
            rationale: format!(
                "the verdict names {kind}, but scenario {:?} expects {}",
                scenario.id, scenario.expected_fault,
            ),
        },
        Classification::Ambiguous(reason) => ScoreReport {
            outcome: Outcome::Ambiguous,
            rationale: format!("{reason}; scoring requires human review"),
        },
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioSet;

    fn verdict(classification: &str, evidence: &str) -> Verdict {
        Verdict {
            fault_classification: classification.to_owned(),
            supporting_evidence: evidence.to_owned(),
        }
    }

    fn scenario(id: &str) -> &'static Scenario {
        ScenarioSet::builtin().get(id).unwrap()
    }

    #[test]
    fn duplicate_spf_phrasing_matches_the_multiple_spf_scenario() {
        let report = score(
            &verdict(
                "duplicate SPF records",
                "the zone publishes two v=spf1 TXT records",
            ),
            scenario("multiple-spf"),
        );
        assert_eq!(report.outcome, Outcome::Matched);
    }

    #[test]
    fn wrong_fault_kind_is_a_mismatch_with_a_named_rationale() {
        let report = score(
            &verdict("CNAME conflict", ""),
            scenario("multiple-spf"),
        );
        assert_eq!(report.outcome, Outcome::Mismatched);
        assert!(report.rationale.contains("cname-conflict"));
        assert!(report.rationale.contains("multiple-spf"));
    }

    #[test]
    fn incomplete_record_phrasing_matches_missing_all_qualifier() {
        let report = score(
            &verdict(
                "the SPF record is incomplete",
                "v=spf1 include:_spf.example.net has no terminal all mechanism",
            ),
            scenario("missing-all-qualifier"),
        );
        assert_eq!(report.outcome, Outcome::Matched);
    }

    #[test]
    fn exact_taxonomy_identifiers_always_normalize() {
        for kind in FaultKind::ALL {
            let report = score(&verdict(kind.as_str(), ""), scenario(kind.as_str()));
            assert_eq!(report.outcome, Outcome::Matched, "for {kind}");
        }
    }

    #[test]
    fn parent_child_disagreement_matches_delegation_mismatch() {
        let report = score(
            &verdict(
                "the parent and child NS records disagree",
                "the parent delegates to ns1 but the child claims ns2",
            ),
            scenario("delegation-mismatch"),
        );
        assert_eq!(report.outcome, Outcome::Matched);
    }

    #[test]
    fn unrecognized_verdicts_are_ambiguous_not_failed() {
        let report = score(
            &verdict("something feels off with the DNS", ""),
            scenario("multiple-spf"),
        );
        assert_eq!(report.outcome, Outcome::Ambiguous);
        assert!(!report.matched());
    }

    #[test]
    fn verdicts_spanning_several_kinds_are_ambiguous() {
        let report = score(
            &verdict(
                "there are duplicate SPF records and also a CNAME conflict",
                "",
            ),
            scenario("multiple-spf"),
        );
        assert_eq!(report.outcome, Outcome::Ambiguous);
        assert!(report.rationale.contains("multiple-spf"));
        assert!(report.rationale.contains("cname-conflict"));
    }

    #[test]
    fn evidence_is_consulted_when_the_classification_is_inconclusive() {
        let report = score(
            &verdict(
                "SPF misconfiguration",
                "the domain publishes more than one spf policy",
            ),
            scenario("multiple-spf"),
        );
        assert_eq!(report.outcome, Outcome::Matched);
    }

    #[test]
    fn clean_scenarios_score_against_all_clear_verdicts() {
        let report = score(
            &verdict("no fault found", "all records are correctly configured"),
            scenario("clean"),
        );
        assert_eq!(report.outcome, Outcome::Matched);
    }
}
