//! Deterministic atom selection
//!
//! Given the same candidate set, in any order, [`select`] returns the same
//! atoms and the same omissions. Upstream generation may be
//! non-deterministic; this step is not.

use crate::pack::{Omission, OmissionReason, PackAtom, PackBudget};
use crate::retrieval::{Candidate, Modality};
use delib_ledger::EvidenceRef;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Result of selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub atoms: Vec<PackAtom>,
    pub omissions: Vec<Omission>,
    /// Declared issues no selected atom covers
    pub uncovered_issues: Vec<String>,
}

/// Select atoms under diversity and coverage constraints
///
/// 1. identical refs are merged (best score, union of issue tags)
/// 2. curator exclusions, score floor and near-duplicates are omitted
/// 3. each declared issue gets its best eligible candidate first
/// 4. remaining slots fill by score under per-source and per-modality caps
pub fn select(
    candidates: &[Candidate],
    issues: &[String],
    budget: &PackBudget,
    exclusions: &[(EvidenceRef, String)],
) -> Selection {
    let mut ordered: Vec<Candidate> = merge_duplicates(candidates).into_values().collect();
    ordered.sort_by(canonical_order);

    let mut omissions = Vec::new();
    let mut eligible: Vec<Candidate> = Vec::new();
    let mut seen_fragments: HashSet<(String, String)> = HashSet::new();
    let mut seen_excerpts: HashSet<(String, String)> = HashSet::new();

    for candidate in ordered {
        if let Some((_, why)) = exclusions.iter().find(|(r, _)| r == &candidate.evidence_ref) {
            omissions.push(
                Omission::new(candidate.evidence_ref, OmissionReason::CuratorExcluded).with_detail(why.clone()),
            );
            continue;
        }
        if candidate.score < budget.score_floor {
            omissions.push(Omission::new(candidate.evidence_ref, OmissionReason::BelowScoreFloor));
            continue;
        }
        let source = candidate.evidence_ref.source_key();
        let fragment_key = (source.clone(), normalize(candidate.evidence_ref.fragment()));
        let excerpt_dup = candidate
            .excerpt
            .as_deref()
            .map(|text| !seen_excerpts.insert((source, normalize(text))))
            .unwrap_or(false);
        if !seen_fragments.insert(fragment_key) || excerpt_dup {
            omissions.push(Omission::new(candidate.evidence_ref, OmissionReason::NearDuplicate));
            continue;
        }
        eligible.push(candidate);
    }

    let mut tally = Tally::default();
    let mut chosen = vec![false; eligible.len()];

    for issue in issues {
        let already = eligible
            .iter()
            .zip(&chosen)
            .any(|(c, &taken)| taken && c.issues.contains(issue));
        if already || tally.total >= budget.max_atoms {
            continue;
        }
        let pick = eligible
            .iter()
            .enumerate()
            .find(|(i, c)| !chosen[*i] && c.issues.contains(issue) && tally.fits(c, budget));
        if let Some((i, c)) = pick {
            tally.take(c);
            chosen[i] = true;
        }
    }

    for (i, candidate) in eligible.iter().enumerate() {
        if chosen[i] {
            continue;
        }
        let reason = if tally.total >= budget.max_atoms {
            Some(OmissionReason::BudgetExhausted)
        } else if tally.source_full(candidate, budget) {
            Some(OmissionReason::SourceCapReached)
        } else if tally.modality_full(candidate, budget) {
            Some(OmissionReason::ModalityCapReached)
        } else {
            None
        };
        match reason {
            Some(reason) => omissions.push(Omission::new(candidate.evidence_ref.clone(), reason)),
            None => {
                tally.take(candidate);
                chosen[i] = true;
            }
        }
    }

    let atoms: Vec<PackAtom> = eligible
        .into_iter()
        .zip(chosen)
        .filter(|(_, taken)| *taken)
        .map(|(c, _)| PackAtom {
            evidence_ref: c.evidence_ref,
            modality: c.modality,
            score: c.score,
            issues: c.issues,
            tool_run_id: c.tool_run_id,
            excerpt: c.excerpt,
        })
        .collect();

    let uncovered_issues = issues
        .iter()
        .filter(|issue| !atoms.iter().any(|a| a.issues.contains(issue)))
        .cloned()
        .collect();

    Selection {
        atoms,
        omissions,
        uncovered_issues,
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    per_source: HashMap<String, usize>,
    per_modality: HashMap<Modality, usize>,
}

impl Tally {
    fn source_full(&self, c: &Candidate, budget: &PackBudget) -> bool {
        self.per_source
            .get(&c.evidence_ref.source_key())
            .copied()
            .unwrap_or(0)
            >= budget.per_source_cap
    }

    fn modality_full(&self, c: &Candidate, budget: &PackBudget) -> bool {
        self.per_modality.get(&c.modality).copied().unwrap_or(0) >= budget.per_modality_cap
    }

    fn fits(&self, c: &Candidate, budget: &PackBudget) -> bool {
        !self.source_full(c, budget) && !self.modality_full(c, budget)
    }

    fn take(&mut self, c: &Candidate) {
        self.total += 1;
        *self.per_source.entry(c.evidence_ref.source_key()).or_default() += 1;
        *self.per_modality.entry(c.modality).or_default() += 1;
    }
}

fn merge_duplicates(candidates: &[Candidate]) -> BTreeMap<EvidenceRef, Candidate> {
    let mut merged: BTreeMap<EvidenceRef, Candidate> = BTreeMap::new();
    for candidate in candidates {
        match merged.get_mut(&candidate.evidence_ref) {
            None => {
                let mut c = candidate.clone();
                c.issues.sort();
                c.issues.dedup();
                merged.insert(c.evidence_ref.clone(), c);
            }
            Some(existing) => {
                let mut issues = existing.issues.clone();
                issues.extend(candidate.issues.iter().cloned());
                issues.sort();
                issues.dedup();
                if canonical_order(candidate, existing) == Ordering::Less {
                    let excerpt = candidate.excerpt.clone().or_else(|| existing.excerpt.clone());
                    *existing = candidate.clone();
                    existing.excerpt = excerpt;
                } else if existing.excerpt.is_none() {
                    existing.excerpt = candidate.excerpt.clone();
                }
                existing.issues = issues;
            }
        }
    }
    merged
}

fn canonical_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.evidence_ref.cmp(&b.evidence_ref))
        .then_with(|| a.modality.cmp(&b.modality))
        .then_with(|| a.record_id.cmp(&b.record_id))
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
