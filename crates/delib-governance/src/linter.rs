//! Reasonableness linter
//!
//! Checks run over the latest committed output of every move. The gate
//! lints the run with and without a candidate event and blocks on hard
//! findings the candidate introduces about its own move.

use crate::error::GovernanceError;
use crate::finding::{CheckCode, Finding, GateDecision, GovernanceReport, Severity};
use delib_grammar::{MoveEvent, MoveType, RunContext};
use delib_ledger::EvidenceRef;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Linter tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Confidence below this needs a caveat
    pub low_confidence_threshold: f32,
    /// Phrases that assert policy compliance (matched case-insensitively)
    pub policy_phrases: Vec<String>,
    /// Extra regexes for identifiers that must not reach user-facing text
    pub internal_id_patterns: Vec<String>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.5,
            policy_phrases: [
                "complies with",
                "in accordance with",
                "accords with",
                "conforms to",
                "contrary to policy",
                "policy compliant",
                "meets the requirements of",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            internal_id_patterns: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    #[must_use]
    pub fn with_low_confidence_threshold(mut self, threshold: f32) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_policy_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.policy_phrases.push(phrase.into());
        self
    }
}

const BUILTIN_ID_PATTERNS: [&str; 3] = [
    // ULIDs
    r"\b[0-9A-HJKMNP-TV-Z]{26}\b",
    // evidence refs
    r"\b[A-Za-z0-9_.-]+::[A-Za-z0-9_.-]+",
    // lattice node ids of derived artifacts
    r"\b(?:interpretation|assumption|consideration|weighing|negotiation|trajectory|move|pack):[A-Za-z0-9]",
];

/// Stateless apart from compiled patterns; safe to share across runs
#[derive(Debug, Clone)]
pub struct Linter {
    config: GovernanceConfig,
    id_patterns: Vec<Regex>,
}

impl Linter {
    /// # Errors
    /// `InvalidPattern` if a configured identifier pattern does not compile
    pub fn new(config: GovernanceConfig) -> Result<Self, GovernanceError> {
        let id_patterns = BUILTIN_ID_PATTERNS
            .iter()
            .map(|p| (*p).to_string())
            .chain(config.internal_id_patterns.iter().cloned())
            .map(|p| Regex::new(&p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, id_patterns })
    }

    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Full report for a run, with overrides applied
    #[must_use]
    pub fn lint(&self, ctx: &RunContext) -> GovernanceReport {
        let (overridden, findings): (Vec<Finding>, Vec<Finding>) = self
            .raw_findings(ctx)
            .into_iter()
            .partition(|f| {
                f.severity == Severity::Hard
                    && ctx
                        .overrides
                        .iter()
                        .any(|o| o.check == f.code.as_str() && o.target == f.target)
            });
        GovernanceReport {
            run_id: ctx.run_id(),
            findings,
            overridden,
        }
    }

    /// Decide whether `candidate` may be committed
    #[must_use]
    pub fn gate(&self, ctx: &RunContext, candidate: &MoveEvent) -> GateDecision {
        let before: HashSet<(CheckCode, String)> = self
            .lint(ctx)
            .findings
            .into_iter()
            .map(|f| (f.code, f.target))
            .collect();
        let mut with_candidate = ctx.clone();
        with_candidate.events.push(candidate.clone());
        let after = self.lint(&with_candidate);

        let mut decision = GateDecision::default();
        for finding in after.findings {
            if finding.move_type != candidate.move_type || before.contains(&(finding.code, finding.target.clone())) {
                continue;
            }
            if finding.is_hard() {
                tracing::warn!(code = %finding.code, target = %finding.target, "hard governance finding");
                decision.blocking.push(finding);
            } else {
                decision.annotations.push(finding);
            }
        }
        decision
    }

    fn raw_findings(&self, ctx: &RunContext) -> Vec<Finding> {
        let mut out = Vec::new();
        self.check_citations(ctx, &mut out);
        self.check_pack_reliance(ctx, &mut out);
        self.check_id_leaks(ctx, &mut out);
        self.check_policy_claims(ctx, &mut out);
        self.check_negotiation_feedback(ctx, &mut out);
        self.check_confidence(ctx, &mut out);
        self.check_material_issues(ctx, &mut out);
        self.check_single_source(ctx, &mut out);
        self.check_fallback_disclosure(ctx, &mut out);
        out.sort();
        out.dedup();
        out
    }

    fn check_citations(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        if let Some(c) = ctx.considerations() {
            for e in c.entries.iter().filter(|e| e.normative) {
                if e.evidence_refs.is_empty() && e.policy_clauses.is_empty() {
                    out.push(Finding::new(
                        MoveType::ConsiderationsFormation,
                        CheckCode::UncitedNormativeClaim,
                        &e.id,
                        "normative consideration cites no evidence or policy clause",
                    ));
                }
            }
        }
        if let Some(p) = ctx.positioning() {
            for t in &p.trajectories {
                if t.evidence_refs.is_empty() && t.weighing_ids.is_empty() {
                    out.push(Finding::new(
                        MoveType::PositioningAndNarration,
                        CheckCode::UncitedNormativeClaim,
                        &t.id,
                        "position is not tied to any weighing or evidence",
                    ));
                }
            }
        }
    }

    fn check_pack_reliance(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let Some(interp) = ctx.interpretation() else { return };
        let pack = ctx.curation().map(|c| &c.pack);
        let in_pack = |r: &EvidenceRef| pack.is_some_and(|p| p.contains(r));

        let cited = interp
            .interpretations
            .iter()
            .map(|i| (i.id.as_str(), i.evidence_refs.as_slice()))
            .chain(
                interp
                    .evidence
                    .iter()
                    .map(|e| (e.id.as_str(), std::slice::from_ref(&e.evidence_ref))),
            );
        for (id, refs) in cited {
            let outside: Vec<String> = refs
                .iter()
                .filter(|&r| !in_pack(r))
                .map(ToString::to_string)
                .collect();
            if !outside.is_empty() {
                out.push(Finding::new(
                    MoveType::EvidenceInterpretation,
                    CheckCode::OutsidePackReliance,
                    id,
                    format!("relies on evidence outside the curated pack: {}", outside.join(", ")),
                ));
            }
        }
    }

    fn leaks(&self, text: &str) -> bool {
        self.id_patterns.iter().any(|re| re.is_match(text))
    }

    fn check_id_leaks(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let mut texts: Vec<(MoveType, &str, &str)> = Vec::new();
        if let Some(c) = ctx.considerations() {
            texts.extend(c.entries.iter().map(|e| (MoveType::ConsiderationsFormation, e.id.as_str(), e.statement.as_str())));
        }
        if let Some(w) = ctx.weighing() {
            texts.extend(w.records.iter().map(|r| (MoveType::WeighingAndBalance, r.id.as_str(), r.balance.as_str())));
        }
        if let Some(n) = ctx.negotiation() {
            texts.extend(n.moves.iter().map(|m| (MoveType::NegotiationAndAlteration, m.id.as_str(), m.proposal.as_str())));
        }
        if let Some(p) = ctx.positioning() {
            for t in &p.trajectories {
                texts.push((MoveType::PositioningAndNarration, t.id.as_str(), t.position.as_str()));
                texts.push((MoveType::PositioningAndNarration, t.id.as_str(), t.narrative.as_str()));
            }
        }
        for (move_type, id, text) in texts {
            if self.leaks(text) {
                out.push(Finding::new(
                    move_type,
                    CheckCode::InternalIdLeak,
                    id,
                    "user-facing text contains an internal identifier",
                ));
            }
        }
    }

    fn claims_compliance(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .policy_phrases
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }

    /// A compliance phrase in any text a record carries needs that record's
    /// own clause references; clauses cited elsewhere in the run do not count
    fn check_policy_claims(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        if let Some(i) = ctx.interpretation() {
            for x in &i.interpretations {
                let texts = [Some(x.text.as_str()), Some(x.limitations.as_str()), x.caveat.as_deref()];
                out.extend(self.unclaused_claim(MoveType::EvidenceInterpretation, &x.id, &texts, &x.policy_clauses));
            }
        }
        if let Some(c) = ctx.considerations() {
            for e in &c.entries {
                out.extend(self.unclaused_claim(
                    MoveType::ConsiderationsFormation,
                    &e.id,
                    &[Some(e.statement.as_str()), e.caveat.as_deref()],
                    &e.policy_clauses,
                ));
            }
        }
        if let Some(w) = ctx.weighing() {
            for r in &w.records {
                out.extend(self.unclaused_claim(
                    MoveType::WeighingAndBalance,
                    &r.id,
                    &[Some(r.balance.as_str()), r.caveat.as_deref()],
                    &r.policy_clauses,
                ));
            }
        }
        if let Some(n) = ctx.negotiation() {
            for m in &n.moves {
                out.extend(self.unclaused_claim(
                    MoveType::NegotiationAndAlteration,
                    &m.id,
                    &[Some(m.proposal.as_str())],
                    &m.policy_clauses,
                ));
            }
        }
        if let Some(p) = ctx.positioning() {
            for t in &p.trajectories {
                let texts = [Some(t.position.as_str()), Some(t.narrative.as_str()), t.caveat.as_deref()];
                out.extend(self.unclaused_claim(MoveType::PositioningAndNarration, &t.id, &texts, &t.policy_clauses));
            }
        }
    }

    fn unclaused_claim(
        &self,
        move_type: MoveType,
        id: &str,
        texts: &[Option<&str>],
        clauses: &[EvidenceRef],
    ) -> Option<Finding> {
        if !clauses.is_empty() || !texts.iter().flatten().any(|t| self.claims_compliance(t)) {
            return None;
        }
        Some(Finding::new(
            move_type,
            CheckCode::PolicyClaimWithoutClause,
            id,
            "policy compliance asserted without a clause reference",
        ))
    }

    fn check_negotiation_feedback(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        if ctx.positioning().is_none() {
            return;
        }
        let Some(negotiation) = ctx.committed(MoveType::NegotiationAndAlteration) else { return };
        let Some(delib_grammar::MoveOutput::NegotiationAndAlteration(moves)) = &negotiation.outputs else {
            return;
        };
        let answered: BTreeSet<&str> = ctx
            .events
            .iter()
            .filter(|e| e.is_committed() && e.sequence > negotiation.sequence)
            .filter_map(|e| match &e.outputs {
                Some(delib_grammar::MoveOutput::WeighingAndBalance(w)) => Some(w),
                _ => None,
            })
            .flat_map(|w| w.records.iter().flat_map(|r| r.responds_to_negotiation.iter().map(String::as_str)))
            .collect();
        for m in moves.moves.iter().filter(|m| m.alters_balance) {
            if !answered.contains(m.id.as_str()) {
                out.push(Finding::new(
                    MoveType::PositioningAndNarration,
                    CheckCode::NegotiationNotReweighed,
                    &m.id,
                    format!("alteration '{}' changes the balance but was not re-weighed", m.proposal),
                ));
            }
        }
    }

    fn check_confidence(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let threshold = self.config.low_confidence_threshold;
        let low = |confidence: Option<f32>, caveat: &Option<String>| {
            confidence.is_some_and(|c| c < threshold) && caveat.as_deref().map_or(true, |c| c.trim().is_empty())
        };
        let mut hits: Vec<(MoveType, &str)> = Vec::new();
        if let Some(i) = ctx.interpretation() {
            hits.extend(
                i.interpretations
                    .iter()
                    .filter(|x| low(x.confidence, &x.caveat))
                    .map(|x| (MoveType::EvidenceInterpretation, x.id.as_str())),
            );
        }
        if let Some(c) = ctx.considerations() {
            hits.extend(
                c.entries
                    .iter()
                    .filter(|x| low(x.confidence, &x.caveat))
                    .map(|x| (MoveType::ConsiderationsFormation, x.id.as_str())),
            );
        }
        if let Some(w) = ctx.weighing() {
            hits.extend(
                w.records
                    .iter()
                    .filter(|x| low(x.confidence, &x.caveat))
                    .map(|x| (MoveType::WeighingAndBalance, x.id.as_str())),
            );
        }
        if let Some(p) = ctx.positioning() {
            hits.extend(
                p.trajectories
                    .iter()
                    .filter(|x| low(x.confidence, &x.caveat))
                    .map(|x| (MoveType::PositioningAndNarration, x.id.as_str())),
            );
        }
        for (move_type, id) in hits {
            out.push(Finding::new(
                move_type,
                CheckCode::LowConfidenceWithoutCaveat,
                id,
                format!("confidence below {threshold} with no caveat"),
            ));
        }
    }

    fn check_material_issues(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let (Some(issues), Some(curation)) = (ctx.issues(), ctx.curation()) else { return };
        for issue in issues.issues.iter().filter(|i| i.material) {
            if curation.pack.atoms_for_issue(&issue.id).next().is_none() {
                out.push(Finding::new(
                    MoveType::EvidenceCuration,
                    CheckCode::MaterialIssueUnsupported,
                    &issue.id,
                    format!("material issue '{}' has no supporting evidence in the pack", issue.title),
                ));
            }
        }
    }

    fn check_single_source(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let Some(c) = ctx.considerations() else { return };
        for e in &c.entries {
            let sources: BTreeSet<String> = e
                .evidence_refs
                .iter()
                .chain(&e.policy_clauses)
                .map(EvidenceRef::source_key)
                .collect();
            if sources.len() == 1 {
                out.push(Finding::new(
                    MoveType::ConsiderationsFormation,
                    CheckCode::SingleSourceConsideration,
                    &e.id,
                    "consideration draws on a single source",
                ));
            }
        }
    }

    fn check_fallback_disclosure(&self, ctx: &RunContext, out: &mut Vec<Finding>) {
        let Some(curation) = ctx.committed(MoveType::EvidenceCuration) else { return };
        let Some(delib_grammar::MoveOutput::EvidenceCuration(c)) = &curation.outputs else { return };
        if !c.pack.fallback_mode {
            return;
        }
        for move_type in &MoveType::ALL[3..] {
            let Some(event) = ctx.committed(*move_type) else { continue };
            if event.sequence < curation.sequence {
                continue;
            }
            let disclosed = event
                .uncertainty
                .iter()
                .any(|u| u.to_lowercase().contains("fallback"));
            if !disclosed {
                out.push(Finding::new(
                    *move_type,
                    CheckCode::FallbackNotDisclosed,
                    event.id.to_string(),
                    "built on a fallback-mode pack without saying so",
                ));
            }
        }
    }
}
