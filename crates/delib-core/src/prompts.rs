//! Prompt construction for model-backed moves
//!
//! Each move has a stable prompt id (`move.{name}`) and version. The user
//! message is a JSON document holding the brief, earlier committed outputs
//! and the evidence the move may rely on, so a request is fully determined
//! by the run context and the pack.

use crate::provider::{ChatMessage, GenerationOptions, StructuredRequest};
use delib_grammar::{MoveType, RunContext};
use delib_lattice::ContextPack;
use delib_ledger::PromptRef;
use serde_json::{json, Map, Value};

pub const PROMPT_VERSION: &str = "v1";

#[must_use]
pub fn prompt_ref(move_type: MoveType) -> PromptRef {
    PromptRef::new(format!("move.{}", move_type.as_str()), PROMPT_VERSION)
}

fn instructions(move_type: MoveType) -> &'static str {
    match move_type {
        MoveType::Framing => {
            "Propose one or more framings of the brief (goal and constraints), the scenarios worth \
             testing, and which (scenario, framing) pairs need a position."
        }
        MoveType::IssueSurfacing => {
            "List the planning issues the evidence raises. Mark an issue material when a decision \
             could turn on it. Give each issue a short search query."
        }
        MoveType::EvidenceCuration => "Evidence curation is performed without a model.",
        MoveType::EvidenceInterpretation => {
            "State claims about the evidence. A claim that restates one source sets inference=false \
             and cites exactly that ref. A claim that goes beyond its sources sets inference=true, \
             cites refs or assumption ids and states its limitations. An assumption cites nothing \
             and gives a scope and a justification. Cite only refs listed under evidence. A claim \
             of policy compliance lists the clauses in policy_clauses."
        }
        MoveType::ConsiderationsFormation => {
            "Turn interpretations into considerations, one issue each. Cite the interpretations and \
             evidence relied on. A normative consideration must cite evidence; a claim of policy \
             compliance must list the policy clause in policy_clauses."
        }
        MoveType::WeighingAndBalance => {
            "Weigh the considerations under each framing. Record what the balance is and which \
             considerations decide it. State a caveat when confidence is low. A balance that \
             asserts policy compliance lists its clauses in policy_clauses."
        }
        MoveType::NegotiationAndAlteration => {
            "Propose changes (conditions, design amendments, mitigation) that could alter the \
             balance. Mark alters_balance when a change would shift a weighing. List any policy \
             clause a change is said to satisfy in policy_clauses."
        }
        MoveType::PositioningAndNarration => {
            "Give one trajectory per requested (scenario, framing) pair: a position and a plain \
             narrative a member of the public can follow. Never quote internal identifiers. A \
             position that asserts policy compliance lists its clauses in policy_clauses."
        }
    }
}

fn schema(move_type: MoveType) -> Value {
    let (key, required): (&str, &[&str]) = match move_type {
        MoveType::Framing => ("framings", &["id", "title", "goal"]),
        MoveType::IssueSurfacing => ("issues", &["id", "title"]),
        MoveType::EvidenceCuration => ("pack", &[]),
        MoveType::EvidenceInterpretation => ("claims", &["id", "text", "inference"]),
        MoveType::ConsiderationsFormation => ("entries", &["id", "issue_id", "statement"]),
        MoveType::WeighingAndBalance => ("records", &["id", "framing_id", "consideration_ids", "balance"]),
        MoveType::NegotiationAndAlteration => ("moves", &["id", "proposal"]),
        MoveType::PositioningAndNarration => (
            "trajectories",
            &["id", "scenario_id", "framing_id", "position", "narrative"],
        ),
    };
    json!({
        "type": "object",
        "required": [key],
        "properties": {
            key: {
                "type": "array",
                "items": { "type": "object", "required": required }
            }
        }
    })
}

/// Earlier committed outputs, keyed by move name, curation excluded
fn prior_outputs(ctx: &RunContext, move_type: MoveType) -> Value {
    let mut prior = Map::new();
    for earlier in MoveType::ALL.into_iter().filter(|m| *m < move_type) {
        if earlier == MoveType::EvidenceCuration {
            continue;
        }
        if let Some(output) = ctx.committed(earlier).and_then(|e| e.outputs.as_ref()) {
            prior.insert(
                earlier.as_str().to_string(),
                serde_json::to_value(output).unwrap_or_default(),
            );
        }
    }
    Value::Object(prior)
}

fn evidence(pack: &ContextPack) -> Value {
    pack.atoms
        .iter()
        .map(|a| {
            json!({
                "ref": a.evidence_ref.to_string(),
                "modality": a.modality.as_str(),
                "issues": a.issues,
                "excerpt": a.excerpt,
            })
        })
        .collect()
}

/// Request for `move_type` given the run so far and its evidence pack
#[must_use]
pub fn build_request(
    ctx: &RunContext,
    move_type: MoveType,
    pack: Option<&ContextPack>,
    guidance: Option<&str>,
) -> StructuredRequest {
    let mut context = json!({
        "brief": ctx.run.brief,
        "move": move_type.as_str(),
        "prior": prior_outputs(ctx, move_type),
    });
    if let Some(pack) = pack {
        context["evidence"] = evidence(pack);
        context["limitations"] = json!(pack.limitations());
    }
    if let Some(guidance) = guidance {
        context["guidance"] = json!(guidance);
    }

    StructuredRequest {
        messages: vec![
            ChatMessage::system(format!(
                "You are assisting a planning officer with the {} move. {}",
                move_type.label(),
                instructions(move_type)
            )),
            ChatMessage::user(context.to_string()),
        ],
        schema: schema(move_type),
        prompt: prompt_ref(move_type),
        options: GenerationOptions::default(),
    }
}
