//! Transition and precondition rules
//!
//! Moves run in grammar order but any later state may return to any earlier
//! one. A return is a backtrack and must name a reason; nothing is rewritten,
//! the backtrack is just another appended event.

use crate::error::{PreconditionError, PreconditionFailure};
use crate::event::MoveEventId;
use crate::moves::{BacktrackReason, MoveType};
use crate::run::RunContext;

/// How a requested move relates to the run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First move of a run, or continuing at or past the furthest move
    Forward,
    /// Returning to an earlier move
    Backtrack {
        from: MoveEventId,
        reason: BacktrackReason,
    },
}

/// Moves reachable once `furthest` has been committed
///
/// Every move up to and including the next one; nothing further ahead.
#[must_use]
pub fn allowed_transitions(furthest: Option<MoveType>) -> Vec<MoveType> {
    let limit = furthest.map_or(1, |m| m.ordinal() + 1);
    MoveType::ALL
        .into_iter()
        .filter(|m| m.ordinal() <= limit)
        .collect()
}

/// Validate a move request against the run's history
///
/// # Errors
/// `PreconditionError` naming the run, the requested move and what failed.
pub fn check_transition(
    ctx: &RunContext,
    move_type: MoveType,
    reason: Option<BacktrackReason>,
) -> Result<Transition, PreconditionError> {
    let fail = |failure| PreconditionError {
        run_id: ctx.run_id(),
        move_type,
        failure,
    };

    let furthest = ctx.furthest_committed();
    if !allowed_transitions(furthest).contains(&move_type) {
        return Err(fail(PreconditionFailure::SkipsAhead { furthest }));
    }

    let transition = match furthest {
        Some(f) if move_type < f => {
            let reason = reason.ok_or_else(|| fail(PreconditionFailure::BacktrackWithoutReason { furthest: f }))?;
            let from = ctx
                .committed(f)
                .map(|e| e.id)
                .ok_or_else(|| fail(PreconditionFailure::MissingOutput(f)))?;
            Transition::Backtrack { from, reason }
        }
        _ => {
            if let Some(reason) = reason {
                return Err(fail(PreconditionFailure::ReasonOnForwardMove(reason)));
            }
            Transition::Forward
        }
    };

    check_requirements(ctx, move_type).map_err(fail)?;
    Ok(transition)
}

fn check_requirements(ctx: &RunContext, move_type: MoveType) -> Result<(), PreconditionFailure> {
    use PreconditionFailure::*;
    match move_type {
        MoveType::Framing => Ok(()),
        MoveType::IssueSurfacing => ctx.framing().map(|_| ()).ok_or(MissingOutput(MoveType::Framing)),
        MoveType::EvidenceCuration => {
            let issues = ctx.issues().ok_or(MissingOutput(MoveType::IssueSurfacing))?;
            if issues.issues.is_empty() {
                return Err(NoIssues);
            }
            Ok(())
        }
        MoveType::EvidenceInterpretation => {
            let curation = ctx.curation().ok_or(MissingOutput(MoveType::EvidenceCuration))?;
            if curation.pack.is_empty() {
                return Err(EmptyPack);
            }
            Ok(())
        }
        MoveType::ConsiderationsFormation => ctx
            .interpretation()
            .map(|_| ())
            .ok_or(MissingOutput(MoveType::EvidenceInterpretation)),
        MoveType::WeighingAndBalance => {
            let considerations = ctx
                .considerations()
                .ok_or(MissingOutput(MoveType::ConsiderationsFormation))?;
            if considerations.entries.is_empty() {
                return Err(NoConsiderations);
            }
            Ok(())
        }
        MoveType::NegotiationAndAlteration => ctx
            .weighing()
            .map(|_| ())
            .ok_or(MissingOutput(MoveType::WeighingAndBalance)),
        MoveType::PositioningAndNarration => {
            ctx.weighing().ok_or(MissingOutput(MoveType::WeighingAndBalance))?;
            ctx.negotiation()
                .map(|_| ())
                .ok_or(MissingOutput(MoveType::NegotiationAndAlteration))
        }
    }
}
