use std::rc::Rc;

use dmk_core::SmError;
use log::warn;

use crate::expr::GcxExpr;
use crate::handoff::SmHandoff;
use crate::join::join_all;

use super::StateMachine;

/// `@`: runs the child on every target registered under one of `targets`.
pub(super) async fn retarget(
    targets: &[String],
    states: &[Rc<StateMachine>],
    smh: SmHandoff,
) -> Result<(), SmError> {
    let Some(state) = states.first() else {
        return Ok(());
    };
    let execs = smh.host().find_targets(targets);
    match execs.as_slice() {
        [] => {
            warn!(
                "Retarget operation with targets {} found no target.",
                targets.join(", ")
            );
            Ok(())
        }
        [exec] => state.start(smh.retarget(Rc::clone(exec))).await,
        _ => {
            let tasks = execs
                .iter()
                .map(|exec| state.start(smh.retarget(Rc::clone(exec))))
                .collect();
            join_all(tasks).await
        }
    }
}

/// `if`: the predicate is evaluated each time the node starts.
pub(super) async fn branch(
    predicate: &GcxExpr,
    then: &Rc<StateMachine>,
    otherwise: &Rc<StateMachine>,
    smh: SmHandoff,
) -> Result<(), SmError> {
    if predicate.eval_bool(smh.gcx())? {
        then.start(smh).await
    } else {
        otherwise.start(smh).await
    }
}

/// `~`: starts the child detached on a copy of the context.
pub(super) fn no_block(state: &Rc<StateMachine>, smh: &SmHandoff) -> Result<(), SmError> {
    smh.scheduler().spawn(state.start(smh.copy()));
    Ok(())
}

/// `alternate`: runs exactly one child, picked by the indexer.
pub(super) async fn alternate(
    indexer: &GcxExpr,
    states: &[Rc<StateMachine>],
    smh: SmHandoff,
) -> Result<(), SmError> {
    if states.is_empty() {
        return Ok(());
    }
    let index = indexer.eval_int(smh.gcx())?;
    let count = i64::try_from(states.len()).unwrap_or(i64::MAX);
    let Some(state) = usize::try_from(index.rem_euclid(count))
        .ok()
        .and_then(|index| states.get(index))
    else {
        return Ok(());
    };
    state.start(smh).await
}
