mod leaf;
mod pattern;
mod repeat;
mod universal;

use std::fmt;
use std::rc::Rc;

use dmk_core::SmError;
use futures::FutureExt;

use crate::expr::GcxExpr;
use crate::handoff::SmHandoff;
use crate::join::join_all;
use crate::scheduler::SmTask;
use crate::wait::wait_for_unchecked;

pub use leaf::{CustomAction, LeafAction, LeafSm};
pub use pattern::{PatternSm, PhaseSm};
pub use repeat::GtRepeat;

pub type Children = Vec<Rc<StateMachine>>;

/// Node kinds, arranged in the hierarchy the grammar checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SmKind {
    StateMachine,
    Sequential,
    Parallel,
    Universal,
    LineAction,
    ScriptLine,
    Pattern,
    Phase,
    DialoguePhase,
    JumpPhase,
    PhaseParallelAction,
    PhaseSequentialAction,
    EndPhase,
    FinishPhase,
    GtRepeat,
    GtRepeat2,
    Retarget,
    If,
    NoBlock,
    Break,
    Alternate,
    ScriptTask,
    ReflectedLineAction,
    ReflectedScriptLine,
}

impl SmKind {
    pub fn parent(self) -> Option<SmKind> {
        use SmKind::*;
        match self {
            StateMachine => None,
            Sequential | Parallel | Universal | LineAction | ScriptLine => Some(StateMachine),
            Pattern | Phase | PhaseSequentialAction | ScriptTask => Some(Sequential),
            DialoguePhase | JumpPhase => Some(Phase),
            PhaseParallelAction | EndPhase | FinishPhase => Some(Parallel),
            GtRepeat | Retarget | If | NoBlock | Break | Alternate => Some(Universal),
            GtRepeat2 => Some(GtRepeat),
            ReflectedLineAction => Some(LineAction),
            ReflectedScriptLine => Some(ScriptLine),
        }
    }

    /// True if `self` is `other` or derives from it.
    pub fn is_a(self, other: SmKind) -> bool {
        let mut kind = Some(self);
        while let Some(current) = kind {
            if current == other {
                return true;
            }
            kind = current.parent();
        }
        false
    }

    pub fn name(self) -> &'static str {
        use SmKind::*;
        match self {
            StateMachine => "StateMachine",
            Sequential => "SequentialSM",
            Parallel => "ParallelSM",
            Universal => "UniversalSM",
            LineAction => "LineActionSM",
            ScriptLine => "ScriptLineSM",
            Pattern => "PatternSM",
            Phase => "PhaseSM",
            DialoguePhase => "DialoguePhaseSM",
            JumpPhase => "PhaseJSM",
            PhaseParallelAction => "PhaseParallelActionSM",
            PhaseSequentialAction => "PhaseSequentialActionSM",
            EndPhase => "EndPSM",
            FinishPhase => "FinishPSM",
            GtRepeat => "GTRepeat",
            GtRepeat2 => "GTRepeat2",
            Retarget => "RetargetUSM",
            If => "IfUSM",
            NoBlock => "NoBlockUSM",
            Break => "BreakSM",
            Alternate => "AlternateUSM",
            ScriptTask => "ScriptTSM",
            ReflectedLineAction => "ReflectableLASM",
            ReflectedScriptLine => "ReflectableSLSM",
        }
    }
}

impl fmt::Display for SmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable node of a constructed script.
///
/// Nodes hold no run state: every run receives its own [`SmHandoff`], so the
/// same node may run any number of times, concurrently.
pub enum StateMachine {
    Pattern(PatternSm),
    Phase(PhaseSm),
    ParallelAction { wait: f64, states: Children },
    SequentialAction { wait: f64, states: Children },
    End(Children),
    Finish(Children),
    Sequential(Children),
    Parallel(Children),
    Script(Children),
    Repeat(GtRepeat),
    Retarget { targets: Vec<String>, states: Children },
    If {
        predicate: GcxExpr,
        then: Rc<StateMachine>,
        otherwise: Rc<StateMachine>,
    },
    NoBlock(Rc<StateMachine>),
    Break,
    Alternate { indexer: GcxExpr, states: Children },
    Leaf(LeafSm),
}

impl StateMachine {
    pub fn kind(&self) -> SmKind {
        match self {
            Self::Pattern(_) => SmKind::Pattern,
            Self::Phase(phase) => phase.kind(),
            Self::ParallelAction { .. } => SmKind::PhaseParallelAction,
            Self::SequentialAction { .. } => SmKind::PhaseSequentialAction,
            Self::End(_) => SmKind::EndPhase,
            Self::Finish(_) => SmKind::FinishPhase,
            Self::Sequential(_) => SmKind::Sequential,
            Self::Parallel(_) => SmKind::Parallel,
            Self::Script(_) => SmKind::ScriptTask,
            Self::Repeat(repeat) => repeat.kind(),
            Self::Retarget { .. } => SmKind::Retarget,
            Self::If { .. } => SmKind::If,
            Self::NoBlock(_) => SmKind::NoBlock,
            Self::Break => SmKind::Break,
            Self::Alternate { .. } => SmKind::Alternate,
            Self::Leaf(leaf) => leaf.kind(),
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, Self::Break)
    }

    /// Direct children, in execution order where one exists.
    pub fn children(&self) -> Vec<Rc<StateMachine>> {
        match self {
            Self::Pattern(pattern) => pattern.phases().to_vec(),
            Self::Phase(phase) => phase.all_children(),
            Self::ParallelAction { states, .. }
            | Self::SequentialAction { states, .. }
            | Self::End(states)
            | Self::Finish(states)
            | Self::Sequential(states)
            | Self::Parallel(states)
            | Self::Script(states)
            | Self::Retarget { states, .. }
            | Self::Alternate { states, .. } => states.clone(),
            Self::Repeat(repeat) => repeat.states().to_vec(),
            Self::If {
                then, otherwise, ..
            } => vec![Rc::clone(then), Rc::clone(otherwise)],
            Self::NoBlock(state) => vec![Rc::clone(state)],
            Self::Break | Self::Leaf(_) => Vec::new(),
        }
    }

    /// Starts this node. The returned task completes when the node does.
    pub fn start(self: &Rc<Self>, smh: SmHandoff) -> SmTask {
        let this = Rc::clone(self);
        async move {
            match &*this {
                Self::Pattern(pattern) => pattern.run(smh).await,
                Self::Phase(phase) => phase.run(0, false, smh).await,
                Self::ParallelAction { wait, states } => {
                    if *wait > 0.0 {
                        wait_for_unchecked(smh.ct().clone(), *wait, false).await?;
                        smh.throw_if_cancelled()?;
                    }
                    run_parallel(states, &smh).await
                }
                Self::SequentialAction { wait, states } => {
                    wait_for_unchecked(smh.ct().clone(), *wait, false).await?;
                    smh.throw_if_cancelled()?;
                    run_sequential(states, &smh).await
                }
                Self::End(states) | Self::Finish(states) | Self::Parallel(states) => {
                    run_parallel(states, &smh).await
                }
                Self::Sequential(states) | Self::Script(states) => {
                    run_sequential(states, &smh).await
                }
                Self::Repeat(repeat) => repeat.run(smh).await,
                Self::Retarget { targets, states } => {
                    universal::retarget(targets, states, smh).await
                }
                Self::If {
                    predicate,
                    then,
                    otherwise,
                } => universal::branch(predicate, then, otherwise, smh).await,
                Self::NoBlock(state) => universal::no_block(state, &smh),
                Self::Break => Ok(()),
                Self::Alternate { indexer, states } => {
                    universal::alternate(indexer, states, smh).await
                }
                Self::Leaf(leaf) => leaf.run(smh).await,
            }
        }
        .boxed_local()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(leaf) => write!(f, "{:?}", leaf),
            other => {
                let mut tuple = f.debug_tuple(other.kind().name());
                for child in other.children() {
                    tuple.field(&child);
                }
                tuple.finish()
            }
        }
    }
}

/// Awaits children in order on the same context, stopping at the first cancellation.
pub(crate) async fn run_sequential(states: &[Rc<StateMachine>], smh: &SmHandoff) -> Result<(), SmError> {
    for state in states {
        state.start(smh.share()).await?;
        smh.throw_if_cancelled()?;
    }
    Ok(())
}

/// Runs children together, each on its own copy of the generation context.
pub(crate) async fn run_parallel(states: &[Rc<StateMachine>], smh: &SmHandoff) -> Result<(), SmError> {
    match states {
        [] => Ok(()),
        [only] => only.start(smh.copy()).await,
        _ => {
            let tasks = states.iter().map(|state| state.start(smh.copy())).collect();
            join_all(tasks).await
        }
    }
}

#[cfg(test)]
mod tests;
