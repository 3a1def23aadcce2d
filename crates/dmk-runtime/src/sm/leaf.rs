use std::fmt;
use std::rc::Rc;

use dmk_core::SmError;
use log::info;

use crate::expr::GcxExpr;
use crate::gcx::V2;
use crate::handoff::SmHandoff;
use crate::host::{HostEvent, TimerAction};
use crate::scheduler::{yield_frame, SmTask};
use crate::wait::{wait_for_unchecked, FRAME_TIME};

use super::SmKind;

pub const BOSS_EXPLODE_WAIT: f64 = 1.8;

/// A leaf action supplied by an embedder.
///
/// Implementations must not keep run state in `self`: clone what the task
/// needs out of the handoff.
pub trait CustomAction {
    fn start(&self, smh: &SmHandoff) -> SmTask;
}

/// Built-in single-line actions.
#[derive(Clone)]
pub enum LeafAction {
    ShiftPhase,
    /// Overrides the next phase, then shifts.
    ShiftPhaseTo(i64),
    DebugFloat(GcxExpr),
    Wait(GcxExpr),
    Print(String),
    Text(String),
    Dialogue(String),
    PlayerInvuln(i64),
    BossExplode,
    AnimateAttack,
    Timer(TimerAction, String),
    /// Linear move to `(x, y)` over `time` seconds.
    Move {
        time: GcxExpr,
        x: GcxExpr,
        y: GcxExpr,
    },
    Position(GcxExpr, GcxExpr),
    Noop,
    Custom(Rc<dyn CustomAction>),
}

pub struct LeafSm {
    name: String,
    kind: SmKind,
    action: LeafAction,
}

impl LeafSm {
    pub fn line_action(name: impl Into<String>, action: LeafAction) -> Self {
        Self {
            name: name.into(),
            kind: SmKind::ReflectedLineAction,
            action,
        }
    }

    pub fn script_line(name: impl Into<String>, action: LeafAction) -> Self {
        Self {
            name: name.into(),
            kind: SmKind::ReflectedScriptLine,
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SmKind {
        self.kind
    }

    pub fn action(&self) -> &LeafAction {
        &self.action
    }

    pub(crate) async fn run(&self, smh: SmHandoff) -> Result<(), SmError> {
        let exec = Rc::clone(smh.exec());
        let host = Rc::clone(smh.host());
        match &self.action {
            LeafAction::ShiftPhase => {
                exec.shift_phase();
            }
            LeafAction::ShiftPhaseTo(phase) => {
                exec.phase_controller()
                    .borrow_mut()
                    .low_priority_override(*phase, false);
                exec.shift_phase();
            }
            LeafAction::DebugFloat(value) => host.debug_float(value.eval(smh.gcx())?),
            LeafAction::Wait(seconds) => {
                let seconds = seconds.eval(smh.gcx())?;
                wait_for_unchecked(smh.ct().clone(), seconds, false).await?;
            }
            LeafAction::Print(text) => {
                info!("{}", text);
                host.print(text);
            }
            LeafAction::Text(text) => host.script_text(text),
            LeafAction::Dialogue(file) => host.event(HostEvent::Dialogue { file: file.clone() }),
            LeafAction::PlayerInvuln(frames) => {
                host.event(HostEvent::PlayerInvuln { frames: *frames })
            }
            LeafAction::BossExplode => {
                host.event(HostEvent::BossExplode {
                    at: exec.global_position(),
                });
                wait_for_unchecked(smh.ct().clone(), BOSS_EXPLODE_WAIT, false).await?;
            }
            LeafAction::AnimateAttack => host.event(HostEvent::AnimateAttack {
                target: exec.name().to_string(),
            }),
            LeafAction::Timer(action, name) => host.event(HostEvent::Timer {
                action: *action,
                name: name.clone(),
            }),
            LeafAction::Move { time, x, y } => {
                let time = time.eval(smh.gcx())?;
                let to = V2::new(x.eval(smh.gcx())?, y.eval(smh.gcx())?);
                let from = exec.global_position();
                let mut elapsed = 0.0;
                while elapsed < time && !smh.cancelled() {
                    exec.set_global_position(from.lerp(to, elapsed / time));
                    yield_frame().await;
                    elapsed += FRAME_TIME;
                }
                if smh.cancelled() {
                    return Err(SmError::cancelled());
                }
                exec.set_global_position(to);
            }
            LeafAction::Position(x, y) => {
                exec.set_global_position(V2::new(x.eval(smh.gcx())?, y.eval(smh.gcx())?));
            }
            LeafAction::Noop => {}
            LeafAction::Custom(action) => action.start(&smh).await?,
        }
        Ok(())
    }
}

impl fmt::Debug for LeafSm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.name(), self.name)
    }
}
