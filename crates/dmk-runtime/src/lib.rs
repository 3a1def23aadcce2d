pub mod cancel;
pub mod expr;
pub mod gcx;
pub mod handoff;
pub mod host;
pub mod join;
pub mod loop_control;
pub mod phase_controller;
pub mod properties;
pub mod rng;
pub mod scheduler;
pub mod sm;
pub mod target;
pub mod wait;

pub use cancel::CancelToken;
pub use expr::{GcxExpr, GcxRule};
pub use gcx::{GenCtx, Rv2, V2};
pub use handoff::{SmContext, SmHandoff};
pub use host::{Host, HostEvent, RecordingHost, TimerAction};
pub use loop_control::{GtrProps, Parametrization};
pub use phase_controller::{ControllerState, PhaseController};
pub use properties::{
    PatternProperties, PhaseClearMethod, PhaseCompletion, PhaseProperties, PhaseType, SmProperty,
};
pub use scheduler::{Scheduler, SmTask, TaskHandle};
pub use sm::{CustomAction, GtRepeat, LeafAction, LeafSm, PatternSm, PhaseSm, SmKind, StateMachine};
pub use target::{EnemyState, ExecutionTarget, Target, Vulnerability};
