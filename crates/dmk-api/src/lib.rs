use std::rc::Rc;

use dmk_compiler::{create_from_dump_with, Registry};
use dmk_core::SmError;
use dmk_parser::{export_parsed_units, remake_as_string, ParsedUnit};
use dmk_runtime::wait::FRAME_TIME;
use dmk_runtime::{
    CancelToken, ExecutionTarget, GenCtx, Host, HostEvent, PhaseCompletion, PhaseProperties,
    PhaseType, RecordingHost, Scheduler, SmHandoff, StateMachine, Target,
};
use log::{debug, info};
use serde::Serialize;

pub use dmk_compiler::{create_from_dump, parse_phases};

/// How a script is driven by [`run_state_machine`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub seed: u32,
    /// The run stops unfinished after this many frames.
    pub max_frames: u64,
    /// Whether patterns wait two frames before each phase.
    pub phase_buffer: bool,
    /// Damage per second dealt to the executing target.
    pub player_dps: f64,
    pub target: String,
    /// Further targets that `@` can address.
    pub extra_targets: Vec<String>,
    /// Cancels the run's root token at the start of this frame.
    pub cancel_at: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            max_frames: 60 * 120,
            phase_buffer: true,
            player_dps: 0.0,
            target: "boss".to_string(),
            extra_targets: Vec::new(),
            cancel_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Faulted,
    /// `max_frames` elapsed first.
    Unfinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub code: String,
    pub message: String,
}

impl From<&SmError> for ReportedError {
    fn from(error: &SmError) -> Self {
        Self {
            code: error.code.clone(),
            message: error.message.clone(),
        }
    }
}

/// Everything the host observed during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub frames: u64,
    pub error: Option<ReportedError>,
    /// Faults raised by detached tasks such as `~` children.
    pub detached_faults: Vec<ReportedError>,
    pub debug_floats: Vec<f64>,
    pub prints: Vec<String>,
    pub texts: Vec<String>,
    pub events: Vec<HostEvent>,
    pub completions: Vec<PhaseCompletion>,
}

/// Header of one phase as listed by [`summarize_phases`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub index: usize,
    pub phase_type: Option<PhaseType>,
    pub title: Option<String>,
    pub hp: Option<f64>,
    pub photo_hp: Option<i64>,
    pub skip: bool,
}

impl PhaseSummary {
    fn new(index: usize, props: &PhaseProperties) -> Self {
        Self {
            index,
            phase_type: props.phase_type,
            title: props.card_title.clone(),
            hp: props.hp,
            photo_hp: props.photo_hp,
            skip: props.skip,
        }
    }
}

/// Parses a script and returns its macro-expanded token text.
pub fn expand_script(text: &str) -> Result<String, SmError> {
    remake_as_string(text)
}

/// Parses a script into the flat units the constructor reads.
pub fn expand_script_units(text: &str) -> Result<Vec<ParsedUnit>, SmError> {
    export_parsed_units(text)
}

/// Lists the property headers of every phase in a pattern script.
pub fn summarize_phases(text: &str) -> Result<Vec<PhaseSummary>, SmError> {
    Ok(parse_phases(text)?
        .iter()
        .enumerate()
        .map(|(index, props)| PhaseSummary::new(index, props))
        .collect())
}

/// Constructs and runs a script with the standard registry.
pub fn run_script(text: &str, options: &RunOptions) -> Result<RunReport, SmError> {
    let registry = Registry::standard()?;
    run_script_with(&registry, text, options)
}

pub fn run_script_with(
    registry: &Registry,
    text: &str,
    options: &RunOptions,
) -> Result<RunReport, SmError> {
    let root = create_from_dump_with(registry, text)?;
    Ok(run_state_machine(&root, options))
}

/// Runs `root` on a fresh target and host until it finishes or `max_frames` pass.
pub fn run_state_machine(root: &Rc<StateMachine>, options: &RunOptions) -> RunReport {
    let scheduler = Scheduler::new();
    let host = Rc::new(RecordingHost::new().with_phase_buffer(options.phase_buffer));
    let exec = Rc::new(Target::with_health(
        options.target.as_str(),
        1,
        scheduler.clone(),
        1.0,
    ));
    host.register_target(exec.clone());
    for (i, name) in options.extra_targets.iter().enumerate() {
        let seed_id = u32::try_from(i + 2).unwrap_or(u32::MAX);
        host.register_target(Rc::new(Target::new(name.as_str(), seed_id, scheduler.clone())));
    }

    let ct = CancelToken::new();
    let handoff = SmHandoff::root(
        exec.clone() as Rc<dyn ExecutionTarget>,
        host.clone() as Rc<dyn Host>,
        ct.clone(),
        GenCtx::new(options.seed),
    );
    info!("running {} with seed {}", root.kind(), options.seed);
    let handle = scheduler.spawn_tracked(root.start(handoff));
    let damage = options.player_dps * FRAME_TIME;
    while !handle.is_done() && scheduler.frame() < options.max_frames {
        if options.cancel_at == Some(scheduler.frame()) {
            debug!("cancelling run at frame {}", scheduler.frame());
            ct.cancel();
        }
        if damage > 0.0 {
            exec.receive_damage(damage);
        }
        scheduler.step();
    }

    let frames = scheduler.frame();
    let (outcome, error) = match handle.take_result() {
        Some(Ok(())) => (RunOutcome::Completed, None),
        Some(Err(error)) if error.is_cancellation() => (RunOutcome::Cancelled, None),
        Some(Err(error)) => (RunOutcome::Faulted, Some(ReportedError::from(&error))),
        None => {
            ct.cancel();
            (RunOutcome::Unfinished, None)
        }
    };
    scheduler.clear();
    let detached_faults = scheduler
        .take_faults()
        .iter()
        .map(ReportedError::from)
        .collect();
    info!("run ended after {} frames: {:?}", frames, outcome);
    RunReport {
        outcome,
        frames,
        error,
        detached_faults,
        debug_floats: host.debug_floats(),
        prints: host.prints(),
        texts: host.texts(),
        events: host.events(),
        completions: host.completions(),
    }
}
