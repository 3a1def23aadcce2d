use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::gcx::V2;
use crate::properties::{PhaseCompletion, PhaseType};
use crate::target::ExecutionTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    Start,
    Restart,
    Stop,
}

impl TimerAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "restart" => Some(Self::Restart),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Side effects requested by running state machines that the embedding game performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PhaseStart {
        index: usize,
        phase_type: Option<PhaseType>,
        title: Option<String>,
    },
    BossUi {
        boss: String,
        lives: usize,
    },
    CloseBoss,
    Bgm {
        tracks: Vec<String>,
    },
    Background {
        style: String,
        transition: Option<String>,
    },
    BackgroundOut {
        transition: String,
    },
    BossCutin,
    SpellCutin {
        index: usize,
    },
    Lenience {
        enabled: bool,
    },
    Challenge {
        name: String,
        active: bool,
    },
    PlayerInvuln {
        frames: i64,
    },
    BossExplode {
        at: V2,
    },
    AnimateAttack {
        target: String,
    },
    Timer {
        action: TimerAction,
        name: String,
    },
    Dialogue {
        file: String,
    },
}

/// The game-side collaborator of a running pattern.
pub trait Host {
    fn debug_float(&self, value: f64);
    fn print(&self, text: &str);
    fn script_text(&self, text: &str);
    fn event(&self, event: HostEvent);
    /// Requests removal of the bullets a phase left behind.
    fn softcull(&self, phase_index: usize, phase_type: Option<PhaseType>);
    fn phase_completed(&self, completion: PhaseCompletion);
    /// Targets registered under any of `names`, in registration order.
    fn find_targets(&self, names: &[String]) -> Vec<Rc<dyn ExecutionTarget>>;

    /// Whether patterns wait two frames before each phase.
    fn phase_buffer(&self) -> bool {
        true
    }
}

/// Host that keeps every request in memory for inspection.
#[derive(Default)]
pub struct RecordingHost {
    phase_buffer: bool,
    debug_floats: RefCell<Vec<f64>>,
    prints: RefCell<Vec<String>>,
    texts: RefCell<Vec<String>>,
    events: RefCell<Vec<HostEvent>>,
    softculls: RefCell<Vec<usize>>,
    completions: RefCell<Vec<PhaseCompletion>>,
    targets: RefCell<BTreeMap<String, Vec<Rc<dyn ExecutionTarget>>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            phase_buffer: true,
            ..Self::default()
        }
    }

    pub fn with_phase_buffer(mut self, enabled: bool) -> Self {
        self.phase_buffer = enabled;
        self
    }

    pub fn register_target(&self, target: Rc<dyn ExecutionTarget>) {
        self.targets
            .borrow_mut()
            .entry(target.name().to_string())
            .or_default()
            .push(target);
    }

    pub fn debug_floats(&self) -> Vec<f64> {
        self.debug_floats.borrow().clone()
    }

    pub fn prints(&self) -> Vec<String> {
        self.prints.borrow().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.borrow().clone()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    pub fn softculls(&self) -> Vec<usize> {
        self.softculls.borrow().clone()
    }

    pub fn completions(&self) -> Vec<PhaseCompletion> {
        self.completions.borrow().clone()
    }
}

impl Host for RecordingHost {
    fn debug_float(&self, value: f64) {
        self.debug_floats.borrow_mut().push(value);
    }

    fn print(&self, text: &str) {
        self.prints.borrow_mut().push(text.to_string());
    }

    fn script_text(&self, text: &str) {
        self.texts.borrow_mut().push(text.to_string());
    }

    fn event(&self, event: HostEvent) {
        self.events.borrow_mut().push(event);
    }

    fn softcull(&self, phase_index: usize, phase_type: Option<PhaseType>) {
        debug!("Softcull requested for phase {phase_index} ({phase_type:?}).");
        self.softculls.borrow_mut().push(phase_index);
    }

    fn phase_completed(&self, completion: PhaseCompletion) {
        self.completions.borrow_mut().push(completion);
    }

    fn find_targets(&self, names: &[String]) -> Vec<Rc<dyn ExecutionTarget>> {
        let targets = self.targets.borrow();
        names
            .iter()
            .filter_map(|name| targets.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    fn phase_buffer(&self) -> bool {
        self.phase_buffer
    }
}
