use std::rc::Rc;

use dmk_core::SmError;
use log::{debug, info};

use crate::handoff::{SmContext, SmHandoff};
use crate::host::HostEvent;
use crate::properties::{
    PatternProperties, PhaseClearMethod, PhaseCompletion, PhaseProperties, PhaseType,
};
use crate::target::Vulnerability;
use crate::wait::{wait_for, wait_for_unchecked, wait_then_cancel, wait_then_cb, FRAME_TIME};

use super::{run_sequential, Children, LeafAction, LeafSm, SmKind, StateMachine};

/// Frames waited before each phase so bullets from the previous one can clear.
const PHASE_BUFFER_FRAMES: f64 = 2.0;

/// `pattern`: runs its phases in the order the target's phase controller decides.
pub struct PatternSm {
    props: PatternProperties,
    phases: Vec<Rc<StateMachine>>,
}

impl PatternSm {
    /// Every child must be a phase.
    pub fn new(props: PatternProperties, states: Children) -> Result<Self, SmError> {
        if let Some(other) = states.iter().find(|state| !matches!(***state, StateMachine::Phase(_))) {
            return Err(SmError::new(
                "BUILD_ILLEGAL_CHILD",
                format!(
                    "State machine {} is not allowed to be a child of {}.",
                    other.kind(),
                    SmKind::Pattern
                ),
            ));
        }
        Ok(Self {
            props,
            phases: states,
        })
    }

    pub fn props(&self) -> &PatternProperties {
        &self.props
    }

    pub fn phases(&self) -> &[Rc<StateMachine>] {
        &self.phases
    }

    fn phase(&self, index: i64) -> Option<&PhaseSm> {
        let index = usize::try_from(index).ok()?;
        match self.phases.get(index).map(|state| &**state) {
            Some(StateMachine::Phase(phase)) => Some(phase),
            _ => None,
        }
    }

    fn remaining_lives(&self, from: usize) -> usize {
        self.phases
            .iter()
            .skip(from)
            .filter(|state| match &***state {
                StateMachine::Phase(phase) => {
                    phase.props.phase_type.is_some_and(PhaseType::is_spell)
                }
                _ => false,
            })
            .count()
    }

    pub(crate) async fn run(&self, smh: SmHandoff) -> Result<(), SmError> {
        let (jsmh, trigger) = smh.joint(Some(SmContext::new()));
        let result = self.run_phases(&jsmh).await;
        trigger.cancel();
        if self.props.boss.is_some() {
            jsmh.host().event(HostEvent::CloseBoss);
        }
        result
    }

    async fn run_phases(&self, jsmh: &SmHandoff) -> Result<(), SmError> {
        let exec = Rc::clone(jsmh.exec());
        let host = Rc::clone(jsmh.host());
        let has_boss = self.props.boss.is_some();
        let mut bgm_started = false;
        let mut next = exec.phase_controller().borrow_mut().go_to_next_phase(None);
        while let Some(phase) = self.phase(next) {
            let index = next as usize;
            if phase.props.skip {
                debug!("Skipping phase {index}.");
            } else {
                jsmh.throw_if_cancelled()?;
                if host.phase_buffer() {
                    wait_for(jsmh.ct().clone(), PHASE_BUFFER_FRAMES * FRAME_TIME, false).await?;
                }
                let tracks = match self.props.bgm_at(next) {
                    None if !bgm_started => self.props.bgm_bounded(next),
                    tracks => tracks,
                };
                if let Some(tracks) = tracks {
                    bgm_started = true;
                    host.event(HostEvent::Bgm { tracks });
                }
                if next >= self.props.set_ui_from {
                    if let Some(boss) = self.props.boss_for_ui(next) {
                        let lives = phase
                            .props
                            .lives_override
                            .and_then(|lives| usize::try_from(lives).ok())
                            .unwrap_or_else(|| self.remaining_lives(index));
                        host.event(HostEvent::BossUi { boss, lives });
                    }
                }
                debug!("Pattern entering phase {index}.");
                phase.run(index, has_boss, jsmh.share()).await?;
            }
            next = exec
                .phase_controller()
                .borrow_mut()
                .go_to_next_phase(Some(next + 1));
        }
        Ok(())
    }
}

/// `phase`: a sequence of actions that ends by timeout, by defeat or by an explicit shift.
pub struct PhaseSm {
    kind: SmKind,
    timeout: f64,
    pub(crate) props: PhaseProperties,
    states: Children,
    end: Option<Rc<StateMachine>>,
    finish: Option<Rc<StateMachine>>,
}

impl PhaseSm {
    /// `timeout` is in seconds, zero meaning none. The first `end` and `finish`
    /// children are pulled out of the sequence.
    pub fn new(timeout: f64, props: PhaseProperties, states: Children) -> Self {
        let mut end = None;
        let mut finish = None;
        let mut body = Vec::with_capacity(states.len());
        for state in states {
            match state.kind() {
                SmKind::EndPhase if end.is_none() => end = Some(state),
                SmKind::FinishPhase if finish.is_none() => finish = Some(state),
                _ => body.push(state),
            }
        }
        Self {
            kind: SmKind::Phase,
            timeout,
            props,
            states: body,
            end,
            finish,
        }
    }

    /// `phased file`: plays a dialogue, then shifts to the next phase.
    pub fn dialogue(file: impl Into<String>, mut props: PhaseProperties) -> Self {
        props.phase_type.get_or_insert(PhaseType::Dialogue);
        let action = StateMachine::SequentialAction {
            wait: 0.0,
            states: vec![
                Rc::new(StateMachine::Leaf(LeafSm::line_action(
                    "dialogue",
                    LeafAction::Dialogue(file.into()),
                ))),
                Rc::new(StateMachine::Leaf(LeafSm::line_action(
                    "shiftphase",
                    LeafAction::ShiftPhase,
                ))),
            ],
        };
        Self {
            kind: SmKind::DialoguePhase,
            ..Self::new(0.0, props, vec![Rc::new(action)])
        }
    }

    /// `phasej timeout from`: keeps the first action, drops the `from - 1` after
    /// it and starts the first kept action without its delay.
    pub fn jump(timeout: f64, from: usize, props: PhaseProperties, states: Children) -> Self {
        let mut phase = Self::new(timeout, props, states);
        if from > 0 {
            let skip_until = from.min(phase.states.len());
            phase.states.drain(1.min(skip_until)..skip_until);
        }
        let first_kept = if from == 0 { 0 } else { 1 };
        if let Some(state) = phase.states.get_mut(first_kept) {
            let undelayed = match &**state {
                StateMachine::ParallelAction { states, .. } => Some(StateMachine::ParallelAction {
                    wait: 0.0,
                    states: states.clone(),
                }),
                StateMachine::SequentialAction { states, .. } => {
                    Some(StateMachine::SequentialAction {
                        wait: 0.0,
                        states: states.clone(),
                    })
                }
                _ => None,
            };
            if let Some(undelayed) = undelayed {
                *state = Rc::new(undelayed);
            }
        }
        Self {
            kind: SmKind::JumpPhase,
            ..phase
        }
    }

    pub fn kind(&self) -> SmKind {
        self.kind
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    pub fn props(&self) -> &PhaseProperties {
        &self.props
    }

    pub fn states(&self) -> &[Rc<StateMachine>] {
        &self.states
    }

    pub fn end(&self) -> Option<&Rc<StateMachine>> {
        self.end.as_ref()
    }

    pub fn finish(&self) -> Option<&Rc<StateMachine>> {
        self.finish.as_ref()
    }

    pub(super) fn all_children(&self) -> Vec<Rc<StateMachine>> {
        self.states
            .iter()
            .chain(self.end.iter())
            .chain(self.finish.iter())
            .cloned()
            .collect()
    }

    fn prepare(&self, index: usize, has_boss: bool, smh: &SmHandoff) {
        let host = smh.host();
        host.event(HostEvent::PhaseStart {
            index,
            phase_type: self.props.phase_type,
            title: self.props.card_title.clone(),
        });
        if let Some(enemy) = smh.exec().enemy() {
            if let Some(photos) = self.props.photo_hp {
                enemy.set_photo_hp(photos, photos);
            } else if let Some(hp) = self
                .props
                .hp
                .or_else(|| self.props.phase_type.and_then(PhaseType::default_hp))
            {
                enemy.set_hp(hp, hp);
            }
            enemy.set_hp_bar(
                self.props
                    .hp_bar
                    .or_else(|| self.props.phase_type.and_then(PhaseType::hp_bar_length))
                    .unwrap_or(1.0),
            );
            enemy.set_vulnerability(
                self.props
                    .phase_type
                    .and_then(PhaseType::default_vulnerability)
                    .unwrap_or(if has_boss {
                        Vulnerability::NoDamage
                    } else {
                        Vulnerability::Vulnerable
                    }),
            );
        }
        if self.props.boss_cutin && has_boss {
            host.event(HostEvent::BossCutin);
        } else if let Some(index) = self.props.spell_cutin().filter(|_| has_boss) {
            host.event(HostEvent::SpellCutin { index });
        }
        if let Some(style) = &self.props.background {
            host.event(HostEvent::Background {
                style: style.clone(),
                transition: self.props.bg_transition_in.clone(),
            });
        }
    }

    fn prepare_timeout(&self, joint: &SmHandoff) -> Result<(), SmError> {
        let exec = joint.exec();
        exec.set_phase_shifter(Some(joint.ct().clone()));
        if let Some(invuln) = self.props.invuln_time {
            if self.props.phase_type != Some(PhaseType::Timeout) {
                let target = Rc::clone(exec);
                wait_then_cb(joint.scheduler(), joint.ct().clone(), invuln, false, move || {
                    if let Some(enemy) = target.enemy() {
                        enemy.set_vulnerability(Vulnerability::Vulnerable);
                    }
                })?;
            }
        }
        wait_then_cancel(
            joint.scheduler(),
            joint.ct().clone(),
            self.timeout,
            true,
            joint.ct().clone(),
        )
    }

    fn clear_method(&self, smh: &SmHandoff, phase_token_fired: bool) -> PhaseClearMethod {
        if !phase_token_fired {
            return PhaseClearMethod::Cancelled;
        }
        let Some(enemy) = smh.exec().enemy() else {
            return PhaseClearMethod::Timeout;
        };
        if enemy.photo_hp() <= 0 && self.props.photo_hp.unwrap_or(0) > 0 {
            PhaseClearMethod::Photo
        } else if enemy.hp() <= 0.0 && self.props.hp.unwrap_or(0.0) > 0.0 {
            PhaseClearMethod::Hp
        } else {
            PhaseClearMethod::Timeout
        }
    }

    pub(crate) async fn run(&self, index: usize, has_boss: bool, smh: SmHandoff) -> Result<(), SmError> {
        let host = Rc::clone(smh.host());
        let exec = Rc::clone(smh.exec());
        let context = SmContext::new();
        self.prepare(index, has_boss, &smh);
        if self.props.lenient() {
            host.event(HostEvent::Lenience { enabled: true });
            let host = Rc::clone(&host);
            context.add_phase_object(move || host.event(HostEvent::Lenience { enabled: false }));
        }
        for challenge in &self.props.challenges {
            host.event(HostEvent::Challenge {
                name: challenge.clone(),
                active: true,
            });
            let host = Rc::clone(&host);
            let name = challenge.clone();
            context.add_phase_object(move || {
                host.event(HostEvent::Challenge {
                    name,
                    active: false,
                })
            });
        }
        if let Some(root) = &self.props.root_move {
            root.start(smh.share()).await?;
        }
        smh.throw_if_cancelled()?;
        let start_frame = smh.scheduler().frame();
        let (joint, phase_token) = smh.joint(Some(context));
        self.prepare_timeout(&joint)?;
        let body = async {
            run_sequential(&self.states, &joint).await?;
            // Phases only end through their token: timeout, defeat or a shift.
            wait_for_unchecked(joint.ct().clone(), 0.0, true).await?;
            joint.throw_if_cancelled()
        };
        match body.await {
            Err(error) if error.is_cancellation() => {}
            other => return other,
        }

        if exec
            .phase_shifter()
            .is_some_and(|shifter| shifter.same(&phase_token))
        {
            exec.set_phase_shifter(None);
        }
        if let Some(enemy) = exec.enemy() {
            enemy.set_vulnerability(Vulnerability::NoDamage);
        }
        if exec.allow_finish_calls() {
            if let Some(transition) = &self.props.bg_transition_out {
                host.event(HostEvent::BackgroundOut {
                    transition: transition.clone(),
                });
            }
            let method = self.clear_method(&smh, phase_token.own_cancelled());
            let elapsed = smh.scheduler().frame().saturating_sub(start_frame);
            host.phase_completed(PhaseCompletion::new(index, &self.props, method, elapsed));
            if let Some(finish) = &self.finish {
                smh.scheduler().spawn(finish.start(smh.copy()));
            }
        }
        if self.props.cleanup() && !smh.cancelled() {
            host.softcull(index, self.props.phase_type);
        }
        joint.context().cleanup_objects();
        smh.throw_if_cancelled()?;
        if let Some(phase_type) = self.props.phase_type {
            info!(
                "Cleared {} phase: {}",
                phase_type,
                self.props.card_title.as_deref().unwrap_or("")
            );
        }
        if let Some(end) = &self.end {
            end.start(smh.share()).await?;
        }
        Ok(())
    }
}
