use std::cell::RefCell;
use std::rc::Rc;

use dmk_core::SmError;
use futures::FutureExt;

use super::*;
use crate::cancel::CancelToken;
use crate::expr::{GcxExpr, GcxRule};
use crate::gcx::{GenCtx, V2};
use crate::handoff::SmHandoff;
use crate::host::{Host, RecordingHost};
use crate::loop_control::GtrProps;
use crate::properties::{PhaseClearMethod, PhaseProperties, SmProperty};
use crate::scheduler::{Scheduler, SmTask, TaskHandle};
use crate::target::{ExecutionTarget, Target};
use crate::wait::{wait_for, wait_for_unchecked, FRAME_TIME};

struct Fixture {
    scheduler: Scheduler,
    host: Rc<RecordingHost>,
    exec: Rc<Target>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_exec(|scheduler| Target::new("boss", 9, scheduler))
    }

    fn with_exec(make: impl FnOnce(Scheduler) -> Target) -> Self {
        let scheduler = Scheduler::new();
        let exec = Rc::new(make(scheduler.clone()));
        let host = Rc::new(RecordingHost::new().with_phase_buffer(false));
        Self {
            scheduler,
            host,
            exec,
        }
    }

    fn handoff(&self, ct: &CancelToken) -> SmHandoff {
        let exec: Rc<dyn ExecutionTarget> = self.exec.clone();
        let host: Rc<dyn Host> = self.host.clone();
        SmHandoff::root(exec, host, ct.clone(), GenCtx::new(7))
    }

    fn run(&self, node: &Rc<StateMachine>, ct: &CancelToken) -> TaskHandle {
        self.scheduler.spawn_tracked(node.start(self.handoff(ct)))
    }
}

fn node(state: StateMachine) -> Rc<StateMachine> {
    Rc::new(state)
}

fn leaf(action: LeafAction) -> Rc<StateMachine> {
    node(StateMachine::Leaf(LeafSm::line_action("test", action)))
}

fn debugf(value: f64) -> Rc<StateMachine> {
    leaf(LeafAction::DebugFloat(GcxExpr::Const(value)))
}

fn custom(action: impl CustomAction + 'static) -> Rc<StateMachine> {
    leaf(LeafAction::Custom(Rc::new(action)))
}

fn expr(source: &str) -> GcxExpr {
    GcxExpr::parse(source).expect("expression should compile")
}

struct Probe {
    label: &'static str,
    frames: usize,
    log: Rc<RefCell<Vec<String>>>,
}

impl CustomAction for Probe {
    fn start(&self, smh: &SmHandoff) -> SmTask {
        let label = self.label;
        let frames = self.frames as f64;
        let log = Rc::clone(&self.log);
        let ct = smh.ct().clone();
        async move {
            log.borrow_mut().push(format!("{label} start"));
            wait_for(ct, frames * FRAME_TIME, false).await?;
            log.borrow_mut().push(format!("{label} end"));
            Ok(())
        }
        .boxed_local()
    }
}

struct Fault;

impl CustomAction for Fault {
    fn start(&self, _smh: &SmHandoff) -> SmTask {
        async { Err(SmError::new("RUNTIME_FAULT", "scripted failure")) }.boxed_local()
    }
}

struct Stall;

impl CustomAction for Stall {
    fn start(&self, smh: &SmHandoff) -> SmTask {
        wait_for_unchecked(smh.ct().clone(), 0.0, true).boxed_local()
    }
}

struct Sample {
    draws: usize,
    out: Rc<RefCell<Vec<f64>>>,
}

impl CustomAction for Sample {
    fn start(&self, smh: &SmHandoff) -> SmTask {
        let mut gcx = smh.gcx().borrow_mut();
        for _ in 0..self.draws {
            self.out.borrow_mut().push(gcx.rand(0.0, 1.0));
        }
        async { Ok(()) }.boxed_local()
    }
}

#[test]
fn sequential_cancellation_never_starts_later_children() {
    let fixture = Fixture::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let probe = |label, frames| {
        custom(Probe {
            label,
            frames,
            log: Rc::clone(&log),
        })
    };
    let sequence = node(StateMachine::Sequential(vec![
        probe("first", 0),
        probe("second", 10),
        probe("third", 0),
    ]));
    let ct = CancelToken::new();
    let handle = fixture.run(&sequence, &ct);
    fixture.scheduler.step();
    ct.cancel();
    fixture.scheduler.step();
    let result = handle.take_result().expect("sequence should end");
    assert!(result.expect_err("sequence should be cancelled").is_cancellation());
    let log = log.borrow();
    assert_eq!(*log, vec!["first start", "first end", "second start"]);
}

#[test]
fn parallel_fault_surfaces_without_waiting_for_a_stalled_sibling() {
    let fixture = Fixture::new();
    let group = node(StateMachine::Parallel(vec![custom(Stall), custom(Fault)]));
    let handle = fixture.run(&group, &CancelToken::new());
    let result = handle.take_result().expect("fault should end the group");
    assert_eq!(result.expect_err("group should fail").code, "RUNTIME_FAULT");
}

#[test]
fn parallel_fault_still_runs_the_siblings_first_frame() {
    let fixture = Fixture::new();
    let group = node(StateMachine::Parallel(vec![custom(Fault), debugf(5.0)]));
    let handle = fixture.run(&group, &CancelToken::new());
    let result = handle.take_result().expect("fault should end the group");
    assert_eq!(result.expect_err("group should fail").code, "RUNTIME_FAULT");
    assert_eq!(fixture.host.debug_floats(), vec![5.0]);
}

#[test]
fn single_child_parallel_propagates_the_child_error() {
    let fixture = Fixture::new();
    let group = node(StateMachine::Parallel(vec![custom(Fault)]));
    let handle = fixture.run(&group, &CancelToken::new());
    let result = handle.take_result().expect("group should end");
    assert_eq!(result.expect_err("group should fail").code, "RUNTIME_FAULT");
}

#[test]
fn parallel_siblings_do_not_share_random_state() {
    let first_sample = |other_draws| {
        let fixture = Fixture::new();
        let mine = Rc::new(RefCell::new(Vec::new()));
        let theirs = Rc::new(RefCell::new(Vec::new()));
        let group = node(StateMachine::Parallel(vec![
            custom(Sample {
                draws: other_draws,
                out: Rc::clone(&theirs),
            }),
            custom(Sample {
                draws: 1,
                out: Rc::clone(&mine),
            }),
        ]));
        let handle = fixture.run(&group, &CancelToken::new());
        assert!(handle.is_done());
        assert_eq!(theirs.borrow().len(), other_draws);
        let sample = mine.borrow()[0];
        sample
    };
    assert_eq!(first_sample(0), first_sample(5));
}

#[test]
fn repeater_runs_its_child_once_per_iteration() {
    let fixture = Fixture::new();
    let props = GtrProps {
        times: Some(GcxExpr::Const(4.0)),
        ..GtrProps::default()
    };
    let repeat = node(StateMachine::Repeat(
        GtRepeat::new(props, vec![debugf(1.0)]).expect("repeat should build"),
    ));
    let handle = fixture.run(&repeat, &CancelToken::new());
    let result = handle.take_result().expect("zero-wait repeat should finish at once");
    assert!(result.is_ok());
    assert_eq!(fixture.host.debug_floats(), vec![1.0; 4]);
    assert_eq!(fixture.scheduler.pending(), 0);
}

#[test]
fn repeater_waits_between_iterations() {
    let fixture = Fixture::new();
    let props = GtrProps {
        times: Some(GcxExpr::Const(3.0)),
        wait: Some(GcxExpr::Const(2.0)),
        ..GtrProps::default()
    };
    let repeat = node(StateMachine::Repeat(
        GtRepeat::new(props, vec![debugf(1.0)]).expect("repeat should build"),
    ));
    let handle = fixture.run(&repeat, &CancelToken::new());
    assert_eq!(fixture.host.debug_floats().len(), 1);
    fixture.scheduler.step();
    fixture.scheduler.step();
    assert_eq!(fixture.host.debug_floats().len(), 2);
    assert!(!handle.is_done());
    fixture.scheduler.step();
    fixture.scheduler.step();
    assert_eq!(fixture.host.debug_floats().len(), 3);
    assert!(handle.is_done());
}

#[test]
fn repeater_end_rules_reach_the_caller_only_on_a_normal_end() {
    let run = |cancel_after: Option<usize>| {
        let fixture = Fixture::new();
        let props = GtrProps {
            times: Some(GcxExpr::Const(3.0)),
            wait: Some(GcxExpr::Const(1.0)),
            end: vec![GcxRule::compile("finished = 1.0").expect("rule should compile")],
            ..GtrProps::default()
        };
        let repeat = node(StateMachine::Repeat(
            GtRepeat::new(props, vec![debugf(0.0)]).expect("repeat should build"),
        ));
        let after = node(StateMachine::If {
            predicate: expr("finished > 0.0"),
            then: debugf(1.0),
            otherwise: debugf(2.0),
        });
        let ct = CancelToken::new();
        let smh = fixture.handoff(&ct);
        smh.gcx().borrow_mut().set_var("finished", 0.0);
        let gcx_probe = smh.share();
        let handle = fixture.scheduler.spawn_tracked(repeat.start(smh));
        for frame in 0..5 {
            if cancel_after == Some(frame) {
                ct.cancel();
            }
            fixture.scheduler.step();
        }
        assert!(handle.is_done());
        let probe_handle = fixture.scheduler.spawn_tracked(after.start(gcx_probe.copy()));
        assert!(probe_handle.is_done());
        fixture.host.debug_floats().last().copied()
    };
    assert_eq!(run(None), Some(1.0));
    assert_eq!(run(Some(0)), Some(2.0));
}

#[test]
fn if_evaluates_its_predicate_on_every_start() {
    let fixture = Fixture::new();
    let branch = node(StateMachine::If {
        predicate: expr("x > 0.0"),
        then: debugf(1.0),
        otherwise: debugf(2.0),
    });
    for x in [1.0, -1.0, 3.0] {
        let smh = fixture.handoff(&CancelToken::new());
        smh.gcx().borrow_mut().set_var("x", x);
        fixture.scheduler.spawn(branch.start(smh));
    }
    assert_eq!(fixture.host.debug_floats(), vec![1.0, 2.0, 1.0]);
}

#[test]
fn alternate_runs_only_the_indexed_child() {
    let fixture = Fixture::new();
    let choice = node(StateMachine::Alternate {
        indexer: expr("pick"),
        states: vec![debugf(10.0), debugf(11.0), debugf(12.0)],
    });
    for pick in [1.0, 5.0, -1.0] {
        let smh = fixture.handoff(&CancelToken::new());
        smh.gcx().borrow_mut().set_var("pick", pick);
        fixture.scheduler.spawn(choice.start(smh));
    }
    assert_eq!(fixture.host.debug_floats(), vec![11.0, 12.0, 12.0]);
}

#[test]
fn retarget_fans_out_to_every_registered_target() {
    let fixture = Fixture::new();
    let first = Rc::new(Target::new("fairy", 1, fixture.scheduler.clone()));
    let second = Rc::new(Target::new("fairy", 2, fixture.scheduler.clone()));
    fixture.host.register_target(first.clone());
    fixture.host.register_target(second.clone());
    let place = leaf(LeafAction::Position(GcxExpr::Const(1.0), GcxExpr::Const(2.0)));
    let retarget = node(StateMachine::Retarget {
        targets: vec!["fairy".into()],
        states: vec![place],
    });
    let handle = fixture.run(&retarget, &CancelToken::new());
    assert!(handle.is_done());
    assert_eq!(first.global_position(), V2::new(1.0, 2.0));
    assert_eq!(second.global_position(), V2::new(1.0, 2.0));
    assert_eq!(fixture.exec.global_position(), V2::default());

    let missing = node(StateMachine::Retarget {
        targets: vec!["nobody".into()],
        states: vec![debugf(1.0)],
    });
    let handle = fixture.run(&missing, &CancelToken::new());
    let result = handle.take_result().expect("missing targets should be a no-op");
    assert!(result.is_ok());
    assert!(fixture.host.debug_floats().is_empty());
}

#[test]
fn no_block_returns_before_its_child_finishes() {
    let fixture = Fixture::new();
    let delayed = node(StateMachine::Sequential(vec![
        leaf(LeafAction::Wait(GcxExpr::Const(FRAME_TIME * 2.0))),
        debugf(3.0),
    ]));
    let sequence = node(StateMachine::Sequential(vec![
        node(StateMachine::NoBlock(delayed)),
        debugf(4.0),
    ]));
    let handle = fixture.run(&sequence, &CancelToken::new());
    assert!(handle.is_done());
    assert_eq!(fixture.host.debug_floats(), vec![4.0]);
    fixture.scheduler.step();
    fixture.scheduler.step();
    assert_eq!(fixture.host.debug_floats(), vec![4.0, 3.0]);
}

#[test]
fn move_interpolates_the_target_position() {
    let fixture = Fixture::new();
    let movement = leaf(LeafAction::Move {
        time: GcxExpr::Const(FRAME_TIME * 4.0),
        x: GcxExpr::Const(4.0),
        y: GcxExpr::Const(0.0),
    });
    let handle = fixture.run(&movement, &CancelToken::new());
    fixture.scheduler.step();
    fixture.scheduler.step();
    let midway = fixture.exec.global_position();
    assert!(midway.x > 0.0 && midway.x < 4.0);
    for _ in 0..3 {
        fixture.scheduler.step();
    }
    assert!(handle.is_done());
    assert_eq!(fixture.exec.global_position(), V2::new(4.0, 0.0));
}

#[test]
fn cancelled_move_reports_cancellation() {
    let fixture = Fixture::new();
    let movement = leaf(LeafAction::Move {
        time: GcxExpr::Const(FRAME_TIME * 10.0),
        x: GcxExpr::Const(4.0),
        y: GcxExpr::Const(0.0),
    });
    let ct = CancelToken::new();
    let handle = fixture.run(&movement, &ct);
    fixture.scheduler.step();
    ct.cancel();
    fixture.scheduler.step();
    let result = handle.take_result().expect("move should stop once cancelled");
    assert!(result.expect_err("move should be cancelled").is_cancellation());
    assert!(fixture.exec.global_position().x < 4.0);
}

fn saction(wait: f64, states: Vec<Rc<StateMachine>>) -> Rc<StateMachine> {
    node(StateMachine::SequentialAction { wait, states })
}

#[test]
fn phase_cleared_by_damage_reports_hp_and_runs_end() {
    let fixture = Fixture::with_exec(|scheduler| Target::with_health("boss", 9, scheduler, 1.0));
    let props = PhaseProperties::from_props(&[SmProperty::Hp {
        hp: 100.0,
        invuln: Some(0.0),
    }])
    .expect("props should fold");
    let phase = node(StateMachine::Phase(PhaseSm::new(
        0.0,
        props,
        vec![
            saction(0.0, vec![debugf(5.0)]),
            node(StateMachine::End(vec![debugf(6.0)])),
        ],
    )));
    let handle = fixture.run(&phase, &CancelToken::new());
    assert_eq!(fixture.host.debug_floats(), vec![5.0]);
    fixture.scheduler.step();
    assert!(!handle.is_done());
    fixture.exec.receive_damage(100.0);
    fixture.scheduler.step();
    let result = handle.take_result().expect("phase should end after defeat");
    assert!(result.is_ok());
    assert_eq!(fixture.host.debug_floats(), vec![5.0, 6.0]);
    let completions = fixture.host.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].clear_method, PhaseClearMethod::Hp);
    assert!(fixture.exec.phase_shifter().is_none());
}

#[test]
fn phase_timeout_reports_timeout() {
    let fixture = Fixture::new();
    let phase = node(StateMachine::Phase(PhaseSm::new(
        FRAME_TIME * 3.0,
        PhaseProperties::default(),
        vec![saction(0.0, vec![debugf(1.0)])],
    )));
    let handle = fixture.run(&phase, &CancelToken::new());
    for _ in 0..5 {
        fixture.scheduler.step();
    }
    assert!(handle.take_result().expect("phase should time out").is_ok());
    let completions = fixture.host.completions();
    assert_eq!(completions[0].clear_method, PhaseClearMethod::Timeout);
}

#[test]
fn outer_cancellation_propagates_through_a_phase() {
    let fixture = Fixture::new();
    let phase = node(StateMachine::Phase(PhaseSm::new(
        0.0,
        PhaseProperties::default(),
        vec![node(StateMachine::End(vec![debugf(9.0)]))],
    )));
    let ct = CancelToken::new();
    let handle = fixture.run(&phase, &ct);
    ct.cancel();
    fixture.scheduler.step();
    let result = handle.take_result().expect("phase should end");
    assert!(result.expect_err("phase should rethrow").is_cancellation());
    assert_eq!(
        fixture.host.completions()[0].clear_method,
        PhaseClearMethod::Cancelled
    );
    assert!(fixture.host.debug_floats().is_empty());
}

#[test]
fn pattern_runs_phases_until_each_shifts() {
    let fixture = Fixture::new();
    let phase = |value| shifting_phase(value, PhaseProperties::default());
    let pattern = node(StateMachine::Pattern(
        PatternSm::new(Default::default(), vec![phase(1.0), phase(2.0), phase(3.0)])
            .expect("pattern should build"),
    ));
    let handle = fixture.run(&pattern, &CancelToken::new());
    assert!(handle.take_result().expect("pattern should finish").is_ok());
    assert_eq!(fixture.host.debug_floats(), vec![1.0, 2.0, 3.0]);
    let indices: Vec<usize> = fixture
        .host
        .completions()
        .iter()
        .map(|completion| completion.phase_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

fn shifting_phase(value: f64, props: PhaseProperties) -> Rc<StateMachine> {
    node(StateMachine::Phase(PhaseSm::new(
        0.0,
        props,
        vec![saction(0.0, vec![debugf(value), leaf(LeafAction::ShiftPhase)])],
    )))
}

#[test]
fn skipped_phases_are_never_entered() {
    let fixture = Fixture::new();
    let skipped = PhaseProperties::from_props(&[SmProperty::Skip]).expect("props should fold");
    let pattern = node(StateMachine::Pattern(
        PatternSm::new(
            Default::default(),
            vec![
                shifting_phase(0.0, PhaseProperties::default()),
                shifting_phase(1.0, skipped),
                shifting_phase(2.0, PhaseProperties::default()),
            ],
        )
        .expect("pattern should build"),
    ));
    let handle = fixture.run(&pattern, &CancelToken::new());
    assert!(handle.is_done());
    assert_eq!(fixture.host.debug_floats(), vec![0.0, 2.0]);
}

#[test]
fn controller_override_jumps_past_intermediate_phases() {
    let fixture = Fixture::new();
    let phases = (0..4)
        .map(|index| shifting_phase(f64::from(index), PhaseProperties::default()))
        .collect();
    let pattern = node(StateMachine::Pattern(
        PatternSm::new(Default::default(), phases).expect("pattern should build"),
    ));
    fixture
        .exec
        .phase_controller()
        .borrow_mut()
        .set_go_to(3, None);
    let handle = fixture.run(&pattern, &CancelToken::new());
    assert!(handle.is_done());
    assert_eq!(fixture.host.debug_floats(), vec![0.0, 3.0]);
}

#[test]
fn pattern_rejects_non_phase_children() {
    let error = PatternSm::new(Default::default(), vec![debugf(1.0)])
        .err()
        .expect("a leaf should not be a pattern child");
    assert_eq!(error.code, "BUILD_ILLEGAL_CHILD");
}

#[test]
fn jump_phase_skips_to_the_requested_action() {
    let actions = vec![
        saction(1.0, vec![debugf(0.0)]),
        saction(1.0, vec![debugf(1.0)]),
        saction(1.0, vec![debugf(2.0)]),
        saction(1.0, vec![debugf(3.0)]),
    ];
    let phase = PhaseSm::jump(0.0, 2, PhaseProperties::default(), actions);
    assert_eq!(phase.kind(), SmKind::JumpPhase);
    let waits: Vec<f64> = phase
        .states()
        .iter()
        .map(|state| match &**state {
            StateMachine::SequentialAction { wait, .. } => *wait,
            _ => -1.0,
        })
        .collect();
    assert_eq!(waits, vec![1.0, 0.0, 1.0]);
}

#[test]
fn kinds_follow_the_node_hierarchy() {
    assert!(SmKind::GtRepeat2.is_a(SmKind::Universal));
    assert!(SmKind::DialoguePhase.is_a(SmKind::Sequential));
    assert!(SmKind::EndPhase.is_a(SmKind::Parallel));
    assert!(SmKind::ReflectedScriptLine.is_a(SmKind::ScriptLine));
    assert!(!SmKind::ReflectedScriptLine.is_a(SmKind::LineAction));
    assert!(!SmKind::Phase.is_a(SmKind::Universal));
}
