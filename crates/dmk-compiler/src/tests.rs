use std::rc::Rc;

use dmk_runtime::{
    GcxExpr, LeafAction, Parametrization, PhaseType, Rv2, SmKind, StateMachine,
};

use super::*;

fn build(source: &str) -> Rc<StateMachine> {
    create_from_dump(source).expect("script should construct")
}

fn build_err(source: &str) -> SmError {
    create_from_dump(source).expect_err("script should not construct")
}

fn kinds(nodes: &[Rc<StateMachine>]) -> Vec<SmKind> {
    nodes.iter().map(|node| node.kind()).collect()
}

/// Follows child indices down from `node`.
fn descend(node: &Rc<StateMachine>, path: &[usize]) -> Rc<StateMachine> {
    path.iter().fold(Rc::clone(node), |node, index| {
        Rc::clone(&node.children()[*index])
    })
}

fn constant(expr: &GcxExpr) -> Option<f64> {
    match expr {
        GcxExpr::Const(value) => Some(*value),
        GcxExpr::Script(_) => None,
    }
}

const BOSS_SCRIPT: &str = "
pattern { boss simp.mima }
<!> type non `First`
<!> hp 1000
phase 30
    paction 0
        debugf 1
    saction :2
        debugf 2
        wait 1
    end
        debugf 3
<!> type spell
phase 0
    saction
        shiftphase
";

#[test]
fn pattern_script_builds_the_expected_tree() {
    let root = build(BOSS_SCRIPT);
    let StateMachine::Pattern(pattern) = &*root else {
        panic!("expected a pattern, got {:?}", root.kind());
    };
    assert_eq!(pattern.props().boss.as_deref(), Some("simp.mima"));
    assert_eq!(kinds(pattern.phases()), vec![SmKind::Phase, SmKind::Phase]);

    let StateMachine::Phase(first) = &*pattern.phases()[0] else {
        panic!("expected a phase");
    };
    assert_eq!(first.timeout(), 30.0);
    assert_eq!(first.props().hp, Some(1000.0));
    assert_eq!(first.props().phase_type, Some(PhaseType::NonSpell));
    assert_eq!(first.props().card_title.as_deref(), Some("First"));
    assert_eq!(
        kinds(&pattern.phases()[0].children()),
        vec![
            SmKind::PhaseParallelAction,
            SmKind::PhaseSequentialAction,
            SmKind::EndPhase
        ]
    );
    let StateMachine::SequentialAction { wait, states } = &*first.states()[1] else {
        panic!("expected a sequential action");
    };
    assert_eq!(*wait, 0.0);
    assert_eq!(states.len(), 2);
    assert_eq!(kinds(states), vec![SmKind::ReflectedLineAction; 2]);

    let StateMachine::Phase(second) = &*pattern.phases()[1] else {
        panic!("expected a phase");
    };
    assert_eq!(second.props().phase_type, Some(PhaseType::Spell));
    assert_eq!(second.props().hp, None);
}

#[test]
fn keywords_are_case_insensitive() {
    let root = build("PATTERN\nPhase 0\n    SACTION\n        DebugF 2\n");
    assert_eq!(root.kind(), SmKind::Pattern);
}

#[test]
fn action_under_a_pattern_is_an_illegal_child() {
    let error = build_err("pattern\npaction 0\n    debugf 1\n");
    assert_eq!(error.code, "BUILD_ILLEGAL_CHILD");
    assert!(error.message.starts_with(
        "Line 2: State machine PhaseParallelActionSM/paction is not allowed to be a child of PatternSM."
    ));
    assert!(error.message.contains("≪paction≫"));
}

#[test]
fn phase_directly_under_a_phase_is_an_illegal_child() {
    let error = build_err("phase 0\n    phase 0\n");
    assert_eq!(error.code, "BUILD_ILLEGAL_CHILD");
    assert!(error.message.contains("PhaseSM/phase is not allowed to be a child of PhaseSM."));
}

#[test]
fn line_action_directly_under_a_phase_is_rejected() {
    let error = build_err("pattern\nphase 0\n    debugf 1\n");
    assert_eq!(error.code, "BUILD_ILLEGAL_CHILD");
    assert!(error
        .message
        .contains("debugf is a line action, which is not allowed to be a child of PhaseSM."));
}

#[test]
fn extra_text_after_a_statement_reports_its_line() {
    let error = build_err("pattern\nphase 0\n    saction 0\n        debugf 1 2\n");
    assert_eq!(error.code, "BUILD_LEFTOVER");
    assert!(error.message.starts_with("Line 4: Expected a newline after constructing debugf"));
    assert!(error.message.contains("debugf 1 ≪2≫"));
}

#[test]
fn unknown_keywords_are_reported_at_the_top_level() {
    let error = build_err("frobnicate 3\n");
    assert_eq!(error.code, "BUILD_UNKNOWN");
    assert!(error.message.contains("No state machine function found by name 'frobnicate'."));
}

#[test]
fn unknown_child_keyword_explains_the_leftover_text() {
    let error = build_err("pattern\nphase 0\n    saction 0\n        frobnicate 3\n");
    assert_eq!(error.code, "BUILD_UNKNOWN");
    assert!(error.message.starts_with("Line 4:"));
}

#[test]
fn child_count_marker_limits_children() {
    let root = build("gtr { times 2 } :1\n    debugf 1\n");
    assert_eq!(root.children().len(), 1);
    let error = build_err("gtr { times 2 } :1\n    debugf 1\n    debugf 2\n");
    assert_eq!(error.code, "BUILD_LEFTOVER");
}

#[test]
fn child_count_marker_requires_enough_children() {
    let error = build_err("pattern\nphase 0\n    saction :3\n        debugf 1\n");
    assert_eq!(error.code, "BUILD_CHILD_COUNT");
}

#[test]
fn break_stops_reading_children() {
    let root = build("saction 0\n    debugf 1\n    break\n");
    assert_eq!(
        kinds(&root.children()),
        vec![SmKind::ReflectedLineAction, SmKind::Break]
    );
    let error = build_err("saction 0\n    break\n    debugf 2\n");
    assert_eq!(error.code, "BUILD_LEFTOVER");
    assert!(error.message.contains("Behavior script has extra text."));
}

#[test]
fn repeater_properties_are_read_from_braces() {
    let root = build(
        "gtr {\n    times 5\n    wait 10\n    maxtimes 5\n    wait-child\n    rpp <1;2:45>\n    end `done = 1.0`\n    bindItr k\n    p mod\n} \n    debugf 1\n",
    );
    let StateMachine::Repeat(repeat) = &*root else {
        panic!("expected a repeater");
    };
    let props = repeat.props();
    assert_eq!(props.times.as_ref().and_then(constant), Some(5.0));
    assert_eq!(props.wait.as_ref().and_then(constant), Some(10.0));
    assert_eq!(props.max_times, Some(5));
    assert!(props.wait_child);
    assert!(!props.sequential);
    assert_eq!(props.rpp, Some(Rv2::new(0.0, 0.0, 1.0, 2.0, 45.0)));
    assert_eq!(props.end.len(), 1);
    assert_eq!(props.bind_itr.as_deref(), Some("k"));
    assert_eq!(props.parametrization, Parametrization::Mod);
    assert_eq!(repeat.states().len(), 1);
}

#[test]
fn repeater_children_can_be_given_as_a_braced_list() {
    let root = build("gtr {\n    wait-child\n    times 20\n} {\n    debugf 1\n    debugf 2\n}\n");
    let StateMachine::Repeat(repeat) = &*root else {
        panic!("expected a repeater");
    };
    assert!(repeat.props().wait_child);
    assert_eq!(repeat.props().times.as_ref().and_then(constant), Some(20.0));
    assert_eq!(repeat.states().len(), 2);

    let root = build("saction 0\n    gtr { times 2 } { debugf 1 }\n    debugf 3\n");
    assert_eq!(
        kinds(&root.children()),
        vec![SmKind::GtRepeat, SmKind::ReflectedLineAction]
    );
    assert_eq!(root.children()[0].children().len(), 1);
}

#[test]
fn repeater_shorthand_takes_wait_times_and_offset() {
    let root = build("gtr2 20 3 <5> { sequential }\n    debugf 1\n");
    let StateMachine::Repeat(repeat) = &*root else {
        panic!("expected a repeater");
    };
    assert_eq!(root.kind(), SmKind::GtRepeat2);
    let props = repeat.props();
    assert_eq!(props.wait.as_ref().and_then(constant), Some(20.0));
    assert_eq!(props.times.as_ref().and_then(constant), Some(3.0));
    assert_eq!(props.rpp, Some(Rv2::new(0.0, 0.0, 0.0, 0.0, 5.0)));
    assert!(props.sequential);
}

#[test]
fn unpause_without_while_is_rejected() {
    let error = build_err("gtr { times 2 unpause noop }\n    debugf 1\n");
    assert_eq!(error.code, "BUILD_GTR_UNPAUSE");
}

#[test]
fn unknown_repeater_property_is_reported() {
    let error = build_err("gtr { tiems 2 }\n    debugf 1\n");
    assert_eq!(error.code, "PROP_UNKNOWN");
    assert!(error.message.contains("No repeater property exists by name `tiems`."));
}

#[test]
fn parenthesized_arguments_bind_one_group_each() {
    let root = build("pattern\nphase 0\n    saction 0\n        move(2, 1 + 1, 3)\n");
    let leaf = descend(&root, &[0, 0, 0]);
    let StateMachine::Leaf(leaf) = &*leaf else {
        panic!("expected a leaf");
    };
    let LeafAction::Move { time, y, .. } = leaf.action() else {
        panic!("expected a move");
    };
    assert_eq!(constant(time), Some(2.0));
    assert_eq!(constant(y), Some(3.0));
}

#[test]
fn wrong_parenthesized_argument_count_is_rejected() {
    let error = build_err("saction 0\n    position(1, 2, 3)\n");
    assert_eq!(error.code, "BUILD_ARG_COUNT");
}

#[test]
fn missing_arguments_report_the_constructor() {
    let error = build_err("timer start\n");
    assert_eq!(error.code, "BUILD_ARG_MISSING");
    assert!(error.message.contains("Tried to construct timer"));
}

#[test]
fn strict_commas_aggregates_infix_expressions() {
    let error = build_err("saction 0\n    debugf 2 * 3\n");
    assert_eq!(error.code, "BUILD_LEFTOVER");
    let root = build("<#> strict commas\nsaction 0\n    debugf 2 * 3\n");
    let leaf = descend(&root, &[0]);
    let StateMachine::Leaf(leaf) = &*leaf else {
        panic!("expected a leaf");
    };
    let LeafAction::DebugFloat(expr) = leaf.action() else {
        panic!("expected debugf");
    };
    assert_eq!(expr.source(), "2 * 3");
}

#[test]
fn universal_nodes_inherit_the_enclosing_grammar() {
    let root = build(
        "pattern\nphase 0\n    saction 0\n        gtr { times 2 }\n            if `true` debugf 1 noop\n",
    );
    let repeat = descend(&root, &[0, 0, 0]);
    assert_eq!(repeat.kind(), SmKind::GtRepeat);
    assert_eq!(kinds(&repeat.children()), vec![SmKind::If]);
    let error = build_err("pattern\nphase 0\n    saction 0\n        gtr { times 2 }\n            text hello\n");
    assert_eq!(error.code, "BUILD_ILLEGAL_CHILD");
    assert!(error.message.contains(
        "text is a script line, which is not allowed to be a child of PhaseSequentialActionSM."
    ));
}

#[test]
fn script_lines_pick_their_flavour_from_the_parent() {
    let root = build("script\n    text hello\n    debugf 1\n");
    assert_eq!(
        kinds(&root.children()),
        vec![SmKind::ReflectedScriptLine, SmKind::ReflectedScriptLine]
    );
    let error = build_err("script\n    shiftphase\n");
    assert!(error.message.contains("shiftphase is a line action"));
}

#[test]
fn retarget_and_no_block_take_a_child_argument() {
    let root = build("saction 0\n    @ { mokou keine } debugf 1\n    ~ wait 2\n");
    let children = root.children();
    let StateMachine::Retarget { targets, states } = &*children[0] else {
        panic!("expected a retarget");
    };
    assert_eq!(targets, &vec!["mokou".to_string(), "keine".to_string()]);
    assert_eq!(states.len(), 1);
    assert_eq!(children[1].kind(), SmKind::NoBlock);
}

#[test]
fn single_retarget_name_need_not_be_braced() {
    let root = build("@ mokou debugf 1\n");
    let StateMachine::Retarget { targets, .. } = &*root else {
        panic!("expected a retarget");
    };
    assert_eq!(targets, &vec!["mokou".to_string()]);
}

#[test]
fn inline_phase_properties_follow_the_keyword() {
    let root = build("pattern\nphase 20 <!> hpi 500 3\n    saction\n        debugf 1\n");
    let phase = descend(&root, &[0]);
    let StateMachine::Phase(phase) = &*phase else {
        panic!("expected a phase");
    };
    assert_eq!(phase.timeout(), 20.0);
    assert_eq!(phase.props().hp, Some(500.0));
    assert_eq!(phase.props().invuln_time, Some(3.0));
}

#[test]
fn properties_before_a_non_phase_are_rejected() {
    let error = build_err("pattern\nphase 0\n    <!> hp 100\n    saction 0\n        debugf 1\n");
    assert_eq!(error.code, "BUILD_PROPERTY");
    assert!(error.message.contains("saction is not allowed to have phase properties."));
}

#[test]
fn pattern_properties_reject_phase_markers() {
    let error = build_err("pattern { bgm { (0, track-a) } setuifrom 2 boss a hp 3 }\n");
    assert_eq!(error.code, "PROP_UNKNOWN");
}

#[test]
fn pattern_bgm_and_bosses_are_read() {
    let root = build("pattern { bosses { a b } { (0, 0) (2, 1) } bgm { (0, intro) (3, finale) } }\nphase 0\n");
    let StateMachine::Pattern(pattern) = &*root else {
        panic!("expected a pattern");
    };
    let props = pattern.props();
    assert_eq!(props.bosses, Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(props.boss_ui, Some(vec![(0, 0), (2, 1)]));
    assert_eq!(props.bgm_bounded(4), Some(vec!["finale".to_string()]));
    assert_eq!(props.boss_for_ui(2), Some("b".to_string()));
}

#[test]
fn jump_and_dialogue_phases_are_constructed() {
    let root = build("pattern\nphasej 10 1\n    saction 0\n        debugf 1\n    saction 0\n        debugf 2\nphased intro.txt\n");
    assert_eq!(
        kinds(&root.children()),
        vec![SmKind::JumpPhase, SmKind::DialoguePhase]
    );
}

#[test]
fn events_validate_their_names() {
    let error = build_err("saction 0\n    event explode\n");
    assert_eq!(error.code, "BUILD_UNKNOWN_EVENT");
    let error = build_err("saction 0\n    event playerinvuln\n");
    assert_eq!(error.code, "BUILD_ARG_MISSING");
    let root = build("saction 0\n    event playerinvuln 60\n    timer restart t1\n");
    assert_eq!(root.children().len(), 2);
}

#[test]
fn phase_properties_are_collected_without_construction() {
    let phases = parse_phases(BOSS_SCRIPT).expect("phases should parse");
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[0].hp, Some(1000.0));
    assert_eq!(phases[1].phase_type, Some(PhaseType::Spell));
}

#[test]
fn custom_leaf_actions_can_be_registered() {
    let mut registry = Registry::standard().expect("standard registry");
    registry
        .register_leaf("flash", LeafFlavour::LineAction, vec![ParamKind::Number], |args| {
            Ok(LeafAction::Print(format!("flash {}", args.number(0)?)))
        })
        .expect("flash is free");
    let root = create_from_dump_with(&registry, "saction 0\n    flash 3\n").expect("script should construct");
    let leaf = descend(&root, &[0]);
    let StateMachine::Leaf(leaf) = &*leaf else {
        panic!("expected a leaf");
    };
    assert!(matches!(leaf.action(), LeafAction::Print(text) if text == "flash 3"));
}
