use std::collections::BTreeMap;
use std::rc::Rc;

use dmk_core::SmError;
use dmk_runtime::{
    GtRepeat, LeafAction, PatternSm, PhaseSm, SmKind, StateMachine, TimerAction,
};

use crate::args::{BoundArgs, ParamKind};

use ParamKind::{Child, Expr, GtrProps, Int, List, Number, Optional, PatternProps, PhaseProps, Rv2, Text};

pub type NodeBuilder = Rc<dyn Fn(BoundArgs) -> Result<StateMachine, SmError>>;
pub type LeafBuilder = Rc<dyn Fn(&BoundArgs) -> Result<LeafAction, SmError>>;

/// A keyword that constructs a structural node.
#[derive(Clone)]
pub struct NodeEntry {
    pub kind: SmKind,
    pub params: Vec<ParamKind>,
    /// Whether children follow the arguments.
    pub reads_children: bool,
    build: NodeBuilder,
}

impl NodeEntry {
    pub fn build(&self, args: BoundArgs) -> Result<StateMachine, SmError> {
        (self.build)(args)
    }
}

/// Where a leaf action may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafFlavour {
    LineAction,
    ScriptLine,
    Both,
}

impl LeafFlavour {
    pub fn allows(self, kind: SmKind) -> bool {
        match self {
            LeafFlavour::LineAction => kind == SmKind::ReflectedLineAction,
            LeafFlavour::ScriptLine => kind == SmKind::ReflectedScriptLine,
            LeafFlavour::Both => {
                kind == SmKind::ReflectedLineAction || kind == SmKind::ReflectedScriptLine
            }
        }
    }
}

#[derive(Clone)]
pub struct LeafEntry {
    pub flavour: LeafFlavour,
    pub params: Vec<ParamKind>,
    build: LeafBuilder,
}

impl LeafEntry {
    pub fn build(&self, args: &BoundArgs) -> Result<LeafAction, SmError> {
        (self.build)(args)
    }
}

/// Child kinds a node accepts, for the kinds that restrict their children.
pub fn allowed_children(kind: SmKind) -> Option<&'static [SmKind]> {
    use SmKind::*;
    match kind {
        Pattern => Some(&[Phase]),
        Phase => Some(&[
            PhaseParallelAction,
            PhaseSequentialAction,
            EndPhase,
            FinishPhase,
            Universal,
        ]),
        PhaseParallelAction | PhaseSequentialAction | EndPhase | FinishPhase => {
            Some(&[LineAction, Universal])
        }
        ScriptTask => Some(&[ScriptLine]),
        _ => None,
    }
}

/// The restriction inherited by `kind`: the entry of the nearest ancestor kind that has one.
pub fn grammar_for(kind: SmKind) -> Option<&'static [SmKind]> {
    let mut current = Some(kind);
    while let Some(kind) = current {
        if let Some(allowed) = allowed_children(kind) {
            return Some(allowed);
        }
        current = kind.parent();
    }
    None
}

pub fn can_create(allowed: &[SmKind], child: SmKind) -> bool {
    allowed.iter().any(|kind| child.is_a(*kind))
}

/// Keyword and leaf-action tables consulted by the constructor.
///
/// Names are case-insensitive. The standard registry can be extended with
/// further leaf actions through [`Registry::register_leaf`].
#[derive(Clone, Default)]
pub struct Registry {
    nodes: BTreeMap<String, NodeEntry>,
    leaves: BTreeMap<String, LeafEntry>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn node(&self, name: &str) -> Option<&NodeEntry> {
        self.nodes.get(&name.to_ascii_lowercase())
    }

    pub fn leaf(&self, name: &str) -> Option<&LeafEntry> {
        self.leaves.get(&name.to_ascii_lowercase())
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn leaf_names(&self) -> impl Iterator<Item = &str> {
        self.leaves.keys().map(String::as_str)
    }

    fn check_free(&self, name: &str) -> Result<String, SmError> {
        let key = name.to_ascii_lowercase();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(SmError::new(
                "BUILD_REGISTRY",
                format!("`{}` is not a valid keyword.", name),
            ));
        }
        if self.nodes.contains_key(&key) || self.leaves.contains_key(&key) {
            return Err(SmError::new(
                "BUILD_REGISTRY",
                format!("Keyword `{}` is already registered.", key),
            ));
        }
        Ok(key)
    }

    pub fn register_node(
        &mut self,
        name: &str,
        kind: SmKind,
        params: Vec<ParamKind>,
        reads_children: bool,
        build: impl Fn(BoundArgs) -> Result<StateMachine, SmError> + 'static,
    ) -> Result<(), SmError> {
        let key = self.check_free(name)?;
        self.nodes.insert(
            key,
            NodeEntry {
                kind,
                params,
                reads_children,
                build: Rc::new(build),
            },
        );
        Ok(())
    }

    pub fn register_leaf(
        &mut self,
        name: &str,
        flavour: LeafFlavour,
        params: Vec<ParamKind>,
        build: impl Fn(&BoundArgs) -> Result<LeafAction, SmError> + 'static,
    ) -> Result<(), SmError> {
        let key = self.check_free(name)?;
        self.leaves.insert(
            key,
            LeafEntry {
                flavour,
                params,
                build: Rc::new(build),
            },
        );
        Ok(())
    }

    /// Checks the tables for entries the constructor could never satisfy.
    pub fn validate(&self) -> Result<(), SmError> {
        for (name, entry) in &self.nodes {
            if entry.kind.is_a(SmKind::LineAction) || entry.kind.is_a(SmKind::ScriptLine) {
                return Err(SmError::new(
                    "BUILD_REGISTRY",
                    format!("Keyword `{}` builds a leaf kind; register it as a leaf action.", name),
                ));
            }
            let phase_props = entry
                .params
                .iter()
                .filter(|param| **param == PhaseProps)
                .count();
            if phase_props > 1 {
                return Err(SmError::new(
                    "BUILD_REGISTRY",
                    format!("Keyword `{}` takes phase properties more than once.", name),
                ));
            }
            if entry.reads_children && grammar_for(entry.kind).is_none() && !entry.kind.is_a(SmKind::Universal) {
                return Err(SmError::new(
                    "BUILD_REGISTRY",
                    format!(
                        "Keyword `{}` reads children, but {} has no child grammar.",
                        name,
                        entry.kind.name()
                    ),
                ));
            }
        }
        for (name, entry) in &self.leaves {
            if entry.params.contains(&PhaseProps) {
                return Err(SmError::new(
                    "BUILD_REGISTRY",
                    format!("Leaf action `{}` cannot take phase properties.", name),
                ));
            }
        }
        Ok(())
    }

    /// Every keyword and leaf action the script language ships with.
    pub fn standard() -> Result<Self, SmError> {
        let mut registry = Self::empty();
        registry.register_standard_nodes()?;
        registry.register_standard_leaves()?;
        registry.validate()?;
        Ok(registry)
    }

    fn register_standard_nodes(&mut self) -> Result<(), SmError> {
        self.register_node("pattern", SmKind::Pattern, vec![PatternProps], true, |args| {
            Ok(StateMachine::Pattern(PatternSm::new(
                args.pattern_props(0)?,
                args.children(),
            )?))
        })?;
        self.register_node(
            "phase",
            SmKind::Phase,
            vec![Optional(&Number), PhaseProps],
            true,
            |args| {
                Ok(StateMachine::Phase(PhaseSm::new(
                    args.optional_number(0)?.unwrap_or(0.0),
                    args.phase_props(1)?,
                    args.children(),
                )))
            },
        )?;
        self.register_node(
            "phased",
            SmKind::DialoguePhase,
            vec![Text, PhaseProps],
            false,
            |args| Ok(StateMachine::Phase(PhaseSm::dialogue(args.text(0)?, args.phase_props(1)?))),
        )?;
        self.register_node(
            "phasej",
            SmKind::JumpPhase,
            vec![Number, Int, PhaseProps],
            true,
            |args| {
                let from = args.int(1)?;
                let from = usize::try_from(from).map_err(|_| {
                    SmError::new(
                        "BUILD_ARG_VALUE",
                        format!("A jump phase cannot start at action {}.", from),
                    )
                })?;
                Ok(StateMachine::Phase(PhaseSm::jump(
                    args.number(0)?,
                    from,
                    args.phase_props(2)?,
                    args.children(),
                )))
            },
        )?;
        self.register_node(
            "paction",
            SmKind::PhaseParallelAction,
            vec![Optional(&Number)],
            true,
            |args| {
                Ok(StateMachine::ParallelAction {
                    wait: args.optional_number(0)?.unwrap_or(0.0),
                    states: args.children(),
                })
            },
        )?;
        self.register_node(
            "saction",
            SmKind::PhaseSequentialAction,
            vec![Optional(&Number)],
            true,
            |args| {
                Ok(StateMachine::SequentialAction {
                    wait: args.optional_number(0)?.unwrap_or(0.0),
                    states: args.children(),
                })
            },
        )?;
        self.register_node("end", SmKind::EndPhase, vec![], true, |args| {
            Ok(StateMachine::End(args.children()))
        })?;
        self.register_node("finish", SmKind::FinishPhase, vec![], true, |args| {
            Ok(StateMachine::Finish(args.children()))
        })?;
        self.register_node("script", SmKind::ScriptTask, vec![], true, |args| {
            Ok(StateMachine::Script(args.children()))
        })?;
        self.register_node("@", SmKind::Retarget, vec![List(&Text), Child], false, |args| {
            Ok(StateMachine::Retarget {
                targets: args.texts(0)?,
                states: vec![args.child(1)?],
            })
        })?;
        for name in ["~", "nb"] {
            self.register_node(name, SmKind::NoBlock, vec![Child], false, |args| {
                Ok(StateMachine::NoBlock(args.child(0)?))
            })?;
        }
        self.register_node("break", SmKind::Break, vec![], false, |_| Ok(StateMachine::Break))?;
        for name in ["gtr", "gtrepeat"] {
            self.register_node(
                name,
                SmKind::GtRepeat,
                vec![GtrProps, Optional(&List(&Child))],
                true,
                |args| {
                    let children = match args.get(1) {
                        Some(_) => args.child_list(1)?,
                        None => args.children(),
                    };
                    Ok(StateMachine::Repeat(GtRepeat::new(args.gtr_props(0)?, children)?))
                },
            )?;
        }
        self.register_node(
            "gtr2",
            SmKind::GtRepeat2,
            vec![Expr, Expr, Rv2, GtrProps],
            true,
            |args| {
                let mut props = args.gtr_props(3)?;
                props.wait = Some(args.expr(0)?);
                props.times = Some(args.expr(1)?);
                props.rpp = Some(args.rv2(2)?);
                Ok(StateMachine::Repeat(GtRepeat::shorthand(props, args.children())?))
            },
        )?;
        self.register_node("alternate", SmKind::Alternate, vec![Expr], true, |args| {
            Ok(StateMachine::Alternate {
                indexer: args.expr(0)?,
                states: args.children(),
            })
        })?;
        self.register_node("if", SmKind::If, vec![Expr, Child, Child], false, |args| {
            Ok(StateMachine::If {
                predicate: args.expr(0)?,
                then: args.child(1)?,
                otherwise: args.child(2)?,
            })
        })
    }

    fn register_standard_leaves(&mut self) -> Result<(), SmError> {
        use LeafFlavour::*;
        self.register_leaf("shiftphase", LineAction, vec![], |_| Ok(LeafAction::ShiftPhase))?;
        self.register_leaf("shiftphaseto", LineAction, vec![Int], |args| {
            Ok(LeafAction::ShiftPhaseTo(args.int(0)?))
        })?;
        self.register_leaf("debugf", Both, vec![Expr], |args| {
            Ok(LeafAction::DebugFloat(args.expr(0)?))
        })?;
        self.register_leaf("wait", Both, vec![Expr], |args| Ok(LeafAction::Wait(args.expr(0)?)))?;
        self.register_leaf("print", Both, vec![Text], |args| Ok(LeafAction::Print(args.text(0)?)))?;
        self.register_leaf("text", ScriptLine, vec![Text], |args| {
            Ok(LeafAction::Text(args.text(0)?))
        })?;
        self.register_leaf("dialogue", LineAction, vec![Text], |args| {
            Ok(LeafAction::Dialogue(args.text(0)?))
        })?;
        self.register_leaf("event", LineAction, vec![Text, Optional(&Int)], |args| {
            let name = args.text(0)?;
            match name.to_ascii_lowercase().as_str() {
                "playerinvuln" => {
                    let frames = args.optional_int(1)?.ok_or_else(|| {
                        SmError::new(
                            "BUILD_ARG_MISSING",
                            "event playerinvuln requires a frame count.",
                        )
                    })?;
                    Ok(LeafAction::PlayerInvuln(frames))
                }
                "bossexplode" => Ok(LeafAction::BossExplode),
                _ => Err(SmError::new(
                    "BUILD_UNKNOWN_EVENT",
                    format!("Unknown event `{}`.", name),
                )),
            }
        })?;
        self.register_leaf("anim", LineAction, vec![Text], |args| {
            let name = args.text(0)?;
            match name.to_ascii_lowercase().as_str() {
                "attack" => Ok(LeafAction::AnimateAttack),
                _ => Err(SmError::new(
                    "BUILD_UNKNOWN_EVENT",
                    format!("Unknown animation `{}`.", name),
                )),
            }
        })?;
        self.register_leaf("timer", LineAction, vec![Text, Text], |args| {
            let action = args.text(0)?;
            let action = TimerAction::from_name(&action).ok_or_else(|| {
                SmError::new(
                    "BUILD_ARG_VALUE",
                    format!("Unknown timer action `{}`. Use start, restart or stop.", action),
                )
            })?;
            Ok(LeafAction::Timer(action, args.text(1)?))
        })?;
        self.register_leaf("move", LineAction, vec![Expr, Expr, Expr], |args| {
            Ok(LeafAction::Move {
                time: args.expr(0)?,
                x: args.expr(1)?,
                y: args.expr(2)?,
            })
        })?;
        self.register_leaf("position", LineAction, vec![Expr, Expr], |args| {
            Ok(LeafAction::Position(args.expr(0)?, args.expr(1)?))
        })?;
        self.register_leaf("noop", Both, vec![], |_| Ok(LeafAction::Noop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_validates() {
        let registry = Registry::standard().expect("standard registry");
        assert!(registry.node("PATTERN").is_some());
        assert!(registry.leaf("DebugF").is_some());
        assert!(registry.node("debugf").is_none());
    }

    #[test]
    fn duplicate_keywords_are_rejected() {
        let mut registry = Registry::standard().expect("standard registry");
        let error = registry
            .register_leaf("Phase", LeafFlavour::LineAction, vec![], |_| Ok(LeafAction::Noop))
            .expect_err("phase is a node keyword");
        assert_eq!(error.code, "BUILD_REGISTRY");
    }

    #[test]
    fn grammar_lookup_walks_to_the_nearest_restricting_ancestor() {
        assert_eq!(grammar_for(SmKind::JumpPhase), allowed_children(SmKind::Phase));
        assert!(grammar_for(SmKind::GtRepeat).is_none());
        let phase = grammar_for(SmKind::Phase).expect("phases restrict children");
        assert!(can_create(phase, SmKind::GtRepeat2));
        assert!(can_create(phase, SmKind::FinishPhase));
        assert!(!can_create(phase, SmKind::ReflectedLineAction));
        assert!(!can_create(phase, SmKind::Phase));
        let pattern = grammar_for(SmKind::Pattern).expect("patterns restrict children");
        assert!(can_create(pattern, SmKind::DialoguePhase));
        assert!(!can_create(pattern, SmKind::PhaseParallelAction));
    }

    #[test]
    fn validation_rejects_leaf_kinds_as_nodes() {
        let mut registry = Registry::empty();
        registry
            .register_node("bad", SmKind::ReflectedLineAction, vec![], false, |_| {
                Ok(StateMachine::Break)
            })
            .expect("registration itself succeeds");
        let error = registry.validate().expect_err("leaf kinds are not nodes");
        assert!(error.message.contains("register it as a leaf action"));
    }
}
