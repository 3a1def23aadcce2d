use std::fmt;
use std::rc::Rc;

use dmk_core::SmError;
use serde::{Deserialize, Serialize};

use crate::expr::GcxExpr;
use crate::sm::{LeafAction, LeafSm, StateMachine};
use crate::target::Vulnerability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    NonSpell,
    Spell,
    Timeout,
    Final,
    Announce,
    Dialogue,
    Stage,
    StageMidBoss,
    StageEndBoss,
}

impl PhaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        let phase_type = match name.to_ascii_lowercase().as_str() {
            "non" | "nonspell" => Self::NonSpell,
            "spell" => Self::Spell,
            "timeout" => Self::Timeout,
            "final" => Self::Final,
            "announce" => Self::Announce,
            "dialogue" => Self::Dialogue,
            "stage" => Self::Stage,
            "midboss" | "stagemidboss" => Self::StageMidBoss,
            "endboss" | "stageendboss" => Self::StageEndBoss,
            _ => return None,
        };
        Some(phase_type)
    }

    pub fn is_spell(self) -> bool {
        matches!(self, Self::Spell | Self::Timeout | Self::Final)
    }

    pub fn is_card(self) -> bool {
        self == Self::NonSpell || self.is_spell()
    }

    pub fn is_stage(self) -> bool {
        self == Self::Stage
    }

    pub fn is_stage_boss(self) -> bool {
        matches!(self, Self::StageMidBoss | Self::StageEndBoss)
    }

    /// Cards and stage sections clear their bullets on end by default.
    pub fn is_pattern(self) -> bool {
        self.is_card() || self.is_stage()
    }

    pub fn is_lenient(self) -> bool {
        matches!(self, Self::Dialogue | Self::Announce)
    }

    pub fn hide_timeout(self) -> bool {
        matches!(self, Self::Stage | Self::Dialogue)
    }

    pub fn requires_hp_guard(self) -> bool {
        self.is_lenient() || self.is_card()
    }

    pub fn default_vulnerability(self) -> Option<Vulnerability> {
        if self == Self::Timeout {
            Some(Vulnerability::PassThrough)
        } else if self.requires_hp_guard() {
            Some(Vulnerability::NoDamage)
        } else {
            None
        }
    }

    pub fn hp_bar_length(self) -> Option<f64> {
        if self.is_spell() {
            Some(1.0)
        } else if self == Self::NonSpell {
            Some(0.5)
        } else {
            None
        }
    }

    pub fn default_hp(self) -> Option<f64> {
        match self {
            Self::Timeout | Self::Dialogue => Some(1_000_000_000.0),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NonSpell => "NONSPELL",
            Self::Spell => "SPELL",
            Self::Timeout => "TIMEOUT",
            Self::Final => "FINAL",
            Self::Announce => "ANNOUNCE",
            Self::Dialogue => "DIALOGUE",
            Self::Stage => "STAGE",
            Self::StageMidBoss => "STAGEMIDBOSS",
            Self::StageEndBoss => "STAGEENDBOSS",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseClearMethod {
    Hp,
    Photo,
    Timeout,
    Cancelled,
}

impl PhaseClearMethod {
    pub fn destructive(self) -> bool {
        matches!(self, Self::Hp | Self::Photo)
    }
}

/// Outcome of one phase, reported to the host when the phase ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCompletion {
    pub phase_index: usize,
    pub phase_type: Option<PhaseType>,
    pub title: Option<String>,
    pub clear_method: PhaseClearMethod,
    pub standard_card_finish: bool,
    pub elapsed_frames: u64,
}

impl PhaseCompletion {
    pub fn new(
        phase_index: usize,
        props: &PhaseProperties,
        clear_method: PhaseClearMethod,
        elapsed_frames: u64,
    ) -> Self {
        let standard_card_finish = props.phase_type.is_some_and(PhaseType::is_card)
            && clear_method != PhaseClearMethod::Cancelled;
        Self {
            phase_index,
            phase_type: props.phase_type,
            title: props.card_title.clone(),
            clear_method,
            standard_card_finish,
            elapsed_frames,
        }
    }
}

/// One `<!>` declaration as written in a script, before it is folded into
/// pattern or phase configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum SmProperty {
    Boss(String),
    /// Boss keys, plus `(phase, index)` pairs choosing which boss the UI shows from a phase onwards.
    Bosses(Vec<String>, Vec<(i64, usize)>),
    Bgm(Vec<(i64, String)>),
    SetUiFrom(i64),
    HideTimeout,
    Skip,
    Lenient,
    BossCutin,
    Type(PhaseType, Option<String>),
    Photo(i64),
    Hp { hp: f64, invuln: Option<f64> },
    HpBar(f64),
    Background(String),
    BgTransition { inwards: bool, style: String },
    Clear(bool),
    ShowLives(i64),
    SpellCutin(usize),
    Root { time: f64, who: Option<String>, x: f64, y: f64 },
    Challenge(String),
    Empty,
}

impl SmProperty {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boss(_) => "boss",
            Self::Bosses(..) => "bosses",
            Self::Bgm(_) => "bgm",
            Self::SetUiFrom(_) => "setuifrom",
            Self::HideTimeout => "hidetimeout",
            Self::Skip => "skip",
            Self::Lenient => "lenient",
            Self::BossCutin => "bosscutin",
            Self::Type(..) => "type",
            Self::Photo(_) => "photo",
            Self::Hp { .. } => "hp",
            Self::HpBar(_) => "hpbar",
            Self::Background(_) => "bg",
            Self::BgTransition { .. } => "bgtransition",
            Self::Clear(_) => "clear",
            Self::ShowLives(_) => "showlives",
            Self::SpellCutin(_) => "spellcutin",
            Self::Root { .. } => "root",
            Self::Challenge(_) => "challenge",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternProperties {
    pub boss: Option<String>,
    pub bosses: Option<Vec<String>>,
    pub boss_ui: Option<Vec<(i64, usize)>>,
    pub set_ui_from: i64,
    pub bgms: Option<Vec<(i64, String)>>,
}

impl PatternProperties {
    pub fn from_props(props: &[SmProperty]) -> Result<Self, SmError> {
        let mut out = Self::default();
        for prop in props {
            match prop {
                SmProperty::Boss(key) => out.boss = Some(key.clone()),
                SmProperty::Bosses(keys, ui) => {
                    out.boss = keys.first().cloned();
                    out.bosses = Some(keys.clone());
                    out.boss_ui = Some(ui.clone());
                }
                SmProperty::Bgm(tracks) => out.bgms = Some(tracks.clone()),
                SmProperty::SetUiFrom(phase) => out.set_ui_from = *phase,
                SmProperty::Empty => {}
                other => {
                    return Err(SmError::new(
                        "PROP_ILLEGAL",
                        format!(
                            "Pattern is not allowed to have properties of type {}.",
                            other.name()
                        ),
                    ))
                }
            }
        }
        Ok(out)
    }

    /// Tracks scheduled exactly at `phase`.
    pub fn bgm_at(&self, phase: i64) -> Option<Vec<String>> {
        let tracks: Vec<String> = self
            .bgms
            .iter()
            .flatten()
            .filter(|(at, _)| *at == phase)
            .map(|(_, track)| track.clone())
            .collect();
        (!tracks.is_empty()).then_some(tracks)
    }

    /// Tracks of the latest schedule entry at or before `phase`.
    pub fn bgm_bounded(&self, phase: i64) -> Option<Vec<String>> {
        let latest = self
            .bgms
            .iter()
            .flatten()
            .map(|(at, _)| *at)
            .filter(|at| *at <= phase)
            .max()?;
        self.bgm_at(latest)
    }

    /// Which boss the UI shows for `phase`.
    pub fn boss_for_ui(&self, phase: i64) -> Option<String> {
        let Some(bosses) = &self.bosses else {
            return self.boss.clone();
        };
        let index = self
            .boss_ui
            .iter()
            .flatten()
            .filter(|(at, _)| *at <= phase)
            .max_by_key(|(at, _)| *at)
            .map(|(_, index)| *index)
            .unwrap_or(0);
        bosses.get(index).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhaseProperties {
    pub hide_timeout: bool,
    pub card_title: Option<String>,
    pub hp: Option<f64>,
    pub photo_hp: Option<i64>,
    pub invuln_time: Option<f64>,
    pub hp_bar: Option<f64>,
    pub phase_type: Option<PhaseType>,
    pub background: Option<String>,
    pub bg_transition_in: Option<String>,
    pub bg_transition_out: Option<String>,
    cleanup: Option<bool>,
    pub lives_override: Option<i64>,
    pub root_move: Option<Rc<StateMachine>>,
    pub skip: bool,
    lenient: Option<bool>,
    pub boss_cutin: bool,
    pub spell_cutin_index: Option<usize>,
    pub challenges: Vec<String>,
}

impl PhaseProperties {
    pub fn from_props(props: &[SmProperty]) -> Result<Self, SmError> {
        let mut out = Self::default();
        let mut root_moves = Vec::new();
        for prop in props {
            match prop {
                SmProperty::HideTimeout => out.hide_timeout = true,
                SmProperty::Skip => out.skip = true,
                SmProperty::Lenient => out.lenient = Some(true),
                SmProperty::BossCutin => out.boss_cutin = true,
                SmProperty::Type(phase_type, title) => {
                    out.phase_type = Some(*phase_type);
                    out.card_title = title.clone();
                }
                SmProperty::Photo(photos) => {
                    out.photo_hp = Some(*photos);
                    out.invuln_time = Some(0.0);
                }
                SmProperty::Hp { hp, invuln } => {
                    out.hp = Some(*hp);
                    out.invuln_time = *invuln;
                }
                SmProperty::HpBar(portion) => out.hp_bar = Some(*portion),
                SmProperty::Background(style) => out.background = Some(style.clone()),
                SmProperty::BgTransition { inwards, style } => {
                    if *inwards {
                        out.bg_transition_in = Some(style.clone());
                    } else {
                        out.bg_transition_out = Some(style.clone());
                    }
                }
                SmProperty::Clear(clear) => out.cleanup = Some(*clear),
                SmProperty::ShowLives(lives) => out.lives_override = Some(*lives),
                SmProperty::SpellCutin(index) => out.spell_cutin_index = Some(*index),
                SmProperty::Root { time, who, x, y } => {
                    let movement = Rc::new(StateMachine::Leaf(LeafSm::line_action(
                        "move",
                        LeafAction::Move {
                            time: GcxExpr::Const(*time),
                            x: GcxExpr::Const(*x),
                            y: GcxExpr::Const(*y),
                        },
                    )));
                    root_moves.push(match who {
                        Some(who) => Rc::new(StateMachine::Retarget {
                            targets: vec![who.clone()],
                            states: vec![movement],
                        }),
                        None => movement,
                    });
                }
                SmProperty::Challenge(challenge) => out.challenges.push(challenge.clone()),
                SmProperty::Empty => {}
                other => {
                    return Err(SmError::new(
                        "PROP_ILLEGAL",
                        format!(
                            "Phase is not allowed to have properties of type {}.",
                            other.name()
                        ),
                    ))
                }
            }
        }
        if !root_moves.is_empty() {
            out.root_move = Some(Rc::new(StateMachine::Parallel(root_moves)));
        }
        Ok(out)
    }

    pub fn cleanup(&self) -> bool {
        self.cleanup
            .unwrap_or_else(|| self.phase_type.is_some_and(PhaseType::is_pattern))
    }

    pub fn lenient(&self) -> bool {
        self.lenient
            .unwrap_or_else(|| self.phase_type.is_some_and(PhaseType::is_lenient))
    }

    pub fn hides_timeout(&self) -> bool {
        self.hide_timeout || self.phase_type.is_some_and(PhaseType::hide_timeout)
    }

    /// Spell cutin shown for this phase: the explicit index, or the first cutin for spells.
    pub fn spell_cutin(&self) -> Option<usize> {
        self.spell_cutin_index.or_else(|| {
            self.phase_type
                .is_some_and(PhaseType::is_spell)
                .then_some(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sm::SmKind;

    #[test]
    fn pattern_props_reject_phase_only_markers() {
        let error = PatternProperties::from_props(&[SmProperty::Boss("simp.mima".into()), SmProperty::Skip])
            .expect_err("skip should be rejected on a pattern");
        assert_eq!(error.code, "PROP_ILLEGAL");
        assert!(error.message.contains("Pattern is not allowed"));
        assert!(error.message.contains("skip"));
    }

    #[test]
    fn bosses_set_the_main_boss_and_ui_selection() {
        let props = PatternProperties::from_props(&[
            SmProperty::Bosses(vec!["a".into(), "b".into()], vec![(0, 0), (3, 1)]),
            SmProperty::Bgm(vec![(1, "th06_05".into()), (4, "th06_06".into())]),
        ])
        .expect("pattern props should fold");
        assert_eq!(props.boss.as_deref(), Some("a"));
        assert_eq!(props.boss_for_ui(2).as_deref(), Some("a"));
        assert_eq!(props.boss_for_ui(5).as_deref(), Some("b"));
        assert_eq!(props.bgm_at(1), Some(vec!["th06_05".to_string()]));
        assert_eq!(props.bgm_at(2), None);
        assert_eq!(props.bgm_bounded(3), Some(vec!["th06_05".to_string()]));
        assert_eq!(props.bgm_bounded(0), None);
    }

    #[test]
    fn phase_props_fold_hp_and_cleanup_defaults() {
        let props = PhaseProperties::from_props(&[
            SmProperty::Type(PhaseType::Spell, Some("Sign".into())),
            SmProperty::Hp { hp: 1200.0, invuln: Some(0.0) },
        ])
        .expect("phase props should fold");
        assert_eq!(props.hp, Some(1200.0));
        assert_eq!(props.invuln_time, Some(0.0));
        assert!(props.cleanup());
        assert!(!props.lenient());
        assert_eq!(props.spell_cutin(), Some(0));

        let dialogue = PhaseProperties::from_props(&[
            SmProperty::Type(PhaseType::Dialogue, None),
            SmProperty::Clear(true),
        ])
        .expect("dialogue props should fold");
        assert!(dialogue.lenient());
        assert!(dialogue.cleanup());
        assert!(dialogue.hides_timeout());
    }

    #[test]
    fn root_properties_build_a_parallel_move() {
        let props = PhaseProperties::from_props(&[
            SmProperty::Root { time: 2.0, who: None, x: 0.0, y: 1.0 },
            SmProperty::Root { time: 2.0, who: Some("mokou".into()), x: 1.0, y: 1.0 },
        ])
        .expect("root props should fold");
        let root = props.root_move.expect("root move should exist");
        match &*root {
            StateMachine::Parallel(moves) => {
                assert_eq!(moves.len(), 2);
                assert_eq!(moves[1].kind(), SmKind::Retarget);
            }
            other => panic!("expected a parallel root move, got {:?}", other.kind()),
        }
    }

    #[test]
    fn phase_types_classify_cards_and_stages() {
        assert!(PhaseType::Final.is_spell());
        assert!(PhaseType::NonSpell.is_card());
        assert!(!PhaseType::Dialogue.is_card());
        assert!(PhaseType::Stage.is_pattern());
        assert_eq!(PhaseType::Timeout.default_vulnerability(), Some(Vulnerability::PassThrough));
        assert_eq!(PhaseType::Spell.default_vulnerability(), Some(Vulnerability::NoDamage));
        assert_eq!(PhaseType::Stage.default_vulnerability(), None);
        assert!(PhaseClearMethod::Photo.destructive());
        assert!(!PhaseClearMethod::Timeout.destructive());
        assert_eq!(PhaseType::from_name("midboss"), Some(PhaseType::StageMidBoss));
    }
}
