use dmk_core::SmError;
use dmk_parser::{ParsedUnit, PROP_KW};
use dmk_runtime::{
    GtrProps, Parametrization, PatternProperties, PhaseProperties, PhaseType, SmProperty,
};

use crate::args::{bind_args, ArgValue, BoundArgs, ParamKind};
use crate::construct::Constructor;
use crate::queue::{ParseQueue, ARR_CLOSE, ARR_EMPTY, ARR_OPEN};

use ParamKind::{Child, Expr, Int, List, Number, Optional, Rule, Rv2, Text, Tuple};

struct PropertyEntry {
    names: &'static [&'static str],
    params: &'static [ParamKind],
    build: fn(&BoundArgs) -> Result<SmProperty, SmError>,
}

struct GtrEntry {
    names: &'static [&'static str],
    params: &'static [ParamKind],
    apply: fn(&mut GtrProps, &BoundArgs) -> Result<(), SmError>,
}

trait Named {
    fn names(&self) -> &'static [&'static str];
    fn params(&self) -> &'static [ParamKind];
}

impl Named for PropertyEntry {
    fn names(&self) -> &'static [&'static str] {
        self.names
    }
    fn params(&self) -> &'static [ParamKind] {
        self.params
    }
}

impl Named for GtrEntry {
    fn names(&self) -> &'static [&'static str] {
        self.names
    }
    fn params(&self) -> &'static [ParamKind] {
        self.params
    }
}

fn phase_type(kind: PhaseType) -> Result<SmProperty, SmError> {
    Ok(SmProperty::Type(kind, None))
}

const PHASE_PROPERTIES: &[PropertyEntry] = &[
    PropertyEntry {
        names: &["hidetimeout"],
        params: &[],
        build: |_| Ok(SmProperty::HideTimeout),
    },
    PropertyEntry {
        names: &["skip"],
        params: &[],
        build: |_| Ok(SmProperty::Skip),
    },
    PropertyEntry {
        names: &["lenient"],
        params: &[],
        build: |_| Ok(SmProperty::Lenient),
    },
    PropertyEntry {
        names: &["bosscutin"],
        params: &[],
        build: |_| Ok(SmProperty::BossCutin),
    },
    PropertyEntry {
        names: &["announce"],
        params: &[],
        build: |_| phase_type(PhaseType::Announce),
    },
    PropertyEntry {
        names: &["stage"],
        params: &[],
        build: |_| phase_type(PhaseType::Stage),
    },
    PropertyEntry {
        names: &["dialogue"],
        params: &[],
        build: |_| phase_type(PhaseType::Dialogue),
    },
    PropertyEntry {
        names: &["midboss"],
        params: &[],
        build: |_| phase_type(PhaseType::StageMidBoss),
    },
    PropertyEntry {
        names: &["endboss"],
        params: &[],
        build: |_| phase_type(PhaseType::StageEndBoss),
    },
    PropertyEntry {
        names: &["type"],
        params: &[Text, Optional(&Text)],
        build: |args| {
            let name = args.text(0)?;
            let kind = PhaseType::from_name(&name).ok_or_else(|| {
                SmError::new("PROP_UNKNOWN_TYPE", format!("Unknown phase type `{}`.", name))
            })?;
            Ok(SmProperty::Type(kind, args.optional_text(1)?))
        },
    },
    PropertyEntry {
        names: &["photo"],
        params: &[Int],
        build: |args| Ok(SmProperty::Photo(args.int(0)?)),
    },
    PropertyEntry {
        names: &["hp"],
        params: &[Number],
        build: |args| {
            Ok(SmProperty::Hp {
                hp: args.number(0)?,
                invuln: Some(0.0),
            })
        },
    },
    PropertyEntry {
        names: &["hpn"],
        params: &[Number],
        build: |args| {
            Ok(SmProperty::Hp {
                hp: args.number(0)?,
                invuln: None,
            })
        },
    },
    PropertyEntry {
        names: &["hpi"],
        params: &[Number, Number],
        build: |args| {
            Ok(SmProperty::Hp {
                hp: args.number(0)?,
                invuln: Some(args.number(1)?),
            })
        },
    },
    PropertyEntry {
        names: &["hpbar"],
        params: &[Number],
        build: |args| Ok(SmProperty::HpBar(args.number(0)?)),
    },
    PropertyEntry {
        names: &["bg"],
        params: &[Text],
        build: |args| Ok(SmProperty::Background(args.text(0)?)),
    },
    PropertyEntry {
        names: &["bgtin"],
        params: &[Text],
        build: |args| {
            Ok(SmProperty::BgTransition {
                inwards: true,
                style: args.text(0)?,
            })
        },
    },
    PropertyEntry {
        names: &["bgtout"],
        params: &[Text],
        build: |args| {
            Ok(SmProperty::BgTransition {
                inwards: false,
                style: args.text(0)?,
            })
        },
    },
    PropertyEntry {
        names: &["clear"],
        params: &[],
        build: |_| Ok(SmProperty::Clear(true)),
    },
    PropertyEntry {
        names: &["noclear"],
        params: &[],
        build: |_| Ok(SmProperty::Clear(false)),
    },
    PropertyEntry {
        names: &["root"],
        params: &[Number, Number],
        build: |args| {
            Ok(SmProperty::Root {
                time: 2.0,
                who: None,
                x: args.number(0)?,
                y: args.number(1)?,
            })
        },
    },
    PropertyEntry {
        names: &["rootother"],
        params: &[Text, Number, Number],
        build: |args| {
            Ok(SmProperty::Root {
                time: 2.0,
                who: Some(args.text(0)?),
                x: args.number(1)?,
                y: args.number(2)?,
            })
        },
    },
    PropertyEntry {
        names: &["roott"],
        params: &[Number, Number, Number],
        build: |args| {
            Ok(SmProperty::Root {
                time: args.number(0)?,
                who: None,
                x: args.number(1)?,
                y: args.number(2)?,
            })
        },
    },
    PropertyEntry {
        names: &["showlives"],
        params: &[Int],
        build: |args| Ok(SmProperty::ShowLives(args.int(0)?)),
    },
    PropertyEntry {
        names: &["spellcutin"],
        params: &[Int],
        build: |args| {
            let index = args.int(0)?;
            let index = usize::try_from(index).map_err(|_| {
                SmError::new(
                    "PROP_VALUE",
                    format!("Spell cutin index must not be negative, but was {}.", index),
                )
            })?;
            Ok(SmProperty::SpellCutin(index))
        },
    },
    PropertyEntry {
        names: &["challenge"],
        params: &[Text],
        build: |args| Ok(SmProperty::Challenge(args.text(0)?)),
    },
    PropertyEntry {
        names: &["event0"],
        params: &[Text],
        build: |_| Ok(SmProperty::Empty),
    },
];

const PATTERN_PROPERTIES: &[PropertyEntry] = &[
    PropertyEntry {
        names: &["boss"],
        params: &[Text],
        build: |args| Ok(SmProperty::Boss(args.text(0)?)),
    },
    PropertyEntry {
        names: &["bosses"],
        params: &[List(&Text), List(&Tuple(&[Int, Int]))],
        build: |args| {
            let keys = args.texts(0)?;
            let ui = args
                .list(1)?
                .iter()
                .map(|entry| {
                    let pair = entry.as_items().unwrap_or_default();
                    match (pair.first().and_then(ArgValue::as_int), pair.get(1).and_then(ArgValue::as_int)) {
                        (Some(phase), Some(index)) if index >= 0 && (index as usize) < keys.len() => {
                            Ok((phase, index as usize))
                        }
                        _ => Err(SmError::new(
                            "PROP_VALUE",
                            "Boss UI entries must be (phase, boss index) pairs referring to a listed boss.",
                        )),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SmProperty::Bosses(keys, ui))
        },
    },
    PropertyEntry {
        names: &["bgm"],
        params: &[List(&Tuple(&[Int, Text]))],
        build: |args| {
            let tracks = args
                .list(0)?
                .iter()
                .map(|entry| {
                    let pair = entry.as_items().unwrap_or_default();
                    match (pair.first().and_then(ArgValue::as_int), pair.get(1).and_then(ArgValue::as_text)) {
                        (Some(phase), Some(track)) => Ok((phase, track.to_string())),
                        _ => Err(SmError::new(
                            "PROP_VALUE",
                            "BGM entries must be (phase, track) pairs.",
                        )),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SmProperty::Bgm(tracks))
        },
    },
    PropertyEntry {
        names: &["setuifrom"],
        params: &[Int],
        build: |args| Ok(SmProperty::SetUiFrom(args.int(0)?)),
    },
];

const GTR_PROPERTIES: &[GtrEntry] = &[
    GtrEntry {
        names: &["times"],
        params: &[Expr],
        apply: |props, args| {
            props.times = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["maxtimes"],
        params: &[Int],
        apply: |props, args| {
            props.max_times = Some(args.int(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["wait"],
        params: &[Expr],
        apply: |props, args| {
            props.wait = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["delay"],
        params: &[Expr],
        apply: |props, args| {
            props.delay = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["for"],
        params: &[Expr],
        apply: |props, args| {
            props.fortime = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["wait-child", "waitchild"],
        params: &[],
        apply: |props, _| {
            props.wait_child = true;
            Ok(())
        },
    },
    GtrEntry {
        names: &["sequential", "seq"],
        params: &[],
        apply: |props, _| {
            props.sequential = true;
            Ok(())
        },
    },
    GtrEntry {
        names: &["while"],
        params: &[Expr],
        apply: |props, args| {
            props.run_while = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["unpause"],
        params: &[Child],
        apply: |props, args| {
            props.unpause = Some(args.child(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["clip"],
        params: &[Expr],
        apply: |props, args| {
            props.clip = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["cancel"],
        params: &[Expr],
        apply: |props, args| {
            props.cancel = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["rpp"],
        params: &[Rv2],
        apply: |props, args| {
            props.rpp = Some(args.rv2(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["start"],
        params: &[Rule],
        apply: |props, args| {
            props.start.push(args.rule(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["preloop"],
        params: &[Rule],
        apply: |props, args| {
            props.preloop.push(args.rule(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["postloop"],
        params: &[Rule],
        apply: |props, args| {
            props.postloop.push(args.rule(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["end"],
        params: &[Rule],
        apply: |props, args| {
            props.end.push(args.rule(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["alternate"],
        params: &[Expr],
        apply: |props, args| {
            props.alternate = Some(args.expr(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["binditr", "bind"],
        params: &[Text],
        apply: |props, args| {
            props.bind_itr = Some(args.text(0)?);
            Ok(())
        },
    },
    GtrEntry {
        names: &["p"],
        params: &[Text],
        apply: |props, args| {
            let name = args.text(0)?;
            props.parametrization = Parametrization::from_name(&name).ok_or_else(|| {
                SmError::new(
                    "PROP_VALUE",
                    format!("Unknown parametrization `{}`. Use this, defer, mod or invmod.", name),
                )
            })?;
            Ok(())
        },
    },
];

/// Reads a property name and its arguments from `q`.
fn read_entry<'t, E: Named>(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    table: &'t [E],
    what: &str,
) -> Result<(usize, &'t E, BoundArgs), SmError> {
    let (index, name) = q.scan_unit()?;
    let key = name.to_ascii_lowercase();
    let entry = table
        .iter()
        .find(|entry| entry.names().contains(&key.as_str()))
        .ok_or_else(|| {
            q.error_at(
                index,
                "PROP_UNKNOWN",
                format!("No {} property exists by name `{}`.", what, name),
            )
        })?;
    q.advance()?;
    let values = bind_args(cx, q, entry.params(), &key)?;
    Ok((index, entry, BoundArgs::new(key, values, Vec::new())))
}

/// Reads one phase property, with `q` positioned after its `<!>` marker.
pub(crate) fn read_phase_property(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
) -> Result<SmProperty, SmError> {
    let (index, entry, args) = read_entry(cx, q, PHASE_PROPERTIES, "phase")?;
    (entry.build)(&args).map_err(|error| q.error_at(index, &error.code, error.message))
}

/// Folds queued `<!>` declarations plus any on the current line into phase configuration.
pub(crate) fn take_phase_props(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
) -> Result<PhaseProperties, SmError> {
    let mut props: Vec<SmProperty> = cx
        .ctx_mut()
        .queued_props
        .drain(..)
        .map(|queued| queued.property)
        .collect();
    while q.peek_raw().and_then(ParsedUnit::as_str) == Some(PROP_KW) {
        q.advance()?;
        props.push(read_phase_property(cx, q)?);
    }
    PhaseProperties::from_props(&props).map_err(|error| q.error(&error.code, error.message))
}

/// Opens a `{ ... }` property list. Returns false for an empty marker or no list at all.
fn open_list(q: &mut ParseQueue<'_>, required: bool, what: &str) -> Result<bool, SmError> {
    match q.peek_raw().and_then(ParsedUnit::as_str) {
        Some(word) if ARR_EMPTY.contains(&word) => {
            q.advance()?;
            Ok(false)
        }
        Some(ARR_OPEN) => {
            q.advance()?;
            Ok(true)
        }
        _ if !required => Ok(false),
        _ => {
            let found = q.scan().unwrap_or("end of text");
            Err(q.error(
                "BUILD_ARG_TYPE",
                format!("Expected a {{ ... }} list of {} properties, but found `{}`.", what, found),
            ))
        }
    }
}

/// True once the closing brace has been consumed.
fn close_list(q: &mut ParseQueue<'_>) -> Result<bool, SmError> {
    if q.maybe_scan() == Some(ARR_CLOSE) {
        q.advance()?;
        return Ok(true);
    }
    if q.is_empty() {
        return Err(q.error("BUILD_ARG_LIST", "A property list opened with `{` was never closed."));
    }
    Ok(false)
}

/// `{ boss simp.mima bgm {(0, th06-01)} }`, or nothing.
pub(crate) fn read_pattern_props(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
) -> Result<PatternProperties, SmError> {
    let mut props = Vec::new();
    if open_list(q, false, "pattern")? {
        while !close_list(q)? {
            let (index, entry, args) = read_entry(cx, q, PATTERN_PROPERTIES, "pattern")?;
            props.push((entry.build)(&args).map_err(|error| q.error_at(index, &error.code, error.message))?);
        }
    }
    PatternProperties::from_props(&props).map_err(|error| q.error(&error.code, error.message))
}

/// `{ times 5 wait 10 ... }`
pub(crate) fn read_gtr_props(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
) -> Result<GtrProps, SmError> {
    let mut props = GtrProps::default();
    if open_list(q, true, "repeater")? {
        while !close_list(q)? {
            let (index, entry, args) = read_entry(cx, q, GTR_PROPERTIES, "repeater")?;
            (entry.apply)(&mut props, &args)
                .map_err(|error| q.error_at(index, &error.code, error.message))?;
        }
    }
    Ok(props)
}
