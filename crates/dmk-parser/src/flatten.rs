use dmk_core::{PositionRange, SmError};
use serde::Serialize;

use crate::unit::{LocatedParseUnit, ParseUnit};

/// Output of the parser: strings and parenthesized groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ParsedUnit {
    Str {
        item: String,
        position: PositionRange,
    },
    Paren {
        items: Vec<ParenGroup>,
        position: PositionRange,
    },
}

/// One comma-separated group inside parentheses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParenGroup {
    pub units: Vec<ParsedUnit>,
    pub position: PositionRange,
}

impl ParsedUnit {
    pub fn position(&self) -> &PositionRange {
        match self {
            ParsedUnit::Str { position, .. } | ParsedUnit::Paren { position, .. } => position,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParsedUnit::Str { item, .. } => Some(item),
            ParsedUnit::Paren { .. } => None,
        }
    }

    pub fn is_newline(&self) -> bool {
        self.as_str() == Some("\n")
    }
}

#[derive(Debug, Clone)]
struct LocatedMessage {
    message: String,
    position: PositionRange,
}

type Flattened<T> = Result<Vec<T>, Vec<LocatedMessage>>;

fn replacement(atom: &str) -> Option<[&'static str; 2]> {
    match atom {
        "{{" => Some(["{", "{"]),
        "}}" => Some(["}", "}"]),
        _ => None,
    }
}

fn fail<T>(unit: &LocatedParseUnit, message: impl Into<String>) -> Flattened<T> {
    Err(vec![LocatedMessage {
        message: message.into(),
        position: unit.position.clone(),
    }])
}

fn unresolved<T>(unit: &LocatedParseUnit) -> Flattened<T> {
    match &unit.unit {
        ParseUnit::MacroVar(name) => {
            fail(unit, format!("Found a macro variable \"%{}\" in the output.", name))
        }
        ParseUnit::LambdaMacroParam => {
            fail(unit, "Found an unbound macro argument (!$) in the output.")
        }
        ParseUnit::PartialMacroInvoke(partial, args) => fail(
            unit,
            format!(
                "The macro \"{}\" was partially invoked with {} realized arguments ({} required)",
                partial.name,
                args.iter().filter(|arg| !arg.unit.is_lambda()).count(),
                partial.nprms
            ),
        ),
        ParseUnit::MacroReinvoke(name, _) => fail(
            unit,
            format!("Found a reinvocation \"$%{}\" outside of a macro body.", name),
        ),
        _ => fail(unit, "Illegal unit in output."),
    }
}

/// Flattens every child, keeping all errors.
fn flatten_each<'a, T>(
    units: impl Iterator<Item = &'a LocatedParseUnit>,
    flatten: fn(&LocatedParseUnit) -> Flattened<T>,
) -> Result<Vec<Vec<T>>, Vec<LocatedMessage>> {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for unit in units {
        match flatten(unit) {
            Ok(value) => values.push(value),
            Err(errs) => errors.extend(errs),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(errors)
    }
}

fn until_end(units: &[LocatedParseUnit]) -> impl Iterator<Item = &LocatedParseUnit> {
    units
        .iter()
        .take_while(|unit| !matches!(unit.unit, ParseUnit::End))
}

fn flatten_strings(unit: &LocatedParseUnit) -> Flattened<String> {
    match &unit.unit {
        ParseUnit::Atom(s) => Ok(match replacement(s) {
            Some(pair) => pair.iter().map(|x| x.to_string()).collect(),
            None if s.is_empty() => Vec::new(),
            None => vec![s.clone()],
        }),
        ParseUnit::Quote(s) => Ok(vec![s.clone()]),
        ParseUnit::Paren(items) => {
            let groups = flatten_each(items.iter(), flatten_strings)?;
            let mut out = vec!["(".to_string()];
            for (i, group) in groups.into_iter().enumerate() {
                if i > 0 {
                    out.push(",".to_string());
                }
                out.extend(group);
            }
            out.push(")".to_string());
            Ok(out)
        }
        ParseUnit::Words(items) => {
            Ok(flatten_each(until_end(items), flatten_strings)?.concat())
        }
        ParseUnit::NoSpaceWords(items) => {
            let mut words = vec![String::new()];
            for part in flatten_each(items.iter(), flatten_strings)? {
                let mut pieces = part.into_iter();
                if let (Some(first), Some(last)) = (pieces.next(), words.last_mut()) {
                    last.push_str(&first);
                }
                words.extend(pieces);
            }
            Ok(words)
        }
        ParseUnit::Newline => Ok(vec!["\n".to_string()]),
        ParseUnit::MacroDef(_) => Ok(Vec::new()),
        _ => unresolved(unit),
    }
}

fn str_unit(item: impl Into<String>, unit: &LocatedParseUnit) -> ParsedUnit {
    ParsedUnit::Str {
        item: item.into(),
        position: unit.position.clone(),
    }
}

fn flatten_parsed(unit: &LocatedParseUnit) -> Flattened<ParsedUnit> {
    match &unit.unit {
        ParseUnit::Atom(s) => Ok(match replacement(s) {
            Some(pair) => pair.iter().map(|x| str_unit(*x, unit)).collect(),
            None if s.is_empty() => Vec::new(),
            None => vec![str_unit(s.clone(), unit)],
        }),
        ParseUnit::Quote(s) => Ok(vec![str_unit(s.clone(), unit)]),
        ParseUnit::Paren(items) => {
            let groups = flatten_each(items.iter(), flatten_parsed)?;
            Ok(vec![ParsedUnit::Paren {
                items: groups
                    .into_iter()
                    .zip(items)
                    .map(|(units, item)| ParenGroup {
                        units,
                        position: item.position.clone(),
                    })
                    .collect(),
                position: unit.position.clone(),
            }])
        }
        ParseUnit::Words(items) => Ok(flatten_each(until_end(items), flatten_parsed)?.concat()),
        ParseUnit::NoSpaceWords(items) => {
            let pieces = flatten_each(items.iter(), flatten_strings)?;
            Ok(vec![str_unit(pieces.concat().concat(), unit)])
        }
        ParseUnit::Newline => Ok(vec![str_unit("\n", unit)]),
        ParseUnit::MacroDef(_) => Ok(Vec::new()),
        _ => unresolved(unit),
    }
}

fn to_error(errors: Vec<LocatedMessage>) -> SmError {
    let span = errors
        .first()
        .map(|error| error.position.clone())
        .unwrap_or_else(PositionRange::synthetic);
    let message = errors
        .iter()
        .map(|error| format!("{} (at {})", error.message, error.position.start))
        .collect::<Vec<_>>()
        .join("\n");
    SmError::with_span("PARSE_FLATTEN", message, span)
}

pub(crate) fn flatten_to_units(root: &LocatedParseUnit) -> Result<Vec<ParsedUnit>, SmError> {
    flatten_parsed(root).map_err(to_error)
}

pub(crate) fn flatten_to_string(root: &LocatedParseUnit) -> Result<String, SmError> {
    flatten_strings(root)
        .map(|words| words.join(" "))
        .map_err(to_error)
}
