use dmk_core::{PositionRange, SmError};
use dmk_parser::PROP2_KW;
use dmk_runtime::SmProperty;

use crate::queue::{Child, ParseQueue};

/// Parser strictness set by `<#> strict ...`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strictness {
    #[default]
    None,
    Commas,
}

impl Strictness {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "commas" => Some(Self::Commas),
            _ => None,
        }
    }
}

/// A `<!>` property waiting for the next node that accepts phase properties.
#[derive(Debug, Clone)]
pub struct QueuedProperty {
    pub property: SmProperty,
    pub position: PositionRange,
}

/// State shared by one construction pass over a script.
#[derive(Debug, Default)]
pub struct ReflCtx {
    strictness: Strictness,
    pub queued_props: Vec<QueuedProperty>,
    /// Errors that only matter if parsing stops at the position they point to.
    pub nonfatal_errors: Vec<SmError>,
}

impl ReflCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Expression arguments may absorb trailing infix operators, as in `debugf 2 * 3`.
    pub fn allow_post_aggregate(&self) -> bool {
        self.strictness >= Strictness::Commas
    }

    /// Reads the leading `<#>` parser-property lines.
    pub fn parse_parser_properties(&mut self, q: &mut ParseQueue<'_>) -> Result<(), SmError> {
        while q.maybe_scan() == Some(PROP2_KW) {
            q.advance()?;
            let line = match q.next_child()? {
                Child::Inline(line) => line,
                Child::Paren(paren) => {
                    return Err(paren.error(
                        "BUILD_PARSER_PROPERTY",
                        "Parser properties cannot be parenthesized.",
                    ))
                }
            };
            let (index, name) = line.scan_unit()?;
            match name.to_ascii_lowercase().as_str() {
                "strict" => {
                    line.advance()?;
                    let (index, level) = line.scan_unit()?;
                    self.strictness = Strictness::from_name(level).ok_or_else(|| {
                        line.error_at(
                            index,
                            "BUILD_PARSER_PROPERTY",
                            format!("Unknown strictness level `{}`.", level),
                        )
                    })?;
                    line.advance()?;
                }
                _ => {
                    return Err(line.error_at(
                        index,
                        "BUILD_PARSER_PROPERTY",
                        format!("Unknown parser property `{}`.", name),
                    ))
                }
            }
            if !q.is_newline() {
                let index = q.leftover().unwrap_or(q.index());
                return Err(q.error_at(
                    index,
                    "BUILD_PARSER_PROPERTY",
                    "Missing a newline at the end of the property declaration.",
                ));
            }
        }
        Ok(())
    }

    pub fn nonfatal_errors_at(&self, position: &PositionRange) -> Vec<&SmError> {
        let mut seen: Vec<&SmError> = Vec::new();
        for error in &self.nonfatal_errors {
            if error.span.as_ref() == Some(position)
                && !seen.iter().any(|other| other.message == error.message)
            {
                seen.push(error);
            }
        }
        seen
    }

    /// The error to report when construction of a whole script ended early.
    /// Nonfatal errors raised at the stopping point explain the leftover text best.
    pub fn parse_end_failure(&self, q: &ParseQueue<'_>) -> Option<SmError> {
        let index = q.leftover()?;
        let position = q.maybe_current().map(|(_, unit)| unit.position().clone())?;
        let nonfatal = self.nonfatal_errors_at(&position);
        match nonfatal.as_slice() {
            [] => Some(q.error_at(
                index,
                "BUILD_LEFTOVER",
                "Behavior script has extra text. Check the text in ≪≫ below for an illegal command.",
            )),
            [only] => Some((*only).clone()),
            [first, ..] => Some(SmError {
                message: nonfatal
                    .iter()
                    .map(|error| error.message.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                ..(*first).clone()
            }),
        }
    }
}
