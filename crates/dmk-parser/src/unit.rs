use std::rc::Rc;

use dmk_core::PositionRange;

use crate::macros::Macro;

/// Intermediate tree produced by the lexer, before flattening.
#[derive(Debug, Clone)]
pub enum ParseUnit {
    Atom(String),
    Quote(String),
    MacroVar(String),
    /// `!$`, an argument that has not been supplied yet.
    LambdaMacroParam,
    PartialMacroInvoke(Rc<Macro>, Vec<LocatedParseUnit>),
    MacroReinvoke(String, Vec<LocatedParseUnit>),
    Paren(Vec<LocatedParseUnit>),
    Words(Vec<LocatedParseUnit>),
    NoSpaceWords(Vec<LocatedParseUnit>),
    MacroDef(String),
    Newline,
    End,
}

impl ParseUnit {
    /// A single unit stays itself, anything else becomes `Words`.
    pub fn nest(mut units: Vec<LocatedParseUnit>) -> ParseUnit {
        if units.len() == 1 {
            units.remove(0).unit
        } else {
            ParseUnit::Words(units)
        }
    }

    /// Collapses `Words`/`NoSpaceWords` of length one to their only child.
    pub fn reduce(&self) -> &ParseUnit {
        match self {
            ParseUnit::Words(units) | ParseUnit::NoSpaceWords(units) if units.len() == 1 => {
                units[0].unit.reduce()
            }
            _ => self,
        }
    }

    pub fn cut_trailing_newline(self) -> ParseUnit {
        fn cut(mut units: Vec<LocatedParseUnit>) -> Vec<LocatedParseUnit> {
            if matches!(units.last(), Some(last) if matches!(last.unit, ParseUnit::Newline)) {
                units.pop();
            }
            units
        }
        match self {
            ParseUnit::Paren(units) => ParseUnit::Paren(cut(units)),
            ParseUnit::Words(units) => ParseUnit::Words(cut(units)),
            ParseUnit::NoSpaceWords(units) => ParseUnit::NoSpaceWords(cut(units)),
            other => other,
        }
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self, ParseUnit::LambdaMacroParam)
    }

    /// `[pf...] word` is read as `word pf...`.
    pub fn postfix_swap(word: LocatedParseUnit, postfix: Vec<LocatedParseUnit>) -> ParseUnit {
        let mut units = Vec::with_capacity(postfix.len() + 1);
        units.push(word);
        units.extend(postfix);
        ParseUnit::Words(units)
    }
}

#[derive(Debug, Clone)]
pub struct LocatedParseUnit {
    pub unit: ParseUnit,
    pub position: PositionRange,
}

impl LocatedParseUnit {
    pub fn new(unit: ParseUnit, position: PositionRange) -> Self {
        Self { unit, position }
    }

    /// `Words` spanning from the first to the last unit.
    pub fn words(units: Vec<LocatedParseUnit>) -> Self {
        let position = match (units.first(), units.last()) {
            (Some(first), Some(last)) => PositionRange::new(first.position.start, last.position.end),
            _ => PositionRange::synthetic(),
        };
        Self::new(ParseUnit::Words(units), position)
    }

    pub fn with_unit(&self, unit: ParseUnit) -> Self {
        Self::new(unit, self.position.clone())
    }

    pub fn with_position(&self, position: &PositionRange) -> Self {
        Self::new(self.unit.clone(), position.clone())
    }
}
