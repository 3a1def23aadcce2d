use std::collections::HashMap;
use std::rc::Rc;

use dmk_core::{Position, PositionRange, SmError};

use crate::macros::{Macro, MacroArg};
use crate::unit::{LocatedParseUnit, ParseUnit};

pub const COMMENT: char = '#';
pub const PROP_MARKER: &str = "<!>";
pub const PROP2_MARKER: &str = "<#>";
pub const PROP_KW: &str = "!$_PROPERTY_$!";
pub const PROP2_KW: &str = "!$_PARSER_PROPERTY_$!";
pub const OPEN_PF: char = '[';
pub const CLOSE_PF: char = ']';
pub const QUOTE: char = '`';
pub const MACRO_INVOKE: char = '$';
pub const MACRO_VAR: char = '%';
pub const MACRO_OPEN: &str = "!{";
pub const MACRO_CLOSE: &str = "!}";
pub const MACRO_OL_OPEN: &str = "!!{";
pub const LAMBDA_MACRO_PRM: &str = "!$";
pub const MACRO_REINVOKE: &str = "$%";
pub const END_OF_SCRIPT: &str = "///";
pub const OPEN_ARG: char = '(';
pub const CLOSE_ARG: char = ')';
pub const ARG_SEP: char = ',';

fn is_simple_char(c: char) -> bool {
    !matches!(
        c,
        COMMENT
            | MACRO_INVOKE
            | MACRO_VAR
            | '!'
            | OPEN_ARG
            | CLOSE_ARG
            | ARG_SEP
            | OPEN_PF
            | CLOSE_PF
            | QUOTE
    ) && !c.is_whitespace()
}

fn is_param_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_inline_space(c: char) -> bool {
    c != '\n' && c.is_whitespace()
}

/// Character scanner that expands macros as it reads.
pub(crate) struct Lexer {
    chars: Vec<char>,
    pos: Position,
    macros: HashMap<String, Rc<Macro>>,
}

impl Lexer {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: Position::start(),
            macros: HashMap::new(),
        }
    }

    pub(crate) fn parse_script(mut self) -> Result<LocatedParseUnit, SmError> {
        let start = self.pos;
        self.skip_inline_spaces();
        let words = self.words(true)?;
        if let Some(c) = self.peek() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("The character '{}' could not be handled.", c),
                self.pos,
            ));
        }
        Ok(LocatedParseUnit::new(
            ParseUnit::Words(words),
            self.range_from(start),
        ))
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos.index + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos = self.pos.step(c);
        Some(c)
    }

    fn bump_str(&mut self, s: &str) {
        for _ in s.chars() {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            taken.push(c);
            self.bump();
        }
        taken
    }

    fn skip_inline_spaces(&mut self) {
        self.take_while(is_inline_space);
    }

    fn skip_whitespace(&mut self) -> bool {
        !self.take_while(char::is_whitespace).is_empty()
    }

    fn simple_string(&mut self) -> String {
        self.take_while(is_simple_char)
    }

    fn range_from(&self, start: Position) -> PositionRange {
        PositionRange::new(start, self.pos)
    }

    fn error_from(&self, code: &str, message: impl Into<String>, start: Position) -> SmError {
        SmError::with_span(code, message, self.range_from(start))
    }

    /// One or more units separated by inline spaces. Empty when nothing matched.
    fn words(&mut self, allow_newline: bool) -> Result<Vec<LocatedParseUnit>, SmError> {
        let mut units = Vec::new();
        loop {
            let next = match allow_newline {
                true => match self.comment_newline() {
                    Some(newline) => Some(newline),
                    None => self.main_unit()?,
                },
                false => self.main_unit()?,
            };
            let Some(unit) = next else {
                break;
            };
            let is_end = matches!(unit.unit, ParseUnit::End);
            units.push(unit);
            self.skip_inline_spaces();
            if is_end {
                break;
            }
        }
        Ok(units)
    }

    /// An optional comment followed by a newline. A trailing comment may also end at EOF.
    fn comment_newline(&mut self) -> Option<LocatedParseUnit> {
        let start = self.pos;
        if self.peek() == Some(COMMENT) {
            self.take_while(|c| c != '\n');
        }
        match self.peek() {
            Some('\n') => {
                let newline = self.pos;
                self.bump();
                Some(LocatedParseUnit::new(
                    ParseUnit::Newline,
                    self.range_from(newline),
                ))
            }
            None if start != self.pos => Some(LocatedParseUnit::new(
                ParseUnit::Newline,
                PositionRange::at(self.pos),
            )),
            _ => {
                self.pos = start;
                None
            }
        }
    }

    fn expect_line_end(&mut self, what: &str) -> Result<(), SmError> {
        self.skip_inline_spaces();
        if self.comment_newline().is_some() || self.peek().is_none() {
            return Ok(());
        }
        Err(self.error_from(
            "PARSE_SYNTAX",
            format!("Expected a newline after {}.", what),
            self.pos,
        ))
    }

    fn main_unit(&mut self) -> Result<Option<LocatedParseUnit>, SmError> {
        let start = self.pos;
        let unit = if self.starts_with(END_OF_SCRIPT) {
            while self.bump().is_some() {}
            Some(ParseUnit::End)
        } else if self.starts_with(LAMBDA_MACRO_PRM) {
            self.bump_str(LAMBDA_MACRO_PRM);
            Some(ParseUnit::LambdaMacroParam)
        } else if self.starts_with(MACRO_OL_OPEN) {
            Some(self.single_line_macro()?)
        } else if self.starts_with(MACRO_OPEN) {
            Some(self.multi_line_macro()?)
        } else if self.starts_with(PROP_MARKER) {
            Some(self.property_line(PROP_MARKER, PROP_KW)?)
        } else if self.starts_with(PROP2_MARKER) {
            Some(self.property_line(PROP2_MARKER, PROP2_KW)?)
        } else if let Some(interpolated) = self.interpolation() {
            Some(interpolated)
        } else {
            match self.peek() {
                Some(c) if is_simple_char(c) => Some(ParseUnit::Atom(self.simple_string())),
                Some(OPEN_ARG) => Some(ParseUnit::Paren(self.paren_args()?)),
                Some(OPEN_PF) => Some(self.postfix()?),
                Some(MACRO_VAR) => Some(self.macro_var()?),
                Some(MACRO_INVOKE) if self.starts_with(MACRO_REINVOKE) => {
                    Some(self.macro_reinvoke()?)
                }
                Some(MACRO_INVOKE) => Some(self.macro_invoke()?),
                Some(QUOTE) => Some(self.quote()?),
                _ => None,
            }
        };
        Ok(unit.map(|unit| LocatedParseUnit::new(unit, self.range_from(start))))
    }

    fn single_line_macro(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump_str(MACRO_OL_OPEN);
        if self.peek() == Some('}') {
            self.bump();
        }
        self.skip_inline_spaces();
        let key = self.simple_string();
        if key.is_empty() {
            return Err(self.error_from("PARSE_SYNTAX", "Expected a macro name after !!{.", start));
        }
        self.skip_inline_spaces();
        let content = self.words(false)?;
        if content.is_empty() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("Single-line macro \"{}\" has no content.", key),
                start,
            ));
        }
        self.expect_line_end("a single-line macro")?;
        self.define(Macro::create(
            key.clone(),
            Vec::new(),
            LocatedParseUnit::words(content),
        ));
        Ok(ParseUnit::MacroDef(key))
    }

    fn multi_line_macro(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump_str(MACRO_OPEN);
        self.skip_whitespace();
        let key = self.simple_string();
        if key.is_empty() {
            return Err(self.error_from("PARSE_SYNTAX", "Expected a macro name after !{.", start));
        }
        if self.peek() != Some(OPEN_ARG) {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("Macro \"{}\" must declare its parameters in parentheses.", key),
                start,
            ));
        }
        let prms = self.paren(|lexer| lexer.macro_param())?;
        self.skip_whitespace();
        let content = self.words(true)?;
        if content.is_empty() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("Macro \"{}\" has no body.", key),
                start,
            ));
        }
        if !self.starts_with(MACRO_CLOSE) {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("Expected !}} to close the definition of macro \"{}\".", key),
                start,
            ));
        }
        self.bump_str(MACRO_CLOSE);
        self.expect_line_end("a macro definition")?;
        self.define(Macro::create(key.clone(), prms, LocatedParseUnit::words(content)));
        Ok(ParseUnit::MacroDef(key))
    }

    fn define(&mut self, definition: Macro) {
        log::debug!(
            "defined macro {} with {} parameter(s)",
            definition.name,
            definition.nprms
        );
        self.macros
            .insert(definition.name.clone(), Rc::new(definition));
    }

    fn macro_param(&mut self) -> Result<Option<MacroArg>, SmError> {
        let name = self.take_while(is_param_char);
        if name.is_empty() {
            return Ok(None);
        }
        let save = self.pos;
        if self.skip_whitespace() {
            let start = self.pos;
            let words = self.words(true)?;
            if !words.is_empty() {
                return Ok(Some(MacroArg {
                    name,
                    default: Some(LocatedParseUnit::new(
                        ParseUnit::nest(words),
                        self.range_from(start),
                    )),
                }));
            }
            self.pos = save;
        }
        Ok(Some(MacroArg {
            name,
            default: None,
        }))
    }

    fn property_line(&mut self, marker: &str, keyword: &str) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump_str(marker);
        let marker_range = self.range_from(start);
        self.skip_inline_spaces();
        let words = self.words(false)?;
        if words.is_empty() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                format!("Expected property content after {}.", marker),
                start,
            ));
        }
        let mut units = vec![LocatedParseUnit::new(
            ParseUnit::Atom(keyword.to_string()),
            marker_range,
        )];
        units.extend(words);
        Ok(ParseUnit::Words(units))
    }

    /// `a%b%c` glued without spaces. Needs at least one `%name%`, otherwise rewinds.
    fn interpolation(&mut self) -> Option<ParseUnit> {
        let save = self.pos;
        let mut terms = Vec::new();
        let first = self.positioned(Self::simple_string);
        let Some(var) = self.bounded_var() else {
            self.pos = save;
            return None;
        };
        terms.push(first);
        terms.push(var);
        loop {
            terms.push(self.positioned(Self::simple_string));
            match self.bounded_var() {
                Some(var) => terms.push(var),
                None => break,
            }
        }
        let mut units: Vec<LocatedParseUnit> = terms
            .into_iter()
            .enumerate()
            .filter(|(_, (text, _))| !text.is_empty())
            .map(|(i, (text, position))| match i % 2 {
                0 => LocatedParseUnit::new(ParseUnit::Atom(text), position),
                _ => LocatedParseUnit::new(ParseUnit::MacroVar(text), position),
            })
            .collect();
        if units.len() == 1 {
            units.pop().map(|unit| unit.unit)
        } else {
            Some(ParseUnit::NoSpaceWords(units))
        }
    }

    fn positioned(&mut self, read: impl Fn(&mut Self) -> String) -> (String, PositionRange) {
        let start = self.pos;
        let text = read(self);
        (text, self.range_from(start))
    }

    fn bounded_var(&mut self) -> Option<(String, PositionRange)> {
        let start = self.pos;
        if self.peek() != Some(MACRO_VAR) {
            return None;
        }
        self.bump();
        let name = self.take_while(is_param_char);
        if name.is_empty() || self.peek() != Some(MACRO_VAR) {
            self.pos = start;
            return None;
        }
        self.bump();
        Some((name, self.range_from(start)))
    }

    fn paren<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<Option<T>, SmError>,
    ) -> Result<Vec<T>, SmError> {
        let open = self.pos;
        self.bump();
        self.skip_whitespace();
        let mut items = Vec::new();
        if let Some(first) = item(self)? {
            items.push(first);
            loop {
                let save = self.pos;
                self.skip_whitespace();
                if self.peek() != Some(ARG_SEP) {
                    self.pos = save;
                    break;
                }
                self.bump();
                self.skip_whitespace();
                match item(self)? {
                    Some(next) => items.push(next),
                    None => {
                        return Err(self.error_from(
                            "PARSE_SYNTAX",
                            "Expected an argument after ','.",
                            self.pos,
                        ))
                    }
                }
            }
        }
        if self.peek() != Some(CLOSE_ARG) {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                "Expected parentheses to close here.",
                open,
            ));
        }
        self.bump();
        Ok(items)
    }

    fn paren_args(&mut self) -> Result<Vec<LocatedParseUnit>, SmError> {
        let items = self.paren(|lexer| {
            let start = lexer.pos;
            let words = lexer.words(true)?;
            Ok(Some(LocatedParseUnit::new(
                ParseUnit::nest(words),
                lexer.range_from(start),
            )))
        })?;
        match items.as_slice() {
            [only] if matches!(&only.unit, ParseUnit::Words(words) if words.is_empty()) => {
                Ok(Vec::new())
            }
            _ => Ok(items),
        }
    }

    fn postfix(&mut self) -> Result<ParseUnit, SmError> {
        let open = self.pos;
        self.bump();
        self.skip_inline_spaces();
        let postfix = self.words(true)?;
        if self.peek() != Some(CLOSE_PF) {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                "Expected ] to close the postfix group.",
                open,
            ));
        }
        self.bump();
        self.skip_inline_spaces();
        let start = self.pos;
        let word = match self.peek() {
            Some(c) if is_simple_char(c) => ParseUnit::Atom(self.simple_string()),
            Some(OPEN_ARG) => ParseUnit::Paren(self.paren_args()?),
            Some(MACRO_INVOKE) if !self.starts_with(MACRO_REINVOKE) => self.macro_invoke()?,
            _ => {
                return Err(self.error_from(
                    "PARSE_SYNTAX",
                    "A postfix group must be followed by a word, parentheses, or a macro invocation.",
                    open,
                ))
            }
        };
        Ok(ParseUnit::postfix_swap(
            LocatedParseUnit::new(word, self.range_from(start)),
            postfix,
        ))
    }

    fn macro_var(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump();
        let name = self.take_while(is_param_char);
        if name.is_empty() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                "Expected a macro parameter name after %.",
                start,
            ));
        }
        Ok(ParseUnit::MacroVar(name))
    }

    fn macro_reinvoke(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump_str(MACRO_REINVOKE);
        let name = self.simple_string();
        if name.is_empty() || self.peek() != Some(OPEN_ARG) {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                "A reinvocation must look like $%name(args).",
                start,
            ));
        }
        let args = self.paren_args()?;
        Ok(ParseUnit::MacroReinvoke(name, args))
    }

    fn macro_invoke(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump();
        let name = self.simple_string();
        if name.is_empty() {
            return Err(self.error_from(
                "PARSE_SYNTAX",
                "Expected a macro name after $.",
                start,
            ));
        }
        let args = match self.peek() {
            Some(OPEN_ARG) => self.paren_args()?,
            _ => Vec::new(),
        };
        let at = self.range_from(start);
        let Some(definition) = self.macros.get(&name).cloned() else {
            return Err(SmError::with_span(
                "PARSE_MACRO",
                format!("No macro exists with name {}.", name),
                at,
            ));
        };
        definition
            .invoke(args, &at)
            .map(|expanded| expanded.unit)
            .map_err(|message| SmError::with_span("PARSE_MACRO", message, at))
    }

    fn quote(&mut self) -> Result<ParseUnit, SmError> {
        let start = self.pos;
        self.bump();
        let content = self.take_while(|c| c != QUOTE);
        if self.peek() != Some(QUOTE) {
            return Err(self.error_from("PARSE_SYNTAX", "Unterminated quote.", start));
        }
        self.bump();
        Ok(ParseUnit::Quote(content))
    }
}
