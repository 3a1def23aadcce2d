use dmk_core::{PositionRange, SmError};
use dmk_parser::{ParenGroup, ParsedUnit, PROP_KW};

pub const LINE_DELIM: &str = "\n";
pub const ARR_OPEN: &str = "{";
pub const ARR_CLOSE: &str = "}";
pub const ARR_EMPTY: [&str; 3] = [".", "{}", "_"];

fn is_newline(unit: &ParsedUnit) -> bool {
    unit.as_str() == Some(LINE_DELIM)
}

fn range_of(units: &[ParsedUnit]) -> PositionRange {
    match (units.first(), units.last()) {
        (Some(first), Some(last)) => PositionRange::new(first.position().start, last.position().end),
        _ => PositionRange::synthetic(),
    }
}

pub fn print_unit(unit: &ParsedUnit) -> String {
    match unit {
        ParsedUnit::Str { item, .. } => item.clone(),
        ParsedUnit::Paren { items, .. } => format!(
            "({})",
            items
                .iter()
                .map(|group| print_units(&group.units))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub fn print_units(units: &[ParsedUnit]) -> String {
    units.iter().map(print_unit).collect::<Vec<_>>().join(" ")
}

fn located_error(
    code: &str,
    line: usize,
    message: &str,
    context: &str,
    span: PositionRange,
) -> SmError {
    let context = if context.trim().is_empty() {
        "<Empty parser text>".to_string()
    } else {
        context.replace('\n', "\n\t")
    };
    SmError::with_span(code, format!("Line {}: {}\n\t{}", line, message, context), span)
}

/// Mutating cursor over a flat token stream.
///
/// Scans skip newline tokens; `is_newline` looks at the raw token under the
/// cursor so constructors can require a statement to end its line.
#[derive(Debug, Clone)]
pub struct ParseQueue<'a> {
    units: &'a [ParsedUnit],
    index: usize,
    position: PositionRange,
}

/// What [`ParseQueue::next_child`] descends into.
pub enum Child<'q, 'a> {
    /// The next unit was a parenthesized group.
    Paren(ParenQueue<'a>),
    /// The same cursor, for a child that reads the following tokens directly.
    Inline(&'q mut ParseQueue<'a>),
}

impl<'a> ParseQueue<'a> {
    pub fn new(units: &'a [ParsedUnit]) -> Self {
        Self {
            units,
            index: 0,
            position: range_of(units),
        }
    }

    pub fn over_group(group: &'a ParenGroup) -> Self {
        Self {
            units: &group.units,
            index: 0,
            position: group.position.clone(),
        }
    }

    pub fn position(&self) -> &PositionRange {
        &self.position
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn skip_newlines(&self, mut index: usize) -> usize {
        while self.units.get(index).is_some_and(is_newline) {
            index += 1;
        }
        index
    }

    /// The next non-newline unit and its index.
    pub fn maybe_current(&self) -> Option<(usize, &'a ParsedUnit)> {
        let index = self.skip_newlines(self.index);
        self.units.get(index).map(|unit| (index, unit))
    }

    pub fn current(&self) -> Result<(usize, &'a ParsedUnit), SmError> {
        self.maybe_current().ok_or_else(|| self.out_of_text())
    }

    /// The unit directly under the cursor, newline or not.
    pub fn peek_raw(&self) -> Option<&'a ParsedUnit> {
        self.units.get(self.index)
    }

    pub fn scan_unit(&self) -> Result<(usize, &'a str), SmError> {
        let (index, unit) = self.current()?;
        match unit.as_str() {
            Some(item) => Ok((index, item)),
            None => Err(self.error_at(
                index,
                "QUEUE_EXPECTED_STRING",
                "Expected a string unit, but found parentheses instead.",
            )),
        }
    }

    pub fn scan(&self) -> Result<&'a str, SmError> {
        self.scan_unit().map(|(_, item)| item)
    }

    pub fn maybe_scan(&self) -> Option<&'a str> {
        self.maybe_current().and_then(|(_, unit)| unit.as_str())
    }

    pub fn next(&mut self) -> Result<&'a str, SmError> {
        let (index, item) = self.scan_unit()?;
        self.index = index + 1;
        Ok(item)
    }

    pub fn advance(&mut self) -> Result<(), SmError> {
        let (index, _) = self.current()?;
        self.index = index + 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.maybe_current().is_none()
    }

    pub fn is_newline(&self) -> bool {
        self.peek_raw().is_some_and(is_newline)
    }

    pub fn is_newline_or_empty(&self) -> bool {
        self.is_empty() || self.is_newline()
    }

    /// Index of the first unconsumed non-newline unit, if any.
    pub fn leftover(&self) -> Option<usize> {
        self.maybe_current().map(|(index, _)| index)
    }

    /// Peeks the next word that does not open a property line, skipping whole property lines.
    pub fn scan_non_property(&self) -> Result<(usize, &'a str), SmError> {
        let mut index = self.skip_newlines(self.index);
        loop {
            let unit = self.units.get(index).ok_or_else(|| self.out_of_text())?;
            let item = unit.as_str().ok_or_else(|| {
                self.error_at(
                    index,
                    "QUEUE_EXPECTED_STRING",
                    "Expected a string unit, but found parentheses instead.",
                )
            })?;
            if item != PROP_KW {
                return Ok((index, item));
            }
            while self.units.get(index).is_some_and(|unit| !is_newline(unit)) {
                index += 1;
            }
            index = self.skip_newlines(index);
        }
    }

    /// Descends into the next parenthesized group, or forwards this cursor when there is none.
    pub fn next_child(&mut self) -> Result<Child<'_, 'a>, SmError> {
        let units = self.units;
        match units.get(self.index) {
            None => Err(self.error("QUEUE_TOO_SHORT", "This section of text is too short.")),
            Some(ParsedUnit::Paren { items, position }) => {
                self.index += 1;
                Ok(Child::Paren(ParenQueue::new(items, position.clone())))
            }
            Some(_) => {
                self.index = self.skip_newlines(self.index);
                Ok(Child::Inline(self))
            }
        }
    }

    fn line_at(&self, index: usize) -> usize {
        self.units
            .get(index)
            .or_else(|| self.units.last())
            .map_or(self.position.start.line, |unit| unit.position().start.line)
    }

    fn span_at(&self, index: usize) -> PositionRange {
        self.units
            .get(index)
            .map_or_else(|| self.position.clone(), |unit| unit.position().clone())
    }

    /// The line containing `index`, with that unit wrapped in `≪ ≫`.
    pub fn print_highlight(&self, index: usize) -> String {
        let mut start = index.min(self.units.len());
        while start > 0 && !self.units.get(start - 1).is_some_and(is_newline) {
            start -= 1;
        }
        let mut end = index;
        while self.units.get(end).is_some_and(|unit| !is_newline(unit)) {
            end += 1;
        }
        (start..end)
            .filter_map(|i| {
                self.units.get(i).map(|unit| {
                    if i == index {
                        format!("≪{}≫", print_unit(unit))
                    } else {
                        print_unit(unit)
                    }
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn print(&self) -> String {
        print_units(self.units)
    }

    /// An error anchored at the unit at `index`.
    pub fn error_at(&self, index: usize, code: &str, message: impl AsRef<str>) -> SmError {
        located_error(
            code,
            self.line_at(index),
            message.as_ref(),
            &self.print_highlight(index),
            self.span_at(index),
        )
    }

    /// An error anchored at the cursor, dumping the whole queue.
    pub fn error(&self, code: &str, message: impl AsRef<str>) -> SmError {
        let index = self.skip_newlines(self.index);
        located_error(
            code,
            self.line_at(index),
            message.as_ref(),
            &self.print(),
            self.span_at(index),
        )
    }

    pub fn out_of_text(&self) -> SmError {
        self.error(
            "QUEUE_OUT_OF_TEXT",
            "The parser ran out of text to read at the end of the following:",
        )
    }
}

/// Cursor over the comma-separated groups of one parenthesized unit.
///
/// Groups are only reachable through [`ParenQueue::next_child`]; there is no
/// token-level scanning at this level.
#[derive(Debug, Clone)]
pub struct ParenQueue<'a> {
    groups: &'a [ParenGroup],
    index: usize,
    position: PositionRange,
}

impl<'a> ParenQueue<'a> {
    pub fn new(groups: &'a [ParenGroup], position: PositionRange) -> Self {
        Self {
            groups,
            index: 0,
            position,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index >= self.groups.len()
    }

    pub fn position(&self) -> &PositionRange {
        &self.position
    }

    pub fn next_child(&mut self) -> Result<ParseQueue<'a>, SmError> {
        let group = self.groups.get(self.index).ok_or_else(|| {
            self.error(
                "QUEUE_TOO_SHORT",
                "The parentheses ran out of arguments to read.",
            )
        })?;
        self.index += 1;
        Ok(ParseQueue::over_group(group))
    }

    pub fn print_highlight(&self, index: usize) -> String {
        let groups = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let text = print_units(&group.units);
                if i == index {
                    format!("≪{}≫", text)
                } else {
                    text
                }
            })
            .collect::<Vec<_>>();
        format!("({})", groups.join(", "))
    }

    pub fn error(&self, code: &str, message: impl AsRef<str>) -> SmError {
        located_error(
            code,
            self.position.start.line,
            message.as_ref(),
            &self.print_highlight(self.index),
            self.position.clone(),
        )
    }
}
