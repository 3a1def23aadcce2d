use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use dmk_core::SmError;
use dmk_parser::{ParsedUnit, PROP_KW};
use dmk_runtime::{
    expr::parse_number, GcxExpr, GcxRule, GtrProps, PatternProperties, PhaseProperties, Rv2,
    StateMachine,
};
use regex::Regex;

use crate::construct::Constructor;
use crate::properties;
use crate::queue::{ParenQueue, ParseQueue, ARR_CLOSE, ARR_EMPTY, ARR_OPEN};

const INFIX_OPERATORS: [&str; 11] = ["+", "-", "*", "/", "<", ">", "<=", ">=", "==", "&&", "||"];

/// The shape of one constructor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    Int,
    Text,
    /// A generation-context expression.
    Expr,
    /// A generation-context statement block.
    Rule,
    /// `<nx;ny:rx;ry:angle>`
    Rv2,
    /// `{ a b c }`, an empty marker (`.`, `{}`, `_`), or a single element.
    List(&'static ParamKind),
    Tuple(&'static [ParamKind]),
    /// Read only if the next token on the same line fits.
    Optional(&'static ParamKind),
    Child,
    GtrProps,
    PatternProps,
    /// Taken from queued and inline `<!>` declarations rather than from arguments.
    PhaseProps,
}

impl ParamKind {
    fn is_explicit(self) -> bool {
        !matches!(self, ParamKind::PhaseProps)
    }

    fn is_optional(self) -> bool {
        matches!(self, ParamKind::Optional(_))
    }

    /// A list of state machines given in place of the children that would follow.
    pub fn is_child_list(self) -> bool {
        match self {
            ParamKind::Optional(inner) => inner.is_child_list(),
            ParamKind::List(inner) => *inner == ParamKind::Child,
            _ => false,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Number => f.write_str("number"),
            ParamKind::Int => f.write_str("integer"),
            ParamKind::Text => f.write_str("text"),
            ParamKind::Expr => f.write_str("expression"),
            ParamKind::Rule => f.write_str("rule"),
            ParamKind::Rv2 => f.write_str("rv2"),
            ParamKind::List(inner) => write!(f, "list of {}", inner),
            ParamKind::Tuple(fields) => write!(
                f,
                "({})",
                fields
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            ParamKind::Optional(inner) => write!(f, "optional {}", inner),
            ParamKind::Child => f.write_str("state machine"),
            ParamKind::GtrProps => f.write_str("repeater properties"),
            ParamKind::PatternProps => f.write_str("pattern properties"),
            ParamKind::PhaseProps => f.write_str("phase properties"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArgValue {
    Number(f64),
    Int(i64),
    Text(String),
    Expr(GcxExpr),
    Rule(GcxRule),
    Rv2(Rv2),
    List(Vec<ArgValue>),
    Tuple(Vec<ArgValue>),
    /// An optional argument that was not given.
    Missing,
    Child(Rc<StateMachine>),
    Gtr(GtrProps),
    Pattern(PatternProperties),
    Phase(PhaseProperties),
}

impl ArgValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ArgValue::Number(value) => Some(*value),
            ArgValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::List(items) | ArgValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

/// Arguments bound for one constructor call, plus any children read after them.
#[derive(Debug)]
pub struct BoundArgs {
    name: String,
    values: Vec<ArgValue>,
    children: Vec<Rc<StateMachine>>,
}

impl BoundArgs {
    pub fn new(name: impl Into<String>, values: Vec<ArgValue>, children: Vec<Rc<StateMachine>>) -> Self {
        Self {
            name: name.into(),
            values,
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn children(&self) -> Vec<Rc<StateMachine>> {
        self.children.clone()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        match self.values.get(index) {
            Some(ArgValue::Missing) | None => None,
            Some(value) => Some(value),
        }
    }

    fn mismatch(&self, index: usize, expected: &str) -> SmError {
        SmError::new(
            "BUILD_ARG_TYPE",
            format!(
                "Argument #{} of {} should be a {}.",
                index + 1,
                self.name,
                expected
            ),
        )
    }

    fn typed<'a, T>(
        &'a self,
        index: usize,
        expected: &str,
        read: impl FnOnce(&'a ArgValue) -> Option<T>,
    ) -> Result<T, SmError> {
        self.get(index)
            .and_then(read)
            .ok_or_else(|| self.mismatch(index, expected))
    }

    pub fn number(&self, index: usize) -> Result<f64, SmError> {
        self.typed(index, "number", ArgValue::as_number)
    }

    pub fn optional_number(&self, index: usize) -> Result<Option<f64>, SmError> {
        match self.get(index) {
            None => Ok(None),
            Some(_) => self.number(index).map(Some),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, SmError> {
        self.typed(index, "integer", ArgValue::as_int)
    }

    pub fn optional_int(&self, index: usize) -> Result<Option<i64>, SmError> {
        match self.get(index) {
            None => Ok(None),
            Some(_) => self.int(index).map(Some),
        }
    }

    pub fn text(&self, index: usize) -> Result<String, SmError> {
        self.typed(index, "text", |value| value.as_text().map(str::to_string))
    }

    pub fn optional_text(&self, index: usize) -> Result<Option<String>, SmError> {
        match self.get(index) {
            None => Ok(None),
            Some(_) => self.text(index).map(Some),
        }
    }

    pub fn texts(&self, index: usize) -> Result<Vec<String>, SmError> {
        let items = self.list(index)?;
        items
            .iter()
            .map(|item| {
                item.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| self.mismatch(index, "list of text"))
            })
            .collect()
    }

    pub fn list(&self, index: usize) -> Result<&[ArgValue], SmError> {
        self.typed(index, "list", ArgValue::as_items)
    }

    pub fn expr(&self, index: usize) -> Result<GcxExpr, SmError> {
        self.typed(index, "expression", |value| match value {
            ArgValue::Expr(expr) => Some(expr.clone()),
            _ => None,
        })
    }

    pub fn rule(&self, index: usize) -> Result<GcxRule, SmError> {
        self.typed(index, "rule", |value| match value {
            ArgValue::Rule(rule) => Some(rule.clone()),
            _ => None,
        })
    }

    pub fn rv2(&self, index: usize) -> Result<Rv2, SmError> {
        self.typed(index, "rv2", |value| match value {
            ArgValue::Rv2(rv2) => Some(*rv2),
            _ => None,
        })
    }

    pub fn child(&self, index: usize) -> Result<Rc<StateMachine>, SmError> {
        self.typed(index, "state machine", |value| match value {
            ArgValue::Child(child) => Some(Rc::clone(child)),
            _ => None,
        })
    }

    pub fn child_list(&self, index: usize) -> Result<Vec<Rc<StateMachine>>, SmError> {
        self.list(index)?
            .iter()
            .map(|item| match item {
                ArgValue::Child(child) => Ok(Rc::clone(child)),
                _ => Err(self.mismatch(index, "list of state machines")),
            })
            .collect()
    }

    pub fn gtr_props(&self, index: usize) -> Result<GtrProps, SmError> {
        self.typed(index, "repeater property list", |value| match value {
            ArgValue::Gtr(props) => Some(props.clone()),
            _ => None,
        })
    }

    pub fn pattern_props(&self, index: usize) -> Result<PatternProperties, SmError> {
        self.typed(index, "pattern property list", |value| match value {
            ArgValue::Pattern(props) => Some(props.clone()),
            _ => None,
        })
    }

    pub fn phase_props(&self, index: usize) -> Result<PhaseProperties, SmError> {
        self.typed(index, "phase property list", |value| match value {
            ArgValue::Phase(props) => Some(props.clone()),
            _ => None,
        })
    }
}

fn child_count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:(\d+)$").expect("child count regex must compile"))
}

fn rv2_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<([^<>]*)>$").expect("rv2 regex must compile"))
}

/// `:N` caps the number of children a node reads.
pub fn child_count_marker(word: &str) -> Option<usize> {
    child_count_regex()
        .captures(word)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse().ok())
}

/// `<a>`, `<rx;ry:a>` or `<nx;ny:rx;ry:a>`. `<>` is the zero value.
pub fn parse_rv2(word: &str) -> Option<Rv2> {
    let body = rv2_regex().captures(word)?.get(1)?.as_str().trim();
    if body.is_empty() {
        return Some(Rv2::default());
    }
    let pair = |text: &str| -> Option<(f64, f64)> {
        let (a, b) = text.split_once(';')?;
        Some((parse_number(a)?, parse_number(b)?))
    };
    let parts: Vec<&str> = body.split(':').collect();
    match parts.as_slice() {
        [angle] => Some(Rv2::new(0.0, 0.0, 0.0, 0.0, parse_number(angle)?)),
        [rotated, angle] => {
            let (rx, ry) = pair(rotated)?;
            Some(Rv2::new(0.0, 0.0, rx, ry, parse_number(angle)?))
        }
        [plain, rotated, angle] => {
            let (nx, ny) = pair(plain)?;
            let (rx, ry) = pair(rotated)?;
            Some(Rv2::new(nx, ny, rx, ry, parse_number(angle)?))
        }
        _ => None,
    }
}

pub fn parse_int(word: &str) -> Option<i64> {
    let value = parse_number(word)?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

/// Strips one pair of surrounding double quotes.
pub fn unquote(word: &str) -> &str {
    word.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(word)
}

fn is_reserved(word: &str) -> bool {
    word == PROP_KW || child_count_marker(word).is_some()
}

/// Binds `params` for the constructor `owner`, either from one parenthesized
/// group per argument or from the following tokens.
pub(crate) fn bind_args(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    params: &[ParamKind],
    owner: &str,
) -> Result<Vec<ArgValue>, SmError> {
    let explicit = params.iter().filter(|param| param.is_explicit()).count();
    let required = params
        .iter()
        .filter(|param| param.is_explicit() && !param.is_optional())
        .count();
    let paren = match q.peek_raw() {
        Some(ParsedUnit::Paren { items, .. }) if explicit == 0 && items.is_empty() => {
            q.advance()?;
            None
        }
        Some(ParsedUnit::Paren { items, position })
            if explicit > 0 && (items.len() != 1 || explicit == 1) =>
        {
            q.advance()?;
            Some(ParenQueue::new(items, position.clone()))
        }
        _ => None,
    };
    match paren {
        Some(paren) => bind_from_paren(cx, q, paren, params, owner, required, explicit),
        None => bind_from_line(cx, q, params, owner),
    }
}

fn bind_from_paren(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    mut paren: ParenQueue<'_>,
    params: &[ParamKind],
    owner: &str,
    required: usize,
    explicit: usize,
) -> Result<Vec<ArgValue>, SmError> {
    if paren.len() < required || paren.len() > explicit {
        return Err(paren.error(
            "BUILD_ARG_COUNT",
            format!(
                "Expected {} explicit arguments for {}, but the parentheses contain {}.",
                explicit,
                owner,
                paren.len()
            ),
        ));
    }
    let mut values = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        if !param.is_explicit() {
            values.push(read_implicit(cx, q, *param)?);
            continue;
        }
        if paren.is_empty() {
            values.push(ArgValue::Missing);
            continue;
        }
        let mut local = paren.next_child()?;
        let kind = match param {
            ParamKind::Optional(inner) => **inner,
            other => *other,
        };
        let value = read_group(cx, &mut local, kind)
            .map_err(|error| argument_error(error, i, params.len(), kind, owner))?;
        values.push(value);
    }
    Ok(values)
}

fn bind_from_line(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    params: &[ParamKind],
    owner: &str,
) -> Result<Vec<ArgValue>, SmError> {
    let mut values = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        match param {
            ParamKind::PhaseProps => values.push(read_implicit(cx, q, *param)?),
            ParamKind::Optional(inner) => values.push(read_optional(cx, q, **inner)),
            kind => {
                if q.is_empty() {
                    return Err(q.error(
                        "BUILD_ARG_MISSING",
                        format!(
                            "Tried to construct {}, but the parser ran out of text when looking for argument #{}/{} ({}).",
                            owner,
                            i + 1,
                            params.len(),
                            kind
                        ),
                    ));
                }
                let value = read_arg(cx, q, *kind)
                    .map_err(|error| argument_error(error, i, params.len(), *kind, owner))?;
                values.push(value);
            }
        }
    }
    Ok(values)
}

fn argument_error(error: SmError, index: usize, count: usize, kind: ParamKind, owner: &str) -> SmError {
    if error.code.starts_with("BUILD_ARG") || error.code.starts_with("QUEUE") {
        return error;
    }
    SmError {
        message: format!(
            "Tried to construct {}, but failed to create argument #{}/{} ({}).\n{}",
            owner,
            index + 1,
            count,
            kind,
            error.message
        ),
        ..error
    }
}

/// An optional argument is only taken from the current line, and only when it parses.
fn read_optional(cx: &mut Constructor<'_>, q: &mut ParseQueue<'_>, kind: ParamKind) -> ArgValue {
    if q.is_newline_or_empty() || q.maybe_scan().is_some_and(is_reserved) {
        return ArgValue::Missing;
    }
    let mut probe = q.clone();
    match read_arg(cx, &mut probe, kind) {
        Ok(value) => {
            *q = probe;
            value
        }
        Err(_) => ArgValue::Missing,
    }
}

fn read_implicit(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    kind: ParamKind,
) -> Result<ArgValue, SmError> {
    match kind {
        ParamKind::PhaseProps => properties::take_phase_props(cx, q).map(ArgValue::Phase),
        other => Err(q.error(
            "BUILD_ARG_TYPE",
            format!("{} cannot be filled implicitly.", other),
        )),
    }
}

/// Reads one argument, descending into a parenthesized group if one is next.
pub(crate) fn read_arg(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    kind: ParamKind,
) -> Result<ArgValue, SmError> {
    let Some((_, ParsedUnit::Paren { items, position })) = q.maybe_current() else {
        return read_tokens(cx, q, kind);
    };
    q.advance()?;
    let mut paren = ParenQueue::new(items, position.clone());
    if let ParamKind::Tuple(fields) = kind {
        if paren.len() != fields.len() {
            return Err(paren.error(
                "BUILD_ARG_COUNT",
                format!(
                    "Expected a tuple of {} values, but the parentheses contain {}.",
                    fields.len(),
                    paren.len()
                ),
            ));
        }
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let mut local = paren.next_child()?;
            values.push(read_group(cx, &mut local, *field)?);
        }
        return Ok(ArgValue::Tuple(values));
    }
    if paren.len() != 1 {
        return Err(paren.error(
            "BUILD_ARG_COUNT",
            format!("Expected one {} in parentheses, but found {} groups.", kind, paren.len()),
        ));
    }
    let mut local = paren.next_child()?;
    read_group(cx, &mut local, kind)
}

/// Reads a whole comma-separated group as one argument. An expression takes
/// the group's full text.
fn read_group(
    cx: &mut Constructor<'_>,
    local: &mut ParseQueue<'_>,
    kind: ParamKind,
) -> Result<ArgValue, SmError> {
    if kind == ParamKind::Expr && !local.is_empty() {
        let value = read_expr_text(&local.print(), local, local.index())?;
        while !local.is_empty() {
            local.advance()?;
        }
        return Ok(value);
    }
    let value = read_arg(cx, local, kind)?;
    if let Some(index) = local.leftover() {
        return Err(local.error_at(
            index,
            "BUILD_LEFTOVER",
            format!("Found leftover text after parsing a {}.", kind),
        ));
    }
    Ok(value)
}

fn read_expr_text(text: &str, q: &ParseQueue<'_>, index: usize) -> Result<ArgValue, SmError> {
    GcxExpr::parse(text)
        .map(ArgValue::Expr)
        .map_err(|error| q.error_at(index, &error.code, error.message))
}

fn read_tokens(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    kind: ParamKind,
) -> Result<ArgValue, SmError> {
    match kind {
        ParamKind::Number => {
            let (index, word) = q.scan_unit()?;
            let value = parse_number(word).ok_or_else(|| {
                q.error_at(index, "BUILD_ARG_TYPE", format!("Expected a number, but found `{}`.", word))
            })?;
            q.advance()?;
            Ok(ArgValue::Number(value))
        }
        ParamKind::Int => {
            let (index, word) = q.scan_unit()?;
            let value = parse_int(word).ok_or_else(|| {
                q.error_at(index, "BUILD_ARG_TYPE", format!("Expected an integer, but found `{}`.", word))
            })?;
            q.advance()?;
            Ok(ArgValue::Int(value))
        }
        ParamKind::Text => Ok(ArgValue::Text(unquote(q.next()?).to_string())),
        ParamKind::Expr => {
            let (index, word) = q.scan_unit()?;
            q.advance()?;
            let mut text = word.to_string();
            if cx.ctx().allow_post_aggregate() {
                while let Some((operator, operand)) = trailing_infix(q) {
                    text = format!("{} {} {}", text, operator, operand);
                    q.advance()?;
                    q.advance()?;
                }
            }
            read_expr_text(&text, q, index)
        }
        ParamKind::Rule => {
            let (index, word) = q.scan_unit()?;
            let rule = GcxRule::compile(word).map_err(|error| q.error_at(index, &error.code, error.message))?;
            q.advance()?;
            Ok(ArgValue::Rule(rule))
        }
        ParamKind::Rv2 => {
            let (index, word) = q.scan_unit()?;
            let rv2 = parse_rv2(word).ok_or_else(|| {
                q.error_at(
                    index,
                    "BUILD_ARG_TYPE",
                    format!("Expected an rv2 such as <nx;ny:rx;ry:angle>, but found `{}`.", word),
                )
            })?;
            q.advance()?;
            Ok(ArgValue::Rv2(rv2))
        }
        ParamKind::List(inner) => read_list(cx, q, *inner),
        ParamKind::Tuple(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                values.push(read_arg(cx, q, *field)?);
            }
            Ok(ArgValue::Tuple(values))
        }
        ParamKind::Optional(inner) => Ok(read_optional(cx, q, *inner)),
        ParamKind::Child => cx.construct_inline(q).map(ArgValue::Child),
        ParamKind::GtrProps => properties::read_gtr_props(cx, q).map(ArgValue::Gtr),
        ParamKind::PatternProps => properties::read_pattern_props(cx, q).map(ArgValue::Pattern),
        ParamKind::PhaseProps => read_implicit(cx, q, kind),
    }
}

/// `op operand` directly following on the same line.
fn trailing_infix<'a>(q: &ParseQueue<'a>) -> Option<(&'a str, &'a str)> {
    let operator = q.peek_raw()?.as_str()?;
    if !INFIX_OPERATORS.contains(&operator) {
        return None;
    }
    let mut probe = q.clone();
    probe.advance().ok()?;
    let operand = probe.peek_raw()?.as_str()?;
    (operand != "\n" && !is_reserved(operand)).then_some((operator, operand))
}

fn read_list(
    cx: &mut Constructor<'_>,
    q: &mut ParseQueue<'_>,
    inner: ParamKind,
) -> Result<ArgValue, SmError> {
    match q.maybe_scan() {
        Some(word) if ARR_EMPTY.contains(&word) => {
            q.advance()?;
            Ok(ArgValue::List(Vec::new()))
        }
        Some(ARR_OPEN) => {
            q.advance()?;
            let mut items = Vec::new();
            loop {
                if q.maybe_scan() == Some(ARR_CLOSE) {
                    q.advance()?;
                    return Ok(ArgValue::List(items));
                }
                if q.is_empty() {
                    return Err(q.error("BUILD_ARG_LIST", "A list opened with `{` was never closed."));
                }
                items.push(read_arg(cx, q, inner)?);
            }
        }
        _ => Ok(ArgValue::List(vec![read_arg(cx, q, inner)?])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rv2_literals_accept_short_forms() {
        assert_eq!(parse_rv2("<>"), Some(Rv2::default()));
        assert_eq!(parse_rv2("<90>"), Some(Rv2::new(0.0, 0.0, 0.0, 0.0, 90.0)));
        assert_eq!(parse_rv2("<1;2:45>"), Some(Rv2::new(0.0, 0.0, 1.0, 2.0, 45.0)));
        assert_eq!(
            parse_rv2("<0.5;-1:1;2:45>"),
            Some(Rv2::new(0.5, -1.0, 1.0, 2.0, 45.0))
        );
        assert_eq!(parse_rv2("<1;2>"), None);
        assert_eq!(parse_rv2("1;2:3"), None);
    }

    #[test]
    fn child_count_markers_are_colon_integers() {
        assert_eq!(child_count_marker(":3"), Some(3));
        assert_eq!(child_count_marker(":0"), Some(0));
        assert_eq!(child_count_marker(":x"), None);
        assert_eq!(child_count_marker("3"), None);
    }

    #[test]
    fn integers_reject_fractions() {
        assert_eq!(parse_int("4"), Some(4));
        assert_eq!(parse_int("-2"), Some(-2));
        assert_eq!(parse_int("2.5"), None);
        assert_eq!(parse_int("inf"), None);
    }

    #[test]
    fn bound_args_report_type_mismatches() {
        let args = BoundArgs::new(
            "timer",
            vec![ArgValue::Text("start".into()), ArgValue::Missing],
            Vec::new(),
        );
        assert_eq!(args.text(0).expect("text argument"), "start");
        assert_eq!(args.optional_text(1).expect("missing is fine"), None);
        let error = args.number(0).expect_err("text is not a number");
        assert_eq!(error.code, "BUILD_ARG_TYPE");
        assert_eq!(error.message, "Argument #1 of timer should be a number.");
    }

    #[test]
    fn quotes_are_stripped_once() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("plain"), "plain");
        assert_eq!(unquote("\"open"), "\"open");
    }
}
