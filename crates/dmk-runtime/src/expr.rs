use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use dmk_core::SmError;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope, AST, FLOAT, INT};

use crate::gcx::GenCtx;
use crate::rng::{next_random_bounded, next_random_range};

const INDEX_NAMES: [&str; 3] = ["i", "pi", "index"];
const TIME_NAME: &str = "time";

pub struct Compiled {
    source: String,
    ast: AST,
    assigned: Vec<String>,
}

/// A numeric or boolean expression evaluated against a generation context.
#[derive(Clone)]
pub enum GcxExpr {
    Const(f64),
    Script(Rc<Compiled>),
}

impl GcxExpr {
    /// Numeric literals and `inf` bind as constants, anything else is compiled as rhai.
    pub fn parse(text: &str) -> Result<Self, SmError> {
        match parse_number(text) {
            Some(value) => Ok(Self::Const(value)),
            None => Self::compile(text),
        }
    }

    pub fn compile(source: &str) -> Result<Self, SmError> {
        let ast = Engine::new().compile_expression(source).map_err(|error| {
            SmError::new(
                "EXPR_COMPILE",
                format!("Expression `{}` failed to compile: {}", source, error),
            )
        })?;
        Ok(Self::Script(Rc::new(Compiled {
            source: source.to_string(),
            ast,
            assigned: Vec::new(),
        })))
    }

    pub fn source(&self) -> String {
        match self {
            Self::Const(value) => value.to_string(),
            Self::Script(compiled) => compiled.source.clone(),
        }
    }

    pub fn eval(&self, gcx: &RefCell<GenCtx>) -> Result<f64, SmError> {
        match self {
            Self::Const(value) => Ok(*value),
            Self::Script(compiled) => {
                let value = evaluate(compiled, gcx, false)?;
                dynamic_to_f64(&value).ok_or_else(|| {
                    SmError::new(
                        "EXPR_TYPE",
                        format!(
                            "Expression `{}` produced {} where a number was expected.",
                            compiled.source,
                            value.type_name()
                        ),
                    )
                })
            }
        }
    }

    /// Truncates towards zero like a cast.
    pub fn eval_int(&self, gcx: &RefCell<GenCtx>) -> Result<i64, SmError> {
        let value = self.eval(gcx)?;
        if value >= i64::MAX as f64 {
            Ok(i64::MAX)
        } else {
            Ok(value as i64)
        }
    }

    pub fn eval_bool(&self, gcx: &RefCell<GenCtx>) -> Result<bool, SmError> {
        match self {
            Self::Const(value) => Ok(*value != 0.0),
            Self::Script(compiled) => {
                let value = evaluate(compiled, gcx, false)?;
                if let Ok(flag) = value.as_bool() {
                    return Ok(flag);
                }
                dynamic_to_f64(&value).map(|v| v != 0.0).ok_or_else(|| {
                    SmError::new(
                        "EXPR_TYPE",
                        format!(
                            "Expression `{}` produced {} where a boolean was expected.",
                            compiled.source,
                            value.type_name()
                        ),
                    )
                })
            }
        }
    }
}

impl fmt::Debug for GcxExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(value) => write!(f, "Const({})", value),
            Self::Script(compiled) => write!(f, "Script(`{}`)", compiled.source),
        }
    }
}

/// A statement block whose assignments are written back into the generation context.
#[derive(Clone)]
pub struct GcxRule(Rc<Compiled>);

impl GcxRule {
    pub fn compile(source: &str) -> Result<Self, SmError> {
        let ast = Engine::new().compile(source).map_err(|error| {
            SmError::new(
                "EXPR_COMPILE",
                format!("Rule `{}` failed to compile: {}", source, error),
            )
        })?;
        let assigned = assignment_regex()
            .captures_iter(source)
            .filter_map(|captures| captures.get(1))
            .map(|name| name.as_str().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(Self(Rc::new(Compiled {
            source: source.to_string(),
            ast,
            assigned,
        })))
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }

    pub fn apply(&self, gcx: &RefCell<GenCtx>) -> Result<(), SmError> {
        evaluate(&self.0, gcx, true).map(|_| ())
    }
}

impl fmt::Debug for GcxRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcxRule(`{}`)", self.0.source)
    }
}

pub fn apply_rules(rules: &[GcxRule], gcx: &RefCell<GenCtx>) -> Result<(), SmError> {
    for rule in rules {
        rule.apply(gcx)?;
    }
    Ok(())
}

pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "inf" | "infinity" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => trimmed.parse::<f64>().ok(),
    }
}

fn evaluate(compiled: &Compiled, gcx: &RefCell<GenCtx>, is_rule: bool) -> Result<Dynamic, SmError> {
    let mut scope = Scope::new();
    let rng_state = {
        let gcx = gcx.borrow();
        for (name, value) in [("i", gcx.i), ("pi", gcx.pi), ("index", gcx.index)] {
            scope.push_dynamic(name, Dynamic::from(value as INT));
        }
        scope.push_dynamic(TIME_NAME, Dynamic::from(gcx.summon_time as FLOAT));
        let rv2 = gcx.rv2;
        for (name, value) in [
            ("nx", rv2.nx),
            ("ny", rv2.ny),
            ("rx", rv2.rx),
            ("ry", rv2.ry),
            ("angle", rv2.angle),
        ] {
            scope.push_dynamic(name, Dynamic::from(value as FLOAT));
        }
        for (name, value) in &gcx.vars {
            scope.push_dynamic(name.clone(), Dynamic::from(*value as FLOAT));
        }
        for name in &compiled.assigned {
            if !scope.contains(name) {
                scope.push_dynamic(name.clone(), Dynamic::from(0.0 as FLOAT));
            }
        }
        Rc::new(RefCell::new(gcx.rng_state()))
    };

    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    register_random(&mut engine, &rng_state);

    let result = if is_rule {
        engine
            .run_ast_with_scope(&mut scope, &compiled.ast)
            .map(|_| Dynamic::UNIT)
            .map_err(|error| {
                SmError::new(
                    "EXPR_EVAL",
                    format!("Rule `{}` failed: {}", compiled.source, error),
                )
            })
    } else {
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &compiled.ast)
            .map_err(|error| {
                SmError::new(
                    "EXPR_EVAL",
                    format!("Expression `{}` failed: {}", compiled.source, error),
                )
            })
    };

    let mut gcx = gcx.borrow_mut();
    gcx.set_rng_state(*rng_state.borrow());
    let value = result?;
    if is_rule {
        write_back(&scope, &mut gcx, &compiled.source)?;
    }
    Ok(value)
}

fn write_back(scope: &Scope, gcx: &mut GenCtx, source: &str) -> Result<(), SmError> {
    for (name, _, value) in scope.iter() {
        if INDEX_NAMES.contains(&name) || name == TIME_NAME {
            continue;
        }
        let number = dynamic_to_f64(&value).ok_or_else(|| {
            SmError::new(
                "EXPR_TYPE",
                format!(
                    "Rule `{}` left variable {} holding {}, but only numbers can be stored.",
                    source,
                    name,
                    value.type_name()
                ),
            )
        })?;
        match name {
            "nx" => gcx.rv2.nx = number,
            "ny" => gcx.rv2.ny = number,
            "rx" => gcx.rv2.rx = number,
            "ry" => gcx.rv2.ry = number,
            "angle" => gcx.rv2.angle = number,
            _ => gcx.set_var(name, number),
        }
    }
    Ok(())
}

fn register_random(engine: &mut Engine, rng_state: &Rc<RefCell<u32>>) {
    let state = Rc::clone(rng_state);
    engine.register_fn("rand", move |low: FLOAT, high: FLOAT| -> FLOAT {
        next_random_range(&mut state.borrow_mut(), low, high)
    });
    let state = Rc::clone(rng_state);
    engine.register_fn("rand", move |low: INT, high: INT| -> FLOAT {
        next_random_range(&mut state.borrow_mut(), low as FLOAT, high as FLOAT)
    });
    let state = Rc::clone(rng_state);
    engine.register_fn(
        "randi",
        move |low: INT, high: INT| -> Result<INT, Box<EvalAltResult>> {
            if high <= low {
                return Err(Box::new(EvalAltResult::ErrorRuntime(
                    Dynamic::from("randi(a, b) expects a < b."),
                    Position::NONE,
                )));
            }
            let span = (high - low).min(INT::from(u32::MAX)) as u32;
            Ok(low + next_random_bounded(&mut state.borrow_mut(), span) as INT)
        },
    );
    let state = Rc::clone(rng_state);
    engine.register_fn(
        "random",
        move |bound: INT| -> Result<INT, Box<EvalAltResult>> {
            if bound <= 0 {
                return Err(Box::new(EvalAltResult::ErrorRuntime(
                    Dynamic::from("random(n) expects positive integer n."),
                    Position::NONE,
                )));
            }
            let mut state = state.borrow_mut();
            let bound = bound.min(INT::from(u32::MAX)) as u32;
            Ok(next_random_bounded(&mut state, bound) as INT)
        },
    );
}

fn dynamic_to_f64(value: &Dynamic) -> Option<f64> {
    if let Ok(number) = value.as_float() {
        return Some(number);
    }
    if let Ok(number) = value.as_int() {
        return Some(number as f64);
    }
    value.as_bool().ok().map(|flag| if flag { 1.0 } else { 0.0 })
}

fn assignment_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?:^|[;{\s])([A-Za-z_][A-Za-z0-9_]*)\s*(?:[-+*/%]?=)(?:[^=]|$)")
            .expect("assignment regex")
    })
}
