use std::collections::HashMap;
use std::rc::Rc;

use dmk_core::PositionRange;

use crate::unit::{LocatedParseUnit, ParseUnit};

#[derive(Debug, Clone)]
pub struct MacroArg {
    pub name: String,
    pub default: Option<LocatedParseUnit>,
}

/// A user macro. Its body is kept unexpanded until invocation.
#[derive(Debug)]
pub struct Macro {
    pub name: String,
    pub nprms: usize,
    prm_index: HashMap<String, usize>,
    prm_defaults: Vec<Option<LocatedParseUnit>>,
    unformatted: LocatedParseUnit,
}

impl Macro {
    pub fn create(name: String, prms: Vec<MacroArg>, body: LocatedParseUnit) -> Self {
        let prm_index = prms
            .iter()
            .enumerate()
            .map(|(i, prm)| (prm.name.clone(), i))
            .collect();
        let nprms = prms.len();
        let prm_defaults = prms.into_iter().map(|prm| prm.default).collect();
        let position = body.position.clone();
        Self {
            name,
            nprms,
            prm_index,
            prm_defaults,
            unformatted: LocatedParseUnit::new(body.unit.cut_trailing_newline(), position),
        }
    }

    /// Expands the macro, backfilling defaults. Returns a partial invocation when any
    /// argument is still `!$`.
    pub fn invoke(
        self: &Rc<Self>,
        mut args: Vec<LocatedParseUnit>,
        at: &PositionRange,
    ) -> Result<LocatedParseUnit, String> {
        if args.len() != self.nprms {
            let defaults: Vec<LocatedParseUnit> = self
                .prm_defaults
                .iter()
                .skip(args.len())
                .flatten()
                .cloned()
                .collect();
            if args.len() + defaults.len() != self.nprms {
                return Err(format!(
                    "Macro \"{}\" requires {} arguments ({} provided)",
                    self.name,
                    self.nprms,
                    args.len()
                ));
            }
            args.extend(defaults);
        }
        if args.iter().any(|arg| arg.unit.reduce().is_lambda()) {
            return Ok(LocatedParseUnit::new(
                ParseUnit::PartialMacroInvoke(Rc::clone(self), args),
                at.clone(),
            ));
        }
        self.realize(&args, at)
    }

    pub fn realize(
        self: &Rc<Self>,
        args: &[LocatedParseUnit],
        at: &PositionRange,
    ) -> Result<LocatedParseUnit, String> {
        self.realize_over_unit(args, &self.unformatted, at)
    }

    fn realize_over_unit(
        self: &Rc<Self>,
        args: &[LocatedParseUnit],
        unformatted: &LocatedParseUnit,
        at: &PositionRange,
    ) -> Result<LocatedParseUnit, String> {
        let resolve_var = |name: &str| -> Result<LocatedParseUnit, String> {
            self.argument(args, name)
                .map(|(_, arg)| arg.with_position(at))
                .ok_or_else(|| format!("Macro body has nonexistent variable \"%{}\"", name))
        };
        let resolve_reinvoke =
            |name: &str, rargs: &[LocatedParseUnit]| -> Result<LocatedParseUnit, String> {
                let (index, arg) = self.argument(args, name).ok_or_else(|| {
                    format!("Macro body has nonexistent reinvocation \"$%{}\"", name)
                })?;
                let ParseUnit::PartialMacroInvoke(partial, pargs) = arg.unit.reduce() else {
                    return Err(format!(
                        "Macro argument \"{}.%{}\" (arg #{}) must be a partial macro invocation. \
                         This may occur if you already provided all necessary arguments.",
                        self.name,
                        name,
                        index + 1
                    ));
                };
                let open_slots = pargs.iter().filter(|p| p.unit.is_lambda()).count();
                if rargs.len() > open_slots {
                    return Err(format!(
                        "Macro \"{}\" provides too many arguments to partial macro \"{}\". \
                         ({} provided, {} required)",
                        self.name,
                        partial.name,
                        rargs.len(),
                        open_slots
                    ));
                }
                let mut supplied = rargs.iter();
                let filled: Vec<LocatedParseUnit> = pargs
                    .iter()
                    .map(|parg| match parg.unit.is_lambda() {
                        true => supplied.next().unwrap_or(parg).clone(),
                        false => parg.clone(),
                    })
                    .collect();
                let realized = collect_all(
                    filled
                        .iter()
                        .map(|unit| self.realize_over_unit(args, unit, at)),
                )?;
                partial.invoke(realized, at)
            };
        resolve_unit(
            &unformatted.with_position(at),
            &resolve_var,
            &resolve_reinvoke,
        )
    }

    fn argument<'a>(
        &self,
        args: &'a [LocatedParseUnit],
        name: &str,
    ) -> Option<(usize, &'a LocatedParseUnit)> {
        let index = *self.prm_index.get(name)?;
        args.get(index).map(|arg| (index, arg))
    }
}

type VarResolver<'a> = dyn Fn(&str) -> Result<LocatedParseUnit, String> + 'a;
type ReinvokeResolver<'a> =
    dyn Fn(&str, &[LocatedParseUnit]) -> Result<LocatedParseUnit, String> + 'a;

/// Substitutes macro variables and reinvocations. Nested units take the position of
/// their parent so the whole expansion points at the invocation site.
fn resolve_unit(
    unit: &LocatedParseUnit,
    resolve_var: &VarResolver<'_>,
    resolve_reinvoke: &ReinvokeResolver<'_>,
) -> Result<LocatedParseUnit, String> {
    let resolve_children = |children: &[LocatedParseUnit]| {
        collect_all(children.iter().map(|child| {
            resolve_unit(
                &child.with_position(&unit.position),
                resolve_var,
                resolve_reinvoke,
            )
        }))
    };
    match &unit.unit {
        ParseUnit::MacroVar(name) => resolve_var(name),
        ParseUnit::MacroReinvoke(name, rargs) => resolve_reinvoke(name, rargs),
        ParseUnit::Paren(children) => Ok(unit.with_unit(ParseUnit::Paren(resolve_children(children)?))),
        ParseUnit::Words(children) => Ok(unit.with_unit(ParseUnit::Words(resolve_children(children)?))),
        ParseUnit::NoSpaceWords(children) => Ok(unit.with_unit(ParseUnit::NoSpaceWords(
            resolve_children(children)?,
        ))),
        _ => Ok(unit.clone()),
    }
}

/// Runs every item and reports all failures together.
pub(crate) fn collect_all<T>(
    results: impl Iterator<Item = Result<T, String>>,
) -> Result<Vec<T>, String> {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(error) => errors.push(error),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(errors.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> LocatedParseUnit {
        LocatedParseUnit::new(ParseUnit::Atom(s.to_string()), PositionRange::synthetic())
    }

    fn var(s: &str) -> LocatedParseUnit {
        LocatedParseUnit::new(ParseUnit::MacroVar(s.to_string()), PositionRange::synthetic())
    }

    fn lambda() -> LocatedParseUnit {
        LocatedParseUnit::new(ParseUnit::LambdaMacroParam, PositionRange::synthetic())
    }

    fn add_macro() -> Rc<Macro> {
        Rc::new(Macro::create(
            "add".to_string(),
            vec![
                MacroArg {
                    name: "x".to_string(),
                    default: None,
                },
                MacroArg {
                    name: "y".to_string(),
                    default: Some(atom("4")),
                },
            ],
            LocatedParseUnit::words(vec![atom("+"), var("x"), var("y")]),
        ))
    }

    fn atoms(unit: &LocatedParseUnit) -> Vec<String> {
        match &unit.unit {
            ParseUnit::Words(items) => items.iter().flat_map(atoms).collect(),
            ParseUnit::Atom(s) => vec![s.clone()],
            other => panic!("unexpected unit {:?}", other),
        }
    }

    #[test]
    fn invoke_backfills_trailing_defaults() {
        let add = add_macro();
        let result = add
            .invoke(vec![atom("3")], &PositionRange::synthetic())
            .expect("default should fill y");
        assert_eq!(atoms(&result), vec!["+", "3", "4"]);
    }

    #[test]
    fn invoke_rejects_wrong_arity() {
        let add = add_macro();
        let error = add
            .invoke(vec![], &PositionRange::synthetic())
            .expect_err("x has no default");
        assert_eq!(error, "Macro \"add\" requires 2 arguments (0 provided)");
    }

    #[test]
    fn lambda_argument_produces_partial_invocation() {
        let add = add_macro();
        let result = add
            .invoke(vec![lambda(), atom("4")], &PositionRange::synthetic())
            .expect("partial invocation should succeed");
        match result.unit {
            ParseUnit::PartialMacroInvoke(m, args) => {
                assert_eq!(m.name, "add");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected unit {:?}", other),
        }
    }

    #[test]
    fn realize_reports_every_missing_variable() {
        let bad = Rc::new(Macro::create(
            "bad".to_string(),
            vec![],
            LocatedParseUnit::words(vec![var("p"), var("q")]),
        ));
        let error = bad
            .invoke(vec![], &PositionRange::synthetic())
            .expect_err("variables are not declared");
        assert!(error.contains("nonexistent variable \"%p\""));
        assert!(error.contains("nonexistent variable \"%q\""));
    }
}
