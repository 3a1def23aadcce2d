use std::rc::Rc;

use dmk_core::SmError;
use dmk_parser::PROP_KW;
use dmk_runtime::{LeafSm, SmKind, StateMachine};
use log::debug;

use crate::args::{bind_args, child_count_marker, ArgValue, BoundArgs};
use crate::context::{QueuedProperty, ReflCtx};
use crate::properties::read_phase_property;
use crate::queue::ParseQueue;
use crate::registry::{can_create, grammar_for, LeafEntry, LeafFlavour, NodeEntry, Registry};

enum Resolved<'r> {
    Node(&'r NodeEntry),
    Leaf(&'r LeafEntry, SmKind),
}

impl Resolved<'_> {
    fn kind(&self) -> SmKind {
        match self {
            Resolved::Node(entry) => entry.kind,
            Resolved::Leaf(_, kind) => *kind,
        }
    }
}

/// Builds state machines from a parse queue using the tables of a [`Registry`].
///
/// Kinds of the nodes currently being built are kept on a stack; a child is
/// checked against the innermost one that restricts its children.
pub struct Constructor<'r> {
    registry: &'r Registry,
    ctx: ReflCtx,
    parents: Vec<SmKind>,
}

impl<'r> Constructor<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            ctx: ReflCtx::new(),
            parents: Vec::new(),
        }
    }

    pub fn ctx(&self) -> &ReflCtx {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut ReflCtx {
        &mut self.ctx
    }

    pub fn into_ctx(self) -> ReflCtx {
        self.ctx
    }

    fn grammar(&self) -> Option<(SmKind, &'static [SmKind])> {
        self.parents
            .iter()
            .rev()
            .find_map(|kind| grammar_for(*kind).map(|allowed| (*kind, allowed)))
    }

    /// Queues the `<!>` lines in front of the next statement.
    pub fn maybe_queue_properties(&mut self, q: &mut ParseQueue<'_>) -> Result<(), SmError> {
        while let Some((index, unit)) = q.maybe_current() {
            if unit.as_str() != Some(PROP_KW) {
                break;
            }
            q.advance()?;
            let property = read_phase_property(self, q)?;
            self.ctx.queued_props.push(QueuedProperty {
                property,
                position: unit.position().clone(),
            });
            if !q.is_newline() {
                let at = q.leftover().unwrap_or(index);
                return Err(q.error_at(
                    at,
                    "BUILD_PROPERTY",
                    "Missing a newline at the end of the property declaration.",
                ));
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        q: &ParseQueue<'_>,
        index: usize,
        name: &str,
    ) -> Result<Resolved<'r>, SmError> {
        let grammar = self.grammar();
        let registry = self.registry;
        if let Some(entry) = registry.node(name) {
            return match grammar {
                Some((parent, allowed)) if !can_create(allowed, entry.kind) => Err(q.error_at(
                    index,
                    "BUILD_ILLEGAL_CHILD",
                    format!(
                        "State machine {}/{} is not allowed to be a child of {}.",
                        entry.kind.name(),
                        name,
                        parent.name()
                    ),
                )),
                _ => Ok(Resolved::Node(entry)),
            };
        }
        if let Some(entry) = registry.leaf(name) {
            let flavours = match grammar {
                None => vec![SmKind::ReflectedLineAction, SmKind::ReflectedScriptLine],
                Some((_, allowed)) => [SmKind::ReflectedScriptLine, SmKind::ReflectedLineAction]
                    .into_iter()
                    .filter(|kind| can_create(allowed, *kind))
                    .collect(),
            };
            if let Some(kind) = flavours.into_iter().find(|kind| entry.flavour.allows(*kind)) {
                return Ok(Resolved::Leaf(entry, kind));
            }
            let flavour = match entry.flavour {
                LeafFlavour::ScriptLine => "script line",
                LeafFlavour::LineAction | LeafFlavour::Both => "line action",
            };
            let parent = grammar.map_or("the top level", |(parent, _)| parent.name());
            return Err(q.error_at(
                index,
                "BUILD_ILLEGAL_CHILD",
                format!(
                    "State machine {} is a {}, which is not allowed to be a child of {}.",
                    name, flavour, parent
                ),
            ));
        }
        Err(q.error_at(
            index,
            "BUILD_UNKNOWN",
            format!("No state machine function found by name '{}'.", name),
        ))
    }

    /// Builds one statement: queued properties, keyword, arguments and children.
    pub fn construct(&mut self, q: &mut ParseQueue<'_>) -> Result<Rc<StateMachine>, SmError> {
        self.maybe_queue_properties(q)?;
        let (index, name) = q.scan_unit()?;
        let resolved = self.resolve(q, index, name)?;
        q.advance()?;
        let key = name.to_ascii_lowercase();
        self.parents.push(resolved.kind());
        let built = self.build(q, index, &key, &resolved);
        self.parents.pop();
        built.map(Rc::new)
    }

    /// Builds a state machine passed as an argument to another one.
    pub(crate) fn construct_inline(
        &mut self,
        q: &mut ParseQueue<'_>,
    ) -> Result<Rc<StateMachine>, SmError> {
        self.construct(q)
    }

    fn build(
        &mut self,
        q: &mut ParseQueue<'_>,
        index: usize,
        name: &str,
        resolved: &Resolved<'r>,
    ) -> Result<StateMachine, SmError> {
        match resolved {
            Resolved::Node(entry) => {
                let values = bind_args(self, q, &entry.params, name)?;
                if !self.ctx.queued_props.is_empty() {
                    return Err(q.error_at(
                        index,
                        "BUILD_PROPERTY",
                        format!("StateMachine {} is not allowed to have phase properties.", name),
                    ));
                }
                let count = match q.peek_raw().and_then(|unit| unit.as_str()) {
                    Some(word) => match child_count_marker(word) {
                        Some(count) => {
                            q.advance()?;
                            Some(count)
                        }
                        None => None,
                    },
                    None => None,
                };
                let given_children = entry
                    .params
                    .iter()
                    .zip(&values)
                    .any(|(param, value)| param.is_child_list() && !matches!(value, ArgValue::Missing));
                let children = if entry.reads_children && !given_children {
                    self.read_children(q, entry.kind, count)?
                } else {
                    Vec::new()
                };
                entry
                    .build(BoundArgs::new(name, values, children))
                    .map_err(|error| q.error_at(index, &error.code, error.message))
            }
            Resolved::Leaf(entry, kind) => {
                if !self.ctx.queued_props.is_empty() {
                    return Err(q.error_at(
                        index,
                        "BUILD_PROPERTY",
                        format!("StateMachine {} is not allowed to have phase properties.", name),
                    ));
                }
                let values = bind_args(self, q, &entry.params, name)?;
                let action = entry
                    .build(&BoundArgs::new(name, values, Vec::new()))
                    .map_err(|error| q.error_at(index, &error.code, error.message))?;
                Ok(StateMachine::Leaf(match kind {
                    SmKind::ReflectedScriptLine => LeafSm::script_line(name, action),
                    _ => LeafSm::line_action(name, action),
                }))
            }
        }
    }

    /// Reads statements until the grammar rejects one, the text ends, `count`
    /// children have been read, or a `break` was read.
    fn read_children(
        &mut self,
        q: &mut ParseQueue<'_>,
        kind: SmKind,
        count: Option<usize>,
    ) -> Result<Vec<Rc<StateMachine>>, SmError> {
        let mut children = Vec::new();
        let mut broke = false;
        while count.map_or(true, |count| children.len() < count) && !q.is_empty() {
            let (index, name) = q.scan_non_property()?;
            if let Err(error) = self.resolve(q, index, name) {
                if count.is_some() {
                    return Err(error);
                }
                debug!("{} stops reading children: {}", kind.name(), error.message);
                self.ctx.nonfatal_errors.push(error);
                break;
            }
            let child = self.construct(q)?;
            if !q.is_newline_or_empty() {
                let at = q.leftover().unwrap_or(index);
                return Err(q.error_at(
                    at,
                    "BUILD_LEFTOVER",
                    format!(
                        "Expected a newline after constructing {}, but found extra text (in ≪≫).",
                        name
                    ),
                ));
            }
            broke = child.is_break();
            children.push(child);
            if broke {
                break;
            }
        }
        if let Some(count) = count {
            if children.len() < count && !broke {
                return Err(q.error(
                    "BUILD_CHILD_COUNT",
                    format!(
                        "{} expected {} children, but only {} could be read.",
                        kind.name(),
                        count,
                        children.len()
                    ),
                ));
            }
        }
        Ok(children)
    }
}
