pub mod args;
pub mod construct;
pub mod context;
pub mod properties;
pub mod queue;
pub mod registry;

use std::rc::Rc;

use dmk_core::SmError;
use dmk_parser::{export_parsed_units, PROP_KW};
use dmk_runtime::{PhaseProperties, StateMachine};
use log::debug;

pub use args::{ArgValue, BoundArgs, ParamKind};
pub use construct::Constructor;
pub use context::{ReflCtx, Strictness};
pub use queue::{ParenQueue, ParseQueue};
pub use registry::{LeafFlavour, Registry};

/// Parses a script and constructs its root state machine with the standard registry.
pub fn create_from_dump(text: &str) -> Result<Rc<StateMachine>, SmError> {
    let registry = Registry::standard()?;
    create_from_dump_with(&registry, text)
}

pub fn create_from_dump_with(
    registry: &Registry,
    text: &str,
) -> Result<Rc<StateMachine>, SmError> {
    let units = export_parsed_units(text)?;
    let mut q = ParseQueue::new(&units);
    let mut cx = Constructor::new(registry);
    cx.ctx_mut().parse_parser_properties(&mut q)?;
    let root = cx.construct(&mut q)?;
    if let Some(error) = cx.ctx().parse_end_failure(&q) {
        return Err(error);
    }
    debug!(
        "constructed {} from {} units ({} nonfatal errors skipped)",
        root.kind().name(),
        units.len(),
        cx.ctx().nonfatal_errors.len()
    );
    Ok(root)
}

/// Collects the phase configuration of every group of `<!>` lines in a script
/// without constructing it.
pub fn parse_phases(text: &str) -> Result<Vec<PhaseProperties>, SmError> {
    let registry = Registry::standard()?;
    let units = export_parsed_units(text)?;
    let mut q = ParseQueue::new(&units);
    let mut cx = Constructor::new(&registry);
    let mut phases = Vec::new();
    while !q.is_empty() {
        cx.maybe_queue_properties(&mut q)?;
        let queued: Vec<_> = cx
            .ctx_mut()
            .queued_props
            .drain(..)
            .map(|queued| queued.property)
            .collect();
        if !queued.is_empty() {
            phases.push(PhaseProperties::from_props(&queued)?);
        }
        while !q.is_empty() && q.maybe_scan() != Some(PROP_KW) {
            q.advance()?;
        }
    }
    Ok(phases)
}

#[cfg(test)]
mod tests;
