use std::cell::Cell;
use std::rc::Rc;

use dmk_core::SmError;
use futures::FutureExt;

use crate::handoff::SmHandoff;
use crate::loop_control::{GtrProps, LoopControl};
use crate::scheduler::yield_frame;

use super::{Children, SmKind, StateMachine};

/// `gtr`: repeats its children on a frame-based schedule.
///
/// Every iteration but the last runs detached, so the loop keeps its own
/// schedule while children are still running. The last iteration is always
/// awaited, which makes the node finish only after its final children do.
pub struct GtRepeat {
    props: GtrProps,
    states: Children,
    shorthand: bool,
}

impl GtRepeat {
    pub fn new(props: GtrProps, states: Children) -> Result<Self, SmError> {
        props.validate()?;
        Ok(Self {
            props,
            states,
            shorthand: false,
        })
    }

    /// `gtr2 wait times rpp`: the three leading values are folded into the properties.
    pub fn shorthand(props: GtrProps, states: Children) -> Result<Self, SmError> {
        Ok(Self {
            shorthand: true,
            ..Self::new(props, states)?
        })
    }

    pub fn props(&self) -> &GtrProps {
        &self.props
    }

    pub fn states(&self) -> &[Rc<StateMachine>] {
        &self.states
    }

    pub fn kind(&self) -> SmKind {
        if self.shorthand {
            SmKind::GtRepeat2
        } else {
            SmKind::GtRepeat
        }
    }

    pub(crate) async fn run(&self, smh: SmHandoff) -> Result<(), SmError> {
        let tracker = smh.copy();
        let (mut looper, clipped) = LoopControl::new(&self.props, smh.gcx())?;
        if clipped || tracker.cancelled() {
            return looper.all_done(false, false, smh.gcx());
        }
        let delay = looper.delay_frames()?;
        let mut extra = self.wait(&mut looper, &tracker, delay, None).await?;
        let mut first = true;
        loop {
            if tracker.cancelled() {
                return looper.all_done(false, false, smh.gcx());
            }
            if !first {
                looper.finish_iteration()?;
            }
            first = false;
            if !(looper.remains_except_last() && looper.prepare_iteration()?) {
                break;
            }
            let done = self.iterate(&looper, &tracker)?;
            let child = if self.props.wait_child {
                extra -= 1.0;
                Some(done)
            } else {
                None
            };
            let wait = looper.wait_frames()? - extra;
            extra = self.wait(&mut looper, &tracker, wait, child).await?;
        }
        if looper.prepare_last_iteration()? {
            let done = self.iterate(&looper, &tracker)?;
            self.wait(&mut looper, &tracker, -extra, Some(done)).await?;
        }
        looper.all_done(true, true, smh.gcx())
    }

    /// Starts one iteration's children detached. The returned flag is set once all of them finish.
    fn iterate(&self, looper: &LoopControl<'_>, tracker: &SmHandoff) -> Result<Rc<Cell<bool>>, SmError> {
        let done = Rc::new(Cell::new(false));
        let iteration = tracker.with_gcx(looper.gcx().borrow().clone());
        let states: Children = match looper.selected_child(self.states.len())? {
            Some(index) => self.states[index..=index].to_vec(),
            None => self.states.clone(),
        };
        let scheduler = tracker.scheduler().clone();
        if states.is_empty() {
            done.set(true);
        } else if self.props.sequential {
            let flag = Rc::clone(&done);
            scheduler.spawn(
                async move {
                    let result = run_sequential_until_cancelled(&states, &iteration).await;
                    flag.set(true);
                    result
                }
                .boxed_local(),
            );
        } else {
            let remaining = Rc::new(Cell::new(states.len()));
            for state in &states {
                let task = state.start(iteration.share());
                let remaining = Rc::clone(&remaining);
                let flag = Rc::clone(&done);
                scheduler.spawn(
                    async move {
                        let result = task.await;
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            flag.set(true);
                        }
                        result
                    }
                    .boxed_local(),
                );
            }
        }
        Ok(done)
    }

    /// Waits `frames` frames of unpaused time, plus until `child` is done when given.
    /// Returns the frames overshot, which the next wait subtracts.
    async fn wait(
        &self,
        looper: &mut LoopControl<'_>,
        tracker: &SmHandoff,
        frames: f64,
        child: Option<Rc<Cell<bool>>>,
    ) -> Result<f64, SmError> {
        if tracker.cancelled() {
            return Ok(frames);
        }
        let child_done = || child.as_ref().map_or(true, |done| done.get());
        let mut was_paused = false;
        let mut counter = -frames;
        while !looper.is_unpaused()? || !child_done() || counter < 0.0 {
            yield_frame().await;
            if tracker.cancelled() {
                return Ok(counter);
            }
            looper.wait_step();
            if !looper.is_unpaused()? {
                was_paused = true;
                continue;
            }
            if was_paused {
                if let Some(unpause) = &self.props.unpause {
                    let handoff = tracker.with_gcx(looper.gcx().borrow().clone());
                    tracker.scheduler().spawn(unpause.start(handoff));
                }
            }
            was_paused = false;
            if child_done() {
                counter += 1.0;
            }
        }
        Ok(counter)
    }
}

/// Iteration children in order. Cancellation stops the iteration without an error.
async fn run_sequential_until_cancelled(
    states: &[Rc<StateMachine>],
    smh: &SmHandoff,
) -> Result<(), SmError> {
    for state in states {
        if smh.cancelled() {
            break;
        }
        state.start(smh.share()).await?;
    }
    Ok(())
}
