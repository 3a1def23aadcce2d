use std::cell::RefCell;
use std::rc::Rc;

use dmk_core::SmError;

use crate::expr::{apply_rules, GcxExpr, GcxRule};
use crate::gcx::{GenCtx, Rv2};
use crate::sm::StateMachine;
use crate::wait::FRAME_TIME;

/// How the firing index seen by children is derived from the loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parametrization {
    /// The iteration number.
    This,
    /// The index of the enclosing scope, unchanged.
    #[default]
    Defer,
    /// `parent * max + i % max`.
    Mod,
    /// `parent * max + (max - 1 - i % max)`.
    InvMod,
}

impl Parametrization {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "this" => Some(Self::This),
            "defer" => Some(Self::Defer),
            "mod" => Some(Self::Mod),
            "invmod" => Some(Self::InvMod),
            _ => None,
        }
    }

    pub fn firing_index(
        self,
        parent_index: i64,
        iteration: i64,
        max_times: Option<i64>,
    ) -> Result<i64, SmError> {
        let modulus = || {
            max_times.filter(|max| *max > 0).ok_or_else(|| {
                SmError::new(
                    "RUNTIME_PARAMETRIZATION",
                    "Mod number must be provided for mod parametrization. Use the \"maxtimes\" property.",
                )
            })
        };
        match self {
            Self::This => Ok(iteration),
            Self::Defer => Ok(parent_index),
            Self::Mod => {
                let max = modulus()?;
                Ok(parent_index * max + iteration.rem_euclid(max))
            }
            Self::InvMod => {
                let max = modulus()?;
                Ok(parent_index * max + (max - 1 - iteration.rem_euclid(max)))
            }
        }
    }
}

/// Configuration of a `gtr` repeater. Frame counts are engine frames.
#[derive(Debug, Clone, Default)]
pub struct GtrProps {
    pub times: Option<GcxExpr>,
    pub max_times: Option<i64>,
    pub wait: Option<GcxExpr>,
    pub delay: Option<GcxExpr>,
    pub fortime: Option<GcxExpr>,
    pub wait_child: bool,
    pub sequential: bool,
    pub run_while: Option<GcxExpr>,
    pub unpause: Option<Rc<StateMachine>>,
    pub clip: Option<GcxExpr>,
    pub cancel: Option<GcxExpr>,
    pub rpp: Option<Rv2>,
    pub start: Vec<GcxRule>,
    pub preloop: Vec<GcxRule>,
    pub postloop: Vec<GcxRule>,
    pub end: Vec<GcxRule>,
    pub alternate: Option<GcxExpr>,
    pub bind_itr: Option<String>,
    pub parametrization: Parametrization,
}

impl GtrProps {
    pub fn validate(&self) -> Result<(), SmError> {
        if self.unpause.is_some() && self.run_while.is_none() {
            return Err(SmError::new(
                "BUILD_GTR_UNPAUSE",
                "The unpause property requires a while property.",
            ));
        }
        Ok(())
    }
}

/// Iteration bookkeeping for one run of a repeater.
///
/// The loop works on its own copy of the caller's generation context; each
/// iteration's children receive further copies of it.
pub struct LoopControl<'a> {
    props: &'a GtrProps,
    gcx: RefCell<GenCtx>,
    times: i64,
    parent_index: i64,
    elapsed_frames: i64,
    allowed_frames: i64,
    has_been_cancelled: bool,
}

impl<'a> LoopControl<'a> {
    /// Returns the control and whether the loop is clipped before its first iteration.
    pub fn new(props: &'a GtrProps, caller: &RefCell<GenCtx>) -> Result<(Self, bool), SmError> {
        let gcx = RefCell::new(caller.borrow().clone());
        let parent_index = gcx.borrow().index;
        let times = match &props.times {
            Some(times) => times.eval_int(&gcx)?,
            None => 1,
        };
        apply_rules(&props.start, &gcx)?;
        let clipped = times <= 0
            || match &props.clip {
                Some(clip) => clip.eval_bool(&gcx)?,
                None => false,
            };
        let allowed_frames = match &props.fortime {
            Some(fortime) => fortime.eval_int(&gcx)?,
            None => i64::MAX,
        };
        {
            let mut gcx = gcx.borrow_mut();
            gcx.pi = gcx.i;
            gcx.i = 0;
        }
        let control = Self {
            props,
            gcx,
            times,
            parent_index,
            elapsed_frames: 0,
            allowed_frames,
            has_been_cancelled: false,
        };
        Ok((control, clipped))
    }

    pub fn gcx(&self) -> &RefCell<GenCtx> {
        &self.gcx
    }

    pub fn times(&self) -> i64 {
        self.times
    }

    pub fn remains_except_last(&self) -> bool {
        self.gcx.borrow().i < self.times - 1
    }

    pub fn is_unpaused(&self) -> Result<bool, SmError> {
        match &self.props.run_while {
            Some(condition) => condition.eval_bool(&self.gcx),
            None => Ok(true),
        }
    }

    pub fn wait_step(&mut self) {
        self.gcx.borrow_mut().summon_time += FRAME_TIME;
        self.elapsed_frames += 1;
    }

    pub fn delay_frames(&self) -> Result<f64, SmError> {
        self.eval_or_zero(self.props.delay.as_ref())
    }

    pub fn wait_frames(&self) -> Result<f64, SmError> {
        self.eval_or_zero(self.props.wait.as_ref())
    }

    fn eval_or_zero(&self, expr: Option<&GcxExpr>) -> Result<f64, SmError> {
        match expr {
            Some(expr) => expr.eval(&self.gcx),
            None => Ok(0.0),
        }
    }

    /// Index into the children for this iteration, when only one child runs per iteration.
    pub fn selected_child(&self, count: usize) -> Result<Option<usize>, SmError> {
        let Some(indexer) = &self.props.alternate else {
            return Ok(None);
        };
        if count == 0 {
            return Ok(None);
        }
        let index = indexer.eval_int(&self.gcx)?;
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        Ok(usize::try_from(index.rem_euclid(count)).ok())
    }

    /// Sets up the next iteration. Returns false once the loop has been cancelled.
    pub fn prepare_iteration(&mut self) -> Result<bool, SmError> {
        {
            let mut gcx = self.gcx.borrow_mut();
            gcx.index = self
                .props
                .parametrization
                .firing_index(self.parent_index, gcx.i, self.props.max_times)?;
            if let Some(name) = &self.props.bind_itr {
                let i = gcx.i as f64;
                gcx.set_var(name.clone(), i);
            }
        }
        apply_rules(&self.props.preloop, &self.gcx)?;
        Ok(!self.is_cancelled()?)
    }

    pub fn prepare_last_iteration(&mut self) -> Result<bool, SmError> {
        if self.gcx.borrow().i == self.times - 1 {
            self.prepare_iteration()
        } else {
            Ok(false)
        }
    }

    pub fn finish_iteration(&mut self) -> Result<(), SmError> {
        apply_rules(&self.props.postloop, &self.gcx)?;
        let mut gcx = self.gcx.borrow_mut();
        if let Some(rpp) = self.props.rpp {
            gcx.rv2 += rpp;
        }
        gcx.i += 1;
        Ok(())
    }

    /// Ends the loop. On a normal end the `end` rules run and the loop's
    /// variables are written back to the caller.
    pub fn all_done(
        &mut self,
        run_finish_iteration: bool,
        normal_end: bool,
        caller: &RefCell<GenCtx>,
    ) -> Result<(), SmError> {
        if run_finish_iteration {
            self.finish_iteration()?;
        }
        if normal_end {
            apply_rules(&self.props.end, &self.gcx)?;
            let vars = self.gcx.borrow().vars.clone();
            caller.borrow_mut().vars.extend(vars);
        }
        Ok(())
    }

    fn is_cancelled(&mut self) -> Result<bool, SmError> {
        if !self.has_been_cancelled {
            let cancel = match &self.props.cancel {
                Some(cancel) => cancel.eval_bool(&self.gcx)?,
                None => false,
            };
            self.has_been_cancelled = cancel || self.elapsed_frames >= self.allowed_frames;
        }
        Ok(self.has_been_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(source: &str) -> GcxRule {
        GcxRule::compile(source).expect("rule should compile")
    }

    #[test]
    fn loop_counts_iterations_and_exports_end_rules() {
        let props = GtrProps {
            times: Some(GcxExpr::Const(3.0)),
            start: vec![rule("total = 0.0")],
            postloop: vec![rule("total = total + 1.0")],
            end: vec![rule("done = total")],
            rpp: Some(Rv2::new(0.0, 0.0, 0.0, 0.0, 10.0)),
            ..GtrProps::default()
        };
        let caller = RefCell::new(GenCtx::new(1));
        let (mut control, clipped) = LoopControl::new(&props, &caller).expect("loop should start");
        assert!(!clipped);
        let mut iterations = 0;
        while control.remains_except_last() {
            assert!(control.prepare_iteration().expect("iteration should prepare"));
            iterations += 1;
            control.finish_iteration().expect("iteration should finish");
        }
        assert!(control.prepare_last_iteration().expect("last iteration should prepare"));
        iterations += 1;
        control.all_done(true, true, &caller).expect("loop should end");
        assert_eq!(iterations, 3);
        assert_eq!(control.gcx().borrow().rv2.angle, 30.0);
        assert_eq!(caller.borrow().var("done"), Some(3.0));
        assert_eq!(caller.borrow().rv2.angle, 0.0);
    }

    #[test]
    fn zero_times_and_clip_condition_clip_the_loop() {
        let caller = RefCell::new(GenCtx::new(1));
        let zero = GtrProps {
            times: Some(GcxExpr::Const(0.0)),
            ..GtrProps::default()
        };
        assert!(LoopControl::new(&zero, &caller).expect("loop should start").1);
        let clip = GtrProps {
            clip: Some(GcxExpr::compile("1 > 0").expect("clip should compile")),
            ..GtrProps::default()
        };
        assert!(LoopControl::new(&clip, &caller).expect("loop should start").1);
    }

    #[test]
    fn fortime_cancels_later_iterations() {
        let props = GtrProps {
            times: Some(GcxExpr::Const(10.0)),
            fortime: Some(GcxExpr::Const(2.0)),
            ..GtrProps::default()
        };
        let caller = RefCell::new(GenCtx::new(1));
        let (mut control, _) = LoopControl::new(&props, &caller).expect("loop should start");
        assert!(control.prepare_iteration().expect("first iteration"));
        control.wait_step();
        control.wait_step();
        assert!(!control.prepare_iteration().expect("second iteration"));
    }

    #[test]
    fn parametrization_derives_firing_index() {
        assert_eq!(Parametrization::This.firing_index(4, 2, None).expect("this"), 2);
        assert_eq!(Parametrization::Defer.firing_index(4, 2, None).expect("defer"), 4);
        assert_eq!(Parametrization::Mod.firing_index(1, 5, Some(3)).expect("mod"), 5);
        assert_eq!(Parametrization::InvMod.firing_index(1, 5, Some(3)).expect("invmod"), 3);
        let error = Parametrization::Mod
            .firing_index(1, 5, None)
            .expect_err("mod without maxtimes should fail");
        assert_eq!(error.code, "RUNTIME_PARAMETRIZATION");
    }
}
