use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use dmk_core::SmError;

use crate::cancel::CancelToken;
use crate::gcx::GenCtx;
use crate::host::Host;
use crate::scheduler::Scheduler;
use crate::target::ExecutionTarget;

type PhaseObject = Box<dyn FnOnce()>;

/// Cleanup hooks owned by a pattern or phase scope.
///
/// Only the owning context runs its hooks; contexts derived from it share the
/// same list but never release it. Hooks run once, either on an explicit
/// [`SmContext::cleanup_objects`] or when the owner is dropped.
pub struct SmContext {
    objects: Rc<RefCell<Vec<PhaseObject>>>,
    owner: bool,
}

impl SmContext {
    pub fn new() -> Self {
        Self {
            objects: Rc::new(RefCell::new(Vec::new())),
            owner: true,
        }
    }

    pub fn derive(&self) -> Self {
        Self {
            objects: Rc::clone(&self.objects),
            owner: false,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn add_phase_object(&self, dispose: impl FnOnce() + 'static) {
        self.objects.borrow_mut().push(Box::new(dispose));
    }

    pub fn pending_objects(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn cleanup_objects(&self) {
        if !self.owner {
            return;
        }
        let objects = std::mem::take(&mut *self.objects.borrow_mut());
        for dispose in objects {
            dispose();
        }
    }
}

impl Default for SmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SmContext {
    fn drop(&mut self) {
        self.cleanup_objects();
    }
}

/// Everything a running state machine needs: its cancellation token, its
/// generation context, the target it runs on and the host it reports to.
pub struct SmHandoff {
    ct: CancelToken,
    gcx: Rc<RefCell<GenCtx>>,
    exec: Rc<dyn ExecutionTarget>,
    host: Rc<dyn Host>,
    context: SmContext,
}

impl SmHandoff {
    /// Top-level handoff with its own context.
    pub fn root(
        exec: Rc<dyn ExecutionTarget>,
        host: Rc<dyn Host>,
        ct: CancelToken,
        gcx: GenCtx,
    ) -> Self {
        Self {
            ct,
            gcx: Rc::new(RefCell::new(gcx)),
            exec,
            host,
            context: SmContext::new(),
        }
    }

    /// Same token and same generation context, for children awaited in place.
    pub fn share(&self) -> Self {
        Self {
            ct: self.ct.clone(),
            gcx: Rc::clone(&self.gcx),
            exec: Rc::clone(&self.exec),
            host: Rc::clone(&self.host),
            context: self.context.derive(),
        }
    }

    /// Same token with a private copy of the generation context.
    pub fn copy(&self) -> Self {
        self.with_gcx(self.gcx.borrow().clone())
    }

    pub fn with_gcx(&self, gcx: GenCtx) -> Self {
        Self {
            gcx: Rc::new(RefCell::new(gcx)),
            ..self.share()
        }
    }

    /// A copy bound to another execution target.
    pub fn retarget(&self, exec: Rc<dyn ExecutionTarget>) -> Self {
        Self {
            exec,
            ..self.copy()
        }
    }

    /// A copy whose token also cancels through its own trigger, returned alongside.
    /// With `context` the new handoff owns that context instead of deriving the parent's.
    pub fn joint(&self, context: Option<SmContext>) -> (Self, CancelToken) {
        let token = self.ct.joint();
        let handoff = Self {
            ct: token.clone(),
            context: context.unwrap_or_else(|| self.context.derive()),
            ..self.copy()
        };
        (handoff, token)
    }

    pub fn ct(&self) -> &CancelToken {
        &self.ct
    }

    pub fn gcx(&self) -> &RefCell<GenCtx> {
        &self.gcx
    }

    pub fn exec(&self) -> &Rc<dyn ExecutionTarget> {
        &self.exec
    }

    pub fn host(&self) -> &Rc<dyn Host> {
        &self.host
    }

    pub fn context(&self) -> &SmContext {
        &self.context
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.exec.updater()
    }

    pub fn cancelled(&self) -> bool {
        self.ct.is_cancelled()
    }

    pub fn throw_if_cancelled(&self) -> Result<(), SmError> {
        self.ct.throw_if_cancelled()
    }
}

impl fmt::Debug for SmHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmHandoff")
            .field("exec", &self.exec.name())
            .field("cancelled", &self.cancelled())
            .field("owns_context", &self.context.is_owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::target::Target;
    use std::cell::Cell;

    fn handoff() -> SmHandoff {
        let exec: Rc<dyn ExecutionTarget> = Rc::new(Target::new("boss", 1, Scheduler::new()));
        SmHandoff::root(exec, Rc::new(RecordingHost::new()), CancelToken::new(), GenCtx::new(5))
    }

    #[test]
    fn share_keeps_the_context_and_copy_does_not() {
        let smh = handoff();
        smh.share().gcx().borrow_mut().set_var("x", 1.0);
        assert_eq!(smh.gcx().borrow().var("x"), Some(1.0));
        smh.copy().gcx().borrow_mut().set_var("x", 2.0);
        assert_eq!(smh.gcx().borrow().var("x"), Some(1.0));
    }

    #[test]
    fn joint_token_does_not_cancel_the_parent() {
        let smh = handoff();
        let (joint, trigger) = smh.joint(None);
        trigger.cancel();
        assert!(joint.cancelled());
        assert!(!smh.cancelled());
        smh.ct().cancel();
        let (late, _) = smh.joint(None);
        assert!(late.cancelled());
    }

    #[test]
    fn phase_objects_are_released_once_by_the_owner() {
        let released = Rc::new(Cell::new(0));
        let smh = handoff();
        let (joint, _) = smh.joint(Some(SmContext::new()));
        let counter = Rc::clone(&released);
        joint.context().add_phase_object(move || counter.set(counter.get() + 1));
        let derived = joint.share();
        derived.context().cleanup_objects();
        drop(derived);
        assert_eq!(released.get(), 0);
        joint.context().cleanup_objects();
        assert_eq!(released.get(), 1);
        drop(joint);
        assert_eq!(released.get(), 1);
    }
}
