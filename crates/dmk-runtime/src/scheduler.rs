use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use dmk_core::SmError;
use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use log::debug;

/// A unit of cooperative work. Every yield point suspends until the next frame.
pub type SmTask = LocalBoxFuture<'static, Result<(), SmError>>;

struct SchedulerInner {
    running: RefCell<Vec<SmTask>>,
    incoming: RefCell<Vec<SmTask>>,
    faults: RefCell<Vec<SmError>>,
    frame: Cell<u64>,
}

/// Per-frame driver. Each call to [`Scheduler::step`] resumes every live task once.
#[derive(Clone)]
pub struct Scheduler(Rc<SchedulerInner>);

impl Scheduler {
    pub fn new() -> Self {
        Self(Rc::new(SchedulerInner {
            running: RefCell::new(Vec::new()),
            incoming: RefCell::new(Vec::new()),
            faults: RefCell::new(Vec::new()),
            frame: Cell::new(0),
        }))
    }

    /// Starts a detached task. It runs up to its first yield point before this returns.
    pub fn spawn(&self, mut task: SmTask) {
        match poll_once(&mut task) {
            Poll::Ready(result) => self.record(result),
            Poll::Pending => self.0.incoming.borrow_mut().push(task),
        }
    }

    /// Starts a task whose result can be observed through the returned handle.
    pub fn spawn_tracked(&self, task: SmTask) -> TaskHandle {
        let slot: Rc<RefCell<Option<Result<(), SmError>>>> = Rc::new(RefCell::new(None));
        let writer = Rc::clone(&slot);
        self.spawn(
            async move {
                let result = task.await;
                *writer.borrow_mut() = Some(result);
                Ok(())
            }
            .boxed_local(),
        );
        TaskHandle { slot }
    }

    /// Advances one frame.
    pub fn step(&self) {
        let mut tasks = std::mem::take(&mut *self.0.running.borrow_mut());
        tasks.append(&mut self.0.incoming.borrow_mut());
        let mut alive = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            match poll_once(&mut task) {
                Poll::Ready(result) => self.record(result),
                Poll::Pending => alive.push(task),
            }
        }
        // Tasks spawned during this frame already ran their first slice.
        self.0.running.borrow_mut().append(&mut alive);
        self.0.frame.set(self.0.frame.get() + 1);
    }

    pub fn frame(&self) -> u64 {
        self.0.frame.get()
    }

    /// Number of tasks still waiting on a future frame.
    pub fn pending(&self) -> usize {
        self.0.running.borrow().len() + self.0.incoming.borrow().len()
    }

    /// Faults raised by detached tasks, drained.
    pub fn take_faults(&self) -> Vec<SmError> {
        std::mem::take(&mut *self.0.faults.borrow_mut())
    }

    /// Drops every pending task without resuming it.
    pub fn clear(&self) {
        let running = std::mem::take(&mut *self.0.running.borrow_mut());
        let incoming = std::mem::take(&mut *self.0.incoming.borrow_mut());
        drop(running);
        drop(incoming);
    }

    fn record(&self, result: Result<(), SmError>) {
        if let Err(error) = result {
            if error.is_cancellation() {
                debug!("Detached task ended by cancellation.");
            } else {
                self.0.faults.borrow_mut().push(error);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskHandle {
    slot: Rc<RefCell<Option<Result<(), SmError>>>>,
}

impl TaskHandle {
    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn take_result(&self) -> Option<Result<(), SmError>> {
        self.slot.borrow_mut().take()
    }
}

fn poll_once(task: &mut SmTask) -> Poll<Result<(), SmError>> {
    let mut cx = Context::from_waker(noop_waker_ref());
    task.as_mut().poll(&mut cx)
}

/// Suspends the current task until the next frame.
pub fn yield_frame() -> YieldFrame {
    YieldFrame { yielded: false }
}

pub struct YieldFrame {
    yielded: bool,
}

impl Future for YieldFrame {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
