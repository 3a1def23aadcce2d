use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use dmk_core::SmError;

use crate::scheduler::SmTask;

/// Awaits every task. A fault ends the join after the pass that raised it, so
/// every sibling still gets its poll in that pass. The remaining tasks are then
/// dropped. A cancellation is only reported after all tasks have finished.
pub fn join_all(tasks: Vec<SmTask>) -> JoinAll {
    JoinAll {
        tasks: tasks.into_iter().map(Some).collect(),
        cancelled: None,
    }
}

pub struct JoinAll {
    tasks: Vec<Option<SmTask>>,
    cancelled: Option<SmError>,
}

impl Future for JoinAll {
    type Output = Result<(), SmError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut fault = None;
        for slot in this.tasks.iter_mut() {
            let Some(task) = slot else {
                continue;
            };
            if let Poll::Ready(result) = task.as_mut().poll(cx) {
                *slot = None;
                match result {
                    Ok(()) => {}
                    Err(error) if error.is_cancellation() => {
                        this.cancelled.get_or_insert(error);
                    }
                    Err(error) => {
                        fault.get_or_insert(error);
                    }
                }
            }
        }
        if let Some(error) = fault {
            this.tasks.clear();
            return Poll::Ready(Err(error));
        }
        if this.tasks.iter().all(Option::is_none) {
            Poll::Ready(match this.cancelled.take() {
                Some(error) => Err(error),
                None => Ok(()),
            })
        } else {
            Poll::Pending
        }
    }
}
