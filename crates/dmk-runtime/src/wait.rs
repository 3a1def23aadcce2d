use dmk_core::SmError;
use futures::FutureExt;

use crate::cancel::CancelToken;
use crate::scheduler::{yield_frame, Scheduler};

pub const ENGINE_FPS: f64 = 120.0;
pub const FRAME_TIME: f64 = 1.0 / ENGINE_FPS;
/// Remaining time at or below this is treated as elapsed.
pub const FRAME_YIELD: f64 = FRAME_TIME * 0.1;

fn effective_time(seconds: f64, zero_to_infinity: bool) -> f64 {
    if zero_to_infinity && seconds < f64::EPSILON {
        f64::MAX
    } else {
        seconds
    }
}

/// Frame loop shared by every time-based wait. Stops early on cancellation.
async fn frames_for(mut seconds: f64, ct: &CancelToken) {
    while seconds > FRAME_YIELD && !ct.is_cancelled() {
        yield_frame().await;
        seconds -= FRAME_TIME;
    }
}

/// Waits `seconds` and throws if the token was cancelled before or during the wait.
pub async fn wait_for(ct: CancelToken, seconds: f64, zero_to_infinity: bool) -> Result<(), SmError> {
    ct.throw_if_cancelled()?;
    let seconds = effective_time(seconds, zero_to_infinity);
    if seconds < f64::EPSILON {
        return Ok(());
    }
    frames_for(seconds, &ct).await;
    ct.throw_if_cancelled()
}

/// Waits `seconds` or until cancellation. Callers must check the token afterwards.
pub async fn wait_for_unchecked(
    ct: CancelToken,
    seconds: f64,
    zero_to_infinity: bool,
) -> Result<(), SmError> {
    ct.throw_if_cancelled()?;
    let seconds = effective_time(seconds, zero_to_infinity);
    if seconds < f64::EPSILON {
        return Ok(());
    }
    frames_for(seconds, &ct).await;
    Ok(())
}

/// Waits until `condition` holds or the token is cancelled.
pub async fn wait_until<F>(ct: CancelToken, mut condition: F) -> Result<(), SmError>
where
    F: FnMut() -> bool,
{
    ct.throw_if_cancelled()?;
    while !condition() && !ct.is_cancelled() {
        yield_frame().await;
    }
    Ok(())
}

/// Runs `cb` on `scheduler` after `seconds`, unless the token is cancelled first.
pub fn wait_then_cb<F>(
    scheduler: &Scheduler,
    ct: CancelToken,
    seconds: f64,
    zero_to_infinity: bool,
    cb: F,
) -> Result<(), SmError>
where
    F: FnOnce() + 'static,
{
    ct.throw_if_cancelled()?;
    let seconds = effective_time(seconds, zero_to_infinity);
    scheduler.spawn(
        async move {
            frames_for(seconds, &ct).await;
            if !ct.is_cancelled() {
                cb();
            }
            Ok(())
        }
        .boxed_local(),
    );
    Ok(())
}

/// Cancels `to_cancel` after `seconds`, unless `ct` is cancelled first.
pub fn wait_then_cancel(
    scheduler: &Scheduler,
    ct: CancelToken,
    seconds: f64,
    zero_to_infinity: bool,
    to_cancel: CancelToken,
) -> Result<(), SmError> {
    wait_then_cb(scheduler, ct, seconds, zero_to_infinity, move || to_cancel.cancel())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn wait_for_takes_one_frame_per_frame_time() {
        let scheduler = Scheduler::new();
        let ct = CancelToken::new();
        let handle = scheduler.spawn_tracked(wait_for(ct, FRAME_TIME * 3.0, false).boxed_local());
        scheduler.step();
        scheduler.step();
        assert!(!handle.is_done());
        scheduler.step();
        let result = handle.take_result().expect("wait should finish after three frames");
        assert!(result.is_ok());
    }

    #[test]
    fn checked_wait_throws_when_cancelled_midway_but_unchecked_does_not() {
        let scheduler = Scheduler::new();
        let ct = CancelToken::new();
        let checked = scheduler.spawn_tracked(wait_for(ct.clone(), 10.0, false).boxed_local());
        let unchecked =
            scheduler.spawn_tracked(wait_for_unchecked(ct.clone(), 0.0, true).boxed_local());
        scheduler.step();
        ct.cancel();
        scheduler.step();
        let checked = checked.take_result().expect("checked wait should end");
        assert!(checked.expect_err("checked wait should throw").is_cancellation());
        let unchecked = unchecked.take_result().expect("unchecked wait should end");
        assert!(unchecked.is_ok());
    }

    #[test]
    fn zero_wait_returns_without_yielding() {
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn_tracked(wait_for(CancelToken::new(), 0.0, false).boxed_local());
        assert!(handle.is_done());
    }

    #[test]
    fn wait_then_cb_skips_callback_after_cancellation() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(Cell::new(0));
        let ct = CancelToken::new();
        let first = Rc::clone(&fired);
        wait_then_cb(&scheduler, ct.clone(), FRAME_TIME, false, move || first.set(first.get() + 1))
            .expect("token should be live");
        let other = CancelToken::new();
        let second = Rc::clone(&fired);
        wait_then_cb(&scheduler, other.clone(), FRAME_TIME * 2.0, false, move || {
            second.set(second.get() + 10)
        })
        .expect("token should be live");
        other.cancel();
        scheduler.step();
        scheduler.step();
        assert_eq!(fired.get(), 1);

        let target = CancelToken::new();
        wait_then_cancel(&scheduler, ct, 0.0, false, target.clone()).expect("token should be live");
        assert!(target.is_cancelled());
    }
}
