use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Default,
    /// Go to the override phase once, then continue from there.
    ExternalOverrideContinue,
    /// Go to the override phase once the current one ends, then return via the callback.
    ExternalOverride,
    /// Same as `ExternalOverride`, but also when the next phase would be the first.
    ExternalOverrideSkip,
    WaitingOverrideReturn,
}

/// Decides which phase of a pattern runs next.
///
/// External callers can redirect the pattern to a specific phase. After an
/// override phase ends the optional ending callback runs and the pattern
/// stops by returning `-1`.
pub struct PhaseController {
    state: ControllerState,
    external_override: i64,
    normal_next_phase: i64,
    callback: Option<Box<dyn FnOnce()>>,
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            state: ControllerState::Default,
            external_override: 0,
            normal_next_phase: 0,
            callback: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Forces the next phase. With `force_zero` the override also applies when the pattern is just starting.
    pub fn override_phase(&mut self, go_to: i64, callback: Option<Box<dyn FnOnce()>>, force_zero: bool) {
        self.state = if force_zero {
            ControllerState::ExternalOverrideSkip
        } else {
            ControllerState::ExternalOverride
        };
        self.external_override = go_to;
        self.callback = callback;
    }

    /// Applies an override, keeping the current callback, only when no other override is pending.
    pub fn low_priority_override(&mut self, go_to: i64, force_zero: bool) {
        if self.state == ControllerState::Default {
            let callback = self.callback.take();
            self.override_phase(go_to, callback, force_zero);
        }
    }

    /// Jumps to `go_to` and continues normally afterwards.
    pub fn set_go_to(&mut self, go_to: i64, callback: Option<Box<dyn FnOnce()>>) {
        self.state = ControllerState::ExternalOverrideContinue;
        self.external_override = go_to;
        self.callback = callback;
    }

    pub fn set_callback(&mut self, callback: Box<dyn FnOnce()>) {
        self.callback = Some(callback);
    }

    pub fn set_desired_next(&mut self, next: i64) {
        self.normal_next_phase = next;
    }

    /// Runs and clears the ending callback. Always returns `-1`.
    pub fn run_ending_callback(&mut self) -> i64 {
        if let Some(callback) = self.callback.take() {
            callback();
        }
        -1
    }

    /// Determines the next phase and advances the controller state.
    /// `requested` is the phase the pattern would move to without overrides.
    pub fn go_to_next_phase(&mut self, requested: Option<i64>) -> i64 {
        if let Some(next) = requested {
            self.normal_next_phase = next;
        }
        let normal = self.normal_next_phase;
        match self.state {
            ControllerState::ExternalOverrideSkip => {
                self.state = ControllerState::WaitingOverrideReturn;
                self.external_override
            }
            ControllerState::ExternalOverride if normal > 0 => {
                self.state = ControllerState::WaitingOverrideReturn;
                self.external_override
            }
            ControllerState::ExternalOverrideContinue if normal > 0 => {
                self.state = ControllerState::Default;
                self.external_override
            }
            ControllerState::WaitingOverrideReturn => {
                self.state = ControllerState::Default;
                if self.callback.is_some() {
                    self.run_ending_callback()
                } else {
                    normal
                }
            }
            _ => normal,
        }
    }

    /// What [`PhaseController::go_to_next_phase`] would return, without changing state.
    pub fn scan_next_phase(&self, requested: i64) -> i64 {
        match self.state {
            ControllerState::ExternalOverrideSkip => self.external_override,
            ControllerState::ExternalOverride | ControllerState::ExternalOverrideContinue
                if requested > 0 =>
            {
                self.external_override
            }
            ControllerState::WaitingOverrideReturn if self.callback.is_some() => -1,
            _ => requested,
        }
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseController")
            .field("state", &self.state)
            .field("external_override", &self.external_override)
            .field("normal_next_phase", &self.normal_next_phase)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn default_controller_follows_requests() {
        let mut controller = PhaseController::new();
        assert_eq!(controller.go_to_next_phase(None), 0);
        assert_eq!(controller.go_to_next_phase(Some(1)), 1);
        assert_eq!(controller.scan_next_phase(2), 2);
    }

    #[test]
    fn override_runs_target_phase_then_ending_callback() {
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let mut controller = PhaseController::new();
        controller.override_phase(3, Some(Box::new(move || flag.set(true))), false);
        // The first phase still runs when the override is not forced.
        assert_eq!(controller.go_to_next_phase(None), 0);
        assert_eq!(controller.scan_next_phase(1), 3);
        assert_eq!(controller.go_to_next_phase(Some(1)), 3);
        assert_eq!(controller.state(), ControllerState::WaitingOverrideReturn);
        assert_eq!(controller.scan_next_phase(4), -1);
        assert_eq!(controller.go_to_next_phase(Some(4)), -1);
        assert!(fired.get());
        assert_eq!(controller.state(), ControllerState::Default);
    }

    #[test]
    fn forced_override_applies_to_the_first_phase() {
        let mut controller = PhaseController::new();
        controller.override_phase(2, None, true);
        assert_eq!(controller.go_to_next_phase(None), 2);
        // No callback: resume the normal order.
        assert_eq!(controller.go_to_next_phase(Some(3)), 3);
    }

    #[test]
    fn go_to_continues_from_the_target() {
        let mut controller = PhaseController::new();
        controller.set_go_to(5, None);
        assert_eq!(controller.go_to_next_phase(Some(1)), 5);
        assert_eq!(controller.go_to_next_phase(Some(6)), 6);
    }

    #[test]
    fn low_priority_override_yields_to_pending_override() {
        let mut controller = PhaseController::new();
        controller.set_go_to(4, None);
        controller.low_priority_override(7, true);
        assert_eq!(controller.state(), ControllerState::ExternalOverrideContinue);
        controller.go_to_next_phase(Some(1));
        controller.low_priority_override(7, true);
        assert_eq!(controller.state(), ControllerState::ExternalOverrideSkip);
    }
}
