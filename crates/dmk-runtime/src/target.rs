use std::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::gcx::V2;
use crate::phase_controller::PhaseController;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vulnerability {
    Vulnerable,
    NoDamage,
    PassThrough,
}

/// Health bookkeeping for targets that can be defeated.
#[derive(Debug)]
pub struct EnemyState {
    hp: Cell<f64>,
    max_hp: Cell<f64>,
    photo_hp: Cell<i64>,
    max_photo_hp: Cell<i64>,
    hp_bar: Cell<f64>,
    vulnerability: Cell<Vulnerability>,
}

impl EnemyState {
    pub fn new(hp: f64) -> Self {
        Self {
            hp: Cell::new(hp),
            max_hp: Cell::new(hp),
            photo_hp: Cell::new(0),
            max_photo_hp: Cell::new(0),
            hp_bar: Cell::new(1.0),
            vulnerability: Cell::new(Vulnerability::Vulnerable),
        }
    }

    pub fn hp(&self) -> f64 {
        self.hp.get()
    }

    pub fn max_hp(&self) -> f64 {
        self.max_hp.get()
    }

    pub fn set_hp(&self, hp: f64, max_hp: f64) {
        self.hp.set(hp);
        self.max_hp.set(max_hp);
    }

    pub fn photo_hp(&self) -> i64 {
        self.photo_hp.get()
    }

    pub fn set_photo_hp(&self, photo_hp: i64, max_photo_hp: i64) {
        self.photo_hp.set(photo_hp);
        self.max_photo_hp.set(max_photo_hp);
    }

    pub fn hp_bar(&self) -> f64 {
        self.hp_bar.get()
    }

    pub fn set_hp_bar(&self, portion: f64) {
        self.hp_bar.set(portion);
    }

    pub fn vulnerability(&self) -> Vulnerability {
        self.vulnerability.get()
    }

    pub fn set_vulnerability(&self, vulnerability: Vulnerability) {
        self.vulnerability.set(vulnerability);
    }

    /// Returns true if the hit landed.
    fn take_damage(&self, amount: f64) -> bool {
        if self.vulnerability.get() != Vulnerability::Vulnerable {
            return false;
        }
        self.hp.set(self.hp.get() - amount);
        true
    }

    fn take_photo(&self) -> bool {
        if self.vulnerability.get() != Vulnerability::Vulnerable || self.max_photo_hp.get() <= 0 {
            return false;
        }
        self.photo_hp.set(self.photo_hp.get() - 1);
        true
    }
}

/// The entity a state machine runs on.
pub trait ExecutionTarget {
    fn name(&self) -> &str;
    fn global_position(&self) -> V2;
    fn set_global_position(&self, position: V2);
    /// Stable identity mixed into the random seed of contexts created for this target.
    fn seed_id(&self) -> u32;
    /// Per-frame driver for coroutines started on behalf of this target.
    fn updater(&self) -> &Scheduler;
    fn phase_controller(&self) -> &RefCell<PhaseController>;
    fn phase_shifter(&self) -> Option<CancelToken>;
    fn set_phase_shifter(&self, token: Option<CancelToken>);
    fn enemy(&self) -> Option<&EnemyState>;

    fn allow_finish_calls(&self) -> bool {
        true
    }

    /// Ends the running phase, if any. Returns false when no phase can be shifted.
    fn shift_phase(&self) -> bool {
        match self.phase_shifter() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Applies damage, shifting the phase once health runs out.
    fn receive_damage(&self, amount: f64) {
        let Some(enemy) = self.enemy() else {
            return;
        };
        if enemy.take_damage(amount) && enemy.hp() <= 0.0 {
            self.shift_phase();
        }
    }

    fn receive_photo(&self) {
        let Some(enemy) = self.enemy() else {
            return;
        };
        if enemy.take_photo() && enemy.photo_hp() <= 0 {
            self.shift_phase();
        }
    }
}

pub struct Target {
    name: String,
    position: Cell<V2>,
    seed_id: u32,
    scheduler: Scheduler,
    controller: RefCell<PhaseController>,
    shifter: RefCell<Option<CancelToken>>,
    enemy: Option<EnemyState>,
}

impl Target {
    pub fn new(name: impl Into<String>, seed_id: u32, scheduler: Scheduler) -> Self {
        Self {
            name: name.into(),
            position: Cell::new(V2::default()),
            seed_id,
            scheduler,
            controller: RefCell::new(PhaseController::new()),
            shifter: RefCell::new(None),
            enemy: None,
        }
    }

    /// A target that carries health and can be damaged.
    pub fn with_health(name: impl Into<String>, seed_id: u32, scheduler: Scheduler, hp: f64) -> Self {
        Self {
            enemy: Some(EnemyState::new(hp)),
            ..Self::new(name, seed_id, scheduler)
        }
    }

    pub fn at(self, position: V2) -> Self {
        self.position.set(position);
        self
    }
}

impl ExecutionTarget for Target {
    fn name(&self) -> &str {
        &self.name
    }

    fn global_position(&self) -> V2 {
        self.position.get()
    }

    fn set_global_position(&self, position: V2) {
        self.position.set(position);
    }

    fn seed_id(&self) -> u32 {
        self.seed_id
    }

    fn updater(&self) -> &Scheduler {
        &self.scheduler
    }

    fn phase_controller(&self) -> &RefCell<PhaseController> {
        &self.controller
    }

    fn phase_shifter(&self) -> Option<CancelToken> {
        self.shifter.borrow().clone()
    }

    fn set_phase_shifter(&self, token: Option<CancelToken>) {
        *self.shifter.borrow_mut() = token;
    }

    fn enemy(&self) -> Option<&EnemyState> {
        self.enemy.as_ref()
    }
}
