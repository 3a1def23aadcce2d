use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::rng::{next_random_bounded, next_random_range};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct V2 {
    pub x: f64,
    pub y: f64,
}

impl V2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, to: V2, t: f64) -> V2 {
        V2::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }
}

/// Rotational placement: a non-rotated offset, a rotated offset and an angle in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rv2 {
    pub nx: f64,
    pub ny: f64,
    pub rx: f64,
    pub ry: f64,
    pub angle: f64,
}

impl Rv2 {
    pub fn new(nx: f64, ny: f64, rx: f64, ry: f64, angle: f64) -> Self {
        Self {
            nx,
            ny,
            rx,
            ry,
            angle,
        }
    }

    /// Position relative to the origin: the rotated offset turned by `angle`, plus the plain offset.
    pub fn resolve(&self) -> V2 {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        V2::new(
            self.nx + cos * self.rx - sin * self.ry,
            self.ny + sin * self.rx + cos * self.ry,
        )
    }
}

impl Add for Rv2 {
    type Output = Rv2;

    fn add(self, other: Rv2) -> Rv2 {
        Rv2::new(
            self.nx + other.nx,
            self.ny + other.ny,
            self.rx + other.rx,
            self.ry + other.ry,
            self.angle + other.angle,
        )
    }
}

impl AddAssign for Rv2 {
    fn add_assign(&mut self, other: Rv2) {
        *self = *self + other;
    }
}

/// Generation context: loop indices, placement and script variables for one execution branch.
///
/// Every derived branch receives its own copy, so advancing the RNG or mutating
/// variables in one branch is never observed by a sibling.
#[derive(Debug, Clone, PartialEq)]
pub struct GenCtx {
    /// Iteration of the innermost repeater.
    pub i: i64,
    /// Iteration of the enclosing repeater.
    pub pi: i64,
    /// Firing index seen by children.
    pub index: i64,
    pub rv2: Rv2,
    pub vars: BTreeMap<String, f64>,
    pub summon_time: f64,
    rng_state: u32,
}

impl GenCtx {
    pub fn new(seed: u32) -> Self {
        Self {
            i: 0,
            pi: 0,
            index: 0,
            rv2: Rv2::default(),
            vars: BTreeMap::new(),
            summon_time: 0.0,
            rng_state: seed,
        }
    }

    pub fn rng_state(&self) -> u32 {
        self.rng_state
    }

    pub fn set_rng_state(&mut self, state: u32) {
        self.rng_state = state;
    }

    pub fn rand(&mut self, low: f64, high: f64) -> f64 {
        next_random_range(&mut self.rng_state, low, high)
    }

    /// Integer in `[low, high)`. An empty range yields `low`.
    pub fn rand_int(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        let span = u32::try_from(high - low).unwrap_or(u32::MAX);
        low + i64::from(next_random_bounded(&mut self.rng_state, span))
    }

    pub fn var(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied()
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), value);
    }
}

impl Default for GenCtx {
    fn default() -> Self {
        Self::new(0)
    }
}
