/// Mulberry32 step. The state is advanced in place.
pub fn next_random_u32(state: &mut u32) -> u32 {
    let mut next = state.wrapping_add(0x6d2b79f5);
    *state = next;
    next = (next ^ (next >> 15)).wrapping_mul(next | 1);
    next ^= next.wrapping_add((next ^ (next >> 7)).wrapping_mul(next | 61));
    next ^ (next >> 14)
}

pub fn next_random_bounded(state: &mut u32, bound: u32) -> u32 {
    next_random_bounded_with(state, bound, next_random_u32)
}

pub fn next_random_bounded_with<F>(state: &mut u32, bound: u32, mut next: F) -> u32
where
    F: FnMut(&mut u32) -> u32,
{
    let threshold = (u64::from(u32::MAX) + 1) / u64::from(bound) * u64::from(bound);
    let mut candidate = next(state);
    while u64::from(candidate) >= threshold {
        candidate = next(state);
    }
    candidate % bound
}

/// Uniform float in `[0, 1)`.
pub fn next_random_unit(state: &mut u32) -> f64 {
    f64::from(next_random_u32(state)) / (f64::from(u32::MAX) + 1.0)
}

/// Uniform float in `[low, high)`.
pub fn next_random_range(state: &mut u32, low: f64, high: f64) -> f64 {
    low + (high - low) * next_random_unit(state)
}

/// Mixes a target's seed identity into a base seed.
pub fn seed_for(base: u32, seed_id: u32) -> u32 {
    let mut state = base ^ seed_id.rotate_left(16);
    next_random_u32(&mut state)
}

#[cfg(test)]
mod rng_tests {
    use super::*;

    #[test]
    fn next_random_bounded_with_covers_threshold_retry_path() {
        let mut state = 0u32;
        let mut values = vec![u32::MAX, 42u32].into_iter();
        let result = next_random_bounded_with(&mut state, 10, |_s| {
            values.next().expect("test values should be available")
        });
        assert_eq!(result, 2);
    }

    #[test]
    fn range_stays_within_bounds_and_is_deterministic() {
        let mut first = 7u32;
        let mut second = 7u32;
        for _ in 0..64 {
            let value = next_random_range(&mut first, -2.0, 3.0);
            assert!((-2.0..3.0).contains(&value));
            assert_eq!(value, next_random_range(&mut second, -2.0, 3.0));
        }
    }
}
