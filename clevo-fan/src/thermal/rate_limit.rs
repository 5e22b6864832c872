/// Small decreases are held back until they have been requested on this
/// many consecutive cycles before the one that applies them.
const DECREASE_CONFIRMATIONS: u32 = 4;

/// Decreases larger than this apply immediately.
const LARGE_DROP: i32 = 5;

/// Increases larger than this apply immediately.
const SMALL_RISE: i32 = 1;

/// Any increase to a target above this applies immediately.
const FAST_RISE_ABOVE: i32 = 50;

/// Debounces duty changes for one fan.
///
/// Increases are applied eagerly; small decreases only once they persist,
/// so the fan doesn't hunt around a temperature that sits on a curve step.
#[derive(Debug, Default)]
pub struct RateLimiter {
    pending_decreases: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `target` should replace `current`.
    pub fn should_apply(&mut self, current: u8, target: u8) -> bool {
        let (current, target) = (current as i32, target as i32);

        let apply = if current == 0 && target != 0 {
            true
        } else if target > current {
            target > FAST_RISE_ABOVE || target > current + SMALL_RISE
        } else if target < current - LARGE_DROP {
            true
        } else if target < current {
            if self.pending_decreases >= DECREASE_CONFIRMATIONS {
                true
            } else {
                self.pending_decreases += 1;
                return false;
            }
        } else {
            false
        };

        self.pending_decreases = 0;
        apply
    }

    pub fn reset(&mut self) {
        self.pending_decreases = 0;
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, 15 => true; "start from stopped")]
    #[test_case(40, 55 => true; "rise across fifty")]
    #[test_case(50, 51 => true; "single step above fifty")]
    #[test_case(30, 32 => true; "rise by two")]
    #[test_case(30, 31 => false; "rise by one below fifty")]
    #[test_case(40, 40 => false; "unchanged")]
    #[test_case(40, 34 => true; "drop by six")]
    #[test_case(40, 35 => false; "drop by five waits")]
    #[test_case(0, 0 => false; "stopped stays stopped")]
    fn first_cycle(current: u8, target: u8) -> bool {
        RateLimiter::new().should_apply(current, target)
    }

    #[test]
    fn should_apply_small_decrease_on_fifth_consecutive_request() {
        let mut limiter = RateLimiter::new();

        for _ in 0..4 {
            assert!(!limiter.should_apply(40, 37));
        }

        assert!(limiter.should_apply(40, 37));
    }

    #[test]
    fn should_restart_confirmation_when_decrease_is_interrupted() {
        let mut limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.should_apply(40, 37);
        }

        limiter.should_apply(40, 40);

        for _ in 0..4 {
            assert!(!limiter.should_apply(40, 37));
        }
        assert!(limiter.should_apply(40, 37));
    }

    #[test]
    fn should_forget_pending_decrease_on_reset() {
        let mut limiter = RateLimiter::new();
        for _ in 0..4 {
            limiter.should_apply(40, 37);
        }

        limiter.reset();

        assert!(!limiter.should_apply(40, 37));
    }
}
