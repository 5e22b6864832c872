//! Temperature to duty curve of the dual-sensor controller.

/// Duty in percent for a driving temperature.
///
/// ```text
///   t <= 40       0
///   t <= 45      15
///   t <= 75      t - 30
///   t <= 90      45 + 3 * (t - 75)
///   above       100
/// ```
///
/// Segment bounds compare the unrounded temperature; only the computed
/// duty is truncated.
pub fn duty_for_temperature(temp: f32) -> i32 {
    if temp <= 40.0 {
        0
    } else if temp <= 45.0 {
        15
    } else if temp <= 75.0 {
        (temp - 30.0) as i32
    } else if temp <= 90.0 {
        ((temp - 75.0) * 3.0 + 45.0) as i32
    } else {
        100
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(20.0 => 0)]
    #[test_case(40.0 => 0)]
    #[test_case(43.0 => 15)]
    #[test_case(45.0 => 15)]
    #[test_case(46.0 => 16)]
    #[test_case(60.0 => 30)]
    #[test_case(75.0 => 45)]
    #[test_case(80.0 => 60)]
    #[test_case(90.0 => 90)]
    #[test_case(91.0 => 100)]
    fn curve_points(temp: f32) -> i32 {
        duty_for_temperature(temp)
    }

    #[test_case(40.33 => 15; "just above 40 leaves idle")]
    #[test_case(45.5 => 15; "just above 45 truncates duty")]
    #[test_case(60.9 => 30; "truncates linear duty")]
    #[test_case(75.5 => 46; "just above 75 enters steep segment")]
    #[test_case(80.5 => 61; "steep segment truncates duty")]
    #[test_case(90.5 => 100; "just above 90 is full")]
    fn fractional_temperatures(temp: f32) -> i32 {
        duty_for_temperature(temp)
    }

    #[test]
    fn should_never_decrease_with_temperature() {
        let mut last = duty_for_temperature(0.0);
        for temp in 1..=110 {
            let duty = duty_for_temperature(temp as f32);
            assert!(duty >= last, "curve fell at {temp}");
            last = duty;
        }
    }
}
