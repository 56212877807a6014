//! Net effective temperature (Missenard form, still air).

/// Perceived temperature in Celsius for dry-bulb `temperature_c` and relative
/// humidity `humidity` given as a fraction in `[0, 1]`.
pub fn effective_temperature(temperature_c: f32, humidity: f32) -> f32 {
    let t = temperature_c;
    let h = humidity;
    37.0 - (37.0 - t) / ((0.68 - 0.14 * h) + 1.0 / 1.76) - 0.29 * t * (1.0 - h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_half_humid_room_is_below_heating_threshold() {
        let value = effective_temperature(10.0, 0.5);

        assert!((value - 12.63).abs() < 0.01, "got {value}");
        assert!(value < 20.0);
    }

    #[test]
    fn body_temperature_is_a_fixed_point_when_saturated() {
        let value = effective_temperature(37.0, 1.0);

        assert!((value - 37.0).abs() < 1e-4);
    }

    #[test]
    fn hot_room_is_above_cooling_threshold() {
        assert!(effective_temperature(33.0, 0.7) > 28.0);
    }
}
