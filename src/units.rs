/// Converts a temperature in Celsius and a relative humidity percentage into
/// absolute humidity, in grams/m^3.
pub fn absolute_humidity(temp_c: f32, rel_humidity_percent: f32) -> f32 {
    // saturation vapor pressure (hPa) at `temp_c`, from the Magnus-Tetens
    // approximation:
    // https://doi.org/10.1175/1520-0493(1980)108%3C1046:TCOEPT%3E2.0.CO;2
    let p_sat = 6.112 * ((17.64 * temp_c) / (temp_c + 243.5)).exp();
    // scale to the actual vapor pressure and apply the ideal gas law with the
    // molar mass of water folded into the constant:
    // https://carnotcycle.wordpress.com/2012/08/04/how-to-convert-relative-humidity-to-absolute-humidity/
    (p_sat * rel_humidity_percent * 2.1674) / (273.15 + temp_c)
}

/// Relative humidity as the 16-bit tick value Sensirion sensors expect for
/// compensation.
pub fn humidity_ticks(rel_humidity_percent: f32) -> u16 {
    (rel_humidity_percent.clamp(0.0, 100.0) * 65535.0 / 100.0) as u16
}

/// Temperature as the 16-bit tick value Sensirion sensors expect for
/// compensation (-45 to 130 degrees Celsius).
pub fn temperature_ticks(temp_c: f32) -> u16 {
    ((temp_c.clamp(-45.0, 130.0) + 45.0) * 65535.0 / 175.0) as u16
}

/// Inverse of [`temperature_ticks`].
pub fn ticks_to_celsius(ticks: u16) -> f32 {
    -45.0 + 175.0 * ticks as f32 / 65535.0
}

/// Inverse of [`humidity_ticks`].
pub fn ticks_to_humidity(ticks: u16) -> f32 {
    100.0 * ticks as f32 / 65535.0
}

#[cfg(test)]
mod tests {
    const TEST_EPSILON: f32 = 0.5; // the formula is an approximation
    use super::*;
    macro_rules! assert_float_eq {
        ($a:expr, $b:expr) => {
            let a = dbg!($a);
            let b = $b;
            assert!((a - b).abs() < TEST_EPSILON, "{a} != {b} (~{TEST_EPSILON})")
        };
    }

    // reference values:
    // https://en.wikipedia.org/wiki/Humidity#Relationship_between_absolute-,_relative-humidity,_and_temperature
    #[test]
    fn absolute_humidity_50_c() {
        assert_float_eq!(absolute_humidity(50.0, 0.0), 0.0);
        assert_float_eq!(absolute_humidity(50.0, 10.0), 8.3);
        assert_float_eq!(absolute_humidity(50.0, 20.0), 16.7);
        assert_float_eq!(absolute_humidity(50.0, 30.0), 24.9);
    }

    #[test]
    fn absolute_humidity_room_temp() {
        assert_float_eq!(absolute_humidity(25.0, 50.0), 11.5);
        assert_float_eq!(absolute_humidity(20.0, 100.0), 17.3);
    }

    #[test]
    fn sensirion_ticks() {
        // defaults from the SGP41 datasheet: 50 %RH, 25 degrees
        assert_eq!(humidity_ticks(50.0), 0x7FFF);
        assert_eq!(temperature_ticks(25.0), 0x6666);
        assert_eq!(humidity_ticks(150.0), 0xFFFF);
        assert_eq!(temperature_ticks(-100.0), 0);
        assert_float_eq!(ticks_to_celsius(0x6666), 25.0);
        assert_float_eq!(ticks_to_humidity(0x8000), 50.0);
    }
}
