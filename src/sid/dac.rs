//! R-2R ladder DAC model
//!
//! The SID's DACs are R-2R ladders whose 2R legs are slightly too small on the
//! 6581, so each bit weighs a little less than twice the one below it. The
//! 8580 ladders are linear.

/// Convert a digital value to its analog level through an imperfect R-2R ladder
///
/// `nonlinearity` is 1.0 for a perfect ladder, in which case the result equals
/// `input`. `max_bit` is the number of bits in the ladder.
pub fn kinked_dac(input: u32, nonlinearity: f32, max_bit: u32) -> f32 {
    let mut value = 0.0f32;
    let mut weight = 1.0f32;
    let dir = 2.0 * nonlinearity;
    for bit in 0..max_bit {
        if input & (1 << bit) != 0 {
            value += weight;
        }
        weight *= dir;
    }
    value / (weight / nonlinearity / nonlinearity) * (1u32 << max_bit) as f32
}

/// Lookup table of all values of an `N`-entry DAC
pub fn dac_table(entries: usize, nonlinearity: f32, max_bit: u32) -> Vec<f32> {
    (0..entries as u32)
        .map(|i| kinked_dac(i, nonlinearity, max_bit))
        .collect()
}
