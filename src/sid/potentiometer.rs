//! Paddle inputs (POTX/POTY)

/// One paddle line
///
/// Without a paddle connected the sampling capacitor never charges within the
/// measuring window and the register reads 0xFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Potentiometer {
    value: u8,
}

impl Default for Potentiometer {
    fn default() -> Self {
        Potentiometer { value: 0xFF }
    }
}

impl Potentiometer {
    /// Set the paddle position
    pub fn set(&mut self, value: u8) {
        self.value = value;
    }

    /// Register readback
    #[inline]
    pub fn read(&self) -> u8 {
        self.value
    }
}
