use std::{thread, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to drive indicator bit {bit}: {reason}")]
pub struct OutputError {
    pub bit: usize,
    pub reason: String,
}

/// A row of independent on/off outputs addressed by bit index.
pub trait OutputBank {
    fn width(&self) -> usize;
    fn write_bit(&mut self, bit: usize, level: bool) -> Result<(), OutputError>;
}

/// Encodes a small integer state onto an [`OutputBank`].
#[derive(Debug, Clone, Default)]
pub struct Indicator {
    lit: Option<u32>,
}

/// Level of `bit` during half-cycle `half_cycle` of a blink, or `None` when
/// the bit is not part of `mask` and must be left alone.
pub fn blink_level(pattern: u32, mask: u32, bit: usize, half_cycle: u32) -> Option<bool> {
    if mask & (1 << bit) == 0 {
        return None;
    }
    if pattern & (1 << bit) == 0 {
        return Some(false);
    }
    Some(half_cycle % 2 == 0)
}

impl Indicator {
    pub fn new() -> Self {
        Self { lit: None }
    }

    #[cfg(test)]
    fn current(&self) -> Option<u32> {
        self.lit
    }

    /// Drives output `n` from bit `n` of `bits`. Writes nothing when the
    /// same state is already shown.
    pub fn set_state(&mut self, out: &mut dyn OutputBank, bits: u32) -> Result<(), OutputError> {
        let width = out.width().min(32);
        let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
        let bits = bits & mask;

        if self.lit == Some(bits) {
            return Ok(());
        }

        // Forget what is lit until every write succeeded.
        self.lit = None;
        for bit in 0..width {
            out.write_bit(bit, bits & (1 << bit) != 0)?;
        }
        self.lit = Some(bits);
        Ok(())
    }

    /// Flashes the masked bits `repeats` times. Blocks the caller for
    /// `2 * repeats * interval`.
    pub fn blink(
        &mut self,
        out: &mut dyn OutputBank,
        pattern: u32,
        mask: u32,
        interval: Duration,
        repeats: u32,
    ) -> Result<(), OutputError> {
        self.lit = None;
        let width = out.width().min(32);

        for half_cycle in 0..repeats.saturating_mul(2) {
            for bit in 0..width {
                if let Some(level) = blink_level(pattern, mask, bit, half_cycle) {
                    out.write_bit(bit, level)?;
                }
            }
            thread::sleep(interval);
        }
        Ok(())
    }
}
