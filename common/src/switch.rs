use crate::types::Gesture;

/// Press/release classifier for one physical push button.
///
/// Released and Pressed are the only states; the press timestamp is the
/// only memory. Gestures are reported on release.
#[derive(Debug, Clone)]
pub struct DebouncedSwitch {
    long_press_ms: u64,
    pressed_since_ms: Option<u64>,
}

impl DebouncedSwitch {
    pub fn new(long_press_ms: u64) -> Self {
        Self {
            long_press_ms,
            pressed_since_ms: None,
        }
    }

    #[cfg(test)]
    fn is_pressed(&self) -> bool {
        self.pressed_since_ms.is_some()
    }

    /// `closed` is the raw contact level for this tick.
    pub fn poll(&mut self, closed: bool, now_ms: u64) -> Gesture {
        match (self.pressed_since_ms, closed) {
            (None, true) => {
                self.pressed_since_ms = Some(now_ms);
                Gesture::None
            }
            (Some(since), false) => {
                self.pressed_since_ms = None;
                if now_ms.saturating_sub(since) > self.long_press_ms {
                    Gesture::Long
                } else {
                    Gesture::Short
                }
            }
            _ => Gesture::None,
        }
    }
}
