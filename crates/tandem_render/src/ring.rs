//! In-flight frame ring

/// Frames the CPU may record ahead of the GPU
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Cycles through `len` per-frame resource slots
#[derive(Debug, Clone)]
pub struct FrameRing {
    len: usize,
    current: usize,
    frames: u64,
}

impl FrameRing {
    /// `len` is clamped to at least one slot
    pub fn new(len: usize) -> Self {
        Self {
            len: len.max(1),
            current: 0,
            frames: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Frames completed (slot advances) so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.len;
        self.frames += 1;
        self.current
    }

    /// Slot used by the previously advanced frame
    pub fn previous(&self) -> usize {
        (self.current + self.len - 1) % self.len
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMES_IN_FLIGHT)
    }
}
