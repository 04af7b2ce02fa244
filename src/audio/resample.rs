//! Streaming linear rate conversion
//!
//! Used inside the real-time callbacks when a device runs at a rate other than
//! the 48 kHz network profile. Holds two samples of state, never allocates.

/// Linear interpolator from `from_rate` to `to_rate`
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Fractional position between `prev` and `cur`
    pos: f64,
    prev: i16,
    cur: i16,
    passthrough: bool,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            pos: 0.0,
            prev: 0,
            cur: 0,
            passthrough: from_rate == to_rate,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    #[inline]
    fn lerp(&self) -> i16 {
        let a = self.prev as f64;
        let b = self.cur as f64;
        (a + (b - a) * self.pos).round() as i16
    }

    /// Feed one input sample, emitting zero or more output samples.
    ///
    /// For the capture side, where the device pushes samples at its own rate.
    #[inline]
    pub fn push(&mut self, sample: i16, mut emit: impl FnMut(i16)) {
        if self.passthrough {
            emit(sample);
            return;
        }
        self.prev = self.cur;
        self.cur = sample;
        while self.pos < 1.0 {
            emit(self.lerp());
            self.pos += self.step;
        }
        self.pos -= 1.0;
    }

    /// Produce one output sample, pulling input samples as needed.
    ///
    /// For the playback side, where the device asks for samples at its own rate.
    #[inline]
    pub fn pull(&mut self, mut next: impl FnMut() -> i16) -> i16 {
        if self.passthrough {
            return next();
        }
        while self.pos >= 1.0 {
            self.prev = self.cur;
            self.cur = next();
            self.pos -= 1.0;
        }
        let out = self.lerp();
        self.pos += self.step;
        out
    }
}
