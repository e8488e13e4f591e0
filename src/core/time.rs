//! Fixed-interval scheduling for the server step

/// Fires once per `wanted_interval` of accumulated time
#[derive(Clone, Copy, Debug, Default)]
pub struct IntervalLimiter {
    accumulator: f32,
}

impl IntervalLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `dtime` and report whether a full interval has passed. The
    /// remainder carries over, so a long frame fires at most once.
    pub fn step(&mut self, dtime: f32, wanted_interval: f32) -> bool {
        self.accumulator += dtime;
        if self.accumulator < wanted_interval {
            return false;
        }
        self.accumulator -= wanted_interval;
        true
    }
}

/// Game clock split into whole seconds and a fractional carry
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GameClock {
    pub seconds: u32,
    fraction: f32,
}

impl GameClock {
    pub fn new(seconds: u32) -> Self {
        Self { seconds, fraction: 0.0 }
    }

    /// Advance by `dtime` seconds
    pub fn step(&mut self, dtime: f32) {
        self.fraction += dtime;
        let whole = self.fraction as u32;
        self.seconds = self.seconds.wrapping_add(whole);
        self.fraction -= whole as f32;
    }
}

/// Time of day in 0..24000 units, plus the smooth fraction of the day
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeOfDay {
    pub units: u32,
    /// Day fraction in 0..1, synced to `units` on day rollover
    pub fraction: f32,
    /// Game minutes per real minute
    pub speed: f32,
    pub day_count: u32,
    skew: f32,
}

impl TimeOfDay {
    pub fn new(units: u32, speed: f32, day_count: u32) -> Self {
        let units = units % 24000;
        Self { units, fraction: units as f32 / 24000.0, speed, day_count, skew: 0.0 }
    }

    pub fn set(&mut self, units: u32) {
        self.units = units % 24000;
        self.fraction = self.units as f32 / 24000.0;
        self.skew = 0.0;
    }

    pub fn step(&mut self, dtime: f32) {
        let speed = self.speed * 24000.0 / (24.0 * 3600.0);
        self.skew += dtime;
        let units = (self.skew * speed).max(0.0) as u32;
        let mut synced = false;
        if units > 0 {
            if self.units + units >= 24000 {
                synced = true;
                self.day_count += 1;
            }
            self.units = (self.units + units) % 24000;
            if synced {
                self.fraction = self.units as f32 / 24000.0;
            }
        }
        if speed > 0.0 {
            self.skew -= units as f32 / speed;
        }
        if !synced {
            self.fraction += self.speed / 24.0 / 3600.0 * dtime;
            if self.fraction > 1.0 {
                self.fraction -= 1.0;
            }
            if self.fraction < 0.0 {
                self.fraction += 1.0;
            }
        }
    }
}
