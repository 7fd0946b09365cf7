//! Smoothing for noisy sensor channels: a fixed-window median followed by an
//! exponential moving average.
use heapless::Deque;

/// Median of the last `N` samples.
#[derive(Clone, Debug)]
pub struct MedianFilter<const N: usize> {
    window: Deque<f32, N>,
    cached: Option<f32>,
}

/// Exponential moving average, seeded by the first sample.
#[derive(Copy, Clone, Debug)]
pub struct ExpAverage {
    alpha: f32,
    value: Option<f32>,
}

/// Median filter feeding an exponential average.
#[derive(Clone, Debug)]
pub struct SensorFilter<const N: usize> {
    median: MedianFilter<N>,
    average: ExpAverage,
}

// === impl MedianFilter ===

impl<const N: usize> MedianFilter<N> {
    pub const fn new() -> Self {
        Self {
            window: Deque::new(),
            cached: None,
        }
    }

    /// Adds a sample, evicting the oldest one if the window is full.
    pub fn insert(&mut self, sample: f32) {
        if self.window.is_full() {
            self.window.pop_front();
        }
        // there is room now unless N == 0, in which case there is nothing to keep
        let _ = self.window.push_back(sample);
        self.cached = None;
    }

    pub fn median(&mut self) -> Option<f32> {
        if let Some(median) = self.cached {
            return Some(median);
        }

        if self.window.is_empty() {
            return None;
        }

        let mut snapshot: heapless::Vec<f32, N> = self.window.iter().copied().collect();
        snapshot.sort_unstable_by(f32::total_cmp);
        let mid = snapshot.len() / 2;
        let median = if snapshot.len() % 2 == 0 {
            (snapshot[mid - 1] + snapshot[mid]) / 2.0
        } else {
            snapshot[mid]
        };
        self.cached = Some(median);
        Some(median)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Samples currently in the window, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.window.iter().copied()
    }
}

impl<const N: usize> Default for MedianFilter<N> {
    fn default() -> Self {
        Self::new()
    }
}

// === impl ExpAverage ===

impl ExpAverage {
    pub fn new(alpha: f32) -> Self {
        debug_assert!(alpha > 0.0 && alpha <= 1.0, "alpha must be in (0, 1]");
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f32) -> f32 {
        let value = match self.value {
            None => sample,
            Some(avg) => self.alpha * sample + (1.0 - self.alpha) * avg,
        };
        self.value = Some(value);
        value
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }
}

// === impl SensorFilter ===

impl<const N: usize> SensorFilter<N> {
    pub fn new(alpha: f32) -> Self {
        Self {
            median: MedianFilter::new(),
            average: ExpAverage::new(alpha),
        }
    }

    /// Feeds a raw sample through both stages. `None` means the channel has
    /// no stable value yet and should not be published.
    pub fn update(&mut self, sample: f32) -> Option<f32> {
        self.median.insert(sample);
        let median = self.median.median()?;
        Some(self.average.update(median))
    }

    pub fn value(&self) -> Option<f32> {
        self.average.value()
    }
}
