//! Sensirion's gas index algorithm, turning raw SGP4x ticks into a bounded
//! `[1, 500]` index relative to the sensor's learned baseline.
//!
//! Each gas channel needs its own [`GasIndex`]; the VOC and NOx variants use
//! different tuning and must never share state.
//!
//! See <https://github.com/Sensirion/gas-index-algorithm>.

/// Seconds of uptime during which input is ignored.
pub const INITIAL_BLACKOUT: f32 = 45.0;

const INDEX_GAIN: f32 = 230.0;
const SRAW_STD_INITIAL: f32 = 50.0;
const SRAW_STD_BONUS_VOC: f32 = 220.0;
const SRAW_STD_NOX: f32 = 2000.0;
const TAU_MEAN_HOURS: f32 = 12.0;
const TAU_VARIANCE_HOURS: f32 = 12.0;
const TAU_INITIAL_MEAN_VOC: f32 = 20.0;
const TAU_INITIAL_MEAN_NOX: f32 = 1200.0;
const INIT_DURATION_MEAN_VOC: f32 = 3600.0 * 0.75;
const INIT_DURATION_MEAN_NOX: f32 = 3600.0 * 4.75;
const INIT_TRANSITION_MEAN: f32 = 0.01;
const TAU_INITIAL_VARIANCE: f32 = 2500.0;
const INIT_DURATION_VARIANCE_VOC: f32 = 3600.0 * 1.45;
const INIT_DURATION_VARIANCE_NOX: f32 = 3600.0 * 5.70;
const INIT_TRANSITION_VARIANCE: f32 = 0.01;
const GATING_THRESHOLD_VOC: f32 = 340.0;
const GATING_THRESHOLD_NOX: f32 = 30.0;
const GATING_THRESHOLD_INITIAL: f32 = 510.0;
const GATING_THRESHOLD_TRANSITION: f32 = 0.09;
const GATING_MAX_DURATION_MINUTES_VOC: f32 = 60.0 * 3.0;
const GATING_MAX_DURATION_MINUTES_NOX: f32 = 60.0 * 12.0;
const GATING_MAX_RATIO: f32 = 0.3;
const SIGMOID_L: f32 = 500.0;
const SIGMOID_K_VOC: f32 = -0.0065;
const SIGMOID_X0_VOC: f32 = 213.0;
const SIGMOID_K_NOX: f32 = -0.0101;
const SIGMOID_X0_NOX: f32 = 614.0;
const INDEX_OFFSET_VOC: f32 = 100.0;
const INDEX_OFFSET_NOX: f32 = 1.0;
const LP_TAU_FAST: f32 = 20.0;
const LP_TAU_SLOW: f32 = 500.0;
const LP_ALPHA: f32 = -0.2;
const SRAW_MINIMUM_VOC: i32 = 20_000;
const SRAW_MINIMUM_NOX: i32 = 10_000;
const GAMMA_SCALING: f32 = 64.0;
const ADDITIONAL_GAMMA_MEAN_SCALING: f32 = 8.0;
const FIX16_MAX: f32 = 32_767.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Algorithm {
    Voc,
    Nox,
}

#[derive(Clone, Debug)]
pub struct GasIndex {
    algorithm: Algorithm,
    sampling_interval: f32,
    index_offset: f32,
    sraw_minimum: i32,
    sigmoid_k: f32,
    sigmoid_x0: f32,
    uptime: f32,
    sraw: f32,
    index: f32,
    mox_mean: f32,
    mox_std: f32,
    estimator: MeanVariance,
    lowpass: AdaptiveLowpass,
}

/// Online estimate of the raw signal's baseline, with a learning rate that
/// ramps down over the first hours and is gated while the index is high.
#[derive(Clone, Debug)]
struct MeanVariance {
    sampling_interval: f32,
    init_duration_mean: f32,
    init_duration_variance: f32,
    gating_threshold: f32,
    gating_max_duration_minutes: f32,

    initialized: bool,
    mean: f32,
    sraw_offset: f32,
    std: f32,
    gamma_mean: f32,
    gamma_variance: f32,
    gamma_initial_mean: f32,
    gamma_initial_variance: f32,
    rgamma_mean: f32,
    rgamma_variance: f32,
    uptime_gamma: f32,
    uptime_gating: f32,
    gating_duration_minutes: f32,
}

/// Two fixed low-pass stages whose divergence picks the time constant of a
/// third, adaptive one.
#[derive(Clone, Debug)]
struct AdaptiveLowpass {
    sampling_interval: f32,
    a1: f32,
    a2: f32,
    state: Option<(f32, f32, f32)>,
}

// === impl GasIndex ===

impl GasIndex {
    /// `sampling_interval` is the time between samples, in seconds.
    pub fn voc(sampling_interval: f32) -> Self {
        Self::new(Algorithm::Voc, sampling_interval)
    }

    pub fn nox(sampling_interval: f32) -> Self {
        Self::new(Algorithm::Nox, sampling_interval)
    }

    pub fn new(algorithm: Algorithm, sampling_interval: f32) -> Self {
        let (index_offset, sraw_minimum, sigmoid_k, sigmoid_x0) = match algorithm {
            Algorithm::Voc => (INDEX_OFFSET_VOC, SRAW_MINIMUM_VOC, SIGMOID_K_VOC, SIGMOID_X0_VOC),
            Algorithm::Nox => (INDEX_OFFSET_NOX, SRAW_MINIMUM_NOX, SIGMOID_K_NOX, SIGMOID_X0_NOX),
        };
        let estimator = MeanVariance::new(algorithm, sampling_interval);
        Self {
            algorithm,
            sampling_interval,
            index_offset,
            sraw_minimum,
            sigmoid_k,
            sigmoid_x0,
            uptime: 0.0,
            sraw: 0.0,
            index: 0.0,
            mox_mean: estimator.mean(),
            mox_std: estimator.std,
            estimator,
            lowpass: AdaptiveLowpass::new(sampling_interval),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn sampling_interval(&self) -> f32 {
        self.sampling_interval
    }

    /// The index reported during the blackout period, and the index of clean
    /// air once the baseline has been learned.
    pub fn default_index(&self) -> i32 {
        self.index_offset as i32
    }

    pub fn in_blackout(&self) -> bool {
        self.uptime <= INITIAL_BLACKOUT
    }

    /// Feeds one raw sample and returns the current index.
    pub fn process(&mut self, sraw: i32) -> i32 {
        if self.in_blackout() {
            self.uptime += self.sampling_interval;
            return self.default_index();
        }

        if 0 < sraw && sraw < 65_000 {
            let clamped = sraw.clamp(self.sraw_minimum + 1, self.sraw_minimum + 32_767);
            self.sraw = (clamped - self.sraw_minimum) as f32;
        }

        let index = if self.algorithm == Algorithm::Voc || self.estimator.initialized {
            self.scaled_sigmoid(self.mox_model(self.sraw))
        } else {
            self.index_offset
        };
        self.index = self.lowpass.process(index).max(0.5);

        if self.sraw > 0.0 {
            self.estimator.process(self.sraw, self.index);
            self.mox_mean = self.estimator.mean();
            self.mox_std = self.estimator.std;
        }

        (self.index + 0.5) as i32
    }

    fn mox_model(&self, sraw: f32) -> f32 {
        match self.algorithm {
            Algorithm::Voc => {
                (sraw - self.mox_mean) / -(self.mox_std + SRAW_STD_BONUS_VOC) * INDEX_GAIN
            }
            Algorithm::Nox => (sraw - self.mox_mean) / SRAW_STD_NOX * INDEX_GAIN,
        }
    }

    fn scaled_sigmoid(&self, sample: f32) -> f32 {
        let x = self.sigmoid_k * (sample - self.sigmoid_x0);
        if x < -50.0 {
            return SIGMOID_L;
        }
        if x > 50.0 {
            return 0.0;
        }

        let default_offset = match self.algorithm {
            Algorithm::Voc => INDEX_OFFSET_VOC,
            Algorithm::Nox => INDEX_OFFSET_NOX,
        };
        if sample >= 0.0 {
            let shift = if default_offset == 1.0 {
                (500.0 / 499.0) * (1.0 - self.index_offset)
            } else {
                (SIGMOID_L - 5.0 * self.index_offset) / 4.0
            };
            (SIGMOID_L + shift) / (1.0 + x.exp()) - shift
        } else {
            (self.index_offset / default_offset) * (SIGMOID_L / (1.0 + x.exp()))
        }
    }
}

fn sigmoid(k: f32, x0: f32, sample: f32) -> f32 {
    let x = k * (sample - x0);
    if x < -50.0 {
        1.0
    } else if x > 50.0 {
        0.0
    } else {
        1.0 / (1.0 + x.exp())
    }
}

// === impl MeanVariance ===

impl MeanVariance {
    fn new(algorithm: Algorithm, sampling_interval: f32) -> Self {
        let (tau_initial_mean, init_duration_mean, init_duration_variance, gating_threshold, gating_max) =
            match algorithm {
                Algorithm::Voc => (
                    TAU_INITIAL_MEAN_VOC,
                    INIT_DURATION_MEAN_VOC,
                    INIT_DURATION_VARIANCE_VOC,
                    GATING_THRESHOLD_VOC,
                    GATING_MAX_DURATION_MINUTES_VOC,
                ),
                Algorithm::Nox => (
                    TAU_INITIAL_MEAN_NOX,
                    INIT_DURATION_MEAN_NOX,
                    INIT_DURATION_VARIANCE_NOX,
                    GATING_THRESHOLD_NOX,
                    GATING_MAX_DURATION_MINUTES_NOX,
                ),
            };
        let hours = sampling_interval / 3600.0;
        Self {
            sampling_interval,
            init_duration_mean,
            init_duration_variance,
            gating_threshold,
            gating_max_duration_minutes: gating_max,

            initialized: false,
            mean: 0.0,
            sraw_offset: 0.0,
            std: SRAW_STD_INITIAL,
            gamma_mean: (ADDITIONAL_GAMMA_MEAN_SCALING * GAMMA_SCALING * hours)
                / (TAU_MEAN_HOURS + hours),
            gamma_variance: (GAMMA_SCALING * hours) / (TAU_VARIANCE_HOURS + hours),
            gamma_initial_mean: (ADDITIONAL_GAMMA_MEAN_SCALING * GAMMA_SCALING * sampling_interval)
                / (tau_initial_mean + sampling_interval),
            gamma_initial_variance: (GAMMA_SCALING * sampling_interval)
                / (TAU_INITIAL_VARIANCE + sampling_interval),
            rgamma_mean: 0.0,
            rgamma_variance: 0.0,
            uptime_gamma: 0.0,
            uptime_gating: 0.0,
            gating_duration_minutes: 0.0,
        }
    }

    fn mean(&self) -> f32 {
        self.mean + self.sraw_offset
    }

    fn process(&mut self, sraw: f32, index: f32) {
        if !self.initialized {
            self.initialized = true;
            self.sraw_offset = sraw;
            self.mean = 0.0;
            return;
        }

        // keep `mean` small so precision isn't lost on long uptimes
        if self.mean >= 100.0 || self.mean <= -100.0 {
            self.sraw_offset += self.mean;
            self.mean = 0.0;
        }

        let sraw = sraw - self.sraw_offset;
        self.update_gamma(index);

        let delta = (sraw - self.mean) / GAMMA_SCALING;
        let c = self.std + delta.abs();
        let additional_scaling = if c > 1440.0 { (c / 1440.0).powi(2) } else { 1.0 };

        self.std = (additional_scaling * (GAMMA_SCALING - self.rgamma_variance)).sqrt()
            * ((self.std * self.std / (GAMMA_SCALING * additional_scaling))
                + (self.rgamma_variance * delta * delta / additional_scaling))
                .sqrt();
        self.mean += (self.rgamma_mean * delta) / ADDITIONAL_GAMMA_MEAN_SCALING;
    }

    fn update_gamma(&mut self, index: f32) {
        let uptime_limit = FIX16_MAX - self.sampling_interval;
        if self.uptime_gamma < uptime_limit {
            self.uptime_gamma += self.sampling_interval;
        }
        if self.uptime_gating < uptime_limit {
            self.uptime_gating += self.sampling_interval;
        }

        let sigmoid_gamma_mean =
            sigmoid(INIT_TRANSITION_MEAN, self.init_duration_mean, self.uptime_gamma);
        let gamma_mean =
            self.gamma_mean + (self.gamma_initial_mean - self.gamma_mean) * sigmoid_gamma_mean;
        let gating_threshold_mean = self.gating_threshold
            + (GATING_THRESHOLD_INITIAL - self.gating_threshold)
                * sigmoid(INIT_TRANSITION_MEAN, self.init_duration_mean, self.uptime_gating);
        let sigmoid_gating_mean = sigmoid(GATING_THRESHOLD_TRANSITION, gating_threshold_mean, index);
        self.rgamma_mean = sigmoid_gating_mean * gamma_mean;

        let sigmoid_gamma_variance =
            sigmoid(INIT_TRANSITION_VARIANCE, self.init_duration_variance, self.uptime_gamma);
        let gamma_variance = self.gamma_variance
            + (self.gamma_initial_variance - self.gamma_variance)
                * (sigmoid_gamma_variance - sigmoid_gamma_mean);
        let gating_threshold_variance = self.gating_threshold
            + (GATING_THRESHOLD_INITIAL - self.gating_threshold)
                * sigmoid(INIT_TRANSITION_VARIANCE, self.init_duration_variance, self.uptime_gating);
        let sigmoid_gating_variance =
            sigmoid(GATING_THRESHOLD_TRANSITION, gating_threshold_variance, index);
        self.rgamma_variance = sigmoid_gating_variance * gamma_variance;

        self.gating_duration_minutes += (self.sampling_interval / 60.0)
            * (((1.0 - sigmoid_gating_mean) * (1.0 + GATING_MAX_RATIO)) - GATING_MAX_RATIO);
        if self.gating_duration_minutes < 0.0 {
            self.gating_duration_minutes = 0.0;
        }
        if self.gating_duration_minutes > self.gating_max_duration_minutes {
            self.uptime_gating = 0.0;
        }
    }
}

// === impl AdaptiveLowpass ===

impl AdaptiveLowpass {
    fn new(sampling_interval: f32) -> Self {
        Self {
            sampling_interval,
            a1: sampling_interval / (LP_TAU_FAST + sampling_interval),
            a2: sampling_interval / (LP_TAU_SLOW + sampling_interval),
            state: None,
        }
    }

    fn process(&mut self, sample: f32) -> f32 {
        let (x1, x2, x3) = self.state.unwrap_or((sample, sample, sample));
        let x1 = (1.0 - self.a1) * x1 + self.a1 * sample;
        let x2 = (1.0 - self.a2) * x2 + self.a2 * sample;

        let tau = (LP_TAU_SLOW - LP_TAU_FAST) * (LP_ALPHA * (x1 - x2).abs()).exp() + LP_TAU_FAST;
        let a3 = self.sampling_interval / (tau + self.sampling_interval);
        let x3 = (1.0 - a3) * x3 + a3 * sample;

        self.state = Some((x1, x2, x3));
        x3
    }
}
