use std::time::Duration;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the simulated device.
///
/// All fields default to a perfect device: instant answers, no errors.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Fraction of transactions, in `[0.0, 1.0]`, answered with
    /// "slave device busy".
    pub busy_rate: f64,

    /// Delay added to every transaction.
    pub latency: Duration,

    /// RNG seed for reproducible error sequences. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            busy_rate: 0.0,
            latency: Duration::ZERO,
            seed: None,
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Perfect device. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Busy device on a slow serial gateway: 10 % busy replies, 20 ms per
    /// transaction.
    pub fn flaky() -> Self {
        // ---
        Self {
            busy_rate: 0.10,
            latency: Duration::from_millis(20),
            ..Default::default()
        }
    }
}
