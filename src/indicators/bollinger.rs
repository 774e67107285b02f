/// Bollinger band values for the window ending at one candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub mean: f64,
    pub std_dev: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Calculate Bollinger bands for every index of `closes` in one pass
///
/// Keeps a running sum and sum of squares over a sliding window of `period`
/// closes, so the whole series costs O(n). Entry `i` holds the band of the
/// window ending at `i`; the first `period - 1` entries are `None`.
///
/// Variance is clamped at zero because `sum_sq / n - mean²` can go slightly
/// negative on flat series through floating point cancellation.
pub fn calculate_bollinger_series(closes: &[f64], period: usize, k: f64) -> Vec<Option<Band>> {
    let mut bands = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return bands;
    }

    let n = period as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;

    for (i, &close) in closes.iter().enumerate() {
        sum += close;
        sum_sq += close * close;

        if i >= period {
            let leaving = closes[i - period];
            sum -= leaving;
            sum_sq -= leaving * leaving;
        }

        if i + 1 >= period {
            let mean = sum / n;
            let variance = (sum_sq / n - mean * mean).max(0.0);
            let std_dev = variance.sqrt();
            bands[i] = Some(Band {
                mean,
                std_dev,
                upper: mean + k * std_dev,
                lower: mean - k * std_dev,
            });
        }
    }

    bands
}

/// Bollinger band of the most recent window only
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Option<Band> {
    calculate_bollinger_series(closes, period, k)
        .last()
        .copied()
        .flatten()
}
