//! ADX (Average Directional Index)
//!
//! Wilder's ADX for trend strength, 0-100 scale, direction agnostic.
//!
//! Components:
//! - +DI: upward movement strength
//! - -DI: downward movement strength
//! - ADX: smoothed average of DX
//!
//! Warmup is `2 * period - 1` candles.

use super::series::true_range;
use super::Candle;

/// ADX calculation result
#[derive(Debug, Clone, Copy)]
pub struct AdxResult {
    pub plus_di: f64,
    pub minus_di: f64,
    pub adx: f64,
    pub dx: f64,
    /// True once warmup complete
    pub is_valid: bool,
}

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,

    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,

    // Wilder's smoothed values
    smoothed_tr: f64,
    smoothed_plus_dm: f64,
    smoothed_minus_dm: f64,

    bars_processed: usize,

    // Initialization accumulators
    tr_sum: f64,
    plus_dm_sum: f64,
    minus_dm_sum: f64,
    dx_values: Vec<f64>,

    plus_di: f64,
    minus_di: f64,
    adx: f64,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            prev_high: None,
            prev_low: None,
            prev_close: None,
            smoothed_tr: 0.0,
            smoothed_plus_dm: 0.0,
            smoothed_minus_dm: 0.0,
            bars_processed: 0,
            tr_sum: 0.0,
            plus_dm_sum: 0.0,
            minus_dm_sum: 0.0,
            dx_values: Vec::with_capacity(period),
            plus_di: 0.0,
            minus_di: 0.0,
            adx: 0.0,
        }
    }

    pub fn warmup_periods(&self) -> usize {
        2 * self.period - 1
    }

    pub fn update(&mut self, candle: &Candle) -> AdxResult {
        let n = self.period as f64;

        let tr = true_range(candle, self.prev_close);
        let (plus_dm, minus_dm) = self.directional_movement(candle);

        self.prev_high = Some(candle.high);
        self.prev_low = Some(candle.low);
        self.prev_close = Some(candle.close);
        self.bars_processed += 1;

        // Phase 1: accumulate the first smoothed values (bars 1..=n)
        if self.bars_processed <= self.period {
            self.tr_sum += tr;
            self.plus_dm_sum += plus_dm;
            self.minus_dm_sum += minus_dm;

            if self.bars_processed == self.period {
                self.smoothed_tr = self.tr_sum;
                self.smoothed_plus_dm = self.plus_dm_sum;
                self.smoothed_minus_dm = self.minus_dm_sum;
                self.update_di();
                let dx = self.dx();
                self.dx_values.push(dx);
                if self.period == 1 {
                    self.adx = dx;
                }
            }
            return self.result(0.0);
        }

        // Phase 2: Wilder's smoothing, Smoothed = Prev - Prev / n + Current
        self.smoothed_tr = self.smoothed_tr - (self.smoothed_tr / n) + tr;
        self.smoothed_plus_dm = self.smoothed_plus_dm - (self.smoothed_plus_dm / n) + plus_dm;
        self.smoothed_minus_dm = self.smoothed_minus_dm - (self.smoothed_minus_dm / n) + minus_dm;
        self.update_di();
        let dx = self.dx();

        // Phase 2a: collect DX for the first ADX (bars n+1..=2n-1)
        if self.bars_processed < 2 * self.period {
            self.dx_values.push(dx);
            if self.bars_processed == 2 * self.period - 1 {
                self.adx = self.dx_values.iter().sum::<f64>() / n;
            }
            return self.result(dx);
        }

        // Phase 3: ADX = (Prev * (n - 1) + DX) / n
        self.adx = (self.adx * (n - 1.0) + dx) / n;
        self.result(dx)
    }

    pub fn is_valid(&self) -> bool {
        self.bars_processed >= self.warmup_periods()
    }

    pub fn adx(&self) -> Option<f64> {
        self.is_valid().then_some(self.adx)
    }

    pub fn plus_di(&self) -> f64 {
        self.plus_di
    }

    pub fn minus_di(&self) -> f64 {
        self.minus_di
    }

    fn result(&self, dx: f64) -> AdxResult {
        let is_valid = self.is_valid();
        AdxResult {
            plus_di: self.plus_di,
            minus_di: self.minus_di,
            adx: if is_valid { self.adx } else { 0.0 },
            dx,
            is_valid,
        }
    }

    #[inline]
    fn directional_movement(&self, candle: &Candle) -> (f64, f64) {
        match (self.prev_high, self.prev_low) {
            (Some(prev_high), Some(prev_low)) => {
                let up_move = candle.high - prev_high;
                let down_move = prev_low - candle.low;

                if up_move > down_move && up_move > 0.0 {
                    (up_move, 0.0)
                } else if down_move > up_move && down_move > 0.0 {
                    (0.0, down_move)
                } else {
                    (0.0, 0.0)
                }
            }
            _ => (0.0, 0.0),
        }
    }

    #[inline]
    fn update_di(&mut self) {
        if self.smoothed_tr > 0.0 {
            self.plus_di = (self.smoothed_plus_dm / self.smoothed_tr) * 100.0;
            self.minus_di = (self.smoothed_minus_dm / self.smoothed_tr) * 100.0;
        } else {
            self.plus_di = 0.0;
            self.minus_di = 0.0;
        }
    }

    #[inline]
    fn dx(&self) -> f64 {
        let di_sum = self.plus_di + self.minus_di;
        if di_sum > 0.0 {
            ((self.plus_di - self.minus_di).abs() / di_sum) * 100.0
        } else {
            0.0
        }
    }
}
