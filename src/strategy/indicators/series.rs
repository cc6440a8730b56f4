//! Streaming indicator primitives
//!
//! Each type consumes one value (or candle) at a time and only ever looks at
//! data already seen, so a value produced at bar `n` never depends on bar
//! `n + 1`. `update` returns `None` until the warmup is complete.

use std::collections::VecDeque;

use super::Candle;

/// Fixed-length window with running sum
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingWindow {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            values: VecDeque::with_capacity(period),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.period {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.period
    }

    pub fn mean(&self) -> Option<f64> {
        self.is_full().then(|| self.sum / self.period as f64)
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .values
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.period as f64;
        Some(variance.sqrt())
    }

    /// Max of the values seen so far in the window
    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }
}

/// Exponential moving average seeded with the SMA of the first `period` values
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed: Vec<f64>,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.value = match self.value {
            Some(prev) => Some(prev + self.alpha * (price - prev)),
            None => {
                self.seed.push(price);
                if self.seed.len() == self.period {
                    let sma = self.seed.iter().sum::<f64>() / self.period as f64;
                    self.seed.clear();
                    Some(sma)
                } else {
                    None
                }
            }
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Wilder's RSI
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    gains: f64,
    losses: f64,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            gains: 0.0,
            losses: 0.0,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let change = close - prev;
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        let n = self.period as f64;

        self.changes += 1;
        if self.changes < self.period {
            self.gains += gain;
            self.losses += loss;
            return None;
        }
        if self.changes == self.period {
            self.avg_gain = (self.gains + gain) / n;
            self.avg_loss = (self.losses + loss) / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        let rsi = if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 { 50.0 } else { 100.0 }
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        };
        self.value = Some(rsi);
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Wilder's average true range
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    tr_sum: f64,
    bars: usize,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            tr_sum: 0.0,
            bars: 0,
            value: None,
        }
    }

    pub fn update(&mut self, candle: &Candle) -> Option<f64> {
        let tr = true_range(candle, self.prev_close);
        self.prev_close = Some(candle.close);
        let n = self.period as f64;

        self.value = match self.value {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.bars += 1;
                self.tr_sum += tr;
                (self.bars == self.period).then(|| self.tr_sum / n)
            }
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// True range, accounting for gaps against the previous close
pub fn true_range(candle: &Candle, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(prev_close) => {
            let hl = candle.high - candle.low;
            let hc = (candle.high - prev_close).abs();
            let lc = (candle.low - prev_close).abs();
            hl.max(hc).max(lc)
        }
        None => candle.high - candle.low,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
}

impl MacdValue {
    pub fn histogram(&self) -> f64 {
        self.macd - self.signal
    }
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    value: Option<MacdValue>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return None;
        };
        let macd = fast - slow;
        self.value = self.signal.update(macd).map(|signal| MacdValue { macd, signal });
        self.value
    }

    pub fn value(&self) -> Option<MacdValue> {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    window: RollingWindow,
    k: f64,
}

impl Bollinger {
    pub fn new(period: usize, k: f64) -> Self {
        Self {
            window: RollingWindow::new(period),
            k,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<Bands> {
        self.window.push(close);
        let middle = self.window.mean()?;
        let sd = self.window.std_dev()?;
        Some(Bands {
            upper: middle + self.k * sd,
            middle,
            lower: middle - self.k * sd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle::new(Utc::now(), close, high, low, close, 1.0)
    }

    #[test]
    fn test_rolling_window() {
        let mut window = RollingWindow::new(3);
        window.push(1.0);
        window.push(5.0);
        assert!(window.mean().is_none());
        assert_eq!(window.max(), Some(5.0));

        window.push(3.0);
        window.push(4.0);
        assert_relative_eq!(window.mean().unwrap(), 4.0);
        assert_eq!(window.max(), Some(5.0));
        window.push(2.0);
        assert_eq!(window.max(), Some(4.0));
    }

    #[test]
    fn test_ema_seed_and_step() {
        let mut ema = Ema::new(3);
        assert!(ema.update(1.0).is_none());
        assert!(ema.update(2.0).is_none());
        assert_relative_eq!(ema.update(3.0).unwrap(), 2.0);
        // alpha = 0.5
        assert_relative_eq!(ema.update(4.0).unwrap(), 3.0);
    }

    #[test]
    fn test_rsi_extremes() {
        let mut rsi = Rsi::new(3);
        let mut last = None;
        for price in [10.0, 11.0, 12.0, 13.0, 14.0] {
            last = rsi.update(price);
        }
        assert_relative_eq!(last.unwrap(), 100.0);

        let mut rsi = Rsi::new(3);
        for price in [10.0, 10.0, 10.0, 10.0] {
            last = rsi.update(price);
        }
        assert_relative_eq!(last.unwrap(), 50.0);
    }

    #[test]
    fn test_rsi_bounds() {
        let mut rsi = Rsi::new(5);
        for i in 0..40 {
            let price = 100.0 + ((i * 7) % 11) as f64 - 5.0;
            if let Some(value) = rsi.update(price) {
                assert!((0.0..=100.0).contains(&value));
            }
        }
        assert!(rsi.value().is_some());
    }

    #[test]
    fn test_atr_constant_range() {
        let mut atr = Atr::new(3);
        assert!(atr.update(&candle(11.0, 9.0, 10.0)).is_none());
        assert!(atr.update(&candle(11.0, 9.0, 10.0)).is_none());
        assert_relative_eq!(atr.update(&candle(11.0, 9.0, 10.0)).unwrap(), 2.0);
        assert_relative_eq!(atr.update(&candle(11.0, 9.0, 10.0)).unwrap(), 2.0);
    }

    #[test]
    fn test_true_range_gap() {
        let tr = true_range(&candle(21.0, 20.0, 20.5), Some(10.0));
        assert_relative_eq!(tr, 11.0);
    }

    #[test]
    fn test_macd_warmup() {
        let mut macd = Macd::new(2, 3, 2);
        let mut outputs = Vec::new();
        for price in [1.0, 2.0, 3.0, 4.0, 5.0] {
            outputs.push(macd.update(price));
        }
        assert!(outputs[..3].iter().all(Option::is_none));
        assert!(outputs[4].is_some());
        // Rising prices: fast EMA above slow EMA
        assert!(outputs[4].unwrap().macd > 0.0);
    }

    #[test]
    fn test_bollinger_flat() {
        let mut bb = Bollinger::new(3, 2.0);
        bb.update(10.0);
        bb.update(10.0);
        let bands = bb.update(10.0).unwrap();
        assert_relative_eq!(bands.upper, 10.0);
        assert_relative_eq!(bands.lower, 10.0);
    }
}
