use serde::{Deserialize, Serialize};
use std::fmt;

/// Named entry strategy profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// 4h pullback-in-trend entries
    Swing,
    /// 1h breakout entries
    Momentum,
    /// 15m squeeze entries
    Scalp,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Swing => "SWING",
            Tier::Momentum => "MOMENTUM",
            Tier::Scalp => "SCALP",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market regime used to gate which tiers may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    StrongTrend,
    WeakTrend,
    Ranging,
    Volatile,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::StrongTrend,
        Regime::WeakTrend,
        Regime::Ranging,
        Regime::Volatile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::StrongTrend => "STRONG_TREND",
            Regime::WeakTrend => "WEAK_TREND",
            Regime::Ranging => "RANGING",
            Regime::Volatile => "VOLATILE",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Tier::Momentum).unwrap(), "\"MOMENTUM\"");
        assert_eq!(serde_json::to_string(&Regime::StrongTrend).unwrap(), "\"STRONG_TREND\"");
        let r: Regime = serde_json::from_str("\"VOLATILE\"").unwrap();
        assert_eq!(r, Regime::Volatile);
    }

    #[test]
    fn test_display_matches_serde() {
        for regime in Regime::ALL {
            let json = serde_json::to_string(&regime).unwrap();
            assert_eq!(json.trim_matches('"'), regime.to_string());
        }
        assert_eq!(Tier::Scalp.to_string(), "SCALP");
    }
}
