//! Tier profiles and rule composition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named bundle of rate-limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    /// Default rules for this tier.
    pub fn rules(self) -> RateLimitRules {
        match self {
            Tier::Free => RateLimitRules {
                per_minute: Some(60),
                per_hour: Some(1_000),
                per_day: Some(10_000),
                burst: Some(10),
                concurrent: Some(5),
            },
            Tier::Premium => RateLimitRules {
                per_minute: Some(300),
                per_hour: Some(10_000),
                per_day: Some(100_000),
                burst: Some(50),
                concurrent: Some(20),
            },
            Tier::Enterprise => RateLimitRules {
                per_minute: Some(1_000),
                per_hour: Some(50_000),
                per_day: Some(1_000_000),
                burst: Some(200),
                concurrent: Some(100),
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        })
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// The windows admission control enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Minute,
    Hour,
    Day,
    /// 1-second window, distinct from per-minute.
    Burst,
    Concurrent,
}

impl Window {
    /// Time-based windows in check order; `Concurrent` is handled apart.
    pub const TIMED: [Window; 4] = [Window::Burst, Window::Minute, Window::Hour, Window::Day];

    /// Duration of a timed window. `Concurrent` has no duration.
    pub fn duration(self) -> Option<Duration> {
        match self {
            Window::Burst => Some(Duration::from_secs(1)),
            Window::Minute => Some(Duration::from_secs(60)),
            Window::Hour => Some(Duration::from_secs(3_600)),
            Window::Day => Some(Duration::from_secs(86_400)),
            Window::Concurrent => None,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Window::Minute => "requests_per_minute",
            Window::Hour => "requests_per_hour",
            Window::Day => "requests_per_day",
            Window::Burst => "burst",
            Window::Concurrent => "concurrent",
        })
    }
}

/// Limits per window; `None` leaves a window unenforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRules {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
    pub burst: Option<u32>,
    pub concurrent: Option<u32>,
}

fn most_restrictive(base: Option<u32>, over: Option<u32>) -> Option<u32> {
    match (base, over) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

impl RateLimitRules {
    /// Composes these rules with an endpoint override; the most restrictive
    /// limit per window wins.
    pub fn compose(self, over: RateLimitRules) -> RateLimitRules {
        RateLimitRules {
            per_minute: most_restrictive(self.per_minute, over.per_minute),
            per_hour: most_restrictive(self.per_hour, over.per_hour),
            per_day: most_restrictive(self.per_day, over.per_day),
            burst: most_restrictive(self.burst, over.burst),
            concurrent: most_restrictive(self.concurrent, over.concurrent),
        }
    }

    /// Limit for a given window.
    pub fn limit_for(&self, window: Window) -> Option<u32> {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
            Window::Burst => self.burst,
            Window::Concurrent => self.concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_defaults_match_profiles() {
        let free = Tier::Free.rules();
        assert_eq!(free.per_minute, Some(60));
        assert_eq!(free.burst, Some(10));
        assert_eq!(free.concurrent, Some(5));

        let enterprise = Tier::Enterprise.rules();
        assert_eq!(enterprise.per_day, Some(1_000_000));
    }

    #[test]
    fn composition_takes_most_restrictive() {
        let composed = Tier::Free.rules().compose(RateLimitRules {
            per_minute: Some(10),
            burst: Some(3),
            ..Default::default()
        });
        assert_eq!(composed.per_minute, Some(10));
        assert_eq!(composed.burst, Some(3));
        // Windows the override does not name keep the tier limit.
        assert_eq!(composed.per_hour, Some(1_000));
    }

    #[test]
    fn composition_never_loosens() {
        let composed = Tier::Free.rules().compose(RateLimitRules {
            per_minute: Some(500),
            ..Default::default()
        });
        assert_eq!(composed.per_minute, Some(60));
    }

    #[test]
    fn tier_parses_lowercase_names() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert_eq!("enterprise".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert!("gold".parse::<Tier>().is_err());
    }
}
