use crate::prelude::{FusionError, FusionResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allowed rollup intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BucketWidth {
    #[serde(rename = "1 minute")]
    OneMinute,
    #[serde(rename = "5 minutes")]
    FiveMinutes,
    #[serde(rename = "10 minutes")]
    TenMinutes,
    #[serde(rename = "15 minutes")]
    FifteenMinutes,
    #[serde(rename = "30 minutes")]
    ThirtyMinutes,
    #[serde(rename = "1 hour")]
    OneHour,
    #[serde(rename = "1 day")]
    OneDay,
}

impl BucketWidth {
    pub const ALL: [BucketWidth; 7] = [
        BucketWidth::OneMinute,
        BucketWidth::FiveMinutes,
        BucketWidth::TenMinutes,
        BucketWidth::FifteenMinutes,
        BucketWidth::ThirtyMinutes,
        BucketWidth::OneHour,
        BucketWidth::OneDay,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BucketWidth::OneMinute => "1 minute",
            BucketWidth::FiveMinutes => "5 minutes",
            BucketWidth::TenMinutes => "10 minutes",
            BucketWidth::FifteenMinutes => "15 minutes",
            BucketWidth::ThirtyMinutes => "30 minutes",
            BucketWidth::OneHour => "1 hour",
            BucketWidth::OneDay => "1 day",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            BucketWidth::OneMinute => Duration::minutes(1),
            BucketWidth::FiveMinutes => Duration::minutes(5),
            BucketWidth::TenMinutes => Duration::minutes(10),
            BucketWidth::FifteenMinutes => Duration::minutes(15),
            BucketWidth::ThirtyMinutes => Duration::minutes(30),
            BucketWidth::OneHour => Duration::hours(1),
            BucketWidth::OneDay => Duration::days(1),
        }
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BucketWidth {
    type Err = FusionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        BucketWidth::ALL
            .into_iter()
            .find(|width| width.label() == trimmed)
            .ok_or_else(|| FusionError::InvalidParameter(format!("unsupported interval '{}'", value)))
    }
}

/// H3 resolution requested for a heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HeatmapResolution(u8);

impl HeatmapResolution {
    pub fn new(value: u8) -> FusionResult<Self> {
        if value > 15 {
            return Err(FusionError::InvalidParameter(format!(
                "heatmap resolution {} outside 0..=15",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Maps a requested grid size in metres to the closest H3 resolution.
    pub fn from_grid_size_m(grid_size_m: f64) -> FusionResult<Self> {
        if !(grid_size_m.is_finite() && grid_size_m > 0.0) {
            return Err(FusionError::InvalidParameter(format!(
                "grid size {} m",
                grid_size_m
            )));
        }
        let resolution = if grid_size_m <= 50.0 {
            10
        } else if grid_size_m <= 500.0 {
            8
        } else if grid_size_m <= 1000.0 {
            7
        } else {
            9
        };
        Ok(Self(resolution))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for HeatmapResolution {
    type Error = FusionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        HeatmapResolution::new(value)
    }
}

impl From<HeatmapResolution> for u8 {
    fn from(resolution: HeatmapResolution) -> u8 {
        resolution.0
    }
}

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> FusionResult<Self> {
        if end < start {
            return Err(FusionError::InvalidParameter(format!(
                "window ends at {} before it starts at {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Missing bounds are left open.
    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> FusionResult<Self> {
        let open = Self::unbounded();
        Self::new(start.unwrap_or(open.start), end.unwrap_or(open.end))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_every_allowed_interval() {
        for width in BucketWidth::ALL {
            assert_eq!(width.label().parse::<BucketWidth>().unwrap(), width);
        }
        assert_eq!(BucketWidth::OneHour.duration(), Duration::minutes(60));
    }

    #[test]
    fn rejects_unlisted_interval() {
        assert!(matches!(
            "7 minutes".parse::<BucketWidth>(),
            Err(FusionError::InvalidParameter(_))
        ));
        assert!(serde_json::from_str::<BucketWidth>("\"2 hours\"").is_err());
    }

    #[test]
    fn grid_size_maps_to_resolution() {
        let res = |m: f64| HeatmapResolution::from_grid_size_m(m).unwrap().get();
        assert_eq!(res(25.0), 10);
        assert_eq!(res(50.0), 10);
        assert_eq!(res(200.0), 8);
        assert_eq!(res(1000.0), 7);
        assert_eq!(res(5000.0), 9);
        assert!(HeatmapResolution::from_grid_size_m(0.0).is_err());
        assert!(HeatmapResolution::new(16).is_err());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let start = Utc.timestamp_opt(1_000, 0).unwrap();
        let end = Utc.timestamp_opt(2_000, 0).unwrap();
        let window = TimeWindow::new(start, end).unwrap();
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(end + Duration::milliseconds(1)));
        assert!(TimeWindow::new(end, start).is_err());
    }
}
