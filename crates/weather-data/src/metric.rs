//! Weather Metric Definitions
//!
//! Defines the fixed set of built-in weather quantities, how each one is
//! blended across sources, and the key type that also covers metrics
//! registered at runtime by sources.

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Built-in weather metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Metric {
    /// Air temperature (°C)
    Temperature,
    /// Daily minimum temperature (°C)
    MinTemp,
    /// Daily maximum temperature (°C)
    MaxTemp,
    /// Relative humidity (fraction 0..1)
    Rh,
    /// Daily minimum relative humidity (fraction 0..1)
    MinRh,
    /// Daily maximum relative humidity (fraction 0..1)
    MaxRh,
    /// Wind speed (m/s)
    Wind,
    /// Solar radiation (MJ/m² per hour)
    SolarRadiation,
    /// Sky cover (fraction 0..1)
    SkyCover,
    /// Observed rain (mm)
    Rain,
    /// Reference evapotranspiration (mm)
    Et0,
    /// Probability of precipitation (fraction 0..1)
    Pop,
    /// Quantitative precipitation forecast (mm)
    Qpf,
    /// Weather condition code
    Condition,
    /// Atmospheric pressure (kPa)
    Pressure,
    /// Dew point (°C)
    DewPoint,
}

impl Metric {
    /// Every built-in metric, in declaration order
    pub const ALL: [Metric; 16] = [
        Metric::Temperature,
        Metric::MinTemp,
        Metric::MaxTemp,
        Metric::Rh,
        Metric::MinRh,
        Metric::MaxRh,
        Metric::Wind,
        Metric::SolarRadiation,
        Metric::SkyCover,
        Metric::Rain,
        Metric::Et0,
        Metric::Pop,
        Metric::Qpf,
        Metric::Condition,
        Metric::Pressure,
        Metric::DewPoint,
    ];

    /// Stable wire name, used in persisted rows and limit tables
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "TEMPERATURE",
            Metric::MinTemp => "MINTEMP",
            Metric::MaxTemp => "MAXTEMP",
            Metric::Rh => "RH",
            Metric::MinRh => "MINRH",
            Metric::MaxRh => "MAXRH",
            Metric::Wind => "WIND",
            Metric::SolarRadiation => "SOLARRADIATION",
            Metric::SkyCover => "SKYCOVER",
            Metric::Rain => "RAIN",
            Metric::Et0 => "ET0",
            Metric::Pop => "POP",
            Metric::Qpf => "QPF",
            Metric::Condition => "CONDITION",
            Metric::Pressure => "PRESSURE",
            Metric::DewPoint => "DEWPOINT",
        }
    }

    /// Measurement unit
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature | Metric::MinTemp | Metric::MaxTemp | Metric::DewPoint => "C",
            Metric::Rh | Metric::MinRh | Metric::MaxRh | Metric::SkyCover | Metric::Pop => {
                "fraction"
            }
            Metric::Wind => "m/s",
            Metric::SolarRadiation => "MJ/m2/h",
            Metric::Rain | Metric::Et0 | Metric::Qpf => "mm",
            Metric::Condition => "code",
            Metric::Pressure => "kPa",
        }
    }

    /// How values from several sources are blended into one
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::MinTemp | Metric::MinRh => MetricKind::Minimum,
            Metric::MaxTemp | Metric::MaxRh => MetricKind::Maximum,
            Metric::Condition => MetricKind::Majority,
            _ => MetricKind::Mean,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DataError::UnknownMetric(s.to_string()))
    }
}

impl From<Metric> for &'static str {
    fn from(metric: Metric) -> Self {
        metric.as_str()
    }
}

impl TryFrom<String> for Metric {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Blending policy for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Lowest value across sources
    Minimum,
    /// Highest value across sources
    Maximum,
    /// Arithmetic mean across sources
    Mean,
    /// Most frequent categorical code, lowest code wins ties
    Majority,
}

/// Identifier of a source-defined metric, assigned once by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserMetricId(pub i64);

impl fmt::Display for UserMetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a stored or blended value: a built-in metric or a registered custom one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MetricKey {
    BuiltIn(Metric),
    User(UserMetricId),
}

impl MetricKey {
    const USER_PREFIX: &'static str = "user:";

    /// Blending policy; custom metrics are always averaged
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricKey::BuiltIn(metric) => metric.kind(),
            MetricKey::User(_) => MetricKind::Mean,
        }
    }

    /// The built-in metric, if any
    pub fn builtin(&self) -> Option<Metric> {
        match self {
            MetricKey::BuiltIn(metric) => Some(*metric),
            MetricKey::User(_) => None,
        }
    }
}

impl From<Metric> for MetricKey {
    fn from(metric: Metric) -> Self {
        MetricKey::BuiltIn(metric)
    }
}

impl From<UserMetricId> for MetricKey {
    fn from(id: UserMetricId) -> Self {
        MetricKey::User(id)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::BuiltIn(metric) => f.write_str(metric.as_str()),
            MetricKey::User(id) => write!(f, "{}{}", Self::USER_PREFIX, id),
        }
    }
}

impl FromStr for MetricKey {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(Self::USER_PREFIX) {
            Some(id) => id
                .parse::<i64>()
                .map(|id| MetricKey::User(UserMetricId(id)))
                .map_err(|_| DataError::MalformedKey(s.to_string())),
            None => s.parse::<Metric>().map(MetricKey::BuiltIn),
        }
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MetricKey {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
