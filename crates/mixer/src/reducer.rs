//! Per-metric Reducers

use std::collections::BTreeMap;

use weather_data::{MetricKind, MixedValue};

#[derive(Debug, Clone)]
enum State {
    Minimum(Option<f64>),
    Maximum(Option<f64>),
    Mean { sum: f64 },
    /// Occurrences per condition code
    Majority(BTreeMap<i64, u32>),
}

/// Accumulates the values of one metric across sources
#[derive(Debug, Clone)]
pub struct Reducer {
    state: State,
    contributors: u32,
}

impl Reducer {
    pub fn new(kind: MetricKind) -> Self {
        let state = match kind {
            MetricKind::Minimum => State::Minimum(None),
            MetricKind::Maximum => State::Maximum(None),
            MetricKind::Mean => State::Mean { sum: 0.0 },
            MetricKind::Majority => State::Majority(BTreeMap::new()),
        };
        Self {
            state,
            contributors: 0,
        }
    }

    /// Add one source's value
    pub fn push(&mut self, value: f64) {
        self.contributors += 1;
        match &mut self.state {
            State::Minimum(min) => *min = Some(min.map_or(value, |m| m.min(value))),
            State::Maximum(max) => *max = Some(max.map_or(value, |m| m.max(value))),
            State::Mean { sum } => *sum += value,
            State::Majority(counts) => *counts.entry(value.round() as i64).or_insert(0) += 1,
        }
    }

    pub fn contributors(&self) -> u32 {
        self.contributors
    }

    /// Blended value, `None` when nothing was pushed
    pub fn finish(self) -> Option<MixedValue> {
        if self.contributors == 0 {
            return None;
        }
        let value = match self.state {
            State::Minimum(min) => min?,
            State::Maximum(max) => max?,
            State::Mean { sum } => sum / f64::from(self.contributors),
            State::Majority(counts) => {
                // Ascending codes, so the lowest code wins a tie
                let mut best: Option<(i64, u32)> = None;
                for (code, count) in counts {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((code, count));
                    }
                }
                best?.0 as f64
            }
        };
        Some(MixedValue::new(value, self.contributors))
    }
}

/// Reduce a slice of values with the policy of `kind`
pub fn reduce(kind: MetricKind, values: &[f64]) -> Option<MixedValue> {
    let mut reducer = Reducer::new(kind);
    for &value in values {
        reducer.push(value);
    }
    reducer.finish()
}
