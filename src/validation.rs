//! Pre-classification checks on polled samples.
//!
//! [`DataValidator`] fills in ranges for well-known oil & gas tags when the
//! device reports none, and flags statistical outliers. A numeric sample whose
//! z-score against the tag's recent history exceeds the configured threshold
//! is downgraded to `UNCERTAIN` and its statistics are attached as metadata.
//! Outliers never enter the history, so a sustained excursion keeps being
//! flagged until the device reports a quality of its own.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;

use crate::domain::{RawReading, ReadingQuality};

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySettings {
    /// Z-score above which a sample is an outlier; 0 disables detection.
    pub std_dev_threshold: f64,
    /// History size below which no sample is judged.
    pub min_samples: usize,
    /// Most recent samples kept per tag.
    pub window: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            std_dev_threshold: 3.0,
            min_samples: 100,
            window: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagRange {
    pub tag_name: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Engineering limits for common wellhead tags.
pub const DEFAULT_TAG_RANGES: &[TagRange] = &[
    // bbl/day
    TagRange { tag_name: "oil_rate", min: 0.0, max: 10_000.0 },
    // mcf/day
    TagRange { tag_name: "gas_rate", min: 0.0, max: 50_000.0 },
    TagRange { tag_name: "water_rate", min: 0.0, max: 20_000.0 },
    // psi
    TagRange { tag_name: "tubing_pressure", min: 0.0, max: 5_000.0 },
    TagRange { tag_name: "casing_pressure", min: 0.0, max: 5_000.0 },
    // °F
    TagRange { tag_name: "temperature", min: -40.0, max: 300.0 },
    // bbl/min
    TagRange { tag_name: "flow_rate", min: 0.0, max: 500.0 },
];

pub fn default_range(tag_name: &str) -> Option<&'static TagRange> {
    DEFAULT_TAG_RANGES.iter().find(|range| range.tag_name == tag_name)
}

/// Rolling mean and standard deviation over the last `capacity` values.
#[derive(Debug, Default)]
struct TagWindow {
    values: VecDeque<f64>,
    sum: f64,
    sum_squared: f64,
}

impl TagWindow {
    fn push(&mut self, value: f64, capacity: usize) {
        self.values.push_back(value);
        self.sum += value;
        self.sum_squared += value * value;
        while self.values.len() > capacity {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
                self.sum_squared -= old * old;
            }
        }
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum / self.values.len() as f64
    }

    fn std_dev(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.sum_squared / self.values.len() as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }
}

/// Per-connection validator; history is keyed by tag name.
#[derive(Debug)]
pub struct DataValidator {
    settings: AnomalySettings,
    history: Mutex<HashMap<String, TagWindow>>,
}

impl DataValidator {
    pub fn new(settings: AnomalySettings) -> Self {
        Self {
            settings,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Applies the default range and the outlier check to `raw` in place.
    /// Returns the z-score when the sample was flagged.
    pub fn inspect(&self, raw: &mut RawReading) -> Option<f64> {
        if raw.min_value.is_none()
            && raw.max_value.is_none()
            && let Some(range) = default_range(&raw.tag_name)
        {
            raw.min_value = Some(range.min);
            raw.max_value = Some(range.max);
        }

        let value = raw.value.as_f64().filter(|value| value.is_finite())?;
        if self.settings.std_dev_threshold <= 0.0 {
            return None;
        }

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let window = history.entry(raw.tag_name.clone()).or_default();

        let (mean, std_dev) = (window.mean(), window.std_dev());
        let z_score = if window.values.len() >= self.settings.min_samples && std_dev > 0.0 {
            (value - mean).abs() / std_dev
        } else {
            0.0
        };
        if z_score <= self.settings.std_dev_threshold {
            window.push(value, self.settings.window);
            return None;
        }

        debug!(tag_name = %raw.tag_name, value, z_score, mean, std_dev, "Anomalous sample");
        if raw.quality.is_none() {
            raw.quality = Some(ReadingQuality::Uncertain);
        }
        let mut metadata = match raw.metadata.take() {
            Some(JsonValue::Object(map)) => map,
            Some(other) => Map::from_iter([("device".to_string(), other)]),
            None => Map::new(),
        };
        metadata.insert(
            "anomaly".to_string(),
            json!({ "z_score": z_score, "mean": mean, "std_dev": std_dev }),
        );
        raw.metadata = Some(JsonValue::Object(metadata));
        Some(z_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReadingValue;
    use uuid::Uuid;

    fn raw(tag_name: &str, value: impl Into<ReadingValue>) -> RawReading {
        RawReading::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), tag_name, value)
    }

    fn settings(min_samples: usize) -> AnomalySettings {
        AnomalySettings {
            std_dev_threshold: 3.0,
            min_samples,
            window: 50,
        }
    }

    fn warm_up(validator: &DataValidator, tag_name: &str, count: usize) {
        for i in 0..count {
            let mut sample = raw(tag_name, 100.0 + (i % 5) as f64);
            assert_eq!(validator.inspect(&mut sample), None);
        }
    }

    #[test]
    fn known_tags_get_default_ranges() {
        let validator = DataValidator::new(settings(10));

        let mut pressure = raw("tubing_pressure", 1200.0);
        validator.inspect(&mut pressure);
        assert_eq!((pressure.min_value, pressure.max_value), (Some(0.0), Some(5000.0)));

        let mut explicit = raw("temperature", 20.0).with_range(0.0, 80.0);
        validator.inspect(&mut explicit);
        assert_eq!((explicit.min_value, explicit.max_value), (Some(0.0), Some(80.0)));

        let mut unknown = raw("choke_position", 40.0);
        validator.inspect(&mut unknown);
        assert_eq!(unknown.min_value, None);
    }

    #[test]
    fn outliers_are_marked_uncertain_after_warm_up() {
        let validator = DataValidator::new(settings(20));

        let mut early = raw("line_pressure", 900.0);
        assert_eq!(validator.inspect(&mut early), None);
        assert_eq!(early.quality, None);

        warm_up(&validator, "line_pressure", 30);

        let mut spike = raw("line_pressure", 900.0);
        let z_score = validator.inspect(&mut spike).unwrap();
        assert!(z_score > 3.0);
        assert_eq!(spike.quality, Some(ReadingQuality::Uncertain));
        let anomaly = &spike.metadata.as_ref().unwrap()["anomaly"];
        assert!(anomaly["mean"].as_f64().unwrap() > 100.0);

        // The spike stayed out of the history.
        let mut again = raw("line_pressure", 900.0);
        assert!(validator.inspect(&mut again).is_some());

        let mut normal = raw("line_pressure", 102.0);
        assert_eq!(validator.inspect(&mut normal), None);
        assert_eq!(normal.quality, None);
    }

    #[test]
    fn device_quality_and_metadata_are_kept() {
        let validator = DataValidator::new(settings(20));
        warm_up(&validator, "line_pressure", 30);

        let mut spike = raw("line_pressure", 900.0).with_quality(ReadingQuality::Bad);
        spike.metadata = Some(json!({ "register": 40001 }));
        assert!(validator.inspect(&mut spike).is_some());
        assert_eq!(spike.quality, Some(ReadingQuality::Bad));
        let metadata = spike.metadata.unwrap();
        assert_eq!(metadata["register"], 40001);
        assert!(metadata.get("anomaly").is_some());
    }

    #[test]
    fn zero_threshold_disables_detection() {
        let validator = DataValidator::new(AnomalySettings {
            std_dev_threshold: 0.0,
            ..settings(2)
        });
        warm_up(&validator, "line_pressure", 10);
        let mut spike = raw("line_pressure", 1e6);
        assert_eq!(validator.inspect(&mut spike), None);
    }

    #[test]
    fn window_keeps_recent_values_only() {
        let mut window = TagWindow::default();
        for value in [1.0, 2.0, 3.0, 10.0, 10.0, 10.0] {
            window.push(value, 3);
        }
        assert_eq!(window.values.len(), 3);
        assert!((window.mean() - 10.0).abs() < 1e-9);
        assert!(window.std_dev() < 1e-6);
    }
}
