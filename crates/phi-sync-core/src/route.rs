//! Object routing.
//!
//! [`classify`] maps an object key to the closed set of [`ObjectKind`]s the
//! orchestrator dispatches on. Rules, first match wins:
//!
//! | Rule | Match | Kind |
//! |------|-------|------|
//! | 1 | final extension is `.jpg`, `.jpeg`, `.png` or `.tiff` (any case) | [`ObjectKind::ImageDocument`] |
//! | 2 | key contains a wearable marker (any case) | [`ObjectKind::WearableMetric`] |
//! | 3 | anything else | [`ObjectKind::Unrecognized`] |

use std::fmt;

/// Extensions routed to the extraction service.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "tiff"];

/// Wearable metrics with a dedicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    ActiveEnergyBurned,
    Distance,
    HeartRate,
    Steps,
    BodyTemperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::ActiveEnergyBurned,
        MetricKind::Distance,
        MetricKind::HeartRate,
        MetricKind::Steps,
        MetricKind::BodyTemperature,
    ];

    /// Canonical marker, also the default destination table name.
    pub fn marker(&self) -> &'static str {
        match self {
            MetricKind::ActiveEnergyBurned => "ActiveEnergyBurned_Cal",
            MetricKind::Distance => "Distance_Mile",
            MetricKind::HeartRate => "HeartRate_CountPerMin",
            MetricKind::Steps => "Steps_Count",
            MetricKind::BodyTemperature => "BodyTemprature_Farenheit",
        }
    }

    /// Every substring that identifies an export of this metric.
    ///
    /// Heart-rate exports were historically matched on
    /// `HeartRate_CounterPerMin` while the table is `HeartRate_CountPerMin`;
    /// both spellings route to the same table.
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            MetricKind::ActiveEnergyBurned => &["ActiveEnergyBurned_Cal"],
            MetricKind::Distance => &["Distance_Mile"],
            MetricKind::HeartRate => &["HeartRate_CountPerMin", "HeartRate_CounterPerMin"],
            MetricKind::Steps => &["Steps_Count"],
            MetricKind::BodyTemperature => &["BodyTemprature_Farenheit"],
        }
    }

    /// Short config name (`[tables.metrics]` keys).
    pub fn config_key(&self) -> &'static str {
        match self {
            MetricKind::ActiveEnergyBurned => "active_energy_burned",
            MetricKind::Distance => "distance",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Steps => "steps",
            MetricKind::BodyTemperature => "body_temperature",
        }
    }

    pub fn from_config_key(key: &str) -> Option<MetricKind> {
        MetricKind::ALL.into_iter().find(|m| m.config_key() == key)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Routing decision for one object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    ImageDocument,
    WearableMetric(MetricKind),
    Unrecognized,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::ImageDocument => f.write_str("image"),
            ObjectKind::WearableMetric(m) => write!(f, "wearable:{}", m),
            ObjectKind::Unrecognized => f.write_str("ignored"),
        }
    }
}

/// Classify an object key.
pub fn classify(key: &str) -> ObjectKind {
    if is_image_key(key) {
        return ObjectKind::ImageDocument;
    }
    match wearable_metric(key) {
        Some(metric) => ObjectKind::WearableMetric(metric),
        None => ObjectKind::Unrecognized,
    }
}

/// Whether the key's final path segment carries an image extension.
pub fn is_image_key(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => IMAGE_EXTENSIONS
            .iter()
            .any(|candidate| ext.eq_ignore_ascii_case(candidate)),
        _ => false,
    }
}

fn wearable_metric(key: &str) -> Option<MetricKind> {
    let lower = key.to_ascii_lowercase();
    MetricKind::ALL.into_iter().find(|metric| {
        metric
            .markers()
            .iter()
            .any(|marker| lower.contains(&marker.to_ascii_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extensions_any_case() {
        for key in ["g/page1.png", "g/scan.JPG", "g/a.Jpeg", "g/fax.tiff"] {
            assert_eq!(classify(key), ObjectKind::ImageDocument, "{}", key);
        }
    }

    #[test]
    fn non_image_extensions_are_not_documents() {
        assert_eq!(classify("g/report.pdf"), ObjectKind::Unrecognized);
        assert_eq!(classify("g/notes.txt"), ObjectKind::Unrecognized);
        assert_eq!(classify("g/tif.tif"), ObjectKind::Unrecognized);
        assert_eq!(classify("g/.png"), ObjectKind::Unrecognized);
        assert_eq!(classify("png"), ObjectKind::Unrecognized);
    }

    #[test]
    fn extension_only_counts_on_last_segment() {
        assert_eq!(classify("scans.png/readme"), ObjectKind::Unrecognized);
    }

    #[test]
    fn wearable_markers() {
        assert_eq!(
            classify("exports/Steps_Count.csv"),
            ObjectKind::WearableMetric(MetricKind::Steps)
        );
        assert_eq!(
            classify("exports/distance_mile-2024.csv"),
            ObjectKind::WearableMetric(MetricKind::Distance)
        );
        assert_eq!(
            classify("exports/BodyTemprature_Farenheit.csv"),
            ObjectKind::WearableMetric(MetricKind::BodyTemperature)
        );
        assert_eq!(
            classify("exports/ActiveEnergyBurned_Cal.csv"),
            ObjectKind::WearableMetric(MetricKind::ActiveEnergyBurned)
        );
    }

    #[test]
    fn both_heart_rate_spellings_route_to_one_metric() {
        assert_eq!(
            classify("w/HeartRate_CountPerMin.csv"),
            ObjectKind::WearableMetric(MetricKind::HeartRate)
        );
        assert_eq!(
            classify("w/HeartRate_CounterPerMin.csv"),
            ObjectKind::WearableMetric(MetricKind::HeartRate)
        );
        assert_eq!(MetricKind::HeartRate.marker(), "HeartRate_CountPerMin");
    }

    #[test]
    fn image_extension_takes_precedence_over_marker() {
        assert_eq!(classify("Steps_Count/photo.jpg"), ObjectKind::ImageDocument);
        assert_eq!(
            classify("Steps_Count/photo.csv"),
            ObjectKind::WearableMetric(MetricKind::Steps)
        );
    }

    #[test]
    fn config_keys_round_trip() {
        for metric in MetricKind::ALL {
            assert_eq!(MetricKind::from_config_key(metric.config_key()), Some(metric));
        }
        assert_eq!(MetricKind::from_config_key("sleep"), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(ObjectKind::ImageDocument.to_string(), "image");
        assert_eq!(
            ObjectKind::WearableMetric(MetricKind::Steps).to_string(),
            "wearable:Steps_Count"
        );
        assert_eq!(ObjectKind::Unrecognized.to_string(), "ignored");
    }
}
