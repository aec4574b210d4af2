#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use online_forecast::models::{ModelBlob, PersistenceModel};
use online_forecast::records::ModelDescriptor;
use online_forecast::{MemoryStore, PipelineConfig};

/// 2024-03-01 at `hour:minute` UTC
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

pub fn horizons_config(horizons: &[u32]) -> String {
    serde_json::json!({ "forecast_config": { "horizons": horizons } }).to_string()
}

pub fn descriptor(model_id: i64, tag: &str, blob: &ModelBlob) -> ModelDescriptor {
    ModelDescriptor {
        model_id,
        tag_name: tag.to_string(),
        model_type: blob_family(blob),
        model_blob: Some(blob.encode().unwrap()),
        model_path: None,
        is_deployed: true,
        is_active: true,
        pipeline_config: None,
    }
}

fn blob_family(blob: &ModelBlob) -> String {
    use online_forecast::ForecastModel;
    blob.family().to_string()
}

pub fn persistence(value: f64) -> ModelBlob {
    ModelBlob::Persistence(PersistenceModel::new(value))
}

/// Ten-minute buckets with a constant value over [from, to]
pub fn seed_buckets(store: &MemoryStore, tag: &str, from: DateTime<Utc>, to: DateTime<Utc>, value: f64) {
    let mut ts = from;
    while ts <= to {
        store.add_bucket(tag, ts, value);
        ts += Duration::minutes(10);
    }
}

pub fn config() -> PipelineConfig {
    PipelineConfig::default()
}
