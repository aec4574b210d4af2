//! Forecast horizons from a model's pipeline configuration
//!
//! ```json
//! {"forecast_config": {"horizons": [10, 20, 30], "forecast_interval_minutes": 10, "forecast_horizon_hours": 1}}
//! ```

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    #[serde(default)]
    forecast_config: Option<ForecastSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastSettings {
    #[serde(default)]
    horizons: Option<Vec<i64>>,
    #[serde(default)]
    forecast_interval_minutes: Option<u32>,
    #[serde(default)]
    forecast_horizon_hours: Option<u32>,
}

/// Parse the horizon list (minutes) from a pipeline config document
pub fn parse_horizons(raw: &str) -> Result<Vec<u32>> {
    let settings: PipelineSettings = serde_json::from_str(raw)?;
    let forecast = settings.forecast_config.ok_or_else(|| {
        PipelineError::InvalidParameter("pipeline config has no forecast_config".to_string())
    })?;

    let horizons = forecast.horizons.unwrap_or_default();
    if horizons.is_empty() {
        return Err(PipelineError::InvalidParameter(
            "forecast_config has no horizons".to_string(),
        ));
    }

    let horizons = horizons
        .into_iter()
        .map(|h| {
            u32::try_from(h).ok().filter(|h| *h > 0).ok_or_else(|| {
                PipelineError::InvalidParameter(format!("horizon {} is not a positive minute count", h))
            })
        })
        .collect::<Result<Vec<u32>>>()?;

    tracing::debug!(
        steps = horizons.len(),
        interval_minutes = ?forecast.forecast_interval_minutes,
        horizon_hours = ?forecast.forecast_horizon_hours,
        "Parsed horizons from pipeline config"
    );
    Ok(horizons)
}

/// Horizons for a model, falling back to `defaults` when the config is
/// absent or unusable
pub fn resolve_horizons(model_id: i64, raw: Option<&str>, defaults: &[u32]) -> Vec<u32> {
    let Some(raw) = raw else {
        warn!(model_id, ?defaults, "No pipeline config, using default horizons");
        return defaults.to_vec();
    };

    match parse_horizons(raw) {
        Ok(horizons) => horizons,
        Err(e) => {
            warn!(model_id, error = %e, ?defaults, "Unusable pipeline config, using default horizons");
            defaults.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DEFAULTS: [u32; 3] = [10, 30, 60];

    #[test]
    fn test_parses_configured_horizons() {
        let raw = r#"{"forecast_config": {"horizons": [10, 20, 30], "forecast_interval_minutes": 10, "forecast_horizon_hours": 1}}"#;
        assert_eq!(parse_horizons(raw).unwrap(), vec![10, 20, 30]);
        assert_eq!(resolve_horizons(1, Some(raw), &DEFAULTS), vec![10, 20, 30]);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("not json"))]
    #[case(Some("{}"))]
    #[case(Some(r#"{"forecast_config": {}}"#))]
    #[case(Some(r#"{"forecast_config": {"horizons": []}}"#))]
    #[case(Some(r#"{"forecast_config": {"horizons": [10, -5]}}"#))]
    #[case(Some(r#"{"forecast_config": {"horizons": [0]}}"#))]
    fn test_falls_back_to_defaults(#[case] raw: Option<&str>) {
        assert_eq!(resolve_horizons(7, raw, &DEFAULTS), DEFAULTS.to_vec());
    }
}
