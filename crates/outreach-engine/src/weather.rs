//! Active weather alerts from the National Weather Service API.
//!
//! `GET {api_base}/alerts/active?zone={zone}` returns GeoJSON; only the
//! alert properties matter here. Any failure or timeout degrades to
//! "no alerts" so the weather campaign simply does not fire that cycle.

use std::time::Duration;

use async_trait::async_trait;
use outreach_core::config::WeatherConfig;
use outreach_core::traits::WeatherSource;
use outreach_core::types::WeatherAlert;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AlertCollection {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    #[serde(default)]
    event: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    headline: Option<String>,
}

pub struct NwsWeatherSource {
    api_base: String,
    client: reqwest::Client,
}

impl NwsWeatherSource {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn fetch(&self, zone: &str) -> Result<Vec<WeatherAlert>, String> {
        let resp = self
            .client
            .get(format!("{}/alerts/active", self.api_base))
            .query(&[("zone", zone)])
            .header("Accept", "application/geo+json")
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: AlertCollection = resp.json().await.map_err(|e| format!("bad payload: {e}"))?;
        Ok(parse_alerts(zone, body))
    }
}

fn parse_alerts(zone: &str, body: AlertCollection) -> Vec<WeatherAlert> {
    body.features
        .into_iter()
        .map(|f| {
            let headline = f.properties.headline.unwrap_or_else(|| f.properties.event.clone());
            WeatherAlert {
                zone: zone.to_string(),
                event: f.properties.event,
                severity: f.properties.severity,
                headline,
            }
        })
        .collect()
}

#[async_trait]
impl WeatherSource for NwsWeatherSource {
    async fn active_alerts(&self, zone: &str) -> Vec<WeatherAlert> {
        match self.fetch(zone).await {
            Ok(alerts) => {
                tracing::debug!("🌦️ {} active alert(s) for {zone}", alerts.len());
                alerts
            }
            Err(e) => {
                tracing::warn!("⚠️ Weather lookup for {zone} failed, assuming no alerts: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nws_payload() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"properties": {"event": "Flood Warning", "severity": "Severe",
                                "headline": "Flood Warning issued June 15 until 8PM"}},
                {"properties": {"event": "Wind Advisory", "severity": "Moderate"}}
            ]
        }"#;
        let body: AlertCollection = serde_json::from_str(json).unwrap();
        let alerts = parse_alerts("WAZ558", body);
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].is_severe());
        assert_eq!(alerts[0].headline, "Flood Warning issued June 15 until 8PM");
        assert_eq!(alerts[1].headline, "Wind Advisory");
        assert!(!alerts[1].is_severe());
    }

    #[test]
    fn test_empty_collection() {
        let body: AlertCollection = serde_json::from_str(r#"{"type": "FeatureCollection"}"#).unwrap();
        assert!(parse_alerts("WAZ558", body).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_degrades_to_no_alerts() {
        let config = WeatherConfig {
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            ..WeatherConfig::default()
        };
        let source = NwsWeatherSource::new(&config);
        assert!(source.active_alerts("WAZ558").await.is_empty());
    }
}
