use crate::feed::{FeedError, FeedSource, StationInformation, StationStatus};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: StationList<T>,
}

#[derive(Debug, Deserialize)]
struct StationList<T> {
    stations: Vec<T>,
}

/// GBFS client for `{base_url}/{language}/station_*.json`.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl HttpFeedSource {
    pub fn new(base_url: &str, language: &str, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }

    fn url(&self, feed: &str) -> String {
        format!("{}/{}/{feed}.json", self.base_url, self.language)
    }

    async fn fetch<T: DeserializeOwned>(&self, feed: &str) -> Result<Vec<T>, FeedError> {
        let response = self.client.get(self.url(feed)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data.stations)
    }
}

impl FeedSource for HttpFeedSource {
    async fn station_information(&self) -> Result<Vec<StationInformation>, FeedError> {
        self.fetch("station_information").await
    }

    async fn station_status(&self) -> Result<Vec<StationStatus>, FeedError> {
        self.fetch("station_status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_language_and_feed() -> Result<(), FeedError> {
        let source = HttpFeedSource::new(
            "https://gbfs.example.com/gbfs/",
            "en",
            Duration::from_secs(1),
        )?;
        assert_eq!(
            source.url("station_status"),
            "https://gbfs.example.com/gbfs/en/station_status.json"
        );
        Ok(())
    }

    #[test]
    fn envelope_parses_gbfs_payload() -> Result<(), serde_json::Error> {
        let payload = r#"{
            "last_updated": 1760000000,
            "ttl": 60,
            "data": {"stations": [
                {"station_id": "12", "short_name": "041", "name": "Reforma", "lat": 19.4, "lon": -99.1, "capacity": 20}
            ]}
        }"#;
        let envelope: Envelope<StationInformation> = serde_json::from_str(payload)?;
        assert_eq!(envelope.data.stations.len(), 1);
        assert_eq!(envelope.data.stations[0].short_name.as_deref(), Some("041"));
        Ok(())
    }
}
