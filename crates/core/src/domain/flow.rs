// Flow & Sink Domain Model (cached per job by content checksum)

use serde::{Deserialize, Serialize};

pub type SinkId = i64;

/// How chunks for a sink must be ordered relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderingPolicy {
    /// No ordering, chunks run fully in parallel
    #[default]
    None,
    /// Records with the same id (or parent id) are delivered in creation order
    PerRecord,
    /// Records of the same agency are delivered in creation order
    PerAgency,
    /// Every chunk waits for the previous one
    Sequential,
}

/// Processing flow applied by the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: i64,
    pub version: i64,
    pub name: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Delivery destination plus its ordering policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sink {
    pub id: SinkId,
    pub version: i64,
    pub name: String,
    /// Broker destination the sink consumes from
    pub destination: String,
    #[serde(default)]
    pub ordering: OrderingPolicy,
    /// Append a job termination chunk after the last data chunk
    #[serde(default)]
    pub job_termination: bool,
}

/// Flow and sink a job specification resolves to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowBinding {
    pub flow: Flow,
    pub sink: Sink,
}

/// Hex blake3 digest of the JSON form, used as the cache address
pub fn content_checksum<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(version: i64) -> Sink {
        Sink {
            id: 7,
            version,
            name: "dummy".to_string(),
            destination: "sink::dummy".to_string(),
            ordering: OrderingPolicy::PerRecord,
            job_termination: false,
        }
    }

    #[test]
    fn test_checksum_is_content_addressed() {
        assert_eq!(
            content_checksum(&sink(1)).unwrap(),
            content_checksum(&sink(1)).unwrap()
        );
        assert_ne!(
            content_checksum(&sink(1)).unwrap(),
            content_checksum(&sink(2)).unwrap()
        );
    }

    #[test]
    fn test_ordering_defaults_to_none() {
        let sink: Sink = serde_json::from_str(
            r#"{"id":1,"version":1,"name":"s","destination":"sink::s"}"#,
        )
        .unwrap();
        assert_eq!(sink.ordering, OrderingPolicy::None);
        assert!(!sink.job_termination);
    }
}
