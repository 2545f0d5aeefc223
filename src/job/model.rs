use serde::{Deserialize, Serialize};

/// Normalized unit of work, also the body of the outbound notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// File name under the staging directory and display name
    pub title: String,
    /// Source locator handed to the fetch tool
    pub link: String,
    /// Destination collection name
    pub show: String,
}

impl Job {
    /// Encode as the outbound notice body
    pub fn to_notice(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Structured inbound payload; absent or null fields decode as `None`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct JobRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub show: Option<String>,
}
