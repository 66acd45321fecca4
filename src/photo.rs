use serde::{Deserialize, Serialize};

/// Descriptor of one remotely hosted photo, as served by the metadata
/// endpoint. The JSON field for the source URL is `download_url`; everywhere
/// inside the crate the URL doubles as the cache key across all three tiers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub author: String,
    /// Original width in pixels
    pub width: u32,
    /// Original height in pixels
    pub height: u32,
    #[serde(rename = "download_url")]
    pub url: String,
}

impl Photo {
    pub fn new(author: &str, width: u32, height: u32, url: &str) -> Self {
        Photo {
            author: author.to_string(),
            width,
            height,
            url: url.to_string(),
        }
    }
}
