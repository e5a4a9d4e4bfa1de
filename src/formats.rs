use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEnvelope {
    pub response: SearchResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub web_title: String,
    pub web_publication_date: String,
    pub web_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<SearchResultFields>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResultFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Error body returned by the search API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchErrorEnvelope {
    pub response: SearchErrorResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchErrorResponse {
    pub message: String,
}

/// Page metadata embedded as JSON in `<meta name="parsely-page">`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParselyPage {
    pub title: String,
    pub pub_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}
