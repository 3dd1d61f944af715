use utoipa::ToSchema;

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
pub struct QuotaStatus {
    pub remaining: u32,
    /// Next local midnight, in milliseconds since the Unix epoch.
    pub reset: i64,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReq {
    pub prompt: String,
    /// Reference photo to build the thumbnail around.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// `WIDTHxHEIGHT`, e.g. `1280x720`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
pub struct GenerateResp {
    pub url: String,
    pub remaining: u32,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
pub struct RepromptReq {
    pub prompt: String,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RepromptResp {
    pub enhanced_prompt: String,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
