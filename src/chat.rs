//! Wire types of the OpenAI-compatible chat-completions API.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct Req {
    pub model: String,
    pub messages: Vec<Msg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct Msg {
    pub role: String,
    pub content: MsgContent,
}

impl Msg {
    pub fn system(content: MsgContent) -> Self {
        Self {
            role: "system".to_string(),
            content,
        }
    }

    pub fn user(content: MsgContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum MsgContent {
    String(String),
    Array(Vec<ContentItem>),
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Deserialize, Debug)]
pub struct Resp {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
pub struct Choice {
    pub message: RespMsg,
}

#[derive(Deserialize, Debug)]
pub struct RespMsg {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub images: Vec<ContentItem>,
}

impl Resp {
    pub fn first_image_url(&self) -> Option<&str> {
        self.choices.first()?.message.images.iter().find_map(
            |item| match item {
                ContentItem::Image { image_url } => Some(image_url.url.as_str()),
                _ => None,
            },
        )
    }

    /// Trimmed; `None` when blank.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()?
            .message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}
