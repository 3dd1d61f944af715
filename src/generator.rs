use std::{fmt, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};
use reqwest::Client;

use crate::{
    chat::{self, ContentItem, ImageUrl, Msg, MsgContent},
    conf,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow!("Expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = width.parse().context("Invalid width")?;
        let height: u32 = height.parse().context("Invalid height")?;
        if width == 0 || height == 0 {
            bail!("Resolution must be non-zero, got {s:?}");
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub prompt: String,
    pub image_url: Option<String>,
    pub resolution: Resolution,
}

#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    /// URL (possibly a `data:` URL) of the generated image.
    async fn generate(&self, generation: &Generation) -> anyhow::Result<String>;
}

#[async_trait::async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Talks to any OpenAI-compatible chat-completions endpoint; OpenRouter by
/// default.
pub struct OpenRouter {
    client: Client,
    conf: conf::Upstream,
}

impl OpenRouter {
    pub fn new(conf: conf::Upstream) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f32(conf.timeout))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, conf })
    }

    async fn complete(&self, req: &chat::Req) -> anyhow::Result<chat::Resp> {
        let url = format!(
            "{}/chat/completions",
            self.conf.base_url.trim_end_matches('/')
        );
        tracing::debug!(?url, model = ?req.model, "Forwarding request upstream.");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.conf.auth_token)
            .json(req)
            .send()
            .await
            .context(format!("Failed to send request to {url:?}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Upstream responded with {status}: {body}");
        }
        response
            .json::<chat::Resp>()
            .await
            .context("Failed to parse upstream response")
    }
}

#[async_trait::async_trait]
impl ImageGenerator for OpenRouter {
    #[tracing::instrument(skip_all, fields(resolution = %generation.resolution))]
    async fn generate(&self, generation: &Generation) -> anyhow::Result<String> {
        let req = image_request(&self.conf.image_model, generation);
        let resp = self.complete(&req).await?;
        let url = resp
            .first_image_url()
            .ok_or_else(|| anyhow!("Upstream response contained no image"))?;
        tracing::info!(url_length = url.len(), "Image generated.");
        Ok(url.to_string())
    }
}

#[async_trait::async_trait]
impl PromptEnhancer for OpenRouter {
    #[tracing::instrument(skip_all)]
    async fn enhance(&self, prompt: &str) -> anyhow::Result<String> {
        let req = enhance_request(&self.conf.text_model, prompt);
        let resp = self.complete(&req).await?;
        let text = resp
            .first_text()
            .ok_or_else(|| anyhow!("Upstream response contained no text"))?;
        Ok(text.to_string())
    }
}

fn image_request(model: &str, generation: &Generation) -> chat::Req {
    let Generation {
        prompt,
        image_url,
        resolution,
    } = generation;
    let system = format!(
        "You are a professional YouTube thumbnail designer. \
        Always generate high-quality thumbnails with:\n\
        - Correct resolution: {resolution}\n\
        - Bold, readable text that stands out\n\
        - Strong visual hierarchy\n\
        - High contrast and vibrant colors\n\
        - Composition optimized for YouTube CTR\n\
        - If a human photo is provided, place them prominently with good lighting.\n\
        - Leave space for title text if applicable.\n\
        - Give extra focus on resolution, it should be {resolution}"
    );
    let mut user = vec![ContentItem::Text {
        text: format!(
            "Generate a {resolution} thumbnail for: {prompt}. \
            Use the provided image if relevant."
        ),
    }];
    if let Some(url) = image_url {
        user.push(ContentItem::Image {
            image_url: ImageUrl { url: url.clone() },
        });
    }
    chat::Req {
        model: model.to_string(),
        messages: vec![
            Msg::system(MsgContent::Array(vec![ContentItem::Text {
                text: system,
            }])),
            Msg::user(MsgContent::Array(user)),
        ],
        modalities: Some(vec!["image".to_string()]),
        size: Some(resolution.to_string()),
    }
}

fn enhance_request(model: &str, prompt: &str) -> chat::Req {
    let system = "You are an expert prompt engineer. \
        Improve and rewrite the user prompt for maximum creativity, \
        clarity, and effectiveness without changing its intent.";
    chat::Req {
        model: model.to_string(),
        messages: vec![
            Msg::system(MsgContent::String(system.to_string())),
            Msg::user(MsgContent::String(prompt.to_string())),
        ],
        modalities: None,
        size: None,
    }
}
