use std::{
    fmt::Debug,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
};

use anyhow::Context;

use crate::quota::DAILY_LIMIT;

pub static GLOBAL: LazyLock<Arc<Conf>> = LazyLock::new(|| {
    let conf = read_or_create_default().unwrap_or_else(|error| {
        panic!("Failed to initialize global config: {error:?}")
    });
    Arc::new(conf)
});

#[must_use]
pub fn global() -> Arc<Conf> {
    (*GLOBAL).clone()
}

// Plain values first, then tables, so the file serializes cleanly.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Conf {
    #[serde(
        serialize_with = "serialize_log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: tracing::Level,
    pub addr: IpAddr,
    pub port: u16,
    pub daily_limit: u32,
    pub allowed_origins: Vec<String>,
    pub jwt: Jwt,
    pub upstream: Upstream,
    pub tls: Option<Tls>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            addr: IpAddr::from([127, 0, 0, 1]),
            port: 3001,
            daily_limit: DAILY_LIMIT,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "https://localhost:3000".to_string(),
            ],
            jwt: Jwt::default(),
            upstream: Upstream::default(),
            tls: None,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct Jwt {
    pub secret: String,
    pub audience: String,
    pub issuer: String,
}

impl Default for Jwt {
    fn default() -> Self {
        Self {
            secret: "super-secret".to_string(),
            audience: "authenticated".to_string(),
            issuer: "https://bright-kitten-41.clerk.accounts.dev".to_string(),
        }
    }
}

impl Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt")
            .field("secret", &"<XXXXX>")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// OpenAI-compatible chat-completions service doing the actual work.
#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct Upstream {
    pub base_url: String,
    pub auth_token: String,
    pub image_model: String,
    pub text_model: String,
    pub default_resolution: String,
    /// Seconds.
    pub timeout: f32,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            auth_token: String::new(),
            image_model: "google/gemini-2.5-flash-image-preview:free"
                .to_string(),
            text_model: "gpt-4o-mini".to_string(),
            default_resolution: "1280x720".to_string(),
            timeout: 120.0,
        }
    }
}

impl Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<XXXXX>")
            .field("image_model", &self.image_model)
            .field("text_model", &self.text_model)
            .field("default_resolution", &self.default_resolution)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn serialize_log_level<S>(
    level: &tracing::Level,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = level.to_string();
    serializer.serialize_str(&s)
}

fn deserialize_log_level<'de, D>(
    deserializer: D,
) -> Result<tracing::Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

pub fn read_or_create_default() -> anyhow::Result<Conf> {
    let path = "conf/conf.toml";
    read_or_create_default_(path).context(path)
}

pub fn read_or_create_default_<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<Conf> {
    let path = path.as_ref();
    let conf = if fs::exists(path)? {
        let s = fs::read_to_string(path)?;
        toml::from_str(&s)?
    } else {
        if let Some(parent) = path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for conf file: {path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let conf = Conf::default();
        let s = toml::to_string_pretty(&conf)?;
        fs::write(path, s)?;
        conf
    };
    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::{read_or_create_default_, Conf, Tls};

    #[test]
    fn default_is_written_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("conf.toml");

        let created = read_or_create_default_(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.daily_limit, 5);
        assert!(created.tls.is_none());

        let read = read_or_create_default_(&path).unwrap();
        assert_eq!(read.port, created.port);
        assert_eq!(read.log_level, tracing::Level::INFO);
        assert_eq!(read.upstream.default_resolution, "1280x720");
        assert_eq!(read.jwt.issuer, created.jwt.issuer);
    }

    #[test]
    fn existing_file_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.toml");
        let conf = Conf {
            log_level: tracing::Level::DEBUG,
            daily_limit: 2,
            tls: Some(Tls {
                cert_file: "cert.pem".into(),
                key_file: "key.pem".into(),
            }),
            ..Conf::default()
        };
        std::fs::write(&path, toml::to_string(&conf).unwrap()).unwrap();

        let read = read_or_create_default_(&path).unwrap();
        assert_eq!(read.log_level, tracing::Level::DEBUG);
        assert_eq!(read.daily_limit, 2);
        assert_eq!(
            read.tls.map(|tls| tls.key_file),
            Some("key.pem".into())
        );
    }

    #[test]
    fn secrets_are_redacted() {
        let mut conf = Conf::default();
        conf.jwt.secret = "hunter2".to_string();
        conf.upstream.auth_token = "sk-hunter2".to_string();
        let shown = format!("{conf:?}");
        assert!(!shown.contains("hunter2"));
    }
}
