use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocialTemplate {
    #[default]
    Dark,
    Light,
}

impl std::str::FromStr for SocialTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "dark" => Ok(SocialTemplate::Dark),
            "light" => Ok(SocialTemplate::Light),
            other => Err(anyhow::anyhow!("Unknown template: {other}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GeneratedImage {
    pub png_url: String,
    pub svg_url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublishTarget {
    Facebook,
    Instagram,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub image_url: String,
    pub caption: String,
    #[serde(default = "default_targets")]
    pub targets: Vec<PublishTarget>,
}

fn default_targets() -> Vec<PublishTarget> {
    vec![PublishTarget::Facebook, PublishTarget::Instagram]
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PublishResult {
    pub target: PublishTarget,
    pub stubbed: bool,
    pub post_id: Option<String>,
    pub error: Option<String>,
}
