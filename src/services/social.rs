use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Multipart;
use image::{imageops::FilterType, DynamicImage, ImageFormat, Rgba, RgbaImage};
use lazy_static::lazy_static;
use reqwest::Client;
use resvg::{
    tiny_skia,
    usvg::{self, fontdb},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    config::Config,
    models::social::{GeneratedImage, PublishResult, PublishTarget, SocialTemplate},
    services::email::escape_html,
};

pub const IMAGE_SIZE: u32 = 1080;
const HEADLINE_CHARS: usize = 22;
const BODY_CHARS: usize = 40;
const MAX_HEADLINE_LINES: usize = 4;
const MAX_BODY_LINES: usize = 6;

lazy_static! {
    /// System fonts, scanned once per process.
    static ref FONTS: Arc<fontdb::Database> = Arc::new(load_fonts());
}

/// Parsed multipart form of the image generator.
pub struct SocialImageForm {
    pub headline: String,
    pub body: String,
    pub template: SocialTemplate,
    pub background: Vec<u8>,
}

impl SocialImageForm {
    pub async fn from_multipart(mut multipart: Multipart) -> anyhow::Result<Self> {
        let mut headline = String::new();
        let mut body = String::new();
        let mut template = SocialTemplate::default();
        let mut background: Option<Vec<u8>> = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "headline" => headline = field.text().await?,
                "body" => body = field.text().await?,
                "template" => template = field.text().await?.parse()?,
                "background" => background = Some(field.bytes().await?.to_vec()),
                _ => {}
            }
        }

        if headline.trim().is_empty() {
            anyhow::bail!("headline is required");
        }
        let background = background.context("background image is required")?;
        image::guess_format(&background).context("Unsupported background image")?;
        Ok(Self {
            headline,
            body,
            template,
            background,
        })
    }
}

pub struct SocialService;

impl SocialService {
    /// Compose the post as SVG, rasterize it to the PNG that gets published,
    /// and store both under `media_dir/social/` next to the tinted backdrop
    /// the SVG links to.
    pub async fn generate(config: &Config, form: SocialImageForm) -> anyhow::Result<GeneratedImage> {
        let id = Uuid::new_v4();
        let png_rel = format!("social/{id}.png");
        let svg_rel = format!("social/{id}.svg");
        let backdrop_name = format!("{id}-backdrop.png");

        let dir = Path::new(&config.media_dir).join("social");
        tokio::fs::create_dir_all(&dir).await?;

        let template = form.template;
        let svg = compose_svg(&form.headline, &form.body, &backdrop_name, template);
        let png = {
            let dir = dir.clone();
            let svg = svg.clone();
            let background = form.background;
            tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
                let backdrop = render_backdrop(&background, template)?;
                std::fs::write(dir.join(&backdrop_name), &backdrop)?;
                rasterize_svg(&svg, &dir)
            })
            .await
            .context("Social image render task panicked")??
        };

        tokio::fs::write(dir.join(format!("{id}.png")), &png).await?;
        tokio::fs::write(dir.join(format!("{id}.svg")), svg.as_bytes()).await?;
        tracing::info!(%id, bytes = png.len(), "Social image generated");

        Ok(GeneratedImage {
            png_url: config.media_url(&png_rel),
            svg_url: config.media_url(&svg_rel),
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
        })
    }
}

fn load_fonts() -> fontdb::Database {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    // Point generic families that resolve to nothing at any installed face.
    let fallback = db
        .faces()
        .next()
        .and_then(|face| face.families.first())
        .map(|(name, _)| name.clone());
    if let Some(name) = fallback {
        if !has_family(&db, fontdb::Family::Serif) {
            db.set_serif_family(name.clone());
        }
        if !has_family(&db, fontdb::Family::SansSerif) {
            db.set_sans_serif_family(name);
        }
    }

    if db.is_empty() {
        tracing::warn!("No system fonts found, social images will render without text");
    } else {
        tracing::debug!(faces = db.len(), "Loaded fonts for social images");
    }
    db
}

fn has_family(db: &fontdb::Database, family: fontdb::Family<'_>) -> bool {
    db.query(&fontdb::Query {
        families: &[family],
        ..fontdb::Query::default()
    })
    .is_some()
}

/// Rasterize an SVG document to PNG. Relative image links resolve against
/// `resources_dir`.
pub fn rasterize_svg(svg: &str, resources_dir: &Path) -> anyhow::Result<Vec<u8>> {
    let options = usvg::Options {
        resources_dir: Some(resources_dir.to_path_buf()),
        fontdb: FONTS.clone(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &options).context("Invalid SVG composition")?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .context("SVG has an empty canvas")?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    pixmap.encode_png().context("PNG encoding failed")
}

/// Square-crop the photo to the post size and lay the template tint over it.
pub fn render_backdrop(bytes: &[u8], template: SocialTemplate) -> anyhow::Result<Vec<u8>> {
    let photo = image::load_from_memory(bytes).context("Unsupported background image")?;
    let mut canvas = photo
        .resize_to_fill(IMAGE_SIZE, IMAGE_SIZE, FilterType::Lanczos3)
        .to_rgba8();
    tint(&mut canvas, template);

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Dark: black overlay deepening towards the bottom where the text sits.
/// Light: flat warm paper wash.
fn tint(canvas: &mut RgbaImage, template: SocialTemplate) {
    let height = canvas.height().max(1) as f32;
    for (_, y, pixel) in canvas.enumerate_pixels_mut() {
        let (overlay, alpha) = match template {
            SocialTemplate::Dark => ([20u8, 14, 10], 0.35 + 0.4 * (y as f32 / height)),
            SocialTemplate::Light => ([250u8, 244, 232], 0.55),
        };
        *pixel = blend(*pixel, overlay, alpha);
    }
}

fn blend(pixel: Rgba<u8>, overlay: [u8; 3], alpha: f32) -> Rgba<u8> {
    let mix = |base: u8, top: u8| -> u8 {
        (base as f32 * (1.0 - alpha) + top as f32 * alpha).round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        mix(pixel[0], overlay[0]),
        mix(pixel[1], overlay[1]),
        mix(pixel[2], overlay[2]),
        255,
    ])
}

/// Greedy word wrap; words longer than a line are hard-split. Lines beyond
/// `max_lines` are dropped and the last kept line gets an ellipsis.
pub fn wrap_text(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() { word.chars().count() } else { current.chars().count() + 1 + word.chars().count() };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.push('…');
        }
    }
    lines
}

pub fn compose_svg(headline: &str, body: &str, backdrop_href: &str, template: SocialTemplate) -> String {
    let (ink, accent) = match template {
        SocialTemplate::Dark => ("#fff8ec", "#f59e0b"),
        SocialTemplate::Light => ("#2b1d14", "#c2410c"),
    };
    let size = IMAGE_SIZE;

    let headline_lines = wrap_text(headline, HEADLINE_CHARS, MAX_HEADLINE_LINES);
    let body_lines = wrap_text(body, BODY_CHARS, MAX_BODY_LINES);

    // Text block is anchored to the bottom margin.
    let headline_height = headline_lines.len() as u32 * 72;
    let body_height = body_lines.len() as u32 * 46;
    let gap = if body_lines.is_empty() { 0 } else { 36 };
    let mut y = size - 96 - body_height - gap - headline_height + 60;

    let mut text = String::new();
    for line in &headline_lines {
        text.push_str(&format!(
            r#"  <text x="84" y="{y}" font-family="Georgia, serif" font-size="64" font-weight="700" fill="{ink}">{}</text>
"#,
            escape_html(line)
        ));
        y += 72;
    }
    y += gap;
    for line in &body_lines {
        text.push_str(&format!(
            r#"  <text x="84" y="{y}" font-family="Helvetica, Arial, sans-serif" font-size="34" fill="{ink}">{}</text>
"#,
            escape_html(line)
        ));
        y += 46;
    }

    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{size}" height="{size}" viewBox="0 0 {size} {size}">
  <image href="{href}" xlink:href="{href}" x="0" y="0" width="{size}" height="{size}" preserveAspectRatio="xMidYMid slice"/>
  <rect x="84" y="84" width="120" height="10" fill="{accent}"/>
{text}</svg>
"#,
        href = escape_html(backdrop_href)
    )
}

#[derive(Debug, Deserialize)]
struct GraphId {
    id: String,
    #[serde(default)]
    post_id: Option<String>,
}

/// Cross-posting through the Meta Graph API. Targets without credentials
/// are reported as stubbed instead of failing.
pub struct MetaPublisher {
    client: Client,
    api_base: String,
    access_token: Option<String>,
    page_id: Option<String>,
    instagram_account_id: Option<String>,
}

impl MetaPublisher {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_base: config.meta_api_base.trim_end_matches('/').to_string(),
            access_token: config.meta_access_token.clone(),
            page_id: config.meta_page_id.clone(),
            instagram_account_id: config.instagram_account_id.clone(),
        }
    }

    pub async fn publish(
        &self,
        image_url: &str,
        caption: &str,
        targets: &[PublishTarget],
    ) -> Vec<PublishResult> {
        let mut results = Vec::with_capacity(targets.len());
        for &target in targets {
            let account = match target {
                PublishTarget::Facebook => self.page_id.as_deref(),
                PublishTarget::Instagram => self.instagram_account_id.as_deref(),
            };
            let (Some(token), Some(account)) = (self.access_token.as_deref(), account) else {
                tracing::info!(?target, "Meta credentials missing, publish stubbed");
                results.push(PublishResult { target, stubbed: true, post_id: None, error: None });
                continue;
            };

            let outcome = match target {
                PublishTarget::Facebook => self.post_facebook(token, account, image_url, caption).await,
                PublishTarget::Instagram => self.post_instagram(token, account, image_url, caption).await,
            };
            results.push(match outcome {
                Ok(post_id) => PublishResult { target, stubbed: false, post_id: Some(post_id), error: None },
                Err(e) => {
                    tracing::warn!(?target, "Publish failed: {e}");
                    PublishResult { target, stubbed: false, post_id: None, error: Some(e.to_string()) }
                }
            });
        }
        results
    }

    async fn post_facebook(&self, token: &str, page_id: &str, url: &str, caption: &str) -> anyhow::Result<String> {
        let created: GraphId = self
            .graph_post(
                &format!("{}/{}/photos", self.api_base, page_id),
                &[("url", url), ("caption", caption), ("access_token", token)],
            )
            .await?;
        Ok(created.post_id.unwrap_or(created.id))
    }

    /// Instagram needs a media container first, then a publish call.
    async fn post_instagram(&self, token: &str, account: &str, url: &str, caption: &str) -> anyhow::Result<String> {
        let container: GraphId = self
            .graph_post(
                &format!("{}/{}/media", self.api_base, account),
                &[("image_url", url), ("caption", caption), ("access_token", token)],
            )
            .await?;
        let published: GraphId = self
            .graph_post(
                &format!("{}/{}/media_publish", self.api_base, account),
                &[("creation_id", container.id.as_str()), ("access_token", token)],
            )
            .await?;
        Ok(published.id)
    }

    async fn graph_post(&self, url: &str, form: &[(&str, &str)]) -> anyhow::Result<GraphId> {
        let response = self.client.post(url).form(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Graph API error {}: {}", status, text);
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_photo() -> Vec<u8> {
        let img = RgbaImage::from_pixel(320, 200, Rgba([200, 120, 60, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn publisher(base: &str, token: Option<&str>) -> MetaPublisher {
        MetaPublisher {
            client: Client::new(),
            api_base: base.to_string(),
            access_token: token.map(str::to_string),
            page_id: Some("page1".into()),
            instagram_account_id: Some("ig1".into()),
        }
    }

    #[test]
    fn backdrop_is_square_and_darkened() {
        let png = render_backdrop(&sample_photo(), SocialTemplate::Dark).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (IMAGE_SIZE, IMAGE_SIZE));
        let top = img.get_pixel(540, 0);
        let bottom = img.get_pixel(540, IMAGE_SIZE - 1);
        assert!(top[0] < 200);
        assert!(bottom[0] < top[0]);
    }

    #[test]
    fn garbage_background_is_rejected() {
        assert!(render_backdrop(b"not an image", SocialTemplate::Light).is_err());
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text("Midnight sauna by the harbour this Friday", 16, 5);
        assert_eq!(lines, ["Midnight sauna", "by the harbour", "this Friday"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 16));
    }

    #[test]
    fn overflowing_text_is_truncated_with_ellipsis() {
        let lines = wrap_text("one two three four five six", 3, 2);
        assert_eq!(lines, ["one", "two…"]);
        let split = wrap_text("supercalifragilistic", 8, 5);
        assert_eq!(split, ["supercal", "ifragili", "stic"]);
    }

    /// Writes a backdrop into `dir` and renders a post over it.
    fn render_post(dir: &Path, headline: &str, body: &str) -> RgbaImage {
        let backdrop = render_backdrop(&sample_photo(), SocialTemplate::Dark).unwrap();
        std::fs::write(dir.join("bg.png"), backdrop).unwrap();
        let svg = compose_svg(headline, body, "bg.png", SocialTemplate::Dark);
        let png = rasterize_svg(&svg, dir).unwrap();
        image::load_from_memory(&png).unwrap().to_rgba8()
    }

    #[test]
    fn rasterized_post_layers_backdrop_and_accent() {
        let dir = tempfile::tempdir().unwrap();
        let post = render_post(dir.path(), "Löyly", "");
        assert_eq!(post.dimensions(), (IMAGE_SIZE, IMAGE_SIZE));

        assert_eq!(post.get_pixel(140, 88), &Rgba([0xf5, 0x9e, 0x0b, 255]));

        let backdrop = image::load_from_memory(&std::fs::read(dir.path().join("bg.png")).unwrap())
            .unwrap()
            .to_rgba8();
        let (got, want) = (post.get_pixel(540, 300), backdrop.get_pixel(540, 300));
        for c in 0..3 {
            assert!(got[c].abs_diff(want[c]) <= 3, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn headline_changes_the_published_pixels() {
        if FONTS.is_empty() {
            eprintln!("no system fonts installed, text cannot be rasterized here");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let friday = render_post(dir.path(), "Midnight sauna Friday", "Harbour pier, 22:00");
        let sunday = render_post(dir.path(), "Family sauna Sunday", "Harbour pier, 22:00");
        assert_ne!(friday.as_raw(), sunday.as_raw());

        let plain = render_post(dir.path(), "", "");
        assert_ne!(friday.as_raw(), plain.as_raw());
    }

    #[test]
    fn broken_svg_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rasterize_svg("<svg", dir.path()).is_err());
    }

    #[test]
    fn svg_escapes_user_text() {
        let svg = compose_svg("Löyly & <vihta>", "", "a.png", SocialTemplate::Light);
        assert!(svg.contains("Löyly &amp; &lt;vihta&gt;"));
        assert!(svg.contains(r#"width="1080""#));
        assert!(!svg.contains("<vihta>"));
    }

    #[tokio::test]
    async fn missing_credentials_are_stubbed() {
        let results = publisher("http://unused", None)
            .publish("https://x/img.png", "hi", &[PublishTarget::Facebook, PublishTarget::Instagram])
            .await;
        assert!(results.iter().all(|r| r.stubbed && r.error.is_none()));
    }

    #[tokio::test]
    async fn instagram_creates_container_then_publishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ig1/media"))
            .and(body_string_contains("image_url="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "container9" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ig1/media_publish"))
            .and(body_string_contains("creation_id=container9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "post42" })))
            .expect(1)
            .mount(&server)
            .await;

        let results = publisher(&server.uri(), Some("tok"))
            .publish("https://x/img.png", "Friday!", &[PublishTarget::Instagram])
            .await;
        assert_eq!(results[0].post_id.as_deref(), Some("post42"));
        assert!(!results[0].stubbed);
    }

    #[tokio::test]
    async fn graph_errors_do_not_abort_other_targets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/page1/photos"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .mount(&server)
            .await;

        let mut p = publisher(&server.uri(), Some("tok"));
        p.instagram_account_id = None;
        let results = p
            .publish("https://x/img.png", "hi", &[PublishTarget::Facebook, PublishTarget::Instagram])
            .await;
        assert!(results[0].error.as_deref().unwrap().contains("400"));
        assert!(results[1].stubbed);
    }
}
