//! Rendering seam for bulk and single-card exports.
//!
//! Slide templates are JSON documents with one text variant per slide:
//! variant 0 is the no-attachment default and variants 1..N correspond to the
//! group's attachments in configuration order. The built-in
//! [`TextDeckRenderer`] substitutes the placeholder vocabulary into the
//! chosen variant; a presentation backend (PowerPoint, LibreOffice) plugs in
//! behind the same trait.

use std::borrow::Cow;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub const PLACEHOLDER_NET_ID: &str = "{{NET_ID}}";
pub const PLACEHOLDER_RECIPIENT_NAME: &str = "{{RECIPIENT_NAME}}";
pub const PLACEHOLDER_SENDER_NAME: &str = "{{SENDER_NAME}}";
pub const PLACEHOLDER_MESSAGE: &str = "{{MESSAGE}}";

/// Percent-complete updates emitted while a deck renders.
pub type ProgressSender = UnboundedSender<u32>;

#[derive(Debug, Clone, Serialize)]
pub struct SlideContent {
    pub net_id: String,
    pub recipient_name: String,
    pub sender_name: String,
    pub message: String,
    pub variant: usize,
}

#[derive(Debug, Deserialize)]
pub struct DeckTemplate {
    pub variants: Vec<String>,
}

impl DeckTemplate {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let template: DeckTemplate =
            serde_json::from_slice(bytes).context("template is not valid JSON")?;
        if template.variants.is_empty() {
            bail!("template has no slide variants");
        }
        Ok(template)
    }
}

#[async_trait]
pub trait DeckRenderer: Send + Sync + 'static {
    async fn render_deck(
        &self,
        template: &[u8],
        slides: &[SlideContent],
        progress: ProgressSender,
    ) -> Result<Vec<u8>>;

    async fn deck_to_document(&self, deck: &[u8]) -> Result<Vec<u8>>;

    fn deck_content_type(&self) -> &'static str;

    fn document_content_type(&self) -> &'static str;
}

#[derive(Serialize, Deserialize)]
struct RenderedSlide {
    variant: usize,
    text: String,
}

/// Placeholder-substitution renderer over JSON templates.
pub struct TextDeckRenderer;

impl TextDeckRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextDeckRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeckRenderer for TextDeckRenderer {
    async fn render_deck(
        &self,
        template: &[u8],
        slides: &[SlideContent],
        progress: ProgressSender,
    ) -> Result<Vec<u8>> {
        let template = DeckTemplate::parse(template)?;
        let total = slides.len().max(1);

        let mut rendered = Vec::with_capacity(slides.len());
        for (index, slide) in slides.iter().enumerate() {
            let text = render_slide(&template, slide)?;
            rendered.push(RenderedSlide {
                variant: slide.variant,
                text,
            });
            let percent = ((index + 1) * 100 / total) as u32;
            let _ = progress.send(percent);
        }

        Ok(serde_json::to_vec_pretty(&rendered)?)
    }

    async fn deck_to_document(&self, deck: &[u8]) -> Result<Vec<u8>> {
        let slides: Vec<RenderedSlide> =
            serde_json::from_slice(deck).context("deck is not a rendered slide list")?;
        let pages: Vec<&str> = slides.iter().map(|slide| slide.text.as_str()).collect();
        Ok(pages.join("\n\n\u{c}\n\n").into_bytes())
    }

    fn deck_content_type(&self) -> &'static str {
        "application/json"
    }

    fn document_content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}

pub fn render_slide(template: &DeckTemplate, slide: &SlideContent) -> Result<String> {
    let variant_text = template.variants.get(slide.variant).ok_or_else(|| {
        anyhow!(
            "template has {} variants but slide requires variant {}",
            template.variants.len(),
            slide.variant
        )
    })?;

    Ok(variant_text
        .replace(PLACEHOLDER_NET_ID, &slide.net_id)
        .replace(PLACEHOLDER_RECIPIENT_NAME, &slide.recipient_name)
        .replace(PLACEHOLDER_SENDER_NAME, &slide.sender_name)
        .replace(PLACEHOLDER_MESSAGE, &slide.message))
}

/// Local part of a campus email address.
pub fn net_id(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

#[derive(Debug)]
pub struct CsvRow {
    pub id: Uuid,
    pub created_at: NaiveDateTime,
    pub group_slug: String,
    pub sender_email: String,
    pub sender_name: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub body: String,
    pub attachment: Option<String>,
}

const CSV_HEADER: &str =
    "id,created_at,message_group,sender_email,sender_name,recipient_email,recipient_name,message,attachment";

pub fn cards_to_csv(rows: &[CsvRow]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in rows {
        let fields = [
            row.id.to_string(),
            row.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            row.group_slug.clone(),
            row.sender_email.clone(),
            row.sender_name.clone(),
            row.recipient_email.clone(),
            row.recipient_name.clone(),
            row.body.clone(),
            row.attachment.clone().unwrap_or_default(),
        ];
        let line: Vec<Cow<'_, str>> = fields.iter().map(|field| escape_csv(field)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn escape_csv(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(variant: usize) -> SlideContent {
        SlideContent {
            net_id: "abc123".to_string(),
            recipient_name: "Alex".to_string(),
            sender_name: "Sam".to_string(),
            message: "thanks for everything".to_string(),
            variant,
        }
    }

    #[test]
    fn substitutes_all_placeholders() {
        let template = DeckTemplate {
            variants: vec![
                "To {{RECIPIENT_NAME}} ({{NET_ID}}): {{MESSAGE}} -- {{SENDER_NAME}}".to_string(),
            ],
        };
        let text = render_slide(&template, &slide(0)).unwrap();
        assert_eq!(text, "To Alex (abc123): thanks for everything -- Sam");
    }

    #[test]
    fn rejects_variant_out_of_range() {
        let template = DeckTemplate {
            variants: vec!["{{MESSAGE}}".to_string()],
        };
        let err = render_slide(&template, &slide(3)).unwrap_err();
        assert!(err.to_string().contains("variant 3"));
    }

    #[test]
    fn template_must_have_variants() {
        assert!(DeckTemplate::parse(br#"{"variants": []}"#).is_err());
        assert!(DeckTemplate::parse(b"not json").is_err());
    }

    #[test]
    fn csv_quotes_embedded_commas_and_quotes() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn net_id_strips_domain() {
        assert_eq!(net_id("abc123@cornell.edu"), "abc123");
        assert_eq!(net_id("no-domain"), "no-domain");
    }

    #[tokio::test]
    async fn deck_renders_and_converts() {
        let renderer = TextDeckRenderer::new();
        let template = br#"{"variants": ["Default: {{MESSAGE}}", "Balloon: {{MESSAGE}}"]}"#;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let deck = renderer
            .render_deck(template, &[slide(0), slide(1)], tx)
            .await
            .unwrap();

        let mut last = 0;
        while let Ok(percent) = rx.try_recv() {
            last = percent;
        }
        assert_eq!(last, 100);

        let document = renderer.deck_to_document(&deck).await.unwrap();
        let text = String::from_utf8(document).unwrap();
        assert!(text.contains("Default: thanks for everything"));
        assert!(text.contains("Balloon: thanks for everything"));
    }
}
