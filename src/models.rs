use serde::{Serialize, Deserialize};
use serde_with::skip_serializing_none;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type ClientId = String;

/// The client's captured or uploaded photo. One per pipeline run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceImage {
    pub image_data: String, // base64
    pub mime_type: String,
}

impl SourceImage {
    pub fn new(image_data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { image_data: image_data.into(), mime_type: mime_type.into() }
    }

    pub fn is_usable(&self) -> bool {
        !self.image_data.trim().is_empty() && self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StyleSource {
    BuiltIn,
    UserAuthored,
}

/// A catalog entry used to seed one generation call.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StyleDescriptor {
    pub id: String,
    pub display_name: String,
    pub text_prompt: String,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default = "default_source")]
    pub source: StyleSource,
}

fn default_source() -> StyleSource { StyleSource::BuiltIn }

/// Reference sub-images supplied with a user-authored style.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StyleReferenceBundle {
    pub front: Option<String>,
    pub back: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
    pub top: Option<String>,
}

impl StyleReferenceBundle {
    pub fn is_empty(&self) -> bool {
        self.front.is_none() && self.back.is_none() && self.left.is_none() && self.right.is_none() && self.top.is_none()
    }

    pub fn for_view(&self, view: ViewLabel) -> Option<&String> {
        match view {
            ViewLabel::Side => self.left.as_ref(),
            ViewLabel::Angled => self.right.as_ref(),
            ViewLabel::Back => self.back.as_ref(),
        }
    }
}

/// One output of a single gateway call. Always carries the prompt that produced it.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedImage {
    pub image_data: String,
    pub prompt_used: String,
    pub style_id: String,
    pub style_name: String,
    pub origin_style_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViewLabel {
    Side,
    Angled,
    Back,
}

impl ViewLabel {
    pub const ALL: [ViewLabel; 3] = [ViewLabel::Side, ViewLabel::Angled, ViewLabel::Back];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewLabel::Side => "side",
            ViewLabel::Angled => "angled",
            ViewLabel::Back => "back",
        }
    }
}

impl std::fmt::Display for ViewLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AngleView {
    pub view_label: ViewLabel,
    pub image_data: String,
}

/// The persisted result of one completed run. Never mutated after creation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Lookbook {
    pub id: Uuid,
    pub client_id: ClientId,
    pub source_image: SourceImage,
    pub base_style: GeneratedImage,
    pub final_image: GeneratedImage,
    pub angle_views: Vec<AngleView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// --- Request bodies ---

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SelectClientRequest {
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub name: Option<String>, // create a new client when no id is given
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureFailedRequest {
    pub message: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PhotoRequest {
    pub image_data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BaseStyleRequest {
    pub index: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModifierRequest {
    pub modifier: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewClientRequest {
    pub name: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewStyleRequest {
    pub display_name: String,
    pub text_prompt: String,
    #[serde(default)]
    pub references: Option<StyleReferenceBundle>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LookbookQuery {
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_bundle_maps_views_to_sub_images() {
        let bundle = StyleReferenceBundle {
            left: Some("L".into()),
            back: Some("B".into()),
            ..Default::default()
        };
        assert_eq!(bundle.for_view(ViewLabel::Side).map(String::as_str), Some("L"));
        assert_eq!(bundle.for_view(ViewLabel::Angled), None);
        assert_eq!(bundle.for_view(ViewLabel::Back).map(String::as_str), Some("B"));
        assert!(!bundle.is_empty());
        assert!(StyleReferenceBundle::default().is_empty());
    }

    #[test]
    fn source_image_requires_data_and_image_mime() {
        assert!(SourceImage::new("aGk=", "image/png").is_usable());
        assert!(!SourceImage::new("   ", "image/png").is_usable());
        assert!(!SourceImage::new("aGk=", "text/plain").is_usable());
    }

    #[test]
    fn style_source_defaults_to_built_in() {
        let style: StyleDescriptor = serde_json::from_str(
            r#"{"id":"bob","display_name":"Bob","text_prompt":"a bob cut"}"#,
        ).unwrap();
        assert_eq!(style.source, StyleSource::BuiltIn);
        assert!(style.reference_image.is_none());
    }
}
