//! Request body of the `generateContent` endpoint.
//!
//! Fields borrow from the job so reference images are not copied for
//! every prompt of a batch.

use serde::Serialize;

/// Response modality requested for image generation.
const MODALITY_IMAGE: &str = "Image";

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest<'a> {
    pub contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
pub struct Content<'a> {
    pub parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
pub struct InlineData<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig<'a> {
    pub response_modalities: Vec<&'a str>,
    pub image_config: ImageConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig<'a> {
    pub aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<&'a str>,
}

impl<'a> GenerateContentRequest<'a> {
    /// Single-turn request: the prompt text followed by every reference image.
    pub fn new(
        prompt: &'a str,
        images: impl IntoIterator<Item = (&'a str, &'a str)>,
        aspect_ratio: &'a str,
        image_size: Option<&'a str>,
    ) -> Self {
        let mut parts = vec![Part::Text { text: prompt }];
        parts.extend(images.into_iter().map(|(mime_type, data)| Part::InlineData {
            inline_data: InlineData { mime_type, data },
        }));

        Self {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec![MODALITY_IMAGE],
                image_config: ImageConfig {
                    aspect_ratio,
                    image_size,
                },
            },
        }
    }
}
