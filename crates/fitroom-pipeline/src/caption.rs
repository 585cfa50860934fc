//! Garment descriptions and campaign captions.
//!
//! Two error policies live side by side here:
//!
//! - [`CaptionService::describe_garment`] feeds the person-generation
//!   prompt, so a failure propagates as a [`CaptionError`].
//! - Call sites that only produce caption text for display degrade to an
//!   error string and never fail the surrounding flow.

use std::sync::Arc;

use crate::types::{GarmentKind, RgbImage};

/// Shown when captioning is requested before any result exists.
pub const NO_RESULT_MESSAGE: &str = "Please generate a try-on result first.";

/// Prefix of the degraded caption text.
pub const CAPTION_ERROR_PREFIX: &str = "Error generating caption: ";

const UPPER_PROMPT: &str = "You are a world class fashion designer. \
Write a detailed description of the upper body garment shown in the image, \
focusing on its fit, sleeve style, fabric type, neckline, and any notable \
design elements or features, in one or two lines. \
Do not start with \"This image shows a pair of beige cargo ...\"; \
start with \"a pair of beige cargo ...\" instead.";

const LOWER_PROMPT: &str = "You are a world class fashion designer. \
Write a detailed description of the lower body garment shown in the image, \
focusing on its fit, fabric type, waist style, and any notable design \
elements or features, in one or two lines. \
Do not start with \"This image shows a pair of beige cargo ...\"; \
start with \"a pair of beige cargo ...\" instead.";

const OVERALL_PROMPT: &str = "You are a world class fashion designer. \
Write a detailed description of the overall garment shown in the image, \
focusing on its fit, fabric type, sleeve style, neckline, and any notable \
design elements or features, in one or two lines. \
Do not start with \"This image shows a pair of beige cargo ...\"; \
start with \"a pair of beige cargo ...\" instead.";

const CAMPAIGN_PROMPT: &str = "You are a world-class marketing expert. \
Create engaging, professional, and contextually relevant campaign captions \
based on the details provided. Use creative language to highlight the \
product's key features and align with the campaign's goals. Tailor the \
captions to the advertising context provided.";

const IMAGE_CAPTION_PROMPT: &str = "You are a world class campaign generator \
for the clothes the model is wearing. Create engaging campaign captions for \
the product in the image, suitable for Instagram stories, that attract, \
convert and retain customers.";

/// Failure of the vision-language collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptionError {
    /// The provider rejected or failed the request.
    #[error("{0}")]
    Provider(String),

    /// The provider answered with no text.
    #[error("empty response from vision-language service")]
    EmptyResponse,
}

/// User content of a vision-language request.
#[derive(Debug, Clone, Copy)]
pub enum CaptionInput<'a> {
    /// An image to look at.
    Image(&'a RgbImage),
    /// Plain text.
    Text(&'a str),
}

/// Vision-language completion service.
pub trait VisionLanguage: Send + Sync {
    /// Complete one request under `system_prompt`.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptionError`] if the provider fails.
    fn complete(&self, system_prompt: &str, input: CaptionInput<'_>)
    -> Result<String, CaptionError>;
}

/// The system prompt used to describe a garment of `kind`.
#[must_use]
pub const fn description_prompt(kind: GarmentKind) -> &'static str {
    match kind {
        GarmentKind::Upper => UPPER_PROMPT,
        GarmentKind::Lower => LOWER_PROMPT,
        GarmentKind::Overall => OVERALL_PROMPT,
    }
}

/// The user message for campaign captions.
#[must_use]
pub fn campaign_request(product_description: &str, campaign_context: &str) -> String {
    format!(
        "Campaign Context: {campaign_context}\n\
         Product Description: {product_description}\n\
         Generate captivating captions for this campaign that align with the provided context."
    )
}

/// Caption text for a failure, as shown to the user.
#[must_use]
pub fn degraded(error: &CaptionError) -> String {
    format!("{CAPTION_ERROR_PREFIX}{error}")
}

/// Captioning over a [`VisionLanguage`] collaborator.
#[derive(Clone)]
pub struct CaptionService {
    provider: Arc<dyn VisionLanguage>,
}

impl CaptionService {
    /// Create a service backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn VisionLanguage>) -> Self {
        Self { provider }
    }

    /// Describe the garment in `image` in one or two lines.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`CaptionError`], and returns
    /// [`CaptionError::EmptyResponse`] for a blank answer.
    #[tracing::instrument(skip(self, image))]
    pub fn describe_garment(
        &self,
        image: &RgbImage,
        kind: GarmentKind,
    ) -> Result<String, CaptionError> {
        self.ask(description_prompt(kind), CaptionInput::Image(image))
    }

    /// Campaign captions for a described product.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`CaptionError`].
    pub fn campaign_captions(
        &self,
        product_description: &str,
        campaign_context: &str,
    ) -> Result<String, CaptionError> {
        let request = campaign_request(product_description, campaign_context);
        self.ask(CAMPAIGN_PROMPT, CaptionInput::Text(&request))
    }

    /// Caption a finished result directly. Never fails.
    #[must_use]
    pub fn caption_image(&self, image: Option<&RgbImage>) -> String {
        let Some(image) = image else {
            return NO_RESULT_MESSAGE.to_owned();
        };
        self.ask(IMAGE_CAPTION_PROMPT, CaptionInput::Image(image))
            .unwrap_or_else(|e| degraded(&e))
    }

    /// Describe the garment and write campaign captions for it. Never
    /// fails; any provider error becomes the caption text.
    #[must_use]
    pub fn captions_for_submission(
        &self,
        garment: &RgbImage,
        kind: GarmentKind,
        campaign_context: &str,
    ) -> String {
        self.describe_garment(garment, kind)
            .and_then(|description| self.campaign_captions(&description, campaign_context))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "captioning failed, degrading to message");
                degraded(&e)
            })
    }

    fn ask(&self, system_prompt: &str, input: CaptionInput<'_>) -> Result<String, CaptionError> {
        let text = self.provider.complete(system_prompt, input)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CaptionError::EmptyResponse);
        }
        Ok(text.to_owned())
    }
}
