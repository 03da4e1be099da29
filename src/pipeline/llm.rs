//! The content synthesizer: page bitmap in, Markdown with placeholders out.
//!
//! [`Synthesizer`] is the seam between the pipeline and whatever model reads
//! the page. [`VlmSynthesizer`] is the production implementation over an
//! `edgequake-llm` provider; tests substitute canned implementations.
//!
//! There is no retry here. A model that is down or too slow fails the run
//! with the page and model named, and the user re-runs once it is back.

use crate::config::ConversionConfig;
use crate::error::Pdf2MdError;
use crate::model::EmbeddedImage;
use crate::pipeline::encode;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, IMAGE_DESCRIPTION_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Provider used when neither the config nor `EDGEQUAKE_LLM_PROVIDER` names one.
pub const DEFAULT_PROVIDER: &str = "ollama";

/// Why a synthesis call produced no Markdown.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Host unreachable, request rejected, or an empty/unusable answer.
    #[error("{0}")]
    Unavailable(String),

    /// No answer within the configured timeout.
    #[error("no response within {0}s")]
    Timeout(u64),

    /// The synthesizer cannot describe standalone images.
    #[error("image descriptions are not supported by this synthesizer")]
    Unsupported,
}

impl SynthesisError {
    /// Attach page and model to produce the fatal run error.
    pub fn into_page_error(self, page: usize, model: &str) -> Pdf2MdError {
        match self {
            SynthesisError::Timeout(secs) => Pdf2MdError::ModelTimeout {
                page,
                model: model.to_string(),
                secs,
            },
            other => Pdf2MdError::ModelUnavailable {
                page,
                model: model.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// Reads a rendered page and reconstructs it as Markdown.
///
/// Figures must be marked with image references whose destination contains
/// `placeholder` (e.g. `![Chart](image_placeholder)`), in reading order.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, bitmap: &DynamicImage, model: &str) -> Result<String, SynthesisError>;

    /// Short alt text for one extracted image.
    async fn describe_image(&self, image: &EmbeddedImage, model: &str) -> Result<String, SynthesisError> {
        let _ = (image, model);
        Err(SynthesisError::Unsupported)
    }
}

/// [`Synthesizer`] backed by an `edgequake-llm` vision provider.
///
/// The provider is bound to a model when it is built, so the `model`
/// argument of the [`Synthesizer`] calls cannot switch models. A call naming
/// a different model is logged and still answered by the bound one.
pub struct VlmSynthesizer {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl VlmSynthesizer {
    /// Wrap a pre-built provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Build the provider named by the config (or environment) for `config.model`.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, Pdf2MdError> {
        let provider_name = provider_name(config);
        info!("Using provider '{}' with model '{}'", provider_name, config.model);
        let provider = ProviderFactory::create_llm_provider(&provider_name, &config.model)
            .map_err(|e| Pdf2MdError::ProviderNotConfigured {
                provider: provider_name.clone(),
                hint: format!(
                    "{e}\nFor Ollama make sure the server is running (OLLAMA_HOST) and the model is pulled: ollama pull {}",
                    config.model
                ),
            })?;
        Ok(Self::new(provider, config))
    }

    /// Model the provider was built for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether `requested` is the bound model; warns when it is not.
    fn serves_model(&self, requested: &str) -> bool {
        if requested == self.model {
            return true;
        }
        warn!(
            "Model '{}' requested but the provider is bound to '{}'; using '{}'",
            requested, self.model, self.model
        );
        false
    }

    async fn ask(&self, system: &str, image: ImageData) -> Result<String, SynthesisError> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images("", vec![image]),
        ];

        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| SynthesisError::Unavailable(e.to_string()))?;

        debug!(
            "VLM answered in {:?} ({} input tokens, {} output tokens)",
            start.elapsed(),
            response.prompt_tokens,
            response.completion_tokens
        );
        Ok(response.content)
    }
}

#[async_trait]
impl Synthesizer for VlmSynthesizer {
    async fn synthesize(&self, bitmap: &DynamicImage, model: &str) -> Result<String, SynthesisError> {
        let image = encode::encode_page(bitmap)
            .map_err(|e| SynthesisError::Unavailable(format!("page image encoding failed: {e}")))?;
        self.serves_model(model);
        debug!(
            "Synthesizing {}x{} page with {}",
            bitmap.width(),
            bitmap.height(),
            self.model
        );
        self.ask(&self.system_prompt, image).await
    }

    async fn describe_image(&self, image: &EmbeddedImage, model: &str) -> Result<String, SynthesisError> {
        self.serves_model(model);
        debug!(
            "Describing page {} image {} with {}",
            image.page_number, image.index_in_page, self.model
        );
        let text = self
            .ask(IMAGE_DESCRIPTION_PROMPT, encode::encode_embedded(image))
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::Unavailable("empty description".into()));
        }
        Ok(text.to_string())
    }
}

/// `config.provider_name`, then `EDGEQUAKE_LLM_PROVIDER`, then Ollama.
pub fn provider_name(config: &ConversionConfig) -> String {
    config
        .provider_name
        .clone()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            std::env::var("EDGEQUAKE_LLM_PROVIDER")
                .ok()
                .filter(|p| !p.trim().is_empty())
        })
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
}

fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
