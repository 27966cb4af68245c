//! Generate text through the studio backend and run it past the bouncer.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    bouncer::{self, ViolationReport},
    studio_api::{GenerateForm, GenerateOutput, GenerateRequest, StudioApiError, map_generate_body},
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("studio api error: {0}")]
    Api(#[from] StudioApiError),
    #[error("no text returned")]
    EmptyOutput,
}

/// Backend that turns a request (or a repair instruction) into text.
///
/// `extra` holds per-caller headers that override the backend's own identity.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        req: &GenerateRequest,
        extra: &HeaderMap,
    ) -> Result<GenerateOutput, StudioApiError>;

    async fn rewrite(&self, prompt: &str, extra: &HeaderMap) -> Result<String, StudioApiError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(
        &self,
        req: &GenerateRequest,
        extra: &HeaderMap,
    ) -> Result<GenerateOutput, StudioApiError> {
        (**self).generate(req, extra).await
    }

    async fn rewrite(&self, prompt: &str, extra: &HeaderMap) -> Result<String, StudioApiError> {
        (**self).rewrite(prompt, extra).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    pub text: String,
    /// Scan of the returned text, after repair and stripping.
    pub report: ViolationReport,
    pub repaired: bool,
    pub model: Option<String>,
}

pub struct GenerationPipeline<G> {
    generator: G,
    soft_stems: Vec<String>,
}

impl<G: TextGenerator> GenerationPipeline<G> {
    pub fn new(generator: G, soft_stems: Vec<String>) -> Self {
        Self {
            generator,
            soft_stems,
        }
    }

    pub async fn run(
        &self,
        form: &GenerateForm,
        extra: &HeaderMap,
    ) -> Result<GenerationOutcome, GenerationError> {
        let request = map_generate_body(form);
        let output = self.generator.generate(&request, extra).await?;
        let mut text = output.text;

        let first = bouncer::scan(&text, &self.soft_stems);
        let mut repaired = false;
        if first.has_hard() {
            info!(hard = ?first.hard, "Generated text broke hard rules, requesting one repair");
            let prompt = bouncer::build_repair_prompt(&text, &first.hard);
            let rewritten = self.generator.rewrite(&prompt, extra).await?;
            if rewritten.trim().is_empty() {
                warn!("Repair returned no text, keeping the original");
            } else {
                text = rewritten;
                repaired = true;
            }
        }

        let text = bouncer::strip_stems(&text, &self.soft_stems);
        if text.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }

        let report = bouncer::scan(&text, &self.soft_stems);
        if report.has_hard() {
            warn!(hard = ?report.hard, "Text still breaks hard rules after repair");
        }

        Ok(GenerationOutcome {
            text,
            report,
            repaired,
            model: output.model,
        })
    }
}
