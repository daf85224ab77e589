//! The transform chain consumed by `BatchProcessor`: binary detection,
//! `{{variable}}` substitution, and optional source-to-target repo-name
//! rewriting. One trait, one default implementation — callers needing AI
//! text generation or project-specific rewrites supply their own.

use bcast_core::config::Transform;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("transform produced non-utf8 output for a non-binary file: {path}")]
    NonUtf8 { path: String },
}

#[derive(Debug, Clone)]
pub struct TransformContext {
    pub source_repo: String,
    pub target_repo: String,
    pub target_branch: String,
    pub file_path: String,
    pub transform: Transform,
}

/// Bytes containing a null byte within the first 8000 (git's own heuristic)
/// are treated as binary and pass through untouched.
const BINARY_SNIFF_WINDOW: usize = 8000;

pub fn looks_binary(content: &[u8]) -> bool {
    content
        .iter()
        .take(BINARY_SNIFF_WINDOW)
        .any(|byte| *byte == 0)
}

pub trait TransformChain: Send + Sync {
    fn transform(&self, content: &[u8], ctx: &TransformContext) -> Result<Vec<u8>, TransformError>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultTransformChain;

impl TransformChain for DefaultTransformChain {
    fn transform(&self, content: &[u8], ctx: &TransformContext) -> Result<Vec<u8>, TransformError> {
        if looks_binary(content) {
            return Ok(content.to_vec());
        }

        let mut text = String::from_utf8(content.to_vec()).map_err(|_| TransformError::NonUtf8 {
            path: ctx.file_path.clone(),
        })?;

        if ctx.transform.repo_name && !ctx.source_repo.is_empty() {
            text = text.replace(&ctx.source_repo, &ctx.target_repo);
            if let (Some(source_name), Some(target_name)) = (
                ctx.source_repo.rsplit('/').next(),
                ctx.target_repo.rsplit('/').next(),
            ) {
                if !source_name.is_empty() {
                    text = text.replace(source_name, target_name);
                }
            }
        }

        for (token, value) in &ctx.transform.variables {
            text = text.replace(&format!("{{{{{token}}}}}"), value);
        }

        Ok(text.into_bytes())
    }
}
