//! One-call translate and preprocess.

use crate::preprocess::{PreprocessError, Preprocessor};
use crate::translate::{TranslateError, Translator};
use crate::tree::ProjectTree;
use tracing::instrument;
use trellis_framework::LibraryResolver;

/// Normalization error
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Projects could not be discovered
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The discovered projects are not a valid tree
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

/// Translate the projects and preprocess them into a tree
///
/// # Errors
///
/// Returns the translator's error or the preprocessing failure
#[instrument(skip_all)]
pub async fn normalize(
    translator: &dyn Translator,
    preprocessor: &Preprocessor,
    resolver: &dyn LibraryResolver,
) -> Result<ProjectTree, NormalizeError> {
    let raw = translator.translate().await?;
    Ok(preprocessor.preprocess(raw, resolver).await?)
}
