//! Generator port - interface for text-generation backends.

use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::{Generation, GenerationContext};

/// A text-generation capability bound to one backing service.
///
/// Implementations enforce their own request timeout and must fail with a
/// descriptive error rather than return an empty completion. Streaming
/// backends collapse their output into a single final string.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Instance name used in provenance and logs.
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<Generation, GenerationError>;
}
