use crate::error::LlmError;

pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning exactly one vector per input in the same order.
    ///
    /// Callers are responsible for batching; implementations send the whole
    /// slice in one request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Configuration`] when provider settings are incomplete,
    /// and any other variant when the provider call or its response is unusable.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;

    fn name(&self) -> &str;
}
