//! Backend trait

use crate::bundle::Bundle;
use crate::error::SandboxResult;
use async_trait::async_trait;

/// Sandbox execution collaborator
///
/// One shared backend runtime instance. Implementations may assume they are
/// never invoked concurrently: every operation needs `&mut self`, and the
/// request consumer is the sole owner once serving starts.
#[async_trait]
pub trait Backend: Send + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Install a downloaded bundle into the runtime
    async fn install(&mut self, bundle: Bundle) -> SandboxResult<()>;

    /// Run the backend with serialized parameters, returning the serialized result
    ///
    /// A fault leaves no guarantee about remaining runtime state.
    async fn execute_backend(&mut self, parameters: &str) -> SandboxResult<String>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn install(&mut self, bundle: Bundle) -> SandboxResult<()> {
        (**self).install(bundle).await
    }

    async fn execute_backend(&mut self, parameters: &str) -> SandboxResult<String> {
        (**self).execute_backend(parameters).await
    }
}
