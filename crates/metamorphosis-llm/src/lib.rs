pub mod openai;
pub mod retry;

use std::sync::Arc;

use metamorphosis_core::config::ModelConfig;
use metamorphosis_core::traits::ModelInvoker;

pub use openai::OpenAiInvoker;
pub use retry::RetryingInvoker;

/// Create a model invoker for the configured provider.
///
/// Every supported provider speaks the OpenAI chat completions protocol;
/// `provider` only selects the default endpoint.
pub fn create_invoker(config: &ModelConfig) -> Arc<dyn ModelInvoker> {
    let client = Box::new(OpenAiInvoker::new(config.clone()));
    match &config.retry {
        Some(retry) => Arc::new(RetryingInvoker::new(client, retry.clone())),
        None => Arc::from(client as Box<dyn ModelInvoker>),
    }
}
