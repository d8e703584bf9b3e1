use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use metamorphosis_core::config::RetryConfig;
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::ModelInvoker;
use metamorphosis_core::types::{ModelReply, ModelRequest};

/// A model invoker that retries transient request failures with backoff.
pub struct RetryingInvoker {
    inner: Box<dyn ModelInvoker>,
    retry_config: RetryConfig,
}

impl RetryingInvoker {
    pub fn new(inner: Box<dyn ModelInvoker>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &MetamorphosisError) -> bool {
    match e {
        MetamorphosisError::ModelRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelInvoker for RetryingInvoker {
    fn invoke(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelReply>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.invoke(request.clone()).await {
                    Ok(reply) => return Ok(reply),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
