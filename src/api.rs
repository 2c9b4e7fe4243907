//! LLM access with exponential backoff.
//!
//! The summarization stage talks to an OpenAI-compatible endpoint through
//! `awful_aj`. Calls go through the [`AskAsync`] trait so the retry
//! decorator and the stage itself can be exercised without a server.
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to every delay

use crate::config::LlmConfig;
use crate::error::PipelineError;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, config_dir, template, template::ChatTemplate};
use rand::{rng, Rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Something that answers a prompt.
pub trait AskAsync {
    type Response;

    /// Send `text` and wait for the answer.
    ///
    /// # Arguments
    ///
    /// * `text` - The prompt body, usually one headline digest
    ///
    /// # Returns
    ///
    /// The model's answer, or an error if the request failed.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Delay before retry number `attempt` (1-based), without jitter.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay)
/// ```
///
/// # Arguments
///
/// * `base` - Delay before the first retry
/// * `max` - Upper bound for any single delay
/// * `attempt` - Retry number, starting at 1
///
/// # Returns
///
/// The delay to sleep before `attempt`. Saturates instead of overflowing.
pub fn backoff_delay(base: StdDuration, max: StdDuration, attempt: usize) -> StdDuration {
    let shift = attempt.saturating_sub(1).min(31) as u32;
    base.saturating_mul(1u32 << shift).min(max)
}

/// Retries the wrapped [`AskAsync`] with exponential backoff and jitter.
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Wrap `inner` with a 30 second delay cap.
    ///
    /// # Arguments
    ///
    /// * `inner` - The client to retry
    /// * `max_retries` - Retries after the first failure (5 for the live client)
    /// * `base_delay` - Delay before the first retry (1 second for the live client)
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = backoff_delay(self.base_delay, self.max_delay, attempt)
                        + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `awful_aj` client bound to one configuration and chat template.
pub struct AwfulClient {
    config: AwfulJadeConfig,
    template: ChatTemplate,
    template_name: String,
}

impl fmt::Debug for AwfulClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulClient")
            .field("template", &self.template_name)
            .finish()
    }
}

impl AwfulClient {
    /// Load the chat template and client configuration named by `llm`.
    ///
    /// # Arguments
    ///
    /// * `llm` - Template name and optional config path; without a path the
    ///   `config.yaml` in the `awful_aj` config directory is used
    ///
    /// # Returns
    ///
    /// A ready client, or an error if the template or configuration cannot be loaded.
    #[instrument(level = "info", skip_all, fields(template = %llm.template))]
    pub async fn load(llm: &LlmConfig) -> Result<Self, Box<dyn Error>> {
        let template = template::load_template(&llm.template).await?;
        let conf_file = match &llm.config_path {
            Some(path) => path.clone(),
            None => config_dir()?.join("config.yaml"),
        };
        let config_path = conf_file
            .to_str()
            .ok_or_else(|| PipelineError::Llm(format!("not a valid config filename: {}", conf_file.display())))?;
        let config = awful_aj::config::load_config(config_path)?;
        info!(config_path, "Loaded LLM configuration");
        Ok(AwfulClient {
            config,
            template,
            template_name: llm.template.clone(),
        })
    }

    /// The client wrapped in the standard retry policy.
    pub fn with_backoff(self) -> RetryAsk<AwfulClient> {
        RetryAsk::new(self, 5, StdDuration::from_secs(1))
    }
}

impl AskAsync for AwfulClient {
    type Response = String;

    #[instrument(level = "debug", skip_all, fields(bytes = text.len()))]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        match ask(&self.config, text.to_string(), &self.template, None, None).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "API call failed");
                Err(PipelineError::Llm(e.to_string()).into())
            }
        }
    }
}
