//! Batch and single-report classification.
//!
//! Every report handed in comes back with exactly one classification, in
//! input order, whichever path produced it.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;

use crate::analyze::chat::{ChatMessage, ChatRequest, DynChatTransport};
use crate::analyze::parse;
use crate::analyze::prompt;
use crate::analyze::rate_limit::RateLimiter;
use crate::analyze::retry::{RetryFailure, RetryPolicy};
use crate::analyze::types::{
    Classification, ClassifiedReport, RUN_CANCELLED, UNPARSEABLE_RESPONSE,
};
use crate::config::Tuning;
use crate::error::ClassifyError;
use crate::ingest::types::ReportRecord;

const TEMPERATURE: f32 = 0.3;

/// Result of one successful batch request. Both variants hold one
/// classification per chunk member, in chunk order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    FullyClassified(Vec<Classification>),
    /// Some keys were missing or malformed; `defaulted` lists their chunk positions.
    PartialWithFallback {
        classifications: Vec<Classification>,
        defaulted: Vec<usize>,
    },
}

impl BatchOutcome {
    pub fn into_classifications(self) -> Vec<Classification> {
        match self {
            BatchOutcome::FullyClassified(v) => v,
            BatchOutcome::PartialWithFallback {
                classifications, ..
            } => classifications,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub model: String,
    pub min_delay: Duration,
    pub backoff_unit: Duration,
    pub max_attempts: u32,
    pub single_timeout: Duration,
    pub batch_timeout: Duration,
}

impl ClassifierSettings {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            model: t.classifier_model.clone(),
            min_delay: t.min_delay(),
            backoff_unit: t.backoff_unit(),
            max_attempts: t.max_attempts,
            ..Self::default()
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model: "glm-4.7".to_string(),
            min_delay: Duration::from_secs(1),
            backoff_unit: Duration::from_secs(1),
            max_attempts: 3,
            single_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(60),
        }
    }
}

pub struct Classifier {
    transport: DynChatTransport,
    limiter: RateLimiter,
    single_policy: RetryPolicy,
    batch_policy: RetryPolicy,
    settings: ClassifierSettings,
    cancel: CancellationToken,
}

impl Classifier {
    pub fn new(
        transport: DynChatTransport,
        settings: ClassifierSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(settings.min_delay),
            single_policy: RetryPolicy::single_item(settings.max_attempts, settings.backoff_unit),
            batch_policy: RetryPolicy::batch(settings.max_attempts, settings.backoff_unit),
            transport,
            settings,
            cancel,
        }
    }

    fn chat_request(&self, user_prompt: String, timeout: Duration) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(prompt::SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            temperature: TEMPERATURE,
            stream: false,
            timeout,
        }
    }

    /// Rate-limited outbound call. Every attempt, retries included, goes through here.
    async fn send(&self, req: &ChatRequest, mode: &'static str) -> Result<String, ClassifyError> {
        if self.cancel.is_cancelled() {
            return Err(ClassifyError::Cancelled);
        }
        tokio::select! {
            _ = self.limiter.wait() => {}
            _ = self.cancel.cancelled() => return Err(ClassifyError::Cancelled),
        }

        counter!("classify_requests_total", "mode" => mode).increment(1);
        let t0 = Instant::now();
        let out = self.transport.complete(req).await;
        histogram!("classify_request_ms", "mode" => mode).record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    /// Classify one report. Always returns a classification; failures become
    /// the medium/neutral default with the error named in `reasoning`.
    pub async fn classify(
        &self,
        title: &str,
        report_type: &str,
        primary_topic: Option<&str>,
    ) -> Classification {
        let req = self.chat_request(
            prompt::single(title, report_type, primary_topic),
            self.settings.single_timeout,
        );
        let req = &req;
        match self
            .single_policy
            .run(&self.cancel, move |_| self.send(req, "single"))
            .await
        {
            Ok(content) => {
                let c = parse::parse_single(&content);
                if c.reasoning == UNPARSEABLE_RESPONSE {
                    counter!("classify_default_total", "reason" => "unparseable").increment(1);
                    tracing::warn!(target: "classify", title, "single response unparseable, using default");
                }
                c
            }
            Err(failure) => default_for(&failure, title),
        }
    }

    pub async fn classify_report(&self, report: &ReportRecord) -> Classification {
        self.classify(&report.title, &report.report_type, report.primary_ticker())
            .await
    }

    async fn classify_chunk(&self, chunk: &[ReportRecord]) -> Result<BatchOutcome, RetryFailure> {
        let req = self.chat_request(prompt::batch(chunk), self.settings.batch_timeout);
        let req = &req;
        let n = chunk.len();
        self.batch_policy
            .run(&self.cancel, move |_| async move {
                let content = self.send(req, "batch").await?;
                parse::parse_batch(&content, n)
            })
            .await
    }

    /// Classify in chunks of `batch_size`, one request per chunk. A chunk whose
    /// request cannot produce JSON (after retries) or fails outright is
    /// classified report by report instead. Output order equals input order.
    pub async fn classify_batch(
        &self,
        reports: &[ReportRecord],
        batch_size: usize,
    ) -> Vec<ClassifiedReport> {
        let mut out = Vec::with_capacity(reports.len());

        for (chunk_idx, chunk) in reports.chunks(batch_size.max(1)).enumerate() {
            match self.classify_chunk(chunk).await {
                Ok(outcome) => {
                    if let BatchOutcome::PartialWithFallback { defaulted, .. } = &outcome {
                        tracing::warn!(
                            target: "classify",
                            chunk = chunk_idx,
                            defaulted = defaulted.len(),
                            "batch response incomplete, defaults applied"
                        );
                        counter!("classify_default_total", "reason" => "not_in_batch")
                            .increment(defaulted.len() as u64);
                    }
                    let classifications = outcome.into_classifications();
                    debug_assert_eq!(classifications.len(), chunk.len());
                    out.extend(
                        chunk
                            .iter()
                            .cloned()
                            .zip(classifications)
                            .map(|(r, c)| ClassifiedReport::new(r, c)),
                    );
                }
                Err(failure) => {
                    tracing::warn!(
                        target: "classify",
                        chunk = chunk_idx,
                        size = chunk.len(),
                        attempts = failure.attempts,
                        error = %failure.error,
                        "batch classification failed, classifying individually"
                    );
                    counter!("classify_batch_fallback_total").increment(1);
                    for report in chunk {
                        let c = self.classify_report(report).await;
                        out.push(ClassifiedReport::new(report.clone(), c));
                    }
                }
            }
        }

        out
    }
}

fn default_for(failure: &RetryFailure, title: &str) -> Classification {
    counter!("classify_default_total", "reason" => failure.error.kind()).increment(1);
    if failure.error == ClassifyError::Cancelled {
        return Classification::fallback(RUN_CANCELLED);
    }
    tracing::warn!(
        target: "classify",
        title,
        attempts = failure.attempts,
        error = %failure.error,
        "single classification failed, using default"
    );
    let reasoning = if failure.exhausted {
        format!(
            "Classification error after {} attempts ({}): {}",
            failure.attempts,
            failure.error.kind(),
            failure.error
        )
    } else {
        format!(
            "Classification error ({}): {}",
            failure.error.kind(),
            failure.error
        )
    };
    Classification::fallback(reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::chat::ChatTransport;
    use crate::analyze::types::{Impact, Sentiment};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed(&'static str, AtomicUsize);

    #[async_trait::async_trait]
    impl ChatTransport for Fixed {
        async fn complete(&self, _r: &ChatRequest) -> Result<String, ClassifyError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.to_string())
        }
        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn classifier(t: Arc<Fixed>) -> Classifier {
        Classifier::new(t, ClassifierSettings::default(), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn single_happy_path() {
        let t = Arc::new(Fixed(
            r#"{"impact":"critical","sentiment":"negative","reasoning":"fraud probe","keywords":["fraud"]}"#,
            AtomicUsize::new(0),
        ));
        let c = classifier(t.clone())
            .classify("OJK investigation", "Announcement", Some("XYZ"))
            .await;
        assert_eq!(c.impact, Impact::Critical);
        assert_eq!(c.sentiment, Sentiment::Negative);
        assert_eq!(t.1.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_classifier_defaults_without_calling() {
        let t = Arc::new(Fixed("{}", AtomicUsize::new(0)));
        let token = CancellationToken::new();
        token.cancel();
        let c = Classifier::new(t.clone(), ClassifierSettings::default(), token);
        let c = c.classify("t", "r", None).await;
        assert_eq!(c.reasoning, RUN_CANCELLED);
        assert_eq!(t.1.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausted_default_names_the_error() {
        let c = default_for(
            &RetryFailure {
                error: ClassifyError::RateLimited,
                attempts: 3,
                exhausted: true,
            },
            "t",
        );
        assert_eq!(c.impact, Impact::Medium);
        assert!(c.reasoning.contains("error"));
        assert!(c.reasoning.contains("rate_limited"));
    }
}
