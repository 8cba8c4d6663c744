//! Notification sink: one consolidated alert per scan round. Concrete
//! chat-webhook formatting is out of scope; `LarkNotificationSink` is a
//! thin adapter posting a minimal JSON body, not a reimplementation of
//! Lark's card format.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::models::ProcessInfo;

#[derive(Debug, Clone, Serialize)]
pub struct LabelOutcome {
    pub namespace: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceAlert {
    pub namespace: String,
    pub processes: Vec<ProcessInfo>,
    pub label_outcome: Option<LabelOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedAlert {
    pub namespaces: Vec<NamespaceAlert>,
}

impl ConsolidatedAlert {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, alert: &ConsolidatedAlert) -> anyhow::Result<()>;
}

/// Posts a plain-text summary to a Lark custom-bot webhook URL. Secrets in
/// the URL itself, if any, are expected to already be resolved by the
/// caller via [`crate::secure_value::resolve`].
pub struct LarkNotificationSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl LarkNotificationSink {
    pub fn new(webhook_url: String) -> Self {
        Self { client: reqwest::Client::new(), webhook_url }
    }

    fn format_text(alert: &ConsolidatedAlert) -> String {
        let mut lines = Vec::new();
        for ns in &alert.namespaces {
            let label_state = match &ns.label_outcome {
                Some(outcome) if outcome.success => "labeled",
                Some(_) => "label-failed",
                None => "label-skipped",
            };
            lines.push(format!("{} ({label_state}): {} process(es)", ns.namespace, ns.processes.len()));
        }
        lines.join("\n")
    }
}

#[derive(Serialize)]
struct LarkTextPayload {
    msg_type: &'static str,
    content: LarkTextContent,
}

#[derive(Serialize)]
struct LarkTextContent {
    text: String,
}

#[async_trait]
impl NotificationSink for LarkNotificationSink {
    async fn send(&self, alert: &ConsolidatedAlert) -> anyhow::Result<()> {
        let payload = LarkTextPayload { msg_type: "text", content: LarkTextContent { text: Self::format_text(alert) } };
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("lark webhook returned status {}", response.status());
        }
        Ok(())
    }
}

/// Discards every alert. Used when no webhook is configured, so the
/// scanner's alerting step always has a sink to call.
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn send(&self, _alert: &ConsolidatedAlert) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Records every alert it receives, optionally simulating failure.
#[derive(Default)]
pub struct FakeNotificationSink {
    pub sent: Mutex<Vec<ConsolidatedAlert>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl FakeNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for FakeNotificationSink {
    async fn send(&self, alert: &ConsolidatedAlert) -> anyhow::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            warn!("fake notification sink: simulated send failure");
            anyhow::bail!("fake notification sink: simulated send failure");
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> ConsolidatedAlert {
        ConsolidatedAlert {
            namespaces: vec![NamespaceAlert { namespace: "ns-alice".to_string(), processes: vec![], label_outcome: Some(LabelOutcome { namespace: "ns-alice".to_string(), success: true }) }],
        }
    }

    #[test]
    fn formats_one_line_per_namespace() {
        let text = LarkNotificationSink::format_text(&sample_alert());
        assert!(text.contains("ns-alice"));
        assert!(text.contains("labeled"));
    }

    #[tokio::test]
    async fn fake_sink_records_sent_alerts() {
        let sink = FakeNotificationSink::new();
        sink.send(&sample_alert()).await.unwrap();
        assert_eq!(sink.sent_count(), 1);
    }

    #[tokio::test]
    async fn fake_sink_can_simulate_failure() {
        let sink = FakeNotificationSink::new();
        sink.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(sink.send(&sample_alert()).await.is_err());
        assert_eq!(sink.sent_count(), 0);
    }
}
