//! One request end to end: authorize, execute, collect artifacts, then record
//! history and deliver in parallel.

use crate::config::{Config, ExecutionConfig};
use crate::delivery::{ArtifactDelivery, DeliveryError, DeliveryRouter};
use crate::executor::ExecutionEngine;
use crate::history::HistoryStore;
use crate::i18n::I18n;
use crate::messaging::{Messenger, Permissions, Reply};
use crate::scanner::{discover_new, merge_artifacts, MTIME_SLACK};
use crate::storage::{
    DeliveryTarget, ExecutionFailure, ExecutionRequest, ExecutionResult, NewRecord, Requester,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("requester {0} is not authorized to run snippets")]
    Unauthorized(String),
}

/// What the messaging layer gets back for one request.
#[derive(Debug)]
pub struct RequestSummary {
    pub text: String,
    pub success: bool,
    pub record_id: Option<u64>,
    pub artifacts: Vec<PathBuf>,
    pub deliveries: Vec<ArtifactDelivery>,
}

pub struct Orchestrator {
    execution: ExecutionConfig,
    engine: ExecutionEngine,
    history: Arc<HistoryStore>,
    router: DeliveryRouter,
    messenger: Arc<dyn Messenger>,
    permissions: Arc<dyn Permissions>,
    i18n: I18n,
}

impl Orchestrator {
    pub fn new(
        execution: ExecutionConfig,
        history: Arc<HistoryStore>,
        router: DeliveryRouter,
        messenger: Arc<dyn Messenger>,
        permissions: Arc<dyn Permissions>,
        i18n: I18n,
    ) -> Self {
        Self {
            engine: ExecutionEngine::new(execution.clone()),
            execution,
            history,
            router,
            messenger,
            permissions,
            i18n,
        }
    }

    /// Serves artifacts from the configured output directory.
    pub fn from_config(
        config: &Config,
        history: Arc<HistoryStore>,
        messenger: Arc<dyn Messenger>,
        permissions: Arc<dyn Permissions>,
    ) -> Result<Self, DeliveryError> {
        let served_root = config.execution.effective_output_dir();
        let router = DeliveryRouter::from_config(&config.delivery, &served_root, Arc::clone(&messenger))?;
        debug!(channels = ?router.channel_kinds(), root = %served_root.display(), "delivery channels ready");
        Ok(Self::new(
            config.execution.clone(),
            history,
            router,
            messenger,
            permissions,
            I18n::new(&config.get_effective_language()),
        ))
    }

    /// A request using the configured output directory and timeout.
    pub fn request(&self, code: String, description: Option<String>, requester: Requester) -> ExecutionRequest {
        ExecutionRequest {
            code,
            description,
            requester,
            working_dir: self.execution.effective_output_dir(),
            time_budget: self.execution.timeout(),
        }
    }

    pub async fn handle(
        &self,
        request: &ExecutionRequest,
        target: &DeliveryTarget,
    ) -> Result<RequestSummary, OrchestratorError> {
        let requester = &request.requester;
        if !self.permissions.is_authorized(&requester.id) {
            warn!(requester = %requester.id, "unauthorized snippet request rejected");
            let notice = self.i18n.t_format("unauthorized", &[&requester.name]);
            if let Err(e) = self.messenger.send(target, Reply::text(notice)).await {
                warn!(error = %e, "could not notify requester");
            }
            return Err(OrchestratorError::Unauthorized(requester.id.clone()));
        }

        info!(
            requester = %requester.id,
            description = request.description.as_deref().unwrap_or("-"),
            "running snippet"
        );

        let started = SystemTime::now();
        let result = self
            .engine
            .execute(&request.code, &request.working_dir, request.time_budget)
            .await;

        let artifacts = if result.success() {
            let since = started.checked_sub(MTIME_SLACK).unwrap_or(started);
            let discovered = discover_new(&request.working_dir, since, self.execution.scan_recursive);
            merge_artifacts(&result.artifacts, &discovered)
        } else {
            Vec::new()
        };

        let reply = self.compose_reply(&result, &artifacts);
        let record = NewRecord::from_execution(request, &result, &artifacts);
        let history = Arc::clone(&self.history);
        let history_path = history.path().to_path_buf();

        let persist = async move {
            match tokio::task::spawn_blocking(move || history.append(record)).await {
                Ok(Ok(id)) => Some(id),
                Ok(Err(e)) => {
                    error!(error = %e, path = %history_path.display(), "history record not saved");
                    None
                }
                Err(e) => {
                    error!(error = %e, "history writer task failed");
                    None
                }
            }
        };
        let deliver = async {
            if let Err(e) = self.messenger.send(target, Reply::text(reply.clone())).await {
                warn!(error = %e, "text reply not delivered");
            }
            self.router.deliver(&artifacts, target).await
        };
        let (record_id, deliveries) = tokio::join!(persist, deliver);

        let text = self.append_delivery_status(reply, &deliveries);
        Ok(RequestSummary {
            text,
            success: result.success(),
            record_id,
            artifacts,
            deliveries,
        })
    }

    fn compose_reply(&self, result: &ExecutionResult, artifacts: &[PathBuf]) -> String {
        let output = result.stdout.trim();

        let Some(failure) = result.failure() else {
            let mut parts = vec![self.i18n.t("task_complete")];
            if !output.is_empty() {
                parts.push(format!("{}\n```\n{}\n```", self.i18n.t("execution_result"), output));
            } else if artifacts.is_empty() {
                parts.push(self.i18n.t("no_output"));
            }
            return parts.join("\n");
        };

        let error_text = match failure {
            ExecutionFailure::Timeout { budget } => {
                self.i18n.t_format("timeout_error", &[&budget.as_secs().to_string()])
            }
            other => other.message(),
        };
        let mut message = format!(
            "{}\n{}\n```\n{}\n```",
            self.i18n.t("execution_failed"),
            self.i18n.t("error_info"),
            error_text
        );
        if !output.is_empty() {
            message.push_str(&format!("\n\n{}\n```\n{}\n```", self.i18n.t("output_before_error"), output));
        }
        message.push('\n');
        message.push_str(&self.i18n.t("retry_hint"));
        message
    }

    fn append_delivery_status(&self, reply: String, deliveries: &[ArtifactDelivery]) -> String {
        if deliveries.is_empty() {
            return reply;
        }

        let mut lines = vec![reply, String::new(), self.i18n.t("delivery_header")];
        for delivery in deliveries {
            let name = delivery.file_name();
            let line = match (&delivery.delivered_via, &delivery.error) {
                (Some(channel), _) => self.i18n.t_format("delivered_via", &[&name, &channel.to_string()]),
                (None, Some(DeliveryError::MissingArtifact)) => self.i18n.t_format("artifact_missing", &[&name]),
                (None, error) => {
                    let reasons: Vec<String> = delivery
                        .attempts
                        .iter()
                        .filter(|a| !a.success)
                        .filter_map(|a| a.error.as_ref().map(|e| e.to_string()))
                        .collect();
                    let reason = if reasons.is_empty() {
                        error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    } else {
                        reasons.join("; ")
                    };
                    self.i18n.t_format("delivery_failed", &[&name, &reason])
                }
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}
