use super::response::{self, ResponseError};
use super::token::TokenSource;
use super::transport::{HttpMethod, Transport, TransportError};
use super::{HeaderError, HeaderFactory, ServerRoutes};
use crate::config::ProtocolMode;
use crate::payload::{CompletedBatch, PayloadQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// Drains the payload queue and posts each batch to the historian.
///
/// Delivery is at-most-once: a batch is dequeued before the attempt and is
/// dropped on failure rather than retried, so a dead historian cannot back
/// data up into the accumulation side forever.
pub struct DeliveryLoop {
    transport: Transport,
    routes: ServerRoutes,
    headers: HeaderFactory,
    mode: ProtocolMode,
    queue: Arc<PayloadQueue>,
    token: Option<Arc<dyn TokenSource>>,
    post_interval: Duration,
    dataserver_web_id: Option<String>,
}

impl DeliveryLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        routes: ServerRoutes,
        headers: HeaderFactory,
        mode: ProtocolMode,
        queue: Arc<PayloadQueue>,
        token: Option<Arc<dyn TokenSource>>,
        post_interval: Duration,
        dataserver_web_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            routes,
            headers,
            mode,
            queue,
            token,
            post_interval,
            dataserver_web_id,
        }
    }

    /// Post batches until shutdown. One batch is attempted per wake so a
    /// backlog drains at the posting rate rather than in a burst.
    pub async fn run(self, cancel: CancellationToken) {
        info!(url = %self.routes.data_url(self.mode), "Delivery loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.post_interval) => {}
            }

            let Some(batch) = self.queue.dequeue() else {
                continue;
            };
            match self.send(&batch).await {
                Ok(()) => {
                    debug!(
                        batch_id = batch.id(),
                        samples = batch.sample_count(),
                        "Batch delivered"
                    );
                }
                Err(e) => {
                    warn!(
                        batch_id = batch.id(),
                        samples = batch.sample_count(),
                        error = %e,
                        "Batch delivery failed, dropping batch"
                    );
                }
            }
        }
        info!("Delivery loop stopped");
    }

    async fn send(&self, batch: &CompletedBatch) -> Result<(), DeliveryError> {
        let bearer = match &self.token {
            Some(token) => {
                // A stale token still gets one attempt; the refresh agent
                // may simply be mid-rotation.
                if let Err(e) = token.refresh() {
                    warn!(error = %e, "Token refresh failed, using the previous token");
                }
                Some(token.bearer())
            }
            None => None,
        };

        let url = self.routes.data_url(self.mode);
        let headers = self.headers.data(bearer.as_deref())?;
        let body = self
            .transport
            .request(
                HttpMethod::Post,
                &url,
                headers,
                Some(batch.payload().to_string()),
            )
            .await?;
        response::classify(&body, &url, self.dataserver_web_id.as_deref())?;
        Ok(())
    }
}
