use crate::config::naming::NamingScheme;
use crate::config::{Config, ConfigError, ProtocolMode};
use crate::domain::{CatalogError, TagCatalog};
use crate::payload::{
    BatchLimits, LegacyEncoder, OmfEncoder, PayloadAccumulator, PayloadQueue, ProtocolEncoder,
};
use crate::sender::{
    DeliveryLoop, FileTokenSource, HeaderFactory, ProvisionError, Provisioner, ServerRoutes,
    TokenSource, Transport, TransportError,
};
use crate::source::{SampleSource, SourceError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source lag beyond which accumulation logs that it is working through
/// backed-up data.
const LAG_WARN_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Invalid configuration: {0}")]
    Setup(String),
}

/// The assembled pipeline: provisioning at startup, then the accumulation
/// loop feeding the delivery loop through the bounded queue until shutdown.
pub struct Service<S: SampleSource> {
    config: Config,
    catalog: TagCatalog,
    source: S,
}

impl<S: SampleSource> Service<S> {
    pub fn new(config: Config, source: S) -> Result<Self, ServiceError> {
        let catalog = TagCatalog::load(&config.catalog_file)?;
        info!(
            tags = catalog.tags().len(),
            lowest_id = catalog.lowest_id(),
            highest_id = catalog.highest_id(),
            "Tag catalog loaded"
        );
        Ok(Self {
            config,
            catalog,
            source,
        })
    }

    pub fn catalog(&self) -> &TagCatalog {
        &self.catalog
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ServiceError> {
        let transport = Transport::new(self.config.http_timeout())?;
        let routes = ServerRoutes::new(&self.config.server_url, self.config.cloud_omf_url.clone());
        let headers = HeaderFactory::new(self.config.protocol, self.config.credentials.clone());
        let naming = NamingScheme::parse(&self.config.naming_scheme)?;

        let token: Option<Arc<dyn TokenSource>> = match self.config.protocol {
            ProtocolMode::OmfCloud => {
                let path = self
                    .config
                    .token_file
                    .clone()
                    .ok_or_else(|| ServiceError::Setup("token file not configured".into()))?;
                Some(Arc::new(FileTokenSource::new(path)))
            }
            _ => None,
        };

        let provisioner = Provisioner::new(
            transport.clone(),
            routes.clone(),
            headers.clone(),
            self.config.device_name.clone(),
            self.config.device_serial.clone(),
            naming.clone(),
            self.config.dataserver_web_id.clone(),
            self.config.provision_retry_delay(),
        );

        let encoder = match self.config.protocol {
            ProtocolMode::LegacyBatch => {
                let web_ids = match provisioner.provision_legacy(&self.catalog, &cancel).await {
                    Ok(web_ids) => web_ids,
                    Err(ProvisionError::Cancelled) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                let credentials = self
                    .config
                    .credentials
                    .clone()
                    .ok_or_else(|| ServiceError::Setup("credentials not configured".into()))?;
                ProtocolEncoder::Legacy(LegacyEncoder::new(
                    &self.config.server_url,
                    credentials,
                    web_ids,
                ))
            }
            ProtocolMode::Omf | ProtocolMode::OmfCloud => {
                let bearer = match &token {
                    Some(token) => {
                        if let Err(e) = token.refresh() {
                            warn!(error = %e, "Initial token refresh failed");
                        }
                        Some(token.bearer())
                    }
                    None => None,
                };
                match provisioner
                    .provision_omf(&self.catalog, bearer.as_deref(), &cancel)
                    .await
                {
                    Ok(()) => {}
                    Err(ProvisionError::Cancelled) => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
                ProtocolEncoder::Omf(OmfEncoder::new(
                    naming.clone(),
                    self.config.device_serial.clone(),
                ))
            }
        };

        let queue = Arc::new(PayloadQueue::default());
        let delivery = DeliveryLoop::new(
            transport,
            routes,
            headers,
            self.config.protocol,
            Arc::clone(&queue),
            token,
            self.config.post_interval(),
            self.config.dataserver_web_id.clone(),
        );
        let delivery_task = tokio::spawn(delivery.run(cancel.clone()));

        self.accumulate(encoder, &queue, &cancel).await;

        cancel.cancel();
        if let Err(e) = delivery_task.await {
            warn!(error = %e, "Delivery task ended abnormally");
        }
        info!("Forwarder stopped");
        Ok(())
    }

    /// Pull spans from the source and admit them sample by sample, handing
    /// each completed batch to the queue. Runs until shutdown or until the
    /// source closes.
    async fn accumulate(
        &mut self,
        encoder: ProtocolEncoder,
        queue: &Arc<PayloadQueue>,
        cancel: &CancellationToken,
    ) {
        let mut accumulator =
            PayloadAccumulator::new(encoder, &self.catalog, BatchLimits::default());
        let poll_interval = self.config.poll_interval();
        loop {
            let span = tokio::select! {
                () = cancel.cancelled() => break,
                span = self.source.next_span() => span,
            };
            let span = match span {
                Ok(span) => span,
                Err(SourceError::Closed) => {
                    info!("Sample source closed, shutting down");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Sample source error");
                    continue;
                }
            };

            if let Some(behind) = self.source.time_behind()
                && behind >= LAG_WARN_THRESHOLD
            {
                warn!(behind_secs = behind.as_secs(), "Source is behind real time");
            }

            for sample in &span {
                accumulator.admit(sample);
                if accumulator.is_complete()
                    && let Some(batch) = accumulator.take_completed()
                {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = queue.enqueue(batch) => {}
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
