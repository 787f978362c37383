use super::response::{self, ResponseError};
use super::transport::{HttpMethod, Transport, TransportError};
use super::{HeaderError, HeaderFactory, MessageKind, ServerRoutes};
use crate::config::naming::NamingScheme;
use crate::domain::{TagCatalog, TagMeta, WebIdMap};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Containers per OMF declaration request.
const PROVISION_CHUNK: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error("Point lookup for tag \"{tag}\" returned no WebId")]
    MissingWebId { tag: String },

    #[error("Unexpected provisioning response: {0}")]
    UnexpectedBody(String),

    #[error("Provisioning cancelled by shutdown")]
    Cancelled,
}

/// Creates the server-side resources delivery depends on: PI points with
/// resolved WebIDs for the legacy protocol, OMF types and containers for
/// the OMF protocols. Runs once at startup, before any data flows.
pub struct Provisioner {
    transport: Transport,
    routes: ServerRoutes,
    headers: HeaderFactory,
    device_name: String,
    serial: String,
    naming: NamingScheme,
    dataserver_web_id: Option<String>,
    retry_delay: Duration,
}

impl Provisioner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        routes: ServerRoutes,
        headers: HeaderFactory,
        device_name: String,
        serial: String,
        naming: NamingScheme,
        dataserver_web_id: Option<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            routes,
            headers,
            device_name,
            serial,
            naming,
            dataserver_web_id,
            retry_delay,
        }
    }

    /// Resolve a WebID for every provisionable tag, creating points that do
    /// not exist yet. Tags that fail in one pass are retried after a fixed
    /// delay until all of them resolve or shutdown is requested.
    pub async fn provision_legacy(
        &self,
        catalog: &TagCatalog,
        cancel: &CancellationToken,
    ) -> Result<WebIdMap, ProvisionError> {
        let mut web_ids = WebIdMap::new(catalog);
        let provisionable = catalog
            .tags()
            .iter()
            .filter(|tag| tag.kind.legacy_point_type().is_some())
            .count();

        loop {
            for tag in catalog.tags() {
                if cancel.is_cancelled() {
                    return Err(ProvisionError::Cancelled);
                }
                if web_ids.get(tag.id).is_some() {
                    continue;
                }
                if tag.kind.legacy_point_type().is_none() {
                    debug!(tag = %tag.name, "Tag kind has no point type, skipping provisioning");
                    continue;
                }
                match self.resolve_point(tag).await {
                    Ok(web_id) => {
                        debug!(tag = %tag.name, %web_id, "Resolved point WebId");
                        web_ids.set(tag.id, web_id);
                    }
                    Err(e) => {
                        warn!(tag = %tag.name, error = %e, "Point provisioning failed, will retry");
                    }
                }
            }

            if web_ids.resolved_count() >= provisionable {
                info!(points = provisionable, "All points provisioned");
                return Ok(web_ids);
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// Declare the per-kind OMF types and one container per tag. The whole
    /// pass is retried on failure until it succeeds or shutdown is
    /// requested.
    pub async fn provision_omf(
        &self,
        catalog: &TagCatalog,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        loop {
            match self.declare_omf_resources(catalog, bearer).await {
                Ok(()) => {
                    info!(containers = catalog.tags().len(), "OMF resources declared");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "OMF provisioning failed, will retry");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn declare_omf_resources(
        &self,
        catalog: &TagCatalog,
        bearer: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let url = self.routes.omf_url();

        let types = self.omf_type_bodies();
        let headers = self.headers.omf(MessageKind::Type, bearer)?;
        let body = self
            .transport
            .request(HttpMethod::Post, &url, headers, Some(types.to_string()))
            .await?;
        response::classify(&body, &url, self.dataserver_web_id.as_deref())?;

        let containers: Vec<Value> = catalog
            .tags()
            .iter()
            .map(|tag| {
                let omf_type = tag.kind.omf_type();
                json!({
                    "id": self.naming.container_id(&tag.name, &self.serial, omf_type),
                    "typeid": self.type_id(omf_type),
                })
            })
            .collect();

        for chunk in containers.chunks(PROVISION_CHUNK) {
            let headers = self.headers.omf(MessageKind::Container, bearer)?;
            let body = self
                .transport
                .request(
                    HttpMethod::Post,
                    &url,
                    headers,
                    Some(Value::Array(chunk.to_vec()).to_string()),
                )
                .await?;
            response::classify(&body, &url, self.dataserver_web_id.as_deref())?;
        }
        Ok(())
    }

    fn type_id(&self, omf_type: &str) -> String {
        format!("HMS-{}-type-{}", omf_type, self.device_name)
    }

    /// One type declaration per value kind. Every type indexes on the
    /// sample timestamp and carries a single `tagValue` property.
    fn omf_type_bodies(&self) -> Value {
        let timestamp = json!({"type": "string", "format": "date-time", "isindex": true});
        let type_decl = |omf_type: &str, value: Value| {
            json!({
                "id": self.type_id(omf_type),
                "classification": "dynamic",
                "type": "object",
                "properties": {
                    "timestamp": timestamp.clone(),
                    "tagValue": value,
                }
            })
        };
        json!([
            type_decl("number", json!({"type": "number", "format": "float32"})),
            type_decl("integer", json!({"type": "integer", "format": "int32"})),
            type_decl("boolean", json!({"type": "boolean"})),
            type_decl("string", json!({"type": "string"})),
        ])
    }

    /// Find the point for one tag, creating it if absent. Newly created
    /// points get their point source stamped so they are attributable on
    /// the server.
    async fn resolve_point(&self, tag: &TagMeta) -> Result<String, ProvisionError> {
        let dataserver = self
            .dataserver_web_id
            .as_deref()
            .ok_or_else(|| ProvisionError::UnexpectedBody("data server WebID not set".into()))?;

        if let Some(web_id) = self.lookup_point(dataserver, &tag.name).await? {
            return Ok(web_id);
        }

        self.create_point(dataserver, tag).await?;
        let web_id = self
            .lookup_point(dataserver, &tag.name)
            .await?
            .ok_or_else(|| ProvisionError::MissingWebId {
                tag: tag.name.clone(),
            })?;
        self.stamp_point_source(&web_id).await?;
        info!(tag = %tag.name, "Created point");
        Ok(web_id)
    }

    async fn lookup_point(
        &self,
        dataserver: &str,
        tag_name: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let url = self.routes.points_query_url(dataserver, tag_name);
        let body = self
            .transport
            .request(HttpMethod::Get, &url, self.headers.base(None)?, None)
            .await?;
        response::classify(&body, &url, self.dataserver_web_id.as_deref())?;

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| ProvisionError::UnexpectedBody(e.to_string()))?;
        Ok(parsed
            .get("Items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("WebId"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn create_point(&self, dataserver: &str, tag: &TagMeta) -> Result<(), ProvisionError> {
        let point_type = tag
            .kind
            .legacy_point_type()
            .ok_or_else(|| ProvisionError::UnexpectedBody("tag kind has no point type".into()))?;
        let body = json!({
            "Name": tag.name,
            "Descriptor": tag.name,
            "PointClass": "classic",
            "PointType": point_type,
            "EngineeringUnits": "",
            "Step": false,
            "Future": false,
        });
        let url = self.routes.points_url(dataserver);
        let response_body = self
            .transport
            .request(
                HttpMethod::Post,
                &url,
                self.headers.base(None)?,
                Some(body.to_string()),
            )
            .await?;
        response::classify(&response_body, &url, self.dataserver_web_id.as_deref())?;
        Ok(())
    }

    async fn stamp_point_source(&self, web_id: &str) -> Result<(), ProvisionError> {
        let url = self.routes.point_attribute_url(web_id, "pointsource");
        let body = self
            .transport
            .request(
                HttpMethod::Put,
                &url,
                self.headers.base(None)?,
                Some("\"HMS\"".to_string()),
            )
            .await?;
        response::classify(&body, &url, self.dataserver_web_id.as_deref())?;
        Ok(())
    }
}
