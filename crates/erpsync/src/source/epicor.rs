//! Epicor REST v2 (OData v4) client.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::Url;

use crate::entity::{EntityKind, SourceSet};
use crate::error::ClientError;
use crate::http::{HttpHeaders, HttpMethod, HttpRequest, HttpTransport};
use crate::record::SourceRecord;

use super::SourceReader;

/// Request timeout for ERP calls.
#[cfg(feature = "reqwest")]
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Credentials for the ERP API. Basic auth and the API key are both required.
#[derive(Clone)]
pub struct EpicorCredentials {
    pub username: String,
    pub password: String,
    pub api_key: String,
}

impl std::fmt::Debug for EpicorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpicorCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ODataPage {
    #[serde(default)]
    value: Vec<SourceRecord>,
}

/// Client for the ERP's OData entity sets.
#[derive(Clone)]
pub struct EpicorClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    company: String,
    authorization: String,
    api_key: String,
}

impl EpicorClient {
    /// Create a client backed by reqwest.
    ///
    /// `base_url` is the server root including the instance path, e.g.
    /// `https://erp.example.com/ERP11PROD`.
    #[cfg(feature = "reqwest")]
    pub fn new(
        base_url: &str,
        company: &str,
        credentials: &EpicorCredentials,
    ) -> Result<Self, ClientError> {
        let transport =
            crate::http::reqwest_transport::ReqwestTransport::with_timeout(REQUEST_TIMEOUT)
                .map_err(|e| ClientError::Config(e.to_string()))?;
        Self::new_with_transport(base_url, company, credentials, Arc::new(transport))
    }

    pub fn new_with_transport(
        base_url: &str,
        company: &str,
        credentials: &EpicorCredentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ClientError::Config(format!("invalid ERP base URL {base_url}: {e}")))?;
        if company.trim().is_empty() {
            return Err(ClientError::Config("ERP company is empty".to_string()));
        }

        let basic = STANDARD.encode(format!(
            "{}:{}",
            credentials.username, credentials.password
        ));

        Ok(Self {
            transport,
            base_url,
            company: company.trim().to_string(),
            authorization: format!("Basic {basic}"),
            api_key: credentials.api_key.clone(),
        })
    }

    /// URL of an entity set with OData paging and query options.
    ///
    /// Pages are ordered on the set's key so `$skip` never repeats or drops
    /// records between requests.
    pub fn entity_url(
        &self,
        set: &SourceSet,
        filter: Option<&str>,
        skip: usize,
        top: usize,
    ) -> Result<String, ClientError> {
        let mut url = Url::parse(&format!(
            "{}/api/v2/odata/{}/{}/{}",
            self.base_url, self.company, set.service, set.entity_set
        ))
        .map_err(|e| ClientError::Config(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("$top", &top.to_string());
            query.append_pair("$skip", &skip.to_string());
            query.append_pair("$orderby", set.order_by);
            if let Some(filter) = filter {
                query.append_pair("$filter", filter);
            }
            if let Some(expand) = set.expand {
                query.append_pair("$expand", expand);
            }
        }

        Ok(url.into())
    }

    fn headers(&self) -> HttpHeaders {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), self.authorization.clone()),
            ("x-api-key".to_string(), self.api_key.clone()),
        ]
    }

    async fn get_page(&self, url: String) -> Result<Vec<SourceRecord>, ClientError> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: self.headers(),
            body: Vec::new(),
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ClientError::network(e.to_string()))?;

        if !response.is_success() {
            return Err(ClientError::from_status(
                response.status,
                &response.body,
                response.retry_after(),
            ));
        }

        let page: ODataPage = serde_json::from_slice(&response.body)
            .map_err(|e| ClientError::decode(e.to_string()))?;
        Ok(page.value)
    }
}

#[async_trait]
impl SourceReader for EpicorClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let set = source_set(EntityKind::Account)?;
        let url = self.entity_url(&set, None, 0, 1)?;
        self.get_page(url).await.map(|_| ())
    }

    #[tracing::instrument(skip(self, kind, filter), fields(kind = %kind))]
    async fn fetch_page(
        &self,
        kind: EntityKind,
        filter: Option<&str>,
        skip: usize,
        top: usize,
    ) -> Result<Vec<SourceRecord>, ClientError> {
        let set = source_set(kind)?;
        let url = self.entity_url(&set, filter, skip, top)?;
        self.get_page(url).await
    }
}

fn source_set(kind: EntityKind) -> Result<SourceSet, ClientError> {
    kind.source_set()
        .ok_or_else(|| ClientError::Config(format!("{kind} has no ERP entity set")))
}
