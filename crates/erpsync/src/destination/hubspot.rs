//! HubSpot CRM v3/v4 client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::entity::{AssociationType, ObjectType};
use crate::error::ClientError;
use crate::http::{HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::record::{DestinationRecord, PropertyMap};

use super::DestinationClient;
use super::rate_limit::ApiRateLimiter;

/// Public API host.
pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

/// Matches requested per search. More than one means the key is ambiguous.
const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<DestinationRecord>,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

/// Client for CRM objects and associations.
#[derive(Clone)]
pub struct HubSpotClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
}

impl HubSpotClient {
    /// Create a client backed by reqwest.
    #[cfg(feature = "reqwest")]
    pub fn new(
        base_url: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
    ) -> Result<Self, ClientError> {
        let transport = crate::http::reqwest_transport::ReqwestTransport::with_timeout(
            std::time::Duration::from_secs(30),
        )
        .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::new_with_transport(
            base_url,
            token,
            rate_limiter,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        base_url: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limiter,
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HttpHeaders {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
        ]
    }

    fn object_url(&self, object: ObjectType) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, object)
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<&Value>,
    ) -> Result<HttpResponse, ClientError> {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }

        let request = match body {
            Some(body) => HttpRequest::json(method, url, self.headers(), body)
                .map_err(|e| ClientError::Config(e.to_string()))?,
            None => HttpRequest {
                method,
                url,
                headers: self.headers(),
                body: Vec::new(),
            },
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

        Ok(response)
    }

    fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ClientError> {
        serde_json::from_slice(&response.body).map_err(|e| ClientError::decode(e.to_string()))
    }
}

#[async_trait]
impl DestinationClient for HubSpotClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let url = format!("{}?limit=1", self.object_url(ObjectType::Companies));
        self.send(HttpMethod::Get, url, None).await.map(|_| ())
    }

    async fn search(
        &self,
        object: ObjectType,
        property: &str,
        value: &str,
        properties: &[&str],
    ) -> Result<Vec<DestinationRecord>, ClientError> {
        let mut requested: Vec<&str> = Vec::with_capacity(properties.len() + 1);
        requested.push(property);
        requested.extend(properties.iter().copied().filter(|p| *p != property));

        let body = json!({
            "filterGroups": [{
                "filters": [{"propertyName": property, "operator": "EQ", "value": value}]
            }],
            "properties": requested,
            "limit": SEARCH_LIMIT,
        });
        let url = format!("{}/search", self.object_url(object));
        let response = self.send(HttpMethod::Post, url, Some(&body)).await?;
        let page: SearchResponse = Self::decode(&response)?;
        Ok(page.results)
    }

    async fn create(
        &self,
        object: ObjectType,
        properties: &PropertyMap,
    ) -> Result<String, ClientError> {
        let body = json!({ "properties": properties });
        let response = self
            .send(HttpMethod::Post, self.object_url(object), Some(&body))
            .await?;
        let created: CreatedObject = Self::decode(&response)?;
        tracing::debug!(object = %object, id = %created.id, "Created CRM object");
        Ok(created.id)
    }

    async fn update(
        &self,
        object: ObjectType,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<(), ClientError> {
        let body = json!({ "properties": properties });
        let url = format!("{}/{}", self.object_url(object), id);
        self.send(HttpMethod::Patch, url, Some(&body)).await?;
        Ok(())
    }

    async fn create_association(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
        association: AssociationType,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/{}/{}",
            self.base_url, from, from_id, to, to_id
        );
        let body = json!([{
            "associationCategory": association.category(),
            "associationTypeId": association.type_id(),
        }]);
        self.send(HttpMethod::Put, url, Some(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MockTransport, header_get};

    const BASE: &str = "https://crm.test";

    fn client(transport: &MockTransport) -> HubSpotClient {
        HubSpotClient::new_with_transport(
            &format!("{BASE}/"),
            "pat-123",
            None,
            Arc::new(transport.clone()),
        )
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("request body")
    }

    #[tokio::test]
    async fn search_sends_eq_filter_and_returns_results_in_order() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            format!("{BASE}/crm/v3/objects/deals/search"),
            200,
            json!({
                "total": 2,
                "results": [
                    {"id": "11", "properties": {"epicor_quote_number": "5001", "dealstage": "quote_sent"}},
                    {"id": "12", "properties": {"epicor_quote_number": "5001", "dealstage": null}}
                ]
            }),
        );

        let found = client(&transport)
            .search(ObjectType::Deals, "epicor_quote_number", "5001", &["dealstage"])
            .await
            .expect("search");

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "11");
        assert_eq!(found[0].property("dealstage"), Some("quote_sent"));
        assert_eq!(found[1].property("dealstage"), None);

        let requests = transport.requests();
        assert_eq!(
            header_get(&requests[0].headers, "authorization"),
            Some("Bearer pat-123")
        );
        let body = body_json(&requests[0].body);
        assert_eq!(
            body["filterGroups"][0]["filters"][0],
            json!({"propertyName": "epicor_quote_number", "operator": "EQ", "value": "5001"})
        );
        assert_eq!(body["properties"], json!(["epicor_quote_number", "dealstage"]));
    }

    #[tokio::test]
    async fn create_returns_new_id() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            format!("{BASE}/crm/v3/objects/companies"),
            201,
            json!({"id": "901", "properties": {}}),
        );

        let mut props = PropertyMap::new();
        props.insert("name".to_string(), json!("Acme"));
        let id = client(&transport)
            .create(ObjectType::Companies, &props)
            .await
            .expect("create");

        assert_eq!(id, "901");
        let body = body_json(&transport.requests()[0].body);
        assert_eq!(body, json!({"properties": {"name": "Acme"}}));
    }

    #[tokio::test]
    async fn update_patches_object() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Patch,
            format!("{BASE}/crm/v3/objects/line_items/77"),
            200,
            json!({"id": "77"}),
        );

        client(&transport)
            .update(ObjectType::LineItems, "77", &PropertyMap::new())
            .await
            .expect("update");
        assert_eq!(transport.requests()[0].method, HttpMethod::Patch);
    }

    #[tokio::test]
    async fn association_uses_v4_put_with_type_id() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Put,
            format!("{BASE}/crm/v4/objects/deals/1/associations/companies/2"),
            200,
            json!({}),
        );

        client(&transport)
            .create_association(
                ObjectType::Deals,
                "1",
                ObjectType::Companies,
                "2",
                AssociationType::DealToCompany,
            )
            .await
            .expect("associate");

        let body = body_json(&transport.requests()[0].body);
        assert_eq!(
            body,
            json!([{"associationCategory": "HUBSPOT_DEFINED", "associationTypeId": 5}])
        );
    }

    #[tokio::test]
    async fn error_statuses_are_classified() {
        let transport = MockTransport::new();
        let url = format!("{BASE}/crm/v3/objects/deals/search");
        transport.push_response(
            HttpMethod::Post,
            url.clone(),
            HttpResponse {
                status: 429,
                headers: vec![("Retry-After".to_string(), "1".to_string())],
                body: Vec::new(),
            },
        );
        transport.push_json(
            HttpMethod::Post,
            url,
            400,
            json!({"message": "Property values were not valid"}),
        );

        let client = client(&transport);
        let err = client
            .search(ObjectType::Deals, "epicor_order_number", "1", &[])
            .await
            .expect_err("429");
        assert!(err.is_transient());

        let err = client
            .search(ObjectType::Deals, "epicor_order_number", "1", &[])
            .await
            .expect_err("400");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("not valid"));
    }

    #[tokio::test]
    async fn ping_lists_one_company() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            format!("{BASE}/crm/v3/objects/companies?limit=1"),
            200,
            json!({"results": []}),
        );
        let client = HubSpotClient::new_with_transport(
            BASE,
            "pat-123",
            Some(ApiRateLimiter::new(50)),
            Arc::new(transport.clone()),
        );
        client.ping().await.expect("ping");
        assert_eq!(client.base_url(), BASE);
    }
}
