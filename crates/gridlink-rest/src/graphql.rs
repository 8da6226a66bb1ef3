//! Scenario lookups over the simulation's GraphQL endpoint.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::{retrieve_jwt_token, Credentials, TokenStore};
use crate::client::http_client;
use crate::error::{RestError, RestResult};

const READ_CONFIGURATION: &str = "query ReadConfiguration($uuid: String!) { \
    readConfiguration(uuid: $uuid) { scenarioData { latest { serialized } } } }";

const LIST_CANARY_NETWORKS: &str = "query { listCanaryNetworks { configurations { \
    uuid resultsStatus scenarioData { forecastStreamAreaMapping } } } }";

pub struct GraphQlClient {
    client: Client,
    url: String,
    token: TokenStore,
}

impl GraphQlClient {
    pub fn new(domain: &str, token: TokenStore) -> RestResult<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            url: format!("{}/graphql/", domain.trim_end_matches('/')),
            token,
        })
    }

    /// Authenticate with `credentials` and build a client.
    pub async fn authenticate(domain: &str, credentials: &Credentials) -> RestResult<Self> {
        let mut graphql = Self::new(domain, TokenStore::new(String::new()))?;
        let token = retrieve_jwt_token(&graphql.client, domain.trim_end_matches('/'), credentials).await?;
        graphql.token = TokenStore::new(token);
        Ok(graphql)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a query and return its `data` object.
    pub async fn query(&self, query: &str, variables: Value) -> RestResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, self.token.header_value())
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RestError::HttpClient(format!("HTTP {status}: {text}")));
        }

        let mut body: Value = serde_json::from_str(&text)?;
        if let Some(message) = first_error(&body) {
            return Err(RestError::GraphQl(message));
        }
        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// Latest serialized scenario tree of a configuration.
    pub async fn read_scenario(&self, configuration: &str) -> RestResult<Value> {
        let data = self
            .query(READ_CONFIGURATION, json!({"uuid": configuration}))
            .await?;
        let serialized = data
            .pointer("/readConfiguration/scenarioData/latest/serialized")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RestError::GraphQl(format!("configuration {configuration} has no scenario"))
            })?;
        Ok(serde_json::from_str(serialized)?)
    }

    /// Uuid of the area called `area_name` in a configuration.
    pub async fn area_uuid(&self, configuration: &str, area_name: &str) -> RestResult<String> {
        let scenario = self.read_scenario(configuration).await?;
        find_area_uuid(&scenario, area_name).ok_or_else(|| RestError::AreaNotFound {
            area: area_name.to_string(),
            configuration: configuration.to_string(),
        })
    }

    /// Name to uuid mapping of every area in a configuration.
    pub async fn area_name_uuid_mapping(
        &self,
        configuration: &str,
    ) -> RestResult<BTreeMap<String, String>> {
        let scenario = self.read_scenario(configuration).await?;
        Ok(area_name_uuid_mapping(&scenario))
    }

    /// Running canary networks and their forecast stream area mappings.
    pub async fn running_canary_networks(&self) -> RestResult<HashMap<String, Value>> {
        let data = self.query(LIST_CANARY_NETWORKS, json!({})).await?;
        debug!(networks = ?data, "Received canary network data");
        Ok(running_networks(&data))
    }
}

fn first_error(body: &Value) -> Option<String> {
    let errors = body.get("errors")?.as_array()?;
    let first = errors.first()?;
    Some(
        first
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| first.to_string(), str::to_string),
    )
}

/// Depth-first search of a scenario tree for an area by name.
pub fn find_area_uuid(node: &Value, area_name: &str) -> Option<String> {
    if node.get("name").and_then(Value::as_str) == Some(area_name) {
        if let Some(uuid) = node.get("uuid").and_then(Value::as_str) {
            return Some(uuid.to_string());
        }
    }
    node.get("children")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|child| find_area_uuid(child, area_name))
}

/// Every `name -> uuid` pair in a scenario tree.
pub fn area_name_uuid_mapping(node: &Value) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    collect_areas(node, &mut mapping);
    mapping
}

fn collect_areas(node: &Value, mapping: &mut BTreeMap<String, String>) {
    if let (Some(name), Some(uuid)) = (
        node.get("name").and_then(Value::as_str),
        node.get("uuid").and_then(Value::as_str),
    ) {
        mapping.insert(name.to_string(), uuid.to_string());
    }
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            collect_areas(child, mapping);
        }
    }
}

/// Configurations from a `listCanaryNetworks` payload whose results are running.
pub fn running_networks(data: &Value) -> HashMap<String, Value> {
    data.pointer("/listCanaryNetworks/configurations")
        .and_then(Value::as_array)
        .map(|configurations| {
            configurations
                .iter()
                .filter(|cn| cn.get("resultsStatus").and_then(Value::as_str) == Some("running"))
                .filter_map(|cn| {
                    let uuid = cn.get("uuid")?.as_str()?.to_string();
                    let mapping = cn
                        .pointer("/scenarioData/forecastStreamAreaMapping")
                        .cloned()
                        .unwrap_or(Value::Null);
                    Some((uuid, mapping))
                })
                .collect()
        })
        .unwrap_or_default()
}
