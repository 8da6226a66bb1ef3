//! REST / GraphQL client tests against a local HTTP server.

mod common;

use common::MockHttpServer;
use gridlink_rest::{
    retrieve_jwt_token, Credentials, GraphQlClient, RestClient, RestConfig, RestError, TokenStore,
};
use serde_json::{json, Map, Value};

const COMMAND_PATH: &str = "/external-connection/api/sim-1/house-1/offer_energy/";

async fn authenticated_server() -> MockHttpServer {
    let server = MockHttpServer::start().await;
    server.route("/api-token-auth/", 200, json!({"token": "tok-1"}).to_string());
    server
}

#[tokio::test]
async fn test_retrieve_token() {
    let server = authenticated_server().await;
    let client = reqwest::Client::new();

    let token = retrieve_jwt_token(&client, &server.url(), &Credentials::new("user", "pw"))
        .await
        .unwrap();
    assert_eq!(token, "tok-1");

    let request = &server.requests_to("/api-token-auth/")[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.json(), json!({"username": "user", "password": "pw"}));
}

#[tokio::test]
async fn test_authentication_failure() {
    let server = MockHttpServer::start().await;
    server.route("/api-token-auth/", 400, r#"{"non_field_errors": ["bad credentials"]}"#);

    let err = RestClient::connect(
        RestConfig::new(server.url(), "sim-1", "house-1"),
        Credentials::new("user", "wrong"),
    )
    .await
    .err()
    .unwrap();

    match err {
        RestError::AuthenticationFailure { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("bad credentials"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_post_command_injects_transaction_id_and_token() {
    let server = authenticated_server().await;
    server.route(COMMAND_PATH, 200, json!({"status": "ready"}).to_string());

    let client = RestClient::connect(
        RestConfig::new(server.url(), "sim-1", "house-1"),
        Credentials::new("user", "pw"),
    )
    .await
    .unwrap();

    let mut data = Map::new();
    data.insert("energy".to_string(), Value::from(2.0));
    data.insert("price".to_string(), Value::from(30.0));
    let (transaction_id, response) = client.post("offer_energy", data).await.unwrap();

    assert_eq!(response, Some(json!({"status": "ready"})));
    let request = &server.requests_to(COMMAND_PATH)[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.headers["authorization"], "JWT tok-1");
    let body = request.json();
    assert_eq!(body["transaction_id"], transaction_id.as_str());
    assert_eq!(body["energy"], 2.0);

    client.shutdown();
}

#[tokio::test]
async fn test_non_2xx_command_is_none() {
    let server = authenticated_server().await;
    server.route(COMMAND_PATH, 500, r#"{"error": "boom"}"#);

    let client = RestClient::connect(
        RestConfig::new(server.url(), "sim-1", "house-1"),
        Credentials::new("user", "pw"),
    )
    .await
    .unwrap();

    let (_, response) = client.post("offer_energy", Map::new()).await.unwrap();
    assert_eq!(response, None);

    let (_, ok) = client.get("offer_energy", Map::new()).await.unwrap();
    assert!(!ok);
}

#[tokio::test]
async fn test_graphql_area_lookup() {
    let server = authenticated_server().await;
    let scenario = json!({
        "name": "Grid", "uuid": "grid-uuid",
        "children": [{"name": "House 1", "uuid": "house-1-uuid", "children": []}]
    });
    server.route(
        "/graphql/",
        200,
        json!({"data": {"readConfiguration": {"scenarioData": {"latest": {
            "serialized": scenario.to_string()
        }}}}})
        .to_string(),
    );

    let graphql = GraphQlClient::authenticate(&server.url(), &Credentials::new("user", "pw"))
        .await
        .unwrap();

    let uuid = graphql.area_uuid("config-1", "House 1").await.unwrap();
    assert_eq!(uuid, "house-1-uuid");

    let mapping = graphql.area_name_uuid_mapping("config-1").await.unwrap();
    assert_eq!(mapping["Grid"], "grid-uuid");

    let err = graphql.area_uuid("config-1", "House 9").await.unwrap_err();
    assert!(matches!(err, RestError::AreaNotFound { .. }));

    let request = &server.requests_to("/graphql/")[0];
    assert_eq!(request.headers["authorization"], "JWT tok-1");
    assert_eq!(request.json()["variables"]["uuid"], "config-1");
}

#[tokio::test]
async fn test_graphql_errors_are_reported() {
    let server = MockHttpServer::start().await;
    server.route(
        "/graphql/",
        200,
        json!({"errors": [{"message": "permission denied"}], "data": null}).to_string(),
    );

    let graphql = GraphQlClient::new(&server.url(), TokenStore::new("tok")).unwrap();
    let err = graphql.running_canary_networks().await.unwrap_err();
    match err {
        RestError::GraphQl(message) => assert_eq!(message, "permission denied"),
        other => panic!("unexpected error: {other}"),
    }
}
