//! REST / GraphQL collaborator for the gridlink client.
//!
//! - JWT acquisition from `api-token-auth` and periodic refresh
//! - Authenticated command POST / GET on the external-connection API
//! - Scenario lookups over GraphQL (area uuids, running canary networks)

pub mod auth;
pub mod client;
pub mod error;
pub mod graphql;

pub use auth::{retrieve_jwt_token, Credentials, TokenRefresher, TokenStore};
pub use client::{aggregator_prefix, RestClient, RestConfig};
pub use error::{RestError, RestResult};
pub use graphql::{area_name_uuid_mapping, find_area_uuid, running_networks, GraphQlClient};
