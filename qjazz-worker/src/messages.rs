//!
//! Incoming messages
//!
//! Validation happens here, once, at deserialization: the frame
//! head carries a `msg_id` discriminant, the remaining map fields
//! belong to the message itself. Unknown fields are ignored for
//! forward compatibility; an unknown `msg_id` is answered with
//! `(405, "unsupported")` by the runtime loop.
//!
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::errors::{Error, Result};

// Message discriminants, shared with the supervisor side
pub mod msg_id {
    pub const PING: i64 = 1;
    pub const QUIT: i64 = 2;
    pub const OWSREQUEST: i64 = 4;
    pub const APIREQUEST: i64 = 5;
    pub const CHECKOUT_PROJECT: i64 = 6;
    pub const DROP_PROJECT: i64 = 7;
    pub const CLEAR_CACHE: i64 = 8;
    pub const LIST_CACHE: i64 = 9;
    pub const UPDATE_CACHE: i64 = 10;
    pub const PROJECT_INFO: i64 = 11;
    pub const PLUGINS: i64 = 12;
    pub const CATALOG: i64 = 13;
    pub const PUT_CONFIG: i64 = 14;
    pub const GET_CONFIG: i64 = 15;
    pub const ENV: i64 = 16;
    pub const SLEEP: i64 = 18;
    pub const COLLECTIONS: i64 = 19;
}

/// HTTP method of a forwarded request
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PingMsg {
    pub echo: String,
}

impl Default for PingMsg {
    fn default() -> Self {
        Self { echo: "".into() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OwsRequestMsg {
    pub service: String,
    pub request: String,
    pub target: String,
    pub url: Option<String>,
    pub version: Option<String>,
    pub direct: bool,
    pub options: Option<String>,
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
    pub header_prefix: Option<String>,
    pub content_type: Option<String>,
    pub method: Option<HttpMethod>,
    pub body: Option<serde_bytes::ByteBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRequestMsg {
    pub name: String,
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<serde_bytes::ByteBuf>,
    #[serde(default)]
    pub delegate: bool,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub header_prefix: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutProjectMsg {
    pub uri: String,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Deserialize)]
pub struct DropProjectMsg {
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GetProjectInfoMsg {
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogMsg {
    pub location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CollectionsMsg {
    pub location: Option<String>,
    pub resource: Option<String>,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct PutConfigMsg {
    pub config: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SleepMsg {
    pub delay: i64,
}

/// Every message the worker understands
#[derive(Debug)]
pub enum Incoming {
    Ping(PingMsg),
    Quit,
    OwsRequest(OwsRequestMsg),
    ApiRequest(ApiRequestMsg),
    CheckoutProject(CheckoutProjectMsg),
    DropProject(DropProjectMsg),
    ClearCache,
    ListCache,
    UpdateCache,
    GetProjectInfo(GetProjectInfoMsg),
    Plugins,
    Catalog(CatalogMsg),
    PutConfig(PutConfigMsg),
    GetConfig,
    GetEnv,
    Sleep(SleepMsg),
    Collections(CollectionsMsg),
}

impl Incoming {
    /// Decode a message frame
    pub fn decode(frame: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct Head {
            msg_id: i64,
        }

        let head: Head = rmp_serde::from_slice(frame)?;
        match head.msg_id {
            msg_id::PING => Ok(Self::Ping(rmp_serde::from_slice(frame)?)),
            msg_id::QUIT => Ok(Self::Quit),
            msg_id::OWSREQUEST => Ok(Self::OwsRequest(rmp_serde::from_slice(frame)?)),
            msg_id::APIREQUEST => Ok(Self::ApiRequest(rmp_serde::from_slice(frame)?)),
            msg_id::CHECKOUT_PROJECT => Ok(Self::CheckoutProject(rmp_serde::from_slice(frame)?)),
            msg_id::DROP_PROJECT => Ok(Self::DropProject(rmp_serde::from_slice(frame)?)),
            msg_id::CLEAR_CACHE => Ok(Self::ClearCache),
            msg_id::LIST_CACHE => Ok(Self::ListCache),
            msg_id::UPDATE_CACHE => Ok(Self::UpdateCache),
            msg_id::PROJECT_INFO => Ok(Self::GetProjectInfo(rmp_serde::from_slice(frame)?)),
            msg_id::PLUGINS => Ok(Self::Plugins),
            msg_id::CATALOG => Ok(Self::Catalog(rmp_serde::from_slice(frame)?)),
            msg_id::PUT_CONFIG => Ok(Self::PutConfig(rmp_serde::from_slice(frame)?)),
            msg_id::GET_CONFIG => Ok(Self::GetConfig),
            msg_id::ENV => Ok(Self::GetEnv),
            msg_id::SLEEP => Ok(Self::Sleep(rmp_serde::from_slice(frame)?)),
            msg_id::COLLECTIONS => Ok(Self::Collections(rmp_serde::from_slice(frame)?)),
            other => Err(Error::UnsupportedMessage(other)),
        }
    }

    /// Display name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "PING",
            Self::Quit => "QUIT",
            Self::OwsRequest(_) => "OWSREQUEST",
            Self::ApiRequest(_) => "APIREQUEST",
            Self::CheckoutProject(_) => "CHECKOUT_PROJECT",
            Self::DropProject(_) => "DROP_PROJECT",
            Self::ClearCache => "CLEAR_CACHE",
            Self::ListCache => "LIST_CACHE",
            Self::UpdateCache => "UPDATE_CACHE",
            Self::GetProjectInfo(_) => "PROJECT_INFO",
            Self::Plugins => "PLUGINS",
            Self::Catalog(_) => "CATALOG",
            Self::PutConfig(_) => "PUT_CONFIG",
            Self::GetConfig => "GET_CONFIG",
            Self::GetEnv => "ENV",
            Self::Sleep(_) => "SLEEP",
            Self::Collections(_) => "COLLECTIONS",
        }
    }
}

//
// Replies
//

use serde::Serialize;
use std::collections::HashMap;

/// Head of a byte streamed response
#[derive(Debug, Default, Serialize)]
pub struct RequestReply {
    pub status_code: i64,
    pub target: Option<String>,
    pub checkout_status: Option<i64>,
    pub headers: Vec<(String, String)>,
    pub cache_id: String,
}

#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub uri: String,
    pub status: i64,
    pub in_cache: bool,
    pub timestamp: Option<i64>,
    pub name: Option<String>,
    pub storage: Option<String>,
    pub last_modified: Option<i64>,
    pub saved_version: Option<String>,
    pub debug_metadata: HashMap<String, i64>,
    pub cache_id: String,
    pub last_hit: i64,
    pub hits: i64,
    pub pinned: bool,
}

#[derive(Debug, Serialize)]
pub struct LayerInfo {
    pub layer_id: String,
    pub name: String,
    pub source: String,
    pub crs: String,
    pub is_valid: bool,
    pub is_spatial: bool,
}

#[derive(Debug, Serialize)]
pub struct ProjectInfo {
    pub status: i64,
    pub uri: String,
    pub filename: String,
    pub crs: String,
    pub last_modified: i64,
    pub storage: String,
    pub has_bad_layers: bool,
    pub layers: Vec<LayerInfo>,
    pub cache_id: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogItem {
    pub uri: String,
    pub name: String,
    pub storage: String,
    pub last_modified: i64,
    pub public_uri: String,
}

#[derive(Debug, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub path: String,
    pub plugin_type: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct CollectionsItem {
    pub name: String,
    pub json: String,
    pub endpoints: i64,
}

#[derive(Debug, Serialize)]
pub struct CollectionsPage {
    pub schema: String,
    pub next: bool,
    pub items: Vec<CollectionsItem>,
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: Serialize>(msg: &T) -> Vec<u8> {
        rmp_serde::to_vec_named(msg).unwrap()
    }

    #[derive(Serialize)]
    struct RawPing<'a> {
        msg_id: i64,
        echo: &'a str,
    }

    #[test]
    fn test_decode_ping() {
        let frame = encode(&RawPing {
            msg_id: msg_id::PING,
            echo: "hello",
        });
        match Incoming::decode(&frame).unwrap() {
            Incoming::Ping(msg) => assert_eq!(msg.echo, "hello"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_fields_ignored() {
        #[derive(Serialize)]
        struct Extended<'a> {
            msg_id: i64,
            echo: &'a str,
            something_new: bool,
        }
        let frame = encode(&Extended {
            msg_id: msg_id::PING,
            echo: "hello",
            something_new: true,
        });
        assert!(matches!(
            Incoming::decode(&frame).unwrap(),
            Incoming::Ping(_)
        ));
    }

    #[test]
    fn test_decode_unknown_msg_id() {
        let frame = encode(&RawPing {
            msg_id: 999,
            echo: "hello",
        });
        assert!(matches!(
            Incoming::decode(&frame),
            Err(crate::Error::UnsupportedMessage(999))
        ));
    }

    #[test]
    fn test_decode_checkout() {
        #[derive(Serialize)]
        struct Raw<'a> {
            msg_id: i64,
            uri: &'a str,
            pull: bool,
        }
        let frame = encode(&Raw {
            msg_id: msg_id::CHECKOUT_PROJECT,
            uri: "/france/france_parts",
            pull: true,
        });
        match Incoming::decode(&frame).unwrap() {
            Incoming::CheckoutProject(msg) => {
                assert_eq!(msg.uri, "/france/france_parts");
                assert!(msg.pull);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_http_method() {
        #[derive(Serialize)]
        struct Raw<'a> {
            msg_id: i64,
            name: &'a str,
            path: &'a str,
            method: &'a str,
        }
        let frame = encode(&Raw {
            msg_id: msg_id::APIREQUEST,
            name: "FEATURES",
            path: "/collections",
            method: "GET",
        });
        match Incoming::decode(&frame).unwrap() {
            Incoming::ApiRequest(msg) => assert_eq!(msg.method, HttpMethod::GET),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
