//!
//! Messages
//!
//! Requests and replies exchanged with worker processes.
//! Requests are serialized as MessagePack maps carrying a
//! `msg_id` discriminant; replies are `(status, payload)`
//! tuples.
//!
use serde::{de, Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::errors;

pub type JsonValue = serde_json::Value;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug)]
pub enum MsgType {
    PING = 1,
    QUIT = 2,
    OWSREQUEST = 4,
    APIREQUEST = 5,
    CHECKOUT_PROJECT = 6,
    DROP_PROJECT = 7,
    CLEAR_CACHE = 8,
    LIST_CACHE = 9,
    UPDATE_CACHE = 10,
    PROJECT_INFO = 11,
    PLUGINS = 12,
    CATALOG = 13,
    PUT_CONFIG = 14,
    GET_CONFIG = 15,
    ENV = 16,
    SLEEP = 18,
    COLLECTIONS = 19,
}

impl Serialize for MsgType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*self as i64)
    }
}

/// A message sent down the pipe
pub trait Message: Serialize {
    const MSG_ID: MsgType;
}

// Serialize a message with its discriminant
pub(crate) struct Tagged<'m, T: Message>(pub &'m T);

impl<T: Message> Serialize for Tagged<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a, T> {
            msg_id: MsgType,
            #[serde(flatten)]
            msg: &'a T,
        }

        Wire {
            msg_id: T::MSG_ID,
            msg: self.0,
        }
        .serialize(serializer)
    }
}

macro_rules! message {
    ($type:ident <$lt:lifetime>, $id:ident) => {
        impl<$lt> Message for $type<$lt> {
            const MSG_ID: MsgType = MsgType::$id;
        }
    };
    ($type:ident, $id:ident) => {
        impl Message for $type {
            const MSG_ID: MsgType = MsgType::$id;
        }
    };
}

//
// MISCELLANEOUS
//

message! {PingMsg<'a>, PING}
message! {QuitMsg, QUIT}
message! {SleepMsg, SLEEP}
message! {GetEnvMsg, ENV}

/// Ping message with an `echo` payload
#[derive(Serialize)]
pub struct PingMsg<'a> {
    pub echo: &'a str,
}

/// Ask the worker to exit its message loop
#[derive(Serialize)]
pub struct QuitMsg;

/// Test hook: hold the worker busy
#[derive(Serialize)]
pub struct SleepMsg {
    pub delay: i64,
}

/// Request the worker environment report
#[derive(Serialize)]
pub struct GetEnvMsg;

//
// REQUESTS
//

/// HTTP method for engine request messages
#[derive(Clone, Copy, Debug, Serialize)]
pub enum HTTPMethod {
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

impl TryFrom<&str> for HTTPMethod {
    type Error = errors::Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "GET" => Ok(HTTPMethod::GET),
            "HEAD" => Ok(HTTPMethod::HEAD),
            "POST" => Ok(HTTPMethod::POST),
            "PUT" => Ok(HTTPMethod::PUT),
            "DELETE" => Ok(HTTPMethod::DELETE),
            "CONNECT" => Ok(HTTPMethod::CONNECT),
            "OPTIONS" => Ok(HTTPMethod::OPTIONS),
            "TRACE" => Ok(HTTPMethod::TRACE),
            "PATCH" => Ok(HTTPMethod::PATCH),
            _ => Err(Self::Error::InvalidHttpMethod(s.to_string())),
        }
    }
}

message! {OwsRequestMsg<'a>, OWSREQUEST}
message! {ApiRequestMsg<'a>, APIREQUEST}
message! {CollectionsMsg<'a>, COLLECTIONS}

/// Marker for messages answered with a `RequestReply`
/// followed by a byte stream
pub trait RequestMessage: Message {}

impl RequestMessage for OwsRequestMsg<'_> {}
impl RequestMessage for ApiRequestMsg<'_> {}

/// OWS request message
#[derive(Serialize)]
pub struct OwsRequestMsg<'a> {
    pub service: &'a str,
    pub request: &'a str,
    pub target: &'a str,
    pub url: Option<&'a str>,
    pub version: Option<&'a str>,
    pub direct: bool,
    pub options: Option<&'a str>,
    pub headers: Vec<(&'a str, &'a str)>,
    pub request_id: Option<&'a str>,
    pub header_prefix: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub method: Option<HTTPMethod>,
    #[serde(with = "serde_bytes")]
    pub body: Option<&'a [u8]>,
}

/// OGC api request message
#[derive(Serialize)]
pub struct ApiRequestMsg<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub method: HTTPMethod,
    pub url: Option<&'a str>,
    #[serde(with = "serde_bytes")]
    pub data: Option<&'a [u8]>,
    pub delegate: bool,
    pub target: Option<&'a str>,
    pub direct: bool,
    pub options: Option<&'a str>,
    pub headers: Vec<(&'a str, &'a str)>,
    pub request_id: Option<&'a str>,
    pub header_prefix: Option<&'a str>,
    pub content_type: Option<&'a str>,
}

/// Head of a byte streamed response
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RequestReply {
    pub status_code: i64,
    pub target: Option<String>,
    pub checkout_status: Option<i64>,
    pub headers: Vec<(String, String)>,
    pub cache_id: String,
}

//
// COLLECTIONS
//

#[derive(Serialize)]
pub struct CollectionsMsg<'a> {
    pub location: Option<&'a str>,
    pub resource: Option<&'a str>,
    pub start: i64,
    pub end: i64,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq)]
    pub struct OgcEndpoints: i64 {
        const MAP = 0x01;
        const FEATURES = 0x02;
        const COVERAGE = 0x04;
        const TILE = 0x08;
        const STYLE = 0x10;
    }
}

impl Serialize for OgcEndpoints {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.bits())
    }
}

impl<'de> Deserialize<'de> for OgcEndpoints {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        Ok(Self::from_bits_retain(i64::deserialize(deserializer)?))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CollectionsItem {
    pub name: String,
    pub json: String,
    pub endpoints: OgcEndpoints,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CollectionsPage {
    pub schema: String,
    pub next: bool,
    pub items: Vec<CollectionsItem>,
}

//
// CACHE
//

/// Checkout status values shared with the worker cache
#[allow(non_snake_case)]
pub mod CheckoutStatus {
    pub const UNCHANGED: i64 = 0;
    pub const NEEDUPDATE: i64 = 1;
    pub const REMOVED: i64 = 2;
    pub const NOTFOUND: i64 = 3;
    pub const NEW: i64 = 4;
    pub const UPDATED: i64 = 5;
}

message! {CheckoutProjectMsg<'a>, CHECKOUT_PROJECT}
message! {DropProjectMsg<'a>, DROP_PROJECT}
message! {ClearCacheMsg, CLEAR_CACHE}
message! {ListCacheMsg, LIST_CACHE}
message! {UpdateCacheMsg, UPDATE_CACHE}
message! {GetProjectInfoMsg<'a>, PROJECT_INFO}
message! {CatalogMsg<'a>, CATALOG}

/// Checkout (optionally pull) project message
#[derive(Serialize)]
pub struct CheckoutProjectMsg<'a> {
    pub uri: &'a str,
    pub pull: bool,
}

/// Drop project message
#[derive(Serialize)]
pub struct DropProjectMsg<'a> {
    pub uri: &'a str,
}

/// Clear cache message
#[derive(Serialize)]
pub struct ClearCacheMsg;

/// List cache message
#[derive(Serialize)]
pub struct ListCacheMsg;

/// Update cache message
#[derive(Serialize)]
pub struct UpdateCacheMsg;

/// Project info message
#[derive(Serialize)]
pub struct GetProjectInfoMsg<'a> {
    pub uri: &'a str,
}

/// Catalog message
#[derive(Serialize)]
pub struct CatalogMsg<'a> {
    pub location: Option<&'a str>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
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

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct LayerInfo {
    pub layer_id: String,
    pub name: String,
    pub source: String,
    pub crs: String,
    pub is_valid: bool,
    pub is_spatial: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
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

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct CatalogItem {
    pub uri: String,
    pub name: String,
    pub storage: String,
    pub last_modified: i64,
    pub public_uri: String,
}

//
// PLUGINS
//

message! {PluginsMsg, PLUGINS}

#[derive(Serialize)]
pub struct PluginsMsg;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PluginInfo {
    pub name: String,
    pub path: String,
    pub plugin_type: String,
    pub metadata: JsonValue,
}

//
// CONFIG
//

message! {GetConfigMsg, GET_CONFIG}
message! {PutConfigMsg<'a>, PUT_CONFIG}

/// Get config message
#[derive(Serialize)]
pub struct GetConfigMsg {}

/// Put config message
#[derive(Serialize)]
pub struct PutConfigMsg<'a> {
    pub config: &'a JsonValue,
}

/// Reply envelope
///
/// The worker process returns replies as `(status, payload)`
/// tuples; stream terminators are sent as the bare `204` status.
/// Any json compatible value may be returned on failure.
#[derive(Debug, PartialEq)]
pub enum Envelop<T> {
    Success(i64, T),
    Failure(i64, JsonValue),
    NoData,
}

impl<'de, T> Deserialize<'de> for Envelop<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct EnvelopVisitor<T>(PhantomData<T>);

        impl<'de, T> de::Visitor<'de> for EnvelopVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = Envelop<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a (status, payload) sequence or the integer 204")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_i64(v as i64)
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v == 204 {
                    Ok(Envelop::NoData)
                } else {
                    Err(de::Error::invalid_value(de::Unexpected::Signed(v), &self))
                }
            }

            fn visit_seq<V>(self, mut seq: V) -> Result<Self::Value, V::Error>
            where
                V: de::SeqAccess<'de>,
            {
                let status: i64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                match status {
                    204 => Ok(Envelop::NoData),
                    st if st < 300 => Ok(Envelop::Success(
                        status,
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?,
                    )),
                    _ => Ok(Envelop::Failure(
                        status,
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?,
                    )),
                }
            }
        }

        deserializer.deserialize_any(EnvelopVisitor::<T>(PhantomData))
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_tagged_msg() {
        let msg = ApiRequestMsg {
            name: "Test",
            path: "/api/path",
            url: Some("http://foobar.com"),
            method: HTTPMethod::GET,
            data: Some(b"foobar"),
            delegate: false,
            target: Some("MyProject"),
            direct: false,
            options: None,
            headers: vec![("content-type", "application/test")],
            request_id: Some("1234"),
            header_prefix: Some("x-test-"),
            content_type: Some("application/test"),
        };

        let mut buf = Vec::new();
        rmp_serde::encode::write_named(&mut buf, &Tagged(&msg)).unwrap();

        // The discriminant is decodable from the map alone
        #[derive(Deserialize)]
        struct Head {
            msg_id: i64,
        }
        let head: Head = rmp_serde::from_slice(&buf).unwrap();
        assert_eq!(head.msg_id, MsgType::APIREQUEST as i64);
    }

    #[test]
    fn test_envelop_success_de() {
        let reply = (
            200,
            PluginInfo {
                name: "my_plugin".into(),
                path: "/the/path".into(),
                plugin_type: "server".into(),
                metadata: json!({
                    "general":  {
                        "name": "foo",
                        "qgisMinimumVersion": "3.0"
                    }
                }),
            },
        );
        let mut buf = Vec::new();
        rmp_serde::encode::write(&mut buf, &reply).unwrap();

        let rv: Envelop<PluginInfo> = rmp_serde::from_slice(&buf[..]).unwrap();
        assert_eq!(rv, Envelop::Success(200, reply.1));
    }

    #[test]
    fn test_envelop_failure_de() {
        let reply = (400, json!("failure"));
        let mut buf = Vec::new();
        rmp_serde::encode::write(&mut buf, &reply).unwrap();

        let rv: Envelop<PluginInfo> = rmp_serde::from_slice(&buf[..]).unwrap();
        assert_eq!(rv, Envelop::Failure(400, reply.1));
    }

    #[test]
    fn test_envelop_nodata() {
        let mut buf = Vec::new();
        rmp_serde::encode::write(&mut buf, &204).unwrap();

        let rv: Envelop<PluginInfo> = rmp_serde::from_slice(&buf[..]).unwrap();
        assert_eq!(rv, Envelop::NoData);

        buf.clear();
        rmp_serde::encode::write(&mut buf, &(204,)).unwrap();
        let rv: Envelop<PluginInfo> = rmp_serde::from_slice(&buf[..]).unwrap();
        assert_eq!(rv, Envelop::NoData);

        buf.clear();
        rmp_serde::encode::write(&mut buf, &999).unwrap();
        let rv: Result<Envelop<PluginInfo>, _> = rmp_serde::from_slice(&buf[..]);
        assert!(rv.is_err());
    }
}
