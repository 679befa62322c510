//! lightningd JSON-RPC message types
//!
//! lightningd speaks JSON-RPC 2.0 over a unix socket. Only `getinfo` and
//! `listnodes` are used here.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::types::{NodeAddress, NodeId};

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: &'static str,

    /// Method name (e.g., "listnodes")
    pub method: &'a str,

    /// Method parameters
    pub params: serde_json::Value,

    /// Request ID
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params: serde_json::json!({}),
            id,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Result (present on success)
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Error (present on failure)
    #[serde(default)]
    pub error: Option<JsonRpcError>,

    /// Request ID
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Result of `listnodes`
#[derive(Debug, Clone, Deserialize)]
pub struct ListNodesResult {
    pub nodes: Vec<RpcNode>,
}

/// One entry of `listnodes`. Nodes we only know from channel announcements
/// carry no addresses at all.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcNode {
    pub nodeid: String,

    #[serde(default)]
    pub addresses: Vec<RpcAddress>,
}

/// Advertised address; `address` is absent for some types
#[derive(Debug, Clone, Deserialize)]
pub struct RpcAddress {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub port: u16,
}

impl RpcAddress {
    /// IP endpoint, if this is an `ipv4`/`ipv6` address
    pub fn to_node_address(&self) -> Option<NodeAddress> {
        if self.kind != "ipv4" && self.kind != "ipv6" {
            return None;
        }
        // lightningd brackets IPv6 literals in some versions
        let raw = self.address.as_deref()?.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = raw.parse().ok()?;

        let family_matches = matches!(
            (self.kind.as_str(), ip),
            ("ipv4", IpAddr::V4(_)) | ("ipv6", IpAddr::V6(_))
        );
        family_matches.then(|| NodeAddress::new(ip, self.port))
    }
}

/// A node as reported upstream, reduced to what the seed can use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedNode {
    pub node_id: NodeId,

    /// IP endpoints only; may be empty
    pub addresses: Vec<NodeAddress>,
}

impl RpcNode {
    /// `None` if the node id is not a valid 33-byte hex key
    pub fn into_listed(self) -> Option<ListedNode> {
        let node_id = NodeId::from_hex(&self.nodeid)?;
        let addresses = self
            .addresses
            .iter()
            .filter_map(RpcAddress::to_node_address)
            .collect();
        Some(ListedNode { node_id, addresses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_A: &str = "02eec7245d6b7d2ccb30380bfbe2a3648cd7a942653f5aa340edcea1f283686619";

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(JsonRpcRequest::new(7, "listnodes")).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "listnodes");
        assert_eq!(json["id"], 7);
        assert!(json["params"].is_object());
    }

    #[test]
    fn test_listnodes_parsing() {
        let raw = serde_json::json!({
            "nodes": [
                {
                    "nodeid": NODE_A,
                    "alias": "ACINQ",
                    "last_timestamp": 1700000000,
                    "addresses": [
                        { "type": "ipv4", "address": "34.239.230.56", "port": 9735 },
                        { "type": "ipv6", "address": "[2600:1f18:1ca0:9200::1]", "port": 9736 },
                        { "type": "torv3", "address": "abcdefghijklmnop.onion", "port": 9735 },
                        { "type": "websocket", "port": 443 }
                    ]
                },
                { "nodeid": NODE_A },
                { "nodeid": "zz", "addresses": [] }
            ]
        });

        let result: ListNodesResult = serde_json::from_value(raw).unwrap();
        let listed: Vec<_> = result.nodes.into_iter().map(RpcNode::into_listed).collect();

        let first = listed[0].as_ref().unwrap();
        assert_eq!(first.node_id.to_string(), NODE_A);
        assert_eq!(first.addresses.len(), 2);
        assert_eq!(first.addresses[0].port, 9735);
        assert_eq!(first.addresses[1].ip, "2600:1f18:1ca0:9200::1".parse::<IpAddr>().unwrap());

        assert!(listed[1].as_ref().unwrap().addresses.is_empty());
        assert!(listed[2].is_none());
    }

    #[test]
    fn test_address_family_mismatch_is_ignored() {
        let addr = RpcAddress {
            kind: "ipv4".to_string(),
            address: Some("::1".to_string()),
            port: 9735,
        };
        assert!(addr.to_node_address().is_none());
    }

    #[test]
    fn test_error_response_parsing() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Unknown command"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
