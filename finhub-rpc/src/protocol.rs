//! JSON-RPC 2.0 message types.
//!
//! Uses `Box<RawValue>` for params/result so the frontend and the router
//! can pass tool arguments and results through without re-parsing them.

use finhub_core::HubError;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// JSON-RPC request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

/// JSON-RPC message identifier (number or string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

impl RpcRequest {
    /// Returns true if this is a notification (no id).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Deserialize the params into a concrete type, mapping failures to
    /// `InvalidParams`.
    pub fn parse_params<T: for<'de> Deserialize<'de>>(&self) -> Result<T, HubError> {
        let raw = self
            .params
            .as_deref()
            .map(|p| p.get())
            .unwrap_or("null");
        serde_json::from_str(raw).map_err(|e| HubError::InvalidParams(e.to_string()))
    }
}

impl RpcResponse {
    /// Construct a success response with the given result.
    pub fn success(id: Option<RpcId>, result: impl Serialize) -> Self {
        // Serializing a Serialize impl to RawValue realistically cannot
        // fail; fall back to null rather than unwrap in library code.
        let raw = serde_json::value::to_raw_value(&result).unwrap_or_else(|_| {
            serde_json::value::to_raw_value(&serde_json::Value::Null)
                .unwrap_or_else(|_| RawValue::from_string("null".to_string()).unwrap_or_default())
        });
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(raw),
            error: None,
        }
    }

    /// Construct an error response.
    pub fn error(id: Option<RpcId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Construct an error response with additional data.
    pub fn error_with_data(
        id: Option<RpcId>,
        code: i32,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }

    /// Map a `HubError` onto the wire, preserving its code and attaching
    /// the correlation id (plus any kind-specific payload) as `data`.
    pub fn from_hub_error(id: Option<RpcId>, err: &HubError, correlation_id: &str) -> Self {
        let mut data = err.data().unwrap_or_else(|| serde_json::json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "correlation_id".to_string(),
                serde_json::Value::String(correlation_id.to_string()),
            );
        }
        Self::error_with_data(id, err.code(), err.to_string(), data)
    }
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error;

    #[test]
    fn request_roundtrip_numeric_id() {
        let json = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"market.stock_quote","arguments":{"symbol":"AAPL"}}}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.id, Some(RpcId::Num(7)));
        assert_eq!(req.method, "tools/call");
        assert!(req.params.is_some());

        let serialized = serde_json::to_string(&req).unwrap();
        let req2: RpcRequest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(req2.id, Some(RpcId::Num(7)));
        assert_eq!(req2.method, "tools/call");
    }

    #[test]
    fn request_roundtrip_string_id() {
        let json = r#"{"jsonrpc":"2.0","id":"req-42","method":"tools/list"}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.id, Some(RpcId::Str("req-42".to_string())));

        let serialized = serde_json::to_string(&req).unwrap();
        let req2: RpcRequest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(req2.id, Some(RpcId::Str("req-42".to_string())));
    }

    #[test]
    fn notification_has_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert!(req.is_notification());

        let serialized = serde_json::to_string(&req).unwrap();
        assert!(!serialized.contains("\"id\""));
    }

    #[test]
    fn parse_params_into_struct() {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            arguments: serde_json::Value,
        }

        let json = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"risk.var","arguments":{"value":1000.0}}}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        let params: CallParams = req.parse_params().unwrap();
        assert_eq!(params.name, "risk.var");
        assert_eq!(params.arguments["value"], 1000.0);
    }

    #[test]
    fn parse_params_missing_field_is_invalid_params() {
        #[derive(Debug, Deserialize)]
        struct CallParams {
            #[allow(dead_code)]
            name: String,
        }

        let json = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{}}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        let err = req.parse_params::<CallParams>().unwrap_err();
        assert_eq!(err.code(), error::INVALID_PARAMS);
    }

    #[test]
    fn success_response_shape() {
        let resp = RpcResponse::success(Some(RpcId::Num(1)), serde_json::json!({"tools": []}));
        assert_eq!(resp.jsonrpc, "2.0");
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());

        let serialized = serde_json::to_string(&resp).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed["result"]["tools"], serde_json::json!([]));
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn error_response_shape() {
        let resp = RpcResponse::error(
            Some(RpcId::Num(5)),
            error::METHOD_NOT_FOUND,
            "Method not found: tools/describe",
        );
        let err = resp.error.as_ref().unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.data.is_none());

        let serialized = serde_json::to_string(&resp).unwrap();
        assert!(!serialized.contains("\"result\""));
        let parsed: serde_json::Value = serde_json::from_str(&serialized).unwrap();
        assert!(parsed["error"].get("data").is_none());
    }

    #[test]
    fn hub_error_maps_code_and_correlation_id() {
        let err = HubError::AllInstancesOpen {
            tool: "portfolio.optimize".to_string(),
        };
        let resp = RpcResponse::from_hub_error(Some(RpcId::Num(9)), &err, "corr-1");
        let rpc_err = resp.error.unwrap();
        assert_eq!(rpc_err.code, error::ALL_INSTANCES_OPEN);
        assert_eq!(rpc_err.data.unwrap()["correlation_id"], "corr-1");
    }

    #[test]
    fn hub_error_keeps_kind_payload() {
        let err = HubError::AllProvidersFailed {
            operation: "quote".to_string(),
            breakdown: vec![("polygon".to_string(), "transient".to_string())],
        };
        let resp = RpcResponse::from_hub_error(None, &err, "corr-2");
        let data = resp.error.unwrap().data.unwrap();
        assert_eq!(data["providers"][0]["provider"], "polygon");
        assert_eq!(data["correlation_id"], "corr-2");
    }
}
