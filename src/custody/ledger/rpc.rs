//! JSON-RPC Ledger Gateway
//!
//! Talks to a ledger node exposing the `custody_*` JSON-RPC methods.
//! Every failure is mapped onto [`LedgerError`] so the retry policy can tell
//! network/provider faults from outright rejections.
//!
//! Raw-key signers are resolved here: the 32-byte hex secret signs
//! `"<serial>|<status>"` with Ed25519 and only the signature and public key
//! leave the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{LedgerError, LedgerGateway, Receipt, Signer};
use crate::custody::state::LedgerStatus;
use crate::custody::types::SerialNumber;

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Receipt structure from RPC
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    tx_hash: String,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    confirmations: u32,
    /// "success" | "reverted"
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
}

impl From<RpcReceipt> for Receipt {
    fn from(r: RpcReceipt) -> Self {
        let reverted = match r.status.as_deref() {
            Some("reverted") => Some(
                r.revert_reason
                    .unwrap_or_else(|| "execution reverted".to_string()),
            ),
            _ => None,
        };
        Receipt {
            tx_hash: r.tx_hash,
            block_height: r.block_number,
            confirmations: r.confirmations,
            reverted,
        }
    }
}

/// Authorization attached to every write
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerAuth {
    /// The node holds the session for this address
    WalletSession { address: String },
    /// Detached Ed25519 signature over `"<serial>|<status>"`
    Signature {
        public_key: String,
        signature: String,
    },
}

impl SignerAuth {
    pub fn resolve(
        signer: &Signer,
        serial: &SerialNumber,
        status: LedgerStatus,
    ) -> Result<Self, LedgerError> {
        match signer {
            Signer::WalletSession { address } => {
                if address.trim().is_empty() {
                    return Err(LedgerError::SignatureRejected(
                        "empty wallet address".into(),
                    ));
                }
                Ok(SignerAuth::WalletSession {
                    address: address.clone(),
                })
            }
            Signer::RawKey { secret } => {
                let key = parse_signing_key(secret)?;
                let message = signing_message(serial, status);
                let signature = key.sign(message.as_bytes());
                Ok(SignerAuth::Signature {
                    public_key: hex::encode(key.verifying_key().to_bytes()),
                    signature: hex::encode(signature.to_bytes()),
                })
            }
        }
    }
}

/// Payload covered by a raw-key signature
pub fn signing_message(serial: &SerialNumber, status: LedgerStatus) -> String {
    format!("{}|{}", serial, status.as_str())
}

fn parse_signing_key(secret: &str) -> Result<SigningKey, LedgerError> {
    let trimmed = secret.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(trimmed)
        .map_err(|_| LedgerError::SignatureRejected("signing key is not valid hex".into()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| LedgerError::SignatureRejected("signing key must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Map a JSON-RPC error object onto the ledger fault taxonomy
fn classify_rpc_error(error: JsonRpcError) -> LedgerError {
    let JsonRpcError {
        code,
        message,
        data,
    } = error;
    let lower = message.to_lowercase();

    if lower.contains("already known") || lower.contains("duplicate submission") {
        let tx_hash = data
            .as_ref()
            .and_then(|d| d.get("txHash"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return LedgerError::Duplicate { tx_hash };
    }

    if code == 3 || lower.contains("revert") {
        let reason = data
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                message
                    .split_once("reverted:")
                    .map(|(_, r)| r.trim().to_string())
            })
            .unwrap_or(message);
        return LedgerError::Rejected { reason };
    }

    if lower.contains("signature") || lower.contains("unauthorized signer") {
        return LedgerError::SignatureRejected(message);
    }

    if message.contains("Internal JSON-RPC error") || code == -32603 || (-32099..=-32000).contains(&code)
    {
        return LedgerError::Provider(format!("RPC error {}: {}", code, message));
    }

    match code {
        -32700 | -32600 | -32601 | -32602 => {
            LedgerError::InvalidRequest(format!("RPC error {}: {}", code, message))
        }
        _ => LedgerError::Rejected { reason: message },
    }
}

fn classify_transport_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout(e.to_string())
    } else {
        LedgerError::Network(format!("HTTP request failed: {}", e))
    }
}

/// Ledger gateway over JSON-RPC
pub struct RpcLedgerGateway {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedgerGateway {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let url = url.into();
        info!(url = %url, ?request_timeout, "Initializing JSON-RPC ledger gateway");

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call whose result is required
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, LedgerError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.rpc_call_nullable(method, params).await?.ok_or_else(|| {
            LedgerError::InvalidResponse(format!("{} returned no result", method))
        })
    }

    /// Make a JSON-RPC call; a null or missing `result` is `None`
    async fn rpc_call_nullable<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, LedgerError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            warn!(method, %status, "Ledger provider returned error status");
            return Err(LedgerError::Provider(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(LedgerError::InvalidRequest(format!("HTTP {}", status)));
        }

        let rpc_response: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout(e.to_string())
            } else {
                LedgerError::InvalidResponse(format!("Failed to parse response: {}", e))
            }
        })?;

        if let Some(error) = rpc_response.error {
            debug!(method, code = error.code, message = %error.message, "RPC error");
            return Err(classify_rpc_error(error));
        }

        Ok(rpc_response.result)
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn get_status(&self, serial: &SerialNumber) -> Result<Option<LedgerStatus>, LedgerError> {
        // A null result is "unregistered", not a malformed response
        let raw: Option<String> = self
            .rpc_call_nullable("custody_getStatus", [serial.as_str()])
            .await?;

        raw.map(|s| {
            s.parse::<LedgerStatus>()
                .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
        })
        .transpose()
    }

    async fn register_product(
        &self,
        serial: &SerialNumber,
        name: &str,
        manufacturer: &str,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError> {
        let auth = SignerAuth::resolve(signer, serial, LedgerStatus::Manufactured)?;
        let params = [json!({
            "serial": serial.as_str(),
            "name": name,
            "manufacturer": manufacturer,
            "auth": auth,
        })];
        let receipt: RpcReceipt = self.rpc_call("custody_registerProduct", params).await?;
        Ok(receipt.into())
    }

    async fn submit_transition(
        &self,
        serial: &SerialNumber,
        target: LedgerStatus,
        signer: &Signer,
    ) -> Result<Receipt, LedgerError> {
        let auth = SignerAuth::resolve(signer, serial, target)?;
        let params = [json!({
            "serial": serial.as_str(),
            "status": target.as_str(),
            "auth": auth,
        })];
        let receipt: RpcReceipt = self.rpc_call("custody_submitTransition", params).await?;
        Ok(receipt.into())
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Receipt, LedgerError> {
        let receipt: Option<RpcReceipt> = self
            .rpc_call_nullable("custody_getReceipt", [tx_hash])
            .await?;
        receipt
            .map(Receipt::from)
            .ok_or_else(|| LedgerError::ReceiptUnavailable(tx_hash.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::retry::{Classify, FaultClass};
    use axum::{Json, Router, routing::post};
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    fn rpc_err(code: i64, message: &str, data: Option<Value>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.to_string(),
            data,
        }
    }

    fn sn(s: &str) -> SerialNumber {
        SerialNumber::parse(s).unwrap()
    }

    #[test]
    fn test_provider_errors_are_retryable() {
        for (code, msg) in [
            (-32603, "Internal JSON-RPC error."),
            (-32005, "limit exceeded"),
            (-32000, "header not found"),
        ] {
            let e = classify_rpc_error(rpc_err(code, msg, None));
            assert!(matches!(e, LedgerError::Provider(_)), "{code}: {e:?}");
            assert_eq!(e.fault_class(), FaultClass::Retryable);
        }
    }

    #[test]
    fn test_revert_is_terminal_with_reason() {
        let e = classify_rpc_error(rpc_err(
            3,
            "execution reverted: Invalid status transition",
            None,
        ));
        assert_eq!(
            e,
            LedgerError::Rejected {
                reason: "Invalid status transition".into()
            }
        );

        // -32000 range with a revert message is still a rejection
        let e = classify_rpc_error(rpc_err(
            -32000,
            "execution reverted",
            Some(json!({"reason": "Product already registered"})),
        ));
        assert_eq!(e.revert_reason(), "Product already registered");
        assert_eq!(e.fault_class(), FaultClass::Terminal);
    }

    #[test]
    fn test_duplicate_carries_tx_hash() {
        let e = classify_rpc_error(rpc_err(
            -32010,
            "already known",
            Some(json!({"txHash": "0xabc"})),
        ));
        assert_eq!(
            e,
            LedgerError::Duplicate {
                tx_hash: Some("0xabc".into())
            }
        );
    }

    #[test]
    fn test_signature_and_request_errors_are_terminal() {
        let e = classify_rpc_error(rpc_err(-32001, "invalid signature", None));
        assert!(matches!(e, LedgerError::SignatureRejected(_)));

        let e = classify_rpc_error(rpc_err(-32602, "invalid params", None));
        assert!(matches!(e, LedgerError::InvalidRequest(_)));
    }

    #[test]
    fn test_raw_key_signs_serial_and_status() {
        let secret = "11".repeat(32);
        let serial = sn("SN-1");
        let auth = SignerAuth::resolve(
            &Signer::RawKey {
                secret: format!("0x{}", secret),
            },
            &serial,
            LedgerStatus::Shipped,
        )
        .unwrap();

        let SignerAuth::Signature {
            public_key,
            signature,
        } = auth
        else {
            panic!("expected detached signature");
        };

        let pk: [u8; 32] = hex::decode(public_key).unwrap().try_into().unwrap();
        let sig: [u8; 64] = hex::decode(signature).unwrap().try_into().unwrap();
        let key = VerifyingKey::from_bytes(&pk).unwrap();
        assert!(
            key.verify(b"SN-1|Shipped", &Signature::from_bytes(&sig))
                .is_ok()
        );
    }

    #[test]
    fn test_bad_raw_key_is_rejected() {
        for secret in ["zz", "abcd"] {
            let result = SignerAuth::resolve(
                &Signer::RawKey {
                    secret: secret.into(),
                },
                &sn("SN-1"),
                LedgerStatus::Shipped,
            );
            assert!(matches!(result, Err(LedgerError::SignatureRejected(_))));
        }
    }

    async fn mock_node(handler: fn(Value) -> Value) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(req): Json<Value>| async move { Json(handler(req)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn node(req: Value) -> Value {
        let id = req["id"].clone();
        match req["method"].as_str() {
            Some("custody_getStatus") => match req["params"][0].as_str() {
                Some("SN-1") => json!({"jsonrpc": "2.0", "id": id, "result": "Shipped"}),
                _ => json!({"jsonrpc": "2.0", "id": id, "result": null}),
            },
            Some("custody_submitTransition") => match req["params"][0]["serial"].as_str() {
                Some("SN-9") => json!({"jsonrpc": "2.0", "id": id, "result": null}),
                _ => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": 3, "message": "execution reverted: Invalid status transition"}
                }),
            },
            Some("custody_getReceipt") => match req["params"][0].as_str() {
                Some("0x01") => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"txHash": "0x01", "blockNumber": 7, "confirmations": 2, "status": "success"}
                }),
                _ => json!({"jsonrpc": "2.0", "id": id, "result": null}),
            },
            _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "method not found"}}),
        }
    }

    #[tokio::test]
    async fn test_rpc_round_trip_against_mock_node() {
        let url = mock_node(node).await;
        let gateway = RpcLedgerGateway::new(url, Duration::from_secs(5)).unwrap();

        assert_eq!(
            gateway.get_status(&sn("SN-1")).await.unwrap(),
            Some(LedgerStatus::Shipped)
        );
        assert_eq!(gateway.get_status(&sn("SN-404")).await.unwrap(), None);

        let receipt = gateway.get_receipt("0x01").await.unwrap();
        assert!(receipt.is_final(2));

        let rejected = gateway
            .submit_transition(
                &sn("SN-1"),
                LedgerStatus::Delivered,
                &Signer::WalletSession {
                    address: "0xB".into(),
                },
            )
            .await;
        assert_eq!(
            rejected,
            Err(LedgerError::Rejected {
                reason: "Invalid status transition".into()
            })
        );
    }

    #[tokio::test]
    async fn test_null_results_are_typed_per_method() {
        let url = mock_node(node).await;
        let gateway = RpcLedgerGateway::new(url, Duration::from_secs(5)).unwrap();

        // Unknown receipt: not yet mined, retryable
        let err = gateway.get_receipt("0x404").await.unwrap_err();
        assert_eq!(err, LedgerError::ReceiptUnavailable("0x404".into()));
        assert_eq!(err.fault_class(), FaultClass::Retryable);

        // A write must answer with a receipt
        let err = gateway
            .submit_transition(
                &sn("SN-9"),
                LedgerStatus::Shipped,
                &Signer::WalletSession {
                    address: "0xA".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidResponse("custody_submitTransition returned no result".into())
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_is_retryable() {
        // Port 9 (discard) on localhost is not expected to speak HTTP
        let gateway =
            RpcLedgerGateway::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = gateway.get_status(&sn("SN-1")).await.unwrap_err();
        assert_eq!(err.fault_class(), FaultClass::Retryable);
    }
}
