//! The REST "oracle" the bridge consults to turn an authenticated HomeKey
//! transaction into a lock activation, and to relay BLE traffic on its
//! behalf (spec.md §4.8, §6). The bridge applies no semantics of its own:
//! every decision about *what* to do with a transaction lives on the other
//! end of this client.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

const AUTHENTICATED_ENDPOINT: &str = "_r/homekey_authenticated";
const BLE_MESSAGE_RECEIVED_ENDPOINT: &str = "_r/homekey_ble_message_received";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request timed out")]
    Timeout,
    #[error("oracle returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("oracle response did not match the expected shape: {0}")]
    Shape(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct AuthenticatedRequest {
    #[serde(rename = "endpointId")]
    issuer_id: String,
}

/// The only response shape the bridge understands for `homekey_authenticated`.
/// Anything else is an [`OracleError::Shape`] (spec.md §4.8 step 2).
#[derive(Debug, Deserialize)]
struct AuthenticatedEnvelope {
    tag: String,
    data: Option<InitiateBluetoothConnection>,
}

#[derive(Debug, Deserialize)]
struct InitiateBluetoothConnection {
    serial: u32,
    message: Vec<u8>,
}

/// Outcome of calling `homekey_authenticated`: where to connect and what to
/// send first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothConnectionRequest {
    pub serial: u32,
    pub message: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct BleMessageReceivedRequest<'a> {
    message: &'a [u8],
    #[serde(rename = "issuerId", skip_serializing_if = "Option::is_none")]
    issuer_id: Option<String>,
}

/// What the oracle wants the bridge to do after relaying a BLE notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleInstruction {
    SendBluetoothMessage(Vec<u8>),
    CloseBluetoothConnection,
    /// Any tag the bridge doesn't recognize: logged and ignored (spec.md §4.8).
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct BleInstructionEnvelope {
    tag: String,
    data: Option<BleInstructionData>,
}

#[derive(Debug, Deserialize)]
struct BleInstructionData {
    #[serde(default)]
    message: Vec<u8>,
}

/// Thin REST client for the lock activation oracle (spec.md §4.8, §6).
pub struct OracleClient {
    base_url: String,
    client: reqwest::Client,
}

impl OracleClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(OracleClient { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Tells the oracle that `issuer_id` was authenticated over NFC and asks
    /// which lock (by BLE serial) to activate and what to write first
    /// (spec.md §4.8 step 2).
    pub async fn homekey_authenticated(
        &self,
        issuer_id_hex: &str,
    ) -> Result<BluetoothConnectionRequest, OracleError> {
        let response = self
            .client
            .post(self.url(AUTHENTICATED_ENDPOINT))
            .json(&AuthenticatedRequest { issuer_id: issuer_id_hex.to_string() })
            .send()
            .await
            .map_err(map_timeout)?;

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status()));
        }

        let envelope: AuthenticatedEnvelope = response.json().await?;
        if envelope.tag != "initiate_bluetooth_connection" {
            return Err(OracleError::Shape(format!("unexpected tag {:?}", envelope.tag)));
        }
        let data = envelope
            .data
            .ok_or_else(|| OracleError::Shape("initiate_bluetooth_connection without data".to_string()))?;

        Ok(BluetoothConnectionRequest { serial: data.serial, message: data.message })
    }

    /// Relays one BLE notification payload to the oracle and returns what it
    /// wants done next (spec.md §4.8 step 4).
    pub async fn homekey_ble_message_received(
        &self,
        message: &[u8],
        issuer_id_hex: Option<&str>,
    ) -> Result<BleInstruction, OracleError> {
        let response = self
            .client
            .post(self.url(BLE_MESSAGE_RECEIVED_ENDPOINT))
            .json(&BleMessageReceivedRequest { message, issuer_id: issuer_id_hex.map(str::to_string) })
            .send()
            .await
            .map_err(map_timeout)?;

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status()));
        }

        let envelope: BleInstructionEnvelope = response.json().await?;
        Ok(match envelope.tag.as_str() {
            "send_bluetooth_message" => {
                let data = envelope
                    .data
                    .ok_or_else(|| OracleError::Shape("send_bluetooth_message without data".to_string()))?;
                BleInstruction::SendBluetoothMessage(data.message)
            }
            "close_bluetooth_connection" => BleInstruction::CloseBluetoothConnection,
            other => BleInstruction::Unknown(other.to_string()),
        })
    }
}

fn map_timeout(error: reqwest::Error) -> OracleError {
    if error.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Transport(error)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    #[tokio::test]
    async fn homekey_authenticated_parses_initiate_bluetooth_connection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{AUTHENTICATED_ENDPOINT}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag": "initiate_bluetooth_connection",
                "data": {"serial": 42, "message": [1, 2, 3]},
            })))
            .mount(&server)
            .await;

        let client = OracleClient::new(server.uri()).unwrap();
        let result = client.homekey_authenticated("abcd").await.unwrap();

        assert_eq!(result.serial, 42);
        assert_eq!(result.message, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn homekey_authenticated_rejects_unexpected_tag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{AUTHENTICATED_ENDPOINT}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag": "something_else",
            })))
            .mount(&server)
            .await;

        let client = OracleClient::new(server.uri()).unwrap();
        let result = client.homekey_authenticated("abcd").await;

        assert!(matches!(result, Err(OracleError::Shape(_))));
    }

    #[tokio::test]
    async fn ble_message_received_maps_close_instruction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{BLE_MESSAGE_RECEIVED_ENDPOINT}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag": "close_bluetooth_connection",
            })))
            .mount(&server)
            .await;

        let client = OracleClient::new(server.uri()).unwrap();
        let instruction = client.homekey_ble_message_received(&[9, 9], Some("abcd")).await.unwrap();

        assert_eq!(instruction, BleInstruction::CloseBluetoothConnection);
    }

    #[tokio::test]
    async fn ble_message_received_reports_unknown_tags_rather_than_failing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{BLE_MESSAGE_RECEIVED_ENDPOINT}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag": "noop",
            })))
            .mount(&server)
            .await;

        let client = OracleClient::new(server.uri()).unwrap();
        let instruction = client.homekey_ble_message_received(&[1], None).await.unwrap();

        assert_eq!(instruction, BleInstruction::Unknown("noop".to_string()));
    }
}
