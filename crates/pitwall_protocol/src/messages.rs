//! Request and response bodies for the HTTP surface.

use crate::change_set::ChangeSet;
use crate::entity::{KartId, PitlaneConfigId, RaceId, TeamId};
use crate::error::ProtocolResult;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Body of `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Server checkpoint the client has fully ingested.
    pub last_sync_timestamp: Timestamp,
    /// Local rows written after the checkpoint.
    pub changes: ChangeSet,
}

impl SyncRequest {
    /// Creates a request.
    pub fn new(last_sync_timestamp: Timestamp, changes: ChangeSet) -> Self {
        Self {
            last_sync_timestamp,
            changes,
        }
    }

    /// Encodes the request as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a request from JSON.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Response of `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// New checkpoint for the client.
    pub server_timestamp: Timestamp,
    /// Server rows written after the client's checkpoint.
    pub changes: ChangeSet,
}

impl SyncResponse {
    /// Creates a response.
    pub fn new(server_timestamp: Timestamp, changes: ChangeSet) -> Self {
        Self {
            server_timestamp,
            changes,
        }
    }

    /// Encodes the response as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a response from JSON.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Envelope used by the pit-lane endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed envelope.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body of `POST /pitlanes/current/add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKartRequest {
    /// Target configuration.
    pub pitlane_config_id: PitlaneConfigId,
    /// Team bringing the kart in.
    pub team_id: TeamId,
    /// Kart entering the line.
    pub kart_id: KartId,
    /// Line to join.
    pub line_number: u32,
}

/// Body of `DELETE /pitlanes/current/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveKartRequest {
    /// Team that takes the departing kart.
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

/// Query of `DELETE /pitlanes/current/line`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearLineQuery {
    /// Configuration of the line.
    pub config_id: PitlaneConfigId,
    /// Line to empty.
    pub line_number: u32,
}

/// Result of clearing a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearLineResult {
    /// Number of karts moved to history.
    pub cleared: usize,
}

/// Body of `POST /pitlanes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConfigRequest {
    /// Race to configure.
    pub race_id: RaceId,
    /// Number of lines.
    pub lines_count: u32,
    /// Capacity per line.
    pub queue_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_request_wire_shape() {
        let request = SyncRequest::new(Timestamp::from_millis(42), ChangeSet::new());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["lastSyncTimestamp"], json!(42));
        assert!(value["changes"]["pitlane_current"].is_array());
    }

    #[test]
    fn sync_request_requires_changes() {
        assert!(SyncRequest::from_json(br#"{ "lastSyncTimestamp": 0 }"#).is_err());
        assert!(SyncRequest::from_json(br#"{ "lastSyncTimestamp": "x", "changes": {} }"#).is_err());
        let request = SyncRequest::from_json(br#"{ "lastSyncTimestamp": 5, "changes": {} }"#).unwrap();
        assert_eq!(request.last_sync_timestamp, Timestamp::from_millis(5));
    }

    #[test]
    fn sync_response_json_roundtrip() {
        let response = SyncResponse::new(Timestamp::from_millis(9), ChangeSet::new());
        let bytes = response.to_json().unwrap();
        assert_eq!(SyncResponse::from_json(&bytes).unwrap(), response);
    }

    #[test]
    fn remove_body_team_is_optional() {
        let body: RemoveKartRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(body.team_id, None);
        let body: RemoveKartRequest = serde_json::from_str(r#"{ "teamId": 3 }"#).unwrap();
        assert_eq!(body.team_id, Some(TeamId(3)));
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let value = serde_json::to_value(ApiResponse::<()>::err("nope")).unwrap();
        assert_eq!(value, json!({ "success": false, "error": "nope" }));
    }
}
