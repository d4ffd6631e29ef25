use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==================================================================================================
// Response Models
// ==================================================================================================

/// One credential version; the value shape depends on `credential_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub version_created_at: DateTime<Utc>,
    pub value: serde_json::Value,
}

/// `{"data": [..]}` envelope returned by GET /api/v1/data
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialList {
    #[serde(default)]
    pub data: Vec<Credential>,
}

/// Search hit from a name or path lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundCredential {
    pub name: String,
    pub version_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResults {
    #[serde(default)]
    pub credentials: Vec<FoundCredential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialPath {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResults {
    #[serde(default)]
    pub paths: Vec<CredentialPath>,
}

// ==================================================================================================
// Request Models
// ==================================================================================================

/// Body of PUT /api/v1/data
#[derive(Debug, Clone, Serialize)]
pub struct SetRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub credential_type: &'a str,
    pub value: &'a serde_json::Value,
}
