// Data models for the CredHub API

pub mod credhub;

pub use credhub::{
    Credential, CredentialList, CredentialPath, FindResults, FoundCredential, PathResults,
    SetRequest,
};
