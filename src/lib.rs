// CredHub CLI - Library root for testing

pub mod auth;
pub mod commands;
pub mod config;
pub mod credhub;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod session;
pub mod transport;
