//! Ingest Service - Up banking ingestion, webhook handling and reconciliation.

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod processors;
pub mod provider;
pub mod services;
pub mod startup;
