//! CNAE Prospector Library
//!
//! This library finds Brazilian companies by economic activity (CNAE),
//! completes their records from secondary sources, scores them as leads
//! and exports them for a CRM.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Domain logic, models and shared errors.
//! - `integrations`: External service clients and export targets.
//! - `obs`: Observability and logging.
//! - `auth`: OAuth token fetching and caching.
//! - `circuit_breaker`: Circuit breaker for per-record providers.
//! - `cnae`: CNAE normalization and the built-in catalog.
//! - `config`: Configuration management.
//! - `enrichment`: Bounded, order-preserving per-record lookups.
//! - `errors`: Error handling types.
//! - `export`: CSV and Excel exporters.
//! - `handlers`: HTTP request handlers.
//! - `ibge`: City name to IBGE code resolution.
//! - `merger`: Fill-only-if-missing record merging.
//! - `models`: Core data models.
//! - `pipeline`: Search, fallback, enrichment and scoring orchestration.
//! - `providers`: Provider traits plus caching and circuit-breaking wrappers.
//! - `retry`: Bounded exponential backoff.
//! - `scoring`: Lead scoring.
//! - `services`: Nuvem Fiscal, BrasilAPI and RapidAPI clients.
//! - `sheets`: Google Sheets exporter.
//! - `validation`: CNPJ, email and phone helpers.

pub mod api;
pub mod core;
pub mod integrations;
pub mod obs;

pub mod auth;
pub mod circuit_breaker;
pub mod cnae;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod export;
pub mod handlers;
pub mod ibge;
pub mod merger;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod scoring;
pub mod services;
pub mod sheets;
pub mod validation;
