//! Pomona Client - HTTP implementations of the pomona-core collaborator traits
//!
//! This crate provides:
//!
//! - [`fetcher`] - [`HttpFetcher`], the single-attempt GET used against remote catalogs
//! - [`catalog`] - [`CkanCatalog`], a local catalog reached through the CKAN action API
//!
//! # Overview
//!
//! Both clients map HTTP outcomes onto [`pomona_core::AppError`] so the
//! pipeline can tell a vanished item (404) from any other failure. Nothing is
//! retried here.

pub mod catalog;
pub mod fetcher;

pub use catalog::CkanCatalog;
pub use fetcher::HttpFetcher;
