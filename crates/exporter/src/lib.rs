//! Host and container metrics exporter
//!
//! Wires the sampling engine to environment configuration and the HTTP
//! scrape surface.

pub mod api;
pub mod config;
