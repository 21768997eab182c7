//! Hemp Resource Hub image generation queue
//!
//! This library provides a Postgres-backed job queue that generates missing
//! catalog images (plant types, plant parts, products) through pluggable
//! image-generation providers. Producers enqueue jobs, workers claim and run
//! them, and a status reporter summarizes the queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
