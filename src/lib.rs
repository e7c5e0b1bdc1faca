//! # codeforlife-deploy
//!
//! Startup glue for the Code for Life web service.
//!
//! Resolves the deployment environment, loads secrets from a `.env`-style
//! object in cloud storage, derives database settings, and decides whether
//! inbound job requests really come from the cloud scheduler.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod store;
pub mod telemetry;
