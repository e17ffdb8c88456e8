//! Business logic services
//!
//! This module contains the provisioning and reporting logic separated from
//! HTTP concerns. System commands are reached through the traits in
//! `system_client`, so every service can be tested with mocks.

pub mod network_mode;
pub mod profile_store;
pub mod provisioning;
pub mod registrar;
pub mod telemetry;
pub mod token_store;
