//! SEPA-Bot Trading System Library
//!
//! This library provides the core components for the SEPA-Bot automated
//! momentum trading system: the qualification scanner, scheduled data
//! updates, and order execution.

pub mod application;
pub mod config;
pub mod context;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
