//! # Classgate Core
//!
//! Core types, configuration, and storage for Classgate.
//!
//! This crate provides:
//! - Domain types: roles, users, refresh tokens, invitations, student and teacher rows
//! - Configuration loading and validation (JSON5 format, Go-style durations)
//! - The `SessionStore` persistence contract and its sled implementation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError, JwtConfig, RateLimitConfig};
pub use store::{SessionStore, SledStore, StoreError, StoreTx, TxOps};
pub use types::{
    Enrollment, Invitation, PublicUser, RefreshToken, Role, Student, Teacher, User,
};
