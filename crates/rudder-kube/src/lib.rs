//! Rudder Kube - Kubernetes integration for Rudder
//!
//! This crate provides:
//! - **Dynamic Client**: Discovery-backed access to arbitrary resource kinds
//! - **Apply Pipeline**: Server-Side Apply with field-manager conflict handling
//! - **Ownership Decoding**: managedFields (FieldsV1) parsing into field paths
//! - **Projection Engine**: Drift-comparable view of exactly the fields we own
//! - **Wait Engine**: Watch-first readiness waits with polling fallback
//! - **Lifecycle Orchestration**: Crash-safe create/read/update/delete/import

pub mod apply;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod ownership;
pub mod projection;
pub mod state;
pub mod wait;

pub use client::{DynamicClient, FIELD_MANAGER};
pub use error::{KubeError, Result};
pub use lifecycle::ResourceContext;
pub use state::{MemoryStateStore, ResourceState, StateStore};
pub use wait::WaitSpec;
