//! Rudder Core - foundation types for managing raw Kubernetes manifests
//!
//! This crate provides the cluster-independent pieces of rudder:
//! - `FieldPath`: navigation over untyped Kubernetes object trees
//! - `Manifest`: single-object YAML parsing with pre-network validation
//! - `quantity`: canonical Kubernetes quantity forms for drift comparison
//! - `ResourceConfig`: per-resource configuration (connection, waits, timeouts)
//! - `annotations`: rudder's reserved annotation namespace

pub mod annotations;
pub mod config;
pub mod error;
pub mod manifest;
pub mod path;
pub mod quantity;

pub use config::{ClusterConnection, ResourceConfig, WaitFor};
pub use error::CoreError;
pub use manifest::{GvkRef, Manifest};
pub use path::{FieldPath, PathSegment};
