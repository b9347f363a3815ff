//! Imposters: isolated virtual services built from a definition.
//!
//! This module provides:
//! - `ImposterRegistry`: Port-keyed lifecycle management
//! - `Imposter`: One stub store with its resolver, request log and close flag
//! - `ImposterDefinition`: The authored (and exported) form of an imposter
//!
//! ## Module Structure
//!
//! - `types`: Definitions, recorded requests, export options and errors
//! - `core`: Core Imposter struct and implementation
//! - `registry`: ImposterRegistry

mod core;
mod registry;
mod types;


pub use self::core::{HandleError, Imposter};
pub use registry::ImposterRegistry;
pub use types::{ExportOptions, ImposterDefinition, ImposterError, RecordedRequest};
