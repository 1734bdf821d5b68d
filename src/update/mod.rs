//! Self-update: manifest resolution, staged install, atomic cutover, restart.
//!
//! ## Contents
//! - [`Manifest`], [`Platform`], [`parse_version`] candidate builds and filters
//! - [`Messenger`] the messaging collaborator seam
//! - [`ManifestResolver`] request/response correlation and fallback URL
//! - [`UpdatePipeline`], [`ReleaseLayout`] download, verify, install, prune
//! - [`Restarter`], [`ServiceRestarter`] restart after an install
//! - [`UpdateEngine`], [`CycleOutcome`] the periodic loop

mod engine;
mod manifest;
mod messaging;
mod pipeline;
mod resolver;
mod restart;

#[cfg(all(test, unix))]
mod testutil;

pub use engine::{CycleOutcome, UpdateEngine};
pub use manifest::{Incompatibility, Manifest, Platform, UpdateCheckRequest, UpdateCheckResponse, parse_version};
pub use messaging::{MessagingError, Messenger, UPDATE_CHECK_EVENT, UPDATE_RESPONSE_EVENT};
pub use pipeline::{ReleaseLayout, UpdatePipeline, UpdateStage, sha256_file, sort_releases, version_gate};
pub use resolver::ManifestResolver;
pub use restart::{Restarter, ServiceRestarter};
