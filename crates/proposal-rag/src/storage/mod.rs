//! On-disk persistence for proposal metadata
//!
//! Each processed proposal gets a JSON sidecar named by its proposal id.

mod sidecar;

pub use sidecar::{ProposalSidecar, SidecarStore};
