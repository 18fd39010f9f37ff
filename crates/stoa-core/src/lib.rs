//! # Stoa Core
//!
//! Core types shared by the Stoa interceptor pipeline and its telemetry
//! registries:
//!
//! - [`EntryInfo`] - Identity of one logical server instance within a process
//! - [`RequestId`] - UUID v7 request identifier
//! - [`ErrorResponse`] - The structured JSON error envelope written to clients
//! - [`AppInfo`] / [`DeploymentFacts`] - Process-wide facts used as telemetry
//!   label values

#![doc(html_root_url = "https://docs.rs/stoa-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app_info;
mod entry;
mod error;
mod request_id;

pub use app_info::{AppInfo, DeploymentFacts, UNKNOWN};
pub use entry::{EntryInfo, DEFAULT_ENTRY_NAME, DEFAULT_ENTRY_KIND};
pub use error::{ErrorBody, ErrorResponse};
pub use request_id::RequestId;
