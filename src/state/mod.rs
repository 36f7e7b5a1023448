//! State module for tracking per-host politeness during a crawl
//!
//! # Components
//!
//! - `HostState`: in-flight cap, next request slot and request count for one host

mod host_state;

pub use host_state::HostState;
