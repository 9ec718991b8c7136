//! Transparent redirection of a cgroup's outbound IPv4 TCP connections to a
//! local proxy, with the original destination available through
//! `SO_ORIGINAL_DST`.
//!
//! The hook logic lives in `sockredir_common::hooks` and runs in the kernel
//! (see the `sockredir-ebpf` crate). This crate is the user-space half: the
//! loader, the proxy-side query, and host-side tables for running the hooks
//! outside the kernel.

pub mod config;
pub mod error;
pub mod loader;
pub mod proxy;
pub mod table;

pub use sockredir_common::hooks;
pub use sockredir_common::{Endpoint, ProxyConfig};
