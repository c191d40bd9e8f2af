//! Common infrastructure for zedrouter configuration managers.
//!
//! - [`shell`]: shell command execution with proper quoting
//! - [`error`]: error types for cfgmgr operations
//!
//! Configuration managers translate declarative configuration into
//! command invocations (`iptables`, `ip6tables`, `ipset`) against the
//! Linux network stack. They never read kernel state back; the caller's
//! cached configuration is the source of truth.

pub mod error;
pub mod shell;

pub use error::{CfgMgrError, CfgMgrResult};
