//! ACL Manager Daemon - per-interface iptables/ip6tables ACLs
//!
//! aclmgrd turns declarative access control lists into packet-filter rules
//! for guest-facing interfaces on a LISP overlay host, handling:
//! - ACE compilation into paired to-guest/from-guest rules
//! - Overlay-local allow rules and the implicit trailing drop
//! - Chain/table selection for management and underlay interfaces
//! - Diff-based reconciliation between an installed and a requested ACL
//! - Host ipset provisioning for `host` matches

pub mod acl_mgr;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod executor;
pub mod rule;
pub mod tables;
pub mod types;

pub use acl_mgr::{AclMgr, ApplyStats};
pub use compiler::{acl_to_rules, ace_to_rules, CompiledAcl};
pub use executor::{FilterCall, PacketFilter, RecordingPacketFilter, ShellPacketFilter};
pub use rule::{Direction, IptablesRule, IptablesRuleList};
pub use types::{Ace, AceAction, AceMatch, AclBinding, IpVersion, MatchType};
