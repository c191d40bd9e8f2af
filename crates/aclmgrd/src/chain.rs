//! Chain and table selection for compiled rules.
//!
//! Where a rule is installed depends on the interface role, the IP
//! version and the rule's direction token:
//!
//! | mgmt  | ip  | first token | installed as                 |
//! |-------|-----|-------------|------------------------------|
//! | yes   | any | `-o`        | `<op> FORWARD`               |
//! | yes   | any | `-i`        | `<op> OUTPUT`, `-i` → `-o`   |
//! | no    | 6   | `-i`        | `-t raw <op> PREROUTING`     |
//! | no    | 6   | `-o`        | `<op> FORWARD`               |
//! | no    | 4   | any         | `<op> FORWARD`               |
//!
//! Management traffic to the host leaves LISP decapsulation through
//! OUTPUT, so its to-guest side matches on the output interface there.
//! Underlay IPv6 to-guest rules sit in raw/PREROUTING so they run before
//! the LISP daemon's packet taps.

use std::fmt;

use crate::rule::{Direction, IptablesRule};
use crate::tables::{op, CHAIN_FORWARD, CHAIN_OUTPUT, CHAIN_PREROUTING, TABLE_RAW};
use crate::types::IpVersion;

/// Rule operation passed to iptables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleOp {
    /// `-A`: append at the chain tail.
    Append,
    /// `-I`: insert at the chain head.
    Insert,
    /// `-D`: delete the matching rule.
    Delete,
}

impl RuleOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOp::Append => op::APPEND,
            RuleOp::Insert => op::INSERT,
            RuleOp::Delete => op::DELETE,
        }
    }
}

impl fmt::Display for RuleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how one rule is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSelection {
    /// `<op> <chain>`, optionally preceded by `-t <table>`.
    pub prefix: Vec<String>,
    /// Replacement for the rule's direction token, if any.
    pub rewrite: Option<Direction>,
}

impl ChainSelection {
    fn new(prefix: &[&str]) -> Self {
        Self {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            rewrite: None,
        }
    }

    fn rewriting(mut self, dir: Direction) -> Self {
        self.rewrite = Some(dir);
        self
    }

    /// Full argument vector: prefix followed by the (possibly rewritten) rule.
    ///
    /// The rewrite is applied to a copy; `rule` itself is never modified.
    pub fn apply(&self, rule: &IptablesRule) -> Vec<String> {
        let rule = match self.rewrite {
            Some(dir) => rule.with_leading_token(dir.token()),
            None => rule.clone(),
        };
        let mut args = self.prefix.clone();
        args.extend(rule.into_tokens());
        args
    }
}

/// Picks the table and chain for `rule`, or `None` if it does not apply.
pub fn select_chain(
    operation: RuleOp,
    is_mgmt: bool,
    ip_ver: IpVersion,
    rule: &IptablesRule,
) -> Option<ChainSelection> {
    let op = operation.as_str();
    if is_mgmt {
        match rule.direction()? {
            Direction::FromGuest => Some(ChainSelection::new(&[op, CHAIN_FORWARD])),
            Direction::ToGuest => Some(
                ChainSelection::new(&[op, CHAIN_OUTPUT]).rewriting(Direction::FromGuest),
            ),
        }
    } else if ip_ver == IpVersion::V6 {
        match rule.direction()? {
            Direction::ToGuest => Some(ChainSelection::new(&[
                "-t",
                TABLE_RAW,
                op,
                CHAIN_PREROUTING,
            ])),
            Direction::FromGuest => Some(ChainSelection::new(&[op, CHAIN_FORWARD])),
        }
    } else {
        Some(ChainSelection::new(&[op, CHAIN_FORWARD]))
    }
}

/// Convenience wrapper: the full iptables argv for `rule`, if it applies.
pub fn rule_args(
    operation: RuleOp,
    is_mgmt: bool,
    ip_ver: IpVersion,
    rule: &IptablesRule,
) -> Option<Vec<String>> {
    select_chain(operation, is_mgmt, ip_ver, rule).map(|sel| sel.apply(rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule;
    use pretty_assertions::assert_eq;

    fn to_guest() -> IptablesRule {
        rule!["-i", "eth0", "-j", "DROP"]
    }

    fn from_guest() -> IptablesRule {
        rule!["-o", "eth0", "-j", "DROP"]
    }

    #[test]
    fn test_mgmt_from_guest_forward() {
        for ip_ver in [IpVersion::V4, IpVersion::V6] {
            let args = rule_args(RuleOp::Append, true, ip_ver, &from_guest()).unwrap();
            assert_eq!(args, vec!["-A", "FORWARD", "-o", "eth0", "-j", "DROP"]);
        }
    }

    #[test]
    fn test_mgmt_to_guest_output_rewritten() {
        let rule = to_guest();
        let args = rule_args(RuleOp::Insert, true, IpVersion::V6, &rule).unwrap();
        assert_eq!(args, vec!["-I", "OUTPUT", "-o", "eth0", "-j", "DROP"]);
        // The compiled rule is left intact
        assert_eq!(rule, to_guest());
    }

    #[test]
    fn test_mgmt_rewrite_does_not_leak_across_calls() {
        let rule = to_guest();
        let first = rule_args(RuleOp::Append, true, IpVersion::V6, &rule).unwrap();
        let second = rule_args(RuleOp::Delete, true, IpVersion::V6, &rule).unwrap();
        assert_eq!(first[1], "OUTPUT");
        assert_eq!(second, vec!["-D", "OUTPUT", "-o", "eth0", "-j", "DROP"]);
    }

    #[test]
    fn test_underlay_v6() {
        let args = rule_args(RuleOp::Delete, false, IpVersion::V6, &to_guest()).unwrap();
        assert_eq!(
            args,
            vec!["-t", "raw", "-D", "PREROUTING", "-i", "eth0", "-j", "DROP"]
        );

        let args = rule_args(RuleOp::Append, false, IpVersion::V6, &from_guest()).unwrap();
        assert_eq!(args, vec!["-A", "FORWARD", "-o", "eth0", "-j", "DROP"]);
    }

    #[test]
    fn test_underlay_v4_always_forward() {
        let args = rule_args(RuleOp::Append, false, IpVersion::V4, &to_guest()).unwrap();
        assert_eq!(args, vec!["-A", "FORWARD", "-i", "eth0", "-j", "DROP"]);

        let odd = rule!["-s", "10.0.0.1", "-j", "DROP"];
        let args = rule_args(RuleOp::Append, false, IpVersion::V4, &odd).unwrap();
        assert_eq!(args, vec!["-A", "FORWARD", "-s", "10.0.0.1", "-j", "DROP"]);
    }

    #[test]
    fn test_skip_without_direction() {
        let odd = rule!["-s", "10.0.0.1", "-j", "DROP"];
        assert_eq!(select_chain(RuleOp::Append, true, IpVersion::V4, &odd), None);
        assert_eq!(select_chain(RuleOp::Append, false, IpVersion::V6, &odd), None);
        assert_eq!(
            select_chain(RuleOp::Append, true, IpVersion::V6, &IptablesRule::new()),
            None
        );
    }

    #[test]
    fn test_rule_op_tokens() {
        assert_eq!(RuleOp::Append.to_string(), "-A");
        assert_eq!(RuleOp::Insert.to_string(), "-I");
        assert_eq!(RuleOp::Delete.to_string(), "-D");
    }
}
