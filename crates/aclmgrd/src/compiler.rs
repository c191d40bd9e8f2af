//! ACE and ACL compilation into iptables rules.
//!
//! Compilation is pure: the only side effect the original configlet had
//! (creating host ipsets) is reported through [`CompiledAcl::host_sets`]
//! and carried out by the reconciler before any rule is installed.
//!
//! Every ACE becomes a pair of rules: one headed `-i <ifname>` for traffic
//! towards the guest and one headed `-o <ifname>` for traffic from the
//! guest. Address and port matches are mirrored between the two.

use tracing::{debug, warn};

use crate::rule::{Direction, IptablesRule, IptablesRuleList};
use crate::tables::{ipset, TARGET_ACCEPT, TARGET_DROP};
use crate::types::{Ace, AceAction, IpVersion, MatchType};

/// Output of compiling an ACE or an ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledAcl {
    /// Rules in install order.
    pub rules: IptablesRuleList,
    /// Host names whose ipset pair must exist, in first-use order.
    pub host_sets: Vec<String>,
}

impl CompiledAcl {
    fn add_host_set(&mut self, host: &str) {
        if !self.host_sets.iter().any(|h| h == host) {
            self.host_sets.push(host.to_string());
        }
    }

    fn merge(&mut self, other: CompiledAcl) {
        self.rules.append(other.rules);
        for host in &other.host_sets {
            self.add_host_set(host);
        }
    }
}

fn set_match(set_name: &str, dir: &str) -> [String; 5] {
    [
        "-m".to_string(),
        "set".to_string(),
        "--match-set".to_string(),
        set_name.to_string(),
        dir.to_string(),
    ]
}

fn jump(target: &str) -> [&str; 2] {
    ["-j", target]
}

/// `-m limit --limit <rate>/<unit> --limit-burst <burst>`
fn limit_clause(action: &AceAction) -> [String; 6] {
    [
        "-m".to_string(),
        "limit".to_string(),
        "--limit".to_string(),
        format!("{}/{}", action.limit_rate, action.limit_unit),
        "--limit-burst".to_string(),
        action.limit_burst.to_string(),
    ]
}

/// Compiles one ACE into 2 rules, or 4 when a limit action is present.
///
/// Output order is `[out, in]` followed, for limited entries, by the
/// unlimited `[out, in]` DROP pair that counts traffic above the limit.
pub fn ace_to_rules(ifname: &str, ace: &Ace, ip_ver: IpVersion) -> CompiledAcl {
    let mut compiled = CompiledAcl::default();
    let mut out_args = IptablesRule::with_direction(Direction::ToGuest, ifname);
    let mut in_args = IptablesRule::with_direction(Direction::FromGuest, ifname);

    for m in &ace.matches {
        let value = m.value.as_str();
        match m.kind() {
            MatchType::Ip => {
                out_args.extend(["-d", value]);
                in_args.extend(["-s", value]);
            }
            MatchType::Protocol => {
                out_args.extend(["-p", value]);
                in_args.extend(["-p", value]);
            }
            MatchType::Fport => {
                out_args.extend(["-m", "--dport", value]);
                in_args.extend(["-m", "--sport", value]);
            }
            MatchType::Lport => {
                out_args.extend(["-m", "--sport", value]);
                in_args.extend(["-m", "--dport", value]);
            }
            MatchType::Host => {
                compiled.add_host_set(value);
                let set_name = ip_ver.host_set_name(value);
                out_args.extend(set_match(&set_name, ipset::MATCH_DST));
                in_args.extend(set_match(&set_name, ipset::MATCH_SRC));
            }
            MatchType::Eidset => {
                let set_name = format!("{}{}", ipset::EIDS_PREFIX, ifname);
                out_args.extend(set_match(&set_name, ipset::MATCH_DST));
                in_args.extend(set_match(&set_name, ipset::MATCH_SRC));
            }
            MatchType::Unknown(kind) => {
                // The match is dropped from the conjunction, widening the ACE.
                warn!(
                    "Unsupported ACE match type {:?} (value {:?}) on {}",
                    kind, value, ifname
                );
            }
        }
    }

    let unlimited_out = out_args.clone();
    let unlimited_in = in_args.clone();
    let mut found_drop = false;
    let mut found_limit = false;
    for action in &ace.actions {
        if action.drop {
            found_drop = true;
        } else if action.limit {
            found_limit = true;
            let clause = limit_clause(action);
            out_args.extend(clause.clone());
            in_args.extend(clause);
        }
    }

    let target = if found_drop { TARGET_DROP } else { TARGET_ACCEPT };
    out_args.extend(jump(target));
    in_args.extend(jump(target));
    debug!(rule = %out_args, "Compiled to-guest rule");
    debug!(rule = %in_args, "Compiled from-guest rule");
    compiled.rules.push(out_args);
    compiled.rules.push(in_args);

    if found_limit {
        // Counts and drops what exceeds the limit. Emitted even when the
        // ACE already drops, in which case the limited pair is redundant.
        let unlimited_out = unlimited_out.with_tokens(jump(TARGET_DROP));
        let unlimited_in = unlimited_in.with_tokens(jump(TARGET_DROP));
        debug!(rule = %unlimited_out, "Compiled to-guest over-limit rule");
        debug!(rule = %unlimited_in, "Compiled from-guest over-limit rule");
        compiled.rules.push(unlimited_out);
        compiled.rules.push(unlimited_in);
    }

    compiled
}

/// The four rules allowing overlay-local traffic ahead of any ACE.
///
/// It is enough for either the source or the destination to be local.
pub fn overlay_allow_rules(ifname: &str, overlay_ip: &str) -> [IptablesRule; 4] {
    let base = || IptablesRule::with_direction(Direction::ToGuest, ifname);
    [
        base()
            .with_tokens(set_match(ipset::LOCAL_IPV6, ipset::MATCH_DST))
            .with_tokens(jump(TARGET_ACCEPT)),
        base()
            .with_tokens(set_match(ipset::LOCAL_IPV6, ipset::MATCH_SRC))
            .with_tokens(jump(TARGET_ACCEPT)),
        base()
            .with_tokens(["-d", overlay_ip])
            .with_tokens(jump(TARGET_ACCEPT)),
        base()
            .with_tokens(["-s", overlay_ip])
            .with_tokens(jump(TARGET_ACCEPT)),
    ]
}

/// The implicit-drop pair closing every compiled ACL.
pub fn implicit_drop_rules(ifname: &str) -> [IptablesRule; 2] {
    [
        IptablesRule::with_direction(Direction::ToGuest, ifname).with_tokens(jump(TARGET_DROP)),
        IptablesRule::with_direction(Direction::FromGuest, ifname).with_tokens(jump(TARGET_DROP)),
    ]
}

/// Compiles a whole ACL for one interface.
///
/// The result is the overlay allow rules (when `overlay_ip` is non-empty),
/// then each ACE's rules in order, then the implicit-drop pair. None of the
/// rules carry the leading `<op> <chain>`.
pub fn acl_to_rules(
    ifname: &str,
    acls: &[Ace],
    ip_ver: IpVersion,
    overlay_ip: &str,
) -> CompiledAcl {
    let mut compiled = CompiledAcl::default();

    if !overlay_ip.is_empty() {
        for rule in overlay_allow_rules(ifname, overlay_ip) {
            compiled.rules.push(rule);
        }
    }

    for ace in acls {
        compiled.merge(ace_to_rules(ifname, ace, ip_ver));
    }

    for rule in implicit_drop_rules(ifname) {
        compiled.rules.push(rule);
    }

    compiled
}
