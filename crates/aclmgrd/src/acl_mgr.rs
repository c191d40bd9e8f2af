//! ACL Manager - installs, reconciles and removes per-interface ACLs

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::chain::{self, RuleOp};
use crate::compiler;
use crate::executor::{self, PacketFilter};
use crate::rule::{Direction, IptablesRule, IptablesRuleList};
use crate::tables::{CHAIN_FORWARD, TARGET_DROP};
use crate::types::{Ace, AclBinding};

/// Outcome of one configlet operation.
///
/// Every collaborator call is counted once: `applied` when it succeeded,
/// `failed` when it returned an error. `skipped` counts rules the chain
/// selector rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplyStats {
    /// True if no call failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.applied += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl fmt::Display for ApplyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "applied={} failed={} skipped={}",
            self.applied, self.failed, self.skipped
        )
    }
}

/// ACL Manager
///
/// Drives a [`PacketFilter`] with the rules compiled from an ACL. All
/// operations are best-effort: failures are logged and counted, never
/// returned, and nothing is rolled back. Callers must serialize operations
/// per interface; `&mut self` enforces that for a single manager.
pub struct AclMgr<F> {
    filter: F,
}

impl<F: PacketFilter> AclMgr<F> {
    pub fn new(filter: F) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut F {
        &mut self.filter
    }

    pub fn into_filter(self) -> F {
        self.filter
    }

    /// Installs the compiled ACL with `-A`.
    ///
    /// With an overlay address on an IPv6 binding, also appends the
    /// `ip6tables FORWARD -i <ifname> -j DROP` rule that keeps the LISP
    /// daemon from seeing the traffic on the tunnel interface.
    #[instrument(
        skip(self, binding, acls),
        fields(ifname = %binding.ifname, ip_ver = %binding.ip_ver, mgmt = binding.is_mgmt)
    )]
    pub async fn create_acl_configlet(
        &mut self,
        binding: &AclBinding,
        acls: &[Ace],
    ) -> ApplyStats {
        info!("Creating ACL configlet with {} ACEs", acls.len());
        let mut stats = ApplyStats::default();

        let rules = self.compile(binding, acls, &mut stats).await;
        for rule in &rules {
            self.apply_rule(RuleOp::Append, binding, rule, &mut stats)
                .await;
        }

        if binding.overlay_ip.is_some() && binding.ip_ver.is_v6() {
            self.overlay_drop(RuleOp::Append, binding, &mut stats).await;
        }

        info!("ACL configlet created: {}", stats);
        stats
    }

    /// Moves the installed ruleset from `old_acls` to `new_acls`.
    ///
    /// Rules only in the old compilation are deleted first, then rules only
    /// in the new one are inserted at the chain head, both in list order.
    /// Rules present in both are left alone. The overlay DROP rule is not
    /// touched.
    #[instrument(
        skip(self, binding, old_acls, new_acls),
        fields(ifname = %binding.ifname, ip_ver = %binding.ip_ver, mgmt = binding.is_mgmt)
    )]
    pub async fn update_acl_configlet(
        &mut self,
        binding: &AclBinding,
        old_acls: &[Ace],
        new_acls: &[Ace],
    ) -> ApplyStats {
        info!(
            "Updating ACL configlet: {} -> {} ACEs",
            old_acls.len(),
            new_acls.len()
        );
        let mut stats = ApplyStats::default();

        let old_rules = self.compile(binding, old_acls, &mut stats).await;
        let new_rules = self.compile(binding, new_acls, &mut stats).await;

        for rule in old_rules.missing_from(&new_rules) {
            self.apply_rule(RuleOp::Delete, binding, rule, &mut stats)
                .await;
        }
        for rule in new_rules.missing_from(&old_rules) {
            self.apply_rule(RuleOp::Insert, binding, rule, &mut stats)
                .await;
        }

        info!("ACL configlet updated: {}", stats);
        stats
    }

    /// Removes the compiled ACL with `-D`, plus the overlay DROP rule when
    /// an overlay address is set.
    #[instrument(
        skip(self, binding, acls),
        fields(ifname = %binding.ifname, ip_ver = %binding.ip_ver, mgmt = binding.is_mgmt)
    )]
    pub async fn delete_acl_configlet(
        &mut self,
        binding: &AclBinding,
        acls: &[Ace],
    ) -> ApplyStats {
        info!("Deleting ACL configlet with {} ACEs", acls.len());
        let mut stats = ApplyStats::default();

        let rules = self.compile(binding, acls, &mut stats).await;
        for rule in &rules {
            self.apply_rule(RuleOp::Delete, binding, rule, &mut stats)
                .await;
        }

        // Removed whenever an overlay is set, independent of the IP version
        if binding.overlay_ip.is_some() {
            self.overlay_drop(RuleOp::Delete, binding, &mut stats).await;
        }

        info!("ACL configlet deleted: {}", stats);
        stats
    }

    /// Compiles `acls` and makes sure every referenced host ipset exists.
    async fn compile(
        &mut self,
        binding: &AclBinding,
        acls: &[Ace],
        stats: &mut ApplyStats,
    ) -> IptablesRuleList {
        let compiled = compiler::acl_to_rules(
            &binding.ifname,
            acls,
            binding.ip_ver,
            binding.overlay_ip_str(),
        );

        for host in &compiled.host_sets {
            let result = self.filter.ipset_create_pair(host).await;
            if let Err(e) = &result {
                // Rules referencing the set are still installed
                warn!("ipset create for {} failed: {}", host, e);
            }
            stats.record(result.is_ok());
        }

        compiled.rules
    }

    async fn apply_rule(
        &mut self,
        operation: RuleOp,
        binding: &AclBinding,
        rule: &IptablesRule,
        stats: &mut ApplyStats,
    ) {
        let args = chain::rule_args(operation, binding.is_mgmt, binding.ip_ver, rule);
        let Some(args) = args else {
            warn!("Skipping rule without usable direction: {}", rule);
            stats.skipped += 1;
            return;
        };

        debug!("{} {}", binding.ip_ver.iptables_name(), args.join(" "));
        let result = executor::dispatch(&mut self.filter, binding.ip_ver, &args).await;
        if let Err(e) = &result {
            warn!(retryable = e.is_retryable(), "Rule {} [{}] failed: {}", operation, rule, e);
        }
        stats.record(result.is_ok());
    }

    async fn overlay_drop(
        &mut self,
        operation: RuleOp,
        binding: &AclBinding,
        stats: &mut ApplyStats,
    ) {
        let mut args = vec![operation.as_str().to_string(), CHAIN_FORWARD.to_string()];
        args.extend(
            IptablesRule::with_direction(Direction::ToGuest, &binding.ifname)
                .with_tokens(["-j", TARGET_DROP])
                .into_tokens(),
        );

        debug!("ip6tables {}", args.join(" "));
        let result = self.filter.ip6tables(&args).await;
        if let Err(e) = &result {
            warn!(
                "Overlay DROP rule {} on {} failed: {}",
                operation, binding.ifname, e
            );
        }
        stats.record(result.is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FilterCall, RecordingPacketFilter};
    use crate::types::{AceAction, AceMatch, IpVersion};
    use pretty_assertions::assert_eq;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn drop_ip(ip: &str) -> Ace {
        Ace::new(vec![AceMatch::new("ip", ip)], vec![AceAction::new_drop()])
    }

    fn mock_mgr() -> AclMgr<RecordingPacketFilter> {
        AclMgr::new(RecordingPacketFilter::new())
    }

    #[tokio::test]
    async fn test_create_empty_underlay_v4() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", false, IpVersion::V4);

        let stats = mgr.create_acl_configlet(&binding, &[]).await;

        assert_eq!(
            mgr.filter().calls(),
            &[
                FilterCall::Iptables(argv(&["-A", "FORWARD", "-i", "eth0", "-j", "DROP"])),
                FilterCall::Iptables(argv(&["-A", "FORWARD", "-o", "eth0", "-j", "DROP"])),
            ]
        );
        assert_eq!(
            stats,
            ApplyStats {
                applied: 2,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_create_overlay_v6_adds_side_channel_drop() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("dbo1x0", false, IpVersion::V6).with_overlay_ip("fd00::1");

        mgr.create_acl_configlet(&binding, &[]).await;

        let calls = mgr.filter().calls();
        assert_eq!(calls.len(), 4 + 2 + 1);
        assert_eq!(
            calls.last(),
            Some(&FilterCall::Ip6tables(argv(&[
                "-A", "FORWARD", "-i", "dbo1x0", "-j", "DROP"
            ])))
        );
        // Underlay v6 to-guest rules land in raw/PREROUTING
        assert_eq!(
            calls[0].args().unwrap()[..4],
            argv(&["-t", "raw", "-A", "PREROUTING"])[..]
        );
    }

    #[tokio::test]
    async fn test_create_overlay_v4_has_no_side_channel_drop() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", false, IpVersion::V4).with_overlay_ip("fd00::1");

        mgr.create_acl_configlet(&binding, &[]).await;

        assert!(mgr
            .filter()
            .calls()
            .iter()
            .all(|c| matches!(c, FilterCall::Iptables(_))));
    }

    #[tokio::test]
    async fn test_create_ensures_host_sets_before_rules() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth1", false, IpVersion::V4);
        let acls = vec![Ace::new(vec![AceMatch::new("host", "zededa.net")], vec![])];

        mgr.create_acl_configlet(&binding, &acls).await;

        let calls = mgr.filter().calls();
        assert_eq!(calls[0], FilterCall::IpsetCreatePair("zededa.net".to_string()));
        assert_eq!(calls.len(), 1 + 2 + 2);
    }

    #[tokio::test]
    async fn test_ipset_failure_does_not_abort() {
        let mut mgr = AclMgr::new(RecordingPacketFilter::new().fail_on_token("zededa.net"));
        let binding = AclBinding::new("eth1", false, IpVersion::V4);
        let acls = vec![Ace::new(vec![AceMatch::new("host", "zededa.net")], vec![])];

        let stats = mgr.create_acl_configlet(&binding, &acls).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.applied, 4);
        assert!(!stats.is_clean());
    }

    #[tokio::test]
    async fn test_command_failure_continues() {
        let mut mgr = AclMgr::new(RecordingPacketFilter::new().fail_on_token("10.0.0.0/8"));
        let binding = AclBinding::new("eth0", false, IpVersion::V4);

        let stats = mgr.create_acl_configlet(&binding, &[drop_ip("10.0.0.0/8")]).await;

        assert_eq!(mgr.filter().calls().len(), 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.applied, 2);
    }

    #[tokio::test]
    async fn test_mgmt_rules_use_output_and_forward() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("dbo1x0", true, IpVersion::V6);

        mgr.create_acl_configlet(&binding, &[]).await;

        assert_eq!(
            mgr.filter().calls(),
            &[
                FilterCall::Ip6tables(argv(&["-A", "OUTPUT", "-o", "dbo1x0", "-j", "DROP"])),
                FilterCall::Ip6tables(argv(&["-A", "FORWARD", "-o", "dbo1x0", "-j", "DROP"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_deletes_then_inserts() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", false, IpVersion::V4);
        let old = vec![drop_ip("10.0.0.0/8")];
        let new = vec![drop_ip("192.168.0.0/16")];

        let stats = mgr.update_acl_configlet(&binding, &old, &new).await;

        assert_eq!(
            mgr.filter().calls(),
            &[
                FilterCall::Iptables(argv(&[
                    "-D", "FORWARD", "-i", "eth0", "-d", "10.0.0.0/8", "-j", "DROP"
                ])),
                FilterCall::Iptables(argv(&[
                    "-D", "FORWARD", "-o", "eth0", "-s", "10.0.0.0/8", "-j", "DROP"
                ])),
                FilterCall::Iptables(argv(&[
                    "-I", "FORWARD", "-i", "eth0", "-d", "192.168.0.0/16", "-j", "DROP"
                ])),
                FilterCall::Iptables(argv(&[
                    "-I", "FORWARD", "-o", "eth0", "-s", "192.168.0.0/16", "-j", "DROP"
                ])),
            ]
        );
        assert_eq!(stats.applied, 4);
    }

    #[tokio::test]
    async fn test_update_identical_is_noop() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", true, IpVersion::V6).with_overlay_ip("fd00::1");
        let acls = vec![drop_ip("fd00::/8")];

        let stats = mgr.update_acl_configlet(&binding, &acls, &acls).await;

        assert!(mgr.filter().calls().is_empty());
        assert_eq!(stats, ApplyStats::default());
    }

    #[tokio::test]
    async fn test_delete_overlay_removes_side_channel_drop() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", false, IpVersion::V4).with_overlay_ip("fd00::1");

        mgr.delete_acl_configlet(&binding, &[]).await;

        let calls = mgr.filter().calls();
        assert!(calls[..calls.len() - 1]
            .iter()
            .all(|c| c.args().is_some_and(|a| a[1] == "-D" || a[0] == "-D")));
        assert_eq!(
            calls.last(),
            Some(&FilterCall::Ip6tables(argv(&[
                "-D", "FORWARD", "-i", "eth0", "-j", "DROP"
            ])))
        );
    }

    #[tokio::test]
    async fn test_mgmt_v4_rules_are_not_skipped() {
        let mut mgr = mock_mgr();
        let binding = AclBinding::new("eth0", true, IpVersion::V4);
        let stats = mgr.create_acl_configlet(&binding, &[drop_ip("10.0.0.1")]).await;
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.applied, 4);
    }
}
