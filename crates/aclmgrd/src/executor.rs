//! Packet-filter invocation.
//!
//! [`PacketFilter`] is the seam between the reconciler and the kernel: the
//! reconciler only ever produces argument vectors, and an implementation
//! decides how they are carried out.

use async_trait::async_trait;
use tracing::debug;
use zedrouter_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};

use crate::config::FilterCommands;
use crate::types::IpVersion;

/// External collaborators the ACL reconciler drives.
#[async_trait]
pub trait PacketFilter: Send {
    /// Runs `iptables <args>`.
    async fn iptables(&mut self, args: &[String]) -> CfgMgrResult<()>;

    /// Runs `ip6tables <args>`.
    async fn ip6tables(&mut self, args: &[String]) -> CfgMgrResult<()>;

    /// Ensures the ipsets `ipv4.<name>` and `ipv6.<name>` exist.
    async fn ipset_create_pair(&mut self, name: &str) -> CfgMgrResult<()>;
}

/// Sends `args` to iptables or ip6tables according to `ip_ver`.
pub async fn dispatch<F: PacketFilter + ?Sized>(
    filter: &mut F,
    ip_ver: IpVersion,
    args: &[String],
) -> CfgMgrResult<()> {
    match ip_ver {
        IpVersion::V4 => filter.iptables(args).await,
        IpVersion::V6 => filter.ip6tables(args).await,
    }
}

fn ipset_create_args(set_name: &str, family: &str) -> [String; 6] {
    [
        "-exist".to_string(),
        "create".to_string(),
        set_name.to_string(),
        "hash:ip".to_string(),
        "family".to_string(),
        family.to_string(),
    ]
}

/// Runs the real binaries through the shell.
#[derive(Debug, Clone, Default)]
pub struct ShellPacketFilter {
    commands: FilterCommands,
}

impl ShellPacketFilter {
    pub fn new(commands: FilterCommands) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl PacketFilter for ShellPacketFilter {
    async fn iptables(&mut self, args: &[String]) -> CfgMgrResult<()> {
        let cmd = shell::build_command(&self.commands.iptables, args);
        shell::exec_or_throw(&cmd).await.map(|_| ())
    }

    async fn ip6tables(&mut self, args: &[String]) -> CfgMgrResult<()> {
        let cmd = shell::build_command(&self.commands.ip6tables, args);
        shell::exec_or_throw(&cmd).await.map(|_| ())
    }

    async fn ipset_create_pair(&mut self, name: &str) -> CfgMgrResult<()> {
        for (set_name, family) in [
            (IpVersion::V4.host_set_name(name), "inet"),
            (IpVersion::V6.host_set_name(name), "inet6"),
        ] {
            let cmd =
                shell::build_command(&self.commands.ipset, ipset_create_args(&set_name, family));
            shell::exec_or_throw(&cmd).await?;
        }
        Ok(())
    }
}

/// One call made against a [`RecordingPacketFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCall {
    Iptables(Vec<String>),
    Ip6tables(Vec<String>),
    IpsetCreatePair(String),
}

impl FilterCall {
    /// Command line(s) this call stands for.
    pub fn command_lines(&self, commands: &FilterCommands) -> Vec<String> {
        match self {
            FilterCall::Iptables(args) => vec![shell::build_command(&commands.iptables, args)],
            FilterCall::Ip6tables(args) => vec![shell::build_command(&commands.ip6tables, args)],
            FilterCall::IpsetCreatePair(name) => [
                (IpVersion::V4.host_set_name(name), "inet"),
                (IpVersion::V6.host_set_name(name), "inet6"),
            ]
            .iter()
            .map(|(set_name, family)| {
                shell::build_command(&commands.ipset, ipset_create_args(set_name, family))
            })
            .collect(),
        }
    }

    /// The argv of an iptables/ip6tables call.
    pub fn args(&self) -> Option<&[String]> {
        match self {
            FilterCall::Iptables(args) | FilterCall::Ip6tables(args) => Some(args.as_slice()),
            FilterCall::IpsetCreatePair(_) => None,
        }
    }
}

/// Records every call instead of touching the kernel.
///
/// Used for dry runs and tests. Calls whose argv contains a token listed
/// via [`fail_on_token`](Self::fail_on_token) are recorded and then fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingPacketFilter {
    calls: Vec<FilterCall>,
    failing_tokens: Vec<String>,
}

impl RecordingPacketFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes any call carrying `token` return a command failure.
    pub fn fail_on_token(mut self, token: impl Into<String>) -> Self {
        self.failing_tokens.push(token.into());
        self
    }

    pub fn calls(&self) -> &[FilterCall] {
        &self.calls
    }

    /// Drains the recorded calls.
    pub fn take_calls(&mut self) -> Vec<FilterCall> {
        std::mem::take(&mut self.calls)
    }

    fn record(&mut self, call: FilterCall) -> CfgMgrResult<()> {
        let failing = match &call {
            FilterCall::Iptables(args) | FilterCall::Ip6tables(args) => {
                args.iter().any(|a| self.failing_tokens.contains(a))
            }
            FilterCall::IpsetCreatePair(name) => self.failing_tokens.contains(name),
        };
        debug!(?call, "Recorded packet filter call");
        let command = format!("{:?}", call);
        self.calls.push(call);

        if failing {
            Err(CfgMgrError::ShellCommandFailed {
                command,
                exit_code: 1,
                output: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PacketFilter for RecordingPacketFilter {
    async fn iptables(&mut self, args: &[String]) -> CfgMgrResult<()> {
        self.record(FilterCall::Iptables(args.to_vec()))
    }

    async fn ip6tables(&mut self, args: &[String]) -> CfgMgrResult<()> {
        self.record(FilterCall::Ip6tables(args.to_vec()))
    }

    async fn ipset_create_pair(&mut self, name: &str) -> CfgMgrResult<()> {
        self.record(FilterCall::IpsetCreatePair(name.to_string()))
    }
}
