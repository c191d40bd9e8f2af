//! ACL Manager Daemon Entry Point

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zedrouter_aclmgrd::chain::{self, RuleOp};
use zedrouter_aclmgrd::config::{load_acl_file, FilterCommands};
use zedrouter_aclmgrd::{
    acl_to_rules, Ace, AclBinding, AclMgr, ApplyStats, IpVersion, PacketFilter,
    RecordingPacketFilter, ShellPacketFilter,
};
use zedrouter_cfgmgr_common::shell;

/// Per-interface ACL manager for iptables/ip6tables
#[derive(Parser, Debug)]
#[command(name = "aclmgrd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print the packet-filter commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,

    /// Path of the iptables binary
    #[arg(long, default_value = shell::IPTABLES_CMD, global = true)]
    iptables_cmd: String,

    /// Path of the ip6tables binary
    #[arg(long, default_value = shell::IP6TABLES_CMD, global = true)]
    ip6tables_cmd: String,

    /// Path of the ipset binary
    #[arg(long, default_value = shell::IPSET_CMD, global = true)]
    ipset_cmd: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct BindingArgs {
    /// Guest-facing interface name
    #[arg(long)]
    ifname: String,

    /// Management interface (rules go through OUTPUT instead of FORWARD)
    #[arg(long)]
    mgmt: bool,

    /// IP version of the packet filter (4 or 6)
    #[arg(long, value_parser = parse_ip_ver)]
    ip_ver: IpVersion,

    /// Local overlay endpoint address
    #[arg(long, default_value = "")]
    overlay_ip: String,
}

impl BindingArgs {
    fn binding(&self) -> AclBinding {
        AclBinding::new(self.ifname.as_str(), self.mgmt, self.ip_ver)
            .with_overlay_ip(&self.overlay_ip)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled rules and the argv each would be installed with
    Compile {
        #[command(flatten)]
        binding: BindingArgs,

        /// ACL file (JSON array of ACEs)
        #[arg(long)]
        acl: PathBuf,
    },
    /// Install an ACL
    Create {
        #[command(flatten)]
        binding: BindingArgs,

        /// ACL file (JSON array of ACEs)
        #[arg(long)]
        acl: PathBuf,
    },
    /// Reconcile the installed ACL with a new one
    Update {
        #[command(flatten)]
        binding: BindingArgs,

        /// Currently installed ACL
        #[arg(long)]
        old_acl: PathBuf,

        /// Requested ACL
        #[arg(long)]
        acl: PathBuf,
    },
    /// Remove an installed ACL
    Delete {
        #[command(flatten)]
        binding: BindingArgs,

        /// ACL file (JSON array of ACEs)
        #[arg(long)]
        acl: PathBuf,
    },
}

/// A configlet operation with its ACLs loaded.
enum Operation {
    Create(Vec<Ace>),
    Update(Vec<Ace>, Vec<Ace>),
    Delete(Vec<Ace>),
}

fn parse_ip_ver(s: &str) -> Result<IpVersion, String> {
    let raw: u8 = s.parse().map_err(|_| format!("invalid IP version: {}", s))?;
    IpVersion::try_from(raw).map_err(|e| e.to_string())
}

fn load(path: &Path) -> anyhow::Result<Vec<Ace>> {
    load_acl_file(path).with_context(|| format!("failed to load ACL from {}", path.display()))
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

fn print_compiled(binding: &AclBinding, acls: &[Ace]) {
    let compiled = acl_to_rules(
        &binding.ifname,
        acls,
        binding.ip_ver,
        binding.overlay_ip_str(),
    );

    for host in &compiled.host_sets {
        println!(
            "# ipset pair: {} {}",
            IpVersion::V4.host_set_name(host),
            IpVersion::V6.host_set_name(host)
        );
    }
    for rule in &compiled.rules {
        match chain::rule_args(RuleOp::Append, binding.is_mgmt, binding.ip_ver, rule) {
            Some(args) => println!("{} {}", binding.ip_ver.iptables_name(), args.join(" ")),
            None => println!("# skipped: {}", rule),
        }
    }
}

async fn apply<F: PacketFilter>(
    mgr: &mut AclMgr<F>,
    binding: &AclBinding,
    operation: &Operation,
) -> ApplyStats {
    match operation {
        Operation::Create(acls) => mgr.create_acl_configlet(binding, acls).await,
        Operation::Update(old, new) => mgr.update_acl_configlet(binding, old, new).await,
        Operation::Delete(acls) => mgr.delete_acl_configlet(binding, acls).await,
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let commands = FilterCommands {
        iptables: cli.iptables_cmd,
        ip6tables: cli.ip6tables_cmd,
        ipset: cli.ipset_cmd,
    };

    let (binding, operation) = match &cli.command {
        Command::Compile { binding, acl } => {
            print_compiled(&binding.binding(), &load(acl)?);
            return Ok(true);
        }
        Command::Create { binding, acl } => (binding.binding(), Operation::Create(load(acl)?)),
        Command::Update {
            binding,
            old_acl,
            acl,
        } => (
            binding.binding(),
            Operation::Update(load(old_acl)?, load(acl)?),
        ),
        Command::Delete { binding, acl } => (binding.binding(), Operation::Delete(load(acl)?)),
    };

    let stats = if cli.dry_run {
        let mut mgr = AclMgr::new(RecordingPacketFilter::new());
        let stats = apply(&mut mgr, &binding, &operation).await;
        for call in mgr.filter().calls() {
            for line in call.command_lines(&commands) {
                println!("{}", line);
            }
        }
        stats
    } else {
        let mut mgr = AclMgr::new(ShellPacketFilter::new(commands));
        apply(&mut mgr, &binding, &operation).await
    };

    info!("Done on {}: {}", binding.ifname, stats);
    Ok(stats.is_clean())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("Starting aclmgrd");

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("Some packet-filter commands failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
