//! ACL type definitions.
//!
//! These mirror the records produced by the configuration source: an
//! [`Ace`] is a conjunction of [`AceMatch`] predicates plus a list of
//! [`AceAction`] directives. Field names on the wire are PascalCase.

use serde::{Deserialize, Serialize};
use std::fmt;
use zedrouter_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use crate::tables::{ipset, match_types};

/// IP version of the packet filter being programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4 (`iptables`).
    V4,
    /// IPv6 (`ip6tables`).
    V6,
}

impl IpVersion {
    /// Name of this version's half of a host set pair.
    pub fn host_set_name(&self, host: &str) -> String {
        match self {
            IpVersion::V4 => format!("{}{}", ipset::HOST_V4_PREFIX, host),
            IpVersion::V6 => format!("{}{}", ipset::HOST_V6_PREFIX, host),
        }
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, IpVersion::V6)
    }

    /// Name of the packet-filter tool for this version.
    pub fn iptables_name(&self) -> &'static str {
        match self {
            IpVersion::V4 => "iptables",
            IpVersion::V6 => "ip6tables",
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = CfgMgrError;

    fn try_from(value: u8) -> CfgMgrResult<Self> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(CfgMgrError::invalid_config(
                "ip_ver",
                format!("must be 4 or 6, got {}", other),
            )),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "4"),
            IpVersion::V6 => write!(f, "6"),
        }
    }
}

/// Kind of an ACE match predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// Literal address or CIDR.
    Ip,
    /// Protocol name or number.
    Protocol,
    /// Far (peer) port.
    Fport,
    /// Local port.
    Lport,
    /// Named host set, backed by an ipset pair.
    Host,
    /// The interface's endpoint-id set.
    Eidset,
    /// Anything else; kept for logging.
    Unknown(String),
}

impl From<&str> for MatchType {
    fn from(s: &str) -> Self {
        match s {
            match_types::IP => MatchType::Ip,
            match_types::PROTOCOL => MatchType::Protocol,
            match_types::FPORT => MatchType::Fport,
            match_types::LPORT => MatchType::Lport,
            match_types::HOST => MatchType::Host,
            match_types::EIDSET => MatchType::Eidset,
            other => MatchType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Ip => write!(f, "{}", match_types::IP),
            MatchType::Protocol => write!(f, "{}", match_types::PROTOCOL),
            MatchType::Fport => write!(f, "{}", match_types::FPORT),
            MatchType::Lport => write!(f, "{}", match_types::LPORT),
            MatchType::Host => write!(f, "{}", match_types::HOST),
            MatchType::Eidset => write!(f, "{}", match_types::EIDSET),
            MatchType::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// A single match predicate of an ACE.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AceMatch {
    /// Match type as written in the configuration.
    #[serde(rename = "Type")]
    pub match_type: String,
    /// Match value; its shape depends on the type.
    pub value: String,
}

impl AceMatch {
    pub fn new(match_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type: match_type.into(),
            value: value.into(),
        }
    }

    /// Parsed kind of this match.
    pub fn kind(&self) -> MatchType {
        MatchType::from(self.match_type.as_str())
    }
}

/// An action directive of an ACE.
///
/// The flags are orthogonal on the wire. When an entry sets `drop`, its
/// `limit` flag is not consulted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AceAction {
    pub drop: bool,
    pub limit: bool,
    pub limit_rate: u32,
    pub limit_unit: String,
    pub limit_burst: u32,
}

impl AceAction {
    /// A plain drop action.
    pub fn new_drop() -> Self {
        Self {
            drop: true,
            ..Self::default()
        }
    }

    /// A token-bucket limit, e.g. `new_limit(4, "s", 4)` for `4/s` burst 4.
    pub fn new_limit(rate: u32, unit: impl Into<String>, burst: u32) -> Self {
        Self {
            limit: true,
            limit_rate: rate,
            limit_unit: unit.into(),
            limit_burst: burst,
            ..Self::default()
        }
    }
}

/// Access Control Entry: matches are ANDed; actions decide the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ace {
    pub matches: Vec<AceMatch>,
    pub actions: Vec<AceAction>,
}

impl Ace {
    pub fn new(matches: Vec<AceMatch>, actions: Vec<AceAction>) -> Self {
        Self { matches, actions }
    }
}

/// The interface an ACL is bound to, and how its rules are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclBinding {
    /// Linux interface name.
    pub ifname: String,
    /// Management (overlay) interface: host-terminated traffic goes via OUTPUT.
    pub is_mgmt: bool,
    /// Packet filter family.
    pub ip_ver: IpVersion,
    /// Local overlay endpoint address, if this is an overlay interface.
    pub overlay_ip: Option<String>,
}

impl AclBinding {
    pub fn new(ifname: impl Into<String>, is_mgmt: bool, ip_ver: IpVersion) -> Self {
        Self {
            ifname: ifname.into(),
            is_mgmt,
            ip_ver,
            overlay_ip: None,
        }
    }

    /// Sets the overlay IP; an empty string means no overlay.
    pub fn with_overlay_ip(mut self, overlay_ip: &str) -> Self {
        self.overlay_ip = if overlay_ip.is_empty() {
            None
        } else {
            Some(overlay_ip.to_string())
        };
        self
    }

    /// Overlay IP as the string form used by the compiler ("" if none).
    pub fn overlay_ip_str(&self) -> &str {
        self.overlay_ip.as_deref().unwrap_or("")
    }
}
