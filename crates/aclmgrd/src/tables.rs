//! Chain, table, target and set name constants for aclmgrd

/// Direction tokens heading every compiled rule
pub mod direction {
    /// Packets arriving on the interface (outbound to the guest)
    pub const IN_IFACE: &str = "-i";
    /// Packets leaving via the interface (inbound from the guest)
    pub const OUT_IFACE: &str = "-o";
}

/// Rule operations
pub mod op {
    pub const APPEND: &str = "-A";
    pub const INSERT: &str = "-I";
    pub const DELETE: &str = "-D";
}

// Built-in chains
pub const CHAIN_FORWARD: &str = "FORWARD";
pub const CHAIN_OUTPUT: &str = "OUTPUT";
pub const CHAIN_PREROUTING: &str = "PREROUTING";

// Tables other than the default filter table
pub const TABLE_RAW: &str = "raw";

// Jump targets
pub const TARGET_ACCEPT: &str = "ACCEPT";
pub const TARGET_DROP: &str = "DROP";

/// ipset names referenced by compiled rules
pub mod ipset {
    /// Addresses local to the overlay
    pub const LOCAL_IPV6: &str = "local.ipv6";
    /// Prefix of the IPv4 half of a host set pair
    pub const HOST_V4_PREFIX: &str = "ipv4.";
    /// Prefix of the IPv6 half of a host set pair
    pub const HOST_V6_PREFIX: &str = "ipv6.";
    /// Prefix of the per-interface endpoint-id set
    pub const EIDS_PREFIX: &str = "eids.";

    pub const MATCH_DST: &str = "dst";
    pub const MATCH_SRC: &str = "src";
}

/// ACE match type names as written by the configuration source
pub mod match_types {
    pub const IP: &str = "ip";
    pub const PROTOCOL: &str = "protocol";
    pub const FPORT: &str = "fport";
    pub const LPORT: &str = "lport";
    pub const HOST: &str = "host";
    pub const EIDSET: &str = "eidset";
}
