//! Configuration loading for aclmgrd.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::info;
use zedrouter_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};

use crate::types::Ace;

/// Paths of the external binaries the packet filter invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCommands {
    pub iptables: String,
    pub ip6tables: String,
    pub ipset: String,
}

impl Default for FilterCommands {
    fn default() -> Self {
        Self {
            iptables: shell::IPTABLES_CMD.to_string(),
            ip6tables: shell::IP6TABLES_CMD.to_string(),
            ipset: shell::IPSET_CMD.to_string(),
        }
    }
}

/// Loads an ACL (JSON array of ACEs) from a file.
///
/// File format:
/// ```json
/// [
///   {
///     "Matches": [{"Type": "ip", "Value": "10.0.0.0/8"}],
///     "Actions": [{"Drop": true}]
///   }
/// ]
/// ```
pub fn load_acl_file(path: impl AsRef<Path>) -> CfgMgrResult<Vec<Ace>> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    let file = File::open(path).map_err(|e| CfgMgrError::Io {
        path: path_str.clone(),
        source: e,
    })?;

    let acls: Vec<Ace> =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| CfgMgrError::Json {
            path: path_str.clone(),
            source: e,
        })?;

    info!("Loaded {} ACEs from {}", acls.len(), path_str);
    Ok(acls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AceAction, AceMatch};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_commands() {
        let cmds = FilterCommands::default();
        assert_eq!(cmds.iptables, "/sbin/iptables");
        assert_eq!(cmds.ip6tables, "/sbin/ip6tables");
        assert_eq!(cmds.ipset, "/sbin/ipset");
    }

    #[test]
    fn test_load_acl_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"Matches": [{{"Type": "ip", "Value": "10.0.0.0/8"}}], "Actions": [{{"Drop": true}}]}},
                {{"Matches": [{{"Type": "host", "Value": "example.com"}}]}}
            ]"#
        )
        .unwrap();

        let acls = load_acl_file(file.path()).unwrap();
        assert_eq!(acls.len(), 2);
        assert_eq!(acls[0].matches, vec![AceMatch::new("ip", "10.0.0.0/8")]);
        assert_eq!(acls[0].actions, vec![AceAction::new_drop()]);
        assert!(acls[1].actions.is_empty());
    }

    #[test]
    fn test_load_acl_file_empty_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        assert!(load_acl_file(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_acl_file_missing() {
        let err = load_acl_file("/nonexistent/acl.json").unwrap_err();
        assert!(matches!(err, CfgMgrError::Io { .. }));
    }

    #[test]
    fn test_load_acl_file_errors_name_the_file() {
        match load_acl_file("/nonexistent/acl.json") {
            Err(CfgMgrError::Io { path, .. }) => assert_eq!(path, "/nonexistent/acl.json"),
            other => panic!("Expected Io error, got {:?}", other),
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let expected = file.path().display().to_string();
        match load_acl_file(file.path()) {
            Err(CfgMgrError::Json { path, .. }) => assert_eq!(path, expected),
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_acl_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Matches": []}}"#).unwrap();
        let err = load_acl_file(file.path()).unwrap_err();
        assert!(matches!(err, CfgMgrError::Json { .. }));
    }
}
