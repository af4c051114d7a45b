//! Fleet nodes.
//!
//! A `NodeRef` names one remote machine: a stable `alias` (unique within the
//! fleet, used as the job id when dispatching) and the address to reach it
//! at. One SSH connection is created per node; the orchestration engine only
//! reads these records.

use std::fmt;
use std::fs::File;
use std::str::FromStr;

use colourado::Color;
use colored::*;
use serde::Deserialize;
use void::Void;

use crate::serde::string_or_mapping;

#[derive(Debug, Clone)]
pub struct NodeRef {
    /// Stable short name, unique within the fleet.
    pub alias: String,
    /// Network endpoint to connect to. Assignable at runtime.
    pub addr: String,
}

impl NodeRef {
    pub fn new(alias: String, addr: String) -> Self {
        Self { alias, addr }
    }

    /// For pretty-printing the node tag.
    /// Surrounds with brackets and colors it with a random color.
    pub fn prettify(&self, color: Color) -> ColoredString {
        let r = (color.red * 256.0) as u8;
        let g = (color.green * 256.0) as u8;
        let b = (color.blue * 256.0) as u8;
        format!("{}", self).truecolor(r, g, b)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.alias == self.addr {
            write!(f, "[{}]", self.alias)
        } else {
            write!(f, "[{} ({})]", self.alias, self.addr)
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeSpec(#[serde(deserialize_with = "string_or_mapping")] NodeSpecInner);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSpecInner {
    #[serde(default)]
    alias: Option<String>,
    addr: String,
}

impl FromStr for NodeSpecInner {
    type Err = Void;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            alias: None,
            addr: s.to_string(),
        })
    }
}

/// Reads the hosts file into an ordered fleet of nodes.
///
/// Entries are either bare strings (the address doubles as the alias) or
/// mappings with `addr` and an optional `alias` key.
pub fn get_nodes(hosts_file: &str) -> Vec<NodeRef> {
    let hosts_fd =
        File::open(hosts_file).unwrap_or_else(|_| panic!("Failed to open {}", hosts_file));
    let node_specs: Vec<NodeSpec> = serde_yaml::from_reader(hosts_fd)
        .unwrap_or_else(|_| panic!("Failed to parse {}", hosts_file));

    let mut nodes = Vec::with_capacity(node_specs.len());
    for NodeSpec(spec) in node_specs {
        let alias = spec.alias.unwrap_or_else(|| spec.addr.clone());
        nodes.push(NodeRef::new(alias, spec.addr));
    }

    // Aliases key dispatcher jobs, so duplicates would make outcomes ambiguous.
    for (i, node) in nodes.iter().enumerate() {
        if nodes[..i].iter().any(|other| other.alias == node.alias) {
            panic!("Duplicate node alias '{}' in {}", node.alias, hosts_file);
        }
    }

    eprintln!("[muster] Nodes detected:\n{:#?}", &nodes);
    nodes
}
