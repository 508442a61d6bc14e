//! Parent/child relationships between devices in a scan batch
//!
//! Chassis and carriers advertise a `provides_link_name`; modules reference it
//! through `connects_to_link_name`. [`resolve_parents`] turns those advertisements
//! into `parent_device` keys, and [`Topology`] is a graph view over the result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::device::Device;

/// Resolve each device's parent from the link names advertised in the batch.
///
/// When two devices provide the same link name the later one wins. Modules whose
/// link matches nothing, or only themselves, keep an empty parent.
pub fn resolve_parents(mut devices: Vec<Device>) -> Vec<Device> {
    let mut links: HashMap<String, String> = HashMap::new();
    for device in &devices {
        if device.provides_link_name.is_empty() {
            continue;
        }
        if let Some(previous) = links.insert(device.provides_link_name.clone(), device.key.clone()) {
            debug!(
                link = %device.provides_link_name,
                previous = %previous,
                device = %device.key,
                "Link name provided by multiple devices, keeping the last"
            );
        }
    }

    for device in devices.iter_mut() {
        if device.connects_to_link_name.is_empty() {
            continue;
        }
        match links.get(&device.connects_to_link_name) {
            Some(parent) if *parent != device.key => device.parent_device = parent.clone(),
            Some(_) => debug!(device = %device.key, link = %device.connects_to_link_name, "Ignoring link to self"),
            None => {}
        }
    }

    devices
}

/// A node in the topology graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub key: String,
    pub name: String,
    pub model: String,
    /// Parent device key, if resolved
    pub parent: Option<String>,
    /// Children device keys
    pub children: Vec<String>,
}

/// Device topology representing the chassis/module structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// All nodes indexed by device key
    nodes: HashMap<String, TopologyNode>,
}

impl Topology {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Build topology from resolved devices
    pub fn from_devices(devices: &[Device]) -> Self {
        let mut topology = Self::new();

        for device in devices {
            topology.add_node(TopologyNode {
                key: device.key.clone(),
                name: device.name.clone(),
                model: device.model.clone(),
                parent: device.has_parent().then(|| device.parent_device.clone()),
                children: Vec::new(),
            });
        }

        for device in devices {
            if device.has_parent() {
                topology.add_child(&device.parent_device, &device.key);
            }
        }

        topology
    }

    pub fn add_node(&mut self, node: TopologyNode) {
        self.nodes.insert(node.key.clone(), node);
    }

    /// Add a child relationship
    pub fn add_child(&mut self, parent_key: &str, child_key: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_key) {
            if !parent.children.iter().any(|c| c == child_key) {
                parent.children.push(child_key.to_string());
            }
        }
    }

    pub fn get_node(&self, key: &str) -> Option<&TopologyNode> {
        self.nodes.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.nodes.values()
    }

    /// Nodes without a resolved parent
    pub fn roots(&self) -> Vec<&TopologyNode> {
        let mut roots: Vec<_> = self.nodes.values().filter(|n| n.parent.is_none()).collect();
        roots.sort_by(|a, b| a.key.cmp(&b.key));
        roots
    }

    /// Get children of a node
    pub fn children(&self, key: &str) -> Vec<&TopologyNode> {
        self.nodes
            .get(key)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get topology as JSON-serializable structure
    pub fn to_graph(&self) -> TopologyGraph {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        TopologyGraph { nodes }
    }
}

/// Serializable topology graph for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(key: &str, provides: &str, connects: &str) -> Device {
        Device {
            key: key.to_string(),
            name: key.to_string(),
            provides_link_name: provides.to_string(),
            connects_to_link_name: connects.to_string(),
            ..Default::default()
        }
    }

    fn parent_of<'a>(devices: &'a [Device], key: &str) -> &'a str {
        &devices.iter().find(|d| d.key == key).unwrap().parent_device
    }

    #[test]
    fn test_chassis_module_resolution() {
        let resolved = resolve_parents(vec![
            device("chassis-1", "bus-A", ""),
            device("module-1", "", "bus-A"),
            device("module-2", "", "bus-Z"),
        ]);

        assert_eq!(parent_of(&resolved, "module-1"), "chassis-1");
        assert_eq!(parent_of(&resolved, "module-2"), "");
        assert_eq!(parent_of(&resolved, "chassis-1"), "");
    }

    #[test]
    fn test_module_before_chassis_still_resolves() {
        let resolved = resolve_parents(vec![
            device("module-1", "", "bus-A"),
            device("chassis-1", "bus-A", ""),
        ]);
        assert_eq!(parent_of(&resolved, "module-1"), "chassis-1");
    }

    #[test]
    fn test_duplicate_link_name_last_wins() {
        let resolved = resolve_parents(vec![
            device("chassis-1", "bus-A", ""),
            device("chassis-2", "bus-A", ""),
            device("module-1", "", "bus-A"),
        ]);
        assert_eq!(parent_of(&resolved, "module-1"), "chassis-2");
    }

    #[test]
    fn test_device_never_parents_itself() {
        let resolved = resolve_parents(vec![device("carrier-1", "bus-A", "bus-A")]);
        assert_eq!(parent_of(&resolved, "carrier-1"), "");

        let topology = Topology::from_devices(&resolved);
        assert_eq!(topology.roots().len(), 1);
        assert!(topology.children("carrier-1").is_empty());

        // a carrier on its own bus still parents the modules on it
        let resolved = resolve_parents(vec![
            device("carrier-1", "bus-A", "bus-A"),
            device("module-1", "", "bus-A"),
        ]);
        assert_eq!(parent_of(&resolved, "carrier-1"), "");
        assert_eq!(parent_of(&resolved, "module-1"), "carrier-1");
    }

    #[test]
    fn test_resolution_preserves_order_and_count() {
        let input = vec![
            device("module-1", "", "bus-A"),
            device("chassis-1", "bus-A", ""),
            device("standalone", "", ""),
        ];
        let keys: Vec<_> = input.iter().map(|d| d.key.clone()).collect();
        let resolved = resolve_parents(input);
        let resolved_keys: Vec<_> = resolved.iter().map(|d| d.key.clone()).collect();
        assert_eq!(keys, resolved_keys);
    }

    #[test]
    fn test_topology_from_devices() {
        let resolved = resolve_parents(vec![
            device("chassis-1", "bus-A", ""),
            device("module-1", "", "bus-A"),
            device("module-2", "", "bus-A"),
            device("module-3", "", "bus-Z"),
        ]);
        let topology = Topology::from_devices(&resolved);

        let children: Vec<_> = topology.children("chassis-1").iter().map(|n| n.key.clone()).collect();
        assert_eq!(children, vec!["module-1", "module-2"]);

        let roots: Vec<_> = topology.roots().iter().map(|n| n.key.clone()).collect();
        assert_eq!(roots, vec!["chassis-1", "module-3"]);
        assert_eq!(
            topology.get_node("module-1").unwrap().parent.as_deref(),
            Some("chassis-1")
        );
    }
}
