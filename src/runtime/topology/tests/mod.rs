//! Topology tests

use crate::runtime::memory::SlabAllocator;
use crate::runtime::topology::{NumaNode, Topology};
use crate::util::config::{RuntimeConfig, SlabConfig};

#[cfg(test)]
mod level_tests {
    use super::*;

    #[test]
    fn test_level_numbering() {
        let topology = Topology::uniform(16, 2, vec![2, 4]);
        assert_eq!(topology.num_levels(), 5);
        assert_eq!(topology.node_level(), 3);
        assert_eq!(topology.lowest_common_level(5, 5), 0);
        assert_eq!(topology.lowest_common_level(4, 5), 1);
        assert_eq!(topology.lowest_common_level(4, 6), 2);
        assert_eq!(topology.lowest_common_level(0, 7), 3);
        assert_eq!(topology.lowest_common_level(0, 8), 4);
    }

    #[test]
    fn test_siblings_exclude_self() {
        let topology = Topology::uniform(8, 2, vec![2]);
        assert!(topology.siblings_at_level(0, 0).is_empty());
        assert_eq!(topology.siblings_at_level(0, 1), &[1]);
        assert_eq!(topology.siblings_at_level(0, 2), &[1, 2, 3]);
        assert_eq!(topology.siblings_at_level(0, 3), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_cache_groups_do_not_cross_nodes() {
        // Nodes split at worker 3, inside the width-4 group 0..4.
        let topology =
            Topology::from_parts((0..6).collect(), vec![0, 0, 0, 1, 1, 1], 2, vec![4], None)
                .unwrap();
        assert_eq!(topology.lowest_common_level(2, 3), 3);
        assert!(topology.siblings_at_level(3, 1).is_empty());
    }

    #[test]
    fn test_default_transfer_costs() {
        let topology = Topology::uniform(4, 2, vec![]);
        assert_eq!(topology.transfer_cost(0, 0), 10.0);
        assert_eq!(topology.transfer_cost(0, 1), 20.0);
    }

    #[test]
    fn test_inconsistent_parts_rejected() {
        assert!(Topology::from_parts(vec![0, 1], vec![0], 1, vec![], None).is_err());
        assert!(Topology::from_parts(vec![0], vec![2], 2, vec![], None).is_err());
        assert!(Topology::from_parts(vec![0], vec![0], 2, vec![], Some(vec![vec![1.0]])).is_err());
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_affinity_list_drives_placement() {
        let mut config = RuntimeConfig::default();
        config.num_workers = 4;
        config.cpu_affinity = Some("0-15:4".into());
        config.topology.numa_nodes = 2;
        let topology = Topology::from_config(&config).unwrap();
        assert_eq!(
            (0..4).map(|w| topology.cpu_of(w)).collect::<Vec<_>>(),
            vec![0, 4, 8, 12]
        );
        assert_eq!(
            (0..4).map(|w| topology.node_of(w)).collect::<Vec<_>>(),
            vec![0, 0, 1, 1]
        );
    }

    #[test]
    fn test_more_workers_than_cpus_wraps() {
        let mut config = RuntimeConfig::default();
        config.num_workers = 3;
        config.cpu_affinity = Some("2,5".into());
        let topology = Topology::from_config(&config).unwrap();
        assert_eq!(topology.cpu_of(2), 2);
    }
}

#[cfg(test)]
mod numa_tests {
    use super::*;

    #[test]
    fn test_nodes_group_workers_with_leader() {
        let topology = Topology::uniform(6, 3, vec![]);
        let allocator = SlabAllocator::first_touch(3, &SlabConfig::default());
        let nodes = NumaNode::build_all(&topology, &allocator);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].workers, vec![2, 3]);
        assert_eq!(nodes[1].leader, Some(2));
        assert!(nodes[1].is_leader(2));
        assert!(!nodes[1].is_leader(3));
        assert_eq!(nodes[2].slab.node(), 2);
    }
}
