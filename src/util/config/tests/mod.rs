//! Configuration tests

use crate::util::config::{ConfigError, PushStrategyKind, RuntimeConfig, StealConfig};

#[cfg(test)]
mod default_tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.deque_log_size, 8);
        assert_eq!(config.slab.min_class_log2, 6);
        assert_eq!(config.slab.max_class_log2, 20);
        assert_eq!(config.push.min_frame_bytes, 64 * 1024);
        assert!(!config.push.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_steal_attempts_reuse_last_entry() {
        let steal = StealConfig {
            attempts_per_level: vec![1, 3],
            cache_last_victim: true,
        };
        assert_eq!(steal.attempts_at(0), 1);
        assert_eq!(steal.attempts_at(1), 3);
        assert_eq!(steal.attempts_at(7), 3);
    }
}

#[cfg(test)]
mod toml_tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            num_workers = 3

            [push]
            enabled = true
            strategy = "numa_score"

            [topology]
            numa_nodes = 2
            level_widths = [2, 4]
            "#,
        )
        .unwrap();
        assert_eq!(config.num_workers, 3);
        assert!(config.push.enabled);
        assert_eq!(config.push.strategy, PushStrategyKind::NumaScore);
        assert_eq!(config.push.inbox_slots, 64);
        assert_eq!(config.topology.numa_nodes, 2);
        assert_eq!(config.slab.refill_log2, 21);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = RuntimeConfig::default();
        config.num_workers = 5;
        config.cpu_affinity = Some("0-9:2".into());
        let text = config.to_toml().unwrap();
        let parsed = RuntimeConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.num_workers, 5);
        assert_eq!(parsed.cpu_affinity.as_deref(), Some("0-9:2"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamdf.toml");
        std::fs::write(&path, "num_workers = 2\nyield_when_idle = false\n").unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.num_workers, 2);
        assert!(!config.yield_when_idle);
    }

    #[test]
    fn test_parse_error() {
        let err = RuntimeConfig::from_toml_str("num_workers = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_zero_workers_rejected() {
        let err = RuntimeConfig::from_toml_str("num_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_level_widths_must_increase() {
        let err = RuntimeConfig::from_toml_str("[topology]\nlevel_widths = [4, 4]").unwrap_err();
        assert!(err.to_string().contains("level_widths"));

        let err = RuntimeConfig::from_toml_str("[topology]\nlevel_widths = [4, 6]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_inverted_slab_classes_rejected() {
        let err = RuntimeConfig::from_toml_str("[slab]\nmin_class_log2 = 12\nmax_class_log2 = 10")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_affinity_rejected() {
        let err = RuntimeConfig::from_toml_str("cpu_affinity = \"3-1\"").unwrap_err();
        assert!(matches!(err, ConfigError::Affinity { .. }));
    }

    #[test]
    fn test_transfer_cost_shape_checked() {
        let err = RuntimeConfig::from_toml_str(
            "[topology]\nnuma_nodes = 2\ntransfer_costs = [[10.0, 20.0]]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("2x2"));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            "max_writer".parse::<PushStrategyKind>().unwrap(),
            PushStrategyKind::DominantWriter
        );
        assert_eq!(
            "owner".parse::<PushStrategyKind>().unwrap(),
            PushStrategyKind::DataOwner
        );
        assert!("nearest".parse::<PushStrategyKind>().is_err());
    }
}
