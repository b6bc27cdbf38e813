//! Built-in configuration presets, embedded at compile time.

use super::Config;
use crate::error::ConciergeError;

const PRESETS: [(&str, &str); 5] = [
    ("crafts", include_str!("presets/crafts.yaml")),
    ("dev", include_str!("presets/dev.yaml")),
    ("k8s", include_str!("presets/k8s.yaml")),
    ("machine", include_str!("presets/machine.yaml")),
    ("microk8s", include_str!("presets/microk8s.yaml")),
];

/// Names of the built-in presets, sorted.
pub fn names() -> Vec<&'static str> {
    PRESETS.iter().map(|(name, _)| *name).collect()
}

/// Parses the named preset.
pub fn preset(name: &str) -> Result<Config, ConciergeError> {
    let (_, yaml) = PRESETS.iter().find(|(n, _)| *n == name).ok_or_else(|| {
        ConciergeError::Config(format!(
            "unknown preset '{}' (expected one of: {})",
            name,
            names().join(", ")
        ))
    })?;
    Config::parse(yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sorted() {
        assert_eq!(names(), vec!["crafts", "dev", "k8s", "machine", "microk8s"]);
    }

    #[test]
    fn every_preset_loads_and_validates() {
        for name in names() {
            let config = preset(name).unwrap_or_else(|e| panic!("preset {}: {}", name, e));
            config.validate().unwrap_or_else(|e| panic!("preset {}: {}", name, e));
        }
    }

    #[test]
    fn machine_bootstraps_lxd() {
        let config = preset("machine").unwrap();
        assert!(config.providers.lxd.common.enable);
        assert!(config.providers.lxd.common.bootstrap);
        assert!(!config.providers.k8s.common.enable);
    }

    #[test]
    fn crafts_disables_juju() {
        assert!(preset("crafts").unwrap().juju.disable);
    }

    #[test]
    fn unknown_preset_lists_choices() {
        let err = preset("nope").unwrap_err();
        assert!(err.to_string().contains("crafts, dev, k8s, machine, microk8s"));
    }
}
