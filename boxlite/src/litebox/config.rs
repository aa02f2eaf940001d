//! Box configuration (immutable after creation).
//!
//! Split from `BoxState` the way Podman splits container config from
//! container state: everything here is fixed by `create` and never locked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::options::BoxOptions;
use crate::runtime::types::BoxID;
use crate::vmm::LaunchSpec;
use boxlite_shared::errors::BoxliteResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxConfig {
    pub id: BoxID,
    pub name: Option<String>,
    pub image: String,
    pub cpus: u8,
    pub memory_mib: u32,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

impl BoxConfig {
    /// Validate `options` and freeze them under `id`.
    pub fn new(id: BoxID, options: &BoxOptions) -> BoxliteResult<Self> {
        let resources = options.resolve()?;
        Ok(Self {
            id,
            name: options.name.clone(),
            image: options.image.clone(),
            cpus: resources.cpus,
            memory_mib: resources.memory_mib,
            args: options.args.clone(),
            env: options.env.clone(),
            created_at: Utc::now(),
        })
    }

    /// Whether `key` (an id or a name) refers to this box.
    pub fn matches(&self, key: &str) -> bool {
        self.id.as_str() == key || self.name.as_deref() == Some(key)
    }

    /// What the isolation backend needs to launch this box.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            box_id: self.id.clone(),
            image: self.image.clone(),
            cpus: self.cpus,
            memory_mib: self.memory_mib,
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> BoxID {
        BoxID::parse("01HJK4TNRPQSXYZ8WM6NCVT9R5").unwrap()
    }

    #[test]
    fn test_new_applies_defaults() {
        let config = BoxConfig::new(id(), &BoxOptions::new("alpine")).unwrap();
        assert_eq!(config.cpus, 1);
        assert_eq!(config.memory_mib, 512);
        assert!(config.name.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let err = BoxConfig::new(id(), &BoxOptions::new("alpine").with_cpus(0)).unwrap_err();
        assert!(matches!(
            err,
            boxlite_shared::errors::BoxliteError::InvalidSpec(_)
        ));
    }

    #[test]
    fn test_matches_id_or_name() {
        let config = BoxConfig::new(id(), &BoxOptions::new("alpine").with_name("web")).unwrap();
        assert!(config.matches("01HJK4TNRPQSXYZ8WM6NCVT9R5"));
        assert!(config.matches("web"));
        assert!(!config.matches("db"));
        assert!(!config.matches("01HJK4TN"));
    }

    #[test]
    fn test_launch_spec_carries_resources() {
        let opts = BoxOptions::new("/bin/sleep")
            .with_args(["5"])
            .with_cpus(2)
            .with_memory_mib(128)
            .with_env("FOO", "bar");
        let spec = BoxConfig::new(id(), &opts).unwrap().launch_spec();

        assert_eq!(spec.image, "/bin/sleep");
        assert_eq!(spec.args, vec!["5".to_string()]);
        assert_eq!(spec.cpus, 2);
        assert_eq!(spec.memory_mib, 128);
        assert_eq!(spec.env, vec![("FOO".to_string(), "bar".to_string())]);
    }
}
