//! Configuration for Boxlite.

use crate::runtime::constants::{envs as const_envs, resources, timeouts};
use crate::runtime::layout::dirs as const_dirs;
use crate::runtime::types::BoxID;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for BoxliteRuntime.
///
/// Users can create it with defaults and modify fields as needed.
#[derive(Clone, Debug)]
pub struct BoxliteOptions {
    /// Runtime home: holds the lock file and logs. Must be absolute.
    pub home_dir: PathBuf,

    /// Upper bound on a single backend launch.
    pub start_timeout: Duration,

    /// Per-box bound on one resource sample, so a stuck host read cannot
    /// stall a whole listing.
    pub sample_timeout: Duration,

    /// How long `stop` waits for a force-killed process to be reaped.
    pub kill_grace: Duration,
}

impl Default for BoxliteOptions {
    fn default() -> Self {
        let home_dir = std::env::var(const_envs::BOXLITE_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(const_dirs::BOXLITE_DIR);
                path
            });

        Self {
            home_dir,
            start_timeout: timeouts::START_TIMEOUT,
            sample_timeout: timeouts::SAMPLE_TIMEOUT,
            kill_grace: timeouts::KILL_GRACE,
        }
    }
}

impl BoxliteOptions {
    /// Options rooted at `home_dir` with default timeouts.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    /// Reject options the runtime cannot be built from.
    pub fn validate(&self) -> BoxliteResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(BoxliteError::Config(format!(
                "home_dir must be absolute, got {}",
                self.home_dir.display()
            )));
        }

        for (name, value) in [
            ("start_timeout", self.start_timeout),
            ("sample_timeout", self.sample_timeout),
            ("kill_grace", self.kill_grace),
        ] {
            if value.is_zero() {
                return Err(BoxliteError::Config(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}

/// Options used when constructing a box.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BoxOptions {
    /// Executable content the box runs.
    pub image: String,

    /// Optional human-readable name, unique among live boxes.
    #[serde(default)]
    pub name: Option<String>,

    pub cpus: Option<u8>,
    pub memory_mib: Option<u32>,

    /// Extra arguments passed to the image entrypoint.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl BoxOptions {
    /// Options for `image` with default resources.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cpus(mut self, cpus: u8) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_memory_mib(mut self, memory_mib: u32) -> Self {
        self.memory_mib = Some(memory_mib);
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Validate and resolve defaults into the immutable resource spec.
    pub fn resolve(&self) -> BoxliteResult<ResolvedResources> {
        if self.image.trim().is_empty() {
            return Err(BoxliteError::InvalidSpec("image must not be empty".into()));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(BoxliteError::InvalidSpec("name must not be empty".into()));
            }
            // Lookup tries ids first, so an id-shaped name would be unreachable
            if BoxID::is_valid(name) {
                return Err(BoxliteError::InvalidSpec(format!(
                    "name '{}' has the form of a box id",
                    name
                )));
            }
        }

        let cpus = self.cpus.unwrap_or(resources::DEFAULT_CPUS);
        if cpus == 0 {
            return Err(BoxliteError::InvalidSpec("cpus must be positive".into()));
        }

        let memory_mib = self.memory_mib.unwrap_or(resources::DEFAULT_MEMORY_MIB);
        if memory_mib == 0 {
            return Err(BoxliteError::InvalidSpec(
                "memory_mib must be positive".into(),
            ));
        }

        Ok(ResolvedResources { cpus, memory_mib })
    }
}

/// Resources fixed for the lifetime of a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedResources {
    pub cpus: u8,
    pub memory_mib: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_options_defaults() {
        let resolved = BoxOptions::new("alpine").resolve().unwrap();
        assert_eq!(resolved.cpus, resources::DEFAULT_CPUS);
        assert_eq!(resolved.memory_mib, resources::DEFAULT_MEMORY_MIB);
    }

    #[test]
    fn test_box_options_explicit_resources() {
        let resolved = BoxOptions::new("alpine")
            .with_cpus(4)
            .with_memory_mib(256)
            .resolve()
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedResources {
                cpus: 4,
                memory_mib: 256
            }
        );
    }

    #[test]
    fn test_box_options_rejects_zero_resources() {
        let err = BoxOptions::new("alpine").with_cpus(0).resolve().unwrap_err();
        assert!(matches!(err, BoxliteError::InvalidSpec(_)));

        let err = BoxOptions::new("alpine")
            .with_memory_mib(0)
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("memory_mib"));
    }

    #[test]
    fn test_box_options_rejects_empty_image_and_name() {
        assert!(BoxOptions::new("  ").resolve().is_err());
        assert!(BoxOptions::new("alpine").with_name("").resolve().is_err());
    }

    #[test]
    fn test_box_options_rejects_id_shaped_name() {
        let err = BoxOptions::new("alpine")
            .with_name("01HJK4TNRPQSXYZ8WM6NCVT9R5")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, BoxliteError::InvalidSpec(_)));
        assert!(err.to_string().contains("box id"));

        // Same length but not a ULID
        assert!(BoxOptions::new("alpine").with_name("nightly-build-runner-amd64").resolve().is_ok());
    }

    #[test]
    fn test_box_options_serde_defaults() {
        let opts: BoxOptions =
            serde_json::from_str(r#"{"image": "alpine", "cpus": 2, "memory_mib": null}"#).unwrap();
        assert_eq!(opts.cpus, Some(2));
        assert!(opts.name.is_none());
        assert!(opts.args.is_empty());
    }

    #[test]
    fn test_boxlite_options_validate() {
        let opts = BoxliteOptions::with_home("/tmp/boxlite-test");
        assert!(opts.validate().is_ok());

        let relative = BoxliteOptions::with_home("relative/home");
        assert!(relative.validate().is_err());

        let zero = BoxliteOptions {
            sample_timeout: Duration::ZERO,
            ..BoxliteOptions::with_home("/tmp/boxlite-test")
        };
        let err = zero.validate().unwrap_err();
        assert!(err.to_string().contains("sample_timeout"));
    }
}
