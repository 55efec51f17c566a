use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolution used when rendering captured figures.
pub const FIGURE_DPI: u32 = 100;

/// Session configuration, fixed once the interpreter reports ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    /// Make the package manager (pip) available inside the interpreter
    pub install_package_manager: bool,
    /// Package specifiers installed in order, verbatim, when the package manager is enabled
    pub packages: Vec<String>,
}

/// Partial settings carried by an `init` message.
///
/// Absent fields keep the current value; a present `packages` list replaces
/// the old one rather than extending it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, alias = "loadMicropip", skip_serializing_if = "Option::is_none")]
    pub install_package_manager: Option<bool>,
    #[serde(default, alias = "libs", skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
}

impl Configuration {
    /// Shallow-merge `patch` into this configuration
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(flag) = patch.install_package_manager {
            self.install_package_manager = flag;
        }
        if let Some(packages) = patch.packages {
            self.packages = packages;
        }
    }

    /// Packages that initialization will actually install
    pub fn packages_to_install(&self) -> &[String] {
        if self.install_package_manager {
            &self.packages
        } else {
            &[]
        }
    }
}

/// Process-level settings for the worker binary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Explicit interpreter executable; `PATH` lookup when absent
    pub python_path: Option<PathBuf>,
    /// Working directory for the interpreter; a temporary directory when absent
    pub workdir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_parts(&args, |key| std::env::var(key).ok())
    }

    /// Build from an argument vector (program name first) and an environment lookup.
    /// Arguments win over environment variables.
    pub fn from_parts<F>(args: &[String], env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut python_path = env("PYWORKER_PYTHON")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let mut workdir = env("PYWORKER_WORKDIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--python-path" => {
                    if let Some(v) = args.get(i + 1) {
                        python_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--workdir" => {
                    if let Some(v) = args.get(i + 1) {
                        workdir = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }

        Self {
            python_path,
            workdir,
        }
    }
}
