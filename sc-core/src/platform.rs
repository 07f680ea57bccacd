//! Platform detection and OS-specific paths.

use std::path::PathBuf;
use crate::error::{ChatError, ChatResult};

/// Directory name used under the platform config/data roots.
const APP_DIR: &str = "stream-chat";

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Platform-specific configuration directory for the client.
    ///
    /// - Windows: `%APPDATA%/stream-chat`
    /// - macOS: `~/Library/Application Support/stream-chat`
    /// - Linux: `~/.config/stream-chat`
    pub fn config_dir() -> ChatResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| ChatError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_DIR))
    }

    /// Platform-specific data directory, used for log files.
    pub fn data_dir() -> ChatResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| ChatError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_DIR))
    }

    /// Get a human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        assert_eq!(Platform::Windows.name(), "Windows");
        assert_eq!(Platform::MacOs.to_string(), "macOS");
        assert_eq!(Platform::Linux.name(), "Linux");
    }

    #[test]
    fn test_config_dir_is_namespaced() {
        if let Ok(dir) = Platform::config_dir() {
            assert!(dir.ends_with(APP_DIR));
        }
    }
}
