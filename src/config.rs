use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::registers::PullProtocol;

pub const DEFAULT_DEVICE: &str = "/dev/gpiomem";
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Settings for [`Gpio::open_with`](crate::Gpio::open_with).
///
/// ```
/// use std::time::Duration;
/// use gpio_mem::Config;
///
/// let config = Config::new()
///     .with_device("/dev/mem", 0x3f20_0000)
///     .with_export_timeout(Duration::from_secs(2));
/// assert_eq!(config.device().to_str(), Some("/dev/mem"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) device: PathBuf,
    pub(crate) offset: libc::off_t,
    pub(crate) sysfs_root: PathBuf,
    pub(crate) export_timeout: Duration,
    pub(crate) export_poll: Duration,
    pub(crate) pull_settle: Duration,
    pub(crate) pull: Option<PullProtocol>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            offset: 0,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            export_timeout: Duration::from_secs(1),
            export_poll: Duration::from_millis(10),
            pull_settle: Duration::from_micros(5),
            pull: None,
        }
    }

    /// Memory device to map and the byte offset of the GPIO page within it.
    pub fn with_device(self, device: impl AsRef<Path>, offset: libc::off_t) -> Self {
        Self {
            device: device.as_ref().to_owned(),
            offset,
            ..self
        }
    }

    /// Directory holding the sysfs `export` and `unexport` nodes.
    pub fn with_sysfs_root(self, root: impl AsRef<Path>) -> Self {
        Self {
            sysfs_root: root.as_ref().to_owned(),
            ..self
        }
    }

    /// Upper bound on the wait for an exported pin's nodes to become
    /// writable.
    pub fn with_export_timeout(self, timeout: Duration) -> Self {
        Self {
            export_timeout: timeout,
            ..self
        }
    }

    pub fn with_export_poll(self, interval: Duration) -> Self {
        Self {
            export_poll: interval,
            ..self
        }
    }

    /// Hold time between the steps of the clocked pull sequence.
    pub fn with_pull_settle(self, settle: Duration) -> Self {
        Self {
            pull_settle: settle,
            ..self
        }
    }

    /// Skip detection and use the given pull protocol.
    pub fn with_pull_protocol(self, pull: PullProtocol) -> Self {
        Self {
            pull: Some(pull),
            ..self
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }
}

impl Default for Config {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.device(), Path::new("/dev/gpiomem"));
        assert_eq!(config.sysfs_root(), Path::new("/sys/class/gpio"));
        assert_eq!(config.export_timeout(), Duration::from_secs(1));
        assert_eq!(config.pull, None);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::new()
            .with_sysfs_root("/tmp/gpio")
            .with_pull_protocol(PullProtocol::Direct)
            .with_export_poll(Duration::from_millis(1));
        assert_eq!(config.sysfs_root(), Path::new("/tmp/gpio"));
        assert_eq!(config.pull, Some(PullProtocol::Direct));
        assert_eq!(config.export_poll, Duration::from_millis(1));
        assert_eq!(config.device(), Path::new(DEFAULT_DEVICE));
    }
}
