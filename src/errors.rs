use std::io::Error as IOError;
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("GPIO registers are already mapped by this process")]
    AlreadyOpen,
    #[error("GPIO context is closed")]
    Closed,
    #[error("Pin {0} is already in use")]
    Busy(u8),
    #[error("Timed out waiting for pin {0} to become writable")]
    Timeout(u8),
    #[error("Pin {0} is out of range")]
    InvalidPin(u8),
    #[error("Failed to map {}: {source}", path.display())]
    Map {
        path: PathBuf,
        #[source]
        source: IOError,
    },
    #[error(transparent)]
    Io(#[from] IOError),
    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),
}

impl Error {
    /// Map the errno of a failed sysfs export to the matching error.
    pub(crate) fn from_export(pin: u8, err: IOError) -> Self {
        match err.raw_os_error() {
            Some(libc::EBUSY) => Error::Busy(pin),
            Some(libc::EINVAL) => Error::InvalidPin(pin),
            _ => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(Error::Closed.to_string(), "GPIO context is closed");
        assert_eq!(Error::Busy(15).to_string(), "Pin 15 is already in use");
    }

    #[test]
    fn export_errno_mapping() {
        let busy = IOError::from_raw_os_error(libc::EBUSY);
        assert!(matches!(Error::from_export(4, busy), Error::Busy(4)));
        let invalid = IOError::from_raw_os_error(libc::EINVAL);
        assert!(matches!(Error::from_export(60, invalid), Error::InvalidPin(60)));
        let denied = IOError::from_raw_os_error(libc::EACCES);
        assert!(matches!(Error::from_export(4, denied), Error::Io(_)));
    }
}
