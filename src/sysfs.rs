//! The legacy sysfs GPIO interface, used only for edge notification.
//!
//! Writing a pin number to `<root>/export` creates `<root>/gpioN` with
//! `direction`, `edge` and `value` nodes. After `edge` is set, `value`
//! raises `POLLPRI` on every matching transition until it is read again.
//! Ownership of the new nodes is fixed up by udev some time after export,
//! so callers must wait for [`ExportControl::is_writable`].

use std::{
    fmt::{self, Write as _},
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    os::{
        fd::{AsFd, BorrowedFd},
        unix::fs::OpenOptionsExt,
    },
    path::{Path, PathBuf},
};

use bstr::ByteSlice;
use nix::unistd::{access, AccessFlags};

use crate::pin::options::{Edge, Level};

/// An open `value` node of an exported pin.
pub trait ValueNode: AsFd + Send + Sync + fmt::Debug {
    /// Read the current level. This also acknowledges a pending
    /// notification.
    fn read_level(&self) -> io::Result<Level>;
}

/// Export control for interrupt-capable pins.
pub trait ExportControl: fmt::Debug + Send + Sync {
    fn export(&self, pin: u8) -> io::Result<()>;

    fn unexport(&self, pin: u8) -> io::Result<()>;

    fn is_exported(&self, pin: u8) -> bool;

    /// Whether the `direction` and `edge` nodes of an exported pin can be
    /// written by this process.
    fn is_writable(&self, pin: u8) -> bool;

    fn set_edge(&self, pin: u8, edge: Edge) -> io::Result<()>;

    fn open_value(&self, pin: u8) -> io::Result<Box<dyn ValueNode>>;
}

/// [`ExportControl`] over a sysfs GPIO class directory.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_node(&self, pin: u8, node: &str) -> PathBuf {
        let mut dir = heapless::String::<8>::new();
        // "gpio" plus at most three digits always fits.
        let _ = write!(dir, "gpio{pin}");
        self.root.join(dir.as_str()).join(node)
    }

    fn write_pin(&self, control: &str, pin: u8) -> io::Result<()> {
        let mut num = heapless::String::<3>::new();
        let _ = write!(num, "{pin}");
        write_node(&self.root.join(control), num.as_bytes())
    }
}

impl ExportControl for Sysfs {
    fn export(&self, pin: u8) -> io::Result<()> {
        self.write_pin("export", pin)
    }

    fn unexport(&self, pin: u8) -> io::Result<()> {
        self.write_pin("unexport", pin)
    }

    fn is_exported(&self, pin: u8) -> bool {
        self.pin_node(pin, "value").exists()
    }

    fn is_writable(&self, pin: u8) -> bool {
        ["direction", "edge"]
            .iter()
            .all(|node| access(&self.pin_node(pin, node), AccessFlags::W_OK).is_ok())
    }

    fn set_edge(&self, pin: u8, edge: Edge) -> io::Result<()> {
        write_node(&self.pin_node(pin, "edge"), edge.as_str().as_bytes())
    }

    fn open_value(&self, pin: u8) -> io::Result<Box<dyn ValueNode>> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(self.pin_node(pin, "value"))?;
        Ok(Box::new(SysfsValue { file }))
    }
}

fn write_node(path: &Path, value: &[u8]) -> io::Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.write_all(value)
}

#[derive(Debug)]
struct SysfsValue {
    file: File,
}

impl AsFd for SysfsValue {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl ValueNode for SysfsValue {
    fn read_level(&self) -> io::Result<Level> {
        let mut buf = [0u8; 4];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let n = file.read(&mut buf)?;
        parse_level(&buf[..n])
    }
}

pub(crate) fn parse_level(raw: &[u8]) -> io::Result<Level> {
    match raw.trim() {
        b"0" => Ok(Level::Low),
        b"1" => Ok(Level::High),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected gpio value {:?}", other.as_bstr()),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gpio-mem-sysfs-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("gpio15")).unwrap();
        for node in ["export", "unexport", "gpio15/direction", "gpio15/edge"] {
            std::fs::write(dir.join(node), b"").unwrap();
        }
        std::fs::write(dir.join("gpio15/value"), b"1\n").unwrap();
        dir
    }

    #[test]
    fn parses_values() {
        assert_eq!(parse_level(b"0\n").unwrap(), Level::Low);
        assert_eq!(parse_level(b"1").unwrap(), Level::High);
        assert_eq!(
            parse_level(b"x\n").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn writes_control_nodes() {
        let dir = scratch("control");
        let sysfs = Sysfs::new(&dir);

        sysfs.export(15).unwrap();
        assert_eq!(std::fs::read(dir.join("export")).unwrap(), b"15");
        sysfs.unexport(7).unwrap();
        assert_eq!(std::fs::read(dir.join("unexport")).unwrap(), b"7");

        sysfs.set_edge(15, Edge::Both).unwrap();
        assert_eq!(std::fs::read(dir.join("gpio15/edge")).unwrap(), b"both");

        assert!(sysfs.is_exported(15));
        assert!(!sysfs.is_exported(16));
        assert!(!sysfs.is_writable(16));

        let value = sysfs.open_value(15).unwrap();
        assert_eq!(value.read_level().unwrap(), Level::High);
        // Re-reading starts from the top of the node.
        assert_eq!(value.read_level().unwrap(), Level::High);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
