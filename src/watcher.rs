use std::{
    fs::File,
    io::Write,
    os::fd::{AsFd, BorrowedFd},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    fcntl::OFlag,
    poll::{PollFd, PollFlags, PollTimeout},
    sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout},
};

use crate::{
    errors::{Error, Result},
    pin::options::Edge,
    sysfs::{ExportControl, ValueNode},
    Config, Pin,
};

mod table;

pub use table::Handler;
use table::{Registration, RegistrationTable};

const WAKE_TOKEN: u64 = u64::MAX;
const MAX_EVENTS: usize = 16;

/// Delivers sysfs edge interrupts for any number of pins to their handlers.
///
/// Each watcher owns one epoll instance and one thread that blocks on it.
/// Handlers run on that thread, one at a time, so they should be quick or
/// hand the work off. Handlers are never run concurrently, but the order in
/// which handlers for different pins run when their edges arrive together is
/// whatever epoll reports.
///
/// Every [`Gpio`](crate::Gpio) has a default watcher used by
/// [`Pin::watch`]; more can be created with [`Watcher::new`].
#[derive(Debug)]
pub struct Watcher {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    epoll: Epoll,
    wake_rx: File,
    wake_tx: File,
    control: Arc<dyn ExportControl>,
    table: Mutex<RegistrationTable>,
    /// Signalled whenever a reservation is armed or cancelled.
    settled: Condvar,
    closed: AtomicBool,
    /// Set once the dispatch thread has exited.
    stopped: AtomicBool,
    export_timeout: Duration,
    export_poll: Duration,
}

impl Watcher {
    pub fn new(control: Arc<dyn ExportControl>, config: &Config) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        let (rx, tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        epoll.add(&rx, EpollEvent::new(EpollFlags::EPOLLIN, WAKE_TOKEN))?;

        let shared = Arc::new(Shared {
            epoll,
            wake_rx: File::from(rx),
            wake_tx: File::from(tx),
            control,
            table: Mutex::new(RegistrationTable::default()),
            settled: Condvar::new(),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            export_timeout: config.export_timeout,
            export_poll: config.export_poll,
        });

        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("gpio-watcher".into())
                .spawn(move || shared.run())?
        };

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Whether the watcher was closed or its dispatch thread has stopped.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether `pin` currently has an armed registration.
    pub fn is_registered(&self, pin: u8) -> bool {
        self.shared.lock_table().is_armed(pin)
    }

    /// Export `pin`, set its edge and start calling `handler` on matching
    /// transitions.
    ///
    /// Fails with [`Error::Busy`] if the pin is already registered here or
    /// exported by someone else, and with [`Error::Timeout`] if the exported
    /// nodes do not become writable in time. A failed registration leaves the
    /// pin unexported. Fails with [`Error::Closed`] once the watcher is
    /// closed or its dispatch thread has stopped.
    pub fn register_pin<F>(&self, pin: &Pin, edge: Edge, handler: F) -> Result<()>
    where
        F: Fn(&Pin) + Send + Sync + 'static,
    {
        let number = pin.number();
        {
            let mut table = self.shared.lock_table();
            if self.is_closed() {
                return Err(Error::Closed);
            }
            table.reserve(number)?;
        }

        let armed = self.shared.arm(pin, edge, Arc::new(handler));
        if armed.is_err() {
            self.shared.lock_table().cancel(number);
        }
        self.shared.settled.notify_all();

        match armed {
            Ok(()) => log::debug!("watching pin {number} for {edge} edges"),
            Err(ref e) => log::debug!("failed to watch pin {number}: {e}"),
        }
        armed
    }

    /// Stop watching `pin`. Does nothing if the pin is not registered.
    pub fn unregister_pin(&self, pin: &Pin) {
        let reg = self.shared.lock_table().remove(pin.number());
        if let Some(reg) = reg {
            self.shared.release(reg);
            log::debug!("stopped watching pin {}", pin.number());
        }
    }

    /// Stop the watcher thread and release every registration.
    ///
    /// Blocks until the thread has exited, unless called from a handler, and
    /// until registrations still in flight on other threads have unwound.
    /// No pin registered here is left exported. Later calls do nothing.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = (&self.shared.wake_tx).write(&[1]) {
            log::warn!("failed to wake gpio watcher thread: {e}");
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                log::debug!("gpio watcher closed from its own handler");
            } else if thread.join().is_err() {
                log::warn!("gpio watcher thread panicked");
            }
        }

        let regs = {
            let mut table = self.shared.lock_table();
            let regs = table.drain();
            while table.has_reservations() {
                table = self
                    .shared
                    .settled
                    .wait(table)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            regs
        };
        for reg in regs {
            let number = reg.pin.number();
            self.shared.release(reg);
            log::debug!("released pin {number} on close");
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.stopped.load(Ordering::Acquire)
    }

    fn lock_table(&self) -> MutexGuard<'_, RegistrationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, pin: &Pin, edge: Edge, handler: Handler) -> Result<()> {
        let number = pin.number();
        self.control
            .export(number)
            .map_err(|e| Error::from_export(number, e))?;

        let armed = self
            .wait_writable(number)
            .and_then(|()| self.open_node(number, edge))
            .and_then(|node| self.install(pin, node, handler));
        if armed.is_err() {
            self.unexport(number);
        }
        armed
    }

    /// Ownership of freshly exported nodes is fixed up asynchronously, so
    /// poll until they can be written.
    fn wait_writable(&self, pin: u8) -> Result<()> {
        let deadline = Instant::now() + self.export_timeout;
        loop {
            if self.control.is_writable(pin) {
                return Ok(());
            }
            if self.is_closed() {
                return Err(Error::Closed);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(pin));
            }
            thread::sleep(self.export_poll);
        }
    }

    fn open_node(&self, pin: u8, edge: Edge) -> Result<Arc<dyn ValueNode>> {
        self.control.set_edge(pin, edge)?;
        let node: Arc<dyn ValueNode> = self.control.open_value(pin)?.into();
        // A fresh value node reports ready once before any edge.
        if is_pending(node.as_fd())? {
            node.read_level()?;
        }
        Ok(node)
    }

    fn install(&self, pin: &Pin, node: Arc<dyn ValueNode>, handler: Handler) -> Result<()> {
        let mut table = self.lock_table();
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let token = table.next_token(pin.number());
        let flags = EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI | EpollFlags::EPOLLET;
        self.epoll.add(node.as_fd(), EpollEvent::new(flags, token))?;

        let reg = Registration {
            pin: pin.clone(),
            node,
            handler,
            token,
        };
        table.arm(reg).map_err(|reg| {
            let _ = self.epoll.delete(reg.node.as_fd());
            Error::Closed
        })
    }

    /// Best effort: every step runs even if an earlier one fails.
    fn release(&self, reg: Registration) {
        let number = reg.pin.number();
        if let Err(e) = self.epoll.delete(reg.node.as_fd()) {
            log::warn!("failed to remove pin {number} from epoll: {e}");
        }
        drop(reg);
        self.unexport(number);
    }

    fn unexport(&self, pin: u8) {
        if let Err(e) = self.control.unexport(pin) {
            log::warn!("failed to unexport pin {pin}: {e}");
        }
    }

    fn run(&self) {
        self.dispatch();
        self.stopped.store(true, Ordering::Release);
        log::debug!("gpio watcher thread exited");
    }

    fn dispatch(&self) {
        let mut events = [EpollEvent::empty(); MAX_EVENTS];
        loop {
            let n = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::error!("gpio watcher stopped, epoll wait failed: {e}");
                    return;
                }
            };

            for event in &events[..n] {
                if event.data() == WAKE_TOKEN || self.is_closed() {
                    self.drain_wake();
                    return;
                }
                let Some((pin, node, handler)) = self.take_event(event.data()) else {
                    continue;
                };
                // Reading the node re-arms the sysfs notification.
                if let Err(e) = node.read_level() {
                    log::warn!("failed to read value of pin {}: {e}", pin.number());
                }
                log::trace!("edge on pin {}", pin.number());
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&pin))).is_err() {
                    log::error!("handler for pin {} panicked", pin.number());
                }
            }
        }
    }

    fn take_event(&self, token: u64) -> Option<(Pin, Arc<dyn ValueNode>, Handler)> {
        let table = self.lock_table();
        let reg = table.lookup(token)?;
        Some((reg.pin.clone(), reg.node.clone(), reg.handler.clone()))
    }

    fn drain_wake(&self) {
        use std::io::Read;

        let mut buf = [0u8; 8];
        while matches!((&self.wake_rx).read(&mut buf), Ok(n) if n > 0) {}
    }
}

fn is_pending(fd: BorrowedFd<'_>) -> std::io::Result<bool> {
    let pollfd = PollFd::new(fd, PollFlags::POLLIN | PollFlags::POLLPRI);
    Ok(nix::poll::poll(&mut [pollfd], PollTimeout::ZERO)? > 0)
}

#[cfg(test)]
mod test {
    use std::{sync::mpsc, time::Duration};

    use super::*;
    use crate::{
        mock::{self, MockControl},
        pin::options::Level,
    };

    #[test]
    fn stale_token_reaches_no_handler() {
        let (gpio, _sim, ctl) = mock::open().unwrap();
        let watcher = gpio.watcher();
        let pin = gpio.pin(15).unwrap();
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        watcher
            .register_pin(&pin, Edge::Rising, move |_| {
                let _ = first.send("first");
            })
            .unwrap();
        let old = watcher.shared.lock_table().token(15).unwrap();

        watcher.unregister_pin(&pin);
        watcher
            .register_pin(&pin, Edge::Rising, move |_| {
                let _ = tx.send("second");
            })
            .unwrap();
        let new = watcher.shared.lock_table().token(15).unwrap();
        assert_ne!(old, new);

        // An event still queued under the first registration's token.
        assert!(watcher.shared.take_event(old).is_none());
        let (current, _, _) = watcher.shared.take_event(new).unwrap();
        assert_eq!(current.number(), 15);

        ctl.drive(15, Level::High);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok("second"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn stopped_dispatch_refuses_registrations() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(4).unwrap();
        let ctl = Arc::new(MockControl::new());
        let watcher = Watcher::new(ctl.clone(), &mock::config()).unwrap();

        // End the dispatch loop without closing, as a failed wait would.
        (&watcher.shared.wake_tx).write_all(&[1]).unwrap();
        let thread = watcher.thread.lock().unwrap().take().unwrap();
        thread.join().unwrap();

        assert!(watcher.is_closed());
        assert!(matches!(
            watcher.register_pin(&pin, Edge::Both, |_| {}),
            Err(Error::Closed)
        ));
        assert!(!ctl.is_exported(4));
        watcher.close();
    }
}
