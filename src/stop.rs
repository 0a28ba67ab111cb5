//! Polled cancellation sources.
//!
//! The capture and playback loops never block on a stop request; they ask a
//! [`StopSignal`] once per frame or chunk. Sources here cover an in-process
//! flag, the SIGINT latch, and a sysfs GPIO push button.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::log_debug;

/// Read-only view of an external stop request. Must never block.
pub trait StopSignal {
    fn is_raised(&self) -> bool;
}

impl StopSignal for AtomicBool {
    fn is_raised(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: StopSignal + ?Sized> StopSignal for Arc<T> {
    fn is_raised(&self) -> bool {
        (**self).is_raised()
    }
}

impl<T: StopSignal + ?Sized> StopSignal for Box<T> {
    fn is_raised(&self) -> bool {
        (**self).is_raised()
    }
}

/// A signal that is never raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    fn is_raised(&self) -> bool {
        false
    }
}

/// Raised when any of its sources is.
#[derive(Default)]
pub struct AnyStop {
    sources: Vec<Box<dyn StopSignal>>,
}

impl AnyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: impl StopSignal + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl StopSignal for AnyStop {
    fn is_raised(&self) -> bool {
        self.sources.iter().any(|source| source.is_raised())
    }
}

/// Push button wired to a GPIO line, read through the sysfs `value` file.
///
/// With a pull-up (the usual wiring) the line reads `0` while pressed.
#[derive(Debug)]
pub struct GpioButton {
    value_path: PathBuf,
    active_low: bool,
    read_error_logged: AtomicBool,
}

impl GpioButton {
    /// Open `pin` under `root` (normally `/sys/class/gpio`), exporting it and
    /// setting it as an input if the kernel has not already done so.
    pub fn open(root: &Path, pin: u32, active_low: bool) -> io::Result<Self> {
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        let direction = pin_dir.join("direction");
        if direction.exists() {
            fs::write(&direction, "in")?;
        }
        let button = Self::from_value_path(pin_dir.join("value"), active_low);
        // Fail now, not silently on every poll.
        fs::read_to_string(&button.value_path)?;
        Ok(button)
    }

    pub fn from_value_path(value_path: PathBuf, active_low: bool) -> Self {
        Self {
            value_path,
            active_low,
            read_error_logged: AtomicBool::new(false),
        }
    }
}

impl StopSignal for GpioButton {
    fn is_raised(&self) -> bool {
        match fs::read_to_string(&self.value_path) {
            Ok(raw) => {
                let high = raw.trim() == "1";
                high != self.active_low
            }
            Err(err) => {
                if !self.read_error_logged.swap(true, Ordering::Relaxed) {
                    log_debug(&format!(
                        "gpio button read failed ({}): {err}",
                        self.value_path.display()
                    ));
                }
                false
            }
        }
    }
}

/// SIGINT latch. The handler only flips an atomic; the loops poll it.
pub mod interrupt {
    use super::StopSignal;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn handle_sigint(_: libc::c_int) {
        // A second Ctrl-C while a blocking call is still running exits at once.
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            // SAFETY: _exit is async-signal-safe.
            unsafe { libc::_exit(130) };
        }
    }

    /// Route SIGINT into the latch instead of terminating the process.
    pub fn install_interrupt_handler() -> io::Result<()> {
        // SAFETY: handle_sigint is an extern "C" handler that only touches an
        // atomic and calls _exit, both async-signal-safe.
        unsafe {
            let handler = handle_sigint as *const () as libc::sighandler_t;
            if libc::signal(libc::SIGINT, handler) == libc::SIG_ERR {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Stop signal backed by the SIGINT latch.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct InterruptFlag;

    impl StopSignal for InterruptFlag {
        fn is_raised(&self) -> bool {
            INTERRUPTED.load(Ordering::SeqCst)
        }
    }

    #[cfg(test)]
    pub(crate) fn set_interrupted_for_tests(value: bool) {
        INTERRUPTED.store(value, Ordering::SeqCst);
    }
}
