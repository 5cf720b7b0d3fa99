//! Net launcher output.
//!
//! The launcher is a single output line driven HIGH for the configured pulse.
//! The line must rest LOW whenever the process is not mid-pulse, including
//! after a failed write and on shutdown.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::ActuationError;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

pub trait Actuator: Send {
    fn name(&self) -> &'static str;

    /// Drive the output HIGH for `duration`, then LOW.
    fn pulse(&mut self, duration: Duration) -> Result<(), ActuationError>;

    /// Return the output to its idle LOW state and give up the line.
    fn release(&mut self) -> Result<(), ActuationError>;
}

/// Logs pulses instead of touching hardware.
#[derive(Default)]
pub struct SimulatedActuator {
    pulses: u64,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }
}

impl Actuator for SimulatedActuator {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn pulse(&mut self, duration: Duration) -> Result<(), ActuationError> {
        self.pulses += 1;
        log::warn!(
            "simulated net launch pulse #{} ({} ms)",
            self.pulses,
            duration.as_millis()
        );
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuationError> {
        Ok(())
    }
}

/// Shared view of the pulses a [`RecordingActuator`] received.
#[derive(Clone, Default)]
pub struct PulseRecord {
    inner: Arc<Mutex<RecordState>>,
}

#[derive(Default)]
struct RecordState {
    pulses: Vec<Duration>,
    released: bool,
    fail_next: bool,
}

impl PulseRecord {
    pub fn pulses(&self) -> Vec<Duration> {
        self.lock().pulses.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().pulses.len()
    }

    pub fn released(&self) -> bool {
        self.lock().released
    }

    /// Make the next pulse fail without recording it.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Records pulses for inspection; used by tests and dry runs.
pub struct RecordingActuator {
    record: PulseRecord,
}

impl RecordingActuator {
    pub fn new() -> (Self, PulseRecord) {
        let record = PulseRecord::default();
        (
            Self {
                record: record.clone(),
            },
            record,
        )
    }
}

impl Actuator for RecordingActuator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn pulse(&mut self, duration: Duration) -> Result<(), ActuationError> {
        let mut state = self.record.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(ActuationError::Gpio {
                pin: 0,
                reason: "injected failure".to_string(),
            });
        }
        state.pulses.push(duration);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuationError> {
        self.record.lock().released = true;
        Ok(())
    }
}

/// GPIO output through the Linux sysfs interface.
///
/// Opening exports the pin and sets its direction to `low`, which configures
/// it as an output already driven LOW. Dropping the actuator releases it.
pub struct SysfsGpioActuator {
    root: PathBuf,
    pin: u32,
    value_path: PathBuf,
    released: bool,
}

impl SysfsGpioActuator {
    pub fn open(pin: u32) -> Result<Self, ActuationError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin)
    }

    pub fn open_at(root: &Path, pin: u32) -> Result<Self, ActuationError> {
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| ActuationError::Gpio {
                pin,
                reason: format!("export failed: {e}"),
            })?;
        }
        fs::write(pin_dir.join("direction"), "low").map_err(|e| ActuationError::Gpio {
            pin,
            reason: format!("set direction failed: {e}"),
        })?;
        log::info!("gpio {pin} configured as output, idle LOW");
        Ok(Self {
            root: root.to_path_buf(),
            pin,
            value_path: pin_dir.join("value"),
            released: false,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn write_value(&self, value: &str) -> Result<(), ActuationError> {
        fs::write(&self.value_path, value).map_err(|e| ActuationError::Gpio {
            pin: self.pin,
            reason: format!("write {value} failed: {e}"),
        })
    }
}

impl Actuator for SysfsGpioActuator {
    fn name(&self) -> &'static str {
        "sysfs-gpio"
    }

    fn pulse(&mut self, duration: Duration) -> Result<(), ActuationError> {
        if self.released {
            return Err(ActuationError::Gpio {
                pin: self.pin,
                reason: "line already released".to_string(),
            });
        }
        let high = self.write_value("1");
        if high.is_ok() {
            thread::sleep(duration);
        }
        // The line goes back LOW even if raising it failed part way.
        let low = self.write_value("0");
        high.and(low)
    }

    fn release(&mut self) -> Result<(), ActuationError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.write_value("0")?;
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            log::debug!("gpio {} unexport failed: {e}", self.pin);
        }
        Ok(())
    }
}

impl Drop for SysfsGpioActuator {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("gpio {} release on drop failed: {e}", self.pin);
        }
    }
}
