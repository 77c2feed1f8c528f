//! [`CpuTemperatureMonitor`] – background reader of the controller board's
//! CPU temperature.
//!
//! The kernel exposes the temperature in millidegrees Celsius through a
//! thermal-zone file.  The monitor reads it on its own thread and keeps the
//! latest whole-degree value; it reports 0 until the first successful read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use armbus_kernel::Shutdown;
use tracing::{debug, info, warn};

pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_secs(1);

/// Read a millidegree thermal file and return whole degrees Celsius.
///
/// # Errors
///
/// Returns the I/O error of the read, or [`io::ErrorKind::InvalidData`] when
/// the content is not an integer.
pub fn read_cpu_temperature(path: &Path) -> io::Result<i32> {
    let raw = fs::read_to_string(path)?;
    let millidegrees: i32 = raw
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(millidegrees / 1000)
}

pub struct CpuTemperatureMonitor {
    temperature: Arc<AtomicI32>,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
}

impl CpuTemperatureMonitor {
    /// Spawn the reader thread.  The file is read once immediately, then
    /// every `interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(path: impl Into<PathBuf>, interval: Duration) -> io::Result<Self> {
        let path = path.into();
        let temperature = Arc::new(AtomicI32::new(0));
        let shutdown = Shutdown::new();

        let latest = temperature.clone();
        let stop = shutdown.clone();
        info!(path = %path.display(), "starting cpu temperature monitor");
        let handle = thread::Builder::new()
            .name("armbus-diagnostics".to_string())
            .spawn(move || {
                loop {
                    match read_cpu_temperature(&path) {
                        Ok(degrees) => latest.store(degrees, Ordering::Relaxed),
                        Err(e) => debug!(path = %path.display(), error = %e, "cannot read cpu temperature"),
                    }
                    if !stop.sleep(interval) {
                        break;
                    }
                }
            })?;

        Ok(Self {
            temperature,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Latest reading in degrees Celsius, 0 before the first read.
    pub fn temperature(&self) -> i32 {
        self.temperature.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cpu temperature reader thread panicked");
            }
        }
    }
}

impl Drop for CpuTemperatureMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

    #[test]
    fn parses_millidegrees() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "48312").unwrap();
        assert_eq!(read_cpu_temperature(file.path()).unwrap(), 48);
    }

    #[test]
    fn rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hot").unwrap();
        let err = read_cpu_temperature(file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_cpu_temperature(&dir.path().join("temp")).is_err());
    }

    #[test]
    fn monitor_tracks_file_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "51000\n").unwrap();

        let mut monitor = CpuTemperatureMonitor::start(&path, Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.temperature() != 51 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(monitor.temperature(), 51);

        fs::write(&path, "63999\n").unwrap();
        while monitor.temperature() != 63 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(monitor.temperature(), 63);
        monitor.stop();
    }

    #[test]
    fn stop_joins_reader_thread_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor =
            CpuTemperatureMonitor::start(dir.path().join("absent"), Duration::from_millis(5))
                .unwrap();
        monitor.stop();
        assert!(monitor.handle.is_none());
        assert!(monitor.shutdown.is_triggered());
        monitor.stop();
    }

    #[test]
    fn unreadable_file_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let monitor =
            CpuTemperatureMonitor::start(dir.path().join("absent"), Duration::from_millis(5))
                .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(monitor.temperature(), 0);
    }
}
