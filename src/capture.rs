//! Capture thread.
//!
//! Owns the opened [`FrameSource`] and feeds a single-slot buffer that the
//! pipeline drains. The source is closed and the slot is closed on every exit
//! path, including a panic inside the source.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::stream::LatestSlot;

pub type CaptureSlot = LatestSlot<Frame>;

/// Counters shared between the capture thread and the pipeline.
#[derive(Debug, Default)]
pub struct CaptureSignal {
    no_signal: AtomicBool,
    finished: AtomicBool,
    frames: AtomicU64,
    misses: AtomicU64,
}

impl CaptureSignal {
    /// Set after `max_consecutive_misses` empty reads, cleared by the next frame.
    pub fn no_signal(&self) -> bool {
        self.no_signal.load(Ordering::SeqCst)
    }

    /// The source reported end of stream.
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct CaptureOptions {
    pub read_timeout: Duration,
    pub max_consecutive_misses: u32,
}

pub struct CaptureHandle {
    signal: Arc<CaptureSignal>,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn signal(&self) -> Arc<CaptureSignal> {
        Arc::clone(&self.signal)
    }

    /// Wait for the thread to exit. The caller must have set the stop flag.
    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("capture thread panicked")),
            None => Ok(()),
        }
    }
}

/// Closes the source and the slot when the capture thread ends.
struct CaptureGuard {
    source: FrameSource,
    frames: Arc<CaptureSlot>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.source.close();
        self.frames.close();
    }
}

/// Start capturing from an already opened source.
pub fn spawn_capture(
    source: FrameSource,
    options: CaptureOptions,
    frames: Arc<CaptureSlot>,
    stop: Arc<AtomicBool>,
) -> Result<CaptureHandle> {
    let signal = Arc::new(CaptureSignal::default());
    let join = {
        let signal = Arc::clone(&signal);
        let guard = CaptureGuard { source, frames };
        thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture_loop(guard, &options, &signal, &stop))?
    };
    Ok(CaptureHandle {
        signal,
        join: Some(join),
    })
}

fn capture_loop(
    mut guard: CaptureGuard,
    options: &CaptureOptions,
    signal: &CaptureSignal,
    stop: &AtomicBool,
) {
    let name = guard.source.name();
    let max_misses = options.max_consecutive_misses.max(1);
    let mut misses = 0u32;
    while !stop.load(Ordering::SeqCst) {
        match guard.source.read(options.read_timeout) {
            Some(frame) => {
                if signal.no_signal.swap(false, Ordering::SeqCst) {
                    log::warn!("{name}: signal restored after {misses} empty reads");
                }
                misses = 0;
                signal.frames.fetch_add(1, Ordering::Relaxed);
                guard.frames.publish(frame);
            }
            None if guard.source.is_finished() => {
                log::info!("{name}: end of stream");
                signal.finished.store(true, Ordering::SeqCst);
                break;
            }
            None => {
                misses = misses.saturating_add(1);
                signal.misses.fetch_add(1, Ordering::Relaxed);
                if misses == max_misses {
                    signal.no_signal.store(true, Ordering::SeqCst);
                    log::error!("{name}: NO SIGNAL after {misses} consecutive empty reads");
                }
            }
        }
    }
    log::debug!(
        "{name}: capture stopped, {} frames, {} misses",
        signal.frames(),
        signal.misses()
    );
}
