//! Skywatch detector
//!
//! Real-time drone detection, tracking and net-launcher targeting.
//!
//! # Architecture
//!
//! One capture thread, one pipeline loop and one thread per streaming client:
//!
//! ```text
//! FrameSource -> [capture slot] -> detect -> score -> track -> { alert, target -> fire }
//!             -> render -> [stream slot] -> MJPEG clients
//! ```
//!
//! All cross-frame state (tracks, the target lock, the fire cooldown, alert
//! throttles) is owned by the pipeline loop. The actuator is only ever driven
//! from the fire interlock checklist, and every fire decision, pass or fail,
//! is appended to a hash-chained audit log.
//!
//! # Module Structure
//!
//! - `ingest`, `capture`: frame sources and the capture thread
//! - `detect`, `score`, `track`: inference, drone scoring, multi-object tracking
//! - `targeting`: range estimate, lock state machine, interlocks, actuator, audit log
//! - `alert`: alert sinks and throttling
//! - `render`, `stream`: overlay drawing, the MJPEG server and `/metrics`
//! - `pipeline`: wiring and the per-frame cycle
//! - `config`, `hardware`, `error`: settings and safety limits, startup probe,
//!   error taxonomy

pub mod alert;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod hardware;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod score;
pub mod stream;
pub mod targeting;
pub mod track;

pub use alert::{AlertDispatcher, AlertHandler};
pub use config::{Config, ConfigOverrides};
pub use detect::{Detection, InferenceEngine};
pub use error::{
    AcquisitionError, ActuationError, AlertError, ConfigError, InferenceError,
    StreamingClientError,
};
pub use frame::{Frame, FrameMeta};
pub use hardware::HardwareProbe;
pub use ingest::FrameSource;
pub use pipeline::{DetectionPipeline, FrameReport, RunSummary};
pub use score::{DroneScore, ScoredDetection};
pub use stream::{LatestSlot, StreamingServer};
pub use targeting::{ArmSwitch, FireNetController, FireOutcome, RejectReason, TargetingSystem};
pub use track::{ObjectTracker, TrackedObject};
