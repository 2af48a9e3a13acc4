//! Frame quality scoring for document / ID-card capture.
//!
//! Stateless metrics over a [`Frame`] (brightness, glare, sharpness,
//! contrast, noise ratio), mapping of the on-screen guide rectangle into
//! frame pixels, and a capture-readiness policy that turns a stream of
//! metrics into a debounced "capture now" decision.

pub mod analyze;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod policy;
pub mod region;
pub mod session;
pub mod settings;
pub mod sharpness;

pub use analyze::{analyze_image, analyze_image_base64, AnalysisResult};
pub use error::{QualityError, QualityResult};
pub use frame::Frame;
pub use metrics::{compute_metrics, Metrics, MetricsConfig};
pub use policy::{CaptureState, PolicyConfig, ReadinessPolicy, Verdict};
pub use region::{map_to_frame, BoundsMode, DisplaySpace, FrameSpace, Rect, RoiSpec, Size};
pub use session::{CaptureReporter, CaptureSession, Capturer, SessionConfig, SessionEvent};
pub use settings::QualitySettings;
pub use sharpness::{calculate_sharpness, select_sharpest, SharpnessScope};
