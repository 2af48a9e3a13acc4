//! Capture-readiness policy.
//!
//! A synchronous state machine fed with per-frame [`Metrics`] and explicit
//! timestamps. It owns the sample window and decides when lighting has been
//! good for long enough to trigger a capture:
//!
//! ```text
//! Analyzing -> Optimal -(debounce)-> Ready -> Capturing -> Done
//!     ^__________________ reset ______________________________|
//! ```
//!
//! The async session in [`crate::session`] drives it from a single task, so
//! nothing here needs locking.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::QualityError;
use crate::metrics::Metrics;
use crate::sharpness::SharpnessScope;

/// Identifier of a captured artifact, as handed out by the capture collaborator.
pub type ArtifactId = String;

/// Classification of the current lighting conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    #[default]
    Analyzing,
    TooDark,
    TooBright,
    GlareDetected,
    Optimal,
}

impl Verdict {
    /// Status line shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Analyzing => "Analyzing...",
            Verdict::TooDark => "Too dark - move to a brighter place",
            Verdict::TooBright => "Too bright - reduce direct light",
            Verdict::GlareDetected => "Glare detected - tilt the card",
            Verdict::Optimal => "Lighting is good - hold still",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    #[default]
    Analyzing,
    Optimal,
    Ready,
    Capturing,
    Done,
}

/// Monotonic tag of a capture session. Bumped on every reset so late
/// capture reports from an earlier session can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GlareAggregate {
    Mean,
    #[default]
    Max,
}

/// What happens to a completed burst.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum BurstSelection {
    #[default]
    KeepAll,
    /// Keep only the sharpest capture and discard the rest.
    Sharpest { scope: SharpnessScope },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub tick_interval_ms: u64,
    pub debounce_ms: u64,
    /// Mean brightness below this is too dark.
    pub brightness_low: f64,
    /// Mean brightness above this is too bright.
    pub brightness_high: f64,
    /// Glare percentage above this is glare.
    pub glare_limit: f64,
    pub glare_aggregate: GlareAggregate,
    pub burst_count: usize,
    pub max_window_samples: usize,
    pub selection: BurstSelection,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            debounce_ms: 2000,
            brightness_low: 81.0,
            brightness_high: 155.0,
            glare_limit: 20.0,
            glare_aggregate: GlareAggregate::Max,
            burst_count: 1,
            max_window_samples: 64,
            selection: BurstSelection::KeepAll,
        }
    }
}

impl PolicyConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Aggregate of one tick's worth of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowAggregate {
    pub brightness: f64,
    pub glare: f64,
    pub samples: usize,
}

pub fn aggregate<'a, I>(samples: I, glare: GlareAggregate) -> Option<WindowAggregate>
where
    I: IntoIterator<Item = &'a Metrics>,
{
    let mut count = 0usize;
    let mut brightness_sum = 0.0;
    let mut glare_sum = 0.0;
    let mut glare_max = f64::MIN;
    for m in samples {
        count += 1;
        brightness_sum += m.brightness;
        glare_sum += m.glare_percentage;
        glare_max = glare_max.max(m.glare_percentage);
    }
    if count == 0 {
        return None;
    }
    Some(WindowAggregate {
        brightness: brightness_sum / count as f64,
        glare: match glare {
            GlareAggregate::Mean => glare_sum / count as f64,
            GlareAggregate::Max => glare_max,
        },
        samples: count,
    })
}

pub fn classify(aggregate: Option<&WindowAggregate>, config: &PolicyConfig) -> Verdict {
    let Some(agg) = aggregate else {
        return Verdict::Analyzing;
    };
    if agg.brightness < config.brightness_low {
        Verdict::TooDark
    } else if agg.brightness > config.brightness_high {
        Verdict::TooBright
    } else if agg.glare > config.glare_limit {
        Verdict::GlareDetected
    } else {
        Verdict::Optimal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub session: SessionId,
    pub count: usize,
}

/// One slot's outcome as reported by the capture collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub session: SessionId,
    pub slot: usize,
    pub result: Result<ArtifactId, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub session: SessionId,
    /// Successful artifacts in slot order.
    pub artifacts: Vec<ArtifactId>,
    pub failed_slots: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    VerdictChanged(Verdict),
    StateChanged { from: CaptureState, to: CaptureState },
    CaptureRequested(CaptureRequest),
    CaptureComplete(CaptureSummary),
}

#[derive(Debug, Clone)]
struct Burst {
    slots: Vec<Option<Result<ArtifactId, String>>>,
    reported: usize,
}

#[derive(Debug, Clone)]
enum Phase {
    Analyzing,
    Optimal { since: Instant },
    Ready,
    Capturing(Burst),
    Done(CaptureSummary),
}

impl Phase {
    fn state(&self) -> CaptureState {
        match self {
            Phase::Analyzing => CaptureState::Analyzing,
            Phase::Optimal { .. } => CaptureState::Optimal,
            Phase::Ready => CaptureState::Ready,
            Phase::Capturing(_) => CaptureState::Capturing,
            Phase::Done(_) => CaptureState::Done,
        }
    }
}

pub struct ReadinessPolicy {
    config: PolicyConfig,
    window: VecDeque<Metrics>,
    verdict: Verdict,
    phase: Phase,
    session: SessionId,
}

impl ReadinessPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.max_window_samples.max(1)),
            config,
            verdict: Verdict::Analyzing,
            phase: Phase::Analyzing,
            session: SessionId(0),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn state(&self) -> CaptureState {
        self.phase.state()
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Summary of the finished burst, once in `Done`.
    pub fn summary(&self) -> Option<&CaptureSummary> {
        match &self.phase {
            Phase::Done(summary) => Some(summary),
            _ => None,
        }
    }

    /// Appends a sample. Samples are only collected while analyzing; the
    /// oldest one is dropped when the window is full.
    pub fn push(&mut self, metrics: Metrics) -> bool {
        if !matches!(self.phase, Phase::Analyzing | Phase::Optimal { .. }) {
            return false;
        }
        let cap = self.config.max_window_samples.max(1);
        while self.window.len() >= cap {
            self.window.pop_front();
        }
        self.window.push_back(metrics);
        true
    }

    /// Aggregates and clears the window, reclassifies, and moves between
    /// `Analyzing` and `Optimal`.
    pub fn tick(&mut self, now: Instant) -> Vec<PolicyEvent> {
        let agg = aggregate(self.window.iter(), self.config.glare_aggregate);
        self.window.clear();

        let mut events = Vec::new();
        if !matches!(self.phase, Phase::Analyzing | Phase::Optimal { .. }) {
            return events;
        }

        let verdict = classify(agg.as_ref(), &self.config);
        if let Some(agg) = &agg {
            debug!(
                "{} tick: brightness {:.1}, glare {:.2}% over {} samples -> {:?}",
                self.session, agg.brightness, agg.glare, agg.samples, verdict
            );
        }
        if verdict != self.verdict {
            self.verdict = verdict;
            events.push(PolicyEvent::VerdictChanged(verdict));
        }

        match (self.phase.state(), verdict) {
            (CaptureState::Analyzing, Verdict::Optimal) => {
                self.transition(Phase::Optimal { since: now }, &mut events);
            }
            (CaptureState::Optimal, Verdict::Optimal) => {
                events.extend(self.on_debounce_elapsed(now));
            }
            (CaptureState::Optimal, _) => {
                debug!("{} debounce cancelled by {:?}", self.session, verdict);
                self.transition(Phase::Analyzing, &mut events);
            }
            _ => {}
        }
        events
    }

    /// When the pending debounce timer fires, if one is pending.
    pub fn debounce_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Optimal { since } => Some(since + self.config.debounce()),
            _ => None,
        }
    }

    /// Promotes `Optimal` to `Ready` if the verdict held for the whole
    /// debounce period.
    pub fn on_debounce_elapsed(&mut self, now: Instant) -> Vec<PolicyEvent> {
        let mut events = Vec::new();
        if let Some(deadline) = self.debounce_deadline() {
            if now >= deadline && self.verdict == Verdict::Optimal {
                self.transition(Phase::Ready, &mut events);
            }
        }
        events
    }

    /// Moves `Ready` to `Capturing` and emits the capture request.
    pub fn start_capture(&mut self) -> Vec<PolicyEvent> {
        let mut events = Vec::new();
        if !matches!(self.phase, Phase::Ready) {
            return events;
        }
        let count = self.config.burst_count.max(1);
        let request = CaptureRequest {
            session: self.session,
            count,
        };
        info!("{} requesting {} capture(s)", self.session, count);
        self.transition(
            Phase::Capturing(Burst {
                slots: vec![None; count],
                reported: 0,
            }),
            &mut events,
        );
        events.push(PolicyEvent::CaptureRequested(request));
        events
    }

    /// Records one slot's outcome. Reports for another session, an unknown
    /// slot or an already reported slot are ignored.
    pub fn on_capture_report(&mut self, report: CaptureReport) -> Vec<PolicyEvent> {
        let mut events = Vec::new();
        if report.session != self.session {
            debug!(
                "ignoring stale capture report for {} (current {})",
                report.session, self.session
            );
            return events;
        }
        let Phase::Capturing(burst) = &mut self.phase else {
            debug!("{} ignoring capture report outside a burst", self.session);
            return events;
        };
        let Some(slot) = burst.slots.get_mut(report.slot) else {
            warn!(
                "{} capture report for unknown slot {}",
                self.session, report.slot
            );
            return events;
        };
        if slot.is_some() {
            warn!("{} duplicate report for slot {}", self.session, report.slot);
            return events;
        }

        if let Err(reason) = &report.result {
            let failure = QualityError::CaptureFailure {
                slot: report.slot,
                reason: reason.clone(),
            };
            warn!("{} {}", self.session, failure);
        }
        *slot = Some(report.result);
        burst.reported += 1;

        if burst.reported < burst.slots.len() {
            return events;
        }

        let mut artifacts = Vec::new();
        let mut failed_slots = Vec::new();
        for (index, slot) in burst.slots.iter().enumerate() {
            match slot {
                Some(Ok(id)) => artifacts.push(id.clone()),
                _ => failed_slots.push(index),
            }
        }
        let summary = CaptureSummary {
            session: self.session,
            artifacts,
            failed_slots,
        };
        info!(
            "{} burst complete: {} captured, {} failed",
            self.session,
            summary.artifacts.len(),
            summary.failed_slots.len()
        );
        self.transition(Phase::Done(summary.clone()), &mut events);
        events.push(PolicyEvent::CaptureComplete(summary));
        events
    }

    /// Replaces the artifact set of a finished burst (after the
    /// sharpest-of-N pass). Returns false if `session` is no longer current.
    pub fn retain_artifacts(&mut self, session: SessionId, keep: Vec<ArtifactId>) -> bool {
        if session != self.session {
            return false;
        }
        match &mut self.phase {
            Phase::Done(summary) => {
                summary.artifacts = keep;
                true
            }
            _ => false,
        }
    }

    /// Drops all samples and captured state and starts a new session.
    pub fn reset(&mut self) -> Vec<PolicyEvent> {
        let mut events = Vec::new();
        self.window.clear();
        self.session = SessionId(self.session.0 + 1);
        info!("reset, now {}", self.session);
        if self.verdict != Verdict::Analyzing {
            self.verdict = Verdict::Analyzing;
            events.push(PolicyEvent::VerdictChanged(Verdict::Analyzing));
        }
        self.transition(Phase::Analyzing, &mut events);
        events
    }

    fn transition(&mut self, next: Phase, events: &mut Vec<PolicyEvent>) {
        let from = self.phase.state();
        let to = next.state();
        self.phase = next;
        if from != to {
            debug!("{} {:?} -> {:?}", self.session, from, to);
            events.push(PolicyEvent::StateChanged { from, to });
        }
    }
}
