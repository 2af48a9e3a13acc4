//! Live capture session.
//!
//! One tokio task owns the [`ReadinessPolicy`] and serializes everything that
//! touches it: incoming frames, the aggregation tick, the debounce timer,
//! capture reports and resets. Frames go through a single-slot `watch`
//! channel, so a slow analysis only ever sees the newest frame.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::analyze::analyze_frame;
use crate::error::{QualityError, QualityResult};
use crate::frame::Frame;
use crate::metrics::MetricsConfig;
use crate::policy::{
    ArtifactId, BurstSelection, CaptureReport, CaptureRequest, CaptureState, CaptureSummary,
    PolicyConfig, PolicyEvent, ReadinessPolicy, SessionId, Verdict,
};
use crate::region::RoiSpec;
use crate::sharpness::select_sharpest;

/// Notifications published by a running session.
pub type SessionEvent = PolicyEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub metrics: MetricsConfig,
    pub policy: PolicyConfig,
    /// Analyze only the guide rectangle instead of the whole frame.
    pub roi: Option<RoiSpec>,
}

/// The platform side that actually takes pictures.
///
/// `request_capture` must eventually report every slot in `0..request.count`
/// through the reporter, from any thread. Reports for a session that has
/// since been reset are dropped.
pub trait Capturer: Send + Sync + 'static {
    fn request_capture(&self, request: CaptureRequest, reporter: CaptureReporter);

    /// Decodes a captured artifact for the sharpest-of-N pass.
    fn load_artifact(&self, id: &ArtifactId) -> QualityResult<Frame> {
        Err(QualityError::DecodeFailure(format!(
            "artifact {} cannot be loaded",
            id
        )))
    }

    /// Called for artifacts dropped by the sharpest-of-N pass.
    fn discard_artifact(&self, _id: &ArtifactId) {}
}

enum Command {
    Reset,
    Report(CaptureReport),
}

/// Handle given to the capturer to report slot outcomes. Tagged with the
/// session that issued the request.
#[derive(Clone)]
pub struct CaptureReporter {
    session: SessionId,
    tx: mpsc::UnboundedSender<Command>,
}

impl CaptureReporter {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn report(&self, slot: usize, result: Result<ArtifactId, String>) {
        let report = CaptureReport {
            session: self.session,
            slot,
            result,
        };
        if self.tx.send(Command::Report(report)).is_err() {
            debug!("{} capture report for slot {} after shutdown", self.session, slot);
        }
    }

    pub fn success(&self, slot: usize, id: impl Into<ArtifactId>) {
        self.report(slot, Ok(id.into()));
    }

    pub fn failure(&self, slot: usize, reason: impl Into<String>) {
        self.report(slot, Err(reason.into()));
    }
}

pub struct CaptureSession {
    frame_tx: watch::Sender<Option<Arc<Frame>>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    verdict_rx: watch::Receiver<Verdict>,
    state_rx: watch::Receiver<CaptureState>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Starts the session loop on the current tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        capturer: Arc<dyn Capturer>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (verdict_tx, verdict_rx) = watch::channel(Verdict::Analyzing);
        let (state_tx, state_rx) = watch::channel(CaptureState::Analyzing);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let worker = SessionWorker {
            policy: ReadinessPolicy::new(config.policy.clone()),
            config,
            capturer,
            cmd_tx: cmd_tx.clone(),
            verdict_tx,
            state_tx,
            events_tx,
            listener_gone: false,
        };
        let handle = tokio::spawn(worker.run(frame_rx, cmd_rx, cancel_token.clone()));

        let session = Self {
            frame_tx,
            cmd_tx,
            verdict_rx,
            state_rx,
            cancel_token,
            handle: Some(handle),
        };
        (session, events_rx)
    }

    /// Hands over the newest camera frame, replacing any frame not yet analyzed.
    pub fn submit_frame(&self, frame: Frame) {
        self.frame_tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn current_verdict(&self) -> Verdict {
        *self.verdict_rx.borrow()
    }

    pub fn current_state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_verdict(&self) -> watch::Receiver<Verdict> {
        self.verdict_rx.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state_rx.clone()
    }

    /// Cancels any pending debounce or burst and starts over.
    pub fn reset(&self) {
        if self.cmd_tx.send(Command::Reset).is_err() {
            warn!("reset requested after the session loop stopped");
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.context("session loop task failed to join")?;
        }
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct SessionWorker {
    policy: ReadinessPolicy,
    config: SessionConfig,
    capturer: Arc<dyn Capturer>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    verdict_tx: watch::Sender<Verdict>,
    state_tx: watch::Sender<CaptureState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    listener_gone: bool,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut frame_rx: watch::Receiver<Option<Arc<Frame>>>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        cancel_token: CancellationToken,
    ) {
        let tick_interval = self.config.policy.tick_interval();
        let mut ticker = time::interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("capture session started ({})", self.policy.session());

        loop {
            let debounce_at = self.policy.debounce_deadline().map(Instant::from_std);
            let debounce_sleep = time::sleep_until(
                debounce_at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("capture session shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let events = self.policy.tick(Instant::now().into_std());
                    self.dispatch(events).await;
                }
                _ = debounce_sleep, if debounce_at.is_some() => {
                    let events = self.policy.on_debounce_elapsed(Instant::now().into_std());
                    self.dispatch(events).await;
                }
                changed = frame_rx.changed() => {
                    if changed.is_err() {
                        debug!("frame source closed");
                        break;
                    }
                    let frame = frame_rx.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        self.analyze(frame).await;
                    }
                }
                cmd = cmd_rx.recv() => {
                    let events = match cmd {
                        Some(Command::Reset) => self.policy.reset(),
                        Some(Command::Report(report)) => self.policy.on_capture_report(report),
                        None => break,
                    };
                    self.dispatch(events).await;
                }
            }
        }
    }

    async fn analyze(&mut self, frame: Arc<Frame>) {
        let metrics_config = self.config.metrics;
        let roi = self.config.roi;
        let result = tokio::task::spawn_blocking(move || {
            analyze_frame(&frame, &metrics_config, roi.as_ref())
        })
        .await;

        match result {
            Ok(Ok(metrics)) => {
                self.policy.push(metrics);
            }
            Ok(Err(err)) => debug!("skipping frame: {}", err),
            Err(err) => error!("frame analysis worker join failed: {}", err),
        }
    }

    /// Publishes policy events and performs their side effects, which may
    /// produce further events (Ready starts the capture, a finished burst
    /// runs the selection pass).
    async fn dispatch(&mut self, events: Vec<PolicyEvent>) {
        let mut pending: std::collections::VecDeque<PolicyEvent> = events.into();

        while let Some(event) = pending.pop_front() {
            match &event {
                PolicyEvent::VerdictChanged(verdict) => {
                    self.verdict_tx.send_replace(*verdict);
                }
                PolicyEvent::StateChanged { to, .. } => {
                    self.state_tx.send_replace(*to);
                    if *to == CaptureState::Ready {
                        pending.extend(self.policy.start_capture());
                    }
                }
                PolicyEvent::CaptureRequested(request) => {
                    let reporter = CaptureReporter {
                        session: request.session,
                        tx: self.cmd_tx.clone(),
                    };
                    self.capturer.request_capture(request.clone(), reporter);
                }
                PolicyEvent::CaptureComplete(summary) => {
                    let summary = self.select_artifacts(summary.clone()).await;
                    self.emit(PolicyEvent::CaptureComplete(summary));
                    continue;
                }
            }
            self.emit(event);
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        if self.events_tx.send(event).is_err() && !self.listener_gone {
            debug!("{} event listener dropped, events are no longer delivered", self.policy.session());
            self.listener_gone = true;
        }
    }

    async fn select_artifacts(&mut self, summary: CaptureSummary) -> CaptureSummary {
        let BurstSelection::Sharpest { scope } = &self.config.policy.selection else {
            return summary;
        };
        if summary.artifacts.len() < 2 {
            return summary;
        }

        let capturer = Arc::clone(&self.capturer);
        let scope = scope.clone();
        let ids = summary.artifacts.clone();
        let picked = tokio::task::spawn_blocking(move || {
            let mut loaded = Vec::new();
            let mut frames = Vec::new();
            for id in &ids {
                match capturer.load_artifact(id) {
                    Ok(frame) => {
                        loaded.push(id.clone());
                        frames.push(frame);
                    }
                    Err(err) => warn!("cannot score artifact {}: {}", id, err),
                }
            }
            select_sharpest(&frames, &scope).map(|pick| (loaded[pick.index].clone(), pick.sharpness))
        })
        .await;

        let (keep, sharpness) = match picked {
            Ok(Some(pick)) => pick,
            Ok(None) => {
                warn!("{} no artifact could be scored, keeping all", summary.session);
                return summary;
            }
            Err(err) => {
                error!("sharpness worker join failed: {}", err);
                return summary;
            }
        };

        info!(
            "{} keeping sharpest artifact {} (variance {:.1})",
            summary.session, keep, sharpness
        );
        for id in summary.artifacts.iter().filter(|id| **id != keep) {
            self.capturer.discard_artifact(id);
        }
        let kept = vec![keep];
        self.policy.retain_artifacts(summary.session, kept.clone());
        CaptureSummary {
            artifacts: kept,
            ..summary
        }
    }
}
