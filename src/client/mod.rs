//! Public facade over the session registry.
//!
//! Every method only enqueues a command and returns. Outcomes arrive on the
//! [`EventSink`] given to [`PeerConnectionClient::initialize_engine`].

pub(crate) mod command;
mod executor;
pub(crate) mod queue;

use crate::config::{CaptureFormat, ClientConfig};
use crate::error::{ClientError, Result};
use crate::events::EventSink;
use crate::peer::connection::RtcEngineFactory;
use crate::peer::engine::{CaptureSource, EngineFactory, LocalMedia, VideoSink};
use crate::peer::session::SessionSnapshot;
use crate::peer::types::{HandleId, IceCandidate, SessionDescription};
use command::Command;
use executor::Executor;
use queue::CommandQueue;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const EXECUTOR_THREAD_NAME: &str = "pc-executor";

/// Orchestrates the peer sessions of one call.
///
/// Owns a dedicated executor thread. Instances are independent of each
/// other; dropping one stops its executor once the queued work is done.
pub struct PeerConnectionClient {
    queue: CommandQueue,
    worker: Option<thread::JoinHandle<()>>,
}

impl PeerConnectionClient {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Result<Self> {
        let (queue, commands) = queue::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let executor = Executor::new(factory, queue.downgrade(), commands);
        let worker = thread::Builder::new()
            .name(EXECUTOR_THREAD_NAME.into())
            .spawn(move || runtime.block_on(executor.run()))?;
        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    /// Client backed by the webrtc-rs engine.
    pub fn with_webrtc() -> Result<Self> {
        Self::new(Arc::new(RtcEngineFactory::default()))
    }

    /// Resets the per-call state and bootstraps the media engine. Session
    /// operations queued before this one are ignored.
    pub fn initialize_engine(&self, config: ClientConfig, sink: EventSink) -> Result<()> {
        self.queue.send(Command::Initialize {
            config: Box::new(config),
            sink,
        })
    }

    /// Publishing session: local tracks are fed by `capture` and rendered to
    /// `local_sink`; remote video of later subscriptions goes to `remote_sinks`.
    pub fn create_initiator_session(
        &self,
        local_sink: Arc<dyn VideoSink>,
        remote_sinks: Vec<Arc<dyn VideoSink>>,
        capture: Arc<dyn CaptureSource>,
        handle: HandleId,
    ) -> Result<()> {
        self.queue.send(Command::CreateInitiator {
            handle,
            media: LocalMedia::new(local_sink, remote_sinks, capture),
        })
    }

    pub fn create_offer(&self, handle: HandleId) -> Result<()> {
        self.queue.send(Command::CreateOffer(handle))
    }

    /// Applies the remote answer to a publishing session.
    pub fn set_remote_description(&self, handle: HandleId, sdp: SessionDescription) -> Result<()> {
        self.queue.send(Command::SetRemoteDescription { handle, sdp })
    }

    /// Opens a subscribing session for `handle`, replacing any registered
    /// one, and answers `sdp`.
    pub fn accept_responder_offer(&self, handle: HandleId, sdp: SessionDescription) -> Result<()> {
        self.queue.send(Command::AcceptOffer { handle, sdp })
    }

    pub fn add_remote_candidate(&self, handle: HandleId, candidate: IceCandidate) -> Result<()> {
        self.queue.send(Command::AddRemoteCandidate { handle, candidate })
    }

    /// Starts (or stops, with `enabled = false`) periodic stats for `handle`.
    pub fn poll_stats(&self, handle: HandleId, period: Duration, enabled: bool) -> Result<()> {
        self.queue.send(Command::PollStats {
            handle,
            period,
            enabled,
        })
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.queue.send(Command::SetAudioEnabled(enabled))
    }

    pub fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.queue.send(Command::SetVideoEnabled(enabled))
    }

    pub fn stop_video_source(&self) -> Result<()> {
        self.queue.send(Command::StopVideoSource)
    }

    pub fn start_video_source(&self) -> Result<()> {
        self.queue.send(Command::StartVideoSource)
    }

    pub fn switch_camera(&self) -> Result<()> {
        self.queue.send(Command::SwitchCamera)
    }

    pub fn change_capture_format(&self, width: u32, height: u32, fps: u32) -> Result<()> {
        self.queue
            .send(Command::ChangeCaptureFormat(CaptureFormat { width, height, fps }))
    }

    /// Disposes every session and the engine, then emits `Closed`. A second
    /// call before the next `initialize_engine` does nothing.
    pub fn close_all(&self) -> Result<()> {
        self.queue.send(Command::CloseAll { done: None })
    }

    /// [`close_all`](Self::close_all) that resolves once teardown finished.
    pub async fn close_and_wait(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.queue.send(Command::CloseAll { done: Some(done) })?;
        rx.await.map_err(|_| ClientError::WorkerGone)
    }

    pub async fn session_snapshot(&self, handle: HandleId) -> Result<Option<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.queue.send(Command::Snapshot { handle, reply })?;
        rx.await.map_err(|_| ClientError::WorkerGone)
    }

    /// Registered handles in ascending order.
    pub async fn handles(&self) -> Result<Vec<HandleId>> {
        let (reply, rx) = oneshot::channel();
        self.queue.send(Command::Handles { reply })?;
        rx.await.map_err(|_| ClientError::WorkerGone)
    }

    /// Stops the executor after the queued work and joins its thread.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.queue.send(Command::Shutdown);
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| ClientError::WorkerGone),
            None => Ok(()),
        }
    }
}

impl Drop for PeerConnectionClient {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            if self.queue.send(Command::Shutdown).is_err() {
                warn!("executor already gone on drop");
            } else {
                debug!("executor asked to stop");
            }
        }
    }
}
