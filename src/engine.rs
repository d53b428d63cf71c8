use image::RgbImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, mpsc,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

use crate::error::{InferenceError, panic_message};
use crate::model::{DeviceInfo, SamplingParams, VisionLanguageModel};
use crate::orchestrator::process_multimodal_input;

/// Represents the current state of the inference engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// The worker is waiting for a request.
    Idle,
    /// The worker is running a generation.
    Processing,
}

/// A normalized request ready for the model.
pub struct EngineRequest {
    pub text: String,
    pub image: RgbImage,
    pub params: SamplingParams,
}

/// Generated text together with timing telemetry.
#[derive(Debug)]
pub struct EngineResponse {
    /// Identifier assigned when the request was submitted.
    pub id: u64,
    pub duration: Duration,
    pub response: String,
}

type EngineReply = oneshot::Sender<Result<EngineResponse, InferenceError>>;

struct EngineJob {
    id: u64,
    request: EngineRequest,
    reply: EngineReply,
}

/// Owns the loaded model on a dedicated thread and runs one generation at a time.
///
/// Handlers submit requests from any task and await the reply; the model itself is
/// never shared across threads.
pub struct InferenceEngine {
    state: Arc<Mutex<EngineState>>,
    req_tx: Option<mpsc::Sender<EngineJob>>,
    worker: Option<JoinHandle<()>>,
    id_counter: AtomicU64,
    device: DeviceInfo,
}

impl InferenceEngine {
    /// Moves `model` onto a new worker thread.
    pub fn new<M>(mut model: M, device: DeviceInfo) -> Self
    where
        M: VisionLanguageModel + Send + 'static,
    {
        let (req_tx, req_rx) = mpsc::channel::<EngineJob>();
        let state = Arc::new(Mutex::new(EngineState::Idle));

        let worker = std::thread::spawn({
            let state = state.clone();
            move || {
                while let Ok(job) = req_rx.recv() {
                    log::debug!("Running inference request {}", job.id);

                    *state.lock() = EngineState::Processing;
                    let start_time = Instant::now();

                    let EngineRequest {
                        text,
                        image,
                        params,
                    } = job.request;
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        process_multimodal_input(&mut model, &text, &image, &params)
                    }))
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        log::error!("Inference request {} panicked: {message}", job.id);
                        Err(InferenceError::Panicked(message))
                    });

                    let duration = start_time.elapsed();
                    log::debug!("Inference request {} finished in {duration:?}", job.id);

                    *state.lock() = EngineState::Idle;

                    let reply = result.map(|response| EngineResponse {
                        id: job.id,
                        duration,
                        response,
                    });
                    if job.reply.send(reply).is_err() {
                        log::warn!("Caller of request {} went away before the reply", job.id);
                    }
                }
                log::debug!("Inference worker stopped");
            }
        });

        Self {
            state,
            req_tx: Some(req_tx),
            worker: Some(worker),
            id_counter: AtomicU64::new(0),
            device,
        }
    }

    /// Returns the current state of the worker.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn device(&self) -> DeviceInfo {
        self.device
    }

    /// Queues `request` and returns the channel its result will arrive on.
    pub fn submit(
        &self,
        request: EngineRequest,
    ) -> Result<oneshot::Receiver<Result<EngineResponse, InferenceError>>, InferenceError> {
        let tx = self.req_tx.as_ref().ok_or(InferenceError::EngineStopped)?;
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        tx.send(EngineJob { id, request, reply })
            .map_err(|_| InferenceError::EngineStopped)?;
        Ok(rx)
    }

    /// Submits `request` and waits for the generated text.
    pub async fn infer(&self, request: EngineRequest) -> Result<EngineResponse, InferenceError> {
        let rx = self.submit(request)?;
        rx.await.map_err(|_| InferenceError::EngineStopped)?
    }

    /// Closes the request channel and waits for the worker to drain and exit.
    pub fn stop(&mut self) {
        self.req_tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Inference worker terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state())
            .field("device", &self.device)
            .field("running", &self.req_tx.is_some())
            .finish()
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
