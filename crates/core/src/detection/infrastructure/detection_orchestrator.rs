use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::detection_request::DetectionRequest;
use crate::detection::domain::detection_result::DetectionResult;
use crate::detection::domain::detection_service::{DetectionCallback, DetectionService};
use crate::detection::infrastructure::request_codec;
use crate::process::executable_resolver::WorkerCommand;
use crate::process::process_invoker::{ProcessInvoker, ProcessOutcome};
use crate::shared::constants::DEFAULT_WORKER_TIMEOUT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OrchestratorState {
    Idle = 0,
    Processing = 1,
}

impl OrchestratorState {
    fn from_u8(value: u8) -> Self {
        if value == OrchestratorState::Processing as u8 {
            OrchestratorState::Processing
        } else {
            OrchestratorState::Idle
        }
    }
}

struct Shared {
    state: AtomicU8,
    invoker: ProcessInvoker,
    /// Sender half of the in-flight invocation's cancel channel.
    cancel: Mutex<Option<Sender<()>>>,
}

/// Single-flight driver for the detection worker.
///
/// Each accepted submission runs `<program> <script> <request-json>` on its
/// own background thread. The state flips `Idle -> Processing` with a single
/// compare-and-swap and returns to `Idle` before the callback runs, so a
/// callback may immediately submit again.
pub struct DetectionOrchestrator {
    shared: Arc<Shared>,
    command: WorkerCommand,
    timeout: Duration,
}

impl DetectionOrchestrator {
    pub fn new(command: WorkerCommand) -> Self {
        Self::with_timeout(command, DEFAULT_WORKER_TIMEOUT)
    }

    pub fn with_timeout(command: WorkerCommand, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(OrchestratorState::Idle as u8),
                invoker: ProcessInvoker::new(),
                cancel: Mutex::new(None),
            }),
            command,
            timeout,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        OrchestratorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Kill the in-flight worker, if any. Its submission completes with
    /// [`DetectionError::Cancelled`].
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.shared.cancel.lock() {
            if let Some(tx) = slot.take() {
                log::info!("Cancelling in-flight detection");
                drop(tx);
            }
        }
    }

    /// Submit and block until the result arrives.
    pub fn submit_and_wait(
        &self,
        request: DetectionRequest,
    ) -> Result<DetectionResult, DetectionError> {
        let rx = self.submit_channel(request);
        rx.recv().unwrap_or(Err(DetectionError::Cancelled))
    }

    /// Submit and receive the result on a channel instead of a callback.
    pub fn submit_channel(
        &self,
        request: DetectionRequest,
    ) -> Receiver<Result<DetectionResult, DetectionError>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(
            request,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx
    }

    fn try_begin(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                OrchestratorState::Idle as u8,
                OrchestratorState::Processing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl DetectionService for DetectionOrchestrator {
    fn submit(&self, request: DetectionRequest, on_done: DetectionCallback) {
        if self.is_processing() {
            on_done(Err(DetectionError::Busy));
            return;
        }

        let encoded = match request_codec::encode(&request) {
            Ok(json) => json,
            Err(e) => {
                on_done(Err(e.into()));
                return;
            }
        };

        if !self.try_begin() {
            on_done(Err(DetectionError::Busy));
            return;
        }

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        if let Ok(mut slot) = self.shared.cancel.lock() {
            *slot = Some(cancel_tx);
        }

        let shared = self.shared.clone();
        let program = self.command.program.clone();
        let args = self.command.args([encoded]);
        let timeout = self.timeout;
        log::debug!(
            "Submitting detection for {} ({})",
            request.image_path().display(),
            request.model_name()
        );

        thread::spawn(move || {
            let outcome = shared
                .invoker
                .run_cancellable(&program, &args, timeout, &cancel_rx);
            let result = interpret(outcome);

            if let Ok(mut slot) = shared.cancel.lock() {
                *slot = None;
            }
            shared
                .state
                .store(OrchestratorState::Idle as u8, Ordering::Release);

            if let Err(ref e) = result {
                log::warn!("Detection failed: {e}");
            }
            on_done(result);
        });
    }

    fn is_processing(&self) -> bool {
        self.state() == OrchestratorState::Processing
    }
}

impl Drop for DetectionOrchestrator {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn interpret(outcome: ProcessOutcome) -> Result<DetectionResult, DetectionError> {
    match outcome {
        ProcessOutcome::Completed {
            exit_code: 0,
            stdout,
            ..
        } => {
            let result = request_codec::decode(&stdout)?;
            if result.success {
                Ok(result)
            } else {
                Err(DetectionError::Application(
                    result.error_message.unwrap_or_default(),
                ))
            }
        }
        ProcessOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => {
            let output = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(DetectionError::NonZeroExit {
                code: exit_code,
                output,
            })
        }
        ProcessOutcome::TimedOut { after } => Err(DetectionError::TimedOut(after)),
        ProcessOutcome::Crashed { description } => Err(DetectionError::Crashed(description)),
        ProcessOutcome::FailedToStart(failure) => {
            Err(DetectionError::FailedToStart(failure.to_string()))
        }
        ProcessOutcome::Cancelled => Err(DetectionError::Cancelled),
    }
}
