use crate::config::PromptMode;
use facewatch_core::enrollment::{EnrollmentError, EnrollmentRequest};
use facewatch_core::session::SessionError;
use facewatch_core::storage::validate_identity;
use facewatch_core::{EmbeddingExtractor, EnrollmentOutcome, FaceLocalizer, FrameReport, Session};
use facewatch_hw::{Camera, CameraError, Frame};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Outstanding naming requests the prompt thread may hold.
const PROMPT_QUEUE: usize = 16;

/// Times a face is offered to the prompt before an unusable name skips it.
const NAME_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("frame loop thread panicked")]
    Panicked,
}

/// Anything that yields frames. `Ok(None)` ends the loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.capture_frame().map(Some)
    }
}

/// Receives one report per processed frame.
pub trait Renderer: Send {
    fn render(&mut self, frame: &Frame, report: &FrameReport);
}

/// Asks a human to name a face. `None` skips the enrollment.
pub trait NamePrompt: Send {
    fn ask(&mut self, request: &EnrollmentRequest) -> Option<String>;
}

/// Reads a name from standard input, one line per request.
pub struct StdinPrompt;

impl NamePrompt for StdinPrompt {
    fn ask(&mut self, request: &EnrollmentRequest) -> Option<String> {
        tracing::info!(
            request = %request.id,
            track = %request.track,
            "unknown face: enter a name on stdin (empty to skip)"
        );
        read_name(&mut std::io::stdin().lock(), &mut std::io::stderr(), request)
    }
}

/// Show the question on `output` regardless of log filtering, then read one
/// line from `input`. Blank lines and end of input skip.
fn read_name(
    input: &mut impl BufRead,
    output: &mut impl Write,
    request: &EnrollmentRequest,
) -> Option<String> {
    let shown = write!(
        output,
        "Not recognized (track {}). Type a name, empty to skip: ",
        request.track
    )
    .and_then(|()| output.flush());
    if let Err(e) = shown {
        tracing::warn!(error = %e, "failed to show name prompt");
    }

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()).filter(|n| !n.is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read name from stdin");
            None
        }
    }
}

/// Ask until the prompt gives a usable identity name or skips.
fn ask_name(prompt: &mut dyn NamePrompt, request: &EnrollmentRequest) -> Option<String> {
    for _ in 0..NAME_ATTEMPTS {
        let name = prompt.ask(request)?;
        match validate_identity(&name) {
            Ok(_) => return Some(name),
            Err(e) => tracing::warn!(name = %name, error = %e, "unusable name, asking again"),
        }
    }
    tracing::warn!(request = %request.id, "no usable name given, skipping enrollment");
    None
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub dark_skipped: u64,
    pub enrollment_requests: u64,
    pub enrolled: u64,
}

/// Everything the frame loop owns.
pub struct Engine {
    pub session: Session,
    pub source: Box<dyn FrameSource>,
    pub localizer: Box<dyn FaceLocalizer + Send>,
    pub extractor: Box<dyn EmbeddingExtractor + Send>,
    pub renderer: Box<dyn Renderer>,
    pub prompt: Box<dyn NamePrompt>,
    pub prompt_mode: PromptMode,
    pub skip_dark_frames: bool,
}

/// Channels to the prompt thread in queued mode.
struct PromptQueue {
    requests: mpsc::Sender<EnrollmentRequest>,
    answers: mpsc::Receiver<(Uuid, Option<String>)>,
}

impl Engine {
    /// Run the loop on the current thread until the source ends or `stop`
    /// is set. `stop` is checked once per iteration, after the frame.
    pub fn run(self, stop: &AtomicBool) -> Result<LoopStats, EngineError> {
        let Engine {
            mut session,
            mut source,
            mut localizer,
            mut extractor,
            mut renderer,
            prompt,
            prompt_mode,
            skip_dark_frames,
        } = self;

        let (mut prompt, mut queue) = match prompt_mode {
            PromptMode::Blocking => (Some(prompt), None),
            PromptMode::Queued => (None, Some(spawn_prompt(prompt)?)),
        };

        let mut stats = LoopStats::default();
        tracing::info!(
            mode = ?prompt_mode,
            model = %session.config().model,
            identities = session.gallery().len(),
            "frame loop started"
        );

        loop {
            if let Some(q) = queue.as_mut() {
                while let Ok((id, name)) = q.answers.try_recv() {
                    apply(&mut session, id, name, &mut stats);
                }
            }

            let Some(frame) = source.next_frame()? else {
                tracing::info!("frame source ended");
                break;
            };
            stats.frames += 1;

            if skip_dark_frames && frame.is_dark {
                stats.dark_skipped += 1;
                tracing::trace!(
                    seq = frame.sequence,
                    brightness = frame.avg_brightness(),
                    "skipping dark frame"
                );
            } else {
                let report = session.process_frame(
                    &frame.image,
                    Instant::now(),
                    &mut *localizer,
                    &mut *extractor,
                );
                renderer.render(&frame, &report);

                for request in report.enrollment_requests {
                    stats.enrollment_requests += 1;
                    match (prompt.as_mut(), queue.as_ref()) {
                        (Some(p), _) => {
                            let name = ask_name(&mut **p, &request);
                            apply(&mut session, request.id, name, &mut stats);
                        }
                        (None, Some(q)) => {
                            let id = request.id;
                            match q.requests.try_send(request) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    tracing::warn!(
                                        request = %id,
                                        pending = session.pending_enrollments(),
                                        "prompt backlog full, skipping enrollment"
                                    );
                                    apply(&mut session, id, None, &mut stats);
                                }
                                Err(TrySendError::Closed(_)) => {
                                    tracing::warn!(
                                        request = %id,
                                        "prompt thread gone, skipping enrollment"
                                    );
                                    apply(&mut session, id, None, &mut stats);
                                }
                            }
                        }
                        (None, None) => apply(&mut session, request.id, None, &mut stats),
                    }
                }
            }

            if stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested");
                break;
            }
        }

        let dropped = session.cancel_enrollments();
        if dropped > 0 {
            tracing::info!(dropped, "discarding unanswered enrollment requests");
        }
        tracing::info!(
            frames = stats.frames,
            dark_skipped = stats.dark_skipped,
            requests = stats.enrollment_requests,
            enrolled = stats.enrolled,
            tracks = session.tracker().tracks().len(),
            "frame loop stopped"
        );
        Ok(stats)
    }
}

fn apply(session: &mut Session, id: Uuid, name: Option<String>, stats: &mut LoopStats) {
    match session.complete_enrollment(id, name) {
        Ok(EnrollmentOutcome::Enrolled { identity, samples, .. }) => {
            stats.enrolled += 1;
            tracing::info!(identity = %identity, samples, "identity enrolled");
        }
        Ok(EnrollmentOutcome::Skipped) => {}
        Err(SessionError::Enrollment(EnrollmentError::InvalidName(name))) => {
            // The request stays open on a rejected name; release it.
            tracing::warn!(request = %id, name = %name, "invalid name, skipping enrollment");
            let _ = session.complete_enrollment(id, None);
        }
        Err(e) => tracing::warn!(request = %id, error = %e, "enrollment not applied"),
    }
}

/// Start the prompt thread. It exits once the request sender is dropped
/// and its current question is answered.
fn spawn_prompt(mut prompt: Box<dyn NamePrompt>) -> Result<PromptQueue, EngineError> {
    let (req_tx, mut req_rx) = mpsc::channel::<EnrollmentRequest>(PROMPT_QUEUE);
    let (ans_tx, ans_rx) = mpsc::channel::<(Uuid, Option<String>)>(PROMPT_QUEUE);

    std::thread::Builder::new()
        .name("facewatch-prompt".into())
        .spawn(move || {
            while let Some(request) = req_rx.blocking_recv() {
                let name = ask_name(&mut *prompt, &request);
                if ans_tx.blocking_send((request.id, name)).is_err() {
                    break;
                }
            }
            tracing::debug!("prompt thread exiting");
        })
        .map_err(|source| EngineError::Spawn {
            name: "facewatch-prompt",
            source,
        })?;

    Ok(PromptQueue {
        requests: req_tx,
        answers: ans_rx,
    })
}

/// Handle to the frame loop thread.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<LoopStats, EngineError>>,
    exited: Option<oneshot::Receiver<()>>,
}

impl EngineHandle {
    /// Ask the loop to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Resolves when the loop thread has finished, for whatever reason.
    pub async fn exited(&mut self) {
        if let Some(rx) = self.exited.as_mut() {
            let _ = rx.await;
            self.exited = None;
        }
    }

    /// Block until the loop thread returns.
    pub fn join(self) -> Result<LoopStats, EngineError> {
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}

/// Spawn the frame loop on a dedicated OS thread.
pub fn spawn(engine: Engine) -> Result<EngineHandle, EngineError> {
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel();

    let flag = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("facewatch-loop".into())
        .spawn(move || {
            let result = engine.run(&flag);
            if let Err(e) = &result {
                tracing::error!(error = %e, "frame loop failed");
            }
            let _ = done_tx.send(());
            result
        })
        .map_err(|source| EngineError::Spawn {
            name: "facewatch-loop",
            source,
        })?;

    Ok(EngineHandle {
        stop,
        thread,
        exited: Some(done_rx),
    })
}
