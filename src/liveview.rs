//! Live view pump
//!
//! Polls `CameraSession::preview` on a fixed interval from a tokio task and
//! publishes the latest frame on a watch channel. Driver calls run on the
//! blocking pool so the runtime is never stalled by the camera.

use crate::driver::CameraDriver;
use crate::errors::CameraError;
use crate::frame::PreviewFrame;
use crate::session::{CameraSession, CapturedImage};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

pub struct LiveView {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    frames: watch::Receiver<Option<PreviewFrame>>,
    task: Option<JoinHandle<()>>,
}

impl LiveView {
    /// Start polling `session` every `interval`. Must be called inside a
    /// tokio runtime.
    pub fn start<D>(session: Arc<CameraSession<D>>, interval: Duration) -> Self
    where
        D: CameraDriver + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(None);

        session.enable_liveview();
        info!("[LiveView] Started ({} ms)", interval.as_millis());

        let task = tokio::spawn({
            let running = running.clone();
            let shutdown = shutdown.clone();
            async move {
                let mut frames: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    let polled = session.clone();
                    match tokio::task::spawn_blocking(move || polled.preview()).await {
                        Ok(Some(frame)) => {
                            frames += 1;
                            if tx.send(Some(frame)).is_err() {
                                debug!("[LiveView] No receivers left");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("[LiveView] Preview task failed: {}", e);
                            break;
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown.notified() => break,
                    }
                }

                running.store(false, Ordering::Relaxed);
                session.disable_liveview();
                info!("[LiveView] Stopped after {} frames", frames);
            }
        });

        Self {
            running,
            shutdown,
            frames: rx,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// A receiver that is notified on every new frame.
    pub fn frames(&self) -> watch::Receiver<Option<PreviewFrame>> {
        self.frames.clone()
    }

    pub fn latest(&self) -> Option<PreviewFrame> {
        self.frames.borrow().clone()
    }

    /// Stop polling and wait for the in-flight preview to finish.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("[LiveView] Pump task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.running.store(false, Ordering::Relaxed);
            self.shutdown.notify_one();
        }
    }
}

/// Run `CameraSession::capture` on the blocking pool.
pub async fn capture_async<D>(session: Arc<CameraSession<D>>) -> Result<CapturedImage, CameraError>
where
    D: CameraDriver + 'static,
{
    tokio::task::spawn_blocking(move || session.capture())
        .await
        .map_err(|e| CameraError::Task(e.to_string()))?
}
