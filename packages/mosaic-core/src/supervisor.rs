//! Subprocess supervisor (component C4).
//!
//! Owns at most one running encoder child and serializes every transition
//! (`start`/`stop`/`recycle`/`replace_layout`) behind a single async mutex —
//! the "supervisor lock" of §5. Restarts are optimistic: a replacement
//! child is spawned and its stdout is handed to the broadcast reader before
//! the old child is asked to exit, so the gap seen by already-connected
//! viewers is minimized. Grounded in fritztv's `StreamManager` idle/restart
//! shape, generalized from a per-tuner registry to a single owned child.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use crate::broadcast::{self, FanOut};
use crate::catalog::Catalog;
use crate::encoder::EncoderProfile;
use crate::error::AppError;
use crate::filter_graph::{self, CompilerInput};
use crate::protocol_constants::STOP_GRACE_PERIOD_SECS;
use crate::state::{LayoutConfig, Mode};
use crate::utils::now_millis;

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

fn mode_to_u8(mode: Mode) -> u8 {
    match mode {
        Mode::Idle => 0,
        Mode::Starting => 1,
        Mode::Live => 2,
    }
}

fn u8_to_mode(v: u8) -> Mode {
    match v {
        1 => Mode::Starting,
        2 => Mode::Live,
        _ => Mode::Idle,
    }
}

/// A request to gracefully stop the current child; the sender is an ack
/// channel the supervise task replies on once the child has actually exited.
type StopAckSender = oneshot::Sender<()>;
type StopRequestSender = oneshot::Sender<StopAckSender>;
type StopRequestReceiver = oneshot::Receiver<StopAckSender>;

struct SupervisorState {
    stop_tx: Option<StopRequestSender>,
    current_layout: Option<LayoutConfig>,
    last_good_layout: Option<LayoutConfig>,
}

/// Owns the single active encoder child and the state the §5 lock protects.
pub struct Supervisor {
    state: Mutex<SupervisorState>,
    /// Serializes the whole body of every transition (`start_with_args`,
    /// `stop`, the automatic-restart branch) so two racing transitions can
    /// never both reach the spawn-and-register-with-`FanOut` step — see §5.
    transition: Mutex<()>,
    mode: AtomicU8,
    last_activity_ms: AtomicU64,
    generation: AtomicU64,
    fanout: FanOut,
    catalog: Arc<Catalog>,
    profile: &'static EncoderProfile,
    ffmpeg_binary: String,
    max_stream_size_bytes: u64,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        fanout: FanOut,
        catalog: Arc<Catalog>,
        profile: &'static EncoderProfile,
        ffmpeg_binary: String,
        max_stream_size_bytes: u64,
    ) -> Self {
        Self {
            state: Mutex::new(SupervisorState {
                stop_tx: None,
                current_layout: None,
                last_good_layout: None,
            }),
            transition: Mutex::new(()),
            mode: AtomicU8::new(mode_to_u8(Mode::Idle)),
            last_activity_ms: AtomicU64::new(now_millis()),
            generation: AtomicU64::new(0),
            fanout,
            catalog,
            profile,
            ffmpeg_binary,
            max_stream_size_bytes,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        u8_to_mode(self.mode.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    #[must_use]
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }

    pub fn mark_activity(&self) {
        self.last_activity_ms.store(now_millis(), Ordering::SeqCst);
    }

    pub async fn current_layout(&self) -> Option<LayoutConfig> {
        self.state.lock().await.current_layout.clone()
    }

    pub async fn last_good_layout(&self) -> Option<LayoutConfig> {
        self.state.lock().await.last_good_layout.clone()
    }

    fn resolve_inputs(&self, layout: &LayoutConfig) -> Result<Vec<CompilerInput>, AppError> {
        layout
            .ordered_slot_names()
            .into_iter()
            .map(|slot| {
                let channel_id = layout
                    .slot_to_channel
                    .get(&slot)
                    .expect("ordered_slot_names only returns assigned slots");
                self.catalog.resolve(channel_id).map(|channel| CompilerInput {
                    slot_name: slot,
                    source_url: channel.stream_url,
                })
            })
            .collect()
    }

    fn compile(&self, layout: &LayoutConfig) -> Result<Vec<String>, AppError> {
        let inputs = self.resolve_inputs(layout)?;
        filter_graph::compile(
            layout.kind,
            &inputs,
            &layout.audio_slot,
            &layout.per_slot_volume,
            layout.custom_slots.as_deref(),
            self.profile,
        )
    }

    async fn spawn_child(
        &self,
        args: &[String],
    ) -> Result<(Child, ChildStdout, ChildStderr), AppError> {
        let mut child = Command::new(&self.ffmpeg_binary)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| AppError::EncoderFailed(format!("failed to spawn encoder: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .expect("piped stdout is always present");
        let stderr = child
            .stderr
            .take()
            .expect("piped stderr is always present");
        Ok((child, stdout, stderr))
    }

    /// Applies (or optimistically replaces) a layout: validates, resolves
    /// channels, compiles a command, and starts it. On compile failure the
    /// running child, if any, is left untouched (§8 invariant 8).
    pub async fn apply_layout(self: &Arc<Self>, mut layout: LayoutConfig) -> Result<(), AppError> {
        layout.validate()?;
        let args = self.compile(&layout)?;
        self.start_with_args(layout, args, false).await
    }

    /// Cold-starts from the retained `last_good_layout`. Errors with
    /// `not-found`-style semantics are surfaced by the caller checking
    /// `last_good_layout()` before calling this.
    pub async fn cold_start(self: &Arc<Self>) -> Result<(), AppError> {
        let layout = self
            .last_good_layout()
            .await
            .ok_or_else(|| AppError::NotFound("no last_good_layout to cold-start from".into()))?;
        let args = self.compile(&layout)?;
        self.start_with_args(layout, args, false).await
    }

    /// Recycles the current child (invoked by the watchdog on size overrun).
    pub async fn recycle(self: &Arc<Self>) -> Result<(), AppError> {
        let layout = self
            .current_layout()
            .await
            .ok_or_else(|| AppError::Internal("recycle called with no current layout".into()))?;
        let args = self.compile(&layout)?;
        self.start_with_args(layout, args, true).await
    }

    async fn start_with_args(
        self: &Arc<Self>,
        layout: LayoutConfig,
        args: Vec<String>,
        is_recycle: bool,
    ) -> Result<(), AppError> {
        // Held across the whole transition, including the spawn itself, so
        // a second concurrent apply/recycle can't interleave its own spawn
        // and FanOut registration with this one.
        let _transition_guard = self.transition.lock().await;

        let previous_mode = self.mode();
        self.mode.store(mode_to_u8(Mode::Starting), Ordering::SeqCst);

        let (child, stdout, stderr) = match self.spawn_child(&args).await {
            Ok(spawned) => spawned,
            Err(e) => {
                // Spawn failed: there's nothing new to be "starting" into,
                // so fall back to whatever was true before this attempt
                // instead of leaving `mode` stuck at `Starting` forever.
                self.mode.store(mode_to_u8(previous_mode), Ordering::SeqCst);
                return Err(e);
            }
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (stop_tx, stop_rx) = oneshot::channel();
        let old_stop_tx = {
            let mut guard = self.state.lock().await;
            let old = guard.stop_tx.replace(stop_tx);
            guard.current_layout = Some(layout.clone());
            guard.last_good_layout = Some(layout);
            old
        };

        self.fanout.reset_byte_counter();
        self.mark_activity();
        self.mode.store(mode_to_u8(Mode::Live), Ordering::SeqCst);

        tokio::spawn(broadcast::run_reader(self.fanout.clone(), stdout));
        tokio::spawn(drain_stderr(stderr));
        tokio::spawn(supervise_child(self.clone(), generation, child, stop_rx, args));

        if is_recycle {
            log::info!("[Supervisor] recycled encoder (generation {generation})");
        }

        // Optimistic restart: the new child is already live before we ask
        // the old one to exit.
        if let Some(old_tx) = old_stop_tx {
            let (ack_tx, _ack_rx) = oneshot::channel();
            let _ = old_tx.send(ack_tx);
        }

        Ok(())
    }

    /// Gracefully stops the current child and waits for it to exit before
    /// returning. Sets `mode = idle`, clears `current_layout`, and retains
    /// `last_good_layout`.
    pub async fn stop(self: &Arc<Self>) -> Result<(), AppError> {
        let _transition_guard = self.transition.lock().await;

        let stop_tx = {
            let mut guard = self.state.lock().await;
            guard.current_layout = None;
            guard.stop_tx.take()
        };

        if let Some(tx) = stop_tx {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(ack_tx).is_ok() {
                let _ = ack_rx.await;
            }
        }

        self.mode.store(mode_to_u8(Mode::Idle), Ordering::SeqCst);
        Ok(())
    }

    /// Disconnects every viewer and marks the runtime idle, without touching
    /// `last_good_layout`. Used when an unexpected encoder failure is not
    /// recoverable by the single automatic restart attempt.
    async fn teardown_to_idle(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            // A later start/replace has already superseded this child.
            return;
        }
        {
            let mut guard = self.state.lock().await;
            guard.current_layout = None;
            guard.stop_tx = None;
        }
        self.mode.store(mode_to_u8(Mode::Idle), Ordering::SeqCst);
        self.fanout.disconnect_all();
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("[Encoder] {line}");
    }
}

async fn graceful_stop_child(mut child: Child) {
    send_sigterm(&child);
    let grace = Duration::from_secs(STOP_GRACE_PERIOD_SECS);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

/// Owns a running child end-to-end: waits for either a graceful-stop
/// request or an unexpected exit, and implements the single-automatic-
/// restart policy of §4.8 on the latter.
async fn supervise_child(
    supervisor: Arc<Supervisor>,
    generation: u64,
    child: Child,
    stop_rx: StopRequestReceiver,
    restart_args: Vec<String>,
) {
    supervise_child_inner(supervisor, generation, child, stop_rx, restart_args, false).await;
}

fn supervise_child_inner(
    supervisor: Arc<Supervisor>,
    generation: u64,
    mut child: Child,
    mut stop_rx: StopRequestReceiver,
    restart_args: Vec<String>,
    already_restarted: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::select! {
            ack = &mut stop_rx => {
                graceful_stop_child(child).await;
                if let Ok(ack_tx) = ack {
                    let _ = ack_tx.send(());
                }
            }
            status = child.wait() => {
                log::warn!("[Supervisor] encoder exited unexpectedly: {status:?}");
                if supervisor.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if already_restarted {
                    log::error!("[Supervisor] restart also failed; transitioning to idle");
                    supervisor.teardown_to_idle(generation).await;
                    return;
                }
                log::info!("[Supervisor] attempting one automatic restart");
                // Takes the same lock `start_with_args`/`stop` do: this
                // restart spawns a replacement and registers it with
                // `FanOut` outside of `start_with_args`, so it must be
                // serialized against a concurrent apply/stop the same way.
                let transition_guard = supervisor.transition.lock().await;
                match supervisor.spawn_child(&restart_args).await {
                    Ok((new_child, stdout, stderr)) => {
                        let (stop_tx, new_stop_rx) = oneshot::channel();
                        {
                            let mut guard = supervisor.state.lock().await;
                            guard.stop_tx = Some(stop_tx);
                        }
                        supervisor.fanout.reset_byte_counter();
                        tokio::spawn(broadcast::run_reader(supervisor.fanout.clone(), stdout));
                        tokio::spawn(drain_stderr(stderr));
                        drop(transition_guard);
                        supervise_child_inner(
                            supervisor,
                            generation,
                            new_child,
                            new_stop_rx,
                            restart_args,
                            true,
                        )
                        .await;
                    }
                    Err(e) => {
                        log::error!("[Supervisor] restart failed to spawn: {e}");
                        drop(transition_guard);
                        supervisor.teardown_to_idle(generation).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogSource};
    use crate::encoder::PROFILES;
    use crate::state::LayoutKind;
    use std::collections::BTreeMap;

    fn test_profile() -> &'static EncoderProfile {
        PROFILES.iter().find(|p| p.name == "software").unwrap()
    }

    fn make_supervisor() -> Arc<Supervisor> {
        let catalog = Arc::new(Catalog::new(
            CatalogSource::File("/nonexistent".into()),
            reqwest::Client::new(),
        ));
        Arc::new(Supervisor::new(
            FanOut::new(),
            catalog,
            test_profile(),
            "definitely-not-a-real-ffmpeg-binary".to_string(),
            500 * 1024 * 1024,
        ))
    }

    #[test]
    fn starts_idle() {
        let sup = make_supervisor();
        assert_eq!(sup.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn cold_start_without_last_good_layout_is_not_found() {
        let sup = make_supervisor();
        let err = sup.cold_start().await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn apply_layout_with_unknown_channel_is_not_found_and_leaves_mode_idle() {
        let sup = make_supervisor();
        let mut slot_to_channel = BTreeMap::new();
        slot_to_channel.insert("main".to_string(), "missing-channel".to_string());
        slot_to_channel.insert("inset".to_string(), "also-missing".to_string());
        let layout = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel,
            audio_slot: "main".to_string(),
            per_slot_volume: BTreeMap::new(),
            custom_slots: None,
        };
        let err = sup.apply_layout(layout).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(sup.mode(), Mode::Idle);
    }
}
