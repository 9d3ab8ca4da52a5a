//! Session registry
//!
//! Holds the one measurement session the service runs at a time, the stop
//! flag and the connected observers. Start is a create-if-absent under the
//! state mutex, so two concurrent start requests never both get a session.

use chrono::{DateTime, Local, SecondsFormat};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coordinator::{run_session, SessionDeps, SessionOutcome, SessionPlan};
use super::fanout::ObserverHub;
use super::messenger::StateMessenger;
use super::observer::{Observer, ObserverId};
use crate::config::defaults::{FALLBACK_TOOL_NAME, SESSION_NAME_TIME_FORMAT};
use crate::types::{MeasurementInstructions, MeasurementStatus, Metadata};

struct SessionTask {
    cancel: CancellationToken,
    handle: JoinHandle<SessionOutcome>,
}

/// Mutable session fields. `Default` is the idle shape.
#[derive(Default)]
struct SessionState {
    running: bool,
    name: Option<String>,
    start_time: Option<String>,
    tool_name: Option<String>,
    instructions: Option<MeasurementInstructions>,
    pre_meta: Option<Metadata>,
    post_meta: Option<Metadata>,
    task: Option<SessionTask>,
}

impl SessionState {
    fn status(&self) -> MeasurementStatus {
        MeasurementStatus {
            running: self.running,
            name: self.name.clone(),
            start_time: self.start_time.clone(),
            tool_name: self.tool_name.clone(),
            instructions: self.instructions.clone(),
        }
    }
}

/// Result of a start request. Starting while a session runs is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum StartResult {
    Started(MeasurementStatus),
    AlreadyRunning(MeasurementStatus),
}

impl StartResult {
    pub fn status(&self) -> &MeasurementStatus {
        match self {
            StartResult::Started(s) | StartResult::AlreadyRunning(s) => s,
        }
    }

    pub fn into_status(self) -> MeasurementStatus {
        match self {
            StartResult::Started(s) | StartResult::AlreadyRunning(s) => s,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            StartResult::Started(_) => "Measurement started successfully.",
            StartResult::AlreadyRunning(_) => "Measurement is already running.",
        }
    }
}

pub struct SessionRegistry {
    state: Mutex<SessionState>,
    stop_flag: AtomicBool,
    observers: ObserverHub,
    deps: SessionDeps,
    messenger: Arc<StateMessenger>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps, messenger: Arc<StateMessenger>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            stop_flag: AtomicBool::new(false),
            observers: ObserverHub::new(),
            deps,
            messenger,
        }
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    pub fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    pub fn messenger(&self) -> &StateMessenger {
        &self.messenger
    }

    pub async fn status(&self) -> MeasurementStatus {
        self.state.lock().await.status()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Start a session unless one is already running.
    ///
    /// The state lock is held only to claim the running slot and again to
    /// publish the session, not while the holder is asked for its name.
    /// Returns as soon as the session task is spawned.
    pub async fn start(self: &Arc<Self>, instructions: MeasurementInstructions) -> StartResult {
        {
            let mut state = self.state.lock().await;
            if state.running {
                debug!(session = ?state.name, "Start ignored, session already running");
                return StartResult::AlreadyRunning(state.status());
            }
            state.running = true;
            state.post_meta = None;
        }

        let started_at = Local::now();
        let name = session_name(instructions.name.as_deref(), &started_at);
        let tool_name = self.read_tool_name().await;

        let mut state = self.state.lock().await;
        self.stop_flag.store(false, Ordering::SeqCst);
        state.name = Some(name.clone());
        state.start_time = Some(started_at.to_rfc3339_opts(SecondsFormat::Millis, false));
        state.tool_name = Some(tool_name.clone());
        state.pre_meta = instructions.meta.clone();
        state.instructions = Some(instructions.clone());

        let cancel = CancellationToken::new();
        let plan = SessionPlan {
            name: name.clone(),
            instructions,
        };
        let handle = tokio::spawn(run_session(Arc::clone(self), plan, cancel.clone()));
        state.task = Some(SessionTask { cancel, handle });

        let status = state.status();
        drop(state);

        info!(
            session = %name,
            tool = %tool_name,
            time_limit = ?status.instructions.as_ref().and_then(MeasurementInstructions::time_limit),
            "▶️  Measurement session started"
        );
        self.messenger.push_update(status.clone()).await;
        StartResult::Started(status)
    }

    async fn read_tool_name(&self) -> String {
        let holder = &self.deps.holder;
        match tokio::time::timeout(self.deps.settings.stream_timeout, holder.node_name()).await {
            Ok(Ok(name)) => {
                debug!(tool = %name, "Tool found");
                name
            }
            Ok(Err(e)) => {
                error!("Tool not found: {}", e);
                FALLBACK_TOOL_NAME.to_string()
            }
            Err(_) => {
                error!("Tool not found: node name request timed out");
                FALLBACK_TOOL_NAME.to_string()
            }
        }
    }

    /// Ask the running session to stop. Never blocks.
    pub fn request_stop(&self) {
        info!("Received stop request");
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub async fn set_post_meta(&self, meta: Metadata) {
        let status = {
            let mut state = self.state.lock().await;
            state.post_meta = Some(meta);
            state.status()
        };
        info!("Received and set post metadata");
        self.messenger.push_update(status).await;
    }

    pub async fn take_post_meta(&self) -> Option<Metadata> {
        self.state.lock().await.post_meta.take()
    }

    pub async fn pre_meta(&self) -> Option<Metadata> {
        self.state.lock().await.pre_meta.clone()
    }

    pub async fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = self.observers.add(observer).await;
        info!(
            "Client connected to measurement stream - now {} clients",
            self.observers.len().await
        );
        id
    }

    /// Idempotent: removing a handle that is already gone only logs.
    pub async fn remove_observer(&self, id: ObserverId) {
        if self.observers.remove(id).await {
            info!(
                "Client disconnected from measurement stream - now {} clients",
                self.observers.len().await
            );
        } else {
            debug!(
                "Client was already disconnected - still {} clients",
                self.observers.len().await
            );
        }
    }

    /// Return to the idle shape: clear every field and the observer set.
    pub async fn reset(&self) {
        let cleared = self.observers.clear().await;
        let status = {
            let mut state = self.state.lock().await;
            *state = SessionState::default();
            state.status()
        };
        self.stop_flag.store(false, Ordering::SeqCst);
        info!(observers = cleared, "Session state reset, cleared {} observers", cleared);
        self.messenger.push_update(status).await;
    }

    /// Cancel the running session, if any, and wait for its teardown.
    pub async fn cancel_active(&self) -> Option<SessionOutcome> {
        let task = self.state.lock().await.task.take()?;
        info!("Cancelling active measurement session");
        task.cancel.cancel();
        match task.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Session task ended abnormally: {}", e);
                None
            }
        }
    }
}

/// `<sanitized name>__<timestamp>`, or just the timestamp without a usable name.
pub fn session_name(requested: Option<&str>, at: &DateTime<Local>) -> String {
    let stamp = at.format(SESSION_NAME_TIME_FORMAT).to_string();
    match requested.map(sanitize_name).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}__{stamp}"),
        None => stamp,
    }
}

fn sanitize_name(name: &str) -> String {
    let replaced = name
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('Ä', "Ae")
        .replace('Ö', "Oe")
        .replace('Ü', "Ue");
    let stripped = strip_invalid_filename_chars(&replaced);
    stripped.trim().trim_end_matches('.').trim_end().to_string()
}

fn strip_invalid_filename_chars(name: &str) -> String {
    static INVALID: OnceLock<Option<Regex>> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1F\x7F]"#).ok());
    match re {
        Some(re) => re.replace_all(name, "").into_owned(),
        None => name
            .chars()
            .filter(|c| !c.is_control() && !r#"\/:*?"<>|"#.contains(*c))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_session_name_with_umlauts() {
        assert_eq!(
            session_name(Some("Fräse Über"), &at()),
            "Fraese Ueber__2024-03-05_14-07-09"
        );
    }

    #[test]
    fn test_session_name_strips_invalid_chars() {
        assert_eq!(
            session_name(Some("a/b:c*d?\"e<f>g|h. "), &at()),
            "abcdefgh__2024-03-05_14-07-09"
        );
    }

    #[test]
    fn test_session_name_without_usable_name() {
        assert_eq!(session_name(None, &at()), "2024-03-05_14-07-09");
        assert_eq!(session_name(Some("///"), &at()), "2024-03-05_14-07-09");
    }

    #[test]
    fn test_start_result_messages() {
        let s = MeasurementStatus::default();
        assert_eq!(
            StartResult::Started(s.clone()).message(),
            "Measurement started successfully."
        );
        assert_eq!(
            StartResult::AlreadyRunning(s).message(),
            "Measurement is already running."
        );
    }
}
