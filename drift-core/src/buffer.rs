//! Per-context debounce accumulator.
//!
//! A [`FolderBuffer`] collects the ids of every folder touched in one context
//! until the readiness policy says the burst is over (or has gone on long
//! enough), at which point the sweeper seals it and turns its contents into a
//! single [`drift_model::DriveEvent`].
//!
//! Readiness, with `since_first`/`since_last` measured from the first and the
//! most recent change:
//!
//! ```text
//! ready := any change seen
//!          AND ( since_first > max_delay_time
//!                OR (since_first > default_delay_time AND since_last > consolidation_time) )
//! ```

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use drift_model::{ContextId, FolderId, PushToken, Session};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::ConsolidationConfig;
use crate::error::{DriftError, Result};
use crate::resolver::PathResolver;

/// The three timing thresholds of the readiness policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferThresholds {
    pub consolidation_time: Duration,
    pub max_delay_time: Duration,
    pub default_delay_time: Duration,
}

impl Default for BufferThresholds {
    fn default() -> Self {
        Self::from(&ConsolidationConfig::default())
    }
}

impl From<&ConsolidationConfig> for BufferThresholds {
    fn from(config: &ConsolidationConfig) -> Self {
        Self {
            consolidation_time: config.consolidation_time(),
            max_delay_time: config.max_delay_time(),
            default_delay_time: config.default_delay_time(),
        }
    }
}

impl BufferThresholds {
    pub fn is_ready(&self, since_first: Duration, since_last: Duration) -> bool {
        since_first > self.max_delay_time
            || (since_first > self.default_delay_time && since_last > self.consolidation_time)
    }
}

/// Collaborators and settings shared by every buffer of a registry.
pub struct BufferDeps {
    thresholds: BufferThresholds,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn PathResolver>,
    resolve_timeout: Duration,
}

impl fmt::Debug for BufferDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDeps")
            .field("thresholds", &self.thresholds)
            .field("clock", &self.clock)
            .field("resolve_timeout", &self.resolve_timeout)
            .finish()
    }
}

impl BufferDeps {
    pub fn new(
        thresholds: BufferThresholds,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        Self {
            thresholds,
            clock,
            resolver,
            resolve_timeout: ConsolidationConfig::default().path_resolve_timeout(),
        }
    }

    pub fn from_config(
        config: &ConsolidationConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        Self::new(BufferThresholds::from(config), clock, resolver)
            .with_resolve_timeout(config.path_resolve_timeout())
    }

    pub fn with_resolve_timeout(mut self, resolve_timeout: Duration) -> Self {
        self.resolve_timeout = resolve_timeout;
        self
    }

    pub fn thresholds(&self) -> BufferThresholds {
        self.thresholds
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Result of [`FolderBuffer::add`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The change is part of this buffer.
    Accepted,
    /// The sweeper sealed the buffer first; the change must go to a fresh
    /// buffer for the same context.
    Sealed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PushTokenState {
    Unset,
    Token(PushToken),
    /// Contributions came from more than one client, or from one without a
    /// token. Never leaves this state.
    Undefined,
}

impl PushTokenState {
    fn reconcile(&mut self, token: Option<&PushToken>) {
        let next = match (token, &*self) {
            (None, _) => PushTokenState::Undefined,
            (Some(token), PushTokenState::Unset) => PushTokenState::Token(token.clone()),
            (Some(token), PushTokenState::Token(current)) if current == token => return,
            (Some(_), _) => PushTokenState::Undefined,
        };
        *self = next;
    }

    fn token(&self) -> Option<&PushToken> {
        match self {
            PushTokenState::Token(token) => Some(token),
            PushTokenState::Unset | PushTokenState::Undefined => None,
        }
    }
}

#[derive(Debug)]
struct BufferState {
    folder_ids: HashSet<FolderId>,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
    push_token: PushTokenState,
    sealed: bool,
}

impl BufferState {
    fn new() -> Self {
        Self {
            folder_ids: HashSet::new(),
            first_event: None,
            last_event: None,
            push_token: PushTokenState::Unset,
            sealed: false,
        }
    }

    fn is_ready(&self, thresholds: &BufferThresholds, now: Instant) -> bool {
        let (Some(first), Some(last)) = (self.first_event, self.last_event) else {
            return false;
        };
        thresholds.is_ready(
            now.saturating_duration_since(first),
            now.saturating_duration_since(last),
        )
    }
}

/// What the sweeper takes out of a buffer it sealed.
#[derive(Debug)]
pub(crate) struct SealedContents {
    pub(crate) folder_ids: HashSet<FolderId>,
    pub(crate) push_token: Option<PushToken>,
}

#[derive(Debug)]
pub(crate) enum SealAttempt {
    /// An add holds the lock; the buffer is looked at again next sweep.
    Busy,
    NotReady,
    Sealed(SealedContents),
}

/// Debounce accumulator for one context. All fields live behind a single
/// private lock, so adds to the same buffer are totally ordered.
pub struct FolderBuffer {
    context_id: ContextId,
    deps: Arc<BufferDeps>,
    state: Mutex<BufferState>,
}

impl fmt::Debug for FolderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("FolderBuffer");
        debug.field("context_id", &self.context_id);
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("folder_count", &state.folder_ids.len())
                    .field("has_push_token", &state.push_token.token().is_some())
                    .field("sealed", &state.sealed);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl FolderBuffer {
    pub fn new(context_id: ContextId, deps: Arc<BufferDeps>) -> Self {
        Self {
            context_id,
            deps,
            state: Mutex::new(BufferState::new()),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Record a change to `folder_id` made in `session`.
    ///
    /// When the folder is new to this buffer its ancestors are added too:
    /// `path` when the notification carried one, otherwise whatever the path
    /// resolver returns within the resolve timeout. Resolution failures are
    /// logged and never fail the add.
    ///
    /// The lookup runs without the buffer lock held, so a slow resolver never
    /// keeps the sweeper from sealing this buffer. The change is timestamped
    /// when `add` is called, not when the lookup finishes.
    ///
    /// Returns [`DriftError::InvalidArgument`] without touching the buffer
    /// when the session belongs to another context.
    pub async fn add(
        &self,
        session: &Session,
        folder_id: FolderId,
        path: Option<Vec<FolderId>>,
    ) -> Result<AddOutcome> {
        if session.context_id != self.context_id {
            return Err(DriftError::InvalidArgument(format!(
                "session context {} does not match buffer context {}",
                session.context_id, self.context_id
            )));
        }

        let arrived = self.deps.clock.now();
        let ancestors = match path {
            Some(path) => Some(path),
            None => {
                let known = {
                    let state = self.state.lock().await;
                    if state.sealed {
                        return Ok(AddOutcome::Sealed);
                    }
                    state.folder_ids.contains(&folder_id)
                };
                if known {
                    None
                } else {
                    Some(self.resolve_ancestors(&folder_id, session).await)
                }
            }
        };

        let mut state = self.state.lock().await;
        if state.sealed {
            return Ok(AddOutcome::Sealed);
        }

        state.first_event.get_or_insert(arrived);
        state.last_event = Some(state.last_event.map_or(arrived, |last| last.max(arrived)));

        // A concurrent add of the same folder may have won; its chain is
        // already in the set.
        if state.folder_ids.insert(folder_id)
            && let Some(ancestors) = ancestors
        {
            state.folder_ids.extend(ancestors);
        }

        state.push_token.reconcile(session.push_token());
        Ok(AddOutcome::Accepted)
    }

    async fn resolve_ancestors(&self, folder_id: &FolderId, session: &Session) -> Vec<FolderId> {
        let lookup = self.deps.resolver.resolve_ancestor_chain(folder_id, session);
        match timeout(self.deps.resolve_timeout, lookup).await {
            Ok(Ok(chain)) => chain,
            Ok(Err(err)) => {
                warn!(
                    target: "drift::buffer",
                    context_id = %self.context_id,
                    folder_id = %folder_id,
                    error = %err,
                    "ancestor lookup failed; buffering folder without ancestors"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    target: "drift::buffer",
                    context_id = %self.context_id,
                    folder_id = %folder_id,
                    timeout_ms = self.deps.resolve_timeout.as_millis() as u64,
                    "ancestor lookup timed out; buffering folder without ancestors"
                );
                Vec::new()
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.is_ready(&self.deps.thresholds, self.deps.clock.now())
    }

    /// The single client all changes came from, if there is one.
    pub async fn push_token(&self) -> Option<PushToken> {
        self.state.lock().await.push_token.token().cloned()
    }

    pub async fn folder_ids(&self) -> HashSet<FolderId> {
        self.state.lock().await.folder_ids.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.folder_ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.folder_ids.is_empty()
    }

    pub async fn is_sealed(&self) -> bool {
        self.state.lock().await.sealed
    }

    /// Seal the buffer and hand out its contents if it is ready.
    ///
    /// Never waits: a buffer whose lock is held by an add in progress is
    /// reported busy, so one stalled context cannot hold up a sweep.
    ///
    /// `detach` runs while the buffer lock is held, so no add can slip in
    /// between the readiness check, the registry removal and the seal; adds
    /// waiting on the lock observe [`AddOutcome::Sealed`] afterwards.
    pub(crate) fn seal_if_ready(&self, detach: impl FnOnce() -> bool) -> SealAttempt {
        let Ok(mut state) = self.state.try_lock() else {
            return SealAttempt::Busy;
        };
        if state.sealed || !state.is_ready(&self.deps.thresholds, self.deps.clock.now()) {
            return SealAttempt::NotReady;
        }

        if !detach() {
            debug!(
                target: "drift::buffer",
                context_id = %self.context_id,
                "sealing buffer that was no longer registered"
            );
        }

        state.sealed = true;
        SealAttempt::Sealed(SealedContents {
            folder_ids: mem::take(&mut state.folder_ids),
            push_token: state.push_token.token().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use drift_model::UserId;

    use super::*;
    use crate::resolver::NoopPathResolver;
    use crate::testing::{CountingPathResolver, FailingPathResolver, ManualClock, SlowPathResolver};

    fn folder(id: &str) -> FolderId {
        FolderId::try_new(id).unwrap()
    }

    fn thresholds() -> BufferThresholds {
        BufferThresholds {
            consolidation_time: Duration::from_millis(1_000),
            max_delay_time: Duration::from_millis(10_000),
            default_delay_time: Duration::from_millis(2_500),
        }
    }

    fn session(token: Option<&str>) -> Session {
        let session = Session::new(ContextId(1), UserId(7));
        match token {
            Some(token) => session.with_push_token(token),
            None => session,
        }
    }

    fn buffer_with(clock: Arc<ManualClock>, resolver: Arc<dyn PathResolver>) -> FolderBuffer {
        let deps = BufferDeps::new(thresholds(), clock, resolver);
        FolderBuffer::new(ContextId(1), Arc::new(deps))
    }

    fn buffer(clock: Arc<ManualClock>) -> FolderBuffer {
        buffer_with(clock, Arc::new(NoopPathResolver))
    }

    #[tokio::test]
    async fn empty_buffer_is_never_ready() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));
        clock.advance(Duration::from_secs(60));
        assert!(!buffer.is_ready().await);
    }

    #[tokio::test]
    async fn quiet_period_after_default_delay_makes_ready() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));

        assert_eq!(buffer.add(&session(None), folder("10"), None).await.unwrap(), AddOutcome::Accepted);
        assert!(!buffer.is_ready().await);

        clock.set_elapsed(Duration::from_millis(2_500));
        assert!(!buffer.is_ready().await, "default delay is exclusive");

        clock.set_elapsed(Duration::from_millis(3_600));
        assert!(buffer.is_ready().await);
    }

    #[tokio::test]
    async fn recent_activity_holds_buffer_until_quiet() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));

        let _ = buffer.add(&session(None), folder("10"), None).await.unwrap();
        clock.set_elapsed(Duration::from_millis(3_000));
        let _ = buffer.add(&session(None), folder("11"), None).await.unwrap();

        clock.set_elapsed(Duration::from_millis(3_900));
        assert!(!buffer.is_ready().await);
        clock.set_elapsed(Duration::from_millis(4_001));
        assert!(buffer.is_ready().await);
    }

    #[tokio::test]
    async fn max_delay_caps_a_continuous_burst() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));

        let mut first_ready = None;
        for step in 0..=40u64 {
            let elapsed = Duration::from_millis(step * 500);
            clock.set_elapsed(elapsed);
            let _ = buffer
                .add(&session(None), folder(&format!("f{step}")), None)
                .await
                .unwrap();
            if buffer.is_ready().await && first_ready.is_none() {
                first_ready = Some(elapsed);
            }
        }

        assert_eq!(first_ready, Some(Duration::from_millis(10_500)));
    }

    #[tokio::test]
    async fn known_folders_skip_path_resolution() {
        let clock = Arc::new(ManualClock::new());
        let resolver = Arc::new(CountingPathResolver::new(vec![folder("parent"), folder("root")]));
        let buffer = buffer_with(clock, resolver.clone());

        let _ = buffer.add(&session(None), folder("leaf"), None).await.unwrap();
        let _ = buffer.add(&session(None), folder("leaf"), None).await.unwrap();
        // Ancestors count as known folders too.
        let _ = buffer.add(&session(None), folder("parent"), None).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            buffer.folder_ids().await,
            HashSet::from([folder("leaf"), folder("parent"), folder("root")])
        );
    }

    #[tokio::test]
    async fn supplied_path_replaces_lookup() {
        let clock = Arc::new(ManualClock::new());
        let resolver = Arc::new(CountingPathResolver::new(vec![folder("unused")]));
        let buffer = buffer_with(clock, resolver.clone());

        let _ = buffer
            .add(&session(None), folder("leaf"), Some(vec![folder("leaf"), folder("up")]))
            .await
            .unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.folder_ids().await, HashSet::from([folder("leaf"), folder("up")]));
    }

    #[tokio::test]
    async fn failed_lookup_still_buffers_folder() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer_with(clock, Arc::new(FailingPathResolver));

        let outcome = buffer.add(&session(None), folder("leaf"), None).await.unwrap();
        assert_eq!(outcome, AddOutcome::Accepted);
        assert_eq!(buffer.folder_ids().await, HashSet::from([folder("leaf")]));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_is_bounded_by_timeout() {
        let clock = Arc::new(ManualClock::new());
        let deps = BufferDeps::new(
            thresholds(),
            clock,
            Arc::new(SlowPathResolver::new(Duration::from_secs(30), vec![folder("late")])),
        )
        .with_resolve_timeout(Duration::from_millis(50));
        let buffer = FolderBuffer::new(ContextId(1), Arc::new(deps));

        let _ = buffer.add(&session(None), folder("leaf"), None).await.unwrap();
        assert_eq!(buffer.folder_ids().await, HashSet::from([folder("leaf")]));
    }

    #[tokio::test]
    async fn push_token_agreement_is_kept() {
        let buffer = buffer(Arc::new(ManualClock::new()));
        let _ = buffer.add(&session(Some("A")), folder("1"), None).await.unwrap();
        let _ = buffer.add(&session(Some("A")), folder("2"), None).await.unwrap();
        assert_eq!(buffer.push_token().await, Some(PushToken::new("A")));
    }

    #[tokio::test]
    async fn conflicting_push_tokens_become_undefined() {
        let buffer = buffer(Arc::new(ManualClock::new()));
        let _ = buffer.add(&session(Some("A")), folder("1"), None).await.unwrap();
        let _ = buffer.add(&session(Some("B")), folder("2"), None).await.unwrap();
        assert_eq!(buffer.push_token().await, None);

        // Sticky: agreeing again does not restore a token.
        let _ = buffer.add(&session(Some("A")), folder("3"), None).await.unwrap();
        assert_eq!(buffer.push_token().await, None);
    }

    #[tokio::test]
    async fn tokenless_contribution_forces_undefined() {
        let buffer = buffer(Arc::new(ManualClock::new()));
        let _ = buffer.add(&session(Some("A")), folder("1"), None).await.unwrap();
        let _ = buffer.add(&session(None), folder("2"), None).await.unwrap();
        assert_eq!(buffer.push_token().await, None);

        let buffer = FolderBuffer::new(
            ContextId(1),
            Arc::new(BufferDeps::new(thresholds(), Arc::new(ManualClock::new()), Arc::new(NoopPathResolver))),
        );
        let _ = buffer.add(&session(None), folder("1"), None).await.unwrap();
        let _ = buffer.add(&session(Some("A")), folder("2"), None).await.unwrap();
        assert_eq!(buffer.push_token().await, None);
    }

    #[tokio::test]
    async fn foreign_context_is_rejected_without_mutation() {
        let buffer = buffer(Arc::new(ManualClock::new()));
        let foreign = Session::new(ContextId(2), UserId(1));

        let err = buffer.add(&foreign, folder("1"), None).await.unwrap_err();
        assert!(matches!(err, DriftError::InvalidArgument(_)));
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn sealed_buffer_refuses_adds() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));
        let _ = buffer.add(&session(Some("A")), folder("1"), None).await.unwrap();

        assert!(matches!(buffer.seal_if_ready(|| true), SealAttempt::NotReady));

        clock.set_elapsed(Duration::from_millis(11_000));
        let SealAttempt::Sealed(sealed) = buffer.seal_if_ready(|| true) else {
            panic!("ready buffer must seal");
        };
        assert_eq!(sealed.folder_ids, HashSet::from([folder("1")]));
        assert_eq!(sealed.push_token, Some(PushToken::new("A")));

        let outcome = buffer.add(&session(None), folder("2"), None).await.unwrap();
        assert_eq!(outcome, AddOutcome::Sealed);
        assert!(
            matches!(buffer.seal_if_ready(|| true), SealAttempt::NotReady),
            "seals only once"
        );
    }

    #[tokio::test]
    async fn locked_buffer_is_reported_busy() {
        let clock = Arc::new(ManualClock::new());
        let buffer = buffer(Arc::clone(&clock));
        let _ = buffer.add(&session(None), folder("1"), None).await.unwrap();
        clock.set_elapsed(Duration::from_millis(11_000));

        let guard = buffer.state.lock().await;
        let mut detached = false;
        assert!(matches!(
            buffer.seal_if_ready(|| {
                detached = true;
                true
            }),
            SealAttempt::Busy
        ));
        assert!(!detached);
        drop(guard);

        assert!(matches!(buffer.seal_if_ready(|| true), SealAttempt::Sealed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_in_flight_leaves_buffer_sealable() {
        let clock = Arc::new(ManualClock::new());
        let resolver = SlowPathResolver::new(Duration::from_secs(1), vec![folder("root")]);
        let buffer = Arc::new(buffer_with(Arc::clone(&clock), Arc::new(resolver)));
        let _ = buffer.add(&session(None), folder("a"), Some(Vec::new())).await.unwrap();
        clock.set_elapsed(Duration::from_millis(11_000));

        let late = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.add(&session(None), folder("b"), None).await.unwrap() }
        });
        // Let the spawned add reach its lookup.
        tokio::task::yield_now().await;

        let SealAttempt::Sealed(sealed) = buffer.seal_if_ready(|| true) else {
            panic!("a pending lookup must not block sealing");
        };
        assert_eq!(sealed.folder_ids, HashSet::from([folder("a")]));
        assert_eq!(late.await.unwrap(), AddOutcome::Sealed);
    }

    #[tokio::test(start_paused = true)]
    async fn change_is_timestamped_before_lookup() {
        let clock = Arc::new(ManualClock::new());
        let resolver = SlowPathResolver::new(Duration::from_millis(1_500), vec![folder("root")]);
        let buffer = buffer_with(Arc::clone(&clock), Arc::new(resolver));

        let sess = session(None);
        let add = buffer.add(&sess, folder("a"), None);
        let advance = async {
            tokio::task::yield_now().await;
            clock.advance(Duration::from_millis(9_000));
        };
        let (outcome, ()) = tokio::join!(add, advance);
        assert_eq!(outcome.unwrap(), AddOutcome::Accepted);
        assert_eq!(buffer.folder_ids().await, HashSet::from([folder("a"), folder("root")]));

        // Held since t=0, so 10s after the call, not after the lookup.
        clock.advance(Duration::from_millis(1_100));
        assert!(buffer.is_ready().await);
    }
}
