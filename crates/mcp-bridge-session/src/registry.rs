//! Identity-keyed session cache.
//!
//! Each identity owns a slot guarded by an async mutex, so calls for one
//! identity are serialized while unrelated identities proceed in parallel.
//! The map lock is only ever held for synchronous bookkeeping.

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use mcp_bridge_core::{BridgeError, Identity, TargetSpec, TransportError, TransportFactory};
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::session::{Session, SessionConfig, SessionError};

type Slot = AsyncMutex<Option<Session>>;

impl From<SessionError> for BridgeError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Handshake(msg) => Self::Handshake(msg),
            SessionError::Transport(e) => Self::Transport(e),
            SessionError::Remote(e) => Self::Remote(e),
            SessionError::Timeout(limit) => Self::Timeout(limit),
        }
    }
}

/// Create a transport for `spec` and handshake a session over it.
///
/// # Errors
/// Returns `Connect` if the transport cannot be created within the connect
/// timeout, `Handshake` if initialization fails.
pub async fn open_session(
    factory: &dyn TransportFactory,
    spec: &TargetSpec,
    config: &SessionConfig,
) -> Result<Session, BridgeError> {
    let transport = tokio::time::timeout(config.connect_timeout, factory.create(spec))
        .await
        .map_err(|_| {
            BridgeError::Connect(TransportError::Connect(format!(
                "timed out after {:?}",
                config.connect_timeout
            )))
        })?
        .map_err(BridgeError::Connect)?;

    Ok(Session::open(spec.identity(), transport, config).await?)
}

async fn close_quietly(session: &mut Session) {
    if let Err(e) = session.close().await {
        tracing::warn!(session_id = %session.id(), identity = %session.identity(), "Failed to close session: {e}");
    }
}

/// Exclusive access to a cached session.
///
/// Other calls for the same identity wait until the handle is dropped.
pub struct SessionHandle {
    identity: Identity,
    slot: Arc<Slot>,
    guard: OwnedMappedMutexGuard<Option<Session>, Session>,
}

impl SessionHandle {
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionHandle {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

/// Session cache with a time-to-live on idle entries.
pub struct SessionRegistry {
    factory: Arc<dyn TransportFactory>,
    config: SessionConfig,
    ttl: Duration,
    slots: Mutex<HashMap<Identity, Arc<Slot>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>, config: SessionConfig, ttl: Duration) -> Self {
        Self {
            factory,
            config,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of cached identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_slots().is_empty()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<Identity, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, identity: Identity) -> Arc<Slot> {
        Arc::clone(
            self.lock_slots()
                .entry(identity)
                .or_insert_with(|| Arc::new(AsyncMutex::new(None))),
        )
    }

    fn is_current(&self, identity: Identity, slot: &Arc<Slot>) -> bool {
        self.lock_slots()
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_if_current(&self, identity: Identity, slot: &Arc<Slot>) {
        let mut slots = self.lock_slots();
        if slots
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&identity);
        }
    }

    /// Return the live session for `spec`, creating one if needed.
    ///
    /// A cached session is probed first; if the probe fails it is closed and
    /// replaced. At most one session per identity exists at any time.
    ///
    /// # Errors
    /// Returns `Connect` or `Handshake` if a new session cannot be opened.
    /// The identity is left uncached in that case.
    pub async fn resolve(&self, spec: &TargetSpec) -> Result<SessionHandle, BridgeError> {
        let identity = spec.identity();

        loop {
            let slot = self.slot(identity);
            let mut guard = Arc::clone(&slot).lock_owned().await;
            // Evicted while we waited; start over with a fresh slot.
            if !self.is_current(identity, &slot) {
                continue;
            }

            let probe = match &mut *guard {
                Some(session) => Some(self.probe(session).await),
                None => None,
            };

            match probe {
                Some(Ok(())) => {
                    if let Some(session) = &mut *guard {
                        session.touch();
                        tracing::debug!(session_id = %session.id(), %identity, "Reusing cached session");
                    }
                }
                Some(Err(reason)) => {
                    tracing::info!(%identity, "Cached session failed liveness probe, replacing: {reason}");
                    if let Some(mut stale) = guard.take() {
                        close_quietly(&mut stale).await;
                    }
                }
                None => {}
            }

            if guard.is_none() {
                match open_session(self.factory.as_ref(), spec, &self.config).await {
                    Ok(session) => {
                        tracing::info!(session_id = %session.id(), %identity, transport = %session.kind(), "Session created");
                        *guard = Some(session);
                    }
                    Err(e) => {
                        self.remove_if_current(identity, &slot);
                        return Err(e);
                    }
                }
            }

            return into_handle(identity, slot, guard);
        }
    }

    async fn probe(&self, session: &mut Session) -> Result<(), String> {
        match tokio::time::timeout(self.config.connect_timeout, session.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no answer within {:?}", self.config.connect_timeout)),
        }
    }

    /// Open a session that bypasses the cache. The caller must close it.
    ///
    /// # Errors
    /// Same as [`open_session`].
    pub async fn open_detached(&self, spec: &TargetSpec) -> Result<Session, BridgeError> {
        open_session(self.factory.as_ref(), spec, &self.config).await
    }

    /// Close the session behind `handle` and forget its identity.
    pub async fn invalidate(&self, mut handle: SessionHandle) {
        tracing::info!(session_id = %handle.id(), identity = %handle.identity, "Invalidating session");
        close_quietly(&mut handle).await;
        self.remove_if_current(handle.identity, &handle.slot);
    }

    /// Evict every session idle for longer than the TTL.
    ///
    /// Sessions currently in use are skipped. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let snapshot: Vec<(Identity, Arc<Slot>)> = self
            .lock_slots()
            .iter()
            .map(|(identity, slot)| (*identity, Arc::clone(slot)))
            .collect();

        let mut evicted = 0;
        for (identity, slot) in snapshot {
            let Ok(mut guard) = Arc::clone(&slot).try_lock_owned() else {
                continue;
            };
            let expired = (*guard)
                .as_ref()
                .is_none_or(|session| session.idle_for() > self.ttl);
            if !expired {
                continue;
            }

            if let Some(mut session) = guard.take() {
                tracing::debug!(session_id = %session.id(), %identity, idle = ?session.idle_for(), "Evicting idle session");
                close_quietly(&mut session).await;
                evicted += 1;
            }
            self.remove_if_current(identity, &slot);
        }
        evicted
    }

    /// Close every cached session, waiting for in-flight calls to finish.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<Arc<Slot>> = self.lock_slots().drain().map(|(_, slot)| slot).collect();

        let mut closed = 0;
        for slot in slots {
            if let Some(mut session) = slot.lock().await.take() {
                close_quietly(&mut session).await;
                closed += 1;
            }
        }
        closed
    }

    /// Run [`SessionRegistry::sweep`] every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let evicted = self.sweep().await;
                if evicted > 0 {
                    tracing::info!(evicted, remaining = self.len(), "Swept idle sessions");
                } else {
                    tracing::debug!(remaining = self.len(), "Sweep found no idle sessions");
                }
            }
        })
    }
}

fn into_handle(
    identity: Identity,
    slot: Arc<Slot>,
    guard: OwnedMutexGuard<Option<Session>>,
) -> Result<SessionHandle, BridgeError> {
    let guard = OwnedMutexGuard::try_map(guard, Option::as_mut)
        .map_err(|_| BridgeError::Internal("session slot is empty".to_string()))?;
    Ok(SessionHandle {
        identity,
        slot,
        guard,
    })
}
