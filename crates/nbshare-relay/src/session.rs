//! Session store: maps relay session names to one host and its guests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Side of a relay session a client connected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

struct HostSlot {
    tx: mpsc::Sender<String>,
    /// Cancelled when another host takes the session over.
    superseded: CancellationToken,
}

/// One host (absent between reconnects) and any number of numbered guests.
pub struct Session {
    host: Option<HostSlot>,
    guests: HashMap<u64, mpsc::Sender<String>>,
    next_guest: u64,
    created_at: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            host: None,
            guests: HashMap::new(),
            next_guest: 1,
            created_at: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.host.is_none() && self.guests.is_empty()
    }

    fn guest_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.guests.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tx` the host of `session`, creating it if needed. A previous
    /// host is told to stop through its token. Returns the guests already
    /// waiting, lowest number first.
    pub async fn attach_host(
        &self,
        session: &str,
        tx: mpsc::Sender<String>,
        superseded: CancellationToken,
    ) -> Vec<u64> {
        let mut map = self.sessions.write().await;
        let entry = map.entry(session.to_string()).or_insert_with(Session::new);
        if let Some(previous) = entry.host.replace(HostSlot { tx, superseded }) {
            tracing::info!(session = %session, "Host taken over by a new connection");
            previous.superseded.cancel();
        }
        entry.guest_ids()
    }

    /// Add a guest to a session some host opened. Returns the guest's number
    /// and the current host's sender, if a host is connected.
    pub async fn join_guest(
        &self,
        session: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<(u64, Option<mpsc::Sender<String>>), &'static str> {
        let mut map = self.sessions.write().await;
        let entry = map
            .get_mut(session)
            .ok_or(nbshare_live::relay::SESSION_NOT_FOUND)?;
        let guest = entry.next_guest;
        entry.next_guest += 1;
        entry.guests.insert(guest, tx);
        Ok((guest, entry.host.as_ref().map(|host| host.tx.clone())))
    }

    pub async fn host_tx(&self, session: &str) -> Option<mpsc::Sender<String>> {
        let map = self.sessions.read().await;
        map.get(session)?.host.as_ref().map(|host| host.tx.clone())
    }

    pub async fn guest_tx(&self, session: &str, guest: u64) -> Option<mpsc::Sender<String>> {
        let map = self.sessions.read().await;
        map.get(session)?.guests.get(&guest).cloned()
    }

    pub async fn guest_txs(&self, session: &str) -> Vec<mpsc::Sender<String>> {
        let map = self.sessions.read().await;
        map.get(session)
            .map(|entry| entry.guests.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the host if it is still `tx`. Returns the guests to tell, or
    /// `None` when `tx` had already been replaced.
    pub async fn detach_host(
        &self,
        session: &str,
        tx: &mpsc::Sender<String>,
    ) -> Option<Vec<mpsc::Sender<String>>> {
        let mut map = self.sessions.write().await;
        let entry = map.get_mut(session)?;
        if !entry.host.as_ref().is_some_and(|host| host.tx.same_channel(tx)) {
            return None;
        }
        entry.host = None;
        let guests = entry.guests.values().cloned().collect();
        if entry.is_empty() {
            map.remove(session);
        }
        Some(guests)
    }

    /// Remove a guest. Returns the host's sender so it can be told.
    pub async fn leave_guest(&self, session: &str, guest: u64) -> Option<mpsc::Sender<String>> {
        let mut map = self.sessions.write().await;
        let entry = map.get_mut(session)?;
        entry.guests.remove(&guest);
        let host = entry.host.as_ref().map(|host| host.tx.clone());
        if entry.is_empty() {
            map.remove(session);
        }
        host
    }

    /// Reap sessions older than `max_age` that have no guests. A host still
    /// attached to one is told to stop.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let mut map = self.sessions.write().await;
        let now = Instant::now();
        let before = map.len();
        map.retain(|name, session| {
            let stale = session.guests.is_empty() && now.duration_since(session.created_at) > max_age;
            if stale {
                tracing::info!(session = %name, "Reaping stale session");
                if let Some(host) = &session.host {
                    host.superseded.cancel();
                }
            }
            !stale
        });
        before - map.len()
    }

    pub async fn exists(&self, session: &str) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(4)
    }

    #[tokio::test]
    async fn guest_needs_a_host_session() {
        let store = SessionStore::new();
        let (tx, _rx) = sender();
        let err = store.join_guest("s/nb", tx).await.unwrap_err();
        assert_eq!(err, nbshare_live::relay::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn guests_are_numbered_and_see_the_host() {
        let store = SessionStore::new();
        let (host_tx, _host_rx) = sender();
        assert!(store
            .attach_host("s/nb", host_tx.clone(), CancellationToken::new())
            .await
            .is_empty());

        let (first, _r1) = sender();
        let (second, _r2) = sender();
        let (one, host) = store.join_guest("s/nb", first.clone()).await.unwrap();
        assert!(host.unwrap().same_channel(&host_tx));
        let (two, _) = store.join_guest("s/nb", second).await.unwrap();
        assert_eq!((one, two), (1, 2));

        assert!(store.guest_tx("s/nb", 1).await.unwrap().same_channel(&first));
        assert_eq!(store.guest_txs("s/nb").await.len(), 2);
    }

    #[tokio::test]
    async fn new_host_supersedes_the_old_one() {
        let store = SessionStore::new();
        let (old_host, _r1) = sender();
        let old_token = CancellationToken::new();
        store.attach_host("s/nb", old_host.clone(), old_token.clone()).await;
        let (guest, _r2) = sender();
        store.join_guest("s/nb", guest).await.unwrap();

        let (new_host, _r3) = sender();
        let waiting = store
            .attach_host("s/nb", new_host.clone(), CancellationToken::new())
            .await;
        assert_eq!(waiting, vec![1]);
        assert!(old_token.is_cancelled());

        // The old connection's cleanup must not evict the new host.
        assert!(store.detach_host("s/nb", &old_host).await.is_none());
        assert!(store.host_tx("s/nb").await.unwrap().same_channel(&new_host));
    }

    #[tokio::test]
    async fn session_ends_with_its_last_client() {
        let store = SessionStore::new();
        let (host, _r1) = sender();
        store.attach_host("s/nb", host.clone(), CancellationToken::new()).await;
        let (guest, _r2) = sender();
        let (id, _) = store.join_guest("s/nb", guest).await.unwrap();

        let told = store.detach_host("s/nb", &host).await.unwrap();
        assert_eq!(told.len(), 1);
        assert!(store.exists("s/nb").await);

        assert!(store.leave_guest("s/nb", id).await.is_none());
        assert!(!store.exists("s/nb").await);
    }

    #[tokio::test]
    async fn reaper_only_takes_sessions_without_guests() {
        let store = SessionStore::new();
        let (lonely, _r1) = sender();
        let lonely_token = CancellationToken::new();
        store.attach_host("lonely", lonely, lonely_token.clone()).await;
        let (host, _r2) = sender();
        store.attach_host("paired", host, CancellationToken::new()).await;
        let (guest, _r3) = sender();
        store.join_guest("paired", guest).await.unwrap();

        assert_eq!(store.reap_stale(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.reap_stale(Duration::from_millis(10)).await, 1);
        assert!(lonely_token.is_cancelled());
        assert!(store.exists("paired").await);
        assert_eq!(store.count().await, 1);
    }
}
