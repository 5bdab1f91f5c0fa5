use crate::clock::Clock;
use crate::storage::{KeyValueStore, SESSION_ID_KEY, USER_ID_KEY};
use tracing::{debug, warn};
use uuid::Uuid;

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Timestamp plus short random suffix; collisions are possible but unlikely.
pub fn generate_id(prefix: &str, clock: &dyn Clock) -> String {
    format!("{prefix}_{}_{}", clock.now_millis(), random_suffix())
}

fn random_suffix() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

/// Returns the id cached under `key`, generating and storing one when absent.
/// A failing store yields a fresh id that is not persisted.
pub fn get_or_create(
    store: &dyn KeyValueStore,
    key: &str,
    prefix: &str,
    clock: &dyn Clock,
) -> String {
    match store.get(key) {
        Ok(Some(existing)) if !existing.is_empty() => return existing,
        Ok(_) => {}
        Err(err) => {
            warn!(%key, %err, "identifier storage unreadable; using ephemeral id");
            return generate_id(prefix, clock);
        }
    }

    let id = generate_id(prefix, clock);
    match store.set(key, &id) {
        Ok(()) => debug!(%key, %id, "generated identifier"),
        Err(err) => warn!(%key, %err, "failed to persist identifier"),
    }
    id
}

pub fn session_id(store: &dyn KeyValueStore, clock: &dyn Clock) -> String {
    get_or_create(store, SESSION_ID_KEY, "session", clock)
}

pub fn user_id(store: &dyn KeyValueStore, clock: &dyn Clock) -> String {
    get_or_create(store, USER_ID_KEY, "user", clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RuntimeClock;
    use crate::storage::{MemoryStore, UnavailableStore};

    #[tokio::test]
    async fn stable_until_storage_is_cleared() {
        let clock = RuntimeClock::new();
        let store = MemoryStore::new();

        let first = session_id(&store, &clock);
        assert_eq!(session_id(&store, &clock), first);
        assert!(first.starts_with("session_"));

        store.clear().unwrap();
        assert_ne!(session_id(&store, &clock), first);
    }

    #[tokio::test]
    async fn id_shape_matches_prefix_millis_suffix() {
        let clock = RuntimeClock::new();
        let store = MemoryStore::new();
        let id = user_id(&store, &clock);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "user");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn unavailable_storage_degrades_to_fresh_ids() {
        let clock = RuntimeClock::new();
        let a = user_id(&UnavailableStore, &clock);
        let b = user_id(&UnavailableStore, &clock);
        assert!(a.starts_with("user_"));
        assert_ne!(a, b);
    }
}
