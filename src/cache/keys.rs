//! Cache key derivation.
//!
//! A combination key is a lossless, order-independent rendering of the
//! weighted inputs and the operator, e.g.
//! `ZCACHE:(SET_A*1.0 && SET_B*2.0)`. A single input is addressed by its own
//! name so reads hit the real set.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::query::Operator;
use crate::domain::weighted_key::WeightedKey;

static HOST_IDENTITY: Lazy<String> = Lazy::new(|| {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
});

/// Names the execution context a query runs in.
///
/// Tokens must differ between any two contexts that can run concurrently.
pub trait ContextIdentity: Send + Sync {
    fn token(&self) -> String;
}

/// `host::pid::task-N` inside a tokio task, `host::pid::thread-N` outside one.
///
/// Tasks sharing a worker thread each get their own token. A task id is only
/// reused after that task has finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcessTask;

impl ContextIdentity for HostProcessTask {
    fn token(&self) -> String {
        let context = match tokio::task::try_id() {
            Some(task) => format!("task-{task}"),
            None => {
                let thread = format!("{:?}", std::thread::current().id());
                let thread: String = thread.chars().filter(char::is_ascii_digit).collect();
                format!("thread-{thread}")
            }
        };
        format!("{}::{}::{}", *HOST_IDENTITY, std::process::id(), context)
    }
}

/// A fresh UUID per call, so an isolated combination is never reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentity;

impl ContextIdentity for RandomIdentity {
    fn token(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Derives combination keys.
#[derive(Clone)]
pub struct KeyHasher {
    prefix: String,
    identity: Arc<dyn ContextIdentity>,
}

impl KeyHasher {
    pub fn new(prefix: impl Into<String>, identity: Arc<dyn ContextIdentity>) -> Self {
        Self {
            prefix: prefix.into(),
            identity,
        }
    }

    pub fn derive(
        &self,
        keys: &[WeightedKey],
        operator: Operator,
        thread_local: bool,
    ) -> Result<String, DomainError> {
        let key_hash = match keys {
            [] => {
                return Err(DomainError::validation(
                    "cannot build a key hash with no keys",
                ));
            }
            [single] => single.key().to_string(),
            _ => {
                let mut sorted: Vec<&WeightedKey> = keys.iter().collect();
                sorted.sort_by(|a, b| {
                    a.key()
                        .cmp(b.key())
                        .then_with(|| a.weight().total_cmp(&b.weight()))
                });
                let chunks: Vec<String> = sorted.iter().map(|key| key.hash_chunk()).collect();
                let joined = chunks.join(operator.key_joiner());
                let key_hash = format!("{}:({})", self.prefix, joined);
                if thread_local {
                    format!("{}::{}", key_hash, self.identity.token())
                } else {
                    key_hash
                }
            }
        };
        debug!(key_hash = %key_hash, "Derived key hash");
        Ok(key_hash)
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new("ZCACHE", Arc::new(HostProcessTask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIdentity(&'static str);

    impl ContextIdentity for FixedIdentity {
        fn token(&self) -> String {
            self.0.to_string()
        }
    }

    fn keys(pairs: &[(&str, f64)]) -> Vec<WeightedKey> {
        pairs
            .iter()
            .map(|(name, weight)| WeightedKey::new(*name, *weight).expect("valid key"))
            .collect()
    }

    #[test]
    fn empty_input_is_rejected() {
        let hasher = KeyHasher::default();
        assert!(hasher.derive(&[], Operator::Union, false).is_err());
    }

    #[test]
    fn single_key_is_returned_verbatim() {
        let hasher = KeyHasher::default();
        let derived = hasher
            .derive(&keys(&[("SET_A", 3.0)]), Operator::Intersect, true)
            .expect("hash");
        assert_eq!(derived, "SET_A");
    }

    #[test]
    fn operator_selects_joiner() {
        let hasher = KeyHasher::default();
        let input = keys(&[("SET_B", 2.0), ("SET_A", 1.0)]);
        assert_eq!(
            hasher.derive(&input, Operator::Union, false).expect("hash"),
            "ZCACHE:(SET_A*1.0 || SET_B*2.0)"
        );
        assert_eq!(
            hasher.derive(&input, Operator::Intersect, false).expect("hash"),
            "ZCACHE:(SET_A*1.0 && SET_B*2.0)"
        );
    }

    #[test]
    fn derivation_ignores_input_order() {
        let hasher = KeyHasher::default();
        let forward = keys(&[("a", 1.0), ("b", 0.5), ("c", 2.0)]);
        let mut permutations = vec![forward.clone()];
        let mut reversed = forward.clone();
        reversed.reverse();
        permutations.push(reversed);
        permutations.push(keys(&[("b", 0.5), ("c", 2.0), ("a", 1.0)]));

        let expected = hasher.derive(&forward, Operator::Union, false).expect("hash");
        for input in permutations {
            assert_eq!(
                hasher.derive(&input, Operator::Union, false).expect("hash"),
                expected
            );
        }
    }

    #[test]
    fn weights_distinguish_keys() {
        let hasher = KeyHasher::default();
        let light = hasher
            .derive(&keys(&[("a", 1.0), ("b", 1.0)]), Operator::Union, false)
            .expect("hash");
        let heavy = hasher
            .derive(&keys(&[("a", 1000.0), ("b", 1.0)]), Operator::Union, false)
            .expect("hash");
        assert_ne!(light, heavy);
    }

    #[tokio::test]
    async fn concurrent_tasks_on_one_thread_get_distinct_tokens() {
        let gate = Arc::new(tokio::sync::Barrier::new(2));
        let spawn = |gate: Arc<tokio::sync::Barrier>| {
            tokio::spawn(async move {
                let token = HostProcessTask.token();
                gate.wait().await;
                (std::thread::current().id(), token)
            })
        };
        let first = spawn(gate.clone());
        let second = spawn(gate);
        let (first_thread, first) = first.await.expect("first task");
        let (second_thread, second) = second.await.expect("second task");

        assert_eq!(first_thread, second_thread);
        assert_ne!(first, second);
        assert!(first.contains("::task-"), "{first}");
        assert!(HostProcessTask.token().contains("::thread-"));
    }

    #[test]
    fn thread_local_appends_identity() {
        let hasher = KeyHasher::new("ZCACHE", Arc::new(FixedIdentity("host::42::7")));
        let derived = hasher
            .derive(&keys(&[("a", 1.0), ("b", 1.0)]), Operator::Union, true)
            .expect("hash");
        assert_eq!(derived, "ZCACHE:(a*1.0 || b*1.0)::host::42::7");
    }

    #[test]
    fn threads_get_distinct_tokens() {
        let here = HostProcessTask.token();
        let there = std::thread::spawn(|| HostProcessTask.token())
            .join()
            .expect("thread should finish");
        assert_ne!(here, there);
        assert!(here.contains(&std::process::id().to_string()));
    }

    #[test]
    fn random_identity_differs_per_call() {
        assert_ne!(RandomIdentity.token(), RandomIdentity.token());
    }
}
