//! # Query Flows
//!
//! `get` across sessions:
//!
//! 1. Replies from every addressed queryable, local and remote, complete
//!    the query with exactly those replies
//! 2. No responders: the query times out at its deadline
//! 3. A responder that never finishes: timeout keeps what arrived
//! 4. Error replies and parameters cross the link intact
//! 5. Losing a link counts its queryables as finished

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{settle, Mesh};
    use mb_session::{GetOptions, Query, QueryStatus};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn answer_twice(name: &'static str) -> impl Fn(Query) + Send + Sync + 'static {
        move |query: Query| {
            let key = query.key_expr().as_str().replace('*', name);
            query.reply(key.as_str(), format!("{name}-1")).unwrap();
            query.reply(key.as_str(), format!("{name}-2")).unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_completes_with_all_replies() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/svc").await;
        let b = mesh.dialer("mem/svc", "peer").await;
        let c = mesh.dialer("mem/svc", "peer").await;

        let _qb = b.declare_queryable("svc/*", answer_twice("b")).unwrap();
        let _qc = c.declare_queryable("svc/**", answer_twice("c")).unwrap();
        let _local = hub
            .declare_queryable("svc/*", |query: Query| {
                query.reply("svc/hub", "local").unwrap();
            })
            .unwrap();
        let _unrelated = c.declare_queryable("other", answer_twice("x")).unwrap();
        settle().await;

        let outcome = hub
            .get("svc/*", Duration::from_secs(5))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.replies.len(), 5);

        let mut per_replier: HashMap<_, usize> = HashMap::new();
        for reply in &outcome.replies {
            *per_replier.entry(reply.replier).or_default() += 1;
        }
        assert_eq!(per_replier.get(&b.id()), Some(&2));
        assert_eq!(per_replier.get(&c.id()), Some(&2));
        assert_eq!(per_replier.get(&hub.id()), Some(&1));

        for sample in outcome.samples() {
            if sample.source.is_some() {
                assert!(sample.source == Some(b.id()) || sample.source == Some(c.id()));
            }
        }
    }

    #[tokio::test]
    async fn test_get_without_responders_times_out() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/empty").await;
        let _peer = mesh.dialer("mem/empty", "peer").await;
        settle().await;

        let started = Instant::now();
        let outcome = hub
            .get("nobody/**", Duration::from_millis(300))
            .unwrap()
            .wait()
            .await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.status, QueryStatus::TimedOut);
        assert!(outcome.replies.is_empty());
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unfinished_responder_times_out_with_partial_replies() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/partial").await;
        let slow = mesh.dialer("mem/partial", "peer").await;

        let held: Arc<Mutex<Vec<Query>>> = Arc::new(Mutex::new(Vec::new()));
        let keep = held.clone();
        let _q = slow
            .declare_queryable("slow", move |query: Query| {
                query.reply("slow", "partial").unwrap();
                keep.lock().push(query);
            })
            .unwrap();
        settle().await;

        let outcome = hub
            .get("slow", Duration::from_millis(400))
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome.status, QueryStatus::TimedOut);
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(held.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_parameters_and_errors_cross_link() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/params").await;
        let responder = mesh.dialer("mem/params", "peer").await;

        let _q = responder
            .declare_queryable("calc/div", |query: Query| {
                let divisor = query
                    .payload()
                    .and_then(|p| p.try_to_string().ok())
                    .unwrap_or_default();
                if query.parameters() == "strict" && divisor == "0" {
                    query.reply_err("division by zero").unwrap();
                } else {
                    query.reply("calc/div", "ok").unwrap();
                }
            })
            .unwrap();
        settle().await;

        let outcome = hub
            .get_with(
                "calc/div",
                GetOptions::default()
                    .parameters("strict")
                    .payload("0")
                    .timeout(Duration::from_secs(5)),
            )
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.replies.len(), 1);
        let err = outcome.replies[0].result.as_ref().unwrap_err();
        assert_eq!(err.payload.try_to_string().unwrap(), "division by zero");
        assert_eq!(outcome.replies[0].replier, responder.id());
    }

    #[tokio::test]
    async fn test_peer_disconnect_finalizes_query() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/vanish").await;
        let leaving = mesh.dialer("mem/vanish", "peer").await;

        let held: Arc<Mutex<Vec<Query>>> = Arc::new(Mutex::new(Vec::new()));
        let keep = held.clone();
        let _q = leaving
            .declare_queryable("data", move |query: Query| {
                query.reply("data", "before-leaving").unwrap();
                keep.lock().push(query);
            })
            .unwrap();
        settle().await;

        let pending = hub.get("data", Duration::from_secs(30)).unwrap();
        settle().await;
        leaving.close();

        let outcome = tokio::time::timeout(Duration::from_secs(5), pending.wait())
            .await
            .expect("query resolved by the disconnect, not the deadline");
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.replies.len(), 1);
        settle().await;
        assert!(hub.peers().is_empty());
    }

    #[tokio::test]
    async fn test_continuation_runs_on_completion() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/cont").await;
        let responder = mesh.dialer("mem/cont", "peer").await;
        let _q = responder
            .declare_queryable("k", |query: Query| query.reply("k", "v").unwrap())
            .unwrap();
        settle().await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        hub.get("k", Duration::from_secs(5))
            .unwrap()
            .on_complete(move |outcome| {
                let _ = tx.send(outcome);
            });

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, QueryStatus::Completed);
        assert_eq!(outcome.replies.len(), 1);
    }
}
