//! # Lifecycle Flows
//!
//! Opening and closing sessions that talk to each other:
//!
//! 1. Close cancels an in-flight remote `get`; late replies are discarded
//! 2. Nothing can be declared once close began
//! 3. Open fails when no transport is reachable
//! 4. Closing releases listeners and tells peers

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{collector, drain, settle, Mesh};
    use mb_session::{
        CancelPolicy, Config, GetOptions, Query, QueryStatus, SessionError, SessionState,
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn delayed_replier(delay: Duration) -> impl Fn(Query) + Send + Sync + 'static {
        move |query: Query| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let key = query.key_expr().clone();
                let _ = query.reply(key, "too late");
            });
        }
    }

    #[tokio::test]
    async fn test_close_cancels_remote_get() {
        let mesh = Mesh::new();
        let querier = mesh.listener("mem/cancel").await;
        let slow = mesh.dialer("mem/cancel", "peer").await;
        let _q = slow
            .declare_queryable("slow/**", delayed_replier(Duration::from_millis(300)))
            .unwrap();
        settle().await;

        let pending = querier.get("slow/answer", Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        querier.close();

        let outcome = pending.wait().await;
        assert_eq!(outcome.status, QueryStatus::Cancelled);
        assert!(outcome.replies.is_empty());
        assert_eq!(querier.query_stats().total_cancelled.load(Ordering::Relaxed), 1);

        // The slow reply is sent after close and goes nowhere.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(querier.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_explicit_cancel_with_deliver_policy() {
        let mesh = Mesh::new();
        let querier = mesh.listener("mem/deliver").await;
        let responder = mesh.dialer("mem/deliver", "peer").await;
        let _fast = responder
            .declare_queryable("mixed", |query: Query| query.reply("mixed", "fast").unwrap())
            .unwrap();
        let _slow = responder
            .declare_queryable("mixed", delayed_replier(Duration::from_secs(5)))
            .unwrap();
        settle().await;

        let pending = querier
            .get_with(
                "mixed",
                GetOptions::default()
                    .timeout(Duration::from_secs(10))
                    .cancel_policy(CancelPolicy::Deliver),
            )
            .unwrap();
        settle().await;
        assert!(pending.cancel());

        let outcome = pending.wait().await;
        assert_eq!(outcome.status, QueryStatus::Cancelled);
        assert_eq!(outcome.replies.len(), 1);
    }

    #[tokio::test]
    async fn test_declare_after_close_registers_nothing() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/closed").await;
        let peer = mesh.dialer("mem/closed", "peer").await;
        settle().await;

        peer.close();
        let (on_sample, mut rx) = collector();
        assert!(matches!(
            peer.declare_subscriber("**", on_sample),
            Err(SessionError::SessionClosed)
        ));
        assert!(matches!(
            peer.declare_queryable("**", |_| {}),
            Err(SessionError::SessionClosed)
        ));
        assert!(matches!(
            peer.get("**", Duration::from_secs(1)),
            Err(SessionError::SessionClosed)
        ));

        hub.publish("anything", "x").unwrap();
        assert!(drain(&mut rx, Duration::from_millis(100)).await.is_empty());
    }

    #[tokio::test]
    async fn test_open_requires_reachable_transport() {
        let mesh = Mesh::new();

        let mut config = Config::new();
        config.insert("connect.endpoints", json!(["mem/absent"])).unwrap();
        assert!(matches!(
            mesh.open(config).await,
            Err(SessionError::Connection(_))
        ));

        let mut client = Config::new();
        client.insert("mode", "client").unwrap();
        assert!(matches!(
            mesh.open(client).await,
            Err(SessionError::Connection(_))
        ));

        // One reachable endpoint out of two is enough.
        let _hub = mesh.listener("mem/present").await;
        let mut partial = Config::new();
        partial
            .insert("connect.endpoints", json!(["mem/absent", "mem/present"]))
            .unwrap();
        let session = mesh.open(partial).await.unwrap();
        settle().await;
        assert_eq!(session.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_close_releases_listener_and_notifies_peers() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/reuse").await;
        let peer = mesh.dialer("mem/reuse", "peer").await;
        settle().await;
        assert_eq!(peer.peers(), vec![hub.id()]);

        hub.close();
        settle().await;
        assert!(!mesh.is_listening("mem/reuse"));
        assert!(peer.peers().is_empty());

        let replacement = mesh.listener("mem/reuse").await;
        assert_eq!(replacement.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/drop").await;
        let clone = hub.clone();
        drop(hub);
        assert!(mesh.is_listening("mem/drop"));
        drop(clone);
        assert!(!mesh.is_listening("mem/drop"));
    }
}
