//! # Pub/Sub Flows
//!
//! Publications crossing links between sessions:
//!
//! 1. Remote subscribers receive each sample exactly once, in order
//! 2. Overlapping wildcard subscriptions never double-deliver
//! 3. Declarations made before a link exists are replayed when it comes up
//! 4. Undeclaring stops remote delivery
//! 5. Received pushes are not forwarded a second hop

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{collector, drain, settle, text, Mesh};
    use mb_session::SampleKind;
    use std::time::Duration;

    const QUIET: Duration = Duration::from_millis(150);

    #[tokio::test]
    async fn test_remote_delivery_exactly_once_in_order() {
        let mesh = Mesh::new();
        let publisher = mesh.listener("mem/pub").await;
        let subscriber = mesh.dialer("mem/pub", "peer").await;

        let (on_sample, mut rx) = collector();
        let _sub = subscriber.declare_subscriber("demo/**", on_sample).unwrap();
        settle().await;

        for i in 0..5 {
            publisher.publish("demo/counter", i.to_string()).unwrap();
        }

        let samples = drain(&mut rx, QUIET).await;
        let values: Vec<String> = samples.iter().map(text).collect();
        assert_eq!(values, vec!["0", "1", "2", "3", "4"]);
        assert!(samples.iter().all(|s| s.source == Some(publisher.id())));
        assert_eq!(subscriber.peers(), vec![publisher.id()]);
    }

    #[tokio::test]
    async fn test_overlapping_wildcards_deliver_once_each() {
        let mesh = Mesh::new();
        let publisher = mesh.listener("mem/overlap").await;
        let subscriber = mesh.dialer("mem/overlap", "peer").await;

        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for pattern in ["a/**", "a/*/c", "**/c", "a/b/c", "a/**/c"] {
            let (on_sample, rx) = collector();
            handles.push(subscriber.declare_subscriber(pattern, on_sample).unwrap());
            receivers.push((pattern, rx));
        }
        let (on_miss, mut miss) = collector();
        let _miss = subscriber.declare_subscriber("x/*", on_miss).unwrap();
        settle().await;

        publisher.publish("a/b/c", "once").unwrap();

        for (pattern, rx) in &mut receivers {
            let got = drain(rx, QUIET).await;
            assert_eq!(got.len(), 1, "{pattern} should see the sample exactly once");
        }
        assert!(drain(&mut miss, QUIET).await.is_empty());
    }

    #[tokio::test]
    async fn test_declarations_replayed_on_connect() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/hub").await;
        let (on_sample, mut rx) = collector();
        let _sub = hub.declare_subscriber("late/*", on_sample).unwrap();

        let joiner = mesh.dialer("mem/hub", "client").await;
        settle().await;

        joiner.publish("late/1", "hello").unwrap();
        joiner.delete("late/2").unwrap();

        let samples = drain(&mut rx, QUIET).await;
        assert_eq!(samples.len(), 2);
        assert_eq!(text(&samples[0]), "hello");
        assert_eq!(samples[1].kind, SampleKind::Delete);
        assert!(samples.iter().all(|s| s.source == Some(joiner.id())));
    }

    #[tokio::test]
    async fn test_undeclare_propagates() {
        let mesh = Mesh::new();
        let publisher = mesh.listener("mem/undeclare").await;
        let subscriber = mesh.dialer("mem/undeclare", "peer").await;

        let (on_sample, mut rx) = collector();
        let sub = subscriber.declare_subscriber("topic", on_sample).unwrap();
        settle().await;
        publisher.publish("topic", "first").unwrap();
        assert_eq!(drain(&mut rx, QUIET).await.len(), 1);

        sub.undeclare();
        settle().await;
        publisher.publish("topic", "second").unwrap();
        assert!(drain(&mut rx, QUIET).await.is_empty());
    }

    #[tokio::test]
    async fn test_pushes_travel_one_hop() {
        let mesh = Mesh::new();
        let hub = mesh.listener("mem/star").await;
        let left = mesh.dialer("mem/star", "peer").await;
        let right = mesh.dialer("mem/star", "peer").await;

        let (on_hub, mut hub_rx) = collector();
        let _hub_sub = hub.declare_subscriber("star/*", on_hub).unwrap();
        let (on_right, mut right_rx) = collector();
        let _right_sub = right.declare_subscriber("star/*", on_right).unwrap();
        settle().await;

        left.publish("star/1", "ping").unwrap();

        assert_eq!(drain(&mut hub_rx, QUIET).await.len(), 1);
        assert!(drain(&mut right_rx, QUIET).await.is_empty());
        assert_eq!(hub.peers().len(), 2);
    }

    #[tokio::test]
    async fn test_wild_publication_reaches_intersecting_subscribers() {
        let mesh = Mesh::new();
        let publisher = mesh.listener("mem/wild").await;
        let subscriber = mesh.dialer("mem/wild", "peer").await;

        let (on_sample, mut rx) = collector();
        let _sub = subscriber.declare_subscriber("room/kitchen/temp", on_sample).unwrap();
        settle().await;

        publisher.publish("room/*/temp", "reset").unwrap();
        let samples = drain(&mut rx, QUIET).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].key_expr.as_str(), "room/*/temp");
    }
}
