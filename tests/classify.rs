//! Integration tests for classification through the public API.

use shortcut::resolver::resolver_fn;
use shortcut::{
    CancelToken, Classifier, Config, Context, Decision, Family, RangeIndex, ReloadableClassifier,
    Rule, ShortcutError, StaticResolver,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn reference_classifier() -> Classifier {
    Classifier::builder()
        .direct(
            ["1.0.1.0/24", "1.0.2.0/23", "1.0.8.0/21", "127.0.0.0/24"],
            ["fe80::1/64", "::/64"],
        )
        .resolver(StaticResolver::new().with_host("localhost", ip("127.0.0.1")))
        .build()
}

#[tokio::test]
async fn test_reference_lookups() {
    init_tracing();
    let classifier = reference_classifier();
    let ctx = Context::with_timeout(Duration::from_secs(5));

    assert_eq!(classifier.decide(&ctx, "1.0.1.9:80").await, Decision::Direct);
    assert_eq!(classifier.decide(&ctx, "1.0.3.9:80").await, Decision::Direct);
    assert_eq!(classifier.decide(&ctx, "1.0.4.9:80").await, Decision::Unknown);
    assert_eq!(classifier.decide(&ctx, "1.0.15.255:80").await, Decision::Direct);
    assert_eq!(classifier.decide(&ctx, "1.0.16.0:80").await, Decision::Unknown);
}

#[tokio::test]
async fn test_allow_reports_resolved_address() {
    let classifier = reference_classifier();
    let ctx = Context::background();

    assert_eq!(
        classifier.allow(&ctx, "localhost:8888").await,
        (true, Some(ip("127.0.0.1")))
    );
    assert_eq!(
        classifier.allow(&ctx, "[fe80::9]:8888").await,
        (true, Some(ip("fe80::9")))
    );
    assert_eq!(classifier.allow(&ctx, "1.2.4.5:8888").await, (false, None));
    assert_eq!(classifier.allow(&ctx, "not-exist.com:80").await, (false, None));
}

#[tokio::test]
async fn test_unresolvable_host_is_unknown() {
    let classifier = reference_classifier();
    let ctx = Context::background();

    let err = classifier.classify(&ctx, "not-exist.com:80").await.unwrap_err();
    assert!(matches!(err, ShortcutError::Resolution { .. }));
    assert_eq!(classifier.decide(&ctx, "not-exist.com:80").await, Decision::Unknown);
}

#[tokio::test]
async fn test_family_isolation() {
    // An IPv4 rule never matches IPv6 traffic and the reverse
    let classifier = Classifier::builder()
        .direct(["0.0.0.0/0"], Vec::<&str>::new())
        .resolver(StaticResolver::new())
        .build();
    let ctx = Context::background();

    assert_eq!(classifier.decide(&ctx, "8.8.8.8:53").await, Decision::Direct);
    assert_eq!(classifier.decide(&ctx, "[2001:db8::1]:53").await, Decision::Unknown);
    // IPv4-mapped IPv6 is classified as IPv4
    assert_eq!(classifier.decide(&ctx, "[::ffff:8.8.8.8]:53").await, Decision::Direct);
}

#[tokio::test]
async fn test_rule_priority() {
    let classifier = Classifier::builder()
        .force_proxy(["10.10.0.0/16"], ["fd00:10::/32"])
        .direct(["10.0.0.0/8"], ["fd00::/8"])
        .resolver(StaticResolver::new())
        .build();
    let ctx = Context::background();

    let c = classifier.classify(&ctx, "10.10.1.1:80").await.unwrap();
    assert_eq!(c.decision, Decision::Proxy);
    assert_eq!(c.rule.as_deref(), Some("force-proxy"));

    let c = classifier.classify(&ctx, "10.11.1.1:80").await.unwrap();
    assert_eq!(c.decision, Decision::Direct);
    assert_eq!(c.rule.as_deref(), Some("direct"));

    assert_eq!(classifier.decide(&ctx, "[fd00:10::1]:80").await, Decision::Proxy);
    assert_eq!(classifier.decide(&ctx, "[fd00:11::1]:80").await, Decision::Direct);
}

#[tokio::test]
async fn test_custom_rules() {
    let lan = RangeIndex::build(Family::V4, ["192.168.0.0/16"]);
    let classifier = Classifier::builder()
        .rule(Rule::new("lan", lan, Decision::Direct))
        .resolver(StaticResolver::new())
        .build();

    assert_eq!(classifier.rules(Family::V4).len(), 1);
    assert!(classifier.rules(Family::V6).is_empty());
    let c = classifier.classify_ip(ip("192.168.3.4"));
    assert_eq!(c.rule.as_deref(), Some("lan"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_resolution_hits_deadline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut classifier = reference_classifier();
    classifier.set_resolver(resolver_fn(move |_host: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(IpAddr::from([1, 0, 1, 1]))
        }
    }));

    let ctx = Context::with_timeout(Duration::from_millis(100));
    let err = classifier.classify(&ctx, "slow.example:80").await.unwrap_err();
    assert!(matches!(err, ShortcutError::DeadlineExceeded));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_resolution() {
    let mut classifier = reference_classifier();
    classifier.set_resolver(resolver_fn(|_host: String| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(IpAddr::from([1, 0, 1, 1]))
    }));
    let classifier = Arc::new(classifier);

    let token = CancelToken::new();
    let ctx = Context::with_token(token.clone());
    let task = {
        let classifier = classifier.clone();
        tokio::spawn(async move { classifier.classify(&ctx, "slow.example:80").await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ShortcutError::Canceled));
}

#[tokio::test]
async fn test_already_cancelled_context() {
    let classifier = reference_classifier();
    let ctx = Context::background();
    ctx.cancel();

    let err = classifier.classify(&ctx, "1.0.1.9:80").await.unwrap_err();
    assert!(err.is_context_error());
    assert_eq!(classifier.decide(&ctx, "1.0.1.9:80").await, Decision::Unknown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_classification() {
    let classifier = Arc::new(reference_classifier());
    let mut handles = Vec::new();

    for i in 0..64u32 {
        let classifier = classifier.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::with_timeout(Duration::from_secs(5));
            let address = format!("1.0.{}.{}:443", i % 20, i);
            let expected = if (1..4).contains(&(i % 20)) || (8..16).contains(&(i % 20)) {
                Decision::Direct
            } else {
                Decision::Unknown
            };
            assert_eq!(classifier.decide(&ctx, &address).await, expected, "{}", address);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_reload_from_config() {
    let initial = Config::from_yaml("direct:\n  v4:\n    subnets: [\"10.0.0.0/8\"]\n").unwrap();
    let reloadable = ReloadableClassifier::new(
        initial
            .builder()
            .unwrap()
            .resolver(StaticResolver::new())
            .build(),
    );
    let ctx = Context::background();
    assert_eq!(reloadable.decide(&ctx, "10.1.2.3:22").await, Decision::Direct);

    let updated = Config::from_yaml("force_proxy:\n  v4:\n    subnets: [\"10.1.0.0/16\"]\n").unwrap();
    reloadable.reload(
        updated
            .builder()
            .unwrap()
            .resolver(StaticResolver::new())
            .build(),
    );
    assert_eq!(reloadable.decide(&ctx, "10.1.2.3:22").await, Decision::Proxy);
    // The default direct lists apply when the section is absent
    assert_eq!(reloadable.decide(&ctx, "10.2.0.1:22").await, Decision::Direct);
}
