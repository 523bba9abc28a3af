use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::aliases::CreateRequest;
use crate::aliases::UsagePolicy;
use crate::channel;
use crate::channel::BufferedProducer;
use crate::channel::Channels;
use crate::channel::EventProducer;
use crate::events::LifecycleEvent;
use crate::keygen;
use crate::keygen::KeyGenerator;
use crate::lifecycle::Error;
use crate::lifecycle::LifecycleService;
use crate::storage::CreateAliasValues;
use crate::storage::Directory;
use crate::storage::Memory;

/// Hands out `key-1`, `key-2`, ... and fails on the configured call
struct CountingKeyGenerator {
    calls: AtomicUsize,
    fail_on: Option<usize>,
    delay: Option<Duration>,
}

impl CountingKeyGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
            delay: None,
        }
    }

    fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::new()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }
}

impl KeyGenerator for CountingKeyGenerator {
    fn generate(&self, _length: usize) -> Result<String, keygen::Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if self.fail_on == Some(call) {
            return Err(keygen::Error::Entropy("exhausted".to_string()));
        }

        Ok(format!("key-{call}"))
    }
}

/// Records the most generations seen running at the same time
#[derive(Default)]
struct PeakKeyGenerator {
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl KeyGenerator for PeakKeyGenerator {
    fn generate(&self, _length: usize) -> Result<String, keygen::Error> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(5));

        self.running.fetch_sub(1, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(format!("peak-{call}"))
    }
}

/// Producer whose broker never answers
struct StalledProducer;

#[async_trait]
impl EventProducer for StalledProducer {
    async fn produce(&self, _event: &LifecycleEvent) -> channel::Result<()> {
        std::future::pending().await
    }
}

/// Always hands out the same key
struct FixedKeyGenerator(&'static str);

impl KeyGenerator for FixedKeyGenerator {
    fn generate(&self, _length: usize) -> Result<String, keygen::Error> {
        Ok(self.0.to_string())
    }
}

fn setup(memory: &Memory, key_generator: Arc<dyn KeyGenerator>) -> LifecycleService {
    let channels = Channels::memory(16);

    LifecycleService::new(
        Arc::new(memory.clone()),
        channels.used_producer,
        channels.expired_producer,
        key_generator,
    )
}

fn requests(count: usize) -> Vec<CreateRequest> {
    (0..count)
        .map(|index| {
            CreateRequest::parse(
                format!("http://example.com/{index}"),
                UsagePolicy::Permanent,
            )
            .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_failing_key_generation_creates_nothing() {
    let memory = Memory::new();
    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::failing_on(30)));

    let result = lifecycle.create(requests(50)).await;

    assert!(matches!(result, Err(Error::CreationFailed(_))));

    for call in 1..=50 {
        let key = format!("key-{call}");

        assert!(memory.find_active_by_key(&key).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_batch_keeps_request_order() {
    let memory = Memory::new();
    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::new()))
        .with_key_concurrency(3);

    let aliases = lifecycle.create(requests(20)).await.unwrap();

    assert_eq!(20, aliases.len());

    for (index, alias) in aliases.iter().enumerate() {
        assert_eq!(format!("http://example.com/{index}"), alias.target.as_str());
        assert!(alias.active);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_key_generation_respects_concurrency() {
    let memory = Memory::new();
    let key_generator = Arc::new(PeakKeyGenerator::default());
    let lifecycle = setup(&memory, Arc::clone(&key_generator) as Arc<dyn KeyGenerator>)
        .with_key_concurrency(3);

    let aliases = lifecycle.create(requests(50)).await.unwrap();

    assert_eq!(50, aliases.len());

    let peak = key_generator.peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "{peak} generations ran at once");
}

#[tokio::test]
async fn test_colliding_key_is_regenerated() {
    let memory = Memory::new();

    memory
        .save_batch(&[CreateAliasValues {
            key: "key-1".to_string(),
            target: Url::parse("http://example.com/taken").unwrap(),
            usage_policy: UsagePolicy::Permanent,
        }])
        .await
        .unwrap();

    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::new()));

    let aliases = lifecycle.create(requests(1)).await.unwrap();

    assert_eq!("key-2", aliases[0].key);
    assert_eq!(
        "http://example.com/taken",
        lifecycle.resolve("key-1").await.unwrap().as_str()
    );
    assert_eq!(
        "http://example.com/0",
        lifecycle.resolve("key-2").await.unwrap().as_str()
    );
}

#[tokio::test]
async fn test_collisions_give_up_after_a_few_attempts() {
    let memory = Memory::new();

    memory
        .save_batch(&[CreateAliasValues {
            key: "same".to_string(),
            target: Url::parse("http://example.com/taken").unwrap(),
            usage_policy: UsagePolicy::Permanent,
        }])
        .await
        .unwrap();

    let lifecycle = setup(&memory, Arc::new(FixedKeyGenerator("same")));

    let result = lifecycle.create(requests(1)).await;

    assert!(matches!(result, Err(Error::CreationFailed(_))));
    assert_eq!(
        "http://example.com/taken",
        lifecycle.resolve("same").await.unwrap().as_str()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_create_persists_nothing() {
    let memory = Memory::new();
    let key_generator = Arc::new(CountingKeyGenerator::slow(Duration::from_millis(20)));
    let lifecycle = setup(&memory, Arc::clone(&key_generator) as Arc<dyn KeyGenerator>)
        .with_key_concurrency(2);

    let cancelled =
        tokio::time::timeout(Duration::from_millis(5), lifecycle.create(requests(50))).await;

    assert!(cancelled.is_err());

    // generations already running finish, nothing new is started
    tokio::time::sleep(Duration::from_millis(200)).await;

    let calls = key_generator.calls.load(Ordering::SeqCst);
    assert!(calls < 50, "{calls} keys generated after cancellation");

    for call in 1..=calls {
        let key = format!("key-{call}");

        assert!(memory.find_active_by_key(&key).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let memory = Memory::new();
    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::new()));

    assert!(lifecycle.create(Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expiry_fails_when_channel_is_gone() {
    let memory = Memory::new();

    memory
        .save_batch(&[CreateAliasValues {
            key: "spent".to_string(),
            target: Url::parse("http://example.com/spent").unwrap(),
            usage_policy: UsagePolicy::Limited { tries_left: 0 },
        }])
        .await
        .unwrap();

    // consumers dropped, the channels are closed
    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::new()));

    assert!(matches!(
        lifecycle.resolve("spent").await,
        Err(Error::EventChannel(_))
    ));
}

#[tokio::test]
async fn test_redirect_survives_lost_used_event() {
    let memory = Memory::new();

    memory
        .save_batch(&[CreateAliasValues {
            key: "once".to_string(),
            target: Url::parse("http://example.com/once").unwrap(),
            usage_policy: UsagePolicy::Limited { tries_left: 1 },
        }])
        .await
        .unwrap();

    // consumers dropped, the used event can not be handed over
    let lifecycle = setup(&memory, Arc::new(CountingKeyGenerator::new()));

    assert_eq!(
        "http://example.com/once",
        lifecycle.resolve("once").await.unwrap().as_str()
    );
}

#[tokio::test]
async fn test_stalled_broker_does_not_block_redirect() {
    let memory = Memory::new();

    memory
        .save_batch(&[CreateAliasValues {
            key: "busy".to_string(),
            target: Url::parse("http://example.com/busy").unwrap(),
            usage_policy: UsagePolicy::Limited { tries_left: 5 },
        }])
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let (used, forwarder) =
        BufferedProducer::spawn("used-events", Arc::new(StalledProducer), 1, shutdown.clone());
    let channels = Channels::memory(16);

    let lifecycle = LifecycleService::new(
        Arc::new(memory.clone()),
        Arc::new(used),
        channels.expired_producer,
        Arc::new(CountingKeyGenerator::new()),
    );

    // the buffer fills up, later events are dropped, every redirect still goes through
    for _ in 0..5 {
        let target = tokio::time::timeout(Duration::from_secs(1), lifecycle.resolve("busy"))
            .await
            .expect("redirect waited on the broker")
            .unwrap();

        assert_eq!("http://example.com/busy", target.as_str());
    }

    shutdown.cancel();
    forwarder.await.unwrap();
}
