use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use radar_core::{
    select_pending, AnalysisKey, Enrichment, EnrichmentResult, Item, MemoryStore, ProductConfig,
    ProductProfile, RadarStore, RunState, ScoringConfig, TenantConfig, Urgency, UNPROCESSED,
};
use radar_scoring::{
    CharApproxCounter, ContextBuilder, EnrichError, Embedder, Enricher, ScoringError,
    SemanticEngine,
};
use radar_scraper::PacingPolicy;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::scoring::scoped_categories;
use super::*;

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Maps text onto one of three orthogonal axes by keyword.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("profit") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("churn") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, ScoringError> {
        Err(ScoringError::Embedding("TEI down".to_string()))
    }
}

struct CountingEnricher {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
}

impl CountingEnricher {
    fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for CountingEnricher {
    async fn analyze(
        &self,
        context: &str,
        _profile: &ProductProfile,
    ) -> Result<EnrichmentResult, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EnrichError::Status { status: 500 });
        }
        assert!(context.starts_with("TITLE: "));
        Ok(good_result())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn good_result() -> EnrichmentResult {
    EnrichmentResult {
        pain_point_summary: "margins are invisible".to_string(),
        urgency: Urgency::High,
        relevance: 9.0,
        is_spam: false,
        spam_indicators: vec![],
    }
}

fn product(id: &str, name: &str, description: &str, categories: &[&str]) -> ProductConfig {
    ProductConfig {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        pain_keywords: vec!["margins".to_string()],
        intent_keywords: vec![],
        categories: categories.iter().map(|c| (*c).to_string()).collect(),
    }
}

fn tenant() -> TenantConfig {
    TenantConfig {
        id: "acme".to_string(),
        products: vec![
            product(
                "profit-doctor",
                "ProfitDoctor",
                "Profit tracking for merchants",
                &["shopify"],
            ),
            product("churn-watch", "ChurnWatch", "Churn alerts for SaaS", &[]),
        ],
    }
}

fn item(id: &str, category: &str, title: &str, score: i64, replies: i64) -> Item {
    Item {
        id: id.to_string(),
        category: category.to_string(),
        url: format!("https://www.reddit.com/r/{category}/comments/{id}/"),
        title: title.to_string(),
        body: String::new(),
        author: Some("poster".to_string()),
        score,
        reply_count: replies,
        created_at: Utc::now(),
        fetched_at: Utc::now(),
        embedding_ref: None,
        processed_score: UNPROCESSED,
        processed_replies: UNPROCESSED,
    }
}

/// Seeking-tool phrase plus perfect fit with ProfitDoctor.
fn hot_item() -> Item {
    item("t3_hot", "shopify", "Looking for a tool to track profit", 10, 5)
}

fn quiet_item() -> Item {
    item("t3_quiet", "shopify", "Weekend photos from the lake", 1, 0)
}

fn zero_pacing() -> PacingPolicy {
    PacingPolicy {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        burst_probability: 0.0,
        burst_multiplier: 1.0,
        widen_factor: 1.5,
        min_cap: Duration::from_millis(10),
        max_cap: Duration::from_millis(20),
    }
}

fn pipeline_with(
    store: &Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    enricher: Arc<dyn Enricher>,
    base_url: &str,
    enrich_timeout: Duration,
) -> Pipeline {
    let store: Arc<dyn RadarStore> = Arc::clone(store) as Arc<dyn RadarStore>;
    Pipeline::new(
        Arc::clone(&store),
        HarvestSettings {
            base_url: base_url.to_string(),
            page_size: 100,
            item_cap: 50,
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            pacing: zero_pacing(),
        },
        SemanticEngine::new(embedder, store),
        enricher,
        ContextBuilder::new(Arc::new(CharApproxCounter), 7500, 1000),
        ScoringConfig::default(),
        ScoreSettings {
            enrich_concurrency: 4,
            enrich_timeout,
            batch_size: 50,
        },
    )
}

fn pipeline(store: &Arc<MemoryStore>, enricher: Arc<dyn Enricher>) -> Pipeline {
    pipeline_with(
        store,
        KeywordEmbedder::new(),
        enricher,
        "http://127.0.0.1:1",
        Duration::from_secs(5),
    )
}

fn request<'a>(tenant: &'a TenantConfig, mode: ScoreMode, only: Option<&str>) -> ScoreRequest<'a> {
    ScoreRequest {
        tenant,
        categories: None,
        only_product: only.map(str::to_string),
        mode,
        limit: None,
        run_id: None,
    }
}

fn key(item_id: &str, product_id: &str) -> AnalysisKey {
    AnalysisKey {
        item_id: item_id.to_string(),
        product_id: product_id.to_string(),
        tenant_id: "acme".to_string(),
    }
}

async fn seed(store: &MemoryStore, items: &[Item]) {
    for item in items {
        store.upsert_item(item).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn below_threshold_never_enriches() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[quiet_item()]).await;
    let enricher = CountingEnricher::new();
    let p = pipeline(&store, enricher.clone());

    let report = p
        .score(&request(&tenant(), ScoreMode::Incremental, None))
        .await
        .unwrap();

    assert_eq!(enricher.calls(), 0);
    assert_eq!(report.records, 2);
    let record = store
        .get_analysis(&key("t3_quiet", "profit-doctor"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.enrichment, Enrichment::Absent);
    assert!(record.relevance < 10.0);
}

#[tokio::test]
async fn passing_both_gates_enriches_exactly_once_per_pair() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item(), quiet_item()]).await;
    let enricher = CountingEnricher::new();
    let p = pipeline(&store, enricher.clone());
    let tenant = tenant();

    let first = p
        .score(&request(&tenant, ScoreMode::Incremental, None))
        .await
        .unwrap();
    assert_eq!(enricher.calls(), 1);
    assert_eq!(first.items, 2);
    assert_eq!(first.records, 4);
    assert_eq!(first.enriched, 1);

    let record = store
        .get_analysis(&key("t3_hot", "profit-doctor"))
        .await
        .unwrap()
        .unwrap();
    assert!((record.semantic_fit - 1.0).abs() < 1e-6);
    assert!(record.relevance >= 20.0);
    assert_eq!(record.enrichment, Enrichment::Result(good_result()));
    assert_eq!(record.signals.general_intents, vec!["seeking_tool".to_string()]);

    // Nothing changed, so a second pass selects nothing and calls nothing.
    let second = p
        .score(&request(&tenant, ScoreMode::Incremental, None))
        .await
        .unwrap();
    assert_eq!(second.items, 0);
    assert_eq!(enricher.calls(), 1);
}

#[tokio::test]
async fn single_product_restriction_limits_enrichment() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item()]).await;
    let enricher = CountingEnricher::new();
    let p = pipeline(&store, enricher.clone());

    let report = p
        .score(&request(
            &tenant(),
            ScoreMode::Incremental,
            Some("churn-watch"),
        ))
        .await
        .unwrap();

    assert_eq!(enricher.calls(), 0);
    assert_eq!(report.records, 2, "every product is still scored");
}

// ---------------------------------------------------------------------------
// Change detection and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_is_empty_for_every_product_after_a_pass() {
    let store = Arc::new(MemoryStore::new());
    let saas = item("t3_saas", "saas", "Churn keeps climbing", 3, 1);
    seed(&store, &[hot_item(), quiet_item(), saas]).await;
    let p = pipeline(&store, CountingEnricher::new());
    let tenant = tenant();

    p.score(&request(&tenant, ScoreMode::Incremental, None))
        .await
        .unwrap();

    for profile in tenant.profiles() {
        let categories = scoped_categories(&profile, None);
        let pending = select_pending(
            store.as_ref(),
            "acme",
            &profile.product_id,
            categories.as_deref(),
            None,
        )
        .await
        .unwrap();
        assert!(pending.is_empty(), "{} still pending", profile.product_id);
    }
    // ProfitDoctor only targets shopify, so the saas item has one record.
    assert_eq!(store.analysis_count().unwrap(), 5);
}

#[tokio::test]
async fn stat_change_rescores_and_failed_enrichment_keeps_stored_result() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item()]).await;
    let enricher = CountingEnricher::new();
    let p = pipeline(&store, enricher.clone());
    let tenant = tenant();

    p.score(&request(&tenant, ScoreMode::Incremental, None))
        .await
        .unwrap();
    store.update_item_stats("t3_hot", 50, 9).await.unwrap();
    enricher.fail.store(true, Ordering::SeqCst);

    let report = p
        .score(&request(&tenant, ScoreMode::Incremental, None))
        .await
        .unwrap();
    assert_eq!(report.items, 1);
    assert_eq!(report.enrich_errors, 1);
    assert_eq!(enricher.calls(), 2);

    let record = store
        .get_analysis(&key("t3_hot", "profit-doctor"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.snapshot_score, 50);
    assert_eq!(record.snapshot_replies, 9);
    assert_eq!(record.enrichment, Enrichment::Result(good_result()));
}

#[tokio::test]
async fn enrichment_timeout_is_recorded_without_failing_the_pass() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item()]).await;
    let enricher = CountingEnricher::slow(Duration::from_secs(2));
    let p = pipeline_with(
        &store,
        KeywordEmbedder::new(),
        enricher.clone(),
        "http://127.0.0.1:1",
        Duration::from_millis(50),
    );

    let report = p
        .score(&request(&tenant(), ScoreMode::Incremental, None))
        .await
        .unwrap();
    assert_eq!(report.enrich_errors, 1);

    let record = store
        .get_analysis(&key("t3_hot", "profit-doctor"))
        .await
        .unwrap()
        .unwrap();
    assert!(record.relevance >= 20.0);
    match record.enrichment {
        Enrichment::Error { message } => assert!(message.contains("timed out"), "{message}"),
        other => panic!("expected error payload, got {other:?}"),
    }
}

#[tokio::test]
async fn scored_items_get_an_embedding_ref() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item()]).await;
    let p = pipeline(&store, CountingEnricher::new());

    p.score(&request(&tenant(), ScoreMode::Incremental, None))
        .await
        .unwrap();

    let stored = store.get_item("t3_hot").await.unwrap().unwrap();
    assert_eq!(
        stored.embedding_ref.as_deref(),
        Some(radar_scoring::embedding_ref(&hot_item().scoring_text()).as_str())
    );
}

#[tokio::test]
async fn global_mode_marks_items_processed() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item(), quiet_item()]).await;
    let p = pipeline(&store, CountingEnricher::new());
    let tenant = tenant();

    let first = p
        .score(&request(&tenant, ScoreMode::Global, None))
        .await
        .unwrap();
    assert_eq!(first.items, 2);
    let stored = store.get_item("t3_hot").await.unwrap().unwrap();
    assert_eq!(stored.processed_score, 10);
    assert_eq!(stored.processed_replies, 5);

    let second = p
        .score(&request(&tenant, ScoreMode::Global, None))
        .await
        .unwrap();
    assert_eq!(second.items, 0);

    let forced = p
        .score(&request(&tenant, ScoreMode::Force, None))
        .await
        .unwrap();
    assert_eq!(forced.items, 2);
}

#[tokio::test]
async fn embedding_failure_fails_the_pass() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item()]).await;
    let p = pipeline_with(
        &store,
        Arc::new(DownEmbedder),
        CountingEnricher::new(),
        "http://127.0.0.1:1",
        Duration::from_secs(5),
    );

    let err = p
        .score(&request(&tenant(), ScoreMode::Incremental, None))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("TEI down"));
    assert_eq!(store.analysis_count().unwrap(), 0);
}

#[test]
fn category_scope_intersects_product_targets() {
    let profiles = tenant().profiles();
    let profit = &profiles[0];
    let churn = &profiles[1];
    let requested = vec!["SaaS".to_string(), "Shopify".to_string()];

    assert_eq!(scoped_categories(churn, None), None);
    assert_eq!(
        scoped_categories(churn, Some(requested.as_slice())),
        Some(requested.clone())
    );
    assert_eq!(
        scoped_categories(profit, None),
        Some(vec!["shopify".to_string()])
    );
    assert_eq!(
        scoped_categories(profit, Some(requested.as_slice())),
        Some(vec!["Shopify".to_string()])
    );
    assert_eq!(
        scoped_categories(profit, Some(&["saas".to_string()][..])),
        Some(vec![])
    );
}

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

fn post_thing(id: &str, title: &str, body: &str) -> Value {
    #[allow(clippy::cast_precision_loss)]
    let created = (Utc::now() - chrono::Duration::hours(1)).timestamp() as f64;
    json!({
        "kind": "t3",
        "data": {
            "name": format!("t3_{id}"),
            "title": title,
            "selftext": body,
            "author": "alice",
            "score": 12,
            "num_comments": 0,
            "created_utc": created,
            "permalink": format!("/r/shopify/comments/{id}/slug/"),
            "subreddit": "shopify"
        }
    })
}

fn listing(children: Vec<Value>) -> Value {
    json!({"kind": "Listing", "data": {"after": null, "children": children}})
}

async fn mount_source(server: &MockServer) {
    let title = "Looking for a tool to track profit";
    Mock::given(method("GET"))
        .and(path("/r/shopify/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![post_thing(
            "p1", title, "",
        )])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/by_id/t3_p1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![post_thing(
            "p1",
            title,
            "My margins disappear after ad spend.",
        )])))
        .expect(1)
        .mount(server)
        .await;
}

fn run_request(only_product: Option<&str>) -> RunRequest {
    RunRequest {
        tenant: tenant(),
        categories: vec!["shopify".to_string()],
        only_product: only_product.map(str::to_string),
        max_age_days: 7,
    }
}

#[tokio::test]
async fn successful_run_harvests_scores_and_ends_succeeded() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    let store = Arc::new(MemoryStore::new());
    let enricher = CountingEnricher::new();
    let p = pipeline_with(
        &store,
        KeywordEmbedder::new(),
        enricher.clone(),
        &server.uri(),
        Duration::from_secs(5),
    );

    let status = p.run_pipeline(&run_request(None)).await.unwrap();

    assert_eq!(status.state, RunState::Succeeded);
    assert_eq!(status.step, "Success");
    assert_eq!(status.progress_percent, 100);
    assert!(status.error.is_none());
    assert!(status.finished_at.is_some());
    assert_eq!(store.item_count().unwrap(), 1);
    assert_eq!(store.analysis_count().unwrap(), 2);
    assert_eq!(enricher.calls(), 1);
}

#[tokio::test]
async fn embedding_outage_ends_run_failed_with_message() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(
        &store,
        Arc::new(DownEmbedder),
        CountingEnricher::new(),
        &server.uri(),
        Duration::from_secs(5),
    );

    let status = p.run_pipeline(&run_request(None)).await.unwrap();

    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.step, "Error");
    assert_eq!(status.progress_percent, 100);
    assert!(status.error.unwrap().contains("TEI down"));
    // Harvested items are kept even though scoring failed.
    assert_eq!(store.item_count().unwrap(), 1);
}

#[tokio::test]
async fn unknown_product_fails_the_run_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![])))
        .expect(0)
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(
        &store,
        KeywordEmbedder::new(),
        CountingEnricher::new(),
        &server.uri(),
        Duration::from_secs(5),
    );

    let status = p.run_pipeline(&run_request(Some("nope"))).await.unwrap();

    assert_eq!(status.state, RunState::Failed);
    assert!(status.error.unwrap().contains("'nope' not found"));
}

#[tokio::test]
async fn run_pipeline_can_be_spawned() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    let store = Arc::new(MemoryStore::new());
    let p = Arc::new(pipeline_with(
        &store,
        KeywordEmbedder::new(),
        CountingEnricher::new(),
        &server.uri(),
        Duration::from_secs(5),
    ));

    let handle = tokio::spawn({
        let p = Arc::clone(&p);
        async move {
            let request = run_request(None);
            p.run_pipeline(&request).await
        }
    });

    let status = handle.await.unwrap().unwrap();
    assert_eq!(status.state, RunState::Succeeded);
}

// ---------------------------------------------------------------------------
// Heartbeats
// ---------------------------------------------------------------------------

const SLOW_POSTS: usize = 6;

async fn mount_slow_source(server: &MockServer, detail_delay: Duration) {
    let ids: Vec<String> = (0..SLOW_POSTS).map(|i| format!("s{i}")).collect();
    Mock::given(method("GET"))
        .and(path("/r/shopify/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(
            ids.iter()
                .map(|id| post_thing(id, "Looking for a tool to track profit", ""))
                .collect(),
        )))
        .mount(server)
        .await;
    for id in &ids {
        Mock::given(method("GET"))
            .and(path(format!("/by_id/t3_{id}.json")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(listing(vec![post_thing(
                        id,
                        "Looking for a tool to track profit",
                        "Margins vanish every month.",
                    )]))
                    .set_delay(detail_delay),
            )
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn reaper_leaves_a_run_alone_while_it_harvests() {
    let server = MockServer::start().await;
    mount_slow_source(&server, Duration::from_millis(150)).await;
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(
        &store,
        KeywordEmbedder::new(),
        CountingEnricher::new(),
        &server.uri(),
        Duration::from_secs(5),
    );
    let request = run_request(None);

    // Fires mid-harvest with a window far longer than one deep fetch.
    let reaper = async {
        tokio::time::sleep(Duration::from_millis(700)).await;
        let harvested = store.item_count().unwrap();
        let reaped = store
            .reap_stalled_runs(Utc::now() - chrono::Duration::milliseconds(400))
            .await
            .unwrap();
        (harvested, reaped)
    };
    let (status, (harvested_at_reap, reaped)) = tokio::join!(p.run_pipeline(&request), reaper);
    let status = status.unwrap();

    assert!(harvested_at_reap < SLOW_POSTS, "reaper ran after the harvest");
    assert_eq!(reaped, 0);
    assert_eq!(status.state, RunState::Succeeded);
    assert_eq!(store.item_count().unwrap(), SLOW_POSTS);
    assert_eq!(store.analysis_count().unwrap(), SLOW_POSTS * 2);
}

#[tokio::test]
async fn scoring_pass_refreshes_its_run() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[hot_item(), quiet_item()]).await;
    let p = pipeline(&store, CountingEnricher::new());
    let tenant = tenant();
    let run = store.create_run("acme").await.unwrap();
    let stale = Utc::now() - chrono::Duration::hours(1);
    store.backdate_run(run.run_id, stale).unwrap();

    p.score(&ScoreRequest {
        run_id: Some(run.run_id),
        ..request(&tenant, ScoreMode::Incremental, None)
    })
    .await
    .unwrap();

    let status = store.get_run(run.run_id).await.unwrap().unwrap();
    assert!(status.updated_at > stale + chrono::Duration::minutes(30));
    assert_eq!(status.step, STEP_PROCESS);
    assert_eq!(status.progress_percent, 60);
    assert_eq!(status.state, RunState::Running);
}

#[test]
fn harvest_progress_spans_ten_to_fifty() {
    assert_eq!(harvest_progress(0, 1), 10);
    assert_eq!(harvest_progress(0, 4), 10);
    assert_eq!(harvest_progress(1, 2), 30);
    assert_eq!(harvest_progress(3, 4), 40);
    assert_eq!(harvest_progress(0, 0), 10);
}
