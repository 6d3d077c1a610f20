//! End-to-end checks against the public crate surface: extraction
//! through the cursor boundary, queue serialization, and the
//! on-demand refresh path from scrape result to stored document.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pagewatch::config::Settings;
use pagewatch::extract::extract;
use pagewatch::identity::IdentityRotator;
use pagewatch::models::{FieldRule, Filters, Link, Selectors, Template, User, UserPage};
use pagewatch::queue::{
    Job, JobOutput, JobQueue, JobSpec, QueueRegistry, RegistryWorkers, ScrapeTarget,
};
use pagewatch::scheduler::Scheduler;
use pagewatch::stats::Stats;
use pagewatch::store::{CachedTemplates, MemoryStore, TemplateStore, UserStore};
use pagewatch::workers::{PersistWorker, Worker, WorkerError};

fn feed_selectors() -> Selectors {
    Selectors {
        list: "ul.feed > li".into(),
        wait_for: None,
        id: FieldRule::attr("a", "data-id"),
        url: FieldRule::attr("a", "href"),
        title: FieldRule::text("a"),
        content: None,
        image: None,
        date: None,
        author: None,
    }
}

fn feed_html(ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li><a data-id="{id}" href="https://example.com/{id}">Post {id}</a></li>"#
            )
        })
        .collect();
    format!("<html><body><ul class=\"feed\">{items}</ul></body></html>")
}

/// Returns canned links for every scrape job.
struct CannedFetchWorker {
    links: Vec<Link>,
}

#[async_trait]
impl Worker for CannedFetchWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        match &job.spec {
            JobSpec::Scrape(_) => Ok(JobOutput::Links(self.links.clone())),
            _ => Err(WorkerError::UnsupportedJob),
        }
    }
}

struct CountingWorker {
    active: AtomicU32,
    max_seen: AtomicU32,
}

#[async_trait]
impl Worker for CountingWorker {
    async fn execute(&self, _job: &Job) -> Result<JobOutput, WorkerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(JobOutput::Links(Vec::new()))
    }
}

fn canned_link(id: &str) -> Link {
    Link {
        id: id.to_string(),
        url: format!("https://example.com/{id}"),
        title: format!("Post {id}"),
        content: None,
        image: None,
        author: None,
        date: 0,
    }
}

fn subscribed_user(id: &str, shard: u32) -> User {
    User {
        id: id.to_string(),
        username: id.to_string(),
        shard,
        last_login: pagewatch::models::now_ms(),
        pages: vec![UserPage {
            id: format!("{id}-p0"),
            title: "feed".into(),
            template_id: "t1".into(),
            page_url: "https://example.com/feed".into(),
            notifications: 0,
            last_update: 0,
            links: Vec::new(),
            muted: false,
            filters: Filters::default(),
            updated: false,
        }],
        votes: serde_json::Value::Null,
    }
}

fn feed_template() -> Template {
    Template {
        id: "t1".into(),
        name: "feed".into(),
        dynamic: false,
        update_interval: 4,
        sample_urls: vec!["https://example.com/feed".into()],
        url_pattern: "^https://example\\.com/".into(),
        selectors: feed_selectors(),
    }
}

fn scheduler_over(
    store: Arc<MemoryStore>,
    fetch_worker: Arc<dyn Worker>,
    settings: Settings,
) -> (Arc<Scheduler>, Arc<Stats>) {
    let users: Arc<dyn UserStore> = store.clone();
    let stats = Arc::new(Stats::new());
    let queues = Arc::new(QueueRegistry::new(
        &settings.queues,
        &settings.limits,
        RegistryWorkers {
            static_scraper: fetch_worker.clone(),
            dynamic_scraper: fetch_worker.clone(),
            proxy_scraper: fetch_worker,
            page: Arc::new(PersistWorker::new(users.clone())),
        },
        stats.clone(),
    ));
    let scheduler = Scheduler::new(
        settings,
        users,
        Arc::new(CachedTemplates::new(store.clone() as Arc<dyn TemplateStore>)),
        store,
        stats.clone(),
        Arc::new(IdentityRotator::default()),
        queues,
    );
    (scheduler, stats)
}

#[test]
fn extraction_returns_only_items_above_the_cursor() {
    // Three items newest-first, cursor on the middle one.
    let html = feed_html(&["3", "2", "1"]);
    let links = extract(
        &feed_selectors(),
        &Filters::default(),
        Some("2"),
        &html,
        "https://example.com/feed",
    );

    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, "3");
    assert_eq!(links[0].title, "Post 3");
}

#[test]
fn extraction_without_cursor_returns_everything() {
    let html = feed_html(&["3", "2", "1"]);
    let links = extract(
        &feed_selectors(),
        &Filters::default(),
        None,
        &html,
        "https://example.com/feed",
    );
    assert_eq!(links.len(), 3);
    assert_eq!(links[0].id, "3");
    assert_eq!(links[2].id, "1");
}

#[tokio::test]
async fn queue_with_concurrency_one_serializes_jobs() {
    let stats = Arc::new(Stats::new());
    let worker = Arc::new(CountingWorker {
        active: AtomicU32::new(0),
        max_seen: AtomicU32::new(0),
    });
    let queue = JobQueue::new("static_scraper", worker.clone(), 1, 3, stats);
    queue.start();

    for _ in 0..3 {
        queue.push(
            Job::scrape(
                ScrapeTarget {
                    shard: 1,
                    page: pagewatch::queue::PageRef::Direct {
                        user_id: "u1".into(),
                        page_index: 0,
                    },
                    url: "https://example.com/feed".into(),
                    selectors: Arc::new(feed_selectors()),
                    filters: Filters::default(),
                    cursor: None,
                },
                true,
            ),
            None,
        );
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(worker.max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(queue.waiting(), 0);
}

#[tokio::test]
async fn refresh_merges_and_persists_one_page() {
    let store = Arc::new(MemoryStore::new());
    store.insert_template(feed_template()).await;
    store.insert_user(subscribed_user("u1", 1)).await;

    let fetch = Arc::new(CannedFetchWorker {
        links: vec![canned_link("a"), canned_link("b")],
    });
    let (scheduler, stats) = scheduler_over(store.clone(), fetch, Settings::default());

    scheduler.refresh("u1", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let user = store.user("u1").await.unwrap();
    let page = &user.pages[0];
    assert_eq!(page.links.len(), 2);
    assert_eq!(page.links[0].id, "a");
    assert_eq!(page.notifications, 2);
    assert!(page.last_update > 0);
    assert_eq!(stats.snapshot().jobs_refreshed, 1);
}

#[tokio::test]
async fn merged_link_list_never_exceeds_the_cap() {
    let store = Arc::new(MemoryStore::new());
    store.insert_template(feed_template()).await;
    store.insert_user(subscribed_user("u1", 1)).await;

    let oversized: Vec<Link> = (0..80).map(|i| canned_link(&format!("l{i}"))).collect();
    let fetch = Arc::new(CannedFetchWorker { links: oversized });
    let settings = Settings::default();
    let cap = settings.limits.max_page_links;
    let (scheduler, _stats) = scheduler_over(store.clone(), fetch, settings);

    scheduler.refresh("u1", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let user = store.user("u1").await.unwrap();
    assert_eq!(user.pages[0].links.len(), cap);
    assert_eq!(user.pages[0].notifications, cap as u32);
}

/// Fails every scrape job handed to it.
struct BrokenFetchWorker;

#[async_trait]
impl Worker for BrokenFetchWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        match &job.spec {
            JobSpec::Scrape(target) => Err(WorkerError::Status {
                status: 500,
                url: target.url.clone(),
            }),
            _ => Err(WorkerError::UnsupportedJob),
        }
    }
}

#[tokio::test]
async fn refresh_is_counted_when_requested_even_if_the_scrape_fails() {
    let store = Arc::new(MemoryStore::new());
    store.insert_template(feed_template()).await;
    store.insert_user(subscribed_user("u1", 1)).await;

    let (scheduler, stats) =
        scheduler_over(store.clone(), Arc::new(BrokenFetchWorker), Settings::default());

    scheduler.refresh("u1", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(stats.snapshot().jobs_refreshed, 1);
    assert!(store.user("u1").await.unwrap().pages[0].links.is_empty());
}

#[tokio::test]
async fn muted_page_is_not_refreshed() {
    let store = Arc::new(MemoryStore::new());
    store.insert_template(feed_template()).await;
    let mut user = subscribed_user("u1", 1);
    user.pages[0].muted = true;
    store.insert_user(user).await;

    let fetch = Arc::new(CannedFetchWorker {
        links: vec![canned_link("a")],
    });
    let (scheduler, stats) = scheduler_over(store.clone(), fetch, Settings::default());

    scheduler.refresh("u1", 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(store.user("u1").await.unwrap().pages[0].links.is_empty());
    assert_eq!(stats.snapshot().jobs_refreshed, 0);
}
