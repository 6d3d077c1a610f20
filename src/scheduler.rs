//! Cycle state machine and top-level orchestration.
//!
//! One shard is scraped and persisted per cycle: Init clears leftover
//! scheduled work and advances the shard, Scraping emits one scrape
//! job per eligible page, Updating persists every page the results
//! changed. Phases are timer-driven, not completion-driven; results
//! landing after the phase moved on are reconciled by the staleness
//! check instead of cancellation.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::identity::IdentityRotator;
use crate::models::{now_ms, Link, UserPage};
use crate::queue::{CompletedJob, Job, JobSpec, PageRef, QueueRegistry, ScrapeTarget};
use crate::stats::Stats;
use crate::store::{CachedTemplates, StatsStore, UserStore};

/// Live cycle: which shard is in flight and whether its scraping
/// phase is still open. The loaded user list doubles as the merge
/// target for completion callbacks.
struct CycleState {
    shard: u32,
    users: Vec<crate::models::User>,
    is_scraping: bool,
}

pub struct Scheduler {
    settings: Settings,
    users: Arc<dyn UserStore>,
    templates: Arc<CachedTemplates>,
    stats_store: Arc<dyn StatsStore>,
    stats: Arc<Stats>,
    rotator: Arc<IdentityRotator>,
    queues: Arc<QueueRegistry>,
    cycle: Mutex<CycleState>,
}

/// Next shard in the cycle, wrapping back to 1 after the last.
fn advance_shard(shard: u32, shards: u32) -> u32 {
    if shard >= shards {
        1
    } else {
        shard + 1
    }
}

/// Prepend freshly extracted links to a page, newest first.
///
/// Links whose id is already present are skipped, so replaying the
/// same result is harmless. The list and the notification counter are
/// both capped at `max_links`.
fn merge_links(page: &mut UserPage, links: &[Link], max_links: usize, now: i64) {
    let fresh: Vec<Link> = links
        .iter()
        .filter(|link| !page.links.iter().any(|known| known.id == link.id))
        .cloned()
        .collect();

    if !fresh.is_empty() {
        let added = fresh.len() as u32;
        let mut merged = fresh;
        merged.append(&mut page.links);
        merged.truncate(max_links);
        page.links = merged;
        page.notifications = (page.notifications + added).min(max_links as u32);
        page.updated = true;
    }
    page.last_update = now;
}

impl Scheduler {
    pub fn new(
        settings: Settings,
        users: Arc<dyn UserStore>,
        templates: Arc<CachedTemplates>,
        stats_store: Arc<dyn StatsStore>,
        stats: Arc<Stats>,
        rotator: Arc<IdentityRotator>,
        queues: Arc<QueueRegistry>,
    ) -> Arc<Self> {
        // Start just before shard 1 so the first Init lands on it.
        let shard = settings.cycle.shards;
        Arc::new(Self {
            settings,
            users,
            templates,
            stats_store,
            stats,
            rotator,
            queues,
            cycle: Mutex::new(CycleState {
                shard,
                users: Vec::new(),
                is_scraping: false,
            }),
        })
    }

    /// Block until the rotator holds a viable proxy pool, driving one
    /// harvest job through the proxy queue. Fatal on timeout: without
    /// proxies every scrape of the first cycle would burn its trials.
    pub async fn preload_proxies(&self) -> Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.queues.proxy_scraper().push(
            Job::harvest_proxies(),
            Some(Arc::new(move |_completed: CompletedJob| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            })),
        );

        let _ = tokio::time::timeout(self.settings.proxy.preload_timeout(), rx)
            .await
            .context("timed out waiting for the initial proxy harvest")?;

        if !self.rotator.has_proxies() {
            bail!(
                "proxy pool below viability threshold after preload ({} held)",
                self.rotator.proxy_count()
            );
        }
        info!(proxies = self.rotator.proxy_count(), "proxy pool preloaded");
        Ok(())
    }

    /// Preload the proxy pool, start the periodic loops, and run the
    /// shard cycle forever.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.preload_proxies().await?;

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.proxy_refresh_loop().await });
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.stats_persist_loop().await });

        let cycle = &self.settings.cycle;
        let scrape_window = cycle.scrape_phase() + cycle.buffer();
        let update_window = cycle.update_phase() + cycle.buffer();

        loop {
            self.init_state();
            self.scraping_state().await;
            tokio::time::sleep(scrape_window).await;

            self.update_state();
            tokio::time::sleep(update_window).await;

            self.stats.log(self.current_shard());
        }
    }

    pub fn current_shard(&self) -> u32 {
        self.cycle.lock().unwrap().shard
    }

    /// Reset for the next shard: drop leftover scheduled jobs, advance
    /// the counter, forget the old user list, reshuffle identities.
    fn init_state(&self) {
        self.queues.static_scraper().clear();
        self.queues.dynamic_scraper().clear();
        self.queues.page().clear();

        let mut cycle = self.cycle.lock().unwrap();
        if cycle.is_scraping {
            warn!(shard = cycle.shard, "entering init while still scraping");
        }
        cycle.shard = advance_shard(cycle.shard, self.settings.cycle.shards);
        cycle.users.clear();
        cycle.is_scraping = false;
        info!(shard = cycle.shard, "cycle init");
        drop(cycle);

        self.rotator.shuffle();
    }

    /// Load the shard's users and emit one scrape job per eligible
    /// page. Runs for a fixed window; completions stream back through
    /// [`Scheduler::on_scrape_job_done`].
    async fn scraping_state(self: &Arc<Self>) {
        let shard = self.current_shard();
        let mut users = match self.users.find_by_shard(shard).await {
            Ok(users) => users,
            Err(err) => {
                error!(shard, "failed to load shard users: {err}");
                return;
            }
        };
        // Randomize fetch order so targets never see a fixed pattern.
        fastrand::shuffle(&mut users);

        let now = now_ms();
        let mut jobs = 0usize;
        {
            let mut cycle = self.cycle.lock().unwrap();
            cycle.users = users;
            cycle.is_scraping = true;
        }

        let snapshot: Vec<(usize, String, Vec<UserPage>)> = {
            let cycle = self.cycle.lock().unwrap();
            cycle
                .users
                .iter()
                .enumerate()
                .filter(|(_, user)| user.is_active(now))
                .map(|(index, user)| (index, user.id.clone(), user.pages.clone()))
                .collect()
        };

        for (user_index, user_id, pages) in snapshot {
            for (page_index, page) in pages.iter().enumerate() {
                let sent = self
                    .send_scrape_job(
                        shard,
                        PageRef::Cycle {
                            user_index,
                            page_index,
                        },
                        page,
                        now,
                        true,
                    )
                    .await;
                if sent {
                    jobs += 1;
                } else {
                    debug!(user = %user_id, page = %page.id, "page skipped this cycle");
                }
            }
        }
        info!(shard, jobs, "scraping phase started");
    }

    /// Resolve the page's template and push a scrape job to the queue
    /// matching its `dynamic` flag. Returns false when the page is not
    /// eligible or its template is missing.
    async fn send_scrape_job(
        self: &Arc<Self>,
        shard: u32,
        page_ref: PageRef,
        page: &UserPage,
        now: i64,
        scheduled: bool,
    ) -> bool {
        let template = match self.templates.find_by_id(&page.template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                warn!(
                    page = %page.id,
                    template = %page.template_id,
                    "template missing, page skipped"
                );
                return false;
            }
            Err(err) => {
                warn!(page = %page.id, "template lookup failed: {err}");
                return false;
            }
        };

        if !page.can_update(template.update_interval, now) {
            return false;
        }

        let job = Job::scrape(
            ScrapeTarget {
                shard,
                page: page_ref,
                url: page.page_url.clone(),
                selectors: Arc::new(template.selectors.clone()),
                filters: page.filters.clone(),
                cursor: page.cursor(),
            },
            scheduled,
        );

        let scheduler = self.clone();
        self.queues.scraper(template.dynamic).push(
            job,
            Some(Arc::new(move |completed: CompletedJob| {
                scheduler.on_scrape_job_done(completed);
            })),
        );
        true
    }

    /// Reconcile a finished scrape against the live cycle. Results
    /// from an older shard, or landing after the scraping phase
    /// closed, are counted as delayed and dropped; the page's stored
    /// state stays as the cycle that owns it left it.
    fn on_scrape_job_done(&self, completed: CompletedJob) {
        let target = match &completed.job.spec {
            JobSpec::Scrape(target) => target,
            _ => return,
        };
        let (user_index, page_index) = match target.page {
            PageRef::Cycle {
                user_index,
                page_index,
            } => (user_index, page_index),
            // On-demand results take the refresh path, not this one.
            PageRef::Direct { .. } => return,
        };

        let mut cycle = self.cycle.lock().unwrap();
        if target.shard != cycle.shard || !cycle.is_scraping {
            debug!(
                job = %completed.job.id,
                shard = target.shard,
                live_shard = cycle.shard,
                is_scraping = cycle.is_scraping,
                "stale scrape result dropped"
            );
            self.stats.job_delayed();
            return;
        }

        let Some(page) = cycle
            .users
            .get_mut(user_index)
            .and_then(|user| user.pages.get_mut(page_index))
        else {
            warn!(job = %completed.job.id, "scrape result for unknown page slot");
            return;
        };

        merge_links(
            page,
            completed.links(),
            self.settings.limits.max_page_links,
            now_ms(),
        );
    }

    /// Close the scraping phase and push one persistence job per user
    /// whose pages changed.
    fn update_state(&self) {
        let mut cycle = self.cycle.lock().unwrap();
        cycle.is_scraping = false;
        let shard = cycle.shard;

        self.queues.static_scraper().clear();
        self.queues.dynamic_scraper().clear();

        let mut jobs = 0usize;
        for user in &mut cycle.users {
            let changed: Vec<(usize, UserPage)> = user
                .pages
                .iter_mut()
                .enumerate()
                .filter(|(_, page)| page.updated)
                .map(|(index, page)| {
                    page.updated = false;
                    (index, page.clone())
                })
                .collect();
            if changed.is_empty() {
                continue;
            }
            self.queues
                .page()
                .push(Job::persist(user.id.clone(), changed, true), None);
            jobs += 1;
        }
        info!(shard, jobs, "updating phase started");
    }

    /// On-demand refresh of one page, bypassing shard and phase
    /// gating. Eligibility still applies; an ineligible page is a
    /// quiet no-op. The result is merged and persisted immediately.
    pub async fn refresh(self: &Arc<Self>, user_id: &str, page_index: usize) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .with_context(|| format!("unknown user {user_id}"))?;
        let page = user
            .pages
            .get(page_index)
            .with_context(|| format!("user {user_id} has no page {page_index}"))?;

        let sent = self
            .send_refresh_job(user_id.to_string(), page_index, page)
            .await;
        if !sent {
            debug!(user = %user_id, page = %page.id, "refresh skipped, page not eligible");
        }
        Ok(())
    }

    async fn send_refresh_job(
        self: &Arc<Self>,
        user_id: String,
        page_index: usize,
        page: &UserPage,
    ) -> bool {
        let template = match self.templates.find_by_id(&page.template_id).await {
            Ok(Some(template)) => template,
            _ => return false,
        };
        if !page.can_update(template.update_interval, now_ms()) {
            return false;
        }

        let job = Job::scrape(
            ScrapeTarget {
                shard: self.current_shard(),
                page: PageRef::Direct {
                    user_id,
                    page_index,
                },
                url: page.page_url.clone(),
                selectors: Arc::new(template.selectors.clone()),
                filters: page.filters.clone(),
                cursor: page.cursor(),
            },
            false,
        );

        let scheduler = self.clone();
        self.queues.scraper(template.dynamic).push(
            job,
            Some(Arc::new(move |completed: CompletedJob| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.apply_refresh(completed).await });
            })),
        );
        // A refresh counts when it is requested, whether or not the
        // scrape behind it ends up succeeding.
        self.stats.job_refreshed();
        true
    }

    /// Merge an on-demand result against the stored document and
    /// persist that single page, independent of the update phase.
    async fn apply_refresh(self: Arc<Self>, completed: CompletedJob) {
        let target = match &completed.job.spec {
            JobSpec::Scrape(target) => target,
            _ => return,
        };
        let (user_id, page_index) = match &target.page {
            PageRef::Direct {
                user_id,
                page_index,
            } => (user_id.clone(), *page_index),
            PageRef::Cycle { .. } => return,
        };

        let user = match self.users.find_by_id(&user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user = %user_id, "refresh result for unknown user");
                return;
            }
            Err(err) => {
                warn!(user = %user_id, "refresh merge failed: {err}");
                return;
            }
        };
        let Some(mut page) = user.pages.get(page_index).cloned() else {
            warn!(user = %user_id, page_index, "refresh result for unknown page slot");
            return;
        };

        merge_links(
            &mut page,
            completed.links(),
            self.settings.limits.max_page_links,
            now_ms(),
        );
        page.updated = false;

        self.queues
            .page()
            .push(Job::persist(user_id, vec![(page_index, page)], false), None);
    }

    /// Keep the proxy pool fresh, decoupled from the shard cycle.
    /// Failures ride the queue's retry path and are never fatal.
    async fn proxy_refresh_loop(&self) {
        let period = self.settings.proxy.refresh_period();
        loop {
            tokio::time::sleep(period).await;
            debug!("refreshing proxy pool");
            self.queues.proxy_scraper().push(Job::harvest_proxies(), None);
        }
    }

    async fn stats_persist_loop(&self) {
        let period = self.settings.stats.persist_period();
        loop {
            tokio::time::sleep(period).await;
            self.stats.persist(self.stats_store.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::queue::JobOutput;
    use crate::store::{MemoryStore, TemplateStore};
    use crate::workers::{Worker, WorkerError};
    use async_trait::async_trait;

    struct NoopWorker;

    #[async_trait]
    impl Worker for NoopWorker {
        async fn execute(&self, _job: &Job) -> Result<JobOutput, WorkerError> {
            Ok(JobOutput::Persisted)
        }
    }

    fn link(id: &str) -> Link {
        Link {
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: id.to_string(),
            content: None,
            image: None,
            author: None,
            date: 0,
        }
    }

    fn page_with_links(ids: &[&str]) -> UserPage {
        UserPage {
            id: "p1".into(),
            title: "p1".into(),
            template_id: "t1".into(),
            page_url: "https://example.com/feed".into(),
            notifications: 0,
            last_update: 0,
            links: ids.iter().map(|id| link(id)).collect(),
            muted: false,
            filters: Default::default(),
            updated: false,
        }
    }

    fn scheduler_with_store(store: Arc<MemoryStore>, settings: Settings) -> Arc<Scheduler> {
        let stats = Arc::new(Stats::new());
        let worker: Arc<dyn Worker> = Arc::new(NoopWorker);
        let queues = Arc::new(QueueRegistry::new(
            &settings.queues,
            &settings.limits,
            crate::queue::RegistryWorkers {
                static_scraper: worker.clone(),
                dynamic_scraper: worker.clone(),
                proxy_scraper: worker.clone(),
                page: worker,
            },
            stats.clone(),
        ));
        Scheduler::new(
            settings,
            store.clone(),
            Arc::new(CachedTemplates::new(store.clone() as Arc<dyn TemplateStore>)),
            store,
            stats,
            Arc::new(IdentityRotator::default()),
            queues,
        )
    }

    #[test]
    fn test_shard_advances_and_wraps() {
        assert_eq!(advance_shard(2, 5), 3);
        assert_eq!(advance_shard(5, 5), 1);
        assert_eq!(advance_shard(1, 1), 1);
    }

    #[test]
    fn test_merge_prepends_newest_first_and_caps() {
        let mut page = page_with_links(&["c", "d"]);
        merge_links(&mut page, &[link("a"), link("b")], 3, 123);

        let ids: Vec<&str> = page.links.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(page.notifications, 2);
        assert_eq!(page.last_update, 123);
        assert!(page.updated);
    }

    #[test]
    fn test_merge_is_idempotent_for_known_ids() {
        let mut page = page_with_links(&["a", "b"]);
        merge_links(&mut page, &[link("a"), link("b")], 50, 123);

        assert_eq!(page.links.len(), 2);
        assert_eq!(page.notifications, 0);
        assert!(!page.updated);
        // the attempt still counts as a completed check
        assert_eq!(page.last_update, 123);
    }

    #[test]
    fn test_notifications_capped_at_link_limit() {
        let mut page = page_with_links(&[]);
        page.notifications = 49;
        let fresh: Vec<Link> = (0..10).map(|i| link(&format!("n{i}"))).collect();
        merge_links(&mut page, &fresh, 50, 123);

        assert_eq!(page.links.len(), 10);
        assert_eq!(page.notifications, 50);
    }

    #[tokio::test]
    async fn test_stale_shard_result_is_never_merged() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store, Settings::default());
        {
            let mut cycle = scheduler.cycle.lock().unwrap();
            cycle.shard = 1;
            cycle.is_scraping = true;
            cycle.users = vec![User {
                id: "u1".into(),
                username: "ada".into(),
                shard: 1,
                last_login: now_ms(),
                pages: vec![page_with_links(&[])],
                votes: serde_json::Value::Null,
            }];
        }

        let completed = CompletedJob {
            job: Job::scrape(
                ScrapeTarget {
                    shard: 2,
                    page: PageRef::Cycle {
                        user_index: 0,
                        page_index: 0,
                    },
                    url: "https://example.com/feed".into(),
                    selectors: Arc::new(Default::default()),
                    filters: Default::default(),
                    cursor: None,
                },
                true,
            ),
            output: JobOutput::Links(vec![link("a")]),
        };
        scheduler.on_scrape_job_done(completed);

        let cycle = scheduler.cycle.lock().unwrap();
        assert!(cycle.users[0].pages[0].links.is_empty());
        assert_eq!(scheduler.stats.snapshot().jobs_delayed, 1);
    }

    #[tokio::test]
    async fn test_result_after_scraping_phase_counts_delayed() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store, Settings::default());
        {
            let mut cycle = scheduler.cycle.lock().unwrap();
            cycle.shard = 1;
            cycle.is_scraping = false;
            cycle.users = vec![User {
                id: "u1".into(),
                username: "ada".into(),
                shard: 1,
                last_login: now_ms(),
                pages: vec![page_with_links(&[])],
                votes: serde_json::Value::Null,
            }];
        }

        let completed = CompletedJob {
            job: Job::scrape(
                ScrapeTarget {
                    shard: 1,
                    page: PageRef::Cycle {
                        user_index: 0,
                        page_index: 0,
                    },
                    url: "https://example.com/feed".into(),
                    selectors: Arc::new(Default::default()),
                    filters: Default::default(),
                    cursor: None,
                },
                true,
            ),
            output: JobOutput::Links(vec![link("a")]),
        };
        scheduler.on_scrape_job_done(completed);

        let cycle = scheduler.cycle.lock().unwrap();
        assert!(cycle.users[0].pages[0].links.is_empty());
        assert_eq!(scheduler.stats.snapshot().jobs_delayed, 1);
    }

    #[tokio::test]
    async fn test_update_state_persists_only_changed_pages() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store, Settings::default());
        {
            let mut cycle = scheduler.cycle.lock().unwrap();
            cycle.shard = 1;
            cycle.is_scraping = true;
            let mut changed = page_with_links(&["a"]);
            changed.updated = true;
            cycle.users = vec![
                User {
                    id: "u1".into(),
                    username: "ada".into(),
                    shard: 1,
                    last_login: now_ms(),
                    pages: vec![changed],
                    votes: serde_json::Value::Null,
                },
                User {
                    id: "u2".into(),
                    username: "grace".into(),
                    shard: 1,
                    last_login: now_ms(),
                    pages: vec![page_with_links(&["b"])],
                    votes: serde_json::Value::Null,
                },
            ];
        }

        scheduler.update_state();

        assert!(!scheduler.cycle.lock().unwrap().is_scraping);
        assert_eq!(scheduler.queues.page().waiting(), 1);
        // the flag is consumed by the persist job
        assert!(!scheduler.cycle.lock().unwrap().users[0].pages[0].updated);
    }
}
