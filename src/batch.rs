use crate::delivery::{ExportMetadata, LocalOutput, export_timestamp};
use crate::encode::OutputEncoding;
use crate::failure_log::{FailureLog, FailureLogEntry};
use crate::loader::ImageSource;
use crate::options::{Adjustment, DEFAULT_TEMPLATE, LogoMode, RawRenderOptions, RenderOptions, resolve_template};
use crate::presets::PresetStore;
use crate::rate_limit::UpstreamLimiter;
use crate::render::{
    CanvasSize, ErrorKind, ItemIdentity, PosterError, RenderContext, RenderRequest, RenderResult,
    RenderWarning, render_blocking,
};
use crate::sources::{AssetCatalog, ItemDescriptor, MediaServer, select_artwork, select_logo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryActions {
    #[serde(default, alias = "send_to_plex")]
    pub send_to_server: bool,
    #[serde(default)]
    pub save_locally: bool,
    #[serde(default)]
    pub export_metadata: bool,
    #[serde(default, alias = "labels")]
    pub remove_labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubmission {
    #[serde(alias = "rating_keys")]
    pub item_ids: Vec<String>,
    #[serde(default = "default_template", alias = "template_id")]
    pub template: String,
    #[serde(default, alias = "preset_id")]
    pub preset: Option<String>,
    #[serde(default)]
    pub options: RawRenderOptions,
    #[serde(flatten)]
    pub actions: DeliveryActions,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Rendering,
    Delivering,
    Succeeded,
    Failed { kind: ErrorKind, reason: String },
}

impl ItemStatus {
    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Queued => 0,
            ItemStatus::Rendering => 1,
            ItemStatus::Delivering => 2,
            ItemStatus::Succeeded | ItemStatus::Failed { .. } => 3,
        }
    }

    // forward only, except delivery_failed back to delivering on redeliver
    fn can_move_to(&self, next: &ItemStatus) -> bool {
        let redelivery = matches!(
            self,
            ItemStatus::Failed {
                kind: ErrorKind::DeliveryFailed,
                ..
            }
        ) && *next == ItemStatus::Delivering;
        redelivery || next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    // never decreases
    pub started: usize,
    pub rendering: usize,
    pub delivering: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: String,
    #[serde(flatten)]
    pub status: ItemStatus,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub artwork_url: Option<String>,
    pub logo_url: Option<String>,
    pub saved_path: Option<String>,
    pub warnings: Vec<RenderWarning>,
    pub retained_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub id: String,
    pub template: &'static str,
    pub preset: Option<String>,
    pub progress: BatchProgress,
    pub peak_rendering: usize,
    pub not_started: Vec<String>,
    pub adjustments: Vec<Adjustment>,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrent_renders: usize,
    pub max_items: usize,
    pub history: usize,
    pub canvas: CanvasSize,
    pub encoding: OutputEncoding,
    pub upstream_timeout: Duration,
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
    pub delivery_timeout: Duration,
    pub grain_seed: Option<u64>,
}

pub struct BatchDeps<C, M> {
    pub catalog: Arc<C>,
    pub media: Arc<M>,
    pub limiter: UpstreamLimiter,
    pub render: Arc<RenderContext>,
    pub output: LocalOutput,
    pub presets: PresetStore,
    pub failure_log: Option<FailureLog>,
    pub settings: BatchSettings,
}

struct PreparedJob {
    template: &'static str,
    preset: Option<String>,
    raw: RawRenderOptions,
    options: Arc<RenderOptions>,
    adjustments: Vec<Adjustment>,
    actions: DeliveryActions,
}

#[derive(Debug)]
struct ItemRecord {
    item_id: String,
    status: ItemStatus,
    descriptor: Option<ItemDescriptor>,
    artwork_url: Option<String>,
    logo_url: Option<String>,
    saved_path: Option<String>,
    warnings: Vec<RenderWarning>,
    retained: Option<RenderResult>,
}

impl ItemRecord {
    fn new(item_id: String) -> Self {
        Self {
            item_id,
            status: ItemStatus::Queued,
            descriptor: None,
            artwork_url: None,
            logo_url: None,
            saved_path: None,
            warnings: Vec::new(),
            retained: None,
        }
    }

    fn report(&self) -> ItemReport {
        ItemReport {
            item_id: self.item_id.clone(),
            status: self.status.clone(),
            title: self.descriptor.as_ref().map(|item| item.title.clone()),
            year: self.descriptor.as_ref().and_then(|item| item.year),
            artwork_url: self.artwork_url.clone(),
            logo_url: self.logo_url.clone(),
            saved_path: self.saved_path.clone(),
            warnings: self.warnings.clone(),
            retained_bytes: self.retained.as_ref().map(|result| result.byte_len),
        }
    }
}

#[derive(Debug, Default)]
struct StatusTable {
    records: Vec<ItemRecord>,
    index: HashMap<String, usize>,
    peak_rendering: usize,
    finished: bool,
}

impl StatusTable {
    fn record(&self, item_id: &str) -> Option<&ItemRecord> {
        self.records.get(*self.index.get(item_id)?)
    }

    fn record_mut(&mut self, item_id: &str) -> Option<&mut ItemRecord> {
        let slot = *self.index.get(item_id)?;
        self.records.get_mut(slot)
    }

    fn progress(&self, cancelled: bool) -> BatchProgress {
        let mut progress = BatchProgress {
            total: self.records.len(),
            cancelled,
            finished: self.finished,
            ..Default::default()
        };
        for record in &self.records {
            match record.status {
                ItemStatus::Queued => continue,
                ItemStatus::Rendering => progress.rendering += 1,
                ItemStatus::Delivering => progress.delivering += 1,
                ItemStatus::Succeeded => progress.succeeded += 1,
                ItemStatus::Failed { .. } => progress.failed += 1,
            }
            progress.started += 1;
        }
        progress
    }
}

struct BatchShared {
    id: String,
    job: PreparedJob,
    table: Mutex<StatusTable>,
    progress: watch::Sender<BatchProgress>,
    cancel: CancellationToken,
}

impl BatchShared {
    fn table(&self) -> MutexGuard<'_, StatusTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, item_id: &str, next: ItemStatus) -> bool {
        let snapshot = self.advance(&mut self.table(), item_id, next);
        match snapshot {
            Some(snapshot) => {
                self.progress.send_replace(snapshot);
                true
            }
            None => false,
        }
    }

    // Caller holds the table lock and publishes the returned snapshot.
    fn advance(&self, table: &mut StatusTable, item_id: &str, next: ItemStatus) -> Option<BatchProgress> {
        let record = table.record_mut(item_id)?;
        if !record.status.can_move_to(&next) {
            warn!(batch = %self.id, item_id, from = ?record.status, to = ?next, "ignored backwards status change");
            return None;
        }
        debug!(batch = %self.id, item_id, from = ?record.status, to = ?next, "item status");
        record.status = next;
        let progress = table.progress(self.cancel.is_cancelled());
        table.peak_rendering = table.peak_rendering.max(progress.rendering);
        Some(progress)
    }

    fn update(&self, item_id: &str, apply: impl FnOnce(&mut ItemRecord)) {
        if let Some(record) = self.table().record_mut(item_id) {
            apply(record);
        }
    }

    fn finish(&self) {
        let snapshot = {
            let mut table = self.table();
            table.finished = true;
            table.progress(self.cancel.is_cancelled())
        };
        self.progress.send_replace(snapshot);
    }

    fn report(&self) -> BatchReport {
        let table = self.table();
        let progress = table.progress(self.cancel.is_cancelled());
        let not_started = if table.finished {
            table
                .records
                .iter()
                .filter(|record| record.status == ItemStatus::Queued)
                .map(|record| record.item_id.clone())
                .collect()
        } else {
            Vec::new()
        };
        BatchReport {
            id: self.id.clone(),
            template: self.job.template,
            preset: self.job.preset.clone(),
            progress,
            peak_rendering: table.peak_rendering,
            not_started,
            adjustments: self.job.adjustments.clone(),
            items: table.records.iter().map(ItemRecord::report).collect(),
        }
    }
}

#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
    progress: watch::Receiver<BatchProgress>,
}

impl BatchHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.clone()
    }

    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(batch = %self.shared.id, "batch cancelled");
        }
        self.shared.cancel.cancel();
        self.shared.progress.send_modify(|progress| progress.cancelled = true);
    }

    pub fn is_finished(&self) -> bool {
        self.progress.borrow().finished
    }

    pub fn report(&self) -> BatchReport {
        self.shared.report()
    }

    pub async fn wait(&self) -> BatchReport {
        let mut progress = self.progress.clone();
        let _ = progress.wait_for(|snapshot| snapshot.finished).await;
        self.shared.report()
    }
}

pub struct BatchRegistry {
    history: usize,
    batches: Mutex<VecDeque<BatchHandle>>,
}

impl BatchRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            history: history.max(1),
            batches: Mutex::new(VecDeque::new()),
        }
    }

    fn batches(&self) -> MutexGuard<'_, VecDeque<BatchHandle>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: BatchHandle) {
        let mut batches = self.batches();
        batches.push_back(handle);
        let mut finished = batches.iter().filter(|batch| batch.is_finished()).count();
        while finished > self.history {
            let Some(oldest) = batches.iter().position(|batch| batch.is_finished()) else {
                break;
            };
            if let Some(evicted) = batches.remove(oldest) {
                debug!(batch = %evicted.id(), "batch evicted from history");
            }
            finished -= 1;
        }
    }

    pub fn get(&self, id: &str) -> Option<BatchHandle> {
        self.batches().iter().find(|batch| batch.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.batches().iter().map(|batch| batch.id().to_string()).collect()
    }
}

pub struct BatchScheduler<C, M> {
    deps: Arc<BatchDeps<C, M>>,
    registry: BatchRegistry,
}

impl<C: AssetCatalog, M: MediaServer> BatchScheduler<C, M> {
    pub fn new(deps: BatchDeps<C, M>) -> Self {
        let registry = BatchRegistry::new(deps.settings.history);
        Self {
            deps: Arc::new(deps),
            registry,
        }
    }

    pub fn get(&self, id: &str) -> Option<BatchHandle> {
        self.registry.get(id)
    }

    pub fn batch_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    async fn prepare(&self, submission: &BatchSubmission) -> Result<(PreparedJob, Vec<String>), PosterError> {
        let template = resolve_template(&submission.template)?;
        let mut seen = HashSet::new();
        let items: Vec<String> = submission
            .item_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if items.is_empty() {
            return Err(PosterError::InvalidRequest("batch has no items".to_string()));
        }
        let max_items = self.deps.settings.max_items;
        if max_items > 0 && items.len() > max_items {
            return Err(PosterError::InvalidRequest(format!(
                "batch exceeds item limit ({} > {max_items})",
                items.len()
            )));
        }
        let raw = self
            .deps
            .presets
            .layered(template, submission.preset.as_deref(), &submission.options)
            .await?;
        let (options, adjustments) = RenderOptions::validate(&raw, template)?;
        Ok((
            PreparedJob {
                template,
                preset: submission.preset.clone(),
                raw,
                options: Arc::new(options),
                adjustments,
                actions: submission.actions.clone(),
            },
            items,
        ))
    }

    pub async fn submit(&self, submission: BatchSubmission) -> Result<BatchHandle, PosterError> {
        let (job, items) = self.prepare(&submission).await?;
        let id = format!("{:016x}", rand::random::<u64>());
        let mut table = StatusTable::default();
        for (slot, item_id) in items.iter().enumerate() {
            table.index.insert(item_id.clone(), slot);
            table.records.push(ItemRecord::new(item_id.clone()));
        }
        let (progress, receiver) = watch::channel(table.progress(false));
        let shared = Arc::new(BatchShared {
            id: id.clone(),
            job,
            table: Mutex::new(table),
            progress,
            cancel: CancellationToken::new(),
        });
        let handle = BatchHandle {
            shared: shared.clone(),
            progress: receiver,
        };
        self.registry.insert(handle.clone());
        info!(
            batch = %id,
            items = items.len(),
            template = shared.job.template,
            preset = ?shared.job.preset,
            "batch submitted"
        );
        tokio::spawn(run_batch(self.deps.clone(), shared, items));
        Ok(handle)
    }

    pub async fn redeliver(&self, batch_id: &str, item_id: &str) -> Result<ItemReport, PosterError> {
        let handle = self
            .registry
            .get(batch_id)
            .ok_or_else(|| PosterError::InvalidRequest(format!("unknown batch {batch_id}")))?;
        let shared = handle.shared;
        let not_pending = || PosterError::InvalidRequest(format!("item {item_id} has no render awaiting delivery"));
        let (descriptor, result, snapshot) = {
            let mut table = shared.table();
            let record = table
                .record_mut(item_id)
                .ok_or_else(|| PosterError::InvalidRequest(format!("unknown item {item_id}")))?;
            let (descriptor, result) = match (&record.status, record.retained.clone(), record.descriptor.clone()) {
                (
                    ItemStatus::Failed {
                        kind: ErrorKind::DeliveryFailed,
                        ..
                    },
                    Some(result),
                    Some(descriptor),
                ) => (descriptor, result),
                _ => return Err(not_pending()),
            };
            let snapshot = shared
                .advance(&mut table, item_id, ItemStatus::Delivering)
                .ok_or_else(not_pending)?;
            (descriptor, result, snapshot)
        };
        shared.progress.send_replace(snapshot);
        info!(batch = %batch_id, item_id, "redelivering item");
        finish_delivery(&self.deps, &shared, &descriptor, result).await;
        let report = shared.table().record(item_id).map(ItemRecord::report);
        report.ok_or_else(|| PosterError::InvalidRequest(format!("unknown item {item_id}")))
    }
}

async fn run_batch<C: AssetCatalog, M: MediaServer>(
    deps: Arc<BatchDeps<C, M>>,
    shared: Arc<BatchShared>,
    items: Vec<String>,
) {
    let started = Instant::now();
    let (sender, receiver) = mpsc::channel(items.len().max(1));
    let worker_count = deps.settings.concurrent_renders.max(1).min(items.len().max(1));
    for item_id in items {
        if sender.send(item_id).await.is_err() {
            break;
        }
    }
    drop(sender);

    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        let deps = deps.clone();
        let shared = shared.clone();
        let receiver = receiver.clone();
        workers.spawn(async move {
            loop {
                let next = {
                    let mut guard = receiver.lock().await;
                    tokio::select! {
                        biased;
                        _ = shared.cancel.cancelled() => None,
                        item = guard.recv() => item,
                    }
                };
                let Some(item_id) = next else { break };
                if shared.cancel.is_cancelled() {
                    break;
                }
                run_item(&deps, &shared, &item_id).await;
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            warn!(batch = %shared.id, error = ?err, "batch worker stopped");
        }
    }
    shared.finish();
    let report = shared.report();
    info!(
        batch = %shared.id,
        succeeded = report.progress.succeeded,
        failed = report.progress.failed,
        not_started = report.not_started.len(),
        peak_rendering = report.peak_rendering,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch finished"
    );
}

pub(crate) async fn bounded<T>(
    stage: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, PosterError>>,
) -> Result<T, PosterError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(PosterError::timeout(stage, limit)))
}

async fn run_item<C: AssetCatalog, M: MediaServer>(deps: &BatchDeps<C, M>, shared: &BatchShared, item_id: &str) {
    shared.transition(item_id, ItemStatus::Rendering);
    let started = Instant::now();
    match render_item(deps, shared, item_id).await {
        Ok((descriptor, result)) => {
            debug!(
                batch = %shared.id,
                item_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "item rendered"
            );
            shared.transition(item_id, ItemStatus::Delivering);
            finish_delivery(deps, shared, &descriptor, result).await;
        }
        Err(err) => fail_item(deps, shared, item_id, err).await,
    }
}

async fn render_item<C: AssetCatalog, M: MediaServer>(
    deps: &BatchDeps<C, M>,
    shared: &BatchShared,
    item_id: &str,
) -> Result<(ItemDescriptor, RenderResult), PosterError> {
    let settings = &deps.settings;
    let options = shared.job.options.clone();

    deps.limiter.acquire(deps.media.upstream()).await?;
    let descriptor = bounded("describe", settings.upstream_timeout, deps.media.describe(item_id)).await?;
    shared.update(item_id, |record| record.descriptor = Some(descriptor.clone()));

    deps.limiter.acquire(deps.catalog.upstream()).await?;
    let assets = bounded("candidates", settings.upstream_timeout, deps.catalog.candidates(&descriptor)).await?;
    let artwork = select_artwork(&assets.artwork, options.artwork_filter)
        .ok_or_else(|| PosterError::AssetUnavailable(format!("no artwork for {}", descriptor.title)))?
        .url
        .clone();
    let logo = if options.logo.mode == LogoMode::None {
        None
    } else {
        select_logo(&assets.logos, options.logo.preference).map(|logo| logo.url.clone())
    };
    shared.update(item_id, |record| {
        record.artwork_url = Some(artwork.clone());
        record.logo_url = logo.clone();
    });

    let artwork_bytes = bounded("fetch", settings.fetch_timeout, deps.catalog.fetch(&artwork)).await?;
    let logo_bytes = match logo.as_deref() {
        None => None,
        Some(url) => match bounded("fetch", settings.fetch_timeout, deps.catalog.fetch(url)).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(batch = %shared.id, item_id, url, error = %err, "logo fetch failed, rendering without logo");
                None
            }
        },
    };

    let request = RenderRequest {
        item: descriptor.identity(),
        artwork: ImageSource::Bytes(artwork_bytes),
        logo: logo_bytes.map(ImageSource::Bytes),
        options,
        canvas: settings.canvas,
        encoding: settings.encoding,
        grain_seed: settings.grain_seed,
    };
    let result = render_blocking(request, deps.render.clone(), settings.render_timeout).await?;
    shared.update(item_id, |record| record.warnings = result.warnings.clone());
    Ok((descriptor, result))
}

async fn finish_delivery<C: AssetCatalog, M: MediaServer>(
    deps: &BatchDeps<C, M>,
    shared: &BatchShared,
    descriptor: &ItemDescriptor,
    result: RenderResult,
) {
    let item_id = descriptor.item_id.as_str();
    let outcome = bounded(
        "delivery",
        deps.settings.delivery_timeout,
        deliver(deps, shared, descriptor, &result),
    )
    .await;
    match outcome {
        Ok(delivered) => {
            shared.update(item_id, |record| {
                record.retained = None;
                if delivered.saved_path.is_some() {
                    record.saved_path = delivered.saved_path;
                }
                record.warnings.extend(delivered.warnings);
            });
            shared.transition(item_id, ItemStatus::Succeeded);
            info!(batch = %shared.id, item_id, title = %descriptor.title, "item succeeded");
        }
        Err(err) => {
            let err = match err {
                PosterError::DeliveryFailed(_) => err,
                other => PosterError::DeliveryFailed(other.to_string()),
            };
            shared.update(item_id, |record| record.retained = Some(result));
            fail_item(deps, shared, item_id, err).await;
        }
    }
}

#[derive(Default)]
struct Delivered {
    saved_path: Option<String>,
    warnings: Vec<RenderWarning>,
}

async fn deliver<C: AssetCatalog, M: MediaServer>(
    deps: &BatchDeps<C, M>,
    shared: &BatchShared,
    descriptor: &ItemDescriptor,
    result: &RenderResult,
) -> Result<Delivered, PosterError> {
    let actions = &shared.job.actions;
    let identity: ItemIdentity = descriptor.identity();
    let mut delivered = Delivered::default();

    if actions.save_locally {
        let path = deps.output.save(&identity, result).await?;
        delivered.saved_path = Some(path.display().to_string());
    }
    if actions.export_metadata {
        let (artwork_url, logo_url) = shared
            .table()
            .record(&descriptor.item_id)
            .map(|record| (record.artwork_url.clone(), record.logo_url.clone()))
            .unwrap_or_default();
        let metadata = ExportMetadata {
            item_id: &descriptor.item_id,
            title: &descriptor.title,
            year: descriptor.year,
            template: shared.job.template,
            preset: shared.job.preset.as_deref(),
            artwork_url: artwork_url.as_deref(),
            logo_url: logo_url.as_deref(),
            options: &shared.job.raw,
            content_type: result.content_type.to_string(),
            byte_len: result.byte_len,
            width: result.width,
            height: result.height,
            exported_at: export_timestamp(),
        };
        deps.output
            .export_metadata(&identity, result.format, &metadata)
            .await?;
    }
    if actions.send_to_server {
        deps.limiter.acquire(deps.media.upstream()).await?;
        deps.media
            .upload_poster(&descriptor.item_id, result.bytes.clone(), &result.content_type)
            .await?;
        for label in &actions.remove_labels {
            deps.limiter.acquire(deps.media.upstream()).await?;
            if let Err(err) = deps.media.remove_label(&descriptor.item_id, label).await {
                warn!(item_id = %descriptor.item_id, label, error = %err, "label removal failed");
                delivered.warnings.push(RenderWarning::new(
                    ErrorKind::DeliveryFailed,
                    "labels",
                    format!("could not remove label {label}: {err}"),
                ));
            }
        }
    }
    Ok(delivered)
}

async fn fail_item<C: AssetCatalog, M: MediaServer>(
    deps: &BatchDeps<C, M>,
    shared: &BatchShared,
    item_id: &str,
    err: PosterError,
) {
    let title = shared
        .table()
        .record(item_id)
        .and_then(|record| record.descriptor.as_ref().map(|item| item.title.clone()));
    warn!(batch = %shared.id, item_id, kind = ?err.kind(), error = %err, "item failed");
    shared.transition(
        item_id,
        ItemStatus::Failed {
            kind: err.kind(),
            reason: err.to_string(),
        },
    );
    if let Some(log) = deps.failure_log.as_ref() {
        log.write(FailureLogEntry::new(&shared.id, item_id, title, &err)).await;
    }
}
