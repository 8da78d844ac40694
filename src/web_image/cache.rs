//! # 图片缓存（单飞 + 完成回传）
//!
//! ## 设计思路
//!
//! - `entries`：`SourceKey → Arc<PlayableImage>`，默认永不淘汰，读锁 + `peek` 并发查询；
//!   配置 `cache_capacity` 后为 LRU，查询需写锁更新访问顺序
//! - `in_flight`：`SourceKey → 监听者列表`，保证同一来源同时最多一个获取/解码任务
//! - 获取与解码在 tokio 运行时上执行（解码走 `spawn_blocking`），完成结果经通道排队，
//!   由渲染线程调用 `pump()` 取出后创建表面、写入缓存、通知监听者
//!
//! ## 顺序约定
//!
//! - 锁顺序固定为 `in_flight` → `entries`
//! - 同一来源先写缓存、再通知；通知前释放所有锁，回调里可以再次发起请求
//! - 取消只抑制对应监听者的回调，不中断共享任务
//! - 加载任务 panic 时回传失败结果，来源不会一直停留在 `in_flight`

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use lru::LruCache;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::decode::{self, DecodedImage};
use super::fetcher::RawFetcher;
use super::playable::PlayableImage;
use super::resources::ResourceRegistry;
use super::source::{FetchHandle, SourceKey};
use super::surface::SurfaceHost;
use super::{ImageConfig, ImageError};

static GLOBAL_CACHE: OnceCell<Arc<ImageCache>> = OnceCell::new();

type SuccessCallback = Box<dyn FnOnce(Arc<PlayableImage>) + Send>;
type FailureCallback = Box<dyn FnOnce(String) + Send>;
type Entries = LruCache<SourceKey, Arc<PlayableImage>>;

struct Listener {
    handle: FetchHandle,
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

struct Completion {
    key: SourceKey,
    outcome: Result<DecodedImage, ImageError>,
    fetch_ms: u128,
    decode_ms: u128,
}

/// 缓存诊断信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub fetches_started: u64,
}

/// 进程级图片缓存。
pub struct ImageCache {
    fetcher: Arc<RawFetcher>,
    config: ImageConfig,
    host: Arc<dyn SurfaceHost>,
    runtime: Handle,
    entries: RwLock<Entries>,
    in_flight: Mutex<HashMap<SourceKey, Vec<Listener>>>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>,
    fetches_started: AtomicU64,
}

impl ImageCache {
    /// 在当前 tokio 运行时上创建缓存。
    pub fn new(
        config: ImageConfig,
        resources: Arc<ResourceRegistry>,
        host: Arc<dyn SurfaceHost>,
    ) -> Result<Self, ImageError> {
        let runtime = Handle::try_current().map_err(|_| {
            ImageError::Configuration("图片缓存需要在 tokio 运行时内创建".to_string())
        })?;
        Self::with_runtime(runtime, config, resources, host)
    }

    /// 指定运行时创建缓存（宿主自行管理运行时时使用）。
    pub fn with_runtime(
        runtime: Handle,
        config: ImageConfig,
        resources: Arc<ResourceRegistry>,
        host: Arc<dyn SurfaceHost>,
    ) -> Result<Self, ImageError> {
        config.validate()?;

        let fetcher = Arc::new(RawFetcher::new(config.clone(), resources)?);
        let entries = match config.cache_capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            fetcher,
            config,
            host,
            runtime,
            entries: RwLock::new(entries),
            in_flight: Mutex::new(HashMap::new()),
            completion_tx,
            completion_rx: tokio::sync::Mutex::new(completion_rx),
            fetches_started: AtomicU64::new(0),
        })
    }

    /// 进程级实例：首次调用时用 `init` 创建，之后直接返回同一实例。
    pub fn global_or_try_init<F>(init: F) -> Result<Arc<ImageCache>, ImageError>
    where
        F: FnOnce() -> Result<ImageCache, ImageError>,
    {
        GLOBAL_CACHE
            .get_or_try_init(|| init().map(Arc::new))
            .map(Arc::clone)
    }

    /// 已初始化的进程级实例。
    pub fn global() -> Option<Arc<ImageCache>> {
        GLOBAL_CACHE.get().map(Arc::clone)
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        self.fetcher.resources()
    }

    /// 请求来源对应的图片。
    ///
    /// - 命中缓存：同步调用 `on_success`，不发起获取
    /// - 已有同源任务：挂到该任务上
    /// - 否则发起获取 → 解码
    ///
    /// `handle` 在完成前被取消时，本次请求的回调都不会触发。
    pub fn request<S, F>(&self, key: &SourceKey, handle: &FetchHandle, on_success: S, on_failure: F)
    where
        S: FnOnce(Arc<PlayableImage>) + Send + 'static,
        F: FnOnce(String) + Send + 'static,
    {
        if handle.is_cancelled() {
            return;
        }

        let mut in_flight = match lock(&self.in_flight, "in_flight") {
            Ok(guard) => guard,
            Err(err) => {
                on_failure(err.to_string());
                return;
            }
        };

        let cached = match self.lookup(key) {
            Ok(cached) => cached,
            Err(err) => {
                drop(in_flight);
                on_failure(err.to_string());
                return;
            }
        };
        if let Some(image) = cached {
            drop(in_flight);
            log::debug!("⚡ 缓存命中：{}", key);
            on_success(image);
            return;
        }

        let listener = Listener {
            handle: handle.clone(),
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        };

        if let Some(listeners) = in_flight.get_mut(key) {
            listeners.push(listener);
            log::debug!("🔗 复用进行中的请求：{}（等待者 {}）", key, listeners.len());
            return;
        }

        in_flight.insert(key.clone(), vec![listener]);
        drop(in_flight);

        self.spawn_fetch(key.clone());
    }

    fn spawn_fetch(&self, key: SourceKey) {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);
        log::info!("📥 开始加载图片：{}", key);

        let pipeline = load(Arc::clone(&self.fetcher), self.config.clone(), key.clone());
        self.spawn_supervised(key, pipeline);
    }

    /// 加载流程跑在独立任务里；任务 panic 时以失败结果回传。
    fn spawn_supervised<Fut>(&self, key: SourceKey, pipeline: Fut)
    where
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let task = self.runtime.spawn(pipeline);
        let completion_tx = self.completion_tx.clone();

        self.runtime.spawn(async move {
            let completion = match task.await {
                Ok(completion) => completion,
                Err(err) => {
                    log::error!("💥 加载任务异常退出：{} - {}", key, err);
                    Completion {
                        key,
                        outcome: Err(ImageError::Decode(format!("加载任务异常：{}", err))),
                        fetch_ms: 0,
                        decode_ms: 0,
                    }
                }
            };
            if completion_tx.send(completion).is_err() {
                log::debug!("🗑️ 缓存已释放，丢弃加载结果");
            }
        });
    }

    /// 在渲染线程处理已完成的任务：创建表面、写入缓存、通知监听者。
    ///
    /// 返回本次处理的任务数；另一处正在处理时直接返回 0。
    pub fn pump(&self) -> usize {
        let Ok(mut completion_rx) = self.completion_rx.try_lock() else {
            return 0;
        };

        let mut applied = 0;
        while let Ok(completion) = completion_rx.try_recv() {
            self.complete(completion);
            applied += 1;
        }
        applied
    }

    /// 等待至少一个任务完成后处理所有已完成任务（无渲染循环的宿主与测试使用）。
    pub async fn wait_and_pump(&self) -> usize {
        let mut completion_rx = self.completion_rx.lock().await;

        let Some(first) = completion_rx.recv().await else {
            return 0;
        };
        self.complete(first);

        let mut applied = 1;
        while let Ok(completion) = completion_rx.try_recv() {
            self.complete(completion);
            applied += 1;
        }
        applied
    }

    fn complete(&self, completion: Completion) {
        let Completion {
            key,
            outcome,
            fetch_ms,
            decode_ms,
        } = completion;

        let upload_started = Instant::now();
        let outcome = outcome.and_then(|decoded| {
            PlayableImage::from_decoded(decoded, self.host.as_ref()).map(Arc::new)
        });
        let upload_ms = upload_started.elapsed().as_millis();

        let listeners = {
            let mut in_flight = recover(&self.in_flight, "in_flight");
            if let Ok(image) = &outcome {
                let evicted = write_entries(&self.entries).push(key.clone(), Arc::clone(image));
                if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| evicted_key != &key) {
                    log::debug!("♻️ 缓存已满，淘汰：{}", evicted_key);
                }
            }
            in_flight.remove(&key).unwrap_or_default()
        };

        match &outcome {
            Ok(image) => {
                let (width, height) = image.dimensions();
                log::info!(
                    "✅ 图片加载完成：{} - {}x{} 帧数 {} | fetch={}ms decode={}ms upload={}ms",
                    key,
                    width,
                    height,
                    image.frame_count(),
                    fetch_ms,
                    decode_ms,
                    upload_ms
                );
            }
            Err(err) => {
                log::warn!(
                    "❌ 图片加载失败：{} [{}:{}] {}",
                    key,
                    err.stage(),
                    err.code(),
                    err
                );
            }
        }

        for listener in listeners {
            if listener.handle.is_cancelled() {
                log::debug!("🚫 请求已取消，跳过回调：{}", key);
                continue;
            }
            match &outcome {
                Ok(image) => (listener.on_success)(Arc::clone(image)),
                Err(err) => (listener.on_failure)(err.to_string()),
            }
        }
    }

    /// 仅查询缓存，不发起获取。
    pub fn cached(&self, key: &SourceKey) -> Option<Arc<PlayableImage>> {
        self.lookup(key).ok().flatten()
    }

    fn lookup(&self, key: &SourceKey) -> Result<Option<Arc<PlayableImage>>, ImageError> {
        let poisoned = || ImageError::ResourceLimit("图片缓存 entries 锁已中毒".to_string());
        if self.config.cache_capacity.is_some() {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            Ok(entries.get(key).cloned())
        } else {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            Ok(entries.peek(key).cloned())
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: read_entries(&self.entries).len(),
            in_flight: recover(&self.in_flight, "in_flight").len(),
            fetches_started: self.fetches_started.load(Ordering::SeqCst),
        }
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.config.cache_capacity
    }

    /// 清空缓存条目（宿主关闭时调用）。进行中的任务不受影响。
    pub fn clear(&self) {
        let mut entries = write_entries(&self.entries);
        let count = entries.len();
        entries.clear();
        log::info!("🧹 已清空图片缓存（{} 项）", count);
    }
}

async fn load(fetcher: Arc<RawFetcher>, config: ImageConfig, key: SourceKey) -> Completion {
    let fetch_started = Instant::now();
    let fetched = fetcher.fetch(&key).await;
    let fetch_ms = fetch_started.elapsed().as_millis();

    let decode_started = Instant::now();
    let outcome = match fetched {
        Ok(payload) => {
            log::debug!(
                "📦 获取完成：{}（{} 字节，来源 {}）",
                key,
                payload.len(),
                payload.origin.as_str()
            );
            tokio::task::spawn_blocking(move || decode::decode_bytes(&payload.bytes, &config))
                .await
                .map_err(|e| ImageError::Decode(format!("解码任务异常：{}", e)))
                .and_then(|result| result)
        }
        Err(err) => Err(err),
    };
    let decode_ms = decode_started.elapsed().as_millis();

    Completion {
        key,
        outcome,
        fetch_ms,
        decode_ms,
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, ImageError> {
    mutex
        .lock()
        .map_err(|_| ImageError::ResourceLimit(format!("图片缓存 {} 锁已中毒", name)))
}

/// 完成路径上锁中毒时继续使用内部数据，保证监听者仍被通知。
fn recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::error!("❌ 图片缓存 {} 锁已中毒，继续使用内部数据", name);
        poisoned.into_inner()
    })
}

fn read_entries(entries: &RwLock<Entries>) -> RwLockReadGuard<'_, Entries> {
    entries.read().unwrap_or_else(|poisoned| {
        log::error!("❌ 图片缓存 entries 锁已中毒，继续使用内部数据");
        poisoned.into_inner()
    })
}

fn write_entries(entries: &RwLock<Entries>) -> RwLockWriteGuard<'_, Entries> {
    entries.write().unwrap_or_else(|poisoned| {
        log::error!("❌ 图片缓存 entries 锁已中毒，继续使用内部数据");
        poisoned.into_inner()
    })
}
