//! # 显示绑定
//!
//! 面向界面组件的薄适配层：设置来源 → 显示加载状态 → 通过缓存请求图片 →
//! 成功时绑定表面、失败时清空，并在每个 tick 推进已绑定图片的播放时钟。
//!
//! 回调只持有状态的 `Weak` 引用，且只有完成时仍是“当前请求”的句柄才能写入状态，
//! 来源连续切换时旧请求的结果会被丢弃。

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use super::ImageError;
use super::cache::ImageCache;
use super::playable::PlayableImage;
use super::source::{FetchHandle, SourceKey};
use super::surface::SurfaceId;

#[derive(Default)]
struct BindingState {
    source: Option<SourceKey>,
    handle: Option<FetchHandle>,
    loading: bool,
    image: Option<Arc<PlayableImage>>,
    last_error: Option<String>,
}

impl BindingState {
    fn is_current(&self, handle: &FetchHandle) -> bool {
        !handle.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|current| current.same_request(handle))
    }
}

/// 单个显示位置（图片组件）的绑定。
pub struct DisplayBinding {
    cache: Arc<ImageCache>,
    state: Arc<Mutex<BindingState>>,
}

impl DisplayBinding {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self {
            cache,
            state: Arc::new(Mutex::new(BindingState::default())),
        }
    }

    /// 设置或清除来源。
    ///
    /// - `Some`：取消上一请求，进入加载状态，发起新请求（命中缓存时返回前即已绑定）
    /// - `None`：取消上一请求，立即清空显示与加载状态，不触碰缓存
    pub fn set_source(&self, source: Option<&str>) -> Result<(), ImageError> {
        let Some(raw) = source else {
            let mut state = self.lock_state()?;
            if let Some(previous) = state.handle.take() {
                previous.cancel();
            }
            state.source = None;
            state.loading = false;
            state.image = None;
            state.last_error = None;
            return Ok(());
        };

        let key = SourceKey::parse(raw)?;
        let handle = FetchHandle::new();

        {
            let mut state = self.lock_state()?;
            if let Some(previous) = state.handle.replace(handle.clone()) {
                if previous.cancel() {
                    log::debug!("🚫 来源切换，取消上一请求");
                }
            }
            state.source = Some(key.clone());
            state.loading = true;
            state.image = None;
            state.last_error = None;
        }

        let on_success = {
            let state = Arc::downgrade(&self.state);
            let handle = handle.clone();
            move |image: Arc<PlayableImage>| {
                apply(&state, &handle, |state| {
                    state.loading = false;
                    state.image = Some(image);
                });
            }
        };
        let on_failure = {
            let state = Arc::downgrade(&self.state);
            let handle = handle.clone();
            move |reason: String| {
                apply(&state, &handle, |state| {
                    state.loading = false;
                    state.image = None;
                    state.last_error = Some(reason);
                });
            }
        };

        self.cache.request(&key, &handle, on_success, on_failure);
        Ok(())
    }

    /// 推进已绑定图片的播放时钟。
    pub fn tick(&self, elapsed: Duration) {
        if let Some(image) = self.image() {
            image.advance(elapsed);
        }
    }

    /// 以秒推进（宿主帧间隔浮点数）。
    pub fn tick_secs(&self, elapsed_secs: f32) {
        if let Some(image) = self.image() {
            image.advance_secs(elapsed_secs);
        }
    }

    pub fn is_loading(&self) -> bool {
        self.read(|state| state.loading).unwrap_or(false)
    }

    pub fn image(&self) -> Option<Arc<PlayableImage>> {
        self.read(|state| state.image.clone()).flatten()
    }

    pub fn surface_id(&self) -> Option<SurfaceId> {
        self.image().map(|image| image.surface_id())
    }

    pub fn source(&self) -> Option<SourceKey> {
        self.read(|state| state.source.clone()).flatten()
    }

    pub fn last_error(&self) -> Option<String> {
        self.read(|state| state.last_error.clone()).flatten()
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, BindingState>, ImageError> {
        self.state
            .lock()
            .map_err(|_| ImageError::ResourceLimit("显示绑定状态锁已中毒".to_string()))
    }

    fn read<R>(&self, f: impl FnOnce(&BindingState) -> R) -> Option<R> {
        self.state.lock().ok().map(|state| f(&state))
    }
}

impl Drop for DisplayBinding {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(handle) = state.handle.take() {
                handle.cancel();
            }
        }
    }
}

/// 仅当 `handle` 仍是绑定的当前请求时写入状态。
fn apply(state: &Weak<Mutex<BindingState>>, handle: &FetchHandle, f: impl FnOnce(&mut BindingState)) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let Ok(mut guard) = state.lock() else {
        log::error!("❌ 显示绑定状态锁已中毒，丢弃回调");
        return;
    };
    if guard.is_current(handle) {
        f(&mut guard);
    } else {
        log::debug!("⏭️ 过期请求的回调已忽略");
    }
}
