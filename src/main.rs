//! # webimage-probe：诊断入口
//!
//! 用内存表面宿主走一遍完整加载流程，打印解码结果与模拟播放。
//!
//! ```text
//! webimage-probe <source> [ticks] [tick_ms]
//! ```
//!
//! 可选环境变量 `WEBIMAGE_CONFIG` 指向 JSON 配置文件。

use std::sync::Arc;
use std::time::Duration;

use web_image::{DisplayBinding, ImageCache, ImageConfig, ImageError, MemorySurfaceHost, ResourceRegistry};

const DEFAULT_TICKS: u32 = 10;
const DEFAULT_TICK_MS: u64 = 16;

struct ProbeArgs {
    source: String,
    ticks: u32,
    tick_ms: u64,
}

fn parse_args() -> Result<ProbeArgs, ImageError> {
    let mut args = std::env::args().skip(1);
    let source = args.next().ok_or_else(|| {
        ImageError::Configuration("用法：webimage-probe <source> [ticks] [tick_ms]".to_string())
    })?;

    let ticks = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|_| ImageError::Configuration(format!("ticks 不是有效整数：{}", raw)))?,
        None => DEFAULT_TICKS,
    };
    let tick_ms = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|_| ImageError::Configuration(format!("tick_ms 不是有效整数：{}", raw)))?,
        None => DEFAULT_TICK_MS,
    };

    Ok(ProbeArgs {
        source,
        ticks,
        tick_ms,
    })
}

fn load_config() -> Result<ImageConfig, ImageError> {
    match std::env::var("WEBIMAGE_CONFIG") {
        Ok(path) => {
            log::info!("⚙️ 读取配置文件：{}", path);
            ImageConfig::from_json_file(path)
        }
        Err(_) => Ok(ImageConfig::default()),
    }
}

async fn run() -> Result<(), ImageError> {
    let args = parse_args()?;
    let config = load_config()?;

    let host = Arc::new(MemorySurfaceHost::new());
    let cache = ImageCache::global_or_try_init(|| {
        ImageCache::new(config, Arc::new(ResourceRegistry::new()), host.clone())
    })?;

    let binding = DisplayBinding::new(Arc::clone(&cache));
    binding.set_source(Some(&args.source))?;

    while binding.is_loading() {
        cache.wait_and_pump().await;
    }

    let Some(image) = binding.image() else {
        let reason = binding.last_error().unwrap_or_default();
        log::error!("❌ 加载失败：{}", reason);
        return Err(ImageError::Decode(reason));
    };

    let (width, height) = image.dimensions();
    println!(
        "{}",
        serde_json::json!({
            "source": binding.source().map(|key| key.to_string()),
            "animated": image.is_animated(),
            "width": width,
            "height": height,
            "frames": image.frame_count(),
            "surface": image.surface_id().0,
        })
    );

    let tick = Duration::from_millis(args.tick_ms);
    for step in 1..=args.ticks {
        binding.tick(tick);
        println!(
            "tick {:>3}: frame={} accumulated={:?}",
            step,
            image.current_index(),
            image.accumulated()
        );
    }

    let stats = cache.stats();
    println!(
        "{}",
        serde_json::to_string(&stats).map_err(|e| ImageError::Configuration(e.to_string()))?
    );

    drop(binding);
    drop(image);
    cache.clear();
    log::info!(
        "🧹 表面统计：创建 {} 个，释放 {} 个",
        host.created(),
        host.disposed()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        eprintln!("[{}] {}", err.code(), err);
        std::process::exit(1);
    }
}
