//! # 嵌入资源注册表
//!
//! 宿主在启动时把随插件打包的图片（通常来自 `include_bytes!`）按
//! “程序集名 + 资源路径”登记到这里，获取阶段通过 `assembly:resourcePath`
//! 定位符读取。裸 `resourcePath` 解析到默认程序集。

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use super::ImageError;

/// 程序集名 → (资源路径 → 字节)。
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    assemblies: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个资源，同名资源会被覆盖。
    ///
    /// # 示例
    /// ```rust
    /// use web_image::ResourceRegistry;
    ///
    /// let registry = ResourceRegistry::new();
    /// registry.register("MyPlugin", "MyPlugin.Images.icon.png", vec![0u8; 4])?;
    /// assert!(registry.contains("MyPlugin", "MyPlugin.Images.icon.png"));
    /// # Ok::<(), web_image::ImageError>(())
    /// ```
    pub fn register(
        &self,
        assembly: &str,
        path: &str,
        bytes: impl Into<Bytes>,
    ) -> Result<(), ImageError> {
        if assembly.is_empty() || assembly.contains(':') {
            return Err(ImageError::Configuration(format!("程序集名无效：{:?}", assembly)));
        }
        if path.is_empty() {
            return Err(ImageError::Configuration("资源路径不能为空".to_string()));
        }

        let mut guard = self
            .assemblies
            .write()
            .map_err(|_| ImageError::ResourceLimit("资源注册表写入锁已中毒".to_string()))?;
        guard
            .entry(assembly.to_string())
            .or_default()
            .insert(path.to_string(), bytes.into());

        log::debug!("📦 已登记嵌入资源 - {}:{}", assembly, path);
        Ok(())
    }

    /// 登记静态字节（零拷贝）。
    pub fn register_static(
        &self,
        assembly: &str,
        path: &str,
        bytes: &'static [u8],
    ) -> Result<(), ImageError> {
        self.register(assembly, path, Bytes::from_static(bytes))
    }

    pub fn contains(&self, assembly: &str, path: &str) -> bool {
        self.assemblies
            .read()
            .map(|guard| guard.get(assembly).is_some_and(|res| res.contains_key(path)))
            .unwrap_or(false)
    }

    /// 按定位符读取资源字节。
    pub(crate) fn resolve(
        &self,
        locator: &str,
        default_assembly: Option<&str>,
    ) -> Result<Bytes, ImageError> {
        let (assembly, path) = split_locator(locator, default_assembly)?;

        let guard = self
            .assemblies
            .read()
            .map_err(|_| ImageError::ResourceLimit("资源注册表读取锁已中毒".to_string()))?;

        let resources = guard
            .get(assembly)
            .ok_or_else(|| ImageError::NotFound(format!("程序集不存在：{}", assembly)))?;

        resources.get(path).cloned().ok_or_else(|| {
            ImageError::NotFound(format!("程序集 {} 中没有名为 {} 的嵌入资源", assembly, path))
        })
    }
}

/// 拆分 `assembly:path` 定位符。
///
/// 裸路径优先使用 `default_assembly`，否则取首个 `.` 之前的部分作为程序集名。
fn split_locator<'a>(
    locator: &'a str,
    default_assembly: Option<&'a str>,
) -> Result<(&'a str, &'a str), ImageError> {
    let mut parts = locator.split(':');
    let (first, second, rest) = (parts.next(), parts.next(), parts.next());

    match (first, second, rest) {
        (Some(path), None, None) => {
            let assembly = match default_assembly {
                Some(assembly) => assembly,
                None => path
                    .split_once('.')
                    .map(|(prefix, _)| prefix)
                    .filter(|prefix| !prefix.is_empty())
                    .ok_or_else(|| {
                        ImageError::NotFound(format!("无法从资源路径推断程序集：{}", path))
                    })?,
            };
            Ok((assembly, path))
        }
        (Some(assembly), Some(path), None) if !assembly.is_empty() && !path.is_empty() => {
            Ok((assembly, path))
        }
        _ => Err(ImageError::NotFound(format!("无法解析资源路径：{}", locator))),
    }
}
