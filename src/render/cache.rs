//! 解码瓦片缓存模块
//!
//! 本模块提供了一个显式的、容量有界的解码栅格 LRU 缓存。
//! 缓存作为值传入检索调用,生命周期由协调的调用方持有,
//! 不存在进程级的全局缓存。

use crate::coverage::TileScale;
use crate::raster::PixelBuffer;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// 解码瓦片的 LRU 缓存
///
/// 以 (瓦片标识, 比例) 为键;同一瓦片在不同抽取比例下可能
/// 使用不同的载荷变体,因此分开缓存。
pub struct TileCache {
    entries: LruCache<(i64, TileScale), Arc<PixelBuffer>>,
}

impl TileCache {
    /// 创建一个容量为 `capacity` 个条目的缓存
    ///
    /// 容量为 0 时按 1 处理。
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// 查询缓存,命中时刷新其新近度
    pub fn get(&mut self, tile_id: i64, scale: TileScale) -> Option<Arc<PixelBuffer>> {
        self.entries.get(&(tile_id, scale)).cloned()
    }

    /// 写入缓存,容量满时逐出最久未使用的条目
    pub fn put(&mut self, tile_id: i64, scale: TileScale, raster: Arc<PixelBuffer>) {
        self.entries.put((tile_id, scale), raster);
    }

    /// 当前缓存的条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
