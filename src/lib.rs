//! 这是一个把超大地理参考栅格影像持久化为瓦片化多分辨率
//! 金字塔并从关系存储中检索的引擎
//!
//! 写入时,影像按 覆盖层 → 剖分 → 金字塔层级 → 瓦片 → 瓦片载荷
//! 的模型切分存入 SQLite;读取时,引擎为任意地理范围与任意
//! 目标分辨率定位最匹配的金字塔层级,取出重叠的瓦片,并发
//! 解码每个瓦片,并把解码像素合成进单个输出缓冲区。
//!
//! # 主要功能
//!
//! - 瓦片存储模式的类型化访问
//! - 1% 容差、"最后命中胜出"的分辨率匹配
//! - 有界突发并发的瓦片解码/合成流水线
//! - 可选的切割线(多边形裁剪)过滤
//! - 波段选择/重映射(含自动 NDVI)与山体阴影调制
//!
//! # 示例
//!
//! ```no_run
//! use pyralite::{BandPlan, BoundingBox, PyramidStore};
//!
//! let store = PyramidStore::open("pyramids.sqlite")?;
//! let coverage = store.get_coverage("ortho")?;
//! let buffer = store
//!     .renderer(&coverage)
//!     .of_extent(BoundingBox::new(0.0, 0.0, 4096.0, 4096.0))
//!     .with_size(1024, 1024)
//!     .with_band_plan(BandPlan::Identity)
//!     .with_max_threads(8)
//!     .render()?;
//! # Ok::<(), pyralite::PyraliteError>(())
//! ```

// 导出主要模块
pub mod codec; // 瓦片载荷编解码
pub mod coverage; // 覆盖层模型与错误类型
pub mod cutline; // 切割线过滤
pub mod geometry; // 几何基础类型与重投影
pub mod raster; // 像素缓冲区
pub mod render; // 检索渲染流水线
pub mod schema; // 模式访问

// 重新导出常用类型
pub use codec::{CodecError, TileCodec};
pub use coverage::{
    find_matching_resolution, Coverage, CoveragePolicies, LevelResolutions, PyraliteError,
    PyraliteResult, ResolutionMatch, TileScale, RESOLUTION_TOLERANCE,
};
pub use cutline::{build_cutline, Cutline, CutlineMode, TileClip};
pub use geometry::BoundingBox;
pub use raster::{Palette, PixelBuffer, PixelKind, RasterError, SampleKind};
pub use render::{
    BandPlan, DecodePool, DestGeometry, LocatedTile, PoolStats, RasterStyle, RenderBuilder,
    ShadedRelief, TileCache, MAX_WORKERS,
};
pub use schema::{PyramidStore, SchemaError, Section, SectionDef, SectionStatistics, TileRecord};
