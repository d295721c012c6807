//! 瓦片定位模块
//!
//! 本模块负责为一次检索调用枚举候选瓦片: 对瓦片索引发出
//! 空间范围查询,并在提供切割线时对每个候选瓦片进行
//! 包含/相交分类。
//!
//! 返回的序列是有限且不可重启的——每次调用都会重新发出
//! 空间查询。行序决定突发分组,但对最终缓冲区没有语义影响。

use crate::coverage::{Coverage, PyraliteResult};
use crate::cutline::{classify_tile, Cutline, TileClip};
use crate::geometry::BoundingBox;
use crate::schema::PyramidStore;
use geo::MultiPolygon;
use tracing::debug;

/// 定位阶段产出的瓦片描述
#[derive(Debug, Clone)]
pub struct LocatedTile {
    /// 瓦片标识
    pub tile_id: i64,
    /// 所属剖分
    pub section_id: i64,
    /// 瓦片足迹包围盒
    pub bbox: BoundingBox,
    /// 逐瓦片裁剪几何
    ///
    /// None 表示整片使用(没有切割线,或瓦片被切割线完全包含)。
    pub clip: Option<MultiPolygon<f64>>,
}

/// 枚举指定层级上与查询范围相交的瓦片
///
/// 提供切割线时,完全在切割线之外的瓦片永远不会返回;
/// 部分重叠的瓦片附带切割线与其足迹的交集作为逐瓦片裁剪。
pub fn locate_tiles(
    store: &PyramidStore,
    coverage: &Coverage,
    pyramid_level: u32,
    bbox: &BoundingBox,
    section_id: Option<i64>,
    cutline: Option<&Cutline>,
) -> PyraliteResult<Vec<LocatedTile>> {
    let records = store.tiles_intersecting(coverage, pyramid_level, bbox, section_id)?;
    let candidates = records.len();

    let mut located = Vec::with_capacity(records.len());
    for record in records {
        let clip = match cutline {
            None => None,
            Some(cutline) => match classify_tile(cutline, &record.bbox) {
                // 完全在外的瓦片被丢弃
                TileClip::Outside => continue,
                TileClip::Full => None,
                TileClip::Partial(intersection) => Some(intersection),
            },
        };
        located.push(LocatedTile {
            tile_id: record.tile_id,
            section_id: record.section_id,
            bbox: record.bbox,
            clip,
        });
    }

    debug!(
        coverage = coverage.name.as_str(),
        pyramid_level,
        candidates,
        selected = located.len(),
        "瓦片定位完成"
    );
    Ok(located)
}
