//! 切割线过滤模块
//!
//! 本模块实现了查询作用域的多边形裁剪(切割线)支持:
//!
//! - 校验调用方提供的几何类型并构造裁剪多边形
//! - 需要时将切割线重投影到覆盖层的空间参考系
//! - 对候选瓦片进行 完全包含/部分重叠/完全在外 分类
//! - 为部分重叠的瓦片推导逐瓦片的裁剪交集几何
//!
//! # 几何类型校验
//!
//! POLYGON/MULTIPOLYGON/GEOMETRYCOLLECTION 被接受;单个 POLYGON
//! 若是裸的 4/5 点包络矩形(没有额外顶点)则被拒绝——这表示
//! 调用方并未真正想要切割线。闭合的 LINESTRING/MULTILINESTRING
//! 被当作多边形边界接受;开放折线、POINT、MULTIPOINT 被拒绝。
//! 被拒绝只是"不可用作切割线"的信号,不是错误:
//! 调用方必须把 `None` 视为"继续执行,不做裁剪"。

use crate::coverage::PyraliteResult;
use crate::geometry::{srs, BoundingBox};
use geo::{BooleanOps, BoundingRect, Contains, Geometry, Intersects, LineString, MultiPolygon, Polygon};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// 切割线的输出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutlineMode {
    /// 返回的裁剪是输入几何与查询包围盒的交集
    /// (调用方的包围盒是权威范围)
    IntersectBbox,
    /// 返回的裁剪是完整的输入几何,其包围盒写回为新的查询范围
    /// (切割线自身定义查询范围)
    CropToCutline,
}

/// 构造完成的切割线
#[derive(Debug, Clone)]
pub struct Cutline {
    /// 裁剪多边形,已位于覆盖层的空间参考系中
    pub clip: MultiPolygon<f64>,
    /// 裁剪多边形的包围盒,用于快速排除
    pub bbox: BoundingBox,
}

/// 瓦片相对切割线的分类结果
#[derive(Debug, Clone)]
pub enum TileClip {
    /// 瓦片完全在切割线之外,永远不返回给合成阶段
    Outside,
    /// 瓦片被切割线完全包含,整片使用,不附加逐瓦片裁剪
    Full,
    /// 瓦片与切割线部分重叠,附带逐瓦片的交集几何
    Partial(MultiPolygon<f64>),
}

/// 从调用方提供的几何构造切割线
///
/// 接受的几何会在 SRID 不同时重投影到栅格的空间参考系。
/// `CropToCutline` 模式会把裁剪的包围盒写回 `query_bbox`。
///
/// # 返回
///
/// 对任何被拒绝的几何类型返回 `Ok(None)`;调用方应当在
/// 没有切割线逻辑的情况下继续。
///
/// # 错误
///
/// 仅在重投影失败时返回错误。
pub fn build_cutline(
    geometry: &Geometry<f64>,
    geometry_srid: i32,
    raster_srid: i32,
    mode: CutlineMode,
    query_bbox: &mut BoundingBox,
) -> PyraliteResult<Option<Cutline>> {
    // 先做类型校验,再做重投影,避免对不可用几何做无谓转换
    let Some(polygons) = polygons_from_geometry(geometry) else {
        return Ok(None);
    };

    // SRID 不同时重投影到栅格参考系
    let polygons = if geometry_srid != raster_srid {
        let reprojected = srs::reproject_geometry(
            &Geometry::MultiPolygon(polygons),
            geometry_srid,
            raster_srid,
        )?;
        match reprojected {
            Geometry::MultiPolygon(mp) => mp,
            _ => return Ok(None),
        }
    } else {
        polygons
    };

    let clip = match mode {
        CutlineMode::IntersectBbox => {
            // 与查询包围盒求交;布尔运算对退化输入可能恐慌,
            // 失败视为"不可用作切割线"
            let bbox_polygon = MultiPolygon(vec![query_bbox.to_polygon()]);
            match guarded_intersection(&polygons, &bbox_polygon) {
                Some(clip) => clip,
                None => {
                    warn!("切割线与查询包围盒求交失败,忽略切割线");
                    return Ok(None);
                }
            }
        }
        CutlineMode::CropToCutline => {
            // 切割线自身定义查询范围
            if let Some(rect) = polygons.bounding_rect() {
                *query_bbox = BoundingBox::from_rect(&rect);
            }
            polygons
        }
    };

    let bbox = clip
        .bounding_rect()
        .map(|rect| BoundingBox::from_rect(&rect))
        .unwrap_or(*query_bbox);

    Ok(Some(Cutline { clip, bbox }))
}

/// 对一个瓦片足迹进行切割线分类
///
/// 完全在外的瓦片返回 [`TileClip::Outside`];被完全包含的瓦片
/// 整片使用;部分重叠的瓦片附带交集几何。交集无法计算时
/// 回退为"完全包含"而不是让整个请求失败——这是记录在案的
/// 有意宽容处理。
pub fn classify_tile(cutline: &Cutline, tile_bbox: &BoundingBox) -> TileClip {
    // 包围盒快速排除
    if !cutline.bbox.intersects(tile_bbox) {
        return TileClip::Outside;
    }

    let tile_polygon = tile_bbox.to_polygon();
    if !cutline.clip.intersects(&tile_polygon) {
        return TileClip::Outside;
    }
    if cutline.clip.contains(&tile_polygon) {
        return TileClip::Full;
    }

    let tile_mp = MultiPolygon(vec![tile_polygon]);
    match guarded_intersection(&cutline.clip, &tile_mp) {
        // 空交集是合法结果(例如仅边界接触),该瓦片贡献零像素
        Some(intersection) => TileClip::Partial(intersection),
        None => {
            // 交集计算失败: 回退为完全包含,扩大而不是丢失像素
            warn!("逐瓦片切割线交集计算失败,回退为完全包含: {tile_bbox}");
            TileClip::Full
        }
    }
}

/// 受保护的多边形求交
///
/// geo 的布尔运算对畸形输入会恐慌;此处捕获恐慌并返回 None,
/// 由调用方应用记录在案的回退行为。
fn guarded_intersection(
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
) -> Option<MultiPolygon<f64>> {
    catch_unwind(AssertUnwindSafe(|| a.intersection(b))).ok()
}

/// 从输入几何中提取裁剪多边形
///
/// 返回 None 表示该几何不可用作切割线。
fn polygons_from_geometry(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => {
            // 裸包络矩形表示"并未真正想要切割线"
            if is_bare_envelope(polygon) {
                None
            } else {
                Some(MultiPolygon(vec![polygon.clone()]))
            }
        }
        Geometry::MultiPolygon(mp) => {
            if mp.0.is_empty() {
                None
            } else {
                Some(mp.clone())
            }
        }
        Geometry::LineString(line) => polygon_from_closed_line(line).map(|p| MultiPolygon(vec![p])),
        Geometry::MultiLineString(lines) => {
            // 所有成员都必须闭合
            let mut polygons = Vec::with_capacity(lines.0.len());
            for line in &lines.0 {
                polygons.push(polygon_from_closed_line(line)?);
            }
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon(polygons))
            }
        }
        Geometry::GeometryCollection(collection) => {
            // 收集集合中所有可用的多边形成员
            let mut polygons = Vec::new();
            for member in &collection.0 {
                if let Some(mp) = polygons_from_geometry(member) {
                    polygons.extend(mp.0);
                }
            }
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon(polygons))
            }
        }
        // 矩形等价于裸包络
        Geometry::Rect(_) => None,
        Geometry::Triangle(triangle) => Some(MultiPolygon(vec![triangle.to_polygon()])),
        // 点与开放折线不可用作切割线
        _ => None,
    }
}

/// 闭合折线提升为多边形;开放折线返回 None
fn polygon_from_closed_line(line: &LineString<f64>) -> Option<Polygon<f64>> {
    if line.0.len() >= 4 && line.is_closed() {
        Some(Polygon::new(line.clone(), vec![]))
    } else {
        None
    }
}

/// 多边形是否为裸的 4/5 点包络矩形
///
/// 外环只有 4 个不同顶点、没有内环,且每个顶点都是自身
/// 包围盒的角点时,认为是裸包络。
fn is_bare_envelope(polygon: &Polygon<f64>) -> bool {
    if !polygon.interiors().is_empty() {
        return false;
    }
    let ring = polygon.exterior();
    let coords = &ring.0;
    // 闭合环: 首尾重复,4 个顶点对应 5 个坐标
    let distinct = if ring.is_closed() {
        coords.len().saturating_sub(1)
    } else {
        coords.len()
    };
    if distinct != 4 {
        return false;
    }
    let Some(rect) = polygon.bounding_rect() else {
        return false;
    };
    let (minx, miny) = (rect.min().x, rect.min().y);
    let (maxx, maxy) = (rect.max().x, rect.max().y);
    coords[..distinct].iter().all(|c| {
        (c.x == minx || c.x == maxx) && (c.y == miny || c.y == maxy)
    })
}
