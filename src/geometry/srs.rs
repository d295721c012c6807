//! 空间参考系统重投影模块
//!
//! 本模块提供了不同 SRID 之间的坐标与几何重投影功能。
//! 切割线几何在进入空间查询之前,会被重投影到栅格覆盖层的
//! 空间参考系中。
//!
//! proj4rs 对地理坐标系使用弧度,本模块在边界处完成
//! 度与弧度之间的转换,调用方始终使用度。

use geo::{Geometry, MapCoords};
use proj4rs::errors::Error as Proj4Error;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// 重投影过程中可能出现的错误
#[derive(Debug)]
pub enum SrsError {
    /// 无法解析的 SRID
    UnknownSrid(i32),
    /// Proj4 库错误
    Proj4Error(Proj4Error),
}

impl From<Proj4Error> for SrsError {
    fn from(e: Proj4Error) -> Self {
        SrsError::Proj4Error(e)
    }
}

/// SRID 是否为地理坐标系(经纬度)
///
/// 地理坐标系的 EPSG 代码集中在 4000-4999 区间,
/// 常用的 WGS84 为 4326。
pub fn is_geographic(srid: i32) -> bool {
    srid == 4326 || (4000..5000).contains(&srid)
}

/// 从 SRID 创建 proj4rs 投影对象
fn proj_from_srid(srid: i32) -> Result<Proj, SrsError> {
    let code = u16::try_from(srid).map_err(|_| SrsError::UnknownSrid(srid))?;
    Proj::from_epsg_code(code).map_err(|_| SrsError::UnknownSrid(srid))
}

/// 将单个坐标从一个 SRID 重投影到另一个 SRID
///
/// # 参数
/// * `from_srid` - 源空间参考系
/// * `to_srid` - 目标空间参考系
/// * `x`, `y` - 源坐标(地理坐标系使用度)
///
/// # 返回
/// 目标坐标(地理坐标系使用度)
pub fn reproject_point(
    from_srid: i32,
    to_srid: i32,
    x: f64,
    y: f64,
) -> Result<(f64, f64), SrsError> {
    // 相同参考系时直接返回
    if from_srid == to_srid {
        return Ok((x, y));
    }

    let from = proj_from_srid(from_srid)?;
    let to = proj_from_srid(to_srid)?;

    // proj4rs 的地理坐标使用弧度
    let (x_in, y_in) = if is_geographic(from_srid) {
        (x.to_radians(), y.to_radians())
    } else {
        (x, y)
    };

    let mut point = (x_in, y_in, 0.0);
    transform(&from, &to, &mut point)?;

    if is_geographic(to_srid) {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}

/// 将整个几何体从一个 SRID 重投影到另一个 SRID
///
/// 对几何体的每个顶点应用 [`reproject_point`]。
pub fn reproject_geometry(
    geometry: &Geometry<f64>,
    from_srid: i32,
    to_srid: i32,
) -> Result<Geometry<f64>, SrsError> {
    if from_srid == to_srid {
        return Ok(geometry.clone());
    }
    geometry.try_map_coords(|coord| {
        let (x, y) = reproject_point(from_srid, to_srid, coord.x, coord.y)?;
        Ok(geo::Coord { x, y })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    #[test]
    fn same_srid_is_identity() {
        let (x, y) = reproject_point(4326, 4326, 12.5, 47.25).unwrap();
        assert_eq!((x, y), (12.5, 47.25));
    }

    #[test]
    fn wgs84_origin_maps_to_mercator_origin() {
        let (x, y) = reproject_point(4326, 3857, 0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn wgs84_mercator_roundtrip() {
        let (mx, my) = reproject_point(4326, 3857, 11.0, 48.0).unwrap();
        let (lon, lat) = reproject_point(3857, 4326, mx, my).unwrap();
        assert!((lon - 11.0).abs() < 1e-6);
        assert!((lat - 48.0).abs() < 1e-6);
    }

    #[test]
    fn geometry_reprojection_maps_vertices() {
        let geom = Geometry::Point(point!(x: 0.0, y: 0.0));
        let out = reproject_geometry(&geom, 4326, 3857).unwrap();
        match out {
            Geometry::Point(p) => {
                assert!(p.x().abs() < 1e-6);
                assert!(p.y().abs() < 1e-6);
            }
            other => panic!("unexpected geometry: {other:?}"),
        }
    }
}
