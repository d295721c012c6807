//! 模式访问模块
//!
//! 本模块提供了对持久化关系的类型化访问。每个覆盖层对应一个
//! 逻辑模式实例:
//!
//! - `raster_coverages` - 每个覆盖层一行
//! - `<coverage>_sections` - 每个剖分一行,带足迹多边形与包围盒索引
//! - `<coverage>_levels` (混合分辨率覆盖层为 `<coverage>_section_levels`)
//!   - 每 (层级) 或 (剖分, 层级) 一行,四组分辨率对列
//! - `<coverage>_tiles` - 每个瓦片一行,带足迹与包围盒索引
//! - `<coverage>_tile_data` - 每个瓦片一行,odd/even 两个载荷列
//!
//! 覆盖层创建在一个事务中完成,跨所有支撑关系全有或全无。
//! 空间范围查询通过包围盒列上的索引执行,精确的多边形谓词
//! 由检索引擎在 Rust 侧求值。

use crate::codec::{self, TileCodec};
use crate::coverage::{Coverage, CoveragePolicies, LevelResolutions, PyraliteResult, TileScale};
use crate::geometry::BoundingBox;
use crate::raster::{Palette, PixelBuffer, PixelKind, SampleKind};
use geo::{BoundingRect, Polygon};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use wkt::{ToWkt, TryFromWkt};

/// 模式访问过程中可能出现的错误
#[derive(Debug)]
pub enum SchemaError {
    /// SQLite 错误
    Sqlite(rusqlite::Error),
    /// 统计 blob 序列化错误
    Json(serde_json::Error),
    /// 足迹 WKT 解析错误,包含错误描述
    Wkt(String),
    /// 非法的覆盖层名称(必须为小写字母/数字/下划线)
    BadCoverageName(String),
    /// 覆盖层已存在
    CoverageExists(String),
    /// 覆盖层不存在
    CoverageNotFound(String),
    /// 剖分不存在
    SectionNotFound(i64),
    /// 瓦片不存在
    TileNotFound(i64),
    /// 混合分辨率覆盖层的层级操作需要剖分标识
    SectionRequired(String),
}

/// 模式访问的通用结果类型
pub type SchemaResult<T> = Result<T, SchemaError>;

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for SchemaError {}

impl From<rusqlite::Error> for SchemaError {
    fn from(e: rusqlite::Error) -> Self {
        SchemaError::Sqlite(e)
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        SchemaError::Json(e)
    }
}

/// 单个波段的统计量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sample_count: u64,
}

/// 每剖分统计 blob,以 JSON 持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionStatistics {
    pub bands: Vec<BandStatistics>,
}

impl SectionStatistics {
    /// 从解码栅格收集统计量
    ///
    /// 被遮罩的像素与等于无数据值的像素不参与统计。
    pub fn collect(raster: &PixelBuffer, no_data: Option<&[f64]>) -> Self {
        let mut bands = Vec::with_capacity(raster.bands as usize);
        for band in 0..raster.bands {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            let mut count = 0u64;
            for y in 0..raster.height {
                for x in 0..raster.width {
                    if raster.is_masked(x, y) {
                        continue;
                    }
                    let Some(value) = raster.sample_value(x, y, band) else {
                        continue;
                    };
                    if let Some(nd) = no_data.and_then(|v| v.get(band as usize)) {
                        if value == *nd {
                            continue;
                        }
                    }
                    min = min.min(value);
                    max = max.max(value);
                    sum += value;
                    count += 1;
                }
            }
            bands.push(BandStatistics {
                min: if count > 0 { min } else { 0.0 },
                max: if count > 0 { max } else { 0.0 },
                mean: if count > 0 { sum / count as f64 } else { 0.0 },
                sample_count: count,
            });
        }
        Self { bands }
    }
}

/// 待导入的剖分定义
#[derive(Debug, Clone)]
pub struct SectionDef {
    /// 剖分名称
    pub name: String,
    /// 源影像宽度(像素)
    pub width: u32,
    /// 源影像高度(像素)
    pub height: u32,
    /// 足迹多边形,位于覆盖层空间参考系
    pub footprint: Polygon<f64>,
    /// 源文件路径(受覆盖层策略控制)
    pub file_path: Option<String>,
    /// 源文件 MD5 校验和(受覆盖层策略控制)
    pub md5: Option<String>,
    /// 摘要信息(受覆盖层策略控制)
    pub summary: Option<String>,
}

/// 持久化的剖分行
#[derive(Debug, Clone)]
pub struct Section {
    pub section_id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bbox: BoundingBox,
    pub file_path: Option<String>,
    pub md5: Option<String>,
    pub summary: Option<String>,
    pub statistics: Option<SectionStatistics>,
}

/// 空间范围查询返回的瓦片行
#[derive(Debug, Clone)]
pub struct TileRecord {
    pub tile_id: i64,
    pub section_id: i64,
    pub pyramid_level: u32,
    pub bbox: BoundingBox,
}

/// 持久化金字塔存储
///
/// 所有持久化实体归关系存储所有;检索引擎只持有请求作用域的
/// 瞬态副本,在每次检索结束时销毁。
pub struct PyramidStore {
    conn: Connection,
}

impl PyramidStore {
    /// 打开(或创建)一个存储文件
    pub fn open<P: AsRef<Path>>(path: P) -> SchemaResult<Self> {
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        Ok(store)
    }

    /// 打开一个内存存储(测试用)
    pub fn open_in_memory() -> SchemaResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    /// 创建全局覆盖层目录表
    fn init(&self) -> SchemaResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS raster_coverages (
                name TEXT PRIMARY KEY,
                sample INTEGER NOT NULL,
                pixel INTEGER NOT NULL,
                bands INTEGER NOT NULL,
                codec INTEGER NOT NULL,
                tile_width INTEGER NOT NULL,
                tile_height INTEGER NOT NULL,
                srid INTEGER NOT NULL,
                x_res REAL NOT NULL,
                y_res REAL NOT NULL,
                strict_resolution INTEGER NOT NULL DEFAULT 0,
                mixed_resolutions INTEGER NOT NULL DEFAULT 0,
                keep_section_paths INTEGER NOT NULL DEFAULT 0,
                keep_section_md5 INTEGER NOT NULL DEFAULT 0,
                keep_section_summaries INTEGER NOT NULL DEFAULT 0,
                no_data TEXT,
                palette BLOB,
                extent_minx REAL,
                extent_miny REAL,
                extent_maxx REAL,
                extent_maxy REAL
            )",
        )?;
        Ok(())
    }

    /// 创建一个覆盖层及其全部支撑关系
    ///
    /// 创建是全有或全无的: 目录行、剖分/层级/瓦片/载荷表与索引
    /// 在一个事务中建立,任何失败都会整体回滚。
    pub fn create_coverage(&mut self, coverage: &Coverage) -> PyraliteResult<()> {
        coverage.validate()?;
        validate_coverage_name(&coverage.name)?;
        if self.coverage_exists(&coverage.name)? {
            return Err(SchemaError::CoverageExists(coverage.name.clone()).into());
        }

        let name = &coverage.name;
        let no_data_json = coverage
            .no_data
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(SchemaError::from)?;
        let palette_blob = coverage.palette.as_ref().map(|p| p.to_blob());

        let tx = self.conn.transaction().map_err(SchemaError::from)?;
        tx.execute(
            "INSERT INTO raster_coverages (
                name, sample, pixel, bands, codec, tile_width, tile_height,
                srid, x_res, y_res, strict_resolution, mixed_resolutions,
                keep_section_paths, keep_section_md5, keep_section_summaries,
                no_data, palette
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                name,
                u8::from(coverage.sample),
                u8::from(coverage.pixel),
                coverage.bands,
                u8::from(coverage.codec),
                coverage.tile_width,
                coverage.tile_height,
                coverage.srid,
                coverage.x_res,
                coverage.y_res,
                coverage.policies.strict_resolution,
                coverage.policies.mixed_resolutions,
                coverage.policies.keep_section_paths,
                coverage.policies.keep_section_md5,
                coverage.policies.keep_section_summaries,
                no_data_json,
                palette_blob,
            ],
        )
        .map_err(SchemaError::from)?;

        // 剖分表
        tx.execute_batch(&format!(
            "CREATE TABLE \"{name}_sections\" (
                section_id INTEGER PRIMARY KEY AUTOINCREMENT,
                section_name TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                file_path TEXT,
                md5 TEXT,
                summary TEXT,
                statistics TEXT,
                footprint TEXT NOT NULL,
                minx REAL NOT NULL,
                miny REAL NOT NULL,
                maxx REAL NOT NULL,
                maxy REAL NOT NULL
            );
            CREATE INDEX \"{name}_sections_bbox\"
                ON \"{name}_sections\" (minx, maxx, miny, maxy);"
        ))
        .map_err(SchemaError::from)?;

        // 层级表: 混合分辨率覆盖层按 (剖分, 层级) 存储
        if coverage.policies.mixed_resolutions {
            tx.execute_batch(&format!(
                "CREATE TABLE \"{name}_section_levels\" (
                    section_id INTEGER NOT NULL
                        REFERENCES \"{name}_sections\" (section_id),
                    pyramid_level INTEGER NOT NULL,
                    x_res_1_1 REAL, y_res_1_1 REAL,
                    x_res_1_2 REAL, y_res_1_2 REAL,
                    x_res_1_4 REAL, y_res_1_4 REAL,
                    x_res_1_8 REAL, y_res_1_8 REAL,
                    PRIMARY KEY (section_id, pyramid_level)
                );"
            ))
            .map_err(SchemaError::from)?;
        } else {
            tx.execute_batch(&format!(
                "CREATE TABLE \"{name}_levels\" (
                    pyramid_level INTEGER PRIMARY KEY,
                    x_res_1_1 REAL, y_res_1_1 REAL,
                    x_res_1_2 REAL, y_res_1_2 REAL,
                    x_res_1_4 REAL, y_res_1_4 REAL,
                    x_res_1_8 REAL, y_res_1_8 REAL
                );"
            ))
            .map_err(SchemaError::from)?;
        }

        // 瓦片表与载荷表
        tx.execute_batch(&format!(
            "CREATE TABLE \"{name}_tiles\" (
                tile_id INTEGER PRIMARY KEY AUTOINCREMENT,
                section_id INTEGER NOT NULL
                    REFERENCES \"{name}_sections\" (section_id),
                pyramid_level INTEGER NOT NULL,
                footprint TEXT NOT NULL,
                minx REAL NOT NULL,
                miny REAL NOT NULL,
                maxx REAL NOT NULL,
                maxy REAL NOT NULL
            );
            CREATE INDEX \"{name}_tiles_bbox\"
                ON \"{name}_tiles\" (pyramid_level, minx, maxx, miny, maxy);
            CREATE INDEX \"{name}_tiles_section\"
                ON \"{name}_tiles\" (section_id, pyramid_level);
            CREATE TABLE \"{name}_tile_data\" (
                tile_id INTEGER PRIMARY KEY
                    REFERENCES \"{name}_tiles\" (tile_id),
                payload_odd BLOB NOT NULL,
                payload_even BLOB
            );"
        ))
        .map_err(SchemaError::from)?;

        tx.commit().map_err(SchemaError::from)?;
        Ok(())
    }

    /// 覆盖层是否存在
    pub fn coverage_exists(&self, name: &str) -> SchemaResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM raster_coverages WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 读取覆盖层定义
    pub fn get_coverage(&self, name: &str) -> SchemaResult<Coverage> {
        let row = self
            .conn
            .query_row(
                "SELECT sample, pixel, bands, codec, tile_width, tile_height,
                        srid, x_res, y_res, strict_resolution, mixed_resolutions,
                        keep_section_paths, keep_section_md5, keep_section_summaries,
                        no_data, palette, extent_minx, extent_miny, extent_maxx, extent_maxy
                 FROM raster_coverages WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, u8>(2)?,
                        row.get::<_, u8>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, i32>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        (
                            row.get::<_, bool>(9)?,
                            row.get::<_, bool>(10)?,
                            row.get::<_, bool>(11)?,
                            row.get::<_, bool>(12)?,
                            row.get::<_, bool>(13)?,
                        ),
                        row.get::<_, Option<String>>(14)?,
                        row.get::<_, Option<Vec<u8>>>(15)?,
                        (
                            row.get::<_, Option<f64>>(16)?,
                            row.get::<_, Option<f64>>(17)?,
                            row.get::<_, Option<f64>>(18)?,
                            row.get::<_, Option<f64>>(19)?,
                        ),
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| SchemaError::CoverageNotFound(name.to_string()))?;

        let (
            sample,
            pixel,
            bands,
            codec,
            tile_width,
            tile_height,
            srid,
            x_res,
            y_res,
            (strict, mixed, keep_paths, keep_md5, keep_summaries),
            no_data_json,
            palette_blob,
            extent,
        ) = row;

        let no_data = no_data_json
            .map(|json| serde_json::from_str::<Vec<f64>>(&json))
            .transpose()?;
        let palette = palette_blob.as_deref().and_then(Palette::from_blob);
        let extent = match extent {
            (Some(minx), Some(miny), Some(maxx), Some(maxy)) => {
                Some(BoundingBox::new(minx, miny, maxx, maxy))
            }
            _ => None,
        };

        Ok(Coverage {
            name: name.to_string(),
            sample: SampleKind::from(sample),
            pixel: PixelKind::from(pixel),
            bands,
            codec: TileCodec::from(codec),
            tile_width,
            tile_height,
            srid,
            x_res,
            y_res,
            no_data,
            palette,
            policies: CoveragePolicies {
                strict_resolution: strict,
                mixed_resolutions: mixed,
                keep_section_paths: keep_paths,
                keep_section_md5: keep_md5,
                keep_section_summaries: keep_summaries,
            },
            extent,
        })
    }

    /// 删除覆盖层及其全部支撑关系
    pub fn drop_coverage(&mut self, name: &str) -> SchemaResult<()> {
        validate_coverage_name(name)?;
        let coverage = self.get_coverage(name)?;
        let levels_table = levels_table_name(&coverage);

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{name}_tile_data\";
             DROP TABLE IF EXISTS \"{name}_tiles\";
             DROP TABLE IF EXISTS \"{levels_table}\";
             DROP TABLE IF EXISTS \"{name}_sections\";"
        ))?;
        tx.execute(
            "DELETE FROM raster_coverages WHERE name = ?1",
            params![name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// 导入一个剖分
    ///
    /// 包围盒列从足迹多边形推导;路径/MD5/摘要按覆盖层策略保留。
    pub fn insert_section(&self, coverage: &Coverage, def: &SectionDef) -> SchemaResult<i64> {
        let rect = def
            .footprint
            .bounding_rect()
            .ok_or_else(|| SchemaError::Wkt("剖分足迹为空".into()))?;
        let bbox = BoundingBox::from_rect(&rect);
        let footprint_wkt = def.footprint.wkt_string();

        let policies = &coverage.policies;
        self.conn.execute(
            &format!(
                "INSERT INTO \"{}_sections\"
                 (section_name, width, height, file_path, md5, summary,
                  footprint, minx, miny, maxx, maxy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                coverage.name
            ),
            params![
                def.name,
                def.width,
                def.height,
                if policies.keep_section_paths {
                    def.file_path.as_deref()
                } else {
                    None
                },
                if policies.keep_section_md5 {
                    def.md5.as_deref()
                } else {
                    None
                },
                if policies.keep_section_summaries {
                    def.summary.as_deref()
                } else {
                    None
                },
                footprint_wkt,
                bbox.minx,
                bbox.miny,
                bbox.maxx,
                bbox.maxy,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 读取一个剖分行
    pub fn section(&self, coverage: &Coverage, section_id: i64) -> SchemaResult<Section> {
        self.conn
            .query_row(
                &format!(
                    "SELECT section_id, section_name, width, height, file_path, md5,
                            summary, statistics, minx, miny, maxx, maxy
                     FROM \"{}_sections\" WHERE section_id = ?1",
                    coverage.name
                ),
                params![section_id],
                section_from_row,
            )
            .optional()?
            .ok_or(SchemaError::SectionNotFound(section_id))
    }

    /// 列出覆盖层的全部剖分
    pub fn sections(&self, coverage: &Coverage) -> SchemaResult<Vec<Section>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT section_id, section_name, width, height, file_path, md5,
                    summary, statistics, minx, miny, maxx, maxy
             FROM \"{}_sections\" ORDER BY section_id",
            coverage.name
        ))?;
        let rows = stmt.query_map([], section_from_row)?;
        let mut sections = Vec::new();
        for row in rows {
            sections.push(row?);
        }
        Ok(sections)
    }

    /// 更新剖分统计 blob
    pub fn update_section_statistics(
        &self,
        coverage: &Coverage,
        section_id: i64,
        statistics: &SectionStatistics,
    ) -> SchemaResult<()> {
        let json = serde_json::to_string(statistics)?;
        let updated = self.conn.execute(
            &format!(
                "UPDATE \"{}_sections\" SET statistics = ?1 WHERE section_id = ?2",
                coverage.name
            ),
            params![json, section_id],
        )?;
        if updated == 0 {
            return Err(SchemaError::SectionNotFound(section_id));
        }
        Ok(())
    }

    /// 写入一个层级行的分辨率对
    ///
    /// 混合分辨率覆盖层要求行携带剖分标识。重复写入同一层级
    /// 会替换原有的分辨率对。
    pub fn insert_level_resolutions(
        &self,
        coverage: &Coverage,
        row: &LevelResolutions,
    ) -> SchemaResult<()> {
        let pair = |slot: usize| -> (Option<f64>, Option<f64>) {
            match row.pairs[slot] {
                Some((x, y)) => (Some(x), Some(y)),
                None => (None, None),
            }
        };
        let (x1, y1) = pair(0);
        let (x2, y2) = pair(1);
        let (x4, y4) = pair(2);
        let (x8, y8) = pair(3);

        if coverage.policies.mixed_resolutions {
            let section_id = row
                .section_id
                .ok_or_else(|| SchemaError::SectionRequired(coverage.name.clone()))?;
            self.conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}_section_levels\"
                     (section_id, pyramid_level, x_res_1_1, y_res_1_1, x_res_1_2, y_res_1_2,
                      x_res_1_4, y_res_1_4, x_res_1_8, y_res_1_8)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    coverage.name
                ),
                params![section_id, row.pyramid_level, x1, y1, x2, y2, x4, y4, x8, y8],
            )?;
        } else {
            self.conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}_levels\"
                     (pyramid_level, x_res_1_1, y_res_1_1, x_res_1_2, y_res_1_2,
                      x_res_1_4, y_res_1_4, x_res_1_8, y_res_1_8)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    coverage.name
                ),
                params![row.pyramid_level, x1, y1, x2, y2, x4, y4, x8, y8],
            )?;
        }
        Ok(())
    }

    /// 枚举层级行,按层级编号排序
    ///
    /// 混合分辨率覆盖层必须提供剖分标识。行序决定分辨率匹配的
    /// 迭代顺序,进而决定"最后命中胜出"的结果。
    pub fn level_resolutions(
        &self,
        coverage: &Coverage,
        section_id: Option<i64>,
    ) -> SchemaResult<Vec<LevelResolutions>> {
        let mut rows_out = Vec::new();
        if coverage.policies.mixed_resolutions {
            let section_id =
                section_id.ok_or_else(|| SchemaError::SectionRequired(coverage.name.clone()))?;
            let mut stmt = self.conn.prepare(&format!(
                "SELECT pyramid_level, x_res_1_1, y_res_1_1, x_res_1_2, y_res_1_2,
                        x_res_1_4, y_res_1_4, x_res_1_8, y_res_1_8
                 FROM \"{}_section_levels\" WHERE section_id = ?1
                 ORDER BY pyramid_level",
                coverage.name
            ))?;
            let rows = stmt.query_map(params![section_id], move |row| {
                level_from_row(row, Some(section_id))
            })?;
            for row in rows {
                rows_out.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT pyramid_level, x_res_1_1, y_res_1_1, x_res_1_2, y_res_1_2,
                        x_res_1_4, y_res_1_4, x_res_1_8, y_res_1_8
                 FROM \"{}_levels\" ORDER BY pyramid_level",
                coverage.name
            ))?;
            let rows = stmt.query_map([], |row| level_from_row(row, None))?;
            for row in rows {
                rows_out.push(row?);
            }
        }
        Ok(rows_out)
    }

    /// 写入一个瓦片及其 odd 载荷
    ///
    /// 栅格通过覆盖层的编解码器编码;足迹与包围盒列一并维护。
    pub fn put_tile(
        &self,
        coverage: &Coverage,
        section_id: i64,
        pyramid_level: u32,
        bbox: &BoundingBox,
        raster: &PixelBuffer,
    ) -> PyraliteResult<i64> {
        let payload = codec::encode(raster, coverage.codec)?;
        let footprint_wkt = bbox.to_polygon().wkt_string();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}_tiles\"
                     (section_id, pyramid_level, footprint, minx, miny, maxx, maxy)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    coverage.name
                ),
                params![
                    section_id,
                    pyramid_level,
                    footprint_wkt,
                    bbox.minx,
                    bbox.miny,
                    bbox.maxx,
                    bbox.maxy
                ],
            )
            .map_err(SchemaError::from)?;
        let tile_id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}_tile_data\" (tile_id, payload_odd) VALUES (?1, ?2)",
                    coverage.name
                ),
                params![tile_id, payload],
            )
            .map_err(SchemaError::from)?;
        Ok(tile_id)
    }

    /// 写入瓦片的 even 载荷变体
    ///
    /// 仅在原生比例下使用,支持双编解码器或随时间变更的
    /// 载荷编码。
    pub fn put_tile_even_payload(
        &self,
        coverage: &Coverage,
        tile_id: i64,
        raster: &PixelBuffer,
        even_codec: TileCodec,
    ) -> PyraliteResult<()> {
        let payload = codec::encode(raster, even_codec)?;
        let updated = self
            .conn
            .execute(
                &format!(
                    "UPDATE \"{}_tile_data\" SET payload_even = ?1 WHERE tile_id = ?2",
                    coverage.name
                ),
                params![payload, tile_id],
            )
            .map_err(SchemaError::from)?;
        if updated == 0 {
            return Err(SchemaError::TileNotFound(tile_id).into());
        }
        Ok(())
    }

    /// 包围盒范围查询: 枚举指定层级与范围相交的瓦片
    ///
    /// 每次调用重新发出查询;行按瓦片标识排序,以保证
    /// 突发分组的确定性(对最终缓冲区没有语义影响)。
    pub fn tiles_intersecting(
        &self,
        coverage: &Coverage,
        pyramid_level: u32,
        bbox: &BoundingBox,
        section_id: Option<i64>,
    ) -> SchemaResult<Vec<TileRecord>> {
        let mut sql = format!(
            "SELECT tile_id, section_id, pyramid_level, minx, miny, maxx, maxy
             FROM \"{}_tiles\"
             WHERE pyramid_level = ?1
               AND maxx >= ?2 AND minx <= ?3
               AND maxy >= ?4 AND miny <= ?5",
            coverage.name
        );
        if section_id.is_some() {
            sql.push_str(" AND section_id = ?6");
        }
        sql.push_str(" ORDER BY tile_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(TileRecord {
                tile_id: row.get(0)?,
                section_id: row.get(1)?,
                pyramid_level: row.get(2)?,
                bbox: BoundingBox::new(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
            })
        };
        let mut records = Vec::new();
        if let Some(section_id) = section_id {
            let rows = stmt.query_map(
                params![
                    pyramid_level,
                    bbox.minx,
                    bbox.maxx,
                    bbox.miny,
                    bbox.maxy,
                    section_id
                ],
                map_row,
            )?;
            for row in rows {
                records.push(row?);
            }
        } else {
            let rows = stmt.query_map(
                params![pyramid_level, bbox.minx, bbox.maxx, bbox.miny, bbox.maxy],
                map_row,
            )?;
            for row in rows {
                records.push(row?);
            }
        }
        Ok(records)
    }

    /// 读取瓦片载荷
    ///
    /// 原生比例 (1:1) 下优先使用 even 变体(存在时),
    /// 其他所有比例只读取 odd 变体。
    pub fn tile_payload(
        &self,
        coverage: &Coverage,
        tile_id: i64,
        scale: TileScale,
    ) -> SchemaResult<Vec<u8>> {
        let (odd, even): (Vec<u8>, Option<Vec<u8>>) = self
            .conn
            .query_row(
                &format!(
                    "SELECT payload_odd, payload_even FROM \"{}_tile_data\" WHERE tile_id = ?1",
                    coverage.name
                ),
                params![tile_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(SchemaError::TileNotFound(tile_id))?;
        match (scale, even) {
            (TileScale::Full, Some(even)) => Ok(even),
            _ => Ok(odd),
        }
    }

    /// 读取瓦片的足迹多边形
    pub fn tile_footprint(&self, coverage: &Coverage, tile_id: i64) -> SchemaResult<Polygon<f64>> {
        let wkt_text: String = self
            .conn
            .query_row(
                &format!(
                    "SELECT footprint FROM \"{}_tiles\" WHERE tile_id = ?1",
                    coverage.name
                ),
                params![tile_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(SchemaError::TileNotFound(tile_id))?;
        Polygon::try_from_wkt_str(&wkt_text).map_err(|e| SchemaError::Wkt(e.to_string()))
    }

    /// 从剖分足迹重算覆盖层范围
    ///
    /// 没有剖分时清空范围。返回新的范围。
    pub fn update_coverage_extent(&self, coverage: &Coverage) -> SchemaResult<Option<BoundingBox>> {
        let extent: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) = self.conn.query_row(
            &format!(
                "SELECT MIN(minx), MIN(miny), MAX(maxx), MAX(maxy) FROM \"{}_sections\"",
                coverage.name
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let bbox = match extent {
            (Some(minx), Some(miny), Some(maxx), Some(maxy)) => {
                Some(BoundingBox::new(minx, miny, maxx, maxy))
            }
            _ => None,
        };
        self.conn.execute(
            "UPDATE raster_coverages
             SET extent_minx = ?1, extent_miny = ?2, extent_maxx = ?3, extent_maxy = ?4
             WHERE name = ?5",
            params![
                bbox.map(|b| b.minx),
                bbox.map(|b| b.miny),
                bbox.map(|b| b.maxx),
                bbox.map(|b| b.maxy),
                coverage.name
            ],
        )?;
        Ok(bbox)
    }
}

/// 层级表名(混合分辨率覆盖层使用逐剖分层级表)
fn levels_table_name(coverage: &Coverage) -> String {
    if coverage.policies.mixed_resolutions {
        format!("{}_section_levels", coverage.name)
    } else {
        format!("{}_levels", coverage.name)
    }
}

/// 覆盖层名称校验
///
/// 名称会嵌入表名,只允许小写字母、数字与下划线,
/// 且必须以字母开头。
fn validate_coverage_name(name: &str) -> SchemaResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::BadCoverageName(name.to_string()))
    }
}

fn section_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Section> {
    let statistics_json: Option<String> = row.get(7)?;
    Ok(Section {
        section_id: row.get(0)?,
        name: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        file_path: row.get(4)?,
        md5: row.get(5)?,
        summary: row.get(6)?,
        statistics: statistics_json.and_then(|json| serde_json::from_str(&json).ok()),
        bbox: BoundingBox::new(row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?),
    })
}

fn level_from_row(
    row: &rusqlite::Row<'_>,
    section_id: Option<i64>,
) -> rusqlite::Result<LevelResolutions> {
    let pair = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };
    Ok(LevelResolutions {
        pyramid_level: row.get(0)?,
        section_id,
        pairs: [
            pair(row.get(1)?, row.get(2)?),
            pair(row.get(3)?, row.get(4)?),
            pair(row.get(5)?, row.get(6)?),
            pair(row.get(7)?, row.get(8)?),
        ],
    })
}
