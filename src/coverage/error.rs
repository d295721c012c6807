//! 栅格金字塔引擎错误处理模块
//!
//! 本模块提供了 pyralite 库的错误处理机制,包含以下主要功能:
//!
//! - 定义了统一的错误类型 [`PyraliteError`]
//! - 实现了错误类型之间的转换
//!
//! # 错误分类
//!
//! ## 检索错误
//! - 分辨率匹配失败
//! - 不支持的覆盖层配置
//!
//! ## 数据处理错误
//! - 瓦片载荷解码失败
//! - 目标缓冲区分配失败
//!
//! ## 存储错误
//! - 模式访问与 SQL 执行错误
//! - 坐标重投影错误
//!
//! 所有内部失败(SQL 错误、编解码错误)都会在组件边界处
//! 包装为上述类别之一;除记录在案的几何宽容处理外,
//! 任何组件都不会把致命条件降级为警告。

use crate::codec::CodecError;
use crate::geometry::srs::SrsError;
use crate::raster::RasterError;
use crate::schema::SchemaError;
use std::fmt;

/// pyralite 操作的通用结果类型
pub type PyraliteResult<T> = Result<T, PyraliteError>;

/// pyralite 库中所有可能出现的错误类型
///
/// 一次检索调用要么产出完整合成的缓冲区,要么返回
/// 这里的单个终止错误,不存在部分/降级输出。
#[derive(Debug)]
pub enum PyraliteError {
    /// 没有任何存储的分辨率对落在请求分辨率的容差范围内,
    /// 或对逐剖分分辨率的覆盖层查询时未声明剖分。
    /// 包含请求的 (x_res, y_res)。
    NoMatchingResolution((f64, f64)),
    /// 瓦片载荷损坏或无法解码。立即中止整个检索,
    /// 已成功的瓦片结果被丢弃。
    TileDecode(CodecError),
    /// 在任何 I/O 之前拒绝的覆盖层配置错误,
    /// 例如对非多波段覆盖层请求三波段提取。
    UnsupportedConfiguration(String),
    /// 模式访问/SQL 错误
    Schema(SchemaError),
    /// 坐标重投影错误
    Srs(SrsError),
    /// 栅格缓冲区错误(含目标缓冲区分配失败)
    Raster(RasterError),
    /// 解码工作池构建失败,包含错误描述
    DecodePool(String),
}

impl fmt::Display for PyraliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for PyraliteError {}

/// 从编解码错误转换
///
/// 瓦片载荷的解码失败统一归类为 TileDecode。
impl From<CodecError> for PyraliteError {
    fn from(e: CodecError) -> Self {
        PyraliteError::TileDecode(e)
    }
}

/// 从模式访问错误转换
impl From<SchemaError> for PyraliteError {
    fn from(e: SchemaError) -> Self {
        PyraliteError::Schema(e)
    }
}

/// 从重投影错误转换
impl From<SrsError> for PyraliteError {
    fn from(e: SrsError) -> Self {
        PyraliteError::Srs(e)
    }
}

/// 从栅格错误转换
impl From<RasterError> for PyraliteError {
    fn from(e: RasterError) -> Self {
        PyraliteError::Raster(e)
    }
}
