//! 栅格样式模块
//!
//! 本模块实现了检索路径上的可选样式处理。目前唯一的样式是
//! 山体阴影调制: 在该范围的所有瓦片都合成完毕之后,作为对
//! 整个缓冲区的第二次完整扫描执行,不是逐瓦片执行。

use crate::coverage::{PyraliteError, PyraliteResult};
use crate::raster::{PixelBuffer, PixelKind, SampleKind};

/// 检索调用的样式配置
#[derive(Debug, Clone, Default)]
pub struct RasterStyle {
    /// 山体阴影调制
    pub shaded_relief: Option<ShadedRelief>,
}

/// 山体阴影系数
///
/// 每个输出像素一个系数;[0, 1] 内的系数按比例缩放该像素的
/// RGB 三个通道,区间外的系数表示"不受影响",原样通过。
#[derive(Debug, Clone)]
pub struct ShadedRelief {
    pub coefficients: Vec<f64>,
}

/// 对已合成的缓冲区应用山体阴影调制
///
/// 要求输出为 8 位 RGB,系数数量与像素数一致;
/// 这些条件在任何 I/O 之前由渲染入口校验。
pub fn apply_shaded_relief(
    buffer: &mut PixelBuffer,
    relief: &ShadedRelief,
) -> PyraliteResult<()> {
    if buffer.pixel != PixelKind::Rgb || buffer.sample != SampleKind::UInt8 {
        return Err(PyraliteError::UnsupportedConfiguration(format!(
            "山体阴影要求 8 位 RGB 输出,实际为 {:?}/{:?}",
            buffer.sample, buffer.pixel
        )));
    }
    let pixels = buffer.width as usize * buffer.height as usize;
    if relief.coefficients.len() != pixels {
        return Err(PyraliteError::UnsupportedConfiguration(format!(
            "山体阴影系数数量 {} 与像素数 {} 不符",
            relief.coefficients.len(),
            pixels
        )));
    }

    for (index, coefficient) in relief.coefficients.iter().enumerate() {
        // 区间外的系数标记为"不受影响"
        if !(0.0..=1.0).contains(coefficient) {
            continue;
        }
        let offset = index * 3;
        for channel in 0..3 {
            let value = buffer.buffer[offset + channel] as f64;
            buffer.buffer[offset + channel] = (value * coefficient).round() as u8;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_buffer(values: &[u8]) -> PixelBuffer {
        PixelBuffer::new(
            2,
            1,
            SampleKind::UInt8,
            PixelKind::Rgb,
            3,
            values.to_vec(),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn coefficients_scale_rgb_channels() {
        let mut buffer = rgb_buffer(&[100, 200, 50, 80, 80, 80]);
        let relief = ShadedRelief {
            coefficients: vec![0.5, 1.0],
        };
        apply_shaded_relief(&mut buffer, &relief).unwrap();
        assert_eq!(&buffer.buffer[..3], &[50, 100, 25]);
        assert_eq!(&buffer.buffer[3..], &[80, 80, 80]);
    }

    #[test]
    fn out_of_range_coefficients_pass_through() {
        let mut buffer = rgb_buffer(&[100, 100, 100, 60, 60, 60]);
        let relief = ShadedRelief {
            coefficients: vec![-1.0, 2.0],
        };
        apply_shaded_relief(&mut buffer, &relief).unwrap();
        assert_eq!(buffer.buffer, vec![100, 100, 100, 60, 60, 60]);
    }

    #[test]
    fn non_rgb_output_is_rejected() {
        let mut buffer =
            PixelBuffer::primed(2, 2, SampleKind::UInt8, PixelKind::Grayscale, 1, None).unwrap();
        let relief = ShadedRelief {
            coefficients: vec![1.0; 4],
        };
        assert!(matches!(
            apply_shaded_relief(&mut buffer, &relief),
            Err(PyraliteError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn coefficient_count_is_checked() {
        let mut buffer = rgb_buffer(&[0; 6]);
        let relief = ShadedRelief {
            coefficients: vec![1.0],
        };
        assert!(apply_shaded_relief(&mut buffer, &relief).is_err());
    }
}
