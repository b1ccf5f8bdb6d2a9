use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageError};
use serde::{Deserialize, Serialize};

use super::Frame;

/// 帧写入编码器stdin时的格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameCodec {
    /// 每帧一张独立PNG（ffmpeg image2pipe）
    #[default]
    Png,
    /// 紧凑的 rgb24 像素（ffmpeg rawvideo），CPU开销最小
    RawRgb24,
}

impl FrameCodec {
    /// 把一帧序列化成编码器期望的字节
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ImageError> {
        match self {
            FrameCodec::Png => {
                let mut buf = Vec::with_capacity(frame.as_raw().len() / 4);
                // 每秒几十帧，压缩率让位于速度
                let encoder =
                    PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Sub);
                encoder.write_image(
                    frame.as_raw(),
                    frame.width(),
                    frame.height(),
                    ExtendedColorType::Rgb8,
                )?;
                Ok(Bytes::from(buf))
            }
            FrameCodec::RawRgb24 => Ok(Bytes::copy_from_slice(frame.as_raw())),
        }
    }

    /// 编码器的输入参数（`-i pipe:0` 之前的部分）
    pub fn input_args(&self, width: u32, height: u32, fps: u32) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            FrameCodec::Png => {
                args.extend(["-f", "image2pipe", "-vcodec", "png"].map(String::from));
            }
            FrameCodec::RawRgb24 => {
                args.extend(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s"].map(String::from));
                args.push(format!("{}x{}", width, height));
            }
        }
        args.push("-r".to_string());
        args.push(fps.to_string());
        args.push("-i".to_string());
        args.push("pipe:0".to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checker(width: u32, height: u32) -> Frame {
        Frame::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_png_frame_is_decodable() {
        let frame = checker(32, 16);
        let bytes = FrameCodec::Png.encode(&frame).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 16));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(decoded.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_raw_frame_is_packed_rgb() {
        let frame = checker(8, 4);
        let bytes = FrameCodec::RawRgb24.encode(&frame).unwrap();
        assert_eq!(bytes.len(), 8 * 4 * 3);
        assert_eq!(&bytes[..6], &[255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_input_args() {
        let png = FrameCodec::Png.input_args(1280, 720, 30);
        assert_eq!(
            png,
            vec!["-f", "image2pipe", "-vcodec", "png", "-r", "30", "-i", "pipe:0"]
        );

        let raw = FrameCodec::RawRgb24.input_args(640, 360, 25);
        assert_eq!(
            raw,
            vec!["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", "640x360", "-r", "25", "-i", "pipe:0"]
        );
    }
}
