// 帧渲染模块
//
// 控制器每个tick向 `FrameSource` 要一帧固定尺寸的RGB图像，
// 再交给编码器进程。渲染内容本身无关紧要，这里提供一个
// 动态测试图案，方便肉眼确认直播流在走。

pub mod codec;
pub mod pattern;

pub use codec::FrameCodec;
pub use pattern::TestPatternSource;

/// 原始帧：按行存储的 RGB8 像素
pub type Frame = image::RgbImage;

/// 帧源
///
/// 每次调用返回一帧 `dimensions()` 尺寸的图像。
/// 调用频率等于推流帧率，单次调用不应超过一个tick间隔。
pub trait FrameSource: Send {
    /// 帧尺寸（宽, 高）
    fn dimensions(&self) -> (u32, u32);

    /// 生成下一帧
    fn produce_frame(&mut self) -> Frame;

    /// 新会话开始时调用
    fn reset(&mut self) {}
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn produce_frame(&mut self) -> Frame {
        (**self).produce_frame()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
