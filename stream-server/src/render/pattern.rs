// 动态测试图案
//
// 画面内容：沿圆周运动的方块、若干弹跳粒子、以及七段数码管样式的
// HH:MM:SS 计时器。画面完全由帧序号推导，同一个种子渲染结果一致。

use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use super::{Frame, FrameSource};

const PARTICLE_COUNT: usize = 20;
const SQUARE_SIZE: u32 = 200;
/// 方块绕圈周期（秒）
const ORBIT_PERIOD_SECS: f64 = 5.0;
const ORBIT_CENTER: (f64, f64) = (200.0, 200.0);
const ORBIT_RADIUS: f64 = 200.0;

const CLOCK_ORIGIN: (u32, u32) = (20, 100);
const DIGIT_WIDTH: u32 = 30;
const DIGIT_HEIGHT: u32 = 60;
const SEGMENT_THICKNESS: u32 = 6;
const DIGIT_SPACING: u32 = 12;
const CLOCK_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// 七段数码管编码，bit0..bit6 依次为 a..g
const SEVEN_SEGMENT: [u8; 10] = [
    0x3F, // 0
    0x06, // 1
    0x5B, // 2
    0x4F, // 3
    0x66, // 4
    0x6D, // 5
    0x7D, // 6
    0x07, // 7
    0x7F, // 8
    0x6F, // 9
];

#[derive(Debug, Clone)]
struct Particle {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    radius: u32,
    color: Rgb<u8>,
}

/// 测试图案帧源
pub struct TestPatternSource {
    width: u32,
    height: u32,
    fps: u32,
    seed: u64,
    frame_index: u64,
    square_color: Rgb<u8>,
    particles: Vec<Particle>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32, seed: u64) -> Self {
        let mut source = Self {
            width,
            height,
            fps: fps.max(1),
            seed,
            frame_index: 0,
            square_color: Rgb([255, 0, 0]),
            particles: Vec::with_capacity(PARTICLE_COUNT),
        };
        source.scatter();
        source
    }

    /// 已渲染的帧数
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn scatter(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.square_color = Rgb([rng.gen_range(128..=255), rng.gen(), rng.gen()]);
        self.particles = (0..PARTICLE_COUNT)
            .map(|_| Particle {
                x: rng.gen_range(0.0..self.width as f64),
                y: rng.gen_range(0.0..self.height as f64),
                vx: rng.gen_range(-1.0..1.0),
                vy: rng.gen_range(-1.0..1.0),
                radius: rng.gen_range(2..7),
                color: Rgb([rng.gen(), rng.gen(), rng.gen()]),
            })
            .collect();
    }

    fn elapsed_secs(&self) -> f64 {
        self.frame_index as f64 / self.fps as f64
    }

    fn step_particles(&mut self) {
        let (max_x, max_y) = (self.width as f64, self.height as f64);
        for p in &mut self.particles {
            p.x += p.vx;
            p.y += p.vy;
            if p.x < 0.0 || p.x > max_x {
                p.vx = -p.vx;
            }
            if p.y < 0.0 || p.y > max_y {
                p.vy = -p.vy;
            }
            p.x = p.x.clamp(0.0, max_x);
            p.y = p.y.clamp(0.0, max_y);
        }
    }
}

impl FrameSource for TestPatternSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn produce_frame(&mut self) -> Frame {
        let t = self.elapsed_secs();
        let mut frame = Frame::new(self.width, self.height);

        let angle = t * 2.0 * PI / ORBIT_PERIOD_SECS;
        let cx = ORBIT_CENTER.0 + ORBIT_RADIUS * angle.cos();
        let cy = ORBIT_CENTER.1 + ORBIT_RADIUS * angle.sin();
        let half = (SQUARE_SIZE / 2) as i64;
        fill_rect(
            &mut frame,
            cx as i64 - half,
            cy as i64 - half,
            SQUARE_SIZE,
            SQUARE_SIZE,
            self.square_color,
        );

        for p in &self.particles {
            fill_circle(&mut frame, p.x as i64, p.y as i64, p.radius, p.color);
        }

        draw_clock(&mut frame, &format_clock(t as u64), CLOCK_ORIGIN, CLOCK_COLOR);

        self.step_particles();
        self.frame_index += 1;
        frame
    }

    fn reset(&mut self) {
        self.frame_index = 0;
        self.scatter();
    }
}

/// 把秒数格式化为 HH:MM:SS
pub fn format_clock(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// 填充矩形，超出画面的部分被裁剪
fn fill_rect(frame: &mut Frame, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w as i64).min(frame.width() as i64);
    let y1 = (y + h as i64).min(frame.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            frame.put_pixel(px as u32, py as u32, color);
        }
    }
}

fn fill_circle(frame: &mut Frame, cx: i64, cy: i64, radius: u32, color: Rgb<u8>) {
    let r = radius as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let (px, py) = (cx + dx, cy + dy);
            if px >= 0 && py >= 0 && (px as u32) < frame.width() && (py as u32) < frame.height() {
                frame.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

fn draw_digit(frame: &mut Frame, digit: u8, x: u32, y: u32, color: Rgb<u8>) {
    let mask = SEVEN_SEGMENT[(digit % 10) as usize];
    let (x, y) = (x as i64, y as i64);
    let (w, h, t) = (DIGIT_WIDTH, DIGIT_HEIGHT, SEGMENT_THICKNESS);
    let half = (h / 2) as i64;
    let segments: [(i64, i64, u32, u32); 7] = [
        (x, y, w, t),                                  // a
        (x + (w - t) as i64, y, t, h / 2),             // b
        (x + (w - t) as i64, y + half, t, h / 2),      // c
        (x, y + (h - t) as i64, w, t),                 // d
        (x, y + half, t, h / 2),                       // e
        (x, y, t, h / 2),                              // f
        (x, y + half - (t / 2) as i64, w, t),          // g
    ];
    for (bit, (sx, sy, sw, sh)) in segments.iter().enumerate() {
        if mask & (1 << bit) != 0 {
            fill_rect(frame, *sx, *sy, *sw, *sh, color);
        }
    }
}

fn draw_clock(frame: &mut Frame, text: &str, origin: (u32, u32), color: Rgb<u8>) {
    let (mut x, y) = origin;
    for ch in text.chars() {
        match ch.to_digit(10) {
            Some(d) => {
                draw_digit(frame, d as u8, x, y, color);
                x += DIGIT_WIDTH + DIGIT_SPACING;
            }
            None => {
                // 冒号
                let dot = SEGMENT_THICKNESS;
                fill_rect(frame, x as i64, (y + DIGIT_HEIGHT / 3) as i64, dot, dot, color);
                fill_rect(frame, x as i64, (y + 2 * DIGIT_HEIGHT / 3) as i64, dot, dot, color);
                x += dot + DIGIT_SPACING;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let mut source = TestPatternSource::new(640, 360, 30, 1);
        assert_eq!(source.dimensions(), (640, 360));
        let frame = source.produce_frame();
        assert_eq!(frame.dimensions(), (640, 360));
        assert_eq!(source.frame_index(), 1);
    }

    #[test]
    fn test_same_seed_renders_same_frames() {
        let mut a = TestPatternSource::new(320, 240, 30, 42);
        let mut b = TestPatternSource::new(320, 240, 30, 42);
        for _ in 0..5 {
            assert_eq!(a.produce_frame(), b.produce_frame());
        }
    }

    #[test]
    fn test_frames_change_over_time() {
        let mut source = TestPatternSource::new(320, 240, 30, 7);
        let first = source.produce_frame();
        let second = source.produce_frame();
        assert_ne!(first, second);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut source = TestPatternSource::new(320, 240, 30, 9);
        let first = source.produce_frame();
        source.produce_frame();
        source.reset();
        assert_eq!(source.frame_index(), 0);
        assert_eq!(source.produce_frame(), first);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(61), "00:01:01");
        assert_eq!(format_clock(3600 * 25 + 5), "25:00:05");
    }

    #[test]
    fn test_digit_one_lights_right_column_only() {
        let mut frame = Frame::new(64, 80);
        draw_digit(&mut frame, 1, 0, 0, CLOCK_COLOR);
        // b/c 段
        assert_eq!(frame.get_pixel(DIGIT_WIDTH - 1, 10), &CLOCK_COLOR);
        assert_eq!(frame.get_pixel(DIGIT_WIDTH - 1, DIGIT_HEIGHT - 10), &CLOCK_COLOR);
        // f/e 段不亮
        assert_eq!(frame.get_pixel(0, 10), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(0, DIGIT_HEIGHT - 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_shapes_clip_at_edges() {
        let mut frame = Frame::new(10, 10);
        fill_rect(&mut frame, -5, -5, 8, 8, Rgb([1, 2, 3]));
        fill_circle(&mut frame, 9, 9, 4, Rgb([4, 5, 6]));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert_eq!(frame.get_pixel(9, 9), &Rgb([4, 5, 6]));
    }
}
