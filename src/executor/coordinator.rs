use crate::config::CoordinateConfig;

/// Upper bound of the normalised coordinate grid models answer in.
pub const RELATIVE_SCALE: i64 = 1000;

/// How the numbers inside an action should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateSpace {
    /// 0–1000 on each axis, scaled to the screenshot size.
    #[default]
    Relative,
    /// Device pixels, passed through unchanged.
    Absolute,
}

impl From<CoordinateConfig> for CoordinateSpace {
    fn from(cfg: CoordinateConfig) -> Self {
        match cfg {
            CoordinateConfig::Relative => CoordinateSpace::Relative,
            CoordinateConfig::Absolute => CoordinateSpace::Absolute,
        }
    }
}

impl CoordinateSpace {
    /// Map a model point to device pixels for a `width` × `height` screen.
    pub fn to_device(self, point: [i32; 2], width: u32, height: u32) -> (i32, i32) {
        match self {
            CoordinateSpace::Relative => relative_to_absolute(point, width, height),
            CoordinateSpace::Absolute => (point[0], point[1]),
        }
    }
}

/// `trunc(rel / 1000 * size)`, clamped to `[0, size]`.
pub fn relative_to_absolute(point: [i32; 2], width: u32, height: u32) -> (i32, i32) {
    (scale(point[0], width), scale(point[1], height))
}

fn scale(value: i32, size: u32) -> i32 {
    let size = i64::from(size);
    // integer division truncates toward zero
    let scaled = i64::from(value) * size / RELATIVE_SCALE;
    scaled.clamp(0, size).min(i64::from(i32::MAX)) as i32
}
