//! Image sensor formats.

/// Physical size of an image sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    pub name: &'static str,
    /// mm
    pub width: f64,
    /// mm
    pub height: f64,
}

/// Sony APS-C, as in the α6000 series.
pub const APS_C: Sensor = Sensor { name: "APS-C", width: 23.5, height: 15.6 };

/// 35 mm full frame.
pub const FULL_FRAME: Sensor = Sensor { name: "full frame", width: 36.0, height: 24.0 };

impl Sensor {
    /// Diagonal in millimeters.
    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.height)
    }

    /// Ratio of the full-frame diagonal to this sensor's diagonal.
    pub fn crop_factor(&self) -> f64 {
        FULL_FRAME.diagonal() / self.diagonal()
    }

    /// Field of view across the sensor width, in degrees, behind a lens of `focal_length` mm.
    pub fn horizontal_field_of_view(&self, focal_length: f64) -> f64 {
        2.0 * (self.width / (2.0 * focal_length)).atan().to_degrees()
    }
}
