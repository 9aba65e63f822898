//! Organized point clouds and the pixel → 3D position lookup.
//!
//! A `PointCloudFrame` follows the PointCloud2 layout: `height` rows of
//! `width` points, each point a `point_step`-byte record whose named fields
//! sit at fixed offsets. Depth cameras publish these registered to the color
//! image, so pixel (u, v) of the image is point (u, v) of the cloud.
//!
//! Every read is bounds-checked. A pixel outside the cloud, or a field whose
//! bytes run past the buffer, yields `TrackError::OutOfBounds`.

use serde::{Deserialize, Serialize};

use crate::detect::DetectionBox;
use crate::error::{TrackError, TrackResult};
use crate::motion::PositionSample;
use crate::wire::{hex_bytes, Header};

/// PointField datatype codes.
pub mod datatype {
    pub const INT8: u8 = 1;
    pub const UINT8: u8 = 2;
    pub const INT16: u8 = 3;
    pub const UINT16: u8 = 4;
    pub const INT32: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const FLOAT32: u8 = 7;
    pub const FLOAT64: u8 = 8;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointField {
    pub name: String,
    /// Byte offset of the field inside one point record.
    pub offset: u32,
    pub datatype: u8,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl PointField {
    pub fn float32(name: &str, offset: u32) -> Self {
        Self {
            name: name.to_string(),
            offset,
            datatype: datatype::FLOAT32,
            count: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointCloudFrame {
    pub header: Header,
    /// Number of rows.
    pub height: u32,
    /// Number of points per row.
    pub width: u32,
    pub fields: Vec<PointField>,
    #[serde(default)]
    pub is_bigendian: bool,
    /// Bytes per point.
    pub point_step: u32,
    /// Bytes per row.
    pub row_step: u32,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub is_dense: bool,
}

impl PointCloudFrame {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|field| field.name == name)
    }

    fn float_offset(&self, name: &str) -> TrackResult<usize> {
        let field = self
            .field(name)
            .ok_or_else(|| TrackError::MissingField(name.to_string()))?;
        if field.datatype != datatype::FLOAT32 {
            return Err(TrackError::UnsupportedField {
                name: name.to_string(),
                datatype: field.datatype,
            });
        }
        Ok(field.offset as usize)
    }

    /// Read the (x, y, z) floats of the point at column `u`, row `v`.
    pub fn point_at(&self, u: i64, v: i64) -> TrackResult<[f32; 3]> {
        let out_of_bounds = || TrackError::OutOfBounds {
            u,
            v,
            width: self.width,
            height: self.height,
        };

        if u < 0 || v < 0 || u >= i64::from(self.width) || v >= i64::from(self.height) {
            return Err(out_of_bounds());
        }

        let offsets = [
            self.float_offset("x")?,
            self.float_offset("y")?,
            self.float_offset("z")?,
        ];

        let base = (v as usize)
            .checked_mul(self.row_step as usize)
            .and_then(|row| {
                (u as usize)
                    .checked_mul(self.point_step as usize)
                    .and_then(|col| row.checked_add(col))
            })
            .ok_or_else(out_of_bounds)?;

        let mut point = [0.0f32; 3];
        for (value, offset) in point.iter_mut().zip(offsets) {
            let start = base.checked_add(offset).ok_or_else(out_of_bounds)?;
            *value = self.read_f32(start).ok_or_else(out_of_bounds)?;
        }
        Ok(point)
    }

    fn read_f32(&self, start: usize) -> Option<f32> {
        let end = start.checked_add(4)?;
        let bytes: [u8; 4] = self.data.get(start..end)?.try_into().ok()?;
        Some(if self.is_bigendian {
            f32::from_be_bytes(bytes)
        } else {
            f32::from_le_bytes(bytes)
        })
    }

    /// Check that the declared steps and buffer length agree.
    pub fn validate(&self) -> TrackResult<()> {
        let min_row = (self.width as u64) * (self.point_step as u64);
        if (self.row_step as u64) < min_row {
            return Err(TrackError::InvalidCloud(format!(
                "row_step {} is smaller than width * point_step ({})",
                self.row_step, min_row
            )));
        }
        let expected = (self.row_step as u64) * (self.height as u64);
        if (self.data.len() as u64) < expected {
            return Err(TrackError::InvalidCloud(format!(
                "data holds {} bytes, layout needs {}",
                self.data.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Map a detection to a 3D sample by reading the cloud at the box center.
///
/// The center is `(x + width / 2, y + height / 2)` with truncating division.
pub fn extract_position(
    cloud: &PointCloudFrame,
    bbox: &DetectionBox,
    timestamp: f64,
) -> TrackResult<PositionSample> {
    let (u, v) = bbox.center();
    let [x, y, z] = cloud.point_at(u, v)?;
    Ok(PositionSample { x, y, z, timestamp })
}

/// Builds little-endian organized XYZ clouds.
///
/// Points default to NaN, which is how depth cameras mark missing returns.
pub struct PointCloudBuilder {
    width: u32,
    height: u32,
    point_step: u32,
    row_padding: u32,
    header: Header,
    points: Vec<[f32; 3]>,
}

impl PointCloudBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            point_step: 16,
            row_padding: 0,
            header: Header::default(),
            points: vec![[f32::NAN; 3]; (width as usize) * (height as usize)],
        }
    }

    /// Bytes per point. Values below 12 are raised to 12.
    pub fn point_step(mut self, step: u32) -> Self {
        self.point_step = step.max(12);
        self
    }

    /// Extra bytes appended to every row.
    pub fn row_padding(mut self, padding: u32) -> Self {
        self.row_padding = padding;
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn set(&mut self, u: u32, v: u32, point: [f32; 3]) {
        if u < self.width && v < self.height {
            let index = (v as usize) * (self.width as usize) + u as usize;
            self.points[index] = point;
        }
    }

    pub fn fill(mut self, mut f: impl FnMut(u32, u32) -> [f32; 3]) -> Self {
        for v in 0..self.height {
            for u in 0..self.width {
                self.set(u, v, f(u, v));
            }
        }
        self
    }

    pub fn build(self) -> PointCloudFrame {
        let row_step = self.width * self.point_step + self.row_padding;
        let mut data = vec![0u8; (row_step as usize) * (self.height as usize)];
        for v in 0..self.height as usize {
            for u in 0..self.width as usize {
                let point = self.points[v * self.width as usize + u];
                let base = v * row_step as usize + u * self.point_step as usize;
                for (i, value) in point.iter().enumerate() {
                    let start = base + i * 4;
                    data[start..start + 4].copy_from_slice(&value.to_le_bytes());
                }
            }
        }

        PointCloudFrame {
            header: self.header,
            height: self.height,
            width: self.width,
            fields: vec![
                PointField::float32("x", 0),
                PointField::float32("y", 4),
                PointField::float32("z", 8),
            ],
            is_bigendian: false,
            point_step: self.point_step,
            row_step,
            data,
            is_dense: false,
        }
    }
}
