//! textline-export: pure serializers for extraction results (sans-IO)
//!
//! Converts extracted polylines into interchange formats. Currently
//! supports integer point arrays and a JSON contour dump.

pub mod json;

pub use json::{ContourDump, ExportError, PointArray, from_json, to_json, to_point_arrays};
