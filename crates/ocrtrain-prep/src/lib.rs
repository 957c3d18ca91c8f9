//! Dataset preparation for ocrtrain.
//!
//! - [`icdar`] converts ICDAR 2019 MLT ground truth into detection label files
//! - [`inspect`] reports the layout of a raw dataset directory

pub mod icdar;
pub mod inspect;

pub use icdar::{convert, read_ground_truth, Annotation, ConvertOptions, ConvertReport, ImageAnnotations};
pub use inspect::{inspect, DatasetLayout, DirListing};
