pub mod crs;
pub mod error;
pub mod model;
pub mod parser;
pub mod writer;
pub mod zip_handler;

pub use model::{BuildingFeature, CoordSeq, FeatureCollection};
pub use parser::{FallbackScan, ParseOptions};
pub use writer::GeoJsonWriter;
pub use zip_handler::ZipHandler;
