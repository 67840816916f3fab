use anyhow::{Context, Result};
use geojson::{Feature, Geometry, JsonObject, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::{BuildingFeature, FeatureCollection};

#[derive(Default)]
pub struct GeoJsonWriter {}

impl GeoJsonWriter {
    pub fn new() -> Self {
        Self {}
    }

    pub fn write(&self, collection: &FeatureCollection, output_path: &Path) -> Result<()> {
        tracing::info!(
            "Writing {} building features as GeoJSON: {:?}",
            collection.len(),
            output_path
        );

        let geojson = self.to_geojson(collection);

        let file = File::create(output_path)
            .context(format!("Failed to create output file: {:?}", output_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &geojson).context("Failed to encode GeoJSON")?;
        // BufWriter の Drop はフラッシュ時のIOエラーを捨てるので、明示的にフラッシュする
        writer.flush().context("Failed to write GeoJSON")?;

        Ok(())
    }

    fn to_geojson(&self, collection: &FeatureCollection) -> geojson::FeatureCollection {
        let features = collection
            .features
            .iter()
            .map(|feature| self.to_feature(feature))
            .collect();

        // GeoJSON標準には無いコレクション情報は foreign member として残す
        let mut foreign_members = JsonObject::new();
        foreign_members.insert(
            "sourceCrs".to_string(),
            serde_json::Value::from(collection.source_crs.as_str()),
        );
        foreign_members.insert(
            "crsFallback".to_string(),
            serde_json::Value::from(collection.crs_fallback),
        );

        geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        }
    }

    fn to_feature(&self, feature: &BuildingFeature) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert(
            "height_m".to_string(),
            serde_json::Value::from(feature.height_m),
        );

        // 欠損した属性はキーごと出力しない
        if let Some(usage) = &feature.usage {
            properties.insert("usage".to_string(), serde_json::Value::from(usage.as_str()));
        }
        if let Some(year) = feature.year {
            properties.insert("year".to_string(), serde_json::Value::from(year));
        }
        if let Some(centroid) = feature.centroid() {
            properties.insert("lon".to_string(), serde_json::Value::from(centroid.x()));
            properties.insert("lat".to_string(), serde_json::Value::from(centroid.y()));
        }

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::from(&feature.footprint))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}
