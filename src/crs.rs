use geo_types::{LineString, Polygon};
use proj4rs::Proj;
use thiserror::Error;

use crate::model::{BuildingFeature, FeatureCollection};

/// 出力CRSは固定（GeoJSONの前提でもある）
pub const OUTPUT_CRS: &str = "EPSG:4326";

#[derive(Debug, Error)]
pub enum CrsError {
    #[error("unsupported CRS identifier: {0}")]
    Unsupported(String),
    #[error("projection setup failed: {0}")]
    Setup(String),
    #[error("coordinate transform failed: {0}")]
    Transform(String),
}

/// 平面直角座標系 I〜XIX 系の原点 (lat_0, lon_0)。EPSG:6669〜6687 に対応する
const PLANE_RECT_ORIGINS: [(f64, f64); 19] = [
    (33.0, 129.5),              // I
    (33.0, 131.0),              // II
    (36.0, 132.16666666666666), // III
    (33.0, 133.5),              // IV
    (36.0, 134.33333333333334), // V
    (36.0, 136.0),              // VI
    (36.0, 137.16666666666666), // VII
    (36.0, 138.5),              // VIII
    (36.0, 139.83333333333334), // IX
    (40.0, 140.83333333333334), // X
    (44.0, 140.25),             // XI
    (44.0, 142.25),             // XII
    (44.0, 144.25),             // XIII
    (26.0, 142.0),              // XIV
    (26.0, 127.5),              // XV
    (26.0, 124.0),              // XVI
    (26.0, 131.0),              // XVII
    (20.0, 136.0),              // XVIII
    (26.0, 154.0),              // XIX
];

/// PLATEAUの配布データで実際に見かけるEPSGコードだけを登録している
pub fn proj_string_for_epsg(code: u32) -> Option<String> {
    // 平面直角座標系（JGD2011）
    if (6669..=6687).contains(&code) {
        let (lat_0, lon_0) = PLANE_RECT_ORIGINS[(code - 6669) as usize];
        return Some(format!(
            "+proj=tmerc +lat_0={lat_0} +lon_0={lon_0} +k=0.9999 +x_0=0 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
        ));
    }

    let proj = match code {
        4326 => "+proj=longlat +datum=WGS84 +no_defs",
        // JGD2011 緯度経度。6697 は標高を含む複合系なので水平成分として扱う
        6668 | 6697 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs",
        // JGD2000 緯度経度
        4612 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs",
        // 旧日本測地系（Tokyo Datum）
        4301 => "+proj=longlat +ellps=bessel +towgs84=-146.414,507.337,680.507,0,0,0,0 +no_defs",
        // Webメルカトル
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
        _ => return None,
    };
    Some(proj.to_string())
}

/// "EPSG:6677" / "6677" / OGCのURN・URL形式からEPSGコードを取り出す
fn parse_epsg_code(raw: &str) -> Option<u32> {
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse().ok();
    }
    if raw.to_ascii_uppercase().contains("EPSG") {
        return raw
            .rsplit(|c: char| c == ':' || c == '/')
            .find(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
            .and_then(|part| part.parse().ok());
    }
    None
}

fn build_proj(identifier: &str) -> Result<Proj, CrsError> {
    let trimmed = identifier.trim();
    // PROJ文字列はそのまま受け付ける
    if trimmed.starts_with('+') {
        return Proj::from_proj_string(trimmed).map_err(|e| CrsError::Setup(e.to_string()));
    }
    let code =
        parse_epsg_code(trimmed).ok_or_else(|| CrsError::Unsupported(identifier.to_string()))?;
    let proj_string =
        proj_string_for_epsg(code).ok_or_else(|| CrsError::Unsupported(identifier.to_string()))?;
    Proj::from_proj_string(&proj_string).map_err(|e| CrsError::Setup(e.to_string()))
}

/// コレクションを EPSG:4326 に変換する。
/// 失敗しても致命的エラーにはせず、座標をそのまま残して crs_fallback を立てる
pub fn to_wgs84(mut collection: FeatureCollection) -> FeatureCollection {
    let source = collection.crs.trim().to_string();

    // すでに出力CRSなら何もしない
    if parse_epsg_code(&source) == Some(4326) {
        collection.crs = OUTPUT_CRS.to_string();
        collection.crs_fallback = false;
        return collection;
    }

    match reproject_features(&collection.features, &source) {
        Ok(features) => {
            collection.features = features;
            collection.crs = OUTPUT_CRS.to_string();
            collection.crs_fallback = false;
            collection
        }
        Err(err) => {
            tracing::warn!(
                "CRS reprojection from {} failed ({}), passing coordinates through unchanged",
                source,
                err
            );
            collection.crs_fallback = true;
            collection
        }
    }
}

/// 全フィーチャを変換できた場合だけ新しいリングを返す。
/// 1点でも失敗したら元の座標には手を付けない
fn reproject_features(
    features: &[BuildingFeature],
    source: &str,
) -> Result<Vec<BuildingFeature>, CrsError> {
    let src = build_proj(source)?;
    let dst = build_proj(OUTPUT_CRS)?;

    features
        .iter()
        .map(|feature| {
            let exterior = feature
                .footprint
                .exterior()
                .coords()
                .map(|coord| transform_point(&src, &dst, coord.x, coord.y))
                .collect::<Result<Vec<(f64, f64)>, CrsError>>()?;
            Ok(BuildingFeature {
                footprint: Polygon::new(LineString::from(exterior), Vec::new()),
                height_m: feature.height_m,
                usage: feature.usage.clone(),
                year: feature.year,
            })
        })
        .collect()
}

fn transform_point(src: &Proj, dst: &Proj, x: f64, y: f64) -> Result<(f64, f64), CrsError> {
    let mut point = (x, y, 0.0);
    // proj4rs は緯度経度系の座標をラジアンで扱う
    if src.is_latlong() {
        point.0 = point.0.to_radians();
        point.1 = point.1.to_radians();
    }
    proj4rs::transform::transform(src, dst, &mut point)
        .map_err(|e| CrsError::Transform(e.to_string()))?;
    if dst.is_latlong() {
        point.0 = point.0.to_degrees();
        point.1 = point.1.to_degrees();
    }
    if !point.0.is_finite() || !point.1.is_finite() {
        return Err(CrsError::Transform("non-finite coordinate".to_string()));
    }
    Ok((point.0, point.1))
}
