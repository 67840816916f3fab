use geo::Centroid;
use geo_types::{Point, Polygon};

use crate::crs::OUTPUT_CRS;

/// 座標テキストのデコード結果。リング内のタプル次元は必ず揃っている
#[derive(Debug, Clone, PartialEq)]
pub enum CoordSeq {
    Pairs2D(Vec<(f64, f64)>),
    Triples3D(Vec<(f64, f64, f64)>),
    Invalid,
}

impl CoordSeq {
    /// posList / coordinates / pos のテキストをタプル列に変換する
    ///
    /// 1. 空白区切りでトークン化
    /// 2. トークン数が3の倍数かつ6以上なら (x, y, z)
    /// 3. 2の倍数かつ6以上なら (x, y)
    /// 4. どちらでもなければカンマを空白に置き換えて再分割し、偶数個なら (x, y)
    ///
    /// 数値にならないトークンが1つでもあれば列全体を Invalid にする
    pub fn from_text(text: &str) -> Self {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let count = tokens.len();

        if count >= 6 && count % 3 == 0 {
            match parse_all(&tokens) {
                Some(values) => CoordSeq::Triples3D(
                    values.chunks(3).map(|c| (c[0], c[1], c[2])).collect(),
                ),
                None => CoordSeq::Invalid,
            }
        } else if count >= 6 && count % 2 == 0 {
            match parse_all(&tokens) {
                Some(values) => {
                    CoordSeq::Pairs2D(values.chunks(2).map(|c| (c[0], c[1])).collect())
                }
                None => CoordSeq::Invalid,
            }
        } else {
            // カンマ区切り（旧 gml:coordinates 形式）を想定した再分割
            let relaxed = text.replace(',', " ");
            let tokens: Vec<&str> = relaxed.split_whitespace().collect();
            if tokens.is_empty() || tokens.len() % 2 != 0 {
                return CoordSeq::Invalid;
            }
            match parse_all(&tokens) {
                Some(values) => {
                    CoordSeq::Pairs2D(values.chunks(2).map(|c| (c[0], c[1])).collect())
                }
                None => CoordSeq::Invalid,
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CoordSeq::Pairs2D(points) => points.len(),
            CoordSeq::Triples3D(points) => points.len(),
            CoordSeq::Invalid => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// リングとして使えるのは3タプル以上の有効な列だけ
    pub fn is_ring(&self) -> bool {
        !matches!(self, CoordSeq::Invalid) && self.len() >= 3
    }

    /// 3Dタプル列なら max(z) - min(z) を返す
    pub fn z_extent(&self) -> Option<f64> {
        match self {
            CoordSeq::Triples3D(points) if !points.is_empty() => {
                let mut min_z = f64::INFINITY;
                let mut max_z = f64::NEG_INFINITY;
                for &(_, _, z) in points {
                    min_z = min_z.min(z);
                    max_z = max_z.max(z);
                }
                Some(max_z - min_z)
            }
            _ => None,
        }
    }

    /// Z成分を落とした2D座標列
    pub fn points_2d(&self) -> Vec<(f64, f64)> {
        match self {
            CoordSeq::Pairs2D(points) => points.clone(),
            CoordSeq::Triples3D(points) => points.iter().map(|&(x, y, _)| (x, y)).collect(),
            CoordSeq::Invalid => Vec::new(),
        }
    }
}

fn parse_all(tokens: &[&str]) -> Option<Vec<f64>> {
    tokens.iter().map(|t| t.parse::<f64>().ok()).collect()
}

/// 抽出した1棟分の建物
#[derive(Debug, Clone)]
pub struct BuildingFeature {
    /// 外周リングのみの2Dフットプリント
    pub footprint: Polygon<f64>,
    /// 解決済みの高さ。未解決のまま出力されることはない
    pub height_m: f64,
    pub usage: Option<String>,
    pub year: Option<i32>,
}

impl BuildingFeature {
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.footprint.centroid()
    }
}

/// 1回の解析で得られる建物コレクション。順序は文書順を保つ
#[derive(Debug, Clone)]
pub struct FeatureCollection {
    pub features: Vec<BuildingFeature>,
    /// 呼び出し側が指定した（あるいはデフォルトの）入力CRS
    pub source_crs: String,
    /// 現在の座標が表現されているCRS
    pub crs: String,
    /// CRS変換に失敗して座標をそのまま通した場合に立つ
    pub crs_fallback: bool,
    /// スキャナが見つけた建物候補の数。0なら候補なし、
    /// 0より大きくて features が空なら全候補が棄却されたことを表す
    pub candidates_seen: usize,
}

impl FeatureCollection {
    pub fn new(source_crs: &str) -> Self {
        Self {
            features: Vec::new(),
            source_crs: source_crs.to_string(),
            crs: source_crs.to_string(),
            crs_fallback: false,
            candidates_seen: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn mean_height(&self) -> Option<f64> {
        if self.features.is_empty() {
            return None;
        }
        let sum: f64 = self.features.iter().map(|f| f.height_m).sum();
        Some(sum / self.features.len() as f64)
    }

    /// 各建物の重心の平均。地図の初期表示位置などに使う
    pub fn center(&self) -> Option<Point<f64>> {
        let centroids: Vec<Point<f64>> =
            self.features.iter().filter_map(|f| f.centroid()).collect();
        if centroids.is_empty() {
            return None;
        }
        let n = centroids.len() as f64;
        let x: f64 = centroids.iter().map(|p| p.x()).sum();
        let y: f64 = centroids.iter().map(|p| p.y()).sum();
        Some(Point::new(x / n, y / n))
    }

    /// 複数のコレクションを入力順のまま1つに結合する。
    /// 上限は文書ごとの解析コストを抑えるためのものなので、結合後に掛け直すことはしない
    pub fn merge(collections: Vec<FeatureCollection>) -> FeatureCollection {
        let (source_crs, crs) = collections
            .first()
            .map(|c| (c.source_crs.clone(), c.crs.clone()))
            .unwrap_or_else(|| (OUTPUT_CRS.to_string(), OUTPUT_CRS.to_string()));

        let mut merged = FeatureCollection {
            features: Vec::new(),
            source_crs,
            crs,
            crs_fallback: false,
            candidates_seen: 0,
        };
        for collection in collections {
            merged.crs_fallback |= collection.crs_fallback;
            merged.candidates_seen += collection.candidates_seen;
            merged.features.extend(collection.features);
        }
        merged
    }
}
