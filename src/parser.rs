use geo::{Area, Validation};
use geo_types::{LineString, Polygon};
use roxmltree::{Document, Node};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::crs;
use crate::error::Result;
use crate::model::{BuildingFeature, CoordSeq, FeatureCollection};

/// 1文書あたりの建物数の既定上限
pub const DEFAULT_MAX_BUILDINGS: usize = 5000;

/// どの手段でも高さを解決できなかったときの既定値（メートル）
const DEFAULT_HEIGHT_M: f64 = 10.0;

/// 座標列を持ちうる要素のローカル名
const RING_ELEMENT_NAMES: [&str; 3] = ["posList", "coordinates", "pos"];

/// 高さ解決で探す要素のローカル名（優先順）
const HEIGHT_ELEMENT_NAMES: [&str; 3] = ["measuredHeight", "height", "roofHeight"];

const USAGE_ELEMENT_NAMES: [&str; 2] = ["function", "usage"];
const YEAR_ELEMENT_NAMES: [&str; 2] = ["yearOfConstruction", "constructionYear"];

/// 建物要素が1つも見つからなかったときの代替スキャン戦略。
/// データセットによって過剰・過少に一致することがあるので切り替えられるようにしている
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackScan {
    /// boundedBy を直下に持つ要素を候補として拾う
    #[default]
    BoundedBy,
    /// 代替スキャンを行わない
    Off,
}

/// 解析パラメータ
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// 抽出する建物数の上限。超えた分の候補は評価されない
    pub max_buildings: usize,
    /// 入力座標のCRS識別子。省略時は EPSG:4326 とみなす
    pub source_crs: String,
    pub fallback_scan: FallbackScan,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_buildings: DEFAULT_MAX_BUILDINGS,
            source_crs: crs::OUTPUT_CRS.to_string(),
            fallback_scan: FallbackScan::BoundedBy,
        }
    }
}

/// CityGML文字列から建物フットプリントを抽出し、EPSG:4326 に正規化して返す
///
/// 整形式でないXMLだけが致命的エラーになる。座標や属性の欠損・破損は
/// 候補単位で吸収し、1棟も残らなければ空のコレクションを返す
pub fn parse_citygml(xml: &str, options: &ParseOptions) -> Result<FeatureCollection> {
    let document = Document::parse(xml)?;

    let candidates = scan_candidates(&document, options.fallback_scan);
    tracing::debug!("Found {} building candidates", candidates.len());

    let mut collection = FeatureCollection::new(&options.source_crs);
    collection.candidates_seen = candidates.len();

    // 採用済みリングの2D座標。Building と入れ子の BuildingPart が
    // 同じフットプリントを返すことがあるため重複を排除する
    let mut seen_rings: HashSet<Vec<(u64, u64)>> = HashSet::new();

    for candidate in candidates {
        // 上限に達したら残りの候補は評価しない
        if collection.features.len() >= options.max_buildings {
            break;
        }

        let ring = match extract_exterior_ring(candidate) {
            Some(ring) => ring,
            None => continue,
        };

        let points = ring.points_2d();
        let footprint = Polygon::new(LineString::from(points.clone()), Vec::new());

        // 自己交差・面積ゼロのポリゴンは黙って捨てる
        if !footprint.is_valid() || footprint.unsigned_area() == 0.0 {
            tracing::debug!("Skipping degenerate footprint ({} points)", points.len());
            continue;
        }

        let key: Vec<(u64, u64)> = points
            .iter()
            .map(|&(x, y)| (x.to_bits(), y.to_bits()))
            .collect();
        if !seen_rings.insert(key) {
            tracing::debug!("Skipping duplicate footprint");
            continue;
        }

        let height_m = resolve_height(candidate, &ring);
        collection.features.push(BuildingFeature {
            footprint,
            height_m,
            usage: extract_usage(candidate),
            year: extract_year(candidate),
        });
    }

    tracing::info!(
        "Extracted {} building features from {} candidates",
        collection.features.len(),
        collection.candidates_seen
    );

    Ok(crs::to_wgs84(collection))
}

/// ファイルから読み込む版。BOM付きUTF-8も受け付ける
pub fn parse_citygml_file(path: &Path, options: &ParseOptions) -> Result<FeatureCollection> {
    let xml = fs::read_to_string(path)?;
    parse_citygml(xml.trim_start_matches('\u{feff}'), options)
}

/// 文書順で建物候補の要素を集める
fn scan_candidates<'a>(document: &'a Document<'a>, fallback: FallbackScan) -> Vec<Node<'a, 'a>> {
    let candidates: Vec<Node> = document
        .descendants()
        .filter(|node| node.is_element() && is_building_name(node.tag_name().name()))
        .collect();

    if !candidates.is_empty() || fallback == FallbackScan::Off {
        return candidates;
    }

    // 建物要素が無い文書では、boundedBy を直下に持つ要素を
    // 地物とみなして拾う
    tracing::debug!("No building elements found, falling back to boundedBy scan");
    document
        .descendants()
        .filter(|node| {
            node.is_element()
                && node.children().any(|child| {
                    child.is_element() && child.tag_name().name().ends_with("boundedBy")
                })
        })
        .collect()
}

/// ローカル名が building / bldg で始まるか。名前空間URIには依存しない
fn is_building_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("building") || lower.starts_with("bldg")
}

/// 候補サブツリーから外周リングを取り出す。
/// 文書順で最初にデコードできた座標列を外周とし、以降の座標列は無視する。
/// 壊れた座標列は候補ごと捨てずに次の要素へ進む
fn extract_exterior_ring(candidate: Node) -> Option<CoordSeq> {
    for node in candidate.descendants() {
        if !node.is_element() || !RING_ELEMENT_NAMES.contains(&node.tag_name().name()) {
            continue;
        }
        let text = match node.text() {
            Some(text) => text,
            None => continue,
        };
        let seq = CoordSeq::from_text(text);
        if seq.is_ring() {
            return Some(seq);
        }
        tracing::debug!("Discarding undecodable ring in <{}>", node.tag_name().name());
    }
    None
}

/// 高さを優先順に解決する。常に値を返す
///
/// 1. measuredHeight / height / roofHeight 要素のうち最初に数値として読めたもの
/// 2. 外周リングが3Dなら max(z) - min(z)
/// 3. 既定値 10.0m
fn resolve_height(candidate: Node, ring: &CoordSeq) -> f64 {
    for name in HEIGHT_ELEMENT_NAMES {
        if let Some(value) = find_numeric_text(candidate, name) {
            return value;
        }
    }
    ring.z_extent().unwrap_or(DEFAULT_HEIGHT_M)
}

/// 指定ローカル名の子孫要素から、最初に数値として読めたテキストを返す。
/// 読めないテキストは欠損と同じ扱いで次の要素に進む
fn find_numeric_text(candidate: Node, name: &str) -> Option<f64> {
    candidate
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == name)
        .filter_map(|node| node.text())
        .find_map(|text| text.trim().parse::<f64>().ok())
}

/// function があればそれを、無ければ usage を採用する。空文字列は欠損扱い
fn extract_usage(candidate: Node) -> Option<String> {
    first_element_text(candidate, &USAGE_ELEMENT_NAMES)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// 建築年。数値として読めなければ欠損扱い
fn extract_year(candidate: Node) -> Option<i32> {
    first_element_text(candidate, &YEAR_ELEMENT_NAMES).and_then(|text| text.trim().parse().ok())
}

/// 名前リストの優先順で最初に見つかった要素のテキストを返す。
/// 先の名前の要素が存在する場合、テキストが空でも後の名前には進まない
fn first_element_text<'a>(candidate: Node<'a, 'a>, names: &[&str]) -> Option<&'a str> {
    for name in names {
        let found = candidate
            .descendants()
            .find(|node| node.is_element() && node.tag_name().name() == *name);
        if let Some(node) = found {
            return node.text();
        }
    }
    None
}
