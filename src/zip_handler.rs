use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::Result;
use crate::model::FeatureCollection;
use crate::parser::{parse_citygml, ParseOptions};

/// ZIPアーカイブ内のCityGMLをまとめて解析するハンドラ
pub struct ZipHandler {
    path: PathBuf,
}

impl ZipHandler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// アーカイブ内の全CityGMLエントリを解析して (エントリ名, コレクション) を返す。
    /// 読み出しは逐次、解析はエントリ単位で並列に行い、結果はエントリ順を保つ。
    /// 壊れたエントリは警告を出して飛ばす
    pub fn process_all(&self, options: &ParseOptions) -> Result<Vec<(String, FeatureCollection)>> {
        let file = File::open(&self.path)?;
        let mut archive = ZipArchive::new(file)?;

        tracing::info!(
            "Processing ZIP archive: {:?} ({} entries)",
            self.path,
            archive.len()
        );

        // ZipArchiveは並列に読めないので、対象エントリを先にメモリへ展開する
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if !entry.is_file() || !is_citygml_entry(entry.name()) {
                continue;
            }
            let mut buf = Vec::with_capacity(capacity_hint(entry.size()));
            entry.read_to_end(&mut buf)?;
            entries.push((entry.name().to_string(), buf));
        }

        tracing::info!("Found {} CityGML entries", entries.len());

        let collections: Vec<(String, FeatureCollection)> = entries
            .par_iter()
            .filter_map(|(name, bytes)| {
                let xml = match std::str::from_utf8(bytes) {
                    Ok(xml) => xml,
                    Err(e) => {
                        tracing::warn!("Skipping non-UTF8 entry {}: {}", name, e);
                        return None;
                    }
                };
                match parse_citygml(xml.trim_start_matches('\u{feff}'), options) {
                    Ok(collection) => Some((name.clone(), collection)),
                    Err(e) => {
                        tracing::warn!("Skipping unparsable entry {}: {}", name, e);
                        None
                    }
                }
            })
            .collect();

        Ok(collections)
    }
}

/// 展開前に確保するバッファの上限（16MiB）
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// ヘッダが申告する展開後サイズは実データと一致する保証がないため、
/// 事前確保は上限で頭打ちにし、残りは read_to_end の成長に任せる
fn capacity_hint(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOC) as usize
}

/// PLATEAUの配布ZIPでは udx/bldg/ 配下が建物データ。
/// udx 構成でないアーカイブでは拡張子だけで判定する
fn is_citygml_entry(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if !(lower.ends_with(".gml") || lower.ends_with(".xml")) {
        return false;
    }
    let parts: Vec<&str> = name.split('/').collect();
    if parts.iter().any(|part| *part == "udx") {
        return parts.iter().any(|part| *part == "bldg");
    }
    true
}
