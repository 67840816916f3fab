use thiserror::Error;

/// ライブラリ全体で使うエラー型
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 整形式でないXMLは即座にエラーとする（部分的な結果は返さない）
    #[error("malformed XML: {0}")]
    MalformedXml(#[from] roxmltree::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;
