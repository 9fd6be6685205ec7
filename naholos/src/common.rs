//! 共通の設定
//!
//! ストアレコードのシリアライゼーション設定と、ファイル形式を識別する
//! マジックバイトを提供します。

use bincode::config::{self, Fixint, LittleEndian};

/// ストアファイルを識別するマジックバイト。
///
/// バージョン番号はストアのレコード形式のバージョンであり、
/// クレートのバージョンとは独立しています。
pub const STORE_MAGIC: &[u8] = b"NaholosStore 0.3\n";

/// エクスポートされたスナップショットを識別するマジックバイト。
pub const SNAPSHOT_MAGIC: &[u8] = b"NaholosSnapshotRkyv 0.3\n";

/// ストアディレクトリ内のデータファイル名。
pub const STORE_DATA_FILE: &str = "data.nhs";

/// ストアディレクトリ内の完了マーカー(マニフェスト)ファイル名。
pub const STORE_MANIFEST_FILE: &str = "MANIFEST.json";

/// シリアライゼーションの共通bincode設定を取得します。
///
/// リトルエンディアンと固定長整数エンコーディングを使用するため、
/// 異なるプラットフォーム間でストアのバイト列が一致します。
///
/// # 戻り値
///
/// リトルエンディアンと固定長整数エンコーディングが設定された
/// bincode設定オブジェクト
pub const fn bincode_config() -> config::Configuration<LittleEndian, Fixint> {
    config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}
