//! Naholosのテストモジュール群
//!
//! マージの代数的な性質と、ソースの解析からストレス解決までを通した
//! 動作を検証するテストを含みます。

mod end_to_end;
