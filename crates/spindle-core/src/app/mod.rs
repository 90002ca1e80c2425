//! App - アプリケーション層
//!
//! このモジュールは、domain / queue / runtime / ports を組み合わせて scheduler を実装します。
//!
//! # 主要コンポーネント
//! - **ManagerBuilder**: 構築とワイヤリング（起動時検証）
//! - **TaskManager**: 公開 facade（submit / status / cancel / stats / shutdown）
//! - **TaskRegistry**: active / completed の正本
//! - **WorkerPool**: 同時実行数の制御
//! - **Dispatcher**: queue -> worker のループ
//! - **GCLoop**: 保持期限切れ task の削除

pub mod builder;
pub mod manager;

pub(crate) mod dispatcher;
pub(crate) mod engine;
pub(crate) mod gc_loop;
pub(crate) mod registry;
pub(crate) mod worker;

// 主要な型を再エクスポート
pub use self::builder::ManagerBuilder;
pub use self::manager::TaskManager;
