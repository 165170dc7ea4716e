//! App - アプリケーション層
//!
//! ここでストアとポートを束ねてボットに仕立てます。
//!
//! # 主要コンポーネント
//! - **BotBuilder**: 構築とワイヤリング、起動時検証（Fail-fast）
//! - **Bot**: 取り込みループとイベントハンドラ
//! - **BackgroundTasks**: 定期処理のループ群（リセット、掃除、スナップショット、週次サマリ）

pub mod bot;
pub mod builder;
pub mod loops;

pub use self::bot::Bot;
pub use self::builder::BotBuilder;
pub use self::loops::BackgroundTasks;
