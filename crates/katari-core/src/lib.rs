//! katari-core
//!
//! メディア説明文ボット「Katari」のコアエンジン。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, status, visibility）
//! - **ports**: 抽象化レイヤー（SocialClient, Captioner, Clock）
//! - **impls**: ポート実装（開発用 InMemorySocialClient と Captioner バックエンド3種）
//! - **limiter**: アカウント毎のレート制限と shadow ban
//! - **consent**: 投稿毎の同意ハンドシェイク
//! - **pipeline**: 添付ごとの fan-out / fan-in 説明文生成と返信合成
//! - **replies**: 返信のライフサイクル追跡と削除カスケード
//! - **reminders**: 説明文が本体に付いたかの後追いチェック
//! - **metrics**: 追記専用のメトリクスログとスナップショット保存
//! - **summary**: 週次サマリのスケジューラとリーダーボード
//! - **app**: アプリケーション層（builder, ingest loop, background loops）

pub mod domain;
pub mod ports;
pub mod impls;

pub mod config;
pub mod error;
pub mod locales;
pub mod text;

pub mod limiter;
pub mod consent;
pub mod pipeline;
pub mod replies;
pub mod reminders;
pub mod metrics;
pub mod summary;

pub mod app;

pub use crate::config::Config;
pub use crate::error::KatariError;
