//! Ports - 抽象化レイヤー
//!
//! このモジュールは外部コラボレータへの trait 境界を定義します。
//! 実装の詳細（HTTP、子プロセス、テスト用のインメモリ実装）は `impls` に
//! あります。本物のストリーミング接続はここには現れません。取り込みループは
//! `tokio::sync::mpsc::Receiver<StreamEvent>` を直接受け取ります。

pub mod captioner;
pub mod clock;
pub mod social;

pub use self::captioner::{CaptionError, CaptionRequest, Captioner};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::social::{SocialClient, SocialError};
