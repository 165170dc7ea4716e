//! katari-cli: 配線デモ
//!
//! インメモリのソーシャルクライアントに台本どおりのイベントを流し、
//! ボットが何を投稿するかを眺めるためのデモです。本物のストリーミング
//! 接続を配線する代わりに、mpsc チャンネルがイベント列を演じます。

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use katari_core::Config;
use katari_core::app::{BackgroundTasks, BotBuilder};
use katari_core::domain::{
    Attachment, MediaKind, Notification, Status, StatusId, StreamEvent, Visibility,
};
use katari_core::impls::{FixedCaptioner, InMemorySocialClient, captioner_from_config};
use katari_core::ports::Captioner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // (A) 設定を読む（無ければ既定値で動く）
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = args
        .iter()
        .find(|arg| !arg.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(std::path::Path::new(&config_path))?;
    info!(provider = %config.generation.provider, "configuration loaded");

    // (B) Captioner を選ぶ。--live なら設定どおりのバックエンド、
    //     それ以外はデモ用の固定応答。
    let live = args.iter().any(|arg| arg == "--live");
    let captioner: Arc<dyn Captioner> = if live {
        captioner_from_config(&config.generation).await?
    } else {
        Arc::new(FixedCaptioner::new(
            "A demo description: a calico cat asleep on a sunny windowsill.",
        ))
    };

    // (C) インメモリのソーシャルクライアントに登場人物を用意する
    let social = Arc::new(InMemorySocialClient::new(&config.server.username));
    let author = social.seed_account(
        "1001",
        "mira",
        chrono::Utc::now() - chrono::Duration::days(500),
    );
    let post = Status {
        id: StatusId::new("post-1"),
        account: author.clone(),
        content: "<p>look at this cat!</p>".to_string(),
        language: Some("en".to_string()),
        visibility: Visibility::Public,
        spoiler_text: String::new(),
        in_reply_to_id: None,
        media_attachments: vec![Attachment {
            kind: MediaKind::Image,
            url: "https://files.example/cat.png".to_string(),
            description: None,
        }],
    };
    social.seed_media(&post.media_attachments[0].url, vec![0u8; 64]);
    social.seed_status(post.clone());

    let mention = Status {
        id: StatusId::new("mention-1"),
        account: author.clone(),
        content: format!("<p>@{} please describe</p>", config.server.username),
        language: Some("en".to_string()),
        visibility: Visibility::Public,
        spoiler_text: String::new(),
        in_reply_to_id: Some(post.id.clone()),
        media_attachments: Vec::new(),
    };
    social.seed_status(mention.clone());

    // (D) ボットを組み立てて、台本イベントを流す
    let bot = BotBuilder::new(config)
        .social(social.clone())
        .captioner(captioner)
        .build()
        .await?;
    let tasks = BackgroundTasks::spawn(bot.clone());

    let (tx, rx) = mpsc::channel(16);
    tx.send(StreamEvent::Mention(Notification {
        account: author.clone(),
        status: mention,
    }))
    .await?;
    drop(tx); // ストリーム終端 = ループ終了

    bot.run(rx).await;

    // 返信が登録されたあとに元投稿が消えるシナリオ: 削除カスケード。
    bot.dispatch(StreamEvent::Delete(StatusId::new("post-1"))).await;
    tasks.shutdown_and_join().await;

    // (E) 何が起きたかを見せる
    println!("--- posted by the bot ---");
    for status in social.posted() {
        println!(
            "[{}] reply_to={:?}\n{}\n",
            status.visibility,
            status.in_reply_to_id.as_ref().map(|id| id.to_string()),
            status.content
        );
    }
    println!("--- deleted by the bot: {:?}", social.deleted());

    Ok(())
}
