//! InMemorySocialClient - 開発・テスト用のソーシャルクライアント
//!
//! # 実装詳細
//! - HashMap でアカウントと投稿を管理、Mutex で排他制御
//! - `post_status` は ULID で ID を払い出し、作成した投稿を記録する
//! - 投稿・削除・フォローの履歴をテストから観察できる

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use ulid::Ulid;

use async_trait::async_trait;

use crate::domain::{Account, AccountId, NewStatus, Status, StatusId};
use crate::ports::{SocialClient, SocialError};

#[derive(Default)]
struct InMemState {
    accounts: HashMap<AccountId, Account>,
    statuses: HashMap<StatusId, Status>,
    /// url -> bytes
    media: HashMap<String, Vec<u8>>,
    posted: Vec<Status>,
    deleted: Vec<StatusId>,
    followed: Vec<AccountId>,
}

pub struct InMemorySocialClient {
    me: Account,
    state: Mutex<InMemState>,
}

impl InMemorySocialClient {
    pub fn new(username: &str) -> Self {
        let me = Account {
            id: AccountId::new(format!("bot-{}", Ulid::new())),
            acct: username.to_string(),
            bot: true,
            note: String::new(),
            created_at: Utc::now(),
        };
        Self {
            me,
            state: Mutex::new(InMemState::default()),
        }
    }

    pub fn seed_account(&self, id: &str, acct: &str, created_at: DateTime<Utc>) -> Account {
        let account = Account {
            id: AccountId::new(id),
            acct: acct.to_string(),
            bot: false,
            note: String::new(),
            created_at,
        };
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account.id.clone(), account.clone());
        account
    }

    pub fn seed_status(&self, status: Status) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(status.account.id.clone(), status.account.clone());
        state.statuses.insert(status.id.clone(), status);
    }

    pub fn seed_media(&self, url: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().media.insert(url.to_string(), bytes);
    }

    /// Everything the bot has posted, in order.
    pub fn posted(&self) -> Vec<Status> {
        self.state.lock().unwrap().posted.clone()
    }

    pub fn deleted(&self) -> Vec<StatusId> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn followed(&self) -> Vec<AccountId> {
        self.state.lock().unwrap().followed.clone()
    }
}

#[async_trait]
impl SocialClient for InMemorySocialClient {
    async fn me(&self) -> Result<Account, SocialError> {
        Ok(self.me.clone())
    }

    async fn get_status(&self, id: &StatusId) -> Result<Status, SocialError> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| SocialError::NotFound(format!("status {id}")))
    }

    async fn get_account(&self, id: &AccountId) -> Result<Account, SocialError> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| SocialError::NotFound(format!("account {id}")))
    }

    async fn post_status(&self, new_status: NewStatus) -> Result<Status, SocialError> {
        let status = Status {
            id: StatusId::new(Ulid::new().to_string()),
            account: self.me.clone(),
            content: new_status.text,
            language: new_status.language,
            visibility: new_status.visibility,
            spoiler_text: new_status.spoiler_text,
            in_reply_to_id: new_status.in_reply_to_id,
            media_attachments: Vec::new(),
        };
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(status.id.clone(), status.clone());
        state.posted.push(status.clone());
        Ok(status)
    }

    async fn delete_status(&self, id: &StatusId) -> Result<(), SocialError> {
        let mut state = self.state.lock().unwrap();
        if state.statuses.remove(id).is_none() {
            return Err(SocialError::NotFound(format!("status {id}")));
        }
        state.deleted.push(id.clone());
        Ok(())
    }

    async fn follow(&self, id: &AccountId) -> Result<(), SocialError> {
        self.state.lock().unwrap().followed.push(id.clone());
        Ok(())
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, SocialError> {
        self.state
            .lock()
            .unwrap()
            .media
            .get(url)
            .cloned()
            .ok_or_else(|| SocialError::NotFound(format!("media {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Visibility;

    #[tokio::test]
    async fn posted_statuses_are_recorded_and_fetchable() {
        let social = InMemorySocialClient::new("katari");

        let posted = social
            .post_status(NewStatus {
                text: "hello".to_string(),
                in_reply_to_id: None,
                visibility: Visibility::Public,
                language: Some("en".to_string()),
                spoiler_text: String::new(),
            })
            .await
            .unwrap();

        assert_eq!(social.posted().len(), 1);
        let fetched = social.get_status(&posted.id).await.unwrap();
        assert_eq!(fetched.content, "hello");
    }

    #[tokio::test]
    async fn deleting_unknown_status_errors() {
        let social = InMemorySocialClient::new("katari");
        let result = social.delete_status(&StatusId::new("nope")).await;
        assert!(matches!(result, Err(SocialError::NotFound(_))));
    }
}
