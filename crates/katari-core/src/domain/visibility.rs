//! Post visibility and the reply-visibility rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visibility of a post, ordered by restrictiveness.
///
/// The derive of `Ord` relies on the variant order below:
/// `Public < Unlisted < Private < Direct`. Do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    /// 返信の公開範囲: 設定されたポリシーと元投稿のうち、常に厳しい方が勝つ。
    ///
    /// `more_restrictive(P, O) = max(P, O)`（direct が最強）。
    pub fn more_restrictive(self, other: Visibility) -> Visibility {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Unlisted
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
