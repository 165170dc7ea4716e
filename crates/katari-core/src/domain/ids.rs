//! Domain identifiers (strongly-typed IDs).
//!
//! # 不透明な文字列 ID + Phantom type パターン
//! サーバ側が払い出す ID は形式に保証がないため、中身は不透明な文字列として
//! 扱います。`Id<T>` というジェネリック型で共通実装を提供しつつ、`T` は実行時に
//! は使わない（PhantomData）マーカー型として、コンパイル時の型安全性を提供
//! します（AccountId と StatusId は混同できない）。
//!
//! イベント取り込み境界で全ての参照をこの型に正規化するので、
//! それより内側では実行時の型判別は一切行いません。

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::{Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display / ログで使うラベル（例: "account", "status"）
    fn label() -> &'static str;
}

/// 不透明な文字列 ID
///
/// `T` は PhantomData で、実行時にはメモリを消費しませんが、
/// コンパイル時に型安全性を提供します。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// JSON では素の文字列として読み書きする（map のキーにも使えるように）。
// derive だと `{"value": ...}` 形式になってしまうので手書きで実装します。
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor<T: IdMarker>(PhantomData<T>);

        impl<'de, T: IdMarker> Visitor<'de> for IdVisitor<T> {
            type Value = Id<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {} id string", T::label())
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Id<T>, E> {
                Ok(Id::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Id<T>, E> {
                Ok(Id::new(v))
            }
        }

        deserializer.deserialize_str(IdVisitor(PhantomData))
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Account のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Account {}

impl IdMarker for Account {
    fn label() -> &'static str {
        "account"
    }
}

/// Status のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {}

impl IdMarker for Status {
    fn label() -> &'static str {
        "status"
    }
}

/// Identifier of an account on the social network.
pub type AccountId = Id<Account>;

/// Identifier of a post (status) on the social network.
pub type StatusId = Id<Status>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ids_are_distinct_types() {
        let account = AccountId::new("109348203");
        let status = StatusId::new("113994031");

        assert_eq!(account.as_str(), "109348203");
        assert_eq!(status.as_str(), "113994031");

        // The whole point: you can't accidentally mix these types.
        // (This is a compile-time property, so we just keep it as a comment.)
        // let _: AccountId = status; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let status = StatusId::new("42");
        let serialized = serde_json::to_string(&status).unwrap();
        assert_eq!(serialized, "\"42\"");

        let deserialized: StatusId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(status, deserialized);
    }

    #[test]
    fn ids_work_as_json_map_keys() {
        let mut map: HashMap<AccountId, u32> = HashMap::new();
        map.insert(AccountId::new("a1"), 3);

        let serialized = serde_json::to_string(&map).unwrap();
        let roundtrip: HashMap<AccountId, u32> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(roundtrip.get(&AccountId::new("a1")), Some(&3));
    }
}
