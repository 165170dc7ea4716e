//! Localized prompts and canned responses.
//!
//! 言語ごとの {prompts, responses} テーブルを JSON から読み込みます。
//! 見つからないキーは `en` に、`en` にも無ければ空文字列にフォールバック
//! （呼び出し側が partial な翻訳ファイルでも壊れないように）。

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocaleTable {
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub responses: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Locales {
    tables: HashMap<String, LocaleTable>,
}

impl Locales {
    /// Built-in English table, always present.
    pub fn builtin() -> Self {
        let table: HashMap<String, LocaleTable> =
            serde_json::from_str(BUILTIN_EN).expect("builtin locale table must parse");
        Self { tables: table }
    }

    /// Load a localization file and overlay it on the built-in table.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: &Path) -> Result<Self, crate::KatariError> {
        let mut locales = Self::builtin();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(locales),
            Err(e) => {
                return Err(crate::KatariError::Persistence {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        let loaded: HashMap<String, LocaleTable> = serde_json::from_str(&data)
            .map_err(|e| crate::KatariError::Config(format!("bad localization file: {e}")))?;
        locales.tables.extend(loaded);
        Ok(locales)
    }

    pub fn prompt(&self, lang: Option<&str>, key: &str) -> String {
        self.lookup(lang, key, |t| &t.prompts)
    }

    pub fn response(&self, lang: Option<&str>, key: &str) -> String {
        self.lookup(lang, key, |t| &t.responses)
    }

    fn lookup(
        &self,
        lang: Option<&str>,
        key: &str,
        pick: impl Fn(&LocaleTable) -> &HashMap<String, String>,
    ) -> String {
        let for_lang = lang
            .and_then(|l| self.tables.get(l))
            .and_then(|t| pick(t).get(key));
        if let Some(value) = for_lang {
            return value.clone();
        }
        match self.tables.get("en").and_then(|t| pick(t).get(key)) {
            Some(value) => value.clone(),
            None => {
                warn!(key, "missing localized string");
                String::new()
            }
        }
    }
}

// 既定の英語テーブル。プレースホルダは呼び出し側が .replace で埋める。
const BUILTIN_EN: &str = r#"{
  "en": {
    "prompts": {
      "generate_alt_text": "Describe this image for someone who cannot see it. Be concise and objective, two sentences at most.",
      "generate_video_alt_text": "Describe this video for someone who cannot watch it. Cover the visuals and any important audio, two sentences at most.",
      "generate_audio_alt_text": "Describe this audio clip for someone who cannot hear it. Be concise and objective, two sentences at most."
    },
    "responses": {
      "consent_request": "{requester} asked me to describe the media in this post. Reply \"yes\" or \"y\" and I will post a description.",
      "alt_text_error": "Sorry, I could not generate a description for this media.",
      "rate_limited": "You have made too many requests recently. Please try again later.",
      "already_has_description": "This media already has a description written by its author.",
      "unsupported_file": "I cannot describe this kind of media.",
      "provided_by": "Described by @{bot} using {provider}",
      "alt_text_reminder": "A friendly reminder to add the description above to the media itself, so it travels with your post. ({user})"
    }
  }
}"#;
