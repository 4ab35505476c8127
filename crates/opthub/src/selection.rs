use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use opthub_core::model::{Competition, Match};
use opthub_core::{OptHubError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::OptHubClient;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Selection {
    pub competition: Competition,
    #[serde(rename = "match")]
    pub match_: Match,
}

/// JSON file holding the current [Selection].
#[derive(Debug, Clone)]
pub struct SelectionCache {
    path: PathBuf,
}

impl SelectionCache {
    pub const FILE_NAME: &'static str = "match_selection.json";

    pub fn new(dir: &Path) -> Self {
        SelectionCache {
            path: dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached selection, `None` if nothing was selected yet.
    pub fn load(&self) -> Result<Option<Selection>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.cache_error("read", e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| self.cache_error("parse", e))
    }

    pub fn save(&self, selection: &Selection) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.cache_error("create", e))?;
        }
        let text =
            serde_json::to_string_pretty(selection).map_err(|e| self.cache_error("encode", e))?;
        fs::write(&self.path, text).map_err(|e| self.cache_error("write", e))?;
        debug!(path = %self.path.display(), "selection saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.cache_error("remove", e)),
        }
    }

    /// Works out which match a command applies to.
    ///
    /// Explicit aliases win and are looked up on the server. A lone match
    /// alias is looked up in the cached competition. Without either, the
    /// cached selection is used as is.
    pub async fn resolve(
        &self,
        client: &OptHubClient,
        competition: Option<&str>,
        match_alias: Option<&str>,
    ) -> Result<Selection> {
        match (competition, match_alias) {
            (Some(competition), Some(match_alias)) => {
                let competition = find_competition(client, competition).await?;
                find_match(client, competition, match_alias).await
            }
            (None, Some(match_alias)) => {
                let cached = self.load()?.ok_or_else(|| {
                    OptHubError::Validation {
                        reason: "no competition selected, pass --competition".to_string(),
                    }
                })?;
                find_match(client, cached.competition, match_alias).await
            }
            (Some(_), None) => Err(OptHubError::Validation {
                reason: "--match is required together with --competition".to_string(),
            }),
            (None, None) => self.load()?.ok_or_else(|| OptHubError::Validation {
                reason: "no match selected, run `opthub select` first".to_string(),
            }),
        }
    }

    fn cache_error(&self, action: &str, err: impl std::fmt::Display) -> OptHubError {
        OptHubError::Cache {
            message: format!("failed to {} {}: {}", action, self.path.display(), err),
        }
    }
}

async fn find_competition(client: &OptHubClient, alias: &str) -> Result<Competition> {
    client
        .competitions()
        .await?
        .into_iter()
        .find(|c| c.alias == alias || c.id.as_str() == alias)
        .ok_or_else(|| OptHubError::Validation {
            reason: format!("competition '{}' not found among your competitions", alias),
        })
}

async fn find_match(
    client: &OptHubClient,
    competition: Competition,
    alias: &str,
) -> Result<Selection> {
    let match_ = client
        .matches(&competition.id)
        .await?
        .into_iter()
        .find(|m| m.alias == alias || m.id.as_str() == alias)
        .ok_or_else(|| OptHubError::Validation {
            reason: format!(
                "match '{}' not found in competition '{}'",
                alias, competition.alias
            ),
        })?;
    Ok(Selection {
        competition,
        match_,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opthub_core::model::{CompetitionId, MatchId};

    fn selection() -> Selection {
        Selection {
            competition: Competition {
                id: CompetitionId::new("c-1"),
                alias: "sphere".to_string(),
            },
            match_: Match {
                id: MatchId::new("m-1"),
                alias: "sphere-2d".to_string(),
            },
        }
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SelectionCache::new(&dir.path().join("nested"));

        assert_eq!(cache.load().unwrap(), None);
        cache.save(&selection()).unwrap();
        assert_eq!(cache.load().unwrap(), Some(selection()));

        cache.clear().unwrap();
        assert_eq!(cache.load().unwrap(), None);
        cache.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SelectionCache::new(dir.path());
        fs::write(cache.path(), "{not json").unwrap();

        match cache.load() {
            Err(OptHubError::Cache { message }) => assert!(message.contains("parse")),
            other => panic!("expected cache error, got {:?}", other),
        }
    }

    #[test]
    fn file_uses_match_key() {
        let text = serde_json::to_value(selection()).unwrap();
        assert_eq!(text["match"]["alias"], "sphere-2d");
        assert_eq!(text["competition"]["id"], "c-1");
    }
}
