use async_trait::async_trait;
use opthub_core::model::{
    Competition, CompetitionId, Evaluation, Match, MatchId, Numeric, Score, Solution, Submitted,
    TrialNo, TrialSnapshot,
};
use opthub_core::{OptHubError, Result, TrialState, TrialStore};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::query::Query;
use crate::query_builder;
use crate::schemas::{ErrorBody, LatestVersion, SubmitRequest, TrialPage, TrialStatusResponse};
use crate::settings::Settings;

pub const USER_AGENT: &str = concat!("opthub-client/", env!("CARGO_PKG_VERSION"));

/// Which request a response belongs to; decides how error statuses map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Submit,
    TrialStatus,
    /// Evaluation or score of a trial that may not have been written yet.
    Phase,
    Read,
}

/// Order of a trial listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Ascending => write!(f, "ascending"),
            Order::Descending => write!(f, "descending"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptHubClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OptHubClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        OptHubClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| OptHubError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self::new(client, &settings.api_url, &settings.api_key))
    }

    // Applies auth headers
    fn apply_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-API-Key", &self.api_key)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
    }

    /// Sends a request and returns the body of a successful response.
    ///
    /// `None` means the resource does not exist (yet), which only some calls
    /// accept.
    async fn send(&self, builder: RequestBuilder, call: Call) -> Result<Option<String>> {
        let res = self
            .apply_headers(builder)
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        let body = res.text().await.map_err(transport)?;

        debug!(status = status.as_u16(), ?call, "response received");
        map_status(status, &body, call).map(|found| found.then_some(body))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<Query>,
        call: Call,
    ) -> Result<Option<T>> {
        let builder = self.client.get(format!("{}{}", self.base_url, path));
        let builder = match &query {
            Some(query) => builder.query(&query.to_vec()),
            None => builder,
        };

        match self.send(builder, call).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn get_required<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<Query>,
    ) -> Result<T> {
        self.get(path, query, Call::Read)
            .await?
            .ok_or_else(|| OptHubError::Transport {
                message: format!("{} not found", path),
            })
    }

    pub async fn competitions(&self) -> Result<Vec<Competition>> {
        let query = query_builder!("participating" : Some(true));
        self.get_required("/competitions", Some(query)).await
    }

    pub async fn matches(&self, competition: &CompetitionId) -> Result<Vec<Match>> {
        self.get_required(&format!("/competitions/{}/matches", competition), None)
            .await
    }

    /// Fetches up to `limit` trials starting at trial `start` in the given
    /// order.
    pub async fn trials_page(
        &self,
        match_id: &MatchId,
        start: Option<u64>,
        limit: u64,
        order: Order,
    ) -> Result<TrialPage> {
        let query = query_builder!(
            "start" : start,
            "limit" : Some(limit),
            "order" : Some(order),
        );
        self.get_required(&format!("/matches/{}/trials", match_id), Some(query))
            .await
    }

    pub async fn solution(
        &self,
        match_id: &MatchId,
        trial_no: TrialNo,
    ) -> Result<Option<Solution>> {
        self.get(&trial_path(match_id, trial_no, "/solution"), None, Call::Phase)
            .await
    }

    pub async fn latest_version(&self) -> Result<String> {
        let res: LatestVersion = self.get_required("/client/version", None).await?;
        Ok(res.latest)
    }

    async fn evaluation(
        &self,
        match_id: &MatchId,
        trial_no: TrialNo,
    ) -> Result<Option<Evaluation>> {
        self.get(&trial_path(match_id, trial_no, "/evaluation"), None, Call::Phase)
            .await
    }

    async fn score(&self, match_id: &MatchId, trial_no: TrialNo) -> Result<Option<Score>> {
        self.get(&trial_path(match_id, trial_no, "/score"), None, Call::Phase)
            .await
    }
}

#[async_trait]
impl TrialStore for OptHubClient {
    async fn submit(&self, match_id: &MatchId, variable: &Numeric) -> Result<Submitted> {
        let body = serde_json::to_string(&SubmitRequest { variable })?;
        let builder = self
            .client
            .post(format!("{}/matches/{}/trials", self.base_url, match_id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);

        let body = self
            .send(builder, Call::Submit)
            .await?
            .ok_or_else(|| OptHubError::Submission {
                message: format!("match {} not found", match_id),
            })?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Assembles a snapshot from the status, then the evaluation once the
    /// trial is past evaluating, then the score once scoring is over.
    async fn get_trial_status(
        &self,
        match_id: &MatchId,
        trial_no: TrialNo,
    ) -> Result<Option<TrialSnapshot>> {
        let status: TrialStatusResponse = match self
            .get(&trial_path(match_id, trial_no, ""), None, Call::TrialStatus)
            .await?
        {
            Some(status) => status,
            None => return Ok(None),
        };

        let state = TrialState::from_status(&status.status)?;
        let mut snapshot = TrialSnapshot::new(status.trial_no, status.status);
        if let Some(error) = status.error {
            snapshot = snapshot.with_error(error);
        }

        if state != TrialState::Evaluating {
            if let Some(evaluation) = self.evaluation(match_id, trial_no).await? {
                snapshot = snapshot.with_evaluation(evaluation);
            }
        }
        if state.scoring_finished() && state != TrialState::EvaluatorFailed {
            if let Some(score) = self.score(match_id, trial_no).await? {
                snapshot = snapshot.with_score(score);
            }
        }

        Ok(Some(snapshot))
    }
}

fn trial_path(match_id: &MatchId, trial_no: TrialNo, suffix: &str) -> String {
    format!("/matches/{}/trials/{}{}", match_id, trial_no, suffix)
}

fn transport(err: reqwest::Error) -> OptHubError {
    OptHubError::Transport {
        message: err.to_string(),
    }
}

/// Maps a response status to an outcome. `Ok(true)` is a success,
/// `Ok(false)` a resource the call accepts as missing.
/// ```
/// use opthub_lib::client::{map_status, Call};
/// use reqwest::StatusCode;
///
/// assert_eq!(map_status(StatusCode::OK, "{}", Call::Read).unwrap(), true);
/// let not_found = r#"{"code": "TrialNotFound"}"#;
/// assert_eq!(map_status(StatusCode::NOT_FOUND, not_found, Call::TrialStatus).unwrap(), false);
/// assert!(map_status(StatusCode::NOT_FOUND, "", Call::TrialStatus).is_err());
/// ```
pub fn map_status(status: StatusCode, body: &str, call: Call) -> Result<bool> {
    if status.is_success() {
        return Ok(true);
    }

    let error: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = error
        .message
        .clone()
        .or_else(|| error.code.clone())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(OptHubError::Transport {
            message: format!("authentication failed ({}): check OPTHUB_API_KEY", status),
        }),
        StatusCode::NOT_FOUND => match call {
            Call::TrialStatus if error.code.as_deref() == Some("TrialNotFound") => Ok(false),
            Call::Phase => Ok(false),
            _ => Err(OptHubError::Transport {
                message: format!("resource not found ({}): {}", status, detail),
            }),
        },
        s if s.is_client_error() && call == Call::Submit => {
            Err(OptHubError::Submission { message: detail })
        }
        s => {
            if s.is_server_error() {
                warn!(status = s.as_u16(), "server error");
            }
            Err(OptHubError::Transport {
                message: format!("unexpected status {}: {}", s, detail),
            })
        }
    }
}
