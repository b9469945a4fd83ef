//! # Trial REST Client
//!
//! The session-boundary HTTP calls the real-time clients depend on:
//! - `POST /api/trial/create` after the fact-gathering flow completes
//! - `GET /api/trial/{id}` to seed the voice trial's transcript and roster
//! - `DELETE /api/trial/{id}` when the user ends the trial
//!
//! Non-2xx responses become `ClientError::Http` carrying the backend's `detail` message.

use crate::config::AppConfig;
use crate::error::{ClientError, ClientResult};
use crate::transcript::{Message, RoleType};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle of a trial session on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    #[default]
    Created,
    Active,
    Paused,
    Ended,
}

/// One AI participant. The roster is fixed for the life of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub role: RoleType,
    pub name: String,
    #[serde(default, alias = "personality_traits")]
    pub traits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: RoleType,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegalProperties {
    pub jurisdiction: String,
    pub legal_areas: Vec<String>,
    #[serde(default)]
    pub articles: Vec<String>,
    #[serde(default)]
    pub case_law: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseContext {
    pub description: String,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub additional_info: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST /api/trial/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTrialRequest {
    #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "flowId", skip_serializing_if = "Option::is_none", default)]
    pub flow_id: Option<String>,
    pub roles: Vec<RoleConfig>,
    pub legal_properties: LegalProperties,
    pub case_context: CaseContext,
}

impl CreateTrialRequest {
    /// A request enabling every role, for the given fact-gathering conversation.
    pub fn all_roles(conversation_id: Option<String>, flow_id: Option<String>, description: &str) -> Self {
        Self {
            conversation_id,
            flow_id,
            roles: [RoleType::Judge, RoleType::Prosecutor, RoleType::Defense]
                .into_iter()
                .map(|role| RoleConfig { role, enabled: true })
                .collect(),
            legal_properties: LegalProperties {
                jurisdiction: "us".to_string(),
                legal_areas: vec!["criminal".to_string()],
                ..LegalProperties::default()
            },
            case_context: CaseContext {
                description: description.to_string(),
                ..CaseContext::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedTrial {
    pub session_id: String,
    #[serde(default)]
    pub status: TrialStatus,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Response of `GET /api/trial/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub session_id: String,
    #[serde(default)]
    pub status: TrialStatus,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub fact_flow_id: Option<String>,
    #[serde(default)]
    pub trial_flow_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndedTrial {
    pub status: TrialStatus,
    pub session_id: String,
}

/// Immutable lookup from role to agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    agents: Vec<Agent>,
}

impl Roster {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn get(&self, role: RoleType) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.role == role)
    }

    /// Name to show on a thinking/speaking indicator.
    ///
    /// Unknown roles fall back to the capitalized role name; an unscoped marker is "Agent".
    pub fn display_name(&self, role: Option<RoleType>) -> String {
        match role {
            Some(role) => match self.get(role) {
                Some(agent) => agent.name.clone(),
                None => {
                    let label = role.as_str();
                    let mut chars = label.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                }
            },
            None => "Agent".to_string(),
        }
    }
}

/// HTTP client for `/api/trial`.
#[derive(Debug, Clone)]
pub struct TrialApi {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

impl TrialApi {
    pub fn new(config: &AppConfig) -> ClientResult<Self> {
        Self::with_base_url(&config.api_base(), config.connection.request_timeout())
    }

    /// `base_url` is the API root, e.g. `http://localhost:8000/api`.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn create_trial(&self, request: &CreateTrialRequest) -> ClientResult<CreatedTrial> {
        let url = format!("{}/trial/create", self.base_url);
        debug!(url = %url, "Creating trial");
        let response = self.client.post(&url).json(request).send().await?;
        let created: CreatedTrial = Self::parse(response).await?;
        info!(session_id = %created.session_id, agents = created.agents.len(), "Trial created");
        Ok(created)
    }

    pub async fn get_trial(&self, session_id: &str) -> ClientResult<TrialInfo> {
        let url = format!("{}/trial/{}", self.base_url, session_id);
        debug!(url = %url, "Fetching trial session");
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    pub async fn end_trial(&self, session_id: &str) -> ClientResult<EndedTrial> {
        let url = format!("{}/trial/{}", self.base_url, session_id);
        debug!(url = %url, "Ending trial");
        let response = self.client.delete(&url).send().await?;
        let ended: EndedTrial = Self::parse(response).await?;
        info!(session_id = %ended.session_id, "Trial ended");
        Ok(ended)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.detail)
                .unwrap_or(body);
            return Err(ClientError::Http(format!("{} {}", status.as_u16(), detail)));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_info_accepts_backend_shape() {
        let raw = r#"{
            "session_id": "abc",
            "status": "active",
            "agents": [
                {"role": "judge", "name": "Judge Harper", "traits": ["stern"]},
                {"role": "defense", "name": "Ms. Cole", "personality_traits": ["calm"]}
            ],
            "messages": [
                {"id": "msg_0", "type": "user", "content": "Hello", "timestamp": "2025-01-01T10:00:00"}
            ]
        }"#;
        let info: TrialInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.status, TrialStatus::Active);
        assert_eq!(info.agents[1].traits, vec!["calm".to_string()]);
        assert_eq!(info.messages.len(), 1);
        assert!(info.conversation_id.is_none());
    }

    #[test]
    fn test_roster_display_names() {
        let roster = Roster::new(vec![Agent {
            role: RoleType::Judge,
            name: "Judge Harper".to_string(),
            traits: vec![],
        }]);
        assert_eq!(roster.display_name(Some(RoleType::Judge)), "Judge Harper");
        assert_eq!(roster.display_name(Some(RoleType::Prosecutor)), "Prosecutor");
        assert_eq!(roster.display_name(None), "Agent");
    }

    #[test]
    fn test_create_request_wire_format() {
        let request = CreateTrialRequest::all_roles(Some("conv-1".to_string()), None, "Theft case");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["conversationId"], "conv-1");
        assert!(value.get("flowId").is_none());
        assert_eq!(value["roles"].as_array().unwrap().len(), 3);
        assert_eq!(value["roles"][2]["role"], "defense");
    }
}
