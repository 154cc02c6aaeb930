//! Typed wrappers over the ADSModule and Core endpoints used for provisioning.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::ApiClient;
use crate::error::ApiError;

pub const GET_DEPLOYMENT_TEMPLATES: &str = "/ADSModule/GetDeploymentTemplates";
pub const DEPLOY_TEMPLATE: &str = "/ADSModule/DeployTemplate";
pub const SET_INSTANCE_SUSPENDED: &str = "/ADSModule/SetInstanceSuspended";
pub const DELETE_INSTANCE: &str = "/ADSModule/DeleteInstance";
pub const RESET_USER_PASSWORD: &str = "/Core/ResetUserPassword";
pub const GET_AMP_USER_INFO: &str = "/Core/GetAMPUserInfo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
}

/// What AMP does with a freshly deployed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PostCreateAction {
    #[default]
    DoNothing,
    UpdateOnce,
    UpdateAlways,
    UpdateAndStartOnce,
    UpdateAndStartAlways,
    StartAlways,
}

impl PostCreateAction {
    pub const ALL: [PostCreateAction; 6] = [
        PostCreateAction::DoNothing,
        PostCreateAction::UpdateOnce,
        PostCreateAction::UpdateAlways,
        PostCreateAction::UpdateAndStartOnce,
        PostCreateAction::UpdateAndStartAlways,
        PostCreateAction::StartAlways,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PostCreateAction::DoNothing => "Do nothing",
            PostCreateAction::UpdateOnce => "Update once",
            PostCreateAction::UpdateAlways => "Update always",
            PostCreateAction::UpdateAndStartOnce => "Update and start once",
            PostCreateAction::UpdateAndStartAlways => "Update and start always",
            PostCreateAction::StartAlways => "Start always",
        }
    }
}

impl From<PostCreateAction> for u8 {
    fn from(action: PostCreateAction) -> Self {
        action as u8
    }
}

impl TryFrom<u8> for PostCreateAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PostCreateAction::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("unknown post-create action {value}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub template_id: i64,
    pub username: String,
    pub password: String,
    pub email: String,
    pub tag: String,
    pub friendly_name: String,
    pub secret: String,
    pub post_create: PostCreateAction,
}

impl DeployRequest {
    fn into_payload(self) -> Map<String, Value> {
        object(json!({
            "TemplateID": self.template_id,
            "NewUsername": self.username,
            "NewPassword": self.password,
            "NewEmail": self.email,
            "RequiredTags": [],
            "Tag": self.tag,
            "FriendlyName": self.friendly_name,
            "Secret": self.secret,
            "PostCreate": u8::from(self.post_create),
            "ExtraProvisionSettings": {},
        }))
    }
}

/// Panel-side account as reported by `GetAMPUserInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub name: String,
}

#[derive(Deserialize)]
struct UserInfoBody {
    #[serde(rename = "Name", default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "Username", default)]
    username: Option<String>,
}

impl UserInfoBody {
    fn into_remote_user(self) -> Option<RemoteUser> {
        [self.display_name, self.name, self.username]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .map(|name| RemoteUser { name })
    }
}

impl ApiClient {
    /// Fetch the deployment template catalog.
    ///
    /// Fails with [`ApiError::Catalog`] when the panel defines no templates or
    /// when any entry lacks an `Id` or `Name`; entries are never skipped.
    pub async fn deployment_templates(&self) -> Result<Vec<Template>, ApiError> {
        let body = self.call(GET_DEPLOYMENT_TEMPLATES, Map::new()).await?;
        parse_templates(&body)
    }

    pub async fn deploy_template(&self, request: DeployRequest) -> Result<Value, ApiError> {
        self.call(DEPLOY_TEMPLATE, request.into_payload()).await
    }

    pub async fn set_instance_suspended(
        &self,
        instance_name: &str,
        suspended: bool,
    ) -> Result<Value, ApiError> {
        self.call(
            SET_INSTANCE_SUSPENDED,
            object(json!({ "InstanceName": instance_name, "Suspended": suspended })),
        )
        .await
    }

    pub async fn delete_instance(&self, instance_name: &str) -> Result<Value, ApiError> {
        self.call(
            DELETE_INSTANCE,
            object(json!({ "InstanceName": instance_name })),
        )
        .await
    }

    pub async fn reset_user_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> Result<Value, ApiError> {
        self.call(
            RESET_USER_PASSWORD,
            object(json!({ "Username": username, "NewPassword": new_password })),
        )
        .await
    }

    /// Look up a panel user; `None` when the panel reports no such user.
    pub async fn user_info(&self, username: &str) -> Result<Option<RemoteUser>, ApiError> {
        let body = self
            .call(GET_AMP_USER_INFO, object(json!({ "Username": username })))
            .await?;
        if body.is_null() {
            return Ok(None);
        }
        let info: UserInfoBody = serde_json::from_value(body)
            .map_err(|err| ApiError::Connectivity(format!("malformed user info: {err}")))?;
        Ok(info.into_remote_user())
    }
}

fn parse_templates(body: &Value) -> Result<Vec<Template>, ApiError> {
    let entries = body
        .as_array()
        .ok_or_else(|| ApiError::Catalog("expected a list of deployment templates".into()))?;
    if entries.is_empty() {
        return Err(ApiError::Catalog(
            "no deployment templates are defined on the panel; create one in AMP first".into(),
        ));
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let id = entry.get("Id").and_then(template_id).ok_or_else(|| {
                ApiError::Catalog(format!("template at position {index} has no Id"))
            })?;
            let name = entry
                .get("Name")
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| ApiError::Catalog(format!("template {id} has no Name")))?;
            Ok(Template {
                id,
                name: name.to_string(),
            })
        })
        .collect()
}

fn template_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
