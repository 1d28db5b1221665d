use serde::{Deserialize, Serialize};

use crate::{EpochMillis, now_millis};

const UNKNOWN_USER: &str = "unknown";

/// Client-supplied fields accepted when a flow, run, step or task is created.
///
/// Every field is optional: the client may post an empty body, explicit `null`s,
/// or any superset of these keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSpec {
    pub user_name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub system_tags: Option<Vec<String>>,
    pub ts_epoch: Option<EpochMillis>,
}

impl CreateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user_name = Some(user.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_system_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Requested user, falling back to the login name of the daemon process.
    pub fn resolved_user(&self) -> String {
        self.user_name
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(login_name)
    }

    pub fn resolved_tags(&self) -> Vec<String> {
        self.tags.clone().unwrap_or_default()
    }

    pub fn resolved_system_tags(&self) -> Vec<String> {
        self.system_tags.clone().unwrap_or_default()
    }

    /// Requested creation time, or now.
    pub fn resolved_ts(&self) -> EpochMillis {
        self.ts_epoch.filter(|ts| *ts > 0).unwrap_or_else(now_millis)
    }
}

fn login_name() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}
