use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ApplicationStatus {
    #[default]
    Applied,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationStatus::Applied => write!(f, "Applied"),
            ApplicationStatus::Interviewing => write!(f, "Interviewing"),
            ApplicationStatus::Offer => write!(f, "Offer"),
            ApplicationStatus::Rejected => write!(f, "Rejected"),
            ApplicationStatus::Withdrawn => write!(f, "Withdrawn"),
        }
    }
}

impl ApplicationStatus {
    /// Whether the application can still change outcome.
    pub fn is_open(&self) -> bool {
        matches!(self, ApplicationStatus::Applied | ApplicationStatus::Interviewing)
    }
}

/// AI review of an application. Rendered elsewhere; only carried here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AiAnalysis {
    /// 0-100 fit between resume and posting.
    #[serde(default)]
    pub match_score: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct JobApplication {
    // Backends differ on "id" vs "_id"
    #[serde(alias = "_id")]
    pub id: String,
    pub company: String,
    pub position: String,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub analysis: Option<AiAnalysis>,
}

impl JobApplication {
    pub fn display_name(&self) -> String {
        format!("{} at {}", self.position, self.company)
    }
}

/// Body for creating an application.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApplication {
    pub company: String,
    pub position: String,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
