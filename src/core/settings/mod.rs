//! Guard configuration document: triggers, actions and rules.

mod store;

pub use store::{ConfigStore, JsonFileStore, MemoryStore, SharedConfig};

use crate::core::event::TriggerKind;
use crate::core::video::detector::{
    PIXEL_NUMBER_DIFF_THRESHOLD_MAX, PIXEL_NUMBER_DIFF_THRESHOLD_MIN,
    PIXEL_VALUE_DIFF_THRESHOLD_MIN,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON5 error: {0}")]
    Json5(#[from] json5::Error),
    #[error("malformed action reference \"{0}\", expected KIND:ID")]
    MalformedActionRef(String),
    #[error("unknown action kind \"{0}\"")]
    UnknownActionKind(String),
    #[error("action {0} not found")]
    ActionNotFound(ActionRef),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub triggers: Triggers,
    pub actions: Actions,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Triggers {
    pub motion: MotionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Selected capture source, empty when none is selected.
    pub camera_id: String,
    pub pixel_value_diff_threshold: u32,
    pub pixel_number_diff_threshold: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            camera_id: String::new(),
            pixel_value_diff_threshold: 10,
            pixel_number_diff_threshold: 10,
        }
    }
}

impl MotionSettings {
    /// Value threshold narrowed to a luma delta, clamped into 1..=255.
    pub fn pixel_value_diff_threshold_u8(&self) -> u8 {
        self.pixel_value_diff_threshold
            .clamp(PIXEL_VALUE_DIFF_THRESHOLD_MIN as u32, u8::MAX as u32) as u8
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actions {
    pub http: Vec<HttpAction>,
    pub aws_s3: Vec<AwsS3Action>,
    pub phone_call: Vec<PhoneCallAction>,
    pub phone_sms: Vec<PhoneSmsAction>,
    pub phone_mms: Vec<PhoneMmsAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpAction {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Vec<HttpHeader>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsS3Action {
    pub id: String,
    pub aws_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub bucket_name: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneCallAction {
    pub id: String,
    pub recipient_phone_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneSmsAction {
    pub id: String,
    pub recipient_phone_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneMmsAction {
    pub id: String,
    pub recipient_phone_number: String,
}

/// Binding of a trigger to an action with rate limiting and retry policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub id: String,
    pub trigger: String,
    /// `"KIND:ID"`, e.g. `"HTTP:notify-home"`.
    pub action: String,
    pub cooldown_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub include_payload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Http,
    AwsS3,
    PhoneCall,
    PhoneSms,
    PhoneMms,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Http => "HTTP",
            ActionKind::AwsS3 => "AWS_S3",
            ActionKind::PhoneCall => "PHONE_CALL",
            ActionKind::PhoneSms => "PHONE_SMS",
            ActionKind::PhoneMms => "PHONE_MMS",
        }
    }
}

impl FromStr for ActionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTTP" => Ok(ActionKind::Http),
            "AWS_S3" | "CLOUD_UPLOAD" => Ok(ActionKind::AwsS3),
            "PHONE_CALL" | "CALL" => Ok(ActionKind::PhoneCall),
            "PHONE_SMS" | "SMS" => Ok(ActionKind::PhoneSms),
            "PHONE_MMS" | "MMS" => Ok(ActionKind::PhoneMms),
            _ => Err(ConfigError::UnknownActionKind(s.to_string())),
        }
    }
}

/// Parsed `"KIND:ID"` reference from a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionRef {
    pub kind: ActionKind,
    pub id: String,
}

impl ActionRef {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| ConfigError::MalformedActionRef(raw.to_string()))?;
        if id.is_empty() {
            return Err(ConfigError::MalformedActionRef(raw.to_string()));
        }
        Ok(Self {
            kind: kind.parse()?,
            id: id.to_string(),
        })
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// A configured action resolved from a rule, ready to be performed.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    Http(Arc<HttpAction>),
    AwsS3(Arc<AwsS3Action>),
    PhoneCall(Arc<PhoneCallAction>),
    PhoneSms(Arc<PhoneSmsAction>),
    PhoneMms(Arc<PhoneMmsAction>),
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSpec::Http(_) => ActionKind::Http,
            ActionSpec::AwsS3(_) => ActionKind::AwsS3,
            ActionSpec::PhoneCall(_) => ActionKind::PhoneCall,
            ActionSpec::PhoneSms(_) => ActionKind::PhoneSms,
            ActionSpec::PhoneMms(_) => ActionKind::PhoneMms,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ActionSpec::Http(a) => &a.id,
            ActionSpec::AwsS3(a) => &a.id,
            ActionSpec::PhoneCall(a) => &a.id,
            ActionSpec::PhoneSms(a) => &a.id,
            ActionSpec::PhoneMms(a) => &a.id,
        }
    }
}

/// Non-fatal problem found in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    DuplicateRuleId(String),
    DuplicateActionId(ActionKind, String),
    UnknownTrigger { rule_id: String, trigger: String },
    UnresolvedAction { rule_id: String, reason: String },
    ThresholdOutOfRange(&'static str, u32),
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigIssue::DuplicateRuleId(id) => write!(f, "duplicate rule id \"{}\"", id),
            ConfigIssue::DuplicateActionId(kind, id) => {
                write!(f, "duplicate {} action id \"{}\"", kind.as_str(), id)
            }
            ConfigIssue::UnknownTrigger { rule_id, trigger } => {
                write!(f, "rule \"{}\" has unknown trigger \"{}\"", rule_id, trigger)
            }
            ConfigIssue::UnresolvedAction { rule_id, reason } => {
                write!(f, "rule \"{}\": {}", rule_id, reason)
            }
            ConfigIssue::ThresholdOutOfRange(name, value) => {
                write!(f, "{} = {} is out of range", name, value)
            }
        }
    }
}

impl Configuration {
    /// Parses a JSON or JSON5 document.
    pub fn from_json5_str(text: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn resolve(&self, action_ref: &ActionRef) -> Result<ActionSpec, ConfigError> {
        fn find<T: Clone>(list: &[T], id: &str, id_of: impl Fn(&T) -> &str) -> Option<Arc<T>> {
            list.iter().find(|a| id_of(a) == id).cloned().map(Arc::new)
        }

        let id = action_ref.id.as_str();
        let actions = &self.actions;
        let spec = match action_ref.kind {
            ActionKind::Http => find(&actions.http, id, |a| &a.id).map(ActionSpec::Http),
            ActionKind::AwsS3 => find(&actions.aws_s3, id, |a| &a.id).map(ActionSpec::AwsS3),
            ActionKind::PhoneCall => {
                find(&actions.phone_call, id, |a| &a.id).map(ActionSpec::PhoneCall)
            }
            ActionKind::PhoneSms => {
                find(&actions.phone_sms, id, |a| &a.id).map(ActionSpec::PhoneSms)
            }
            ActionKind::PhoneMms => {
                find(&actions.phone_mms, id, |a| &a.id).map(ActionSpec::PhoneMms)
            }
        };

        spec.ok_or_else(|| ConfigError::ActionNotFound(action_ref.clone()))
    }

    pub fn resolve_str(&self, raw: &str) -> Result<ActionSpec, ConfigError> {
        self.resolve(&ActionRef::parse(raw)?)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let motion = &self.triggers.motion;
        if motion.pixel_value_diff_threshold < PIXEL_VALUE_DIFF_THRESHOLD_MIN as u32
            || motion.pixel_value_diff_threshold > u8::MAX as u32
        {
            issues.push(ConfigIssue::ThresholdOutOfRange(
                "pixel_value_diff_threshold",
                motion.pixel_value_diff_threshold,
            ));
        }
        if !(PIXEL_NUMBER_DIFF_THRESHOLD_MIN..=PIXEL_NUMBER_DIFF_THRESHOLD_MAX)
            .contains(&motion.pixel_number_diff_threshold)
        {
            issues.push(ConfigIssue::ThresholdOutOfRange(
                "pixel_number_diff_threshold",
                motion.pixel_number_diff_threshold,
            ));
        }

        let mut check_ids = |kind: ActionKind, ids: Vec<&str>| {
            let mut seen = HashSet::new();
            for id in ids {
                if !seen.insert(id) {
                    issues.push(ConfigIssue::DuplicateActionId(kind, id.to_string()));
                }
            }
        };
        let a = &self.actions;
        check_ids(ActionKind::Http, a.http.iter().map(|x| x.id.as_str()).collect());
        check_ids(ActionKind::AwsS3, a.aws_s3.iter().map(|x| x.id.as_str()).collect());
        check_ids(ActionKind::PhoneCall, a.phone_call.iter().map(|x| x.id.as_str()).collect());
        check_ids(ActionKind::PhoneSms, a.phone_sms.iter().map(|x| x.id.as_str()).collect());
        check_ids(ActionKind::PhoneMms, a.phone_mms.iter().map(|x| x.id.as_str()).collect());

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                issues.push(ConfigIssue::DuplicateRuleId(rule.id.clone()));
            }
            if rule.trigger.parse::<TriggerKind>().is_err() {
                issues.push(ConfigIssue::UnknownTrigger {
                    rule_id: rule.id.clone(),
                    trigger: rule.trigger.clone(),
                });
            }
            if let Err(e) = self.resolve_str(&rule.action) {
                issues.push(ConfigIssue::UnresolvedAction {
                    rule_id: rule.id.clone(),
                    reason: e.to_string(),
                });
            }
        }

        issues
    }
}
