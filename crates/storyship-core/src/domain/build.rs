//! Build record returned by the service after registration.

use serde::{Deserialize, Serialize};

/// Account quota flags attached to a build's app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub exceeded_threshold: bool,
    pub payment_required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildApp {
    pub account: Option<Account>,
}

/// Features purchased for the project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildFeatures {
    pub ui_tests: bool,
    pub ui_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTest {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Remote-assigned build record. Created once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: String,
    pub number: u64,
    #[serde(default)]
    pub spec_count: u64,
    #[serde(default)]
    pub tests: Vec<BuildTest>,
    #[serde(default)]
    pub was_limited: bool,
    #[serde(default)]
    pub app: BuildApp,
    #[serde(default)]
    pub features: BuildFeatures,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Why the service capped snapshot execution for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    ExceededThreshold,
    PaymentRequired,
    /// Limited for a reason this client does not recognise.
    Unknown,
}

impl LimitReason {
    /// Exit code scoped to the build registration task.
    pub fn exit_code(self) -> i32 {
        match self {
            LimitReason::ExceededThreshold => 101,
            LimitReason::PaymentRequired => 102,
            LimitReason::Unknown => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            LimitReason::ExceededThreshold => {
                "Snapshot quota reached; this build was limited. Upgrade your plan to continue."
            }
            LimitReason::PaymentRequired => {
                "Payment is required for this account; this build was limited."
            }
            LimitReason::Unknown => "This build was limited by the service.",
        }
    }
}

impl Build {
    /// Reason this build was limited, if it was.
    pub fn limit_reason(&self) -> Option<LimitReason> {
        if !self.was_limited {
            return None;
        }
        let account = self.app.account.clone().unwrap_or_default();
        Some(if account.exceeded_threshold {
            LimitReason::ExceededThreshold
        } else if account.payment_required {
            LimitReason::PaymentRequired
        } else {
            LimitReason::Unknown
        })
    }

    /// Whether any visual test or review feature is enabled.
    pub fn has_visual_features(&self) -> bool {
        self.features.ui_tests || self.features.ui_review
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_from(json: &str) -> Build {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_deserialize_minimal_build() {
        let build = build_from(r#"{"id":"b1","number":7}"#);
        assert_eq!(build.number, 7);
        assert!(!build.was_limited);
        assert!(build.limit_reason().is_none());
        assert!(!build.has_visual_features());
    }

    #[test]
    fn test_limit_reasons() {
        let exceeded = build_from(
            r#"{"id":"b","number":1,"wasLimited":true,"app":{"account":{"exceededThreshold":true}}}"#,
        );
        assert_eq!(exceeded.limit_reason(), Some(LimitReason::ExceededThreshold));
        assert_eq!(LimitReason::ExceededThreshold.exit_code(), 101);

        let payment = build_from(
            r#"{"id":"b","number":1,"wasLimited":true,"app":{"account":{"paymentRequired":true}}}"#,
        );
        assert_eq!(payment.limit_reason(), Some(LimitReason::PaymentRequired));
        assert_eq!(LimitReason::PaymentRequired.exit_code(), 102);

        let unknown = build_from(r#"{"id":"b","number":1,"wasLimited":true}"#);
        assert_eq!(unknown.limit_reason(), Some(LimitReason::Unknown));
        assert_eq!(LimitReason::Unknown.exit_code(), 100);
    }
}
