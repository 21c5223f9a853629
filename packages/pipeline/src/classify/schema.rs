//! Stage-2 output contracts, one per track.
//!
//! Each output struct rejects unknown fields and decodes its categorical
//! fields into closed enums. Field presence is checked separately so a
//! missing nullable field is reported as missing rather than read as null.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::types::classification::{ClassificationRecord, Track};

/// Allowed tag count.
pub const MIN_TAGS: usize = 2;
pub const MAX_TAGS: usize = 5;

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }
    };
}

closed_enum!(
    /// Primary fraud category.
    FraudType {
        IdentityTheft => "identity_theft",
        AccountTakeover => "account_takeover",
        Phishing => "phishing",
        RomanceScam => "romance_scam",
        InvestmentScam => "investment_scam",
        EmploymentScam => "employment_scam",
        PaymentFraud => "payment_fraud",
        DeepfakeAi => "deepfake_ai",
        SimSwap => "sim_swap",
        DataBreach => "data_breach",
        BusinessImpersonation => "business_impersonation",
        DocumentForgery => "document_forgery",
        Other => "other",
    }
);

closed_enum!(
    Industry {
        Banking => "banking",
        Fintech => "fintech",
        Crypto => "crypto",
        Ecommerce => "ecommerce",
        SocialMedia => "social_media",
        GigEconomy => "gig_economy",
        Government => "government",
        Telecom => "telecom",
        Healthcare => "healthcare",
        RealEstate => "real_estate",
        Gaming => "gaming",
        Dating => "dating",
        Other => "other",
    }
);

closed_enum!(
    /// Reported financial loss.
    LossBracket {
        None => "none",
        Under100 => "under_100",
        From100To1k => "100_to_1k",
        From1kTo10k => "1k_to_10k",
        From10kTo100k => "10k_to_100k",
        Over100k => "over_100k",
        Unspecified => "unspecified",
    }
);

closed_enum!(
    /// How the fraud reached the victim.
    Channel {
        Email => "email",
        Phone => "phone",
        Sms => "sms",
        MessagingApp => "messaging_app",
        SocialMedia => "social_media",
        Website => "website",
        InPerson => "in_person",
        App => "app",
        Mail => "mail",
        Other => "other",
    }
);

closed_enum!(
    VerificationType {
        DocumentUpload => "document_upload",
        SelfiePhoto => "selfie_photo",
        FacialAgeEstimation => "facial_age_estimation",
        LivenessCheck => "liveness_check",
        KnowledgeBased => "knowledge_based",
        DatabaseLookup => "database_lookup",
        PhoneVerification => "phone_verification",
        Other => "other",
        Unknown => "unknown",
    }
);

closed_enum!(
    /// Main complaint about a verification flow.
    FrictionType {
        TechnicalFailure => "technical_failure",
        FalseRejection => "false_rejection",
        TooSlow => "too_slow",
        TooManySteps => "too_many_steps",
        ExcessiveReverification => "excessive_reverification",
        PrivacyConcern => "privacy_concern",
        AccessibilityIssue => "accessibility_issue",
        InfoMismatch => "info_mismatch",
        NoAlternativeMethod => "no_alternative_method",
        CountryRestriction => "country_restriction",
        None => "none",
        Other => "other",
    }
);

closed_enum!(
    /// What prompted the verification request.
    TriggerReason {
        NewAccount => "new_account",
        AgeGate => "age_gate",
        AccountRecovery => "account_recovery",
        PeriodicRecheck => "periodic_recheck",
        SuspiciousActivity => "suspicious_activity",
        Transaction => "transaction",
        PolicyChange => "policy_change",
        DocumentUpdate => "document_update",
        NewDeviceLocation => "new_device_location",
        Unknown => "unknown",
    }
);

closed_enum!(
    Sentiment {
        Positive => "positive",
        Negative => "negative",
        Neutral => "neutral",
        Mixed => "mixed",
    }
);

/// A track's output contract.
pub trait TrackOutput: DeserializeOwned {
    const TRACK: Track;

    /// Every field the object must carry (nullable ones may be null)
    const FIELDS: &'static [&'static str];

    /// Fields holding closed-enum strings
    const ENUM_FIELDS: &'static [&'static str];

    fn tags(&self) -> &[String];

    fn into_record(self, post_id: &str, model: &str) -> ClassificationRecord;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FraudOutput {
    pub is_relevant: bool,
    pub fraud_type: FraudType,
    pub industry: Industry,
    pub loss_bracket: LossBracket,
    pub channel: Channel,
    pub notable_quote: Option<String>,
    pub tags: Vec<String>,
}

impl TrackOutput for FraudOutput {
    const TRACK: Track = Track::Fraud;
    const FIELDS: &'static [&'static str] = &[
        "is_relevant",
        "fraud_type",
        "industry",
        "loss_bracket",
        "channel",
        "notable_quote",
        "tags",
    ];
    const ENUM_FIELDS: &'static [&'static str] = &["fraud_type", "industry", "loss_bracket", "channel"];

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn into_record(self, post_id: &str, model: &str) -> ClassificationRecord {
        let attributes = BTreeMap::from([
            ("industry".to_string(), self.industry.as_str().to_string()),
            ("loss_bracket".to_string(), self.loss_bracket.as_str().to_string()),
            ("channel".to_string(), self.channel.as_str().to_string()),
        ]);
        ClassificationRecord {
            post_id: post_id.to_string(),
            track: Track::Fraud,
            is_relevant: self.is_relevant,
            primary: self.fraud_type.as_str().to_string(),
            attributes,
            tags: self.tags,
            notable_quote: self.notable_quote,
            platform_name: None,
            model: model.to_string(),
            classified_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdvOutput {
    pub is_relevant: bool,
    pub verification_type: VerificationType,
    pub friction_type: FrictionType,
    pub trigger_reason: TriggerReason,
    pub platform_name: Option<String>,
    pub sentiment: Sentiment,
    pub notable_quote: Option<String>,
    pub tags: Vec<String>,
}

impl TrackOutput for IdvOutput {
    const TRACK: Track = Track::Idv;
    const FIELDS: &'static [&'static str] = &[
        "is_relevant",
        "verification_type",
        "friction_type",
        "trigger_reason",
        "platform_name",
        "sentiment",
        "notable_quote",
        "tags",
    ];
    const ENUM_FIELDS: &'static [&'static str] =
        &["verification_type", "friction_type", "trigger_reason", "sentiment"];

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn into_record(self, post_id: &str, model: &str) -> ClassificationRecord {
        let attributes = BTreeMap::from([
            ("friction_type".to_string(), self.friction_type.as_str().to_string()),
            ("trigger_reason".to_string(), self.trigger_reason.as_str().to_string()),
            ("sentiment".to_string(), self.sentiment.as_str().to_string()),
        ]);
        ClassificationRecord {
            post_id: post_id.to_string(),
            track: Track::Idv,
            is_relevant: self.is_relevant,
            primary: self.verification_type.as_str().to_string(),
            attributes,
            tags: self.tags,
            notable_quote: self.notable_quote,
            platform_name: self.platform_name,
            model: model.to_string(),
            classified_at: Utc::now(),
        }
    }
}

/// Check an already-normalized object against `T`'s contract.
pub fn validate<T: TrackOutput>(map: Map<String, Value>) -> Result<T, ValidationError> {
    if let Some(missing) = T::FIELDS.iter().find(|f| !map.contains_key(**f)) {
        return Err(ValidationError::MissingField(*missing));
    }

    let output: T = serde_json::from_value(Value::Object(map))
        .map_err(|e| ValidationError::Schema(e.to_string()))?;

    let tags = output.tags().len();
    if !(MIN_TAGS..=MAX_TAGS).contains(&tags) {
        return Err(ValidationError::TagCount(tags));
    }
    Ok(output)
}
