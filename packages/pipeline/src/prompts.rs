//! Prompt templates for both classification stages.

use crate::types::{classification::Track, comment::Comment, item::Item};

/// Default Stage-1 body budget in characters.
pub const ROUTE_BODY_CHARS: usize = 5000;

/// Stage-2 body budget in characters.
pub const CLASSIFY_BODY_CHARS: usize = 3000;

/// Per-comment budget in Stage-2 prompts.
pub const COMMENT_BODY_CHARS: usize = 500;

/// Comments shown to Stage-2.
pub const PROMPT_COMMENTS: usize = 5;

const TRUNCATION_MARKER: &str = "\n[...truncated]";

pub const ROUTE_SYSTEM_PROMPT: &str = r#"You triage Reddit posts for a fraud and identity-verification research dashboard.

Set two independent boolean flags for each post.

is_fraud is true when the post substantively discusses:
- a scam, con, or fraud of any kind (financial, romance, investment, employment, identity)
- identity theft, account takeover, or stolen credentials
- phishing, social engineering, SIM swapping, or deepfakes used to deceive
- forged documents, synthetic identities, or data breaches
- warnings, advice, recovery stories, or news about any of the above

is_idv is true when the post substantively discusses:
- identity verification, KYC, or age verification, good or bad
- document checks, selfie matching, liveness detection, or facial age estimation
- verification vendors such as Persona, Jumio, Onfido, ID.me, Veriff, Sumsub, CLEAR
- friction with, or praise for, a verification process

These are NOT identity verification (is_idv = false):
- 2FA or MFA codes, authenticator apps, security keys
- account recovery by email, phone, or device details
- background checks of criminal or driving records
- applying for passports, birth certificates, or other government documents

Both flags may be true.

Set both flags to false for:
- election "fraud" arguments and other political uses of the word
- "this game is a scam" in the sense of poor quality
- service complaints, merchant disputes, or policy rants with no actual fraud
- gig-worker deactivation disputes
- referral spam or gambling promotions that mention KYC in passing
- bot posts, recurring megathreads, link scanners
- SEO spam such as "Is [Platform] a Scam or Legit?"
- lying about age or looks on dating apps"#;

pub const FRAUD_SYSTEM_PROMPT: &str = r#"You are a fraud intelligence analyst. Read a Reddit post and its top comments and extract structured fields.

Use the enum values exactly as written. Reply with a single JSON object and nothing else.

is_relevant: true if the post describes a real fraud incident, a victim's experience, a scam warning, or fraud news. false if fraud is only mentioned in passing (product launches, generic security tips, policy debate). Fill in every other field either way.

fraud_type (primary scheme):
  identity_theft - personal details used without consent to open accounts, file taxes, or borrow; includes family members doing it
  account_takeover - an existing online account hijacked
  phishing - fake links in emails, texts, or messages that harvest credentials
  romance_scam - a fake relationship used to extract money
  investment_scam - fake trading platforms, Ponzi schemes, pig butchering, MLMs
  employment_scam - fake jobs that harvest data or demand upfront fees
  payment_fraud - unauthorized transactions, stolen cards, fake checks, shopping or refund scams
  deepfake_ai - AI-generated images, video, or voice used to impersonate
  sim_swap - phone number moved to another SIM without consent
  data_breach - personal data exposed by a compromised organization
  business_impersonation - posing as a company, agency, or tech support
  document_forgery - fake IDs, passports, diplomas, certificates
  other - anything else

industry (where it happened): banking, fintech, crypto, ecommerce, social_media, gig_economy, government, telecom, healthcare, real_estate, gaming, dating, other

loss_bracket:
  none - explicitly lost nothing
  under_100
  100_to_1k
  1k_to_10k
  10k_to_100k
  over_100k
  unspecified - no amount given

channel (how it reached the victim): email, phone, sms, messaging_app, social_media, website, in_person, app, mail, other

notable_quote: the most striking one or two sentences, verbatim, preferably from the original poster. null if nothing stands out.

tags: 2 to 5 short snake_case tags for themes the fields above miss (for example pig_butchering, elderly_victim, repeat_victim, cross_border).

Comments marked (OP) come from the original poster and often hold the amounts lost, the companies involved, or how it ended."#;

pub const IDV_SYSTEM_PROMPT: &str = r#"You are an identity verification analyst. Read a Reddit post and its top comments and extract structured fields.

Use the enum values exactly as written. When several methods or complaints appear, pick the one the user focuses on. When unsure, prefer "other" or "unknown". Reply with a single JSON object and nothing else.

is_relevant: true if the post substantively discusses an identity verification experience, process, or policy. false for referral spam that mentions KYC as a step, 2FA login codes, fiction, passing mentions, or local government ID bureaucracy (Aadhaar-PAN linking, passport police checks). Complaints about global platforms from any country are relevant. Fill in every other field either way.

verification_type (primary method):
  document_upload - photo or scan of an ID document
  selfie_photo - selfie matched against the ID photo
  facial_age_estimation - age estimated from the face without identifying the user
  liveness_check - on-camera actions proving a live person
  knowledge_based - security or credit-bureau questions
  database_lookup - details checked against government or bureau records
  phone_verification - phone number used as proof of identity (not login codes)
  other - anything else, including in-person or mailed checks
  unknown - not described

friction_type (main pain point):
  technical_failure - crashes, camera or upload errors
  false_rejection - a genuine user or document rejected
  too_slow - days or weeks pending
  too_many_steps - one flow with too many steps or retries
  excessive_reverification - asked to verify again after already passing
  privacy_concern - unwilling to hand over face or ID data
  accessibility_issue - disability, age, missing technology, or no documents
  info_mismatch - current details differ from what is on file
  no_alternative_method - the only path fails and there is no fallback
  country_restriction - the user's national document is not accepted
  none - no friction expressed
  other - anything else

trigger_reason (what prompted verification): new_account, age_gate, account_recovery, periodic_recheck, suspicious_activity, transaction, policy_change, document_update, new_device_location, unknown

platform_name: the company or platform doing the verification (for example "Uber", "Coinbase", "ID.me"). null if none is named.

sentiment: positive, negative, neutral, or mixed

notable_quote: the most striking one or two sentences, verbatim, preferably from the original poster. null if nothing stands out.

tags: 2 to 5 short snake_case tags for context the fields above miss (for example gig_worker, expat, persona, uk_osa, account_restored). Do not repeat field values.

Comments marked (OP) come from the original poster and often describe workarounds or how it ended."#;

/// System prompt for a Stage-2 track.
pub fn classify_system_prompt(track: Track) -> &'static str {
    match track {
        Track::Fraud => FRAUD_SYSTEM_PROMPT,
        Track::Idv => IDV_SYSTEM_PROMPT,
    }
}

/// First `max` characters of `text`.
fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Stage-1 user prompt. Bodies over `body_budget` characters are cut and
/// marked as truncated.
pub fn route_user_prompt(item: &Item, body_budget: usize) -> String {
    let body = item.body.trim();
    let body = if body.chars().count() > body_budget {
        format!("{}{TRUNCATION_MARKER}", clip(body, body_budget))
    } else {
        body.to_string()
    };

    format!(
        "Classify this Reddit post:\n\n\
         Subreddit: r/{}\n\
         Title: {}\n\
         Body: {}\n\
         Score: {} | Comments: {}",
        item.subreddit, item.title, body, item.score, item.num_comments
    )
}

/// Stage-2 user prompt. `comments` should already be ranked.
pub fn classify_user_prompt(item: &Item, comments: &[Comment]) -> String {
    let comments_text = if comments.is_empty() {
        "(No comments available)".to_string()
    } else {
        comments
            .iter()
            .take(PROMPT_COMMENTS)
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "[Comment {} | Score: {} | By: {}{}]\n{}",
                    i + 1,
                    c.score,
                    c.author.as_deref().unwrap_or("[deleted]"),
                    if c.is_submitter { " (OP)" } else { "" },
                    clip(&c.body, COMMENT_BODY_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "Classify this Reddit post:\n\n\
         Subreddit: r/{}\n\
         Title: {}\n\
         Body: {}\n\n\
         Top Comments:\n{}\n\n\
         Score: {} | Comments: {}",
        item.subreddit,
        item.title,
        clip(&item.body, CLASSIFY_BODY_CHARS),
        comments_text,
        item.score,
        item.num_comments
    )
}
