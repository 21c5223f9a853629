//! Built-in query catalog, organised in collection tiers.
//!
//! Tier 1 walks subreddit listings directly and tier 2 searches inside
//! medium-density subreddits. Tiers 3 to 8 run site-wide keyword
//! searches. Tiers 9 to 12 are mixed: in-subreddit searches first, then
//! site-wide queries, all under one tag.

use serde::Serialize;

use crate::traits::source::PageRequest;

/// One listing walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuerySource {
    /// `/r/{subreddit}/{sort}.json` with an optional time filter
    Listing {
        subreddit: String,
        sort: String,
        time: Option<String>,
    },
    /// `/r/{subreddit}/search.json` restricted to the subreddit
    SubredditSearch {
        subreddit: String,
        query: String,
        sort: String,
        tag: String,
    },
    /// `/search.json` across the whole site
    GlobalSearch { query: String, tag: String },
}

impl QuerySource {
    pub fn listing(subreddit: &str, spec: &str) -> Self {
        let (sort, time) = match spec.split_once('/') {
            Some((sort, time)) => (sort.to_string(), Some(time.to_string())),
            None => (spec.to_string(), None),
        };
        QuerySource::Listing {
            subreddit: subreddit.to_string(),
            sort,
            time,
        }
    }

    pub fn subreddit_search(subreddit: &str, query: &str, sort: &str) -> Self {
        QuerySource::SubredditSearch {
            subreddit: subreddit.to_string(),
            query: query.to_string(),
            sort: sort.to_string(),
            tag: format!("search_subreddit_{sort}"),
        }
    }

    pub fn global(query: &str, tag: &str) -> Self {
        QuerySource::GlobalSearch {
            query: query.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Replace the catalog tag of a search source. Listings keep theirs.
    pub fn tagged(mut self, new_tag: impl Into<String>) -> Self {
        match &mut self {
            QuerySource::SubredditSearch { tag, .. } | QuerySource::GlobalSearch { tag, .. } => {
                *tag = new_tag.into();
            }
            QuerySource::Listing { .. } => {}
        }
        self
    }

    /// Catalog tag stored as the item's `collection_source`.
    pub fn collection_source(&self) -> String {
        match self {
            QuerySource::Listing { sort, time, .. } => match time {
                Some(time) => format!("listing_{sort}_{time}"),
                None => format!("listing_{sort}"),
            },
            QuerySource::SubredditSearch { tag, .. } | QuerySource::GlobalSearch { tag, .. } => {
                tag.clone()
            }
        }
    }

    /// First-page request with `page_size` items per page.
    pub fn first_page(&self, page_size: u32) -> PageRequest {
        let limit = page_size.to_string();
        match self {
            QuerySource::Listing {
                subreddit,
                sort,
                time,
            } => {
                let mut request =
                    PageRequest::new(format!("/r/{subreddit}/{sort}.json"), self.collection_source())
                        .param("limit", limit);
                if let Some(time) = time {
                    request = request.param("t", time.as_str());
                }
                request
            }
            QuerySource::SubredditSearch {
                subreddit,
                query,
                sort,
                ..
            } => PageRequest::new(format!("/r/{subreddit}/search.json"), self.collection_source())
                .param("q", query.as_str())
                .param("restrict_sr", "on")
                .param("sort", sort.as_str())
                .param("t", "year")
                .param("limit", limit)
                .with_query(query.as_str()),
            QuerySource::GlobalSearch { query, .. } => {
                PageRequest::new("/search.json", self.collection_source())
                    .param("q", query.as_str())
                    .param("sort", "relevance")
                    .param("t", "year")
                    .param("limit", limit)
                    .with_query(query.as_str())
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            QuerySource::Listing {
                subreddit,
                sort,
                time,
            } => match time {
                Some(time) => format!("r/{subreddit} {sort}/{time}"),
                None => format!("r/{subreddit} {sort}"),
            },
            QuerySource::SubredditSearch {
                subreddit,
                query,
                sort,
                ..
            } => format!("r/{subreddit} search '{query}' ({sort})"),
            QuerySource::GlobalSearch { query, .. } => format!("global search '{query}'"),
        }
    }
}

/// A named group of query sources collected as one run.
#[derive(Debug, Clone, Serialize)]
pub struct Tier {
    pub number: u8,
    pub name: &'static str,
    pub sources: Vec<QuerySource>,
}

const TIER1_LISTINGS: &[(&str, &[&str])] = &[
    ("Scams", &["top/year", "top/all", "new", "hot", "controversial/year"]),
    ("identitytheft", &["top/all", "new", "hot"]),
    ("fraud", &["top/all", "new", "hot"]),
];

const TIER2_SEARCHES: &[(&str, &[&str])] = &[
    (
        "personalfinance",
        &[
            "fraud",
            "identity theft",
            "scammed",
            "stolen identity",
            "unauthorized charges",
            "someone opened account",
            "credit card stolen",
            "phishing email",
        ],
    ),
    (
        "CryptoCurrency",
        &[
            "scam",
            "KYC",
            "hacked wallet",
            "phishing",
            "rug pull",
            "fake exchange",
            "identity verification",
        ],
    ),
    (
        "CreditCards",
        &["fraud", "stolen card", "unauthorized transaction", "skimmed", "identity theft"],
    ),
    (
        "banking",
        &["fraud", "account hacked", "unauthorized", "identity theft", "scam"],
    ),
    (
        "cybersecurity",
        &[
            "identity fraud",
            "deepfake",
            "phishing campaign",
            "credential theft",
            "social engineering attack",
        ],
    ),
];

const TIER2_SORTS: &[&str] = &["relevance", "top"];

const TIER3_GLOBAL: &[&str] = &[
    "identity stolen what do I do",
    "someone opened account my name",
    "identity theft report",
    "my identity was stolen",
    "deepfake scam",
    "deepfake fraud",
    "AI generated fake identity",
    "synthetic identity fraud",
    "identity verification experience",
    "identity verification selfie",
    "KYC nightmare",
    "KYC experience",
    "liveness check",
    "selfie verification",
    "document verification failed",
    "age verification online",
    "account takeover bank",
    "SIM swap attack",
    "phishing stolen credentials",
    "fake ID caught",
    "business email compromise",
    "romance scam money",
    "verification bypass",
    "biometric spoofing",
    "face swap verification",
    "identity verification frustrating",
];

const TIER4_VENDORS: &[&str] = &[
    "Jumio verification",
    "Onfido verification",
    "Sumsub KYC",
    "Veriff identity verification",
    "ID.me verification",
    "ID.me problems",
    "Plaid identity verification",
    "Socure identity",
    "iProov liveness",
    "Au10tix verification",
    "Trulioo identity",
    "CLEAR verified",
];

const TIER5_KYC: &[&str] = &[
    "KYC failed my account",
    "identity verification keeps failing",
    "can't verify my identity",
    "selfie verification not working",
    "document rejected verification",
    "why do I need to verify my identity",
    "identity verification privacy concern",
    "AML check blocked my account",
    "bank froze account verification",
    "crypto exchange identity verification",
    "age verification unfair",
    "biometric data privacy concern",
    "identity verification took too long",
    "account locked identity verification",
    "forced to upload ID",
];

const TIER6_CLIENTS: &[&str] = &[
    "OpenAI verify identity",
    "ChatGPT age verification",
    "DoorDash ID verification",
    "DoorDash dasher verify",
    "Cash App verify identity",
    "Cash App KYC",
    "Carvana ID verification",
    "Coursera identity verification",
    "Square verify identity",
    "Robinhood identity verification",
    "Revolut KYC failed",
    "Wise verify identity",
    "Kraken KYC",
    "Crypto.com verify identity",
];

const TIER7_SOCIAL: &[&str] = &[
    "Facebook verify identity",
    "Facebook selfie verification",
    "Facebook video verification",
    "Instagram selfie verification",
    "LinkedIn ID verification",
    "Twitter verify identity",
    "Discord age verification",
    "TikTok age verification",
    "Snapchat verify identity",
    "YouTube age verification",
    "Airbnb ID verification",
    "Amazon verify identity",
    "eBay verify identity",
    "Apple ID verification",
    "Reddit verify identity",
];

const TIER8_FINTECH_GIG: &[&str] = &[
    "PayPal identity verification",
    "Venmo identity verification",
    "Chime verify identity",
    "Zelle verify identity",
    "Binance KYC failed",
    "Coinbase identity verification failed",
    "Uber driver ID verification",
    "Lyft driver ID verification",
    "Instacart ID verification failed",
    "Amazon Flex verify identity",
    "Grubhub verify identity",
    "Shipt verify identity",
    "Spark driver verify identity",
];

const TIER9_SUBREDDITS: &[(&str, &[&str])] = &[
    ("IRS", &["verify identity", "ID.me", "Login.gov", "identity pin", "5071C"]),
    ("SocialSecurity", &["verify identity", "Login.gov", "ID.me"]),
    ("VeteransBenefits", &["verify identity", "ID.me"]),
    ("Unemployment", &["identity verification", "ID.me", "identity fraud"]),
    ("legaladvice", &["identity theft", "someone opened account in my name"]),
];

const TIER9_GLOBAL: &[&str] = &[
    "Login.gov identity verification failed",
    "EDD identity verification",
    "SSA verify identity",
    "in person verify identity post office",
    "identity verification letter",
    "unemployment identity fraud",
];

const TIER10_SUBREDDITS: &[(&str, &[&str])] = &[(
    "privacy",
    &[
        "KYC",
        "biometric",
        "facial recognition",
        "selfie verification",
        "face scan",
        "upload ID",
    ],
)];

const TIER10_GLOBAL: &[&str] = &[
    "biometric KYC privacy",
    "facial recognition bias",
    "identity verification no ID",
    "accessibility KYC",
    "biometric data breach",
    "identity verification dark skin failed",
    "elderly identity verification",
    "data retention selfie ID scan",
];

const TIER11_SUBREDDITS: &[(&str, &[&str])] = &[
    ("Tinder", &["verification", "ID verification"]),
    ("Bumble", &["photo verification"]),
    ("OnlineDating", &["verification", "catfish"]),
    ("DraftKings", &["verify identity", "KYC"]),
    ("sportsbook", &["KYC", "identity verification"]),
];

const TIER11_GLOBAL: &[&str] = &[
    "dating app verification",
    "verified badge scam",
    "online casino KYC",
    "gambling KYC failed",
    "telehealth identity verification",
    "tenant screening fraud",
    "proctoring identity check",
];

const TIER12_SUBREDDITS: &[(&str, &[&str])] = &[
    ("doordash_drivers", &["verification", "deactivated", "Checkr"]),
    ("uberdrivers", &["verification", "deactivated", "background check"]),
    ("SocialEngineering", &["verification bypass", "impersonation", "vishing"]),
    ("Coinbase", &["verify identity", "KYC"]),
    ("netsec", &["liveness detection", "biometric bypass", "deepfake"]),
];

const TIER12_GLOBAL: &[&str] = &[
    "synthetic identity",
    "money mule",
    "account takeover identity",
    "camera injection attack biometric",
    "manual review verification stuck",
    "verification loop stuck",
    "name mismatch verification",
    "verification pending weeks",
    "recovery denied identity",
    "port out scam",
    "identity fraud as a service",
];

fn globals(queries: &[&str], tag: &str) -> Vec<QuerySource> {
    queries.iter().map(|q| QuerySource::global(q, tag)).collect()
}

/// In-subreddit searches tagged `{tag}_sub`, then global queries tagged
/// `{tag}_global`.
fn mixed(searches: &[(&str, &[&str])], queries: &[&str], tag: &str) -> Vec<QuerySource> {
    let sub_tag = format!("{tag}_sub");
    let sub_tag = sub_tag.as_str();
    let mut sources: Vec<QuerySource> = searches
        .iter()
        .flat_map(|(sub, terms)| {
            terms
                .iter()
                .map(move |q| QuerySource::subreddit_search(sub, q, "relevance").tagged(sub_tag))
        })
        .collect();
    sources.extend(globals(queries, &format!("{tag}_global")));
    sources
}

/// The full built-in catalog, tiers in collection order.
pub fn catalog() -> Vec<Tier> {
    let tier1 = TIER1_LISTINGS
        .iter()
        .flat_map(|(sub, specs)| specs.iter().map(|spec| QuerySource::listing(sub, spec)))
        .collect();

    let tier2 = TIER2_SEARCHES
        .iter()
        .flat_map(|(sub, queries)| {
            queries.iter().flat_map(move |q| {
                TIER2_SORTS
                    .iter()
                    .map(move |sort| QuerySource::subreddit_search(sub, q, sort))
            })
        })
        .collect();

    vec![
        Tier {
            number: 1,
            name: "tier1_listings",
            sources: tier1,
        },
        Tier {
            number: 2,
            name: "tier2_search",
            sources: tier2,
        },
        Tier {
            number: 3,
            name: "tier3_global",
            sources: globals(TIER3_GLOBAL, "search_global"),
        },
        Tier {
            number: 4,
            name: "tier4_vendors",
            sources: globals(TIER4_VENDORS, "search_vendors"),
        },
        Tier {
            number: 5,
            name: "tier5_kyc_deep",
            sources: globals(TIER5_KYC, "search_kyc_deep"),
        },
        Tier {
            number: 6,
            name: "tier6_persona_clients",
            sources: globals(TIER6_CLIENTS, "search_persona_clients"),
        },
        Tier {
            number: 7,
            name: "tier7_social_platforms",
            sources: globals(TIER7_SOCIAL, "search_social_platforms"),
        },
        Tier {
            number: 8,
            name: "tier8_fintech_gig",
            sources: globals(TIER8_FINTECH_GIG, "search_fintech_gig"),
        },
        Tier {
            number: 9,
            name: "tier9_government",
            sources: mixed(TIER9_SUBREDDITS, TIER9_GLOBAL, "search_government"),
        },
        Tier {
            number: 10,
            name: "tier10_privacy",
            sources: mixed(TIER10_SUBREDDITS, TIER10_GLOBAL, "search_privacy"),
        },
        Tier {
            number: 11,
            name: "tier11_verticals",
            sources: mixed(TIER11_SUBREDDITS, TIER11_GLOBAL, "search_verticals"),
        },
        Tier {
            number: 12,
            name: "tier12_techniques",
            sources: mixed(TIER12_SUBREDDITS, TIER12_GLOBAL, "search_techniques"),
        },
    ]
}

/// Look up one tier by number.
pub fn tier(number: u8) -> Option<Tier> {
    catalog().into_iter().find(|t| t.number == number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_numbers_are_unique_and_ordered() {
        let numbers: Vec<u8> = catalog().iter().map(|t| t.number).collect();
        assert_eq!(numbers, (1..=12).collect::<Vec<u8>>());
        assert!(tier(13).is_none());
    }

    #[test]
    fn test_tier1_listing_request() {
        let source = QuerySource::listing("Scams", "top/year");
        let request = source.first_page(100);

        assert_eq!(request.path, "/r/Scams/top.json");
        assert_eq!(request.collection_source, "listing_top_year");
        assert!(request.params.contains(&("t".into(), "year".into())));
        assert!(request.params.contains(&("limit".into(), "100".into())));
        assert_eq!(request.search_query, None);
    }

    #[test]
    fn test_listing_without_time_filter() {
        let request = QuerySource::listing("fraud", "new").first_page(100);
        assert_eq!(request.path, "/r/fraud/new.json");
        assert!(!request.params.iter().any(|(k, _)| k == "t"));
    }

    #[test]
    fn test_subreddit_search_is_restricted() {
        let request = QuerySource::subreddit_search("banking", "fraud", "top").first_page(100);
        assert_eq!(request.path, "/r/banking/search.json");
        assert!(request.params.contains(&("restrict_sr".into(), "on".into())));
        assert_eq!(request.collection_source, "search_subreddit_top");
        assert_eq!(request.search_query.as_deref(), Some("fraud"));
    }

    #[test]
    fn test_tier2_runs_each_query_with_both_sorts() {
        let tier2 = tier(2).unwrap();
        let expected: usize = TIER2_SEARCHES.iter().map(|(_, q)| q.len() * 2).sum();
        assert_eq!(tier2.sources.len(), expected);
    }

    #[test]
    fn test_global_search_request() {
        let request = QuerySource::global("KYC nightmare", "search_global").first_page(100);
        assert_eq!(request.path, "/search.json");
        assert_eq!(request.collection_source, "search_global");
        assert!(request.params.contains(&("sort".into(), "relevance".into())));
    }

    #[test]
    fn test_mixed_tier_searches_subreddits_before_global() {
        let tier9 = tier(9).unwrap();
        let sub_count: usize = TIER9_SUBREDDITS.iter().map(|(_, q)| q.len()).sum();
        assert_eq!(tier9.sources.len(), sub_count + TIER9_GLOBAL.len());

        let first = tier9.sources[0].first_page(100);
        assert_eq!(first.path, "/r/IRS/search.json");
        assert_eq!(first.collection_source, "search_government_sub");
        assert!(first.params.contains(&("sort".into(), "relevance".into())));

        let last = tier9.sources.last().unwrap().first_page(100);
        assert_eq!(last.path, "/search.json");
        assert_eq!(last.collection_source, "search_government_global");
    }
}
