/// Stage and crawl pass definitions
///
/// A stage names one state of a crawl pass's state machine and selects the
/// pipeline handler that interprets a fetched result.
use std::fmt;
use std::str::FromStr;

/// Priority tier for structurally broad stages (indexes, entry points)
pub const TIER_TOP: i32 = 100;

/// Priority tier for the first page of a paginated sequence
pub const TIER_HIGH: i32 = 75;

/// Priority tier for detail pages and early continuations
pub const TIER_MID: i32 = 50;

/// Priority tier for late, narrow sub-loops
pub const TIER_LOW: i32 = 25;

/// Priority tier for the deepest, narrowest work
pub const TIER_BASE: i32 = 0;

/// One of the independent crawl passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPass {
    /// City index → region index → listing → shop detail
    Discovery,

    /// Feedback summary → feedback pages → tagged feedback pages
    Feedback,

    /// Actor profile → relation sub-loops
    Actor,
}

impl CrawlPass {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Feedback => "feedback",
            Self::Actor => "actor",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "feedback" => Some(Self::Feedback),
            "actor" => Some(Self::Actor),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Discovery, Self::Feedback, Self::Actor]
    }

    /// The stages belonging to this pass, in state-machine order
    pub fn stages(&self) -> Vec<Stage> {
        Stage::all()
            .into_iter()
            .filter(|stage| stage.pass() == *self)
            .collect()
    }
}

impl fmt::Display for CrawlPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

impl FromStr for CrawlPass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.to_lowercase()).ok_or_else(|| {
            format!(
                "unknown crawl pass '{}', expected one of: discovery, feedback, actor",
                s
            )
        })
    }
}

/// A state in one of the crawl state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    // ===== Entity Discovery =====
    /// City landing page listing the regions/categories of a city
    CityIndex,

    /// Region page listing the listing pages of one region
    RegionIndex,

    /// Paginated shop listing
    Listing,

    /// Shop detail page (terminal: creates the shop record)
    Detail,

    // ===== Feedback Harvesting =====
    /// Feedback summary API (terminal: creates the feedback group)
    SummaryApi,

    /// Paginated list of all feedback for one shop
    FeedbackPage,

    /// Feedback filtered by one summary tag
    TaggedFeedbackPage,

    // ===== Actor Harvesting =====
    /// Actor profile page (terminal: creates the actor record)
    Profile,

    /// Paginated list of actors this actor follows
    Followees,

    /// Paginated list of actors following this actor
    Followers,

    /// Paginated list of shops this actor collected
    Collections,
}

impl Stage {
    /// The crawl pass this stage belongs to
    pub fn pass(&self) -> CrawlPass {
        match self {
            Self::CityIndex | Self::RegionIndex | Self::Listing | Self::Detail => {
                CrawlPass::Discovery
            }
            Self::SummaryApi | Self::FeedbackPage | Self::TaggedFeedbackPage => {
                CrawlPass::Feedback
            }
            Self::Profile | Self::Followees | Self::Followers | Self::Collections => {
                CrawlPass::Actor
            }
        }
    }

    /// Priority tier of the first task emitted for this stage
    ///
    /// Shallower, broader stages rank higher so the frontier approximates a
    /// breadth-first traversal.
    pub fn priority(&self) -> i32 {
        match self {
            Self::CityIndex | Self::RegionIndex => TIER_TOP,
            Self::Listing => TIER_HIGH,
            Self::Detail => TIER_MID,
            Self::SummaryApi => TIER_TOP,
            Self::FeedbackPage => TIER_HIGH,
            Self::TaggedFeedbackPage => TIER_BASE,
            Self::Profile => TIER_TOP,
            Self::Followees => TIER_HIGH,
            Self::Followers => TIER_MID,
            Self::Collections => TIER_LOW,
        }
    }

    /// Priority tier of a "next page" continuation of this stage
    ///
    /// Always the same tier or one tier below the first page.
    pub fn continuation_priority(&self) -> i32 {
        match self {
            Self::Listing => TIER_HIGH,
            Self::FeedbackPage => TIER_MID,
            Self::Followees => TIER_MID,
            Self::Followers => TIER_LOW,
            Self::Collections => TIER_BASE,
            other => other.priority(),
        }
    }

    /// Returns true if this stage self-loops on a "next page" affordance
    pub fn is_paginated(&self) -> bool {
        matches!(
            self,
            Self::Listing
                | Self::FeedbackPage
                | Self::Followees
                | Self::Followers
                | Self::Collections
        )
    }

    /// Returns true if this stage creates an entity record
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Detail | Self::SummaryApi | Self::Profile)
    }

    /// Returns true if this stage's endpoint answers with JSON
    pub fn expects_json(&self) -> bool {
        matches!(self, Self::SummaryApi | Self::TaggedFeedbackPage)
    }

    /// The accumulating actor field filled by a relation stage
    pub fn relation_field(&self) -> Option<&'static str> {
        match self {
            Self::Followees => Some("followees"),
            Self::Followers => Some("followers"),
            Self::Collections => Some("collections"),
            _ => None,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::CityIndex => "city_index",
            Self::RegionIndex => "region_index",
            Self::Listing => "listing",
            Self::Detail => "detail",
            Self::SummaryApi => "summary_api",
            Self::FeedbackPage => "feedback_page",
            Self::TaggedFeedbackPage => "tagged_feedback_page",
            Self::Profile => "profile",
            Self::Followees => "followees",
            Self::Followers => "followers",
            Self::Collections => "collections",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "city_index" => Some(Self::CityIndex),
            "region_index" => Some(Self::RegionIndex),
            "listing" => Some(Self::Listing),
            "detail" => Some(Self::Detail),
            "summary_api" => Some(Self::SummaryApi),
            "feedback_page" => Some(Self::FeedbackPage),
            "tagged_feedback_page" => Some(Self::TaggedFeedbackPage),
            "profile" => Some(Self::Profile),
            "followees" => Some(Self::Followees),
            "followers" => Some(Self::Followers),
            "collections" => Some(Self::Collections),
            _ => None,
        }
    }

    /// Returns all stages
    pub fn all() -> Vec<Self> {
        vec![
            Self::CityIndex,
            Self::RegionIndex,
            Self::Listing,
            Self::Detail,
            Self::SummaryApi,
            Self::FeedbackPage,
            Self::TaggedFeedbackPage,
            Self::Profile,
            Self::Followees,
            Self::Followers,
            Self::Collections,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
