//! Per-stage extraction schemas
//!
//! Every stage has a built-in schema matching the source site's markup. A
//! `[extract.<stage>]` table in the configuration replaces it wholesale.

use crate::task::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body format of a stage's response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    #[default]
    Html,
    Json,
}

/// Describes what to pull out of one stage's response
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StageSchema {
    pub format: Format,

    /// JSON pointer to an HTML fragment inside a JSON body
    pub embedded_html: Option<String>,

    /// Rule yielding links to follow
    pub links: Option<String>,

    /// Rule yielding the "next page" link
    pub next: Option<String>,

    /// Scalar record fields: field name to rule, first match
    pub fields: BTreeMap<String, String>,

    /// List record fields: field name to rule, every match
    pub list_fields: BTreeMap<String, String>,

    /// Record fields read from a JSON body: field name to JSON pointer
    pub json_fields: BTreeMap<String, String>,

    /// Selector of repeated item elements (e.g. one review)
    pub items: Option<String>,

    /// Item fields: field name to rule relative to the item element
    pub item_fields: BTreeMap<String, String>,

    /// JSON pointer to an array of tag objects
    pub tags: Option<String>,

    pub tag_key: Option<String>,

    pub tag_count_key: Option<String>,

    /// Record fields that must be present and non-empty
    pub required: Vec<String>,
}

fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const RELATION_NEXT: &str = ".pages-num > a.page-next@href";

/// Built-in schema for a stage
pub fn default_schema(stage: Stage) -> StageSchema {
    match stage {
        Stage::CityIndex => StageSchema {
            links: Some("#classfy a@href".into()),
            ..Default::default()
        },
        Stage::RegionIndex => StageSchema {
            links: Some("#J_nt_items a@href".into()),
            ..Default::default()
        },
        Stage::Listing => StageSchema {
            links: Some("#shop-all-list .pic > a@href".into()),
            next: Some(".next@href".into()),
            ..Default::default()
        },
        Stage::Detail => StageSchema {
            fields: map(&[
                ("name", "#basic-info .shop-name|own-text"),
                ("address", "#basic-info .address .item"),
                ("average_price", "#basic-info .brief-info #avgPriceTitle|int"),
            ]),
            list_fields: map(&[("telephones", "#basic-info .tel .item")]),
            required: vec!["name".into()],
            ..Default::default()
        },
        Stage::SummaryApi => StageSchema {
            format: Format::Json,
            json_fields: map(&[("recommend_cuisines", "/dishTagStrList")]),
            tags: Some("/summarys".into()),
            tag_key: Some("summaryName".into()),
            tag_count_key: Some("summaryCount".into()),
            ..Default::default()
        },
        Stage::FeedbackPage => StageSchema {
            items: Some(".comment-list > ul > li".into()),
            item_fields: map(&[
                ("_id", "@data-id|int"),
                ("user_id", "div.pic > a@user-id|int"),
                ("date", "div.content > div.misc-info > span.time"),
                ("description", "div.content > div.comment-txt > div"),
            ]),
            next: Some(".Pages .NextPage@href".into()),
            ..Default::default()
        },
        Stage::TaggedFeedbackPage => StageSchema {
            format: Format::Json,
            embedded_html: Some("/msg".into()),
            items: Some("li.comment-item".into()),
            item_fields: map(&[
                ("_id", "@data-id|int"),
                ("user_id", "a.avatar@data-user-id|int"),
                ("date", ".time"),
                ("description", ".desc"),
                ("tag_sentence", ".desc span"),
            ]),
            ..Default::default()
        },
        Stage::Profile => StageSchema {
            fields: map(&[
                ("name", ".tit > .name"),
                ("gender", ".user-info > .user-groun > i@class"),
                ("address", ".user-info > .user-groun"),
                ("contribution", "#J_col_exp|int"),
            ]),
            required: vec!["name".into()],
            ..Default::default()
        },
        Stage::Followees | Stage::Followers => StageSchema {
            list_fields: map(&[("ids", ".fllow-list .pic-txt li div.tit a@user-id|int")]),
            next: Some(RELATION_NEXT.into()),
            ..Default::default()
        },
        Stage::Collections => StageSchema {
            list_fields: map(&[("ids", ".favor-list li div.tit a@href|last-segment|int")]),
            next: Some(RELATION_NEXT.into()),
            ..Default::default()
        },
    }
}
