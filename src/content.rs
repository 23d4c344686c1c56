//! Content event model.
//!
//! These types mirror the upstream producer's wire format field for field,
//! so messages decode unchanged. Events are created upstream, never mutated
//! here, and dropped once their offset commits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of realtime content event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Removed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Removed => "Removed",
        }
    }

    /// Case-insensitive parse, used when reading the accepted-kinds config.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(EventKind::Created),
            "updated" => Some(EventKind::Updated),
            "removed" => Some(EventKind::Removed),
            _ => None,
        }
    }
}

/// A realtime content event as carried in an envelope payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "ID")]
    pub id: i64,

    #[serde(rename = "NodeID")]
    pub node_id: i64,

    #[serde(rename = "Time", with = "wire_time", default = "wire_time::unset")]
    pub time: DateTime<Utc>,

    #[serde(rename = "Content")]
    pub content: Content,

    #[serde(rename = "Event")]
    pub kind: EventKind,
}

/// The transformable payload of an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "EventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(rename = "NodeID", default)]
    pub node_id: i64,

    #[serde(rename = "UserID", default)]
    pub user_id: i64,

    #[serde(rename = "VersionID", default)]
    pub version_id: i64,

    #[serde(rename = "Type", default)]
    pub content_type: String,

    #[serde(rename = "Published", default)]
    pub published: bool,

    #[serde(rename = "CreatedAt", with = "wire_time", default = "wire_time::unset")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "UpdatedAt", with = "wire_time", default = "wire_time::unset")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "Title", default)]
    pub title: String,

    #[serde(rename = "Body", default)]
    pub body: String,

    /// Byline; the upstream producer keys this field as `name`.
    #[serde(rename = "name", default)]
    pub author: String,

    #[serde(rename = "assets", default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,

    #[serde(rename = "PartnerURL", default)]
    pub partner_url: String,

    #[serde(rename = "TeaserText", default)]
    pub teaser_text: String,

    #[serde(rename = "Tags", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Category>,

    #[serde(rename = "Tickers", default, skip_serializing_if = "Vec::is_empty")]
    pub tickers: Vec<Category>,

    #[serde(rename = "Futures", default, skip_serializing_if = "Vec::is_empty")]
    pub futures: Vec<Category>,

    #[serde(rename = "Channels", default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Category>,

    #[serde(rename = "Quotes", default, skip_serializing_if = "HashMap::is_empty")]
    pub quotes: HashMap<String, Quote>,

    #[serde(rename = "IsBzPost", default)]
    pub is_post: bool,

    #[serde(rename = "IsBzProPost", default)]
    pub is_pro_post: bool,

    #[serde(rename = "DoNotDistribute", default)]
    pub do_not_distribute: bool,

    #[serde(rename = "Sentiment", default)]
    pub sentiment: i64,

    #[serde(rename = "Meta", default)]
    pub meta: Meta,
}

/// A taxonomy row attached to content: ticker, channel, future, or tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "tid", default)]
    pub id: i64,

    #[serde(rename = "vid", default)]
    pub vocab: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub primary: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub price: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub volume: i64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sectors: HashMap<String, i64>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A stock quote snapshotted at story time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Quote {
    pub price: String,
    pub volume: i64,
}

/// An asset (image, video) attached to content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "type", default)]
    pub asset_type: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub mime: String,

    #[serde(default)]
    pub primary: bool,

    #[serde(default)]
    pub copyright: String,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AssetAttributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetAttributes {
    #[serde(rename = "fid", default)]
    pub fid: String,

    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub filepath: String,

    #[serde(default)]
    pub filesize: i64,

    #[serde(rename = "image_attributes", default, skip_serializing_if = "Option::is_none")]
    pub image_attributes: Option<ImageAttributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageAttributes {
    #[serde(default)]
    pub resolution: Resolution,

    #[serde(rename = "alt_title", default)]
    pub alt_title: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub dpi: i64,
}

/// Content metadata: known sub-records plus a residual map.
///
/// Unknown keys land in `ext` on decode and are written back out on encode.
/// Domain invariant: `ext` never carries a key that collides with one of
/// the named sub-records; see [`Meta::residual_collision`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "SectorV2", default, skip_serializing_if = "Option::is_none")]
    pub sector_v2: Option<SectorMeta>,

    #[serde(rename = "Partner", default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<PartnerMeta>,

    #[serde(rename = "PartnerTaxonomy", default, skip_serializing_if = "Option::is_none")]
    pub partner_taxonomy: Option<PartnerTaxonomyMeta>,

    #[serde(rename = "SEC", default, skip_serializing_if = "Option::is_none")]
    pub sec: Option<SecMeta>,

    #[serde(flatten)]
    pub ext: Map<String, Value>,
}

const META_KEYS: [&str; 4] = ["SectorV2", "Partner", "PartnerTaxonomy", "SEC"];

impl Meta {
    /// Returns the first residual key that collides with a known sub-record
    /// name, if any. Such a map cannot serialize losslessly.
    pub fn residual_collision(&self) -> Option<&str> {
        self.ext
            .keys()
            .map(String::as_str)
            .find(|k| META_KEYS.contains(k))
    }
}

/// Sector classification metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorMeta {
    #[serde(rename = "SIC", default, skip_serializing_if = "Vec::is_empty")]
    pub sic: Vec<SicSector>,

    #[serde(rename = "NAICS", default, skip_serializing_if = "Vec::is_empty")]
    pub naics: Vec<NaicsSector>,

    #[serde(rename = "Morningstar", default, skip_serializing_if = "Vec::is_empty")]
    pub morningstar: Vec<MorningstarSector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SicSector {
    pub industry_code: i64,
    pub industry: String,
    pub industry_group: i64,
    pub major_group: i64,
    pub division: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NaicsSector {
    pub national_industry_code: i64,
    pub national_industry: String,
    pub industry_code: i64,
    pub industry: String,
    pub industry_group_code: i64,
    pub industry_group: String,
    pub sub_sector_code: i64,
    pub sub_sector: String,
    pub sector_code: i64,
    pub sector: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MorningstarSector {
    pub industry_code: i64,
    pub industry: String,
    pub industry_group_code: i64,
    pub industry_group: String,
    pub sector_code: i64,
    pub sector: String,
    pub super_sector_code: i64,
    pub super_sector: String,
}

/// Syndication partner metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartnerMeta {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "revision_id", default)]
    pub revision_id: String,

    #[serde(rename = "updated", with = "wire_time", default = "wire_time::unset")]
    pub updated: DateTime<Utc>,

    #[serde(rename = "published", with = "wire_time", default = "wire_time::unset")]
    pub published: DateTime<Utc>,

    #[serde(rename = "resource", default)]
    pub resource: String,

    #[serde(rename = "copyright", default)]
    pub copyright: String,

    #[serde(rename = "contact", default)]
    pub contact: String,

    #[serde(rename = "taxonomies", default, skip_serializing_if = "Vec::is_empty")]
    pub taxonomies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartnerTaxonomyMeta {
    #[serde(rename = "Taxonomies", default)]
    pub taxonomies: Vec<PartnerTaxonomy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartnerTaxonomy {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub cik: String,
    #[serde(default)]
    pub cusip: String,
    #[serde(default)]
    pub order: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecMeta {
    pub accession_number: String,
}

/// Timestamp codec matching the upstream wire format: RFC 3339 strings,
/// with `null` and `""` both decoding to the epoch sentinel, which encodes
/// back to `null`.
pub mod wire_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// The "no timestamp" sentinel.
    pub fn unset() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        if *t == unset() {
            ser.serialize_none()
        } else {
            ser.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw.as_deref() {
            None | Some("") => Ok(unset()),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "ID": 81,
        "NodeID": 13719500,
        "Time": "2019-07-12T15:04:05Z",
        "Event": "Created",
        "Content": {
            "NodeID": 13719500,
            "VersionID": 3,
            "Type": "story",
            "Published": true,
            "CreatedAt": "2019-07-12T15:00:00Z",
            "UpdatedAt": "2019-07-12T15:04:05Z",
            "Title": "Shares Move Higher",
            "Body": "<p>body</p>",
            "name": "Newsdesk",
            "PartnerURL": "",
            "TeaserText": "",
            "Tickers": [{"tid": 5, "vid": 2, "name": "F", "description": "", "primary": true}],
            "Channels": [{"tid": 57, "vid": 1, "name": "News", "description": ""}],
            "Quotes": {"F": {"Price": "10.12", "Volume": 100}},
            "IsBzPost": true,
            "IsBzProPost": false,
            "DoNotDistribute": false,
            "Sentiment": 0,
            "Meta": {}
        }
    }"#;

    #[test]
    fn test_event_decode() {
        let event: Event = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(event.id, 81);
        assert_eq!(event.node_id, 13_719_500);
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.content.content_type, "story");
        assert_eq!(event.content.author, "Newsdesk");
        assert!(event.content.is_post);
        assert!(event.content.tickers[0].primary);
        assert_eq!(event.content.quotes["F"].price, "10.12");
        assert_eq!(
            event.content.updated_at,
            Utc.with_ymd_and_hms(2019, 7, 12, 15, 4, 5).unwrap()
        );
    }

    #[test]
    fn test_author_encodes_as_name() {
        let content = Content {
            author: "Newsdesk".to_string(),
            ..Content::default()
        };
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["name"], "Newsdesk");
        assert!(value.get("Author").is_none());
    }

    #[test]
    fn test_wire_time_tolerates_null_and_empty() {
        let a: Content = serde_json::from_value(json!({"UpdatedAt": null})).unwrap();
        let b: Content = serde_json::from_value(json!({"UpdatedAt": ""})).unwrap();
        let c: Content = serde_json::from_value(json!({})).unwrap();

        assert_eq!(a.updated_at, wire_time::unset());
        assert_eq!(b.updated_at, wire_time::unset());
        assert_eq!(c.updated_at, wire_time::unset());
    }

    #[test]
    fn test_wire_time_unset_encodes_as_null() {
        let content = Content::default();
        let value = serde_json::to_value(&content).unwrap();
        assert!(value["UpdatedAt"].is_null());
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("created"), Some(EventKind::Created));
        assert_eq!(EventKind::parse("UPDATED"), Some(EventKind::Updated));
        assert_eq!(EventKind::parse("Removed"), Some(EventKind::Removed));
        assert_eq!(EventKind::parse("deleted"), None);
    }

    #[test]
    fn test_meta_residual_round_trip() {
        let input = json!({
            "Partner": {"ID": "p1", "revision_id": "r9"},
            "newsdesk_batch": {"id": 7},
            "flagged": true
        });

        let meta: Meta = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(meta.partner.as_ref().unwrap().id, "p1");
        assert_eq!(meta.ext["newsdesk_batch"]["id"], 7);
        assert_eq!(meta.ext["flagged"], true);
        // Known keys must not leak into the residual map.
        assert!(meta.residual_collision().is_none());

        let output = serde_json::to_value(&meta).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_meta_residual_collision_detected() {
        let mut meta = Meta::default();
        meta.ext.insert("SEC".to_string(), json!({"AccessionNumber": "x"}));
        assert_eq!(meta.residual_collision(), Some("SEC"));
    }
}
