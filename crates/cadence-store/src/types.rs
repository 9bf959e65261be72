//! Record types for the scheduling table.

use serde::{Deserialize, Serialize};

/// Column holding the ready-to-schedule flag.
pub const READY_COLUMN: &str = "Scheduled?";

/// Title used when a record has none.
pub const DEFAULT_TITLE: &str = "No title";

/// Category used when a record has none.
pub const DEFAULT_CATEGORY: &str = "test";

/// A row of the scheduling table, as last seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable row identifier.
    pub id: String,
    /// Column values.
    #[serde(default)]
    pub fields: RecordFields,
}

/// Column values of a scheduling row.
///
/// Every column is optional on the wire; missing values fall back to the
/// defaults the scheduler expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(rename = "Scheduled?", default)]
    pub ready: bool,
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "Account", default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountRef>,
    #[serde(rename = "Title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "Text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "Subreddit", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "Flair", default, skip_serializing_if = "Option::is_none")]
    pub flair: Option<String>,
    #[serde(rename = "CHAR", default, skip_serializing_if = "Option::is_none")]
    pub char_tag: Option<String>,
    #[serde(rename = "SNAP", default, skip_serializing_if = "Option::is_none")]
    pub snap_tag: Option<String>,
    #[serde(rename = "IMG or Video", default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaField>,
    /// Put the caption into the title instead of overlaying it on the media.
    #[serde(rename = "snap post title", default)]
    pub caption_in_title: bool,
}

/// Account column: either a plain name or a linked-record list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountRef {
    Name(String),
    Linked(Vec<String>),
}

impl AccountRef {
    /// The referenced account name, if any.
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            AccountRef::Name(name) => Some(name.as_str()),
            AccountRef::Linked(names) => names.first().map(String::as_str),
        };
        name.map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Media column: a bare URL or an attachment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaField {
    Url(String),
    Attachments(Vec<Attachment>),
}

/// An uploaded attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl MediaField {
    /// URL of the media to publish. Only the first attachment is used.
    pub fn url(&self) -> Option<&str> {
        let url = match self {
            MediaField::Url(url) => Some(url.as_str()),
            MediaField::Attachments(items) => items.first().map(|a| a.url.as_str()),
        };
        url.filter(|u| !u.trim().is_empty())
    }
}

/// What gets published for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    pub body: String,
    pub media_url: Option<String>,
    /// Target community/category the post goes to.
    pub category: String,
    pub flair: String,
    /// Caption built from the CHAR and SNAP columns.
    pub caption: String,
    pub caption_in_title: bool,
}

impl Record {
    /// Whether the row is flagged ready to schedule.
    pub fn is_ready(&self) -> bool {
        self.fields.ready
    }

    /// Name of the account this row publishes through.
    pub fn account_name(&self) -> Option<&str> {
        self.fields.account.as_ref().and_then(AccountRef::name)
    }

    /// Build the publishing payload with column defaults applied.
    pub fn payload(&self) -> Payload {
        let f = &self.fields;
        let char_tag = f.char_tag.as_deref().unwrap_or_default();
        let snap_tag = f.snap_tag.as_deref().unwrap_or_default();

        Payload {
            title: f
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: f.text.clone().unwrap_or_default(),
            media_url: f.media.as_ref().and_then(MediaField::url).map(str::to_string),
            category: f
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            flair: f.flair.clone().unwrap_or_default(),
            caption: format!("{}  {}", char_tag, snap_tag).trim().to_string(),
            caption_in_title: f.caption_in_title,
        }
    }
}

impl Payload {
    /// Whether the caption belongs in the title rather than on the media.
    ///
    /// Posts without media have nowhere else to carry it.
    pub fn caption_in_title(&self, has_media: bool) -> bool {
        self.caption_in_title || !has_media
    }

    /// Title as it should be submitted.
    pub fn submission_title(&self, has_media: bool) -> String {
        if self.caption_in_title(has_media) && !self.caption.is_empty() {
            format!("{} {}", self.title, self.caption).trim().to_string()
        } else {
            self.title.trim().to_string()
        }
    }

    /// Caption to overlay on the media, if it is not part of the title.
    pub fn media_overlay(&self, has_media: bool) -> Option<String> {
        if self.caption_in_title(has_media) || self.caption.is_empty() {
            None
        } else {
            Some(self.caption.clone())
        }
    }
}
