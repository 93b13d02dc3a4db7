//! The `data-parsoid` round-trip blob.
//!
//! Every element of an annotated document may carry a JSON object describing
//! where it came from in the page source and which syntax produced it. The
//! blob is versioned: a blob which cannot be read, or which was written by a
//! newer version, is replaced by an empty default so processing can continue
//! without round-trip information for that element.

use crate::{tokens::Stx, wikitext::Span};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The current version of the blob format.
pub(crate) const VERSION: u32 = 1;

/// The source range of a DOM node, along with the widths of its opening and
/// closing markup.
///
/// Any part may be unknown. Serialized as a four element array.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "Vec<Option<usize>>", into = "Vec<Option<usize>>")]
pub(crate) struct Dsr {
    /// The start of the node in the source.
    pub start: Option<usize>,
    /// The end of the node in the source.
    pub end: Option<usize>,
    /// The width of the opening markup.
    pub open_width: Option<usize>,
    /// The width of the closing markup.
    pub close_width: Option<usize>,
}

impl Dsr {
    /// Creates a range with known widths.
    pub fn new(start: usize, end: usize, open_width: usize, close_width: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            open_width: Some(open_width),
            close_width: Some(close_width),
        }
    }

    /// The source span, if both ends are known.
    pub fn span(&self) -> Option<Span> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => Some(Span::new(start, end)),
            _ => None,
        }
    }

    /// Returns true if both markup widths are known and fit in the range.
    pub fn has_valid_widths(&self) -> bool {
        match (self.span(), self.open_width, self.close_width) {
            (Some(span), Some(open), Some(close)) => open + close <= span.len(),
            _ => false,
        }
    }
}

impl From<Vec<Option<usize>>> for Dsr {
    fn from(value: Vec<Option<usize>>) -> Self {
        let get = |i: usize| value.get(i).copied().flatten();
        Self {
            start: get(0),
            end: get(1),
            open_width: get(2),
            close_width: get(3),
        }
    }
}

impl From<Dsr> for Vec<Option<usize>> {
    fn from(value: Dsr) -> Self {
        vec![value.start, value.end, value.open_width, value.close_width]
    }
}

/// Information used only while building a document. Never serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Scratch {
    /// The identifier of an HTML fragment waiting to be unpacked.
    pub html: Option<String>,
    /// The source range of the end tag.
    pub end_tsr: Option<Span>,
}

/// The round-trip information of an element.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct DataParsoid {
    /// The format version.
    pub v: u32,
    /// The source range of the element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsr: Option<Dsr>,
    /// The source range of the start tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsr: Option<Span>,
    /// The position of the start tag in the token stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<usize>,
    /// The syntax which produced the element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stx: Option<Stx>,
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub auto_inserted_start: bool,
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub auto_inserted_end: bool,
    /// The element was moved out of a table by the tree builder.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub fostered: bool,
    /// The element was written as `<tag/>`.
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub self_close: bool,
    /// The original source of the element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Source forms of attributes whose HTML value was normalised.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sa: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_list: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_names: Option<serde_json::Value>,
    #[serde(skip)]
    pub tmp: Scratch,
}

impl Default for DataParsoid {
    fn default() -> Self {
        Self {
            v: VERSION,
            dsr: None,
            tsr: None,
            tag_id: None,
            stx: None,
            auto_inserted_start: false,
            auto_inserted_end: false,
            fostered: false,
            self_close: false,
            src: None,
            sa: BTreeMap::new(),
            opt_list: None,
            opt_names: None,
            tmp: Scratch::default(),
        }
    }
}

impl DataParsoid {
    /// Reads a blob from an attribute value.
    ///
    /// Unreadable blobs and blobs from newer versions are replaced by the
    /// default. A backwards source range is dropped.
    pub fn parse(text: &str) -> Self {
        let mut dp = match serde_json::from_str::<Self>(text) {
            Ok(dp) => dp,
            Err(err) => {
                log::warn!("invalid data-parsoid ({err}); using defaults");
                return Self::default();
            }
        };

        if dp.v > VERSION {
            log::warn!("unsupported data-parsoid version {}; using defaults", dp.v);
            return Self::default();
        }

        if let Some(Dsr {
            start: Some(start),
            end: Some(end),
            ..
        }) = dp.dsr
            && start > end
        {
            log::warn!(target: "wiki_roundtrip::dsr", "dropping backwards dsr [{start}, {end}]");
            dp.dsr = None;
        }

        dp
    }

    /// Returns true if the blob carries nothing worth writing out.
    pub fn is_empty(&self) -> bool {
        let mut bare = Self {
            tmp: self.tmp.clone(),
            ..Self::default()
        };
        bare.v = self.v;
        *self == bare
    }

    /// The blob as an attribute value.
    pub fn to_json(&self) -> String {
        // A struct of plain data always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Reads a `data-mw` attribute value, which is free-form JSON.
pub(crate) fn parse_data_mw(text: &str) -> Option<serde_json::Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("invalid data-mw ({err}); ignoring it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsr_is_an_array() {
        let dp = DataParsoid {
            dsr: Some(Dsr::new(0, 5, 2, 2)),
            stx: Some(Stx::Html),
            ..<_>::default()
        };
        assert_eq!(dp.to_json(), r#"{"v":1,"dsr":[0,5,2,2],"stx":"html"}"#);

        let dp = DataParsoid::parse(r#"{"v":1,"dsr":[3,null,1]}"#);
        assert_eq!(
            dp.dsr,
            Some(Dsr {
                start: Some(3),
                end: None,
                open_width: Some(1),
                close_width: None
            })
        );
    }

    #[test]
    fn corrupt_blob_defaults() {
        let _ = env_logger::try_init();
        assert_eq!(DataParsoid::parse("{not json"), DataParsoid::default());
        assert_eq!(
            DataParsoid::parse(r#"{"v":7,"src":"x"}"#),
            DataParsoid::default()
        );
        let dp = DataParsoid::parse(r#"{"v":1,"dsr":[9,2,0,0],"src":"x"}"#);
        assert_eq!(dp.dsr, None);
        assert_eq!(dp.src.as_deref(), Some("x"));
    }

    #[test]
    fn widths() {
        let dsr = Dsr::new(4, 10, 2, 3);
        assert!(dsr.has_valid_widths());
        assert_eq!(dsr.span(), Some(Span::new(4, 10)));
        assert!(Dsr::new(4, 4, 0, 0).has_valid_widths());
        assert!(!Dsr::new(4, 5, 1, 1).has_valid_widths());
    }

    #[test]
    fn empty() {
        assert!(DataParsoid::default().is_empty());
        let dp = DataParsoid {
            fostered: true,
            ..<_>::default()
        };
        assert!(!dp.is_empty());
        assert!(parse_data_mw("[").is_none());
    }
}
