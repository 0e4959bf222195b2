//! Document ID - 型付き ID と正規 url
//!
//! # 構成
//! - `Id<T>`: ULID を phantom マーカー付きで包む。種類の違う ID はコンパイル時に混ざらない
//! - `AnyDocumentId`: 呼び出し側が渡してよい表現のすべて
//! - `ResourceUrl`: 唯一の正規形。解決キャッシュのキーであり、selection engine が報告する形
//!
//! 正規化（`to_canonical`）は純粋で単射です。同じ ULID を指す入力だけが
//! 同じ `ResourceUrl` になります。

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use super::errors::IdError;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` (e.g. `"spindle:"`).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// `T` is a zero-sized marker; `Id<T>` has the same size as `Ulid`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse either the prefixed form (`spindle:01H...`) or a bare ULID.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        let bare = trimmed.strip_prefix(T::prefix()).unwrap_or(trimmed);
        Ulid::from_string(bare)
            .map(Self::from_ulid)
            .map_err(|e| IdError::Invalid {
                input: input.to_string(),
                reason: e.to_string(),
            })
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for documents held by a resource store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Document {}

impl IdMarker for Document {
    fn prefix() -> &'static str {
        "spindle:"
    }
}

/// Identifier of a document, as issued by a resource store.
pub type DocumentId = Id<Document>;

/// Canonical, stable name of a document. Used as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUrl(DocumentId);

impl ResourceUrl {
    pub fn document_id(&self) -> DocumentId {
        self.0
    }
}

impl From<DocumentId> for ResourceUrl {
    fn from(id: DocumentId) -> Self {
        Self(id)
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ResourceUrl {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentId::parse(s).map(Self)
    }
}

impl Serialize for ResourceUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Every identifier representation accepted at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyDocumentId {
    Url(ResourceUrl),
    Id(DocumentId),
    /// Prefixed or bare ULID text, not yet validated.
    Text(String),
}

impl From<ResourceUrl> for AnyDocumentId {
    fn from(url: ResourceUrl) -> Self {
        AnyDocumentId::Url(url)
    }
}

impl From<DocumentId> for AnyDocumentId {
    fn from(id: DocumentId) -> Self {
        AnyDocumentId::Id(id)
    }
}

impl From<&str> for AnyDocumentId {
    fn from(text: &str) -> Self {
        AnyDocumentId::Text(text.to_string())
    }
}

impl From<String> for AnyDocumentId {
    fn from(text: String) -> Self {
        AnyDocumentId::Text(text)
    }
}

impl From<&ResourceUrl> for AnyDocumentId {
    fn from(url: &ResourceUrl) -> Self {
        AnyDocumentId::Url(*url)
    }
}

/// Normalize any accepted identifier into its canonical form.
pub fn to_canonical(id: &AnyDocumentId) -> Result<ResourceUrl, IdError> {
    match id {
        AnyDocumentId::Url(url) => Ok(*url),
        AnyDocumentId::Id(id) => Ok(ResourceUrl(*id)),
        AnyDocumentId::Text(text) => text.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<DocumentId>(), size_of::<Ulid>());
        assert_eq!(size_of::<ResourceUrl>(), 16);
    }

    #[test]
    fn display_uses_prefix() {
        let id = DocumentId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("spindle:"));
        assert_eq!(ResourceUrl::from(id).to_string(), id.to_string());
    }

    #[test]
    fn every_representation_canonicalizes_to_the_same_url() {
        let ulid = Ulid::new();
        let id = DocumentId::from_ulid(ulid);
        let url = ResourceUrl::from(id);

        let forms = [
            AnyDocumentId::from(url),
            AnyDocumentId::from(id),
            AnyDocumentId::from(url.to_string()),
            AnyDocumentId::from(ulid.to_string()),
            AnyDocumentId::from(format!("  {}  ", url)),
        ];
        for form in &forms {
            assert_eq!(to_canonical(form).unwrap(), url, "form {:?}", form);
        }
    }

    #[test]
    fn distinct_ulids_stay_distinct() {
        let a = to_canonical(&AnyDocumentId::from(Ulid::new().to_string())).unwrap();
        let b = to_canonical(&AnyDocumentId::from(Ulid::new().to_string())).unwrap();
        assert_ne!(a, b);
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    fn empty_ids_are_rejected(#[case] input: &str) {
        let err = to_canonical(&AnyDocumentId::from(input)).unwrap_err();
        assert_eq!(err, IdError::Empty);
    }

    #[rstest]
    #[case::garbage("not-a-document")]
    #[case::wrong_prefix("automerge:01ARZ3NDEKTSV4RRFFQ69G5FAV")]
    #[case::too_short("spindle:01ARZ3")]
    fn malformed_ids_are_rejected(#[case] input: &str) {
        let err = to_canonical(&AnyDocumentId::from(input)).unwrap_err();
        assert!(matches!(err, IdError::Invalid { .. }), "{err:?}");
    }

    #[test]
    fn urls_serialize_as_strings() {
        let url = ResourceUrl::from(DocumentId::from_ulid(Ulid::new()));
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, format!("\"{}\"", url));
        let back: ResourceUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }
}
