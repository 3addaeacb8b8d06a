/// Hex-substring filter over advertisement manufacturer data.
///
/// The payload is hex-encoded (lowercase) and the filter matches if it occurs
/// anywhere in that string, across field boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementFilter {
    /// Stored lowercased
    needle: String,
}

impl AdvertisementFilter {
    pub fn new(filter: &str) -> Self {
        AdvertisementFilter {
            needle: filter.to_lowercase(),
        }
    }

    /// True for the empty filter, which accepts everything.
    pub fn accepts_all(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, payload: &[u8]) -> bool {
        if self.accepts_all() {
            return true;
        }
        hex::encode(payload).contains(&self.needle)
    }
}

/// One-shot form of [`AdvertisementFilter::matches`].
pub fn matches(payload: &[u8], filter: &str) -> bool {
    AdvertisementFilter::new(filter).matches(payload)
}
