//! Request parsing: raw field strings into a `QuerySpec`.

use crate::error::{Error, Result};
use crate::types::{MergeMode, QuerySpec, VisualQuery};

impl VisualQuery {
    /// Parse the raw visual-similarity field: `#`-delimited sub-terms
    /// with an optional trailing merge-mode tag. Empty segments are
    /// dropped. Returns `Ok(None)` when nothing usable remains.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let mut terms: Vec<String> = raw
            .split('#')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let merge_mode = terms.last().and_then(|t| MergeMode::from_tag(t));
        if merge_mode.is_some() {
            terms.pop();
        }

        if terms.is_empty() {
            if merge_mode.is_some() {
                return Err(Error::InvalidQuery(
                    "merge mode tag given without any visual sub-terms".into(),
                ));
            }
            return Ok(None);
        }
        Ok(Some(VisualQuery { terms, merge_mode }))
    }
}

impl QuerySpec {
    /// Build a spec from raw request fields. Blank fields count as
    /// absent; a request with no modality at all is rejected here rather
    /// than producing a silently empty result.
    pub fn from_fields(
        visual: Option<&str>,
        ocr: Option<&str>,
        asr: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Self> {
        let visual = match visual.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => VisualQuery::parse(raw)?,
            None => None,
        };
        let ocr = ocr
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let asr = asr
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let spec = QuerySpec {
            visual,
            ocr,
            asr,
            limit,
        };
        if !spec.has_any_modality() {
            return Err(Error::InvalidQuery(
                "at least one of visual, ocr or asr must be set".into(),
            ));
        }
        Ok(spec)
    }

    pub fn has_any_modality(&self) -> bool {
        self.visual.is_some() || self.ocr.is_some() || self.asr.is_some()
    }
}
