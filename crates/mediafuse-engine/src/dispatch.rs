//! Field-presence routing: which fusion strategy serves a request.

use mediafuse_core::error::{Error, Result};
use mediafuse_core::types::QuerySpec;

/// One strategy per combination of present modality fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// OCR full-text lookup only.
    OcrOnly,
    /// ASR full-text lookup only.
    AsrOnly,
    /// Vector lookup, single or multi-term per the merge mode.
    VisualOnly,
    /// Vector lookup restricted to OCR-matching ids.
    VisualOcr,
    /// Vector lookup restricted to ASR-matching ids.
    VisualAsr,
    /// Boolean AND of OCR and ASR ids, score fixed at 1.
    OcrAsr,
    /// Vector lookup (multi-term, averaged) restricted to OCR ∩ ASR.
    VisualOcrAsr,
}

/// Exhaustive over the presence table; zero modalities is rejected, not
/// silently empty.
pub fn select(spec: &QuerySpec) -> Result<Strategy> {
    match (spec.visual.is_some(), spec.ocr.is_some(), spec.asr.is_some()) {
        (false, true, false) => Ok(Strategy::OcrOnly),
        (true, false, false) => Ok(Strategy::VisualOnly),
        (false, false, true) => Ok(Strategy::AsrOnly),
        (true, true, false) => Ok(Strategy::VisualOcr),
        (true, false, true) => Ok(Strategy::VisualAsr),
        (false, true, true) => Ok(Strategy::OcrAsr),
        (true, true, true) => Ok(Strategy::VisualOcrAsr),
        (false, false, false) => Err(Error::InvalidQuery(
            "at least one of visual, ocr or asr must be set".into(),
        )),
    }
}
