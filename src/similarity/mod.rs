pub mod matcher;

use anyhow::anyhow;
use serde::Serialize;

use self::matcher::{similarity_ratio, CharIndex};

pub const DEFAULT_THRESHOLD: u8 = 70;
pub const MIN_THRESHOLD: u8 = 50;
pub const MAX_THRESHOLD: u8 = 100;
pub const DEFAULT_MIN_LENGTH: usize = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectionParams {
    /// A paragraph is flagged when its score is strictly above this value.
    pub threshold: u8,
    /// ...and its trimmed length in characters is strictly above this one.
    pub min_length: usize,
}

impl DetectionParams {
    pub fn new(threshold: u8, min_length: usize) -> anyhow::Result<Self> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold) {
            return Err(anyhow!(
                "threshold must be within {MIN_THRESHOLD}..={MAX_THRESHOLD}, got {threshold}"
            ));
        }
        Ok(Self {
            threshold,
            min_length,
        })
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlaggedParagraph {
    pub index: usize,
    pub text: String,
    pub score: u8,
}

/// Comparison text indexed once so every paragraph of a document can be scored against it.
pub struct PartialMatcher {
    text: String,
    index: CharIndex,
}

impl PartialMatcher {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            index: CharIndex::new(text),
        }
    }

    /// Fuzzy partial-match ratio in `0..=100` between `query` and the indexed text: the best
    /// similarity of the shorter string against any equally long window of the longer one,
    /// where windows are anchored on the Ratcliff/Obershelp matching blocks.
    pub fn score(&self, query: &str) -> u8 {
        if query == self.text {
            return 100;
        }
        if query.is_empty() || self.text.is_empty() {
            return 0;
        }
        let q: Vec<char> = query.chars().collect();
        if q.len() <= self.index.len() {
            best_window_score(&q, &self.index)
        } else {
            best_window_score(self.index.chars(), &CharIndex::from_chars(q))
        }
    }
}

fn best_window_score(shorter: &[char], longer: &CharIndex) -> u8 {
    let long = longer.chars();
    let mut best = 0.0f64;
    for blk in longer.matching_blocks(shorter) {
        let start = blk.b.saturating_sub(blk.a);
        let end = (start + shorter.len()).min(long.len());
        let r = similarity_ratio(shorter, &long[start..end]);
        if r > 0.995 {
            return 100;
        }
        best = best.max(r);
    }
    (100.0 * best).round_ties_even() as u8
}

pub fn partial_ratio(a: &str, b: &str) -> u8 {
    if a.chars().count() <= b.chars().count() {
        PartialMatcher::new(b).score(a)
    } else {
        PartialMatcher::new(a).score(b)
    }
}

/// Score every paragraph against `report_text` and return the flagged ones in document order.
pub fn detect_similar_paragraphs(
    paragraphs: &[String],
    report_text: &str,
    params: &DetectionParams,
) -> Vec<FlaggedParagraph> {
    let matcher = PartialMatcher::new(report_text);
    detect_with(&matcher, paragraphs, params, |_, _| {})
}

/// Same as [`detect_similar_paragraphs`], reporting each scanned paragraph to `on_scanned`.
pub fn detect_with(
    matcher: &PartialMatcher,
    paragraphs: &[String],
    params: &DetectionParams,
    mut on_scanned: impl FnMut(usize, usize),
) -> Vec<FlaggedParagraph> {
    let mut flagged = Vec::new();
    for (index, para) in paragraphs.iter().enumerate() {
        on_scanned(index + 1, paragraphs.len());
        // Length first: it is cheap and both conditions must hold.
        if para.trim().chars().count() <= params.min_length {
            continue;
        }
        let score = matcher.score(para);
        if score > params.threshold {
            flagged.push(FlaggedParagraph {
                index,
                text: para.clone(),
                score,
            });
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::{detect_similar_paragraphs, partial_ratio, DetectionParams, PartialMatcher};

    const FOX: &str = "The quick brown fox jumps over the lazy dog and continues running.";

    fn paras(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_ratio_reference_values() {
        assert_eq!(partial_ratio("YANKEES", "NEW YORK YANKEES"), 100);
        assert_eq!(partial_ratio("NEW YORK METS", "NEW YORK YANKEES"), 69);
        assert_eq!(partial_ratio("this is a test", "this is a test!"), 100);
        assert_eq!(partial_ratio("fuzzy wuzzy was a bear", "wuzzy fuzzy was a bear"), 91);
        assert_eq!(partial_ratio("abc", "xyz"), 0);
    }

    #[test]
    fn partial_ratio_edge_cases() {
        assert_eq!(partial_ratio("", ""), 100);
        assert_eq!(partial_ratio("", "abc"), 0);
        assert_eq!(partial_ratio("abc", ""), 0);
        assert_eq!(partial_ratio("same", "same"), 100);
    }

    #[test]
    fn score_is_symmetric_in_argument_length() {
        let matcher = PartialMatcher::new("YANKEES");
        assert_eq!(matcher.score("NEW YORK YANKEES"), 100);
    }

    #[test]
    fn exact_sentence_in_report_scores_100() {
        let report = format!("Turnitin originality report\nSources: 12%\n{FOX}\nEnd of report");
        let flagged = detect_similar_paragraphs(&paras(&[FOX]), &report, &DetectionParams::default());

        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].index, 0);
        assert_eq!(flagged[0].score, 100);
        assert_eq!(flagged[0].text, FOX);
    }

    #[test]
    fn short_paragraphs_are_never_flagged() {
        let report = "Bab 1 Pendahuluan. A short line. Bab 2 Tinjauan Pustaka.";
        let params = DetectionParams::new(50, 30).expect("params");
        let flagged = detect_similar_paragraphs(
            &paras(&["Bab 1 Pendahuluan", "   A short line.   ", "", "   "]),
            report,
            &params,
        );

        assert!(flagged.is_empty());
    }

    #[test]
    fn length_guard_counts_characters_not_bytes() {
        // 30 characters but more than 30 bytes.
        let para = "éééééééééééééééééééééééééééééé";
        assert_eq!(para.chars().count(), 30);
        let flagged = detect_similar_paragraphs(&paras(&[para]), para, &DetectionParams::default());

        assert!(flagged.is_empty());
    }

    #[test]
    fn flagged_set_shrinks_as_threshold_rises() {
        let report = format!(
            "{FOX} Penelitian ini menggunakan metode kualitatif dengan pendekatan studi kasus."
        );
        let doc = paras(&[
            FOX,
            "Penelitian ini memakai metode kuantitatif dengan pendekatan survei daring.",
            "Hasil uji statistik menunjukkan nilai signifikansi kurang dari lima persen.",
            "Penelitian ini menggunakan metode kualitatif dengan pendekatan studi kasus.",
        ]);

        let mut previous: Option<Vec<usize>> = None;
        for t in (50..=100).step_by(5) {
            let params = DetectionParams::new(t, 30).expect("params");
            let current: Vec<usize> = detect_similar_paragraphs(&doc, &report, &params)
                .into_iter()
                .map(|f| f.index)
                .collect();
            if let Some(prev) = previous.as_ref() {
                assert!(current.iter().all(|i| prev.contains(i)), "t={t}");
            }
            previous = Some(current);
        }
    }

    #[test]
    fn threshold_100_flags_nothing() {
        let params = DetectionParams::new(100, 30).expect("params");
        let flagged = detect_similar_paragraphs(&paras(&[FOX]), FOX, &params);

        assert!(flagged.is_empty());
    }

    #[test]
    fn threshold_outside_range_is_rejected() {
        assert!(DetectionParams::new(49, 30).is_err());
        assert!(DetectionParams::new(101, 30).is_err());
        assert!(DetectionParams::new(50, 30).is_ok());
    }

    #[test]
    fn preserves_document_order() {
        let report = format!("{FOX} Sebuah paragraf lain yang juga disalin dari sumber lain.");
        let doc = paras(&[
            "Sebuah paragraf lain yang juga disalin dari sumber lain.",
            "Teks orisinal yang ditulis sendiri oleh mahasiswa tanpa sumber.",
            FOX,
        ]);
        let flagged = detect_similar_paragraphs(&doc, &report, &DetectionParams::default());
        let indices: Vec<usize> = flagged.iter().map(|f| f.index).collect();

        assert_eq!(indices.first(), Some(&0));
        assert_eq!(indices.last(), Some(&2));
    }
}
