use std::collections::HashMap;

/// A common substring: `a[a..a + size] == b[b..b + size]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block {
    pub a: usize,
    pub b: usize,
    pub size: usize,
}

/// Character positions of one side of a comparison, built once and reused for every query
/// matched against it.
pub struct CharIndex {
    chars: Vec<char>,
    positions: HashMap<char, Vec<usize>>,
}

impl CharIndex {
    pub fn new(text: &str) -> Self {
        Self::from_chars(text.chars().collect())
    }

    pub fn from_chars(chars: Vec<char>) -> Self {
        let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, ch) in chars.iter().enumerate() {
            positions.entry(*ch).or_default().push(j);
        }
        Self { chars, positions }
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Longest block of `a[alo..ahi]` that also occurs in `self[blo..bhi]`. Ties go to the
    /// block that starts earliest in `a`, then earliest in `b`.
    pub fn longest_match(&self, a: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let mut best = Block {
            a: alo,
            b: blo,
            size: 0,
        };
        // Run lengths ending at (i - 1, j), sorted by j.
        let mut prev: Vec<(usize, usize)> = Vec::new();
        let mut cur: Vec<(usize, usize)> = Vec::new();
        for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
            cur.clear();
            if let Some(js) = self.positions.get(ch) {
                let from = js.partition_point(|&j| j < blo);
                let mut p = 0usize;
                for &j in &js[from..] {
                    if j >= bhi {
                        break;
                    }
                    let mut k = 1;
                    if j > 0 {
                        while p < prev.len() && prev[p].0 < j - 1 {
                            p += 1;
                        }
                        if p < prev.len() && prev[p].0 == j - 1 {
                            k = prev[p].1 + 1;
                        }
                    }
                    cur.push((j, k));
                    if k > best.size {
                        best = Block {
                            a: i + 1 - k,
                            b: j + 1 - k,
                            size: k,
                        };
                    }
                }
            }
            std::mem::swap(&mut prev, &mut cur);
        }
        best
    }

    /// Ratcliff/Obershelp matching blocks of `a` against this index, merged where adjacent and
    /// terminated by the zero-size sentinel `(a.len(), self.len(), 0)`.
    pub fn matching_blocks(&self, a: &[char]) -> Vec<Block> {
        let (la, lb) = (a.len(), self.len());
        let mut found = Vec::new();
        let mut queue = vec![(0, la, 0, lb)];
        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.longest_match(a, alo, ahi, blo, bhi);
            if m.size == 0 {
                continue;
            }
            found.push(m);
            if alo < m.a && blo < m.b {
                queue.push((alo, m.a, blo, m.b));
            }
            if m.a + m.size < ahi && m.b + m.size < bhi {
                queue.push((m.a + m.size, ahi, m.b + m.size, bhi));
            }
        }
        found.sort();

        let mut merged: Vec<Block> = Vec::with_capacity(found.len() + 1);
        for blk in found {
            match merged.last_mut() {
                Some(last) if last.a + last.size == blk.a && last.b + last.size == blk.b => {
                    last.size += blk.size;
                }
                _ => merged.push(blk),
            }
        }
        merged.push(Block {
            a: la,
            b: lb,
            size: 0,
        });
        merged
    }
}

/// `2 * M / T`, where `M` is the number of matched characters and `T` the combined length.
pub fn similarity_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let index = CharIndex::from_chars(b.to_vec());
    let matched: usize = index.matching_blocks(a).iter().map(|blk| blk.size).sum();
    2.0 * matched as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::{similarity_ratio, Block, CharIndex};

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn longest_match_prefers_earliest_block() {
        let index = CharIndex::new("xabcyabc");
        let a = chars("abc");
        let m = index.longest_match(&a, 0, a.len(), 0, index.len());

        assert_eq!(m, Block { a: 0, b: 1, size: 3 });
    }

    #[test]
    fn longest_match_respects_b_range() {
        let index = CharIndex::new("xabcyabc");
        let a = chars("abc");
        let m = index.longest_match(&a, 0, a.len(), 4, index.len());

        assert_eq!(m, Block { a: 0, b: 5, size: 3 });
    }

    #[test]
    fn matching_blocks_end_with_sentinel() {
        let index = CharIndex::new("abxcd");
        let blocks = index.matching_blocks(&chars("abcd"));

        assert_eq!(
            blocks,
            vec![
                Block { a: 0, b: 0, size: 2 },
                Block { a: 2, b: 3, size: 2 },
                Block { a: 4, b: 5, size: 0 },
            ]
        );
    }

    #[test]
    fn ratio_bounds() {
        assert_eq!(similarity_ratio(&chars("abc"), &chars("abc")), 1.0);
        assert_eq!(similarity_ratio(&chars("abc"), &chars("xyz")), 0.0);
        assert_eq!(similarity_ratio(&[], &[]), 1.0);
        let r = similarity_ratio(&chars("abcd"), &chars("abxcd"));
        assert!((r - 8.0 / 9.0).abs() < 1e-12);
    }
}
