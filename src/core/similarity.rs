//! Bounded edit distance and bigram cosine similarity over normalized text.

use std::collections::HashMap;

use smallvec::SmallVec;

/// Thresholds for the near-duplicate test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimilarityPolicy {
    pub max_dist: u32,
    /// Percentage; values above 100 never match
    pub max_cosine: u32,
}

impl SimilarityPolicy {
    /// Near-duplicate when either the edit distance or the cosine test
    /// passes
    pub fn is_near_duplicate(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        distance(a, b, self.max_dist) <= self.max_dist || cosine(a, b) >= self.max_cosine
    }
}

/// Unit-cost Levenshtein distance over chars, capped: any result above
/// `max` is reported as `max + 1`.
pub fn distance(a: &str, b: &str, max: u32) -> u32 {
    let cap = max.saturating_add(1);

    let a: SmallVec<[char; 32]> = a.chars().collect();
    let b: SmallVec<[char; 32]> = b.chars().collect();

    // Length difference is a lower bound
    if a.len().abs_diff(b.len()) > max as usize {
        return cap;
    }
    if a.is_empty() || b.is_empty() {
        return (a.len().max(b.len()) as u32).min(cap);
    }

    let mut prev: SmallVec<[u32; 32]> = (0..=b.len() as u32).collect();
    let mut curr: SmallVec<[u32; 32]> = SmallVec::from_elem(0, b.len() + 1);

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i as u32 + 1;
        let mut row_min = curr[0];

        for (j, &cb) in b.iter().enumerate() {
            let cost = u32::from(ca != cb);
            let v = (prev[j] + cost)
                .min(prev[j + 1] + 1)
                .min(curr[j] + 1);
            curr[j + 1] = v;
            row_min = row_min.min(v);
        }

        // Every later cell derives from this row
        if row_min > max {
            return cap;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()].min(cap)
}

/// Bigram frequency vector; strings shorter than two chars use their
/// single char as a unigram
fn gram_counts(s: &str) -> HashMap<(char, Option<char>), u32> {
    let chars: SmallVec<[char; 32]> = s.chars().collect();
    let mut counts = HashMap::with_capacity(chars.len());

    if chars.len() < 2 {
        if let Some(&c) = chars.first() {
            counts.insert((c, None), 1);
        }
        return counts;
    }

    for w in chars.windows(2) {
        *counts.entry((w[0], Some(w[1]))).or_insert(0) += 1;
    }
    counts
}

/// Cosine similarity of bigram frequency vectors as a rounded
/// percentage in `0..=100`. Two empty strings are identical.
pub fn cosine(a: &str, b: &str) -> u32 {
    let va = gram_counts(a);
    let vb = gram_counts(b);

    if va.is_empty() && vb.is_empty() {
        return 100;
    }
    if va.is_empty() || vb.is_empty() {
        return 0;
    }

    let (small, large) = if va.len() <= vb.len() { (&va, &vb) } else { (&vb, &va) };
    let dot: u64 = small
        .iter()
        .filter_map(|(k, &x)| large.get(k).map(|&y| x as u64 * y as u64))
        .sum();

    let norm = |v: &HashMap<(char, Option<char>), u32>| -> f64 {
        v.values()
            .map(|&x| (x as f64) * (x as f64))
            .sum::<f64>()
            .sqrt()
    };

    let sim = dot as f64 / (norm(&va) * norm(&vb));
    (sim * 100.0).round().clamp(0.0, 100.0) as u32
}
