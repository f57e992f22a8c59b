//! Vector similarity and threshold clustering.
//!
//! Clusters are connected components of the graph whose edges join vectors
//! with cosine similarity at or above a threshold. Small inputs are compared
//! exhaustively; large inputs draw candidate pairs from a random-hyperplane
//! LSH index and verify each candidate exactly, so no edge below the
//! threshold is ever admitted.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::defaults;

/// Cosine similarity of two vectors. Mismatched lengths or zero norms yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Components as sorted member lists, ordered by their smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

/// Random-hyperplane (SimHash) index with banding.
///
/// Two vectors become candidates when all bits of at least one band agree.
/// Hyperplanes are drawn from a seeded generator so that candidate sets are
/// reproducible across runs.
pub struct LshIndex {
    planes: Vec<Vec<f32>>,
    bands: usize,
    bits_per_band: usize,
}

impl LshIndex {
    pub fn new(dimension: usize, bands: usize, bits_per_band: usize, seed: u64) -> Self {
        let bits_per_band = bits_per_band.clamp(1, 64);
        let mut rng = StdRng::seed_from_u64(seed);
        let planes = (0..bands * bits_per_band)
            .map(|_| (0..dimension).map(|_| gaussian(&mut rng)).collect())
            .collect();
        Self {
            planes,
            bands,
            bits_per_band,
        }
    }

    fn band_signatures(&self, v: &[f32]) -> Vec<u64> {
        (0..self.bands)
            .map(|band| {
                let mut sig = 0u64;
                for bit in 0..self.bits_per_band {
                    let plane = &self.planes[band * self.bits_per_band + bit];
                    let side: f32 = plane.iter().zip(v.iter()).map(|(p, x)| p * x).sum();
                    if side >= 0.0 {
                        sig |= 1 << bit;
                    }
                }
                sig
            })
            .collect()
    }

    /// Index pairs `(i, j)` with `i < j` that share at least one band bucket.
    pub fn candidate_pairs(&self, vectors: &[&[f32]]) -> HashSet<(usize, usize)> {
        let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
        for (i, v) in vectors.iter().enumerate() {
            for (band, sig) in self.band_signatures(v).into_iter().enumerate() {
                buckets.entry((band, sig)).or_default().push(i);
            }
        }
        let mut pairs = HashSet::new();
        for members in buckets.values() {
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        pairs
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

/// Parameters of threshold clustering.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Minimum cosine similarity for two members to be joined.
    pub threshold: f64,
    /// Inputs up to this size are compared exhaustively.
    pub exact_pairwise_limit: usize,
    pub lsh_bands: usize,
    pub lsh_bits_per_band: usize,
    pub lsh_seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::PATTERN_SIMILARITY_THRESHOLD,
            exact_pairwise_limit: defaults::EXACT_PAIRWISE_LIMIT,
            lsh_bands: defaults::LSH_BANDS,
            lsh_bits_per_band: defaults::LSH_BITS_PER_BAND,
            lsh_seed: defaults::LSH_SEED,
        }
    }
}

impl ClusterConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_exact_pairwise_limit(mut self, limit: usize) -> Self {
        self.exact_pairwise_limit = limit;
        self
    }
}

/// A connected component of at least two members.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Input indices, ascending.
    pub members: Vec<usize>,
    /// Mean pairwise similarity over the component.
    pub mean_similarity: f64,
    pub min_similarity: f64,
}

/// Group vectors into threshold-connected components.
pub fn cluster_by_similarity(vectors: &[&[f32]], config: &ClusterConfig) -> Vec<Cluster> {
    let n = vectors.len();
    if n < 2 {
        return Vec::new();
    }

    let candidates: Box<dyn Iterator<Item = (usize, usize)>> = if n <= config.exact_pairwise_limit
    {
        Box::new((0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j))))
    } else {
        let dim = vectors[0].len();
        let index = LshIndex::new(dim, config.lsh_bands, config.lsh_bits_per_band, config.lsh_seed);
        let mut pairs: Vec<(usize, usize)> = index.candidate_pairs(vectors).into_iter().collect();
        pairs.sort_unstable();
        Box::new(pairs.into_iter())
    };

    let mut uf = UnionFind::new(n);
    let mut edge_sims: HashMap<(usize, usize), f64> = HashMap::new();
    for (i, j) in candidates {
        let sim = cosine_similarity(vectors[i], vectors[j]);
        if sim >= config.threshold {
            uf.union(i, j);
            edge_sims.insert((i, j), sim);
        }
    }

    uf.groups()
        .into_iter()
        .filter(|g| g.len() >= 2)
        .map(|members| {
            let (mean, min) = if members.len() <= config.exact_pairwise_limit {
                pairwise_stats(vectors, &members)
            } else {
                edge_stats(&edge_sims, &members)
            };
            Cluster {
                members,
                mean_similarity: mean,
                min_similarity: min,
            }
        })
        .collect()
}

fn pairwise_stats(vectors: &[&[f32]], members: &[usize]) -> (f64, f64) {
    let mut sum = 0.0;
    let mut min = f64::MAX;
    let mut count = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            let sim = cosine_similarity(vectors[i], vectors[j]);
            sum += sim;
            min = min.min(sim);
            count += 1;
        }
    }
    if count == 0 {
        (0.0, 0.0)
    } else {
        (sum / count as f64, min)
    }
}

fn edge_stats(edges: &HashMap<(usize, usize), f64>, members: &[usize]) -> (f64, f64) {
    let set: HashSet<usize> = members.iter().copied().collect();
    let sims: Vec<f64> = edges
        .iter()
        .filter(|((i, j), _)| set.contains(i) && set.contains(j))
        .map(|(_, s)| *s)
        .collect();
    if sims.is_empty() {
        return (0.0, 0.0);
    }
    let min = sims.iter().copied().fold(f64::MAX, f64::min);
    (sims.iter().sum::<f64>() / sims.len() as f64, min)
}
