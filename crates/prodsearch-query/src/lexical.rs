//! BM25 lexical scoring over a per-query corpus.

use std::collections::HashMap;

use prodsearch_core::Bm25Config;

/// Lowercase whitespace tokenization, shared by documents and queries.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Okapi BM25 index built over a small candidate corpus.
///
/// Terms with negative idf (present in more than half the documents) are
/// floored to `epsilon * mean_idf`.
#[derive(Debug, Clone)]
pub struct Bm25 {
    k1: f64,
    b: f64,
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25 {
    /// Index a tokenized corpus.
    pub fn new(corpus: &[Vec<String>], params: Bm25Config) -> Self {
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut doc_len = Vec::with_capacity(corpus.len());
        let mut df: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_len.push(doc.len());
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_len.iter().sum();
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / corpus.len() as f64
        };

        let n = corpus.len() as f64;
        let mut idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(term, freq)| {
                let freq = freq as f64;
                (term, (n - freq + 0.5).ln() - (freq + 0.5).ln())
            })
            .collect();

        if !idf.is_empty() {
            let average_idf = idf.values().sum::<f64>() / idf.len() as f64;
            let floor = params.epsilon * average_idf;
            for value in idf.values_mut() {
                if *value < 0.0 {
                    *value = floor;
                }
            }
        }

        Self {
            k1: params.k1,
            b: params.b,
            doc_freqs,
            doc_len,
            avgdl,
            idf,
        }
    }

    /// Score every document against `query` tokens, in corpus order.
    ///
    /// Repeated query tokens contribute once per occurrence. A corpus with
    /// no tokens at all scores 0 everywhere.
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        if self.avgdl == 0.0 {
            return vec![0.0; self.doc_len.len()];
        }

        self.doc_freqs
            .iter()
            .zip(&self.doc_len)
            .map(|(freqs, &len)| {
                let norm = self.k1 * (1.0 - self.b + self.b * len as f64 / self.avgdl);
                query
                    .iter()
                    .map(|q| {
                        let idf = self.idf.get(q).copied().unwrap_or(0.0);
                        let f = freqs.get(q).copied().unwrap_or(0) as f64;
                        idf * (f * (self.k1 + 1.0)) / (f + norm)
                    })
                    .sum()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }
}

/// Score raw texts against a raw query, tokenizing both the same way.
pub fn bm25_scores(documents: &[String], query: &str, params: Bm25Config) -> Vec<f64> {
    if documents.is_empty() {
        return Vec::new();
    }
    let corpus: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();
    Bm25::new(&corpus, params).scores(&tokenize(query))
}

/// Min-max normalize into `[0, 1]`; a constant list maps to zeros.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f64::max);
    let denom = if max - min == 0.0 { 1.0 } else { max - min };
    scores.iter().map(|s| (s - min) / denom).collect()
}
