//! Metrics module - Tag-health statistics M1-M11
//!
//! Stage S3. Takes the bag of normalized tag lists produced by the
//! normalizer and computes entropy, Gini, HHI, top-K mass, optional
//! Jensen-Shannon divergence to a target prior, stop-tag candidates by
//! smoothed IDF, PMI co-occurrence anomalies, a coarse community hint, a
//! near-duplicate-rate hook, and token-length overflow. Every ordering is
//! stable and fully specified so two runs over the same input are
//! byte-identical.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::progress::now_rfc3339;

/// Parameters threaded through the metrics evaluator; a plain value so the
/// orchestrator can supply it without any module holding global state.
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    pub top_k: Vec<usize>,
    pub target_distribution: Option<BTreeMap<String, f64>>,
    pub min_document_frequency: usize,
    pub max_stop_candidates: usize,
    pub min_cooccurrence: usize,
    pub max_pmi_results: usize,
    pub community_edge_threshold: usize,
    pub community_preview_size: usize,
    pub near_dup_group_keys: Option<Vec<Option<String>>>,
    pub max_token_length: usize,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        MetricsOptions {
            top_k: vec![1, 5, 10],
            target_distribution: None,
            min_document_frequency: 2,
            max_stop_candidates: 20,
            min_cooccurrence: 2,
            max_pmi_results: 20,
            community_edge_threshold: 1,
            community_preview_size: 5,
            near_dup_group_keys: None,
            max_token_length: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTagCandidate {
    pub tag: String,
    pub document_frequency: usize,
    pub idf: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmiAnomaly {
    pub tag_a: String,
    pub tag_b: String,
    pub count: usize,
    pub pmi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPreview {
    pub size: usize,
    pub preview: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityHint {
    pub community_count: usize,
    pub modularity_hint: f64,
    pub community_previews: Vec<CommunityPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearDuplicateRateHook {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub sample_count: usize,
    pub token_count: usize,
    pub unique_tag_count: usize,
    pub entropy: f64,
    pub effective_tag_count: f64,
    pub gini: f64,
    pub hhi: f64,
    /// Requested K -> cumulative mass of the K most frequent tags.
    pub top_k_mass: BTreeMap<usize, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsd_to_target: Option<f64>,
    pub stop_tag_candidates: Vec<StopTagCandidate>,
    pub pmi_anomalies: Vec<PmiAnomaly>,
    pub community_hint: CommunityHint,
    pub near_duplicate_rate_hook: NearDuplicateRateHook,
    pub token_length_overflow_rate: f64,
    pub generated_at: String,
}

/// Computes M1-M11 over `bags`, one multiset of normalized tokens per
/// sample.
pub fn evaluate(bags: &[Vec<String>], options: &MetricsOptions) -> MetricsReport {
    let sample_count = bags.len();
    let token_count: usize = bags.iter().map(|b| b.len()).sum();

    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for bag in bags {
        for tag in bag {
            *term_freq.entry(tag.as_str()).or_insert(0) += 1;
        }
        let unique_in_doc: HashSet<&str> = bag.iter().map(|t| t.as_str()).collect();
        for tag in unique_in_doc {
            *doc_freq.entry(tag).or_insert(0) += 1;
        }
    }

    let unique_tag_count = term_freq.len();

    // Probability vector over the global term frequency distribution,
    // ordinal tag order for stable iteration.
    let mut tags_sorted: Vec<&str> = term_freq.keys().copied().collect();
    tags_sorted.sort_unstable();
    let probs: Vec<(String, f64)> = tags_sorted
        .iter()
        .map(|t| (t.to_string(), term_freq[t] as f64 / token_count.max(1) as f64))
        .collect();

    let entropy = if token_count == 0 {
        0.0
    } else {
        -probs.iter().map(|(_, p)| if *p > 0.0 { p * p.ln() } else { 0.0 }).sum::<f64>()
    };
    let effective_tag_count = entropy.exp();

    let gini = compute_gini(&probs);
    let hhi = probs.iter().map(|(_, p)| p * p).sum::<f64>();

    let top_k_mass = compute_top_k_mass(&probs, &options.top_k);

    let jsd_to_target = options
        .target_distribution
        .as_ref()
        .and_then(|target| jensen_shannon_divergence(&probs, target));

    let stop_tag_candidates = compute_stop_tag_candidates(
        &doc_freq,
        sample_count,
        options.min_document_frequency,
        options.max_stop_candidates,
    );

    let cooccurrence = compute_cooccurrence(bags);
    let pmi_anomalies = compute_pmi_anomalies(
        &cooccurrence,
        &doc_freq,
        sample_count,
        options.min_cooccurrence,
        options.max_pmi_results,
    );

    let community_hint = compute_community_hint(
        &doc_freq,
        &cooccurrence,
        options.community_edge_threshold,
        options.community_preview_size,
    );

    let near_duplicate_rate_hook = compute_near_duplicate_rate(options.near_dup_group_keys.as_deref(), sample_count);

    let token_length_overflow_rate = compute_overflow_rate(bags, options.max_token_length);

    MetricsReport {
        sample_count,
        token_count,
        unique_tag_count,
        entropy,
        effective_tag_count,
        gini,
        hhi,
        top_k_mass,
        jsd_to_target,
        stop_tag_candidates,
        pmi_anomalies,
        community_hint,
        near_duplicate_rate_hook,
        token_length_overflow_rate,
        generated_at: now_rfc3339(),
    }
}

/// M3: Gini coefficient over the sorted probability vector.
fn compute_gini(probs: &[(String, f64)]) -> f64 {
    let n = probs.len();
    if n == 0 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = probs.iter().map(|(_, p)| *p).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut cumulative = 0.0;
    let mut cumulative_sum = 0.0;
    for p in &sorted {
        cumulative += p;
        cumulative_sum += cumulative;
    }
    (n as f64 + 1.0 - 2.0 * cumulative_sum) / n as f64
}

/// M5: for each requested K, the mass of the K largest probabilities, ties
/// broken by ordinal tag name; monotone non-decreasing in K by construction.
fn compute_top_k_mass(probs: &[(String, f64)], top_k: &[usize]) -> BTreeMap<usize, f64> {
    let mut sorted = probs.to_vec();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));

    let mut result = BTreeMap::new();
    for &k in top_k {
        let mass: f64 = sorted.iter().take(k).map(|(_, p)| *p).sum();
        result.insert(k, mass.clamp(0.0, 1.0));
    }
    result
}

/// M6: base-2 Jensen-Shannon divergence between the observed distribution
/// and the (renormalized) target. Returns `None` if the target is absent or
/// sums to <= 0.
fn jensen_shannon_divergence(probs: &[(String, f64)], target: &BTreeMap<String, f64>) -> Option<f64> {
    let target_sum: f64 = target.values().sum();
    if target_sum <= 0.0 {
        return None;
    }

    let observed: HashMap<&str, f64> = probs.iter().map(|(t, p)| (t.as_str(), *p)).collect();
    let mut keys: HashSet<&str> = observed.keys().copied().collect();
    keys.extend(target.keys().map(|k| k.as_str()));

    let mut jsd = 0.0;
    for key in keys {
        let p = *observed.get(key).unwrap_or(&0.0);
        let q = target.get(key).map(|v| v / target_sum).unwrap_or(0.0);
        let m = 0.5 * (p + q);
        if m <= 0.0 {
            continue;
        }
        if p > 0.0 {
            jsd += 0.5 * p * (p / m).log2();
        }
        if q > 0.0 {
            jsd += 0.5 * q * (q / m).log2();
        }
    }
    Some(jsd)
}

/// M7: stop-tag candidates by smoothed IDF, ascending IDF then descending
/// document frequency then ordinal tag.
fn compute_stop_tag_candidates(
    doc_freq: &HashMap<&str, usize>,
    sample_count: usize,
    min_document_frequency: usize,
    max_candidates: usize,
) -> Vec<StopTagCandidate> {
    let n = sample_count as f64;
    let mut candidates: Vec<StopTagCandidate> = doc_freq
        .iter()
        .filter(|(_, &df)| df >= min_document_frequency)
        .map(|(&tag, &df)| {
            let idf = ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0;
            StopTagCandidate { tag: tag.to_string(), document_frequency: df, idf }
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.idf
            .partial_cmp(&b.idf)
            .unwrap()
            .then_with(|| b.document_frequency.cmp(&a.document_frequency))
            .then_with(|| a.tag.cmp(&b.tag))
    });
    candidates.truncate(max_candidates);
    candidates
}

/// Co-occurrence counts over unordered, within-sample, deduplicated,
/// ordinally-sorted token pairs. Shared by M8 and M9.
fn compute_cooccurrence(bags: &[Vec<String>]) -> HashMap<(String, String), usize> {
    let mut cooccurrence: HashMap<(String, String), usize> = HashMap::new();
    for bag in bags {
        let mut unique: Vec<&str> = bag.iter().map(|t| t.as_str()).collect::<HashSet<_>>().into_iter().collect();
        unique.sort_unstable();
        for i in 0..unique.len() {
            for j in (i + 1)..unique.len() {
                let key = (unique[i].to_string(), unique[j].to_string());
                *cooccurrence.entry(key).or_insert(0) += 1;
            }
        }
    }
    cooccurrence
}

/// M8: PMI anomalies over pairs meeting the minimum co-occurrence count,
/// ordered descending PMI, descending count, then ordinal pair.
fn compute_pmi_anomalies(
    cooccurrence: &HashMap<(String, String), usize>,
    doc_freq: &HashMap<&str, usize>,
    sample_count: usize,
    min_cooccurrence: usize,
    max_results: usize,
) -> Vec<PmiAnomaly> {
    let n = sample_count as f64;
    if n <= 0.0 {
        return Vec::new();
    }

    let mut anomalies: Vec<PmiAnomaly> = cooccurrence
        .iter()
        .filter(|(_, &count)| count >= min_cooccurrence)
        .map(|((a, b), &count)| {
            let p_xy = count as f64 / n;
            let p_x = *doc_freq.get(a.as_str()).unwrap_or(&0) as f64 / n;
            let p_y = *doc_freq.get(b.as_str()).unwrap_or(&0) as f64 / n;
            let pmi = if p_x > 0.0 && p_y > 0.0 && p_xy > 0.0 {
                (p_xy / (p_x * p_y)).log2()
            } else {
                f64::NEG_INFINITY
            };
            PmiAnomaly { tag_a: a.clone(), tag_b: b.clone(), count, pmi }
        })
        .collect();

    anomalies.sort_by(|a, b| {
        b.pmi
            .partial_cmp(&a.pmi)
            .unwrap()
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| (a.tag_a.as_str(), a.tag_b.as_str()).cmp(&(b.tag_a.as_str(), b.tag_b.as_str())))
    });
    anomalies.truncate(max_results);
    anomalies
}

/// M9: connected components of the co-occurrence graph restricted to edges
/// at or above `edge_threshold`, via breadth-first search visiting
/// neighbours in ordinal order.
fn compute_community_hint(
    doc_freq: &HashMap<&str, usize>,
    cooccurrence: &HashMap<(String, String), usize>,
    edge_threshold: usize,
    preview_size: usize,
) -> CommunityHint {
    let mut nodes: Vec<String> = doc_freq.keys().map(|t| t.to_string()).collect();
    nodes.sort();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut edge_count = 0usize;
    for ((a, b), &weight) in cooccurrence {
        if weight >= edge_threshold {
            adjacency.entry(a.as_str()).or_default().push(b.as_str());
            adjacency.entry(b.as_str()).or_default().push(a.as_str());
            edge_count += 1;
        }
    }
    for neighbours in adjacency.values_mut() {
        neighbours.sort_unstable();
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut components: Vec<Vec<String>> = Vec::new();

    for node in &nodes {
        let node_ref = node.as_str();
        if visited.contains(node_ref) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(node_ref);
        visited.insert(node_ref);
        while let Some(current) = queue.pop_front() {
            component.push(current.to_string());
            if let Some(neighbours) = adjacency.get(current) {
                for &neighbour in neighbours {
                    if visited.insert(neighbour) {
                        queue.push_back(neighbour);
                    }
                }
            }
        }
        component.sort();
        components.push(component);
    }

    let community_count = components.len();
    let node_count = nodes.len();
    let modularity_hint = if node_count == 0 {
        0.0
    } else {
        (community_count as f64 / node_count as f64) * (edge_count as f64 / edge_count.max(1) as f64)
    };

    let community_previews = components
        .iter()
        .map(|component| CommunityPreview {
            size: component.len(),
            preview: component.iter().take(preview_size).cloned().collect(),
        })
        .collect();

    CommunityHint { community_count, modularity_hint, community_previews }
}

/// M10: fraction of samples whose non-empty grouping key belongs to a key
/// value shared by >= 2 samples. Absent (with a note) unless the key list's
/// length matches the sample count exactly.
fn compute_near_duplicate_rate(keys: Option<&[Option<String>]>, sample_count: usize) -> NearDuplicateRateHook {
    let keys = match keys {
        Some(k) if k.len() == sample_count => k,
        Some(_) => {
            return NearDuplicateRateHook {
                rate: None,
                note: "Grouping key count does not match sample count.".to_string(),
            }
        }
        None => {
            return NearDuplicateRateHook {
                rate: None,
                note: "No near-duplicate grouping keys were supplied.".to_string(),
            }
        }
    };

    if sample_count == 0 {
        return NearDuplicateRateHook { rate: Some(0.0), note: "No samples.".to_string() };
    }

    let mut key_counts: HashMap<&str, usize> = HashMap::new();
    for key in keys.iter().flatten() {
        *key_counts.entry(key.as_str()).or_insert(0) += 1;
    }

    let matched = keys
        .iter()
        .filter(|k| k.as_deref().map(|k| key_counts[k] >= 2).unwrap_or(false))
        .count();

    NearDuplicateRateHook {
        rate: Some(matched as f64 / sample_count as f64),
        note: "Computed from supplied per-sample grouping keys.".to_string(),
    }
}

/// M11: fraction of token occurrences whose character length exceeds the
/// configured maximum.
fn compute_overflow_rate(bags: &[Vec<String>], max_token_length: usize) -> f64 {
    if max_token_length == 0 {
        return 0.0;
    }
    let total: usize = bags.iter().map(|b| b.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let overflowing: usize = bags
        .iter()
        .flat_map(|b| b.iter())
        .filter(|t| t.chars().count() > max_token_length)
        .count();
    overflowing as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bags() -> Vec<Vec<String>> {
        vec![
            vec!["cat".into(), "cute".into(), "blue".into()],
            vec!["cat".into(), "cute".into(), "blue".into()],
            vec!["dog".into(), "cute".into(), "long_token_overflow".into()],
            vec!["dog".into(), "calm".into(), "blue".into()],
        ]
    }

    #[test]
    fn scenario_five_four_sample_metrics() {
        let options = MetricsOptions {
            top_k: vec![1, 2, 3],
            max_token_length: 8,
            near_dup_group_keys: Some(vec![
                Some("a".to_string()),
                Some("a".to_string()),
                None,
                Some("b".to_string()),
            ]),
            ..Default::default()
        };
        let report = evaluate(&bags(), &options);

        assert_eq!(report.sample_count, 4);
        assert_eq!(report.token_count, 12);
        assert_eq!(report.unique_tag_count, 6);
        assert!(report.entropy > 0.0);
        assert!(report.gini >= 0.0 && report.gini <= 1.0);
        assert!(report.hhi >= 0.0 && report.hhi <= 1.0);

        let mut masses: Vec<f64> = vec![
            report.top_k_mass[&1],
            report.top_k_mass[&2],
            report.top_k_mass[&3],
        ];
        let sorted = { let mut s = masses.clone(); s.sort_by(|a, b| a.partial_cmp(b).unwrap()); s };
        assert_eq!(masses, sorted);
        masses.dedup();

        assert!(report
            .stop_tag_candidates
            .iter()
            .any(|c| c.tag == "blue" || c.tag == "cute"));
        assert!(!report.pmi_anomalies.is_empty());
        assert!(report.community_hint.community_count >= 1);
        assert_eq!(report.near_duplicate_rate_hook.rate, Some(0.25));
        assert!(report.token_length_overflow_rate > 0.0);
    }

    #[test]
    fn empty_dataset_boundaries() {
        let report = evaluate(&[], &MetricsOptions::default());
        assert_eq!(report.entropy, 0.0);
        assert_eq!(report.effective_tag_count, 1.0);
        assert_eq!(report.token_length_overflow_rate, 0.0);
        assert!(report.stop_tag_candidates.is_empty());
        assert!(report.pmi_anomalies.is_empty());
    }

    #[test]
    fn top_k_mass_is_monotone_and_bounded() {
        let options = MetricsOptions { top_k: vec![1, 2, 3, 4, 5, 6, 7], ..Default::default() };
        let report = evaluate(&bags(), &options);
        let ks: Vec<usize> = options.top_k.clone();
        for window in ks.windows(2) {
            assert!(report.top_k_mass[&window[0]] <= report.top_k_mass[&window[1]] + 1e-12);
        }
        for mass in report.top_k_mass.values() {
            assert!(*mass >= 0.0 && *mass <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let report = evaluate(&bags(), &MetricsOptions::default());
        let total_mass = report.top_k_mass[&report.unique_tag_count.max(1)];
        assert!((total_mass - 1.0).abs() < 1e-9 || report.unique_tag_count == 0);
    }
}
